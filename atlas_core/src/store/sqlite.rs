//! SQLite-backed EntityStore implementation.
//!
//! Persists scopes, entities and selectors in a single WAL-mode SQLite file.
//! Each `StoreTx` wraps one SQLite transaction; dropping it rolls back.
//!
//! Usage:
//! ```ignore
//! let store = SqliteEntityStore::new("/path/to/atlas.db").await?;
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::path::Path;
use std::str::FromStr;
use uuid::Uuid;

use super::traits::{EntityStore, ListQuery, StoreTx};
use crate::catalog::normalize::normalize_label;
use crate::catalog::selectors::SelectorSet;
use crate::models::{Category, Entity, EntityId, Scope, ScopeId, Selector};
use crate::{Error, Result};

/// A durable, file-backed EntityStore backed by a single SQLite file.
#[derive(Clone)]
pub struct SqliteEntityStore {
    pool: SqlitePool,
}

impl SqliteEntityStore {
    /// Create (or open) a SQLite store at the given file path.
    ///
    /// Creates the file and parent directories if they don't exist and runs
    /// the schema migration.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::backend("sqlite_entity_store", e))?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", path.display()))
            .map_err(db_err)?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await
            .map_err(db_err)?;

        Self::with_pool(pool).await
    }

    /// Private in-memory database. A single pooled connection keeps the
    /// database alive for the lifetime of the store.
    pub async fn in_memory() -> Result<Self> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:").map_err(db_err)?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await
            .map_err(db_err)?;

        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::query(SCHEMA)
            .execute(&pool)
            .await
            .map_err(|e| Error::backend("sqlite_entity_store_migration", e))?;
        Ok(Self { pool })
    }
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS scopes (
    id TEXT PRIMARY KEY,
    label TEXT NOT NULL,
    normalized_label TEXT NOT NULL UNIQUE,
    foreign_id TEXT NOT NULL UNIQUE,
    public INTEGER NOT NULL,
    summary TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS entities (
    id TEXT PRIMARY KEY,
    scope_id TEXT NOT NULL,
    label TEXT NOT NULL,
    normalized_label TEXT NOT NULL,
    category TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS entities_scope_label_idx
    ON entities(scope_id, normalized_label);

CREATE TABLE IF NOT EXISTS selectors (
    entity_id TEXT NOT NULL,
    position INTEGER NOT NULL,
    text TEXT NOT NULL,
    normalized TEXT NOT NULL,
    PRIMARY KEY (entity_id, normalized)
);
"#;

#[async_trait]
impl EntityStore for SqliteEntityStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>> {
        let tx = self.pool.begin().await.map_err(db_err)?;
        Ok(Box::new(SqliteTx { tx }))
    }
}

struct SqliteTx {
    tx: Transaction<'static, Sqlite>,
}

impl SqliteTx {
    async fn load_selectors(&mut self, entity_id: EntityId) -> Result<SelectorSet> {
        let rows = sqlx::query(
            "SELECT text, normalized FROM selectors WHERE entity_id = ?1 ORDER BY position",
        )
        .bind(entity_id.to_string())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(db_err)?;

        rows.iter()
            .map(|r| {
                Ok(Selector {
                    text: r.try_get("text").map_err(db_err)?,
                    normalized: r.try_get("normalized").map_err(db_err)?,
                })
            })
            .collect()
    }

    async fn hydrate(&mut self, row: Option<SqliteRow>) -> Result<Option<Entity>> {
        let Some(row) = row else {
            return Ok(None);
        };
        let mut entity = row_to_entity(&row)?;
        entity.selectors = self.load_selectors(entity.id).await?;
        Ok(Some(entity))
    }
}

const ENTITY_COLUMNS: &str = "id, scope_id, label, category, created_at, updated_at";
const SCOPE_COLUMNS: &str = "id, label, foreign_id, public, summary, created_at, updated_at";

#[async_trait]
impl StoreTx for SqliteTx {
    async fn get_scope(&mut self, id: ScopeId) -> Result<Option<Scope>> {
        let row = sqlx::query(&format!("SELECT {SCOPE_COLUMNS} FROM scopes WHERE id = ?1"))
            .bind(id.to_string())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_err)?;
        row.as_ref().map(row_to_scope).transpose()
    }

    async fn find_scope_by_label(&mut self, label: &str) -> Result<Option<Scope>> {
        let normalized = normalize_label(label);
        if normalized.is_empty() {
            return Ok(None);
        }
        let row = sqlx::query(&format!(
            "SELECT {SCOPE_COLUMNS} FROM scopes WHERE normalized_label = ?1"
        ))
        .bind(normalized)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_err)?;
        row.as_ref().map(row_to_scope).transpose()
    }

    async fn find_scope_by_foreign_id(&mut self, foreign_id: &str) -> Result<Option<Scope>> {
        let row = sqlx::query(&format!(
            "SELECT {SCOPE_COLUMNS} FROM scopes WHERE foreign_id = ?1"
        ))
        .bind(foreign_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_err)?;
        row.as_ref().map(row_to_scope).transpose()
    }

    async fn list_scopes(&mut self, query: ListQuery) -> Result<Vec<Scope>> {
        let rows = sqlx::query(&format!(
            "SELECT {SCOPE_COLUMNS} FROM scopes ORDER BY created_at, id LIMIT ?1 OFFSET ?2"
        ))
        .bind(query.limit as i64)
        .bind(query.offset as i64)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(db_err)?;
        rows.iter().map(row_to_scope).collect()
    }

    async fn put_scope(&mut self, scope: &Scope) -> Result<()> {
        let normalized = scope.normalized_label();
        let clash = sqlx::query(
            "SELECT label, foreign_id FROM scopes
             WHERE id != ?1 AND (normalized_label = ?2 OR foreign_id = ?3)
             LIMIT 1",
        )
        .bind(scope.id.to_string())
        .bind(&normalized)
        .bind(&scope.foreign_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_err)?;
        if let Some(row) = clash {
            let foreign_id: String = row.try_get("foreign_id").map_err(db_err)?;
            if foreign_id == scope.foreign_id {
                return Err(Error::Conflict(format!(
                    "scope foreign_id '{}' already exists",
                    scope.foreign_id
                )));
            }
            return Err(Error::Conflict(format!(
                "scope label '{}' already exists",
                scope.label
            )));
        }

        sqlx::query(
            "INSERT INTO scopes
               (id, label, normalized_label, foreign_id, public, summary, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
               label = excluded.label,
               normalized_label = excluded.normalized_label,
               foreign_id = excluded.foreign_id,
               public = excluded.public,
               summary = excluded.summary,
               updated_at = excluded.updated_at",
        )
        .bind(scope.id.to_string())
        .bind(&scope.label)
        .bind(&normalized)
        .bind(&scope.foreign_id)
        .bind(i32::from(scope.public))
        .bind(&scope.summary)
        .bind(scope.created_at.to_rfc3339())
        .bind(scope.updated_at.to_rfc3339())
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn delete_scope(&mut self, id: ScopeId) -> Result<u64> {
        let removed = sqlx::query("DELETE FROM scopes WHERE id = ?1")
            .bind(id.to_string())
            .execute(&mut *self.tx)
            .await
            .map_err(db_err)?;
        if removed.rows_affected() == 0 {
            return Err(Error::NotFound(format!("scope '{id}' not found")));
        }

        sqlx::query(
            "DELETE FROM selectors
             WHERE entity_id IN (SELECT id FROM entities WHERE scope_id = ?1)",
        )
        .bind(id.to_string())
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;

        let entities = sqlx::query("DELETE FROM entities WHERE scope_id = ?1")
            .bind(id.to_string())
            .execute(&mut *self.tx)
            .await
            .map_err(db_err)?;
        Ok(entities.rows_affected())
    }

    async fn get_entity(&mut self, id: EntityId) -> Result<Option<Entity>> {
        let row = sqlx::query(&format!("SELECT {ENTITY_COLUMNS} FROM entities WHERE id = ?1"))
            .bind(id.to_string())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_err)?;
        self.hydrate(row).await
    }

    async fn find_entity_by_normalized_label(
        &mut self,
        scope_id: ScopeId,
        normalized: &str,
    ) -> Result<Option<Entity>> {
        let row = sqlx::query(&format!(
            "SELECT {ENTITY_COLUMNS} FROM entities
             WHERE scope_id = ?1 AND normalized_label = ?2
             ORDER BY created_at, id
             LIMIT 1"
        ))
        .bind(scope_id.to_string())
        .bind(normalized)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_err)?;
        self.hydrate(row).await
    }

    async fn list_entities(&mut self, scope_id: ScopeId, query: ListQuery) -> Result<Vec<Entity>> {
        let rows = sqlx::query(&format!(
            "SELECT {ENTITY_COLUMNS} FROM entities
             WHERE scope_id = ?1
             ORDER BY created_at, id
             LIMIT ?2 OFFSET ?3"
        ))
        .bind(scope_id.to_string())
        .bind(query.limit as i64)
        .bind(query.offset as i64)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(db_err)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            if let Some(entity) = self.hydrate(Some(row)).await? {
                out.push(entity);
            }
        }
        Ok(out)
    }

    async fn put_entity(&mut self, entity: &Entity) -> Result<()> {
        let scope = sqlx::query("SELECT 1 FROM scopes WHERE id = ?1")
            .bind(entity.scope_id.to_string())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_err)?;
        if scope.is_none() {
            return Err(Error::NotFound(format!(
                "scope '{}' not found for entity '{}'",
                entity.scope_id, entity.id
            )));
        }

        sqlx::query(
            "INSERT INTO entities
               (id, scope_id, label, normalized_label, category, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
               label = excluded.label,
               normalized_label = excluded.normalized_label,
               category = excluded.category,
               updated_at = excluded.updated_at",
        )
        .bind(entity.id.to_string())
        .bind(entity.scope_id.to_string())
        .bind(&entity.label)
        .bind(entity.normalized_label())
        .bind(entity.category.as_str())
        .bind(entity.created_at.to_rfc3339())
        .bind(entity.updated_at.to_rfc3339())
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;

        sqlx::query("DELETE FROM selectors WHERE entity_id = ?1")
            .bind(entity.id.to_string())
            .execute(&mut *self.tx)
            .await
            .map_err(db_err)?;

        for (position, selector) in entity.selectors.iter().enumerate() {
            sqlx::query(
                "INSERT INTO selectors (entity_id, position, text, normalized)
                 VALUES (?1, ?2, ?3, ?4)",
            )
            .bind(entity.id.to_string())
            .bind(position as i64)
            .bind(&selector.text)
            .bind(&selector.normalized)
            .execute(&mut *self.tx)
            .await
            .map_err(db_err)?;
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let this = *self;
        this.tx.commit().await.map_err(db_err)
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let this = *self;
        this.tx.rollback().await.map_err(db_err)
    }
}

fn db_err(e: sqlx::Error) -> Error {
    Error::backend("sqlite_entity_store", e)
}

fn parse_dt(s: &str) -> DateTime<Utc> {
    s.parse::<DateTime<Utc>>().unwrap_or_else(|_| Utc::now())
}

fn parse_uuid(column: &str, s: &str) -> Result<Uuid> {
    Uuid::parse_str(s)
        .map_err(|_| Error::BackendMessage(format!("sqlite_entity_store: bad {column} '{s}'")))
}

fn row_to_scope(r: &SqliteRow) -> Result<Scope> {
    let id: String = r.try_get("id").map_err(db_err)?;
    let public: i32 = r.try_get("public").map_err(db_err)?;
    let created_at: String = r.try_get("created_at").map_err(db_err)?;
    let updated_at: String = r.try_get("updated_at").map_err(db_err)?;

    Ok(Scope {
        id: ScopeId(parse_uuid("scope id", &id)?),
        label: r.try_get("label").map_err(db_err)?,
        foreign_id: r.try_get("foreign_id").map_err(db_err)?,
        public: public != 0,
        summary: r.try_get("summary").map_err(db_err)?,
        created_at: parse_dt(&created_at),
        updated_at: parse_dt(&updated_at),
    })
}

fn row_to_entity(r: &SqliteRow) -> Result<Entity> {
    let id: String = r.try_get("id").map_err(db_err)?;
    let scope_id: String = r.try_get("scope_id").map_err(db_err)?;
    let category: String = r.try_get("category").map_err(db_err)?;
    let created_at: String = r.try_get("created_at").map_err(db_err)?;
    let updated_at: String = r.try_get("updated_at").map_err(db_err)?;

    Ok(Entity {
        id: EntityId(parse_uuid("entity id", &id)?),
        scope_id: ScopeId(parse_uuid("scope id", &scope_id)?),
        label: r.try_get("label").map_err(db_err)?,
        category: Category::parse(&category).unwrap_or(Category::Other),
        selectors: SelectorSet::default(),
        created_at: parse_dt(&created_at),
        updated_at: parse_dt(&updated_at),
    })
}
