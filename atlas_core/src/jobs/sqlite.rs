//! SQLite-backed JobQueue implementation.
//!
//! Jobs outlive the process that scheduled them: the CLI queues work into
//! the same file as the entity store and a separate runtime claims it with
//! `take_next`. Claimed rows stay in the table with `status = 'taken'`.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};

use crate::jobs::models::{JobHandle, JobKind, JobRequest, Priority};
use crate::jobs::traits::JobQueue;
use crate::models::ScopeId;
use crate::{Error, Result};

#[derive(Clone)]
pub struct SqliteJobQueue {
    pool: SqlitePool,
    capacity: Option<usize>,
}

impl SqliteJobQueue {
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::backend("sqlite_job_queue mkdir", e))?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", path.display()))
            .map_err(db_err)?
            .journal_mode(SqliteJournalMode::Wal)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await
            .map_err(db_err)?;

        Self::with_pool(pool).await
    }

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
            .map_err(|e| Error::backend("sqlite_job_queue schema", e))?;
        Ok(Self {
            pool,
            capacity: None,
        })
    }

    /// Reject new (non-coalesced) requests once `capacity` jobs are pending.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }
}

// Only one pending row per dedupe key; taken rows may repeat it.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
  seq INTEGER PRIMARY KEY AUTOINCREMENT,
  job_id TEXT NOT NULL UNIQUE,
  kind TEXT NOT NULL,
  collection_id TEXT NOT NULL,
  priority INTEGER NOT NULL,
  dedupe_key TEXT NOT NULL,
  query_json TEXT NULL,
  status TEXT NOT NULL,
  enqueued_at TEXT NOT NULL,
  taken_at TEXT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS jobs_pending_dedupe_idx
  ON jobs(dedupe_key) WHERE status = 'pending';
CREATE INDEX IF NOT EXISTS jobs_pending_order_idx
  ON jobs(status, priority DESC, seq);
"#;

const JOB_COLUMNS: &str =
    "job_id, kind, collection_id, priority, dedupe_key, query_json, enqueued_at";

#[async_trait]
impl JobQueue for SqliteJobQueue {
    #[tracing::instrument(level = "debug", skip(self, request), fields(kind = %request.kind, collection_id = %request.collection_id))]
    async fn enqueue(&self, request: JobRequest) -> Result<JobHandle> {
        let dedupe_key = request.dedupe_key();
        let query_json = request
            .query
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| Error::backend("sqlite_job_queue serialize query", e))?;

        let mut tx = self.pool.begin().await.map_err(db_err)?;

        if let Some(existing) = pending_by_key(&mut tx, &dedupe_key).await? {
            tx.rollback().await.map_err(db_err)?;
            tracing::debug!(job_id = %existing.job_id, %dedupe_key, "coalesced into pending job");
            return Ok(existing);
        }

        if let Some(cap) = self.capacity {
            let row = sqlx::query("SELECT COUNT(*) AS n FROM jobs WHERE status = 'pending'")
                .fetch_one(&mut *tx)
                .await
                .map_err(db_err)?;
            let pending: i64 = row.try_get("n").map_err(db_err)?;
            if pending >= cap as i64 {
                tx.rollback().await.map_err(db_err)?;
                return Err(Error::BackendMessage(format!(
                    "job queue is full ({cap} pending)"
                )));
            }
        }

        let handle = JobHandle {
            job_id: ulid::Ulid::new(),
            kind: request.kind,
            collection_id: request.collection_id,
            priority: request.priority.clamped(),
            dedupe_key: dedupe_key.clone(),
            enqueued_at: Utc::now(),
        };

        let inserted = sqlx::query(
            r#"
INSERT INTO jobs
  (job_id, kind, collection_id, priority, dedupe_key, query_json, status, enqueued_at)
VALUES
  (?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7)
ON CONFLICT(dedupe_key) WHERE status = 'pending' DO NOTHING
"#,
        )
        .bind(handle.job_id.to_string())
        .bind(handle.kind.as_str())
        .bind(handle.collection_id.to_string())
        .bind(i64::from(handle.priority.0))
        .bind(&handle.dedupe_key)
        .bind(query_json)
        .bind(handle.enqueued_at.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        let handle = if inserted.rows_affected() > 0 {
            handle
        } else {
            pending_by_key(&mut tx, &dedupe_key).await?.ok_or_else(|| {
                Error::BackendMessage(format!(
                    "sqlite_job_queue: pending job for '{dedupe_key}' vanished"
                ))
            })?
        };
        tx.commit().await.map_err(db_err)?;
        Ok(handle)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn take_next(&self) -> Result<Option<(JobHandle, JobRequest)>> {
        let row = sqlx::query(&format!(
            r#"
UPDATE jobs SET status = 'taken', taken_at = ?1
WHERE seq = (
  SELECT seq FROM jobs WHERE status = 'pending'
  ORDER BY priority DESC, seq ASC
  LIMIT 1
)
RETURNING {JOB_COLUMNS}
"#
        ))
        .bind(Utc::now().to_rfc3339())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.as_ref().map(row_to_job).transpose()
    }

    async fn list_pending(&self) -> Result<Vec<JobHandle>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE status = 'pending' ORDER BY priority DESC, seq ASC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter()
            .map(|r| row_to_job(r).map(|(handle, _)| handle))
            .collect()
    }
}

async fn pending_by_key(
    tx: &mut sqlx::Transaction<'static, sqlx::Sqlite>,
    dedupe_key: &str,
) -> Result<Option<JobHandle>> {
    let row = sqlx::query(&format!(
        "SELECT {JOB_COLUMNS} FROM jobs WHERE status = 'pending' AND dedupe_key = ?1 LIMIT 1"
    ))
    .bind(dedupe_key)
    .fetch_optional(&mut **tx)
    .await
    .map_err(db_err)?;

    row.as_ref()
        .map(|r| row_to_job(r).map(|(handle, _)| handle))
        .transpose()
}

fn db_err(e: sqlx::Error) -> Error {
    Error::backend("sqlite_job_queue", e)
}

fn bad_column(column: &str, value: &str) -> Error {
    Error::BackendMessage(format!("sqlite_job_queue: bad {column} '{value}'"))
}

fn row_to_job(r: &SqliteRow) -> Result<(JobHandle, JobRequest)> {
    let job_id: String = r.try_get("job_id").map_err(db_err)?;
    let kind: String = r.try_get("kind").map_err(db_err)?;
    let collection_id: String = r.try_get("collection_id").map_err(db_err)?;
    let priority: i64 = r.try_get("priority").map_err(db_err)?;
    let dedupe_key: String = r.try_get("dedupe_key").map_err(db_err)?;
    let query_json: Option<String> = r.try_get("query_json").map_err(db_err)?;
    let enqueued_at: String = r.try_get("enqueued_at").map_err(db_err)?;

    let job_id = ulid::Ulid::from_string(&job_id).map_err(|_| bad_column("job_id", &job_id))?;
    let kind = JobKind::parse(&kind).ok_or_else(|| bad_column("kind", &kind))?;
    let collection_id = collection_id
        .parse::<ScopeId>()
        .map_err(|_| bad_column("collection_id", &collection_id))?;
    let priority = u8::try_from(priority)
        .map(|p| Priority(p).clamped())
        .map_err(|_| bad_column("priority", &priority.to_string()))?;
    let query = query_json
        .as_deref()
        .map(serde_json::from_str::<serde_json::Value>)
        .transpose()
        .map_err(|e| Error::backend("sqlite_job_queue decode query", e))?;
    let enqueued_at = enqueued_at
        .parse::<DateTime<Utc>>()
        .map_err(|_| bad_column("enqueued_at", &enqueued_at))?;

    let handle = JobHandle {
        job_id,
        kind,
        collection_id,
        priority,
        dedupe_key,
        enqueued_at,
    };
    let request = JobRequest {
        kind,
        collection_id,
        priority,
        query,
    };
    Ok((handle, request))
}
