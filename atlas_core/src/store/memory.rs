use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::traits::{EntityStore, ListQuery, StoreTx};
use crate::catalog::normalize::normalize_label;
use crate::models::{Entity, EntityId, Scope, ScopeId};
use crate::{Error, Result};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    scopes: HashMap<ScopeId, Scope>,
    entities: HashMap<EntityId, Entity>,
}

/// Transaction counters, mostly useful to assert that a call never reached
/// storage.
#[derive(Debug, Default)]
struct Counters {
    begun: AtomicU64,
    committed: AtomicU64,
    rolled_back: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoreStats {
    pub transactions_begun: u64,
    pub commits: u64,
    pub rollbacks: u64,
}

/// In-memory EntityStore for local development and unit tests.
///
/// Semantics:
/// - a transaction works on a private snapshot taken at `begin`
/// - commit writes back only the rows the transaction touched (last commit wins per row)
/// - dropping an uncommitted transaction discards it
#[derive(Clone, Default)]
pub struct MemoryEntityStore {
    state: Arc<RwLock<MemoryState>>,
    counters: Arc<Counters>,
}

impl MemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            transactions_begun: self.counters.begun.load(Ordering::SeqCst),
            commits: self.counters.committed.load(Ordering::SeqCst),
            rollbacks: self.counters.rolled_back.load(Ordering::SeqCst),
        }
    }

    /// Snapshot of all committed entities (primarily for tests).
    pub async fn all_entities(&self) -> Vec<Entity> {
        let state = self.state.read().await;
        let mut out: Vec<Entity> = state.entities.values().cloned().collect();
        out.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        out
    }

    /// Snapshot of all committed scopes (primarily for tests).
    pub async fn all_scopes(&self) -> Vec<Scope> {
        let state = self.state.read().await;
        let mut out: Vec<Scope> = state.scopes.values().cloned().collect();
        out.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        out
    }
}

#[async_trait]
impl EntityStore for MemoryEntityStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>> {
        let working = self.state.read().await.clone();
        self.counters.begun.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryTx {
            shared: self.state.clone(),
            counters: self.counters.clone(),
            working,
            dirty_scopes: HashSet::new(),
            dirty_entities: HashSet::new(),
            deleted_scopes: HashSet::new(),
            deleted_entities: HashSet::new(),
        }))
    }
}

struct MemoryTx {
    shared: Arc<RwLock<MemoryState>>,
    counters: Arc<Counters>,
    working: MemoryState,
    dirty_scopes: HashSet<ScopeId>,
    dirty_entities: HashSet<EntityId>,
    deleted_scopes: HashSet<ScopeId>,
    deleted_entities: HashSet<EntityId>,
}

impl MemoryTx {
    /// Re-check staged rows against state committed since `begin`.
    fn check_against(&self, shared: &MemoryState) -> Result<()> {
        for id in &self.dirty_scopes {
            let Some(scope) = self.working.scopes.get(id) else {
                continue;
            };
            let normalized = scope.normalized_label();
            let clash = shared.scopes.values().find(|other| {
                other.id != scope.id
                    && !self.deleted_scopes.contains(&other.id)
                    && !self.dirty_scopes.contains(&other.id)
                    && (other.normalized_label() == normalized
                        || other.foreign_id == scope.foreign_id)
            });
            if let Some(other) = clash {
                let what = if other.foreign_id == scope.foreign_id {
                    format!("scope foreign_id '{}' already exists", scope.foreign_id)
                } else {
                    format!("scope label '{}' already exists", scope.label)
                };
                return Err(Error::Conflict(what));
            }
        }
        for id in &self.dirty_entities {
            let Some(entity) = self.working.entities.get(id) else {
                continue;
            };
            let scope_live = self.dirty_scopes.contains(&entity.scope_id)
                || (shared.scopes.contains_key(&entity.scope_id)
                    && !self.deleted_scopes.contains(&entity.scope_id));
            if !scope_live {
                return Err(Error::NotFound(format!(
                    "scope '{}' was deleted before entity '{}' committed",
                    entity.scope_id, entity.id
                )));
            }
        }
        Ok(())
    }
}

fn page<T>(items: Vec<T>, query: ListQuery) -> Vec<T> {
    items
        .into_iter()
        .skip(query.offset)
        .take(query.limit)
        .collect()
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn get_scope(&mut self, id: ScopeId) -> Result<Option<Scope>> {
        Ok(self.working.scopes.get(&id).cloned())
    }

    async fn find_scope_by_label(&mut self, label: &str) -> Result<Option<Scope>> {
        let normalized = normalize_label(label);
        if normalized.is_empty() {
            return Ok(None);
        }
        Ok(self
            .working
            .scopes
            .values()
            .find(|s| s.normalized_label() == normalized)
            .cloned())
    }

    async fn find_scope_by_foreign_id(&mut self, foreign_id: &str) -> Result<Option<Scope>> {
        Ok(self
            .working
            .scopes
            .values()
            .find(|s| s.foreign_id == foreign_id)
            .cloned())
    }

    async fn list_scopes(&mut self, query: ListQuery) -> Result<Vec<Scope>> {
        let mut scopes: Vec<Scope> = self.working.scopes.values().cloned().collect();
        scopes.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        Ok(page(scopes, query))
    }

    async fn put_scope(&mut self, scope: &Scope) -> Result<()> {
        let normalized = scope.normalized_label();
        for other in self.working.scopes.values() {
            if other.id == scope.id {
                continue;
            }
            if other.normalized_label() == normalized {
                return Err(Error::Conflict(format!(
                    "scope label '{}' already exists",
                    scope.label
                )));
            }
            if other.foreign_id == scope.foreign_id {
                return Err(Error::Conflict(format!(
                    "scope foreign_id '{}' already exists",
                    scope.foreign_id
                )));
            }
        }
        self.working.scopes.insert(scope.id, scope.clone());
        self.deleted_scopes.remove(&scope.id);
        self.dirty_scopes.insert(scope.id);
        Ok(())
    }

    async fn delete_scope(&mut self, id: ScopeId) -> Result<u64> {
        if self.working.scopes.remove(&id).is_none() {
            return Err(Error::NotFound(format!("scope '{id}' not found")));
        }
        self.dirty_scopes.remove(&id);
        self.deleted_scopes.insert(id);

        let owned: Vec<EntityId> = self
            .working
            .entities
            .values()
            .filter(|e| e.scope_id == id)
            .map(|e| e.id)
            .collect();
        for entity_id in &owned {
            self.working.entities.remove(entity_id);
            self.dirty_entities.remove(entity_id);
            self.deleted_entities.insert(*entity_id);
        }
        Ok(owned.len() as u64)
    }

    async fn get_entity(&mut self, id: EntityId) -> Result<Option<Entity>> {
        Ok(self.working.entities.get(&id).cloned())
    }

    async fn find_entity_by_normalized_label(
        &mut self,
        scope_id: ScopeId,
        normalized: &str,
    ) -> Result<Option<Entity>> {
        Ok(self
            .working
            .entities
            .values()
            .filter(|e| e.scope_id == scope_id && e.normalized_label() == normalized)
            .min_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)))
            .cloned())
    }

    async fn list_entities(&mut self, scope_id: ScopeId, query: ListQuery) -> Result<Vec<Entity>> {
        let mut entities: Vec<Entity> = self
            .working
            .entities
            .values()
            .filter(|e| e.scope_id == scope_id)
            .cloned()
            .collect();
        entities.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        Ok(page(entities, query))
    }

    async fn put_entity(&mut self, entity: &Entity) -> Result<()> {
        if !self.working.scopes.contains_key(&entity.scope_id) {
            return Err(Error::NotFound(format!(
                "scope '{}' not found for entity '{}'",
                entity.scope_id, entity.id
            )));
        }
        self.working.entities.insert(entity.id, entity.clone());
        self.deleted_entities.remove(&entity.id);
        self.dirty_entities.insert(entity.id);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let this = *self;
        let mut shared = this.shared.write().await;
        if let Err(e) = this.check_against(&shared) {
            this.counters.rolled_back.fetch_add(1, Ordering::SeqCst);
            return Err(e);
        }
        for id in &this.deleted_entities {
            shared.entities.remove(id);
        }
        for id in &this.deleted_scopes {
            shared.scopes.remove(id);
        }
        for id in &this.dirty_scopes {
            if let Some(scope) = this.working.scopes.get(id) {
                shared.scopes.insert(*id, scope.clone());
            }
        }
        for id in &this.dirty_entities {
            if let Some(entity) = this.working.entities.get(id) {
                shared.entities.insert(*id, entity.clone());
            }
        }
        this.counters.committed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.counters.rolled_back.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
