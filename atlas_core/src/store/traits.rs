use crate::Result;
use crate::models::{Entity, EntityId, Scope, ScopeId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListQuery {
    pub limit: usize,
    pub offset: usize,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            limit: 100,
            offset: 0,
        }
    }
}

/// Entry point to a transactional entity store.
///
/// All reads and writes go through a `StoreTx`; nothing is visible to other
/// transactions until `StoreTx::commit` succeeds. Dropping a transaction
/// without committing discards its writes.
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StoreTx>>;
}

/// One read-write unit of work. Reads observe writes staged earlier in the
/// same transaction.
#[async_trait]
pub trait StoreTx: Send {
    async fn get_scope(&mut self, id: ScopeId) -> Result<Option<Scope>>;

    /// Lookup by normalized label.
    async fn find_scope_by_label(&mut self, label: &str) -> Result<Option<Scope>>;

    async fn find_scope_by_foreign_id(&mut self, foreign_id: &str) -> Result<Option<Scope>>;

    async fn list_scopes(&mut self, query: ListQuery) -> Result<Vec<Scope>>;

    /// Insert or update a scope by id. Fails with `Conflict` when another
    /// scope already holds the same normalized label or foreign id.
    async fn put_scope(&mut self, scope: &Scope) -> Result<()>;

    /// Delete a scope with all of its entities and selectors. Returns the
    /// number of entities removed.
    async fn delete_scope(&mut self, id: ScopeId) -> Result<u64>;

    async fn get_entity(&mut self, id: EntityId) -> Result<Option<Entity>>;

    /// Exact match on the normalized label within one scope. When duplicates
    /// exist, the oldest entity wins.
    async fn find_entity_by_normalized_label(
        &mut self,
        scope_id: ScopeId,
        normalized: &str,
    ) -> Result<Option<Entity>>;

    async fn list_entities(&mut self, scope_id: ScopeId, query: ListQuery) -> Result<Vec<Entity>>;

    /// Insert or update an entity by id; its selector set replaces the
    /// stored one.
    async fn put_entity(&mut self, entity: &Entity) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}
