use crate::collections::models::{BulkOutcome, CollectionCreate, CollectionUpdate};
use crate::ingest::bulk::BulkWriter;
use crate::ingest::models::{CategoryPolicy, LoadOutcome};
use crate::ingest::pipeline::IngestPipeline;
use crate::ingest::source::Fixture;
use crate::jobs::dispatcher::BulkJobDispatcher;
use crate::jobs::mapping::extract_mapping_queries;
use crate::jobs::models::JobHandle;
use crate::models::{Entity, Scope, ScopeId};
use crate::store::finish;
use crate::store::traits::{EntityStore, ListQuery, StoreTx};
use crate::{Error, Result};
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;

/// Library-level collections API.
#[derive(Clone)]
pub struct CollectionService {
    store: Arc<dyn EntityStore>,
    pipeline: IngestPipeline,
    writer: BulkWriter,
    dispatcher: BulkJobDispatcher,
}

async fn require_scope(tx: &mut dyn StoreTx, id: ScopeId) -> Result<Scope> {
    tx.get_scope(id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("collection '{id}' not found")))
}

impl CollectionService {
    pub fn new(store: Arc<dyn EntityStore>, dispatcher: BulkJobDispatcher) -> Self {
        Self {
            pipeline: IngestPipeline::new(store.clone()),
            writer: BulkWriter::new(store.clone()),
            store,
            dispatcher,
        }
    }

    pub fn with_category_policy(mut self, policy: CategoryPolicy) -> Self {
        self.pipeline = self.pipeline.with_category_policy(policy);
        self
    }

    pub fn pipeline(&self) -> &IngestPipeline {
        &self.pipeline
    }

    pub fn dispatcher(&self) -> &BulkJobDispatcher {
        &self.dispatcher
    }

    #[tracing::instrument(level = "info", skip(self))]
    pub async fn create_collection(&self, input: CollectionCreate) -> Result<Scope> {
        input.validate()?;

        let mut scope = Scope::new(
            input.label.as_str(),
            input
                .foreign_id
                .clone()
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            input.public,
            None,
        )?;
        scope.summary = input.summary.filter(|s| !s.trim().is_empty());

        let mut tx = self.store.begin().await?;
        let result = tx.put_scope(&scope).await;
        finish(tx, result).await?;

        tracing::info!(collection_id = %scope.id, foreign_id = %scope.foreign_id, "collection created");
        Ok(scope)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn get_collection(&self, id: ScopeId) -> Result<Scope> {
        let mut tx = self.store.begin().await?;
        let result = require_scope(tx.as_mut(), id).await;
        finish(tx, result).await
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn find_collection(&self, label: &str) -> Result<Option<Scope>> {
        let mut tx = self.store.begin().await?;
        let result = tx.find_scope_by_label(label).await;
        finish(tx, result).await
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn list_collections(&self, query: ListQuery) -> Result<Vec<Scope>> {
        let mut tx = self.store.begin().await?;
        let result = tx.list_scopes(query).await;
        finish(tx, result).await
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn list_entities(&self, id: ScopeId, query: ListQuery) -> Result<Vec<Entity>> {
        let mut tx = self.store.begin().await?;
        let result: Result<Vec<Entity>> = async {
            require_scope(tx.as_mut(), id).await?;
            tx.list_entities(id, query).await
        }
        .await;
        finish(tx, result).await
    }

    /// Apply `update`, then queue a reindex of the collection.
    ///
    /// As with `bulk`, a scheduling failure is reported after the update has
    /// committed.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn update_collection(&self, id: ScopeId, update: CollectionUpdate) -> Result<Scope> {
        if update.label.as_deref().is_some_and(|l| l.trim().is_empty()) {
            return Err(Error::Validation("collection label is required".to_string()));
        }

        let mut tx = self.store.begin().await?;
        let result: Result<Scope> = async {
            let mut scope = require_scope(tx.as_mut(), id).await?;
            if let Some(label) = update.label {
                scope.label = label.trim().to_string();
            }
            if let Some(public) = update.public {
                scope.public = public;
            }
            if let Some(summary) = update.summary {
                scope.summary = (!summary.trim().is_empty()).then_some(summary);
            }
            scope.touch(Utc::now());
            tx.put_scope(&scope).await?;
            Ok(scope)
        }
        .await;
        let scope = finish(tx, result).await?;
        self.dispatcher.schedule_reindex(scope.id).await?;
        Ok(scope)
    }

    /// Delete a collection and everything in it. Returns the number of
    /// entities removed.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn delete_collection(&self, id: ScopeId) -> Result<u64> {
        let mut tx = self.store.begin().await?;
        let result = tx.delete_scope(id).await;
        let removed = finish(tx, result).await?;
        tracing::info!(collection_id = %id, entities_removed = removed, "collection deleted");
        Ok(removed)
    }

    /// Load a fixture directory (`mapping.yaml` + `data.csv`).
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn load_fixture(&self, dir: &Path) -> Result<LoadOutcome> {
        let fixture = Fixture::open(dir).await?;
        fixture.descriptor.validate()?;
        let records = fixture.records()?;
        self.pipeline.load(&fixture.descriptor, records).await
    }

    /// Queue a full reprocess of the collection.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn process(&self, id: ScopeId) -> Result<JobHandle> {
        let scope = self.get_collection(id).await?;
        self.dispatcher.schedule_reprocess(scope.id).await
    }

    /// Queue every mapping query addressed to this collection's foreign id.
    ///
    /// All queries are validated before any is queued.
    #[tracing::instrument(level = "info", skip(self, body))]
    pub async fn mapping(&self, id: ScopeId, body: &serde_json::Value) -> Result<Vec<JobHandle>> {
        let scope = self.get_collection(id).await?;
        let queries = extract_mapping_queries(body, &scope.foreign_id)?;
        for query in &queries {
            self.dispatcher.validate_mapping(query)?;
        }

        let mut handles = Vec::with_capacity(queries.len());
        for query in queries {
            handles.push(
                self.dispatcher
                    .schedule_mapping_query(scope.id, query, None)
                    .await?,
            );
        }
        Ok(handles)
    }

    /// Direct bulk write, then a reindex of the collection.
    ///
    /// A scheduling failure is reported after the write has committed.
    #[tracing::instrument(level = "info", skip(self, payloads), fields(count = payloads.len()))]
    pub async fn bulk(
        &self,
        id: ScopeId,
        payloads: &[serde_json::Value],
        merge: bool,
    ) -> Result<BulkOutcome> {
        let summary = self.writer.write(id, payloads, merge).await?;
        let reindex = self.dispatcher.schedule_reindex(id).await?;
        Ok(BulkOutcome { summary, reindex })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::mapping::MappingSchemaValidator;
    use crate::jobs::memory::MemoryJobQueue;
    use crate::jobs::models::{JobKind, Priority};
    use crate::store::memory::MemoryEntityStore;
    use serde_json::json;

    fn service() -> (MemoryEntityStore, MemoryJobQueue, CollectionService) {
        service_with_queue(MemoryJobQueue::new())
    }

    fn service_with_queue(
        queue: MemoryJobQueue,
    ) -> (MemoryEntityStore, MemoryJobQueue, CollectionService) {
        let store = MemoryEntityStore::new();
        let dispatcher =
            BulkJobDispatcher::new(Arc::new(queue.clone()), Arc::new(MappingSchemaValidator));
        let svc = CollectionService::new(Arc::new(store.clone()), dispatcher);
        (store, queue, svc)
    }

    #[tokio::test]
    async fn create_generates_foreign_id_and_rejects_duplicate_labels() {
        let (_store, _queue, svc) = service();

        let scope = svc
            .create_collection(CollectionCreate::new("Leaks"))
            .await
            .unwrap();
        assert!(uuid::Uuid::parse_str(&scope.foreign_id).is_ok());

        let err = svc
            .create_collection(CollectionCreate::new("  LEAKS "))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn update_and_delete_round_trip() {
        let (_store, queue, svc) = service();
        let scope = svc
            .create_collection(CollectionCreate::new("Leaks"))
            .await
            .unwrap();

        let updated = svc
            .update_collection(
                scope.id,
                CollectionUpdate {
                    public: Some(true),
                    summary: Some("offshore records".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(updated.public);
        assert_eq!(updated.label, "Leaks");
        assert_eq!(updated.summary.as_deref(), Some("offshore records"));

        let pending = queue.pending().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].kind, JobKind::Reindex);
        assert_eq!(pending[0].collection_id, scope.id);

        assert_eq!(svc.delete_collection(scope.id).await.unwrap(), 0);
        let err = svc.get_collection(scope.id).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn mapping_validates_all_queries_before_queueing_any() {
        let (_store, queue, svc) = service();
        let mut input = CollectionCreate::new("Leaks");
        input.foreign_id = Some("leaks".to_string());
        let scope = svc.create_collection(input).await.unwrap();

        let good = json!({"csv_url": "file:///x.csv", "entities": {"p": {"schema": "Person"}}});
        let body = json!({"leaks": {"queries": [good.clone(), {"entities": {}}]}});
        let err = svc.mapping(scope.id, &body).await.unwrap_err();
        assert!(matches!(err, Error::InvalidMapping(_)));
        assert!(queue.is_empty().await);

        let body = json!({"leaks": {"query": good}});
        let handles = svc.mapping(scope.id, &body).await.unwrap();
        assert_eq!(handles.len(), 1);
        assert_eq!(handles[0].priority, Priority::MAPPING);
    }

    #[tokio::test]
    async fn bulk_write_commits_then_queues_reindex() {
        let (store, queue, svc) = service();
        let scope = svc
            .create_collection(CollectionCreate::new("Leaks"))
            .await
            .unwrap();

        let outcome = svc
            .bulk(
                scope.id,
                &[json!({"name": "Acme Corp", "schema": "company"})],
                false,
            )
            .await
            .unwrap();

        assert_eq!(outcome.summary.entities_created, 1);
        assert_eq!(outcome.reindex.kind, JobKind::Reindex);
        assert_eq!(store.all_entities().await.len(), 1);
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn failed_update_queues_no_reindex() {
        let (_store, queue, svc) = service();
        let err = svc
            .update_collection(ScopeId::new(), CollectionUpdate::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn bulk_keeps_committed_write_when_reindex_cannot_be_queued() {
        let (store, queue, svc) = service_with_queue(MemoryJobQueue::with_capacity(1));
        let scope = svc
            .create_collection(CollectionCreate::new("Leaks"))
            .await
            .unwrap();
        svc.dispatcher()
            .schedule_reprocess(ScopeId::new())
            .await
            .unwrap();

        let err = svc
            .bulk(
                scope.id,
                &[
                    json!({"label": "Acme Corp", "category": "company"}),
                    json!({"label": "Jane Doe", "selectors": ["J. Doe"]}),
                ],
                true,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Scheduling { .. }));

        let entities = svc
            .list_entities(scope.id, ListQuery::default())
            .await
            .unwrap();
        assert_eq!(entities.len(), 2);
        assert_eq!(store.all_entities().await.len(), 2);
        assert_eq!(store.stats().rollbacks, 0);
        assert_eq!(queue.len().await, 1);
        assert_eq!(queue.pending().await[0].kind, JobKind::Reprocess);
    }

    #[tokio::test]
    async fn process_on_missing_collection_queues_nothing() {
        let (_store, queue, svc) = service();
        let err = svc.process(ScopeId::new()).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert!(queue.is_empty().await);
    }
}
