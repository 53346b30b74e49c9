use crate::jobs::models::{JobHandle, JobRequest, Priority};
use crate::jobs::traits::{JobQueue, MappingValidator};
use crate::models::ScopeId;
use crate::{Error, Result};
use std::sync::Arc;

/// Schedules follow-up work for a collection on the external queue.
///
/// Nothing here is transactional with ingestion: a failed enqueue surfaces
/// as `Error::Scheduling` and leaves committed data alone.
#[derive(Clone)]
pub struct BulkJobDispatcher {
    queue: Arc<dyn JobQueue>,
    validator: Arc<dyn MappingValidator>,
}

impl BulkJobDispatcher {
    pub fn new(queue: Arc<dyn JobQueue>, validator: Arc<dyn MappingValidator>) -> Self {
        Self { queue, validator }
    }

    #[tracing::instrument(level = "info", skip(self))]
    pub async fn schedule_reprocess(&self, collection_id: ScopeId) -> Result<JobHandle> {
        self.submit(JobRequest::reprocess(collection_id)).await
    }

    /// Validate and queue one mapping query at no less than `Priority::MAPPING`.
    #[tracing::instrument(level = "info", skip(self, query))]
    pub async fn schedule_mapping_query(
        &self,
        collection_id: ScopeId,
        query: serde_json::Value,
        priority: Option<Priority>,
    ) -> Result<JobHandle> {
        self.validate_mapping(&query).inspect_err(|e| {
            tracing::warn!(%collection_id, error = %e, "mapping query rejected");
        })?;
        let priority = priority.unwrap_or(Priority::MAPPING).max(Priority::MAPPING);
        self.submit(JobRequest::mapping(collection_id, query, priority))
            .await
    }

    /// Check a mapping query without queueing it.
    pub fn validate_mapping(&self, query: &serde_json::Value) -> Result<()> {
        self.validator.validate(query)
    }

    #[tracing::instrument(level = "info", skip(self))]
    pub async fn schedule_reindex(&self, collection_id: ScopeId) -> Result<JobHandle> {
        self.submit(JobRequest::reindex(collection_id)).await
    }

    async fn submit(&self, request: JobRequest) -> Result<JobHandle> {
        let kind = request.kind;
        let collection_id = request.collection_id;
        let handle = self.queue.enqueue(request).await.map_err(|e| {
            Error::scheduling(format!("enqueue {kind} for collection {collection_id}"), e)
        })?;
        tracing::info!(
            job_id = %handle.job_id,
            kind = %handle.kind,
            collection_id = %handle.collection_id,
            priority = %handle.priority,
            "job scheduled"
        );
        Ok(handle)
    }
}
