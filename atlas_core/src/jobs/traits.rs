use crate::Result;
use crate::jobs::models::{JobHandle, JobRequest};
use async_trait::async_trait;

/// The external work queue. Atlas only submits; a separate runtime claims
/// jobs with `take_next` and runs them.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Submit a request; returns once the queue has accepted it.
    async fn enqueue(&self, request: JobRequest) -> Result<JobHandle>;

    /// Claim the highest-priority pending job (oldest first within a
    /// priority). A claimed job is no longer pending, so an identical
    /// request queues again.
    async fn take_next(&self) -> Result<Option<(JobHandle, JobRequest)>>;

    /// Pending jobs in claim order.
    async fn list_pending(&self) -> Result<Vec<JobHandle>>;
}

/// Validates a mapping query before it is queued.
pub trait MappingValidator: Send + Sync {
    /// `Err(Error::InvalidMapping)` with a human-readable reason on failure.
    fn validate(&self, query: &serde_json::Value) -> Result<()>;
}
