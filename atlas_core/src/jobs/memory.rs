use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::jobs::models::{JobHandle, JobRequest};
use crate::jobs::traits::JobQueue;
use crate::{Error, Result};

#[derive(Debug, Clone)]
struct QueuedJob {
    seq: u64,
    handle: JobHandle,
    request: JobRequest,
}

impl QueuedJob {
    fn rank(&self) -> (crate::jobs::models::Priority, Reverse<u64>) {
        (self.handle.priority, Reverse(self.seq))
    }
}

impl PartialEq for QueuedJob {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for QueuedJob {}

impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedJob {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

#[derive(Default)]
struct QueueState {
    heap: BinaryHeap<QueuedJob>,
    pending: HashMap<String, JobHandle>,
    next_seq: u64,
}

/// In-process priority queue for the CLI and tests.
///
/// Semantics:
/// - higher priority pops first, FIFO within a priority
/// - a request whose dedupe key is still pending is coalesced into the
///   pending job and its handle returned
/// - an optional capacity bound rejects new (non-coalesced) requests
#[derive(Clone, Default)]
pub struct MemoryJobQueue {
    state: Arc<Mutex<QueueState>>,
    capacity: Option<usize>,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Arc::default(),
            capacity: Some(capacity),
        }
    }

    /// Take the next job to run.
    pub async fn pop(&self) -> Option<(JobHandle, JobRequest)> {
        let mut state = self.state.lock().await;
        let job = state.heap.pop()?;
        state.pending.remove(&job.handle.dedupe_key);
        Some((job.handle, job.request))
    }

    /// Snapshot of pending handles in pop order (primarily for tests).
    pub async fn pending(&self) -> Vec<JobHandle> {
        let state = self.state.lock().await;
        let mut jobs: Vec<&QueuedJob> = state.heap.iter().collect();
        jobs.sort_by(|a, b| b.cmp(a));
        jobs.into_iter().map(|j| j.handle.clone()).collect()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.heap.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    #[tracing::instrument(level = "debug", skip(self, request), fields(kind = %request.kind, collection_id = %request.collection_id))]
    async fn enqueue(&self, request: JobRequest) -> Result<JobHandle> {
        let dedupe_key = request.dedupe_key();
        let mut state = self.state.lock().await;

        if let Some(existing) = state.pending.get(&dedupe_key) {
            tracing::debug!(job_id = %existing.job_id, %dedupe_key, "coalesced into pending job");
            return Ok(existing.clone());
        }
        if let Some(cap) = self.capacity {
            if state.heap.len() >= cap {
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
        let seq = state.next_seq;
        state.next_seq += 1;
        state.pending.insert(dedupe_key, handle.clone());
        state.heap.push(QueuedJob {
            seq,
            handle: handle.clone(),
            request,
        });
        Ok(handle)
    }

    async fn take_next(&self) -> Result<Option<(JobHandle, JobRequest)>> {
        Ok(self.pop().await)
    }

    async fn list_pending(&self) -> Result<Vec<JobHandle>> {
        Ok(self.pending().await)
    }
}
