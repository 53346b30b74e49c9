use crate::models::ScopeId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Queue priority; higher runs sooner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(pub u8);

impl Priority {
    pub const DEFAULT: Priority = Priority(3);
    pub const MAPPING: Priority = Priority(6);
    pub const MAX: Priority = Priority(9);

    /// Clamp to `MAX`.
    pub fn clamped(self) -> Self {
        self.min(Self::MAX)
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Full reprocessing of a collection.
    Reprocess,
    /// Execute a single mapping query against a collection.
    MappingQuery,
    /// Refresh the search index after a direct bulk write.
    Reindex,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reprocess => "reprocess",
            Self::MappingQuery => "mapping",
            Self::Reindex => "reindex",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        [Self::Reprocess, Self::MappingQuery, Self::Reindex]
            .into_iter()
            .find(|k| k.as_str() == text)
    }

    pub fn default_priority(&self) -> Priority {
        match self {
            Self::MappingQuery => Priority::MAPPING,
            Self::Reprocess | Self::Reindex => Priority::DEFAULT,
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of follow-up work. Carries identifiers and the mapping query,
/// never entity payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    pub kind: JobKind,
    pub collection_id: ScopeId,
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<serde_json::Value>,
}

impl JobRequest {
    pub fn reprocess(collection_id: ScopeId) -> Self {
        Self {
            kind: JobKind::Reprocess,
            collection_id,
            priority: JobKind::Reprocess.default_priority(),
            query: None,
        }
    }

    pub fn reindex(collection_id: ScopeId) -> Self {
        Self {
            kind: JobKind::Reindex,
            collection_id,
            priority: JobKind::Reindex.default_priority(),
            query: None,
        }
    }

    pub fn mapping(collection_id: ScopeId, query: serde_json::Value, priority: Priority) -> Self {
        Self {
            kind: JobKind::MappingQuery,
            collection_id,
            priority,
            query: Some(query),
        }
    }

    /// Identifies requests that would do the same work.
    ///
    /// Mapping queries are keyed by a SHA-256 of their canonical JSON text
    /// (`serde_json` map keys serialize in sorted order).
    pub fn dedupe_key(&self) -> String {
        match (&self.kind, &self.query) {
            (JobKind::MappingQuery, Some(query)) => {
                let digest = Sha256::digest(query.to_string().as_bytes());
                format!(
                    "{}:{}:{}",
                    self.kind,
                    self.collection_id,
                    hex_lower(digest.as_slice())
                )
            }
            _ => format!("{}:{}", self.kind, self.collection_id),
        }
    }
}

/// Returned by `JobQueue::enqueue`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    pub job_id: ulid::Ulid,
    pub kind: JobKind,
    pub collection_id: ScopeId,
    pub priority: Priority,
    pub dedupe_key: String,
    pub enqueued_at: DateTime<Utc>,
}

fn hex_lower(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn mapping_key_depends_on_query_not_key_order() {
        let id = ScopeId::new();
        let a = JobRequest::mapping(id, json!({"a": 1, "b": 2}), Priority::MAPPING);
        let b = JobRequest::mapping(id, json!({"b": 2, "a": 1}), Priority::MAPPING);
        let c = JobRequest::mapping(id, json!({"a": 2}), Priority::MAPPING);

        assert_eq!(a.dedupe_key(), b.dedupe_key());
        assert_ne!(a.dedupe_key(), c.dedupe_key());
        assert!(a.dedupe_key().starts_with(&format!("mapping:{id}:")));
    }

    #[test]
    fn reprocess_and_reindex_keys_are_per_collection() {
        let id = ScopeId::new();
        assert_eq!(JobRequest::reprocess(id).dedupe_key(), format!("reprocess:{id}"));
        assert_eq!(JobRequest::reindex(id).dedupe_key(), format!("reindex:{id}"));
    }

    #[test]
    fn mapping_outranks_default() {
        assert!(JobKind::MappingQuery.default_priority() > JobKind::Reprocess.default_priority());
        assert_eq!(Priority(42).clamped(), Priority::MAX);
    }

    #[test]
    fn kind_parses_its_own_names_only() {
        for kind in [JobKind::Reprocess, JobKind::MappingQuery, JobKind::Reindex] {
            assert_eq!(JobKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(JobKind::parse("mapping_query"), None);
    }
}
