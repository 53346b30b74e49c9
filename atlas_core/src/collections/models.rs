use crate::ingest::bulk::BulkWriteSummary;
use crate::jobs::models::JobHandle;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CollectionCreate {
    pub label: String,
    /// Generated (UUID) when absent.
    #[serde(default)]
    pub foreign_id: Option<String>,
    #[serde(default)]
    pub public: bool,
    #[serde(default)]
    pub summary: Option<String>,
}

impl CollectionCreate {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            foreign_id: None,
            public: false,
            summary: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.label.trim().is_empty() {
            return Err(Error::Validation("collection label is required".to_string()));
        }
        if self.foreign_id.as_deref().is_some_and(|f| f.trim().is_empty()) {
            return Err(Error::Validation(
                "collection foreign_id must not be blank".to_string(),
            ));
        }
        Ok(())
    }
}

/// Partial update; absent fields are left unchanged. An empty `summary`
/// clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CollectionUpdate {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub public: Option<bool>,
    #[serde(default)]
    pub summary: Option<String>,
}

/// Outcome of a direct bulk write: the committed counts and the reindex job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkOutcome {
    pub summary: BulkWriteSummary,
    pub reindex: JobHandle,
}
