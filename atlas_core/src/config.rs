use crate::ingest::models::CategoryPolicy;
use crate::jobs::memory::MemoryJobQueue;
use crate::jobs::sqlite::SqliteJobQueue;
use crate::jobs::traits::JobQueue;
use crate::store::memory::MemoryEntityStore;
use crate::store::sqlite::SqliteEntityStore;
use crate::store::traits::EntityStore;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    Memory,
    #[default]
    Sqlite,
}

impl std::str::FromStr for StorageBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(Error::Validation(format!(
                "unknown storage backend '{other}' (expected memory or sqlite)"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtlasConfig {
    pub storage: StorageBackend,
    pub sqlite_path: PathBuf,
    pub category_policy: CategoryPolicy,
    /// Bound on pending jobs. `None` is unbounded.
    pub queue_capacity: Option<usize>,
}

impl Default for AtlasConfig {
    fn default() -> Self {
        Self {
            storage: StorageBackend::Sqlite,
            sqlite_path: PathBuf::from("data/atlas.db"),
            category_policy: CategoryPolicy::LastWriteWins,
            queue_capacity: None,
        }
    }
}

impl AtlasConfig {
    /// Read `ATLAS_STORAGE`, `ATLAS_SQLITE_PATH`, `ATLAS_CATEGORY_POLICY` and
    /// `ATLAS_QUEUE_CAPACITY`, falling back to defaults for unset or blank
    /// variables.
    #[tracing::instrument(level = "debug")]
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut cfg = Self::default();

        if let Some(v) = get("ATLAS_STORAGE") {
            cfg.storage = v.parse()?;
        }
        if let Some(v) = get("ATLAS_SQLITE_PATH") {
            cfg.sqlite_path = PathBuf::from(v.trim());
        }
        if let Some(v) = get("ATLAS_CATEGORY_POLICY") {
            cfg.category_policy = v.parse()?;
        }
        if let Some(v) = get("ATLAS_QUEUE_CAPACITY") {
            let n = v.trim().parse::<usize>().map_err(|_| {
                Error::Validation(format!("invalid ATLAS_QUEUE_CAPACITY: {v}"))
            })?;
            cfg.queue_capacity = Some(n);
        }

        cfg.validate()?;
        Ok(cfg)
    }

    #[tracing::instrument(level = "debug")]
    pub fn validate(&self) -> Result<()> {
        if self.storage == StorageBackend::Sqlite && self.sqlite_path.as_os_str().is_empty() {
            return Err(Error::Validation("sqlite_path is empty".to_string()));
        }
        if self.queue_capacity == Some(0) {
            return Err(Error::Validation("queue_capacity must be > 0".to_string()));
        }
        Ok(())
    }

    /// Open the configured entity store.
    #[tracing::instrument(level = "info", skip(self), fields(storage = ?self.storage))]
    pub async fn open_store(&self) -> Result<Arc<dyn EntityStore>> {
        self.validate()?;
        Ok(match self.storage {
            StorageBackend::Memory => Arc::new(MemoryEntityStore::new()),
            StorageBackend::Sqlite => Arc::new(SqliteEntityStore::new(&self.sqlite_path).await?),
        })
    }

    /// Open the job queue that matches the storage backend.
    ///
    /// SQLite storage keeps its jobs in the same file, so work queued by
    /// one process can be claimed by another. The memory queue lives only
    /// as long as the process.
    #[tracing::instrument(level = "info", skip(self), fields(storage = ?self.storage))]
    pub async fn open_queue(&self) -> Result<Arc<dyn JobQueue>> {
        self.validate()?;
        Ok(match (self.storage, self.queue_capacity) {
            (StorageBackend::Memory, Some(cap)) => Arc::new(MemoryJobQueue::with_capacity(cap)),
            (StorageBackend::Memory, None) => Arc::new(MemoryJobQueue::new()),
            (StorageBackend::Sqlite, cap) => {
                let queue = SqliteJobQueue::new(&self.sqlite_path).await?;
                Arc::new(match cap {
                    Some(cap) => queue.with_capacity(cap),
                    None => queue,
                })
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn unset_variables_keep_defaults() {
        let cfg = AtlasConfig::from_lookup(lookup(&[("ATLAS_STORAGE", "  ")])).unwrap();
        assert_eq!(cfg, AtlasConfig::default());
    }

    #[test]
    fn reads_every_variable() {
        let cfg = AtlasConfig::from_lookup(lookup(&[
            ("ATLAS_STORAGE", "Memory"),
            ("ATLAS_SQLITE_PATH", "/tmp/a.db"),
            ("ATLAS_CATEGORY_POLICY", "keep_existing"),
            ("ATLAS_QUEUE_CAPACITY", "50"),
        ]))
        .unwrap();
        assert_eq!(cfg.storage, StorageBackend::Memory);
        assert_eq!(cfg.sqlite_path, PathBuf::from("/tmp/a.db"));
        assert_eq!(cfg.category_policy, CategoryPolicy::KeepExisting);
        assert_eq!(cfg.queue_capacity, Some(50));
    }

    #[tokio::test]
    async fn sqlite_queue_is_shared_across_opens() {
        use crate::jobs::models::{JobKind, JobRequest};
        use crate::models::ScopeId;

        let dir = tempfile::TempDir::new().unwrap();
        let cfg = AtlasConfig {
            sqlite_path: dir.path().join("atlas.db"),
            ..AtlasConfig::default()
        };
        let _store = cfg.open_store().await.unwrap();

        let id = ScopeId::new();
        cfg.open_queue()
            .await
            .unwrap()
            .enqueue(JobRequest::reprocess(id))
            .await
            .unwrap();

        let later = cfg.open_queue().await.unwrap();
        let pending = later.list_pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].kind, JobKind::Reprocess);
        assert_eq!(pending[0].collection_id, id);
    }

    #[test]
    fn rejects_bad_values() {
        for pairs in [
            [("ATLAS_STORAGE", "postgres")],
            [("ATLAS_CATEGORY_POLICY", "first_wins")],
            [("ATLAS_QUEUE_CAPACITY", "lots")],
            [("ATLAS_QUEUE_CAPACITY", "0")],
        ] {
            let err = AtlasConfig::from_lookup(lookup(&pairs)).unwrap_err();
            assert!(err.is_validation(), "{pairs:?}");
        }
    }
}
