//! Atlas core library: collection-scoped entity ingestion, identity
//! resolution and follow-up job scheduling.

pub mod catalog;
pub mod collections;
pub mod config;
pub mod error;
pub mod ingest;
pub mod jobs;
pub mod models;
pub mod o11y;
pub mod store;

pub use collections::{BulkOutcome, CollectionCreate, CollectionService, CollectionUpdate};
pub use config::{AtlasConfig, StorageBackend};
pub use error::{Error, Result};
pub use ingest::{
    BulkWriteSummary, BulkWriter, CategoryPolicy, CsvRecordSource, FieldMapping, Fixture,
    IngestPipeline, IngestSummary, LoadDescriptor, LoadOutcome, RawRecord,
};
pub use jobs::{
    BulkJobDispatcher, JobHandle, JobKind, JobQueue, JobRequest, MappingSchemaValidator,
    MappingValidator, MemoryJobQueue, Priority, SqliteJobQueue,
};
pub use models::{Category, Entity, EntityId, Scope, ScopeId, Selector};
pub use store::memory::MemoryEntityStore;
pub use store::sqlite::SqliteEntityStore;
pub use store::traits::{EntityStore, ListQuery, StoreTx};
