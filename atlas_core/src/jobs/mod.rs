pub mod dispatcher;
pub mod mapping;
pub mod memory;
pub mod models;
pub mod sqlite;
pub mod traits;

pub use dispatcher::BulkJobDispatcher;
pub use mapping::{MappingSchemaValidator, extract_mapping_queries};
pub use memory::MemoryJobQueue;
pub use models::{JobHandle, JobKind, JobRequest, Priority};
pub use sqlite::SqliteJobQueue;
pub use traits::{JobQueue, MappingValidator};
