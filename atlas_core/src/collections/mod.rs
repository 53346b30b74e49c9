//! Collection lifecycle and the follow-up entry points (`process`,
//! `mapping`, bulk write) that sit on top of ingestion and the dispatcher.

pub mod models;
pub mod service;

pub use models::{BulkOutcome, CollectionCreate, CollectionUpdate};
pub use service::CollectionService;
