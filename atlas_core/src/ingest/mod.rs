pub mod bulk;
pub mod models;
pub mod pipeline;
pub mod source;

pub use bulk::{BulkWriteSummary, BulkWriter, EntityPayload};
pub use models::{
    CategoryPolicy, FieldMapping, IngestSummary, LoadDescriptor, LoadOutcome, RawRecord,
};
pub use pipeline::IngestPipeline;
pub use source::{CsvRecordSource, Fixture};
