use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "atlas", version, about = "Collection entity ingestion")]
pub struct Cli {
    /// SQLite database path (overrides ATLAS_SQLITE_PATH).
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    #[arg(long, global = true, value_enum, default_value_t = LogFormatArg::Json)]
    pub log_format: LogFormatArg,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormatArg {
    Json,
    Pretty,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Load a fixture directory holding `mapping.yaml` and `data.csv`.
    Load {
        dir: PathBuf,
    },

    /// Create a collection.
    Create {
        label: String,
        /// Stable external key (a UUID is generated when omitted).
        #[arg(long)]
        foreign_id: Option<String>,
        #[arg(long)]
        public: bool,
        #[arg(long)]
        summary: Option<String>,
    },

    /// List collections.
    List {
        #[arg(long, default_value = "100")]
        limit: usize,
        #[arg(long, default_value = "0")]
        offset: usize,
    },

    /// List a collection's entities with their selectors.
    Entities {
        collection: Uuid,
        #[arg(long, default_value = "100")]
        limit: usize,
        #[arg(long, default_value = "0")]
        offset: usize,
    },

    /// Delete a collection and all of its entities.
    Delete {
        collection: Uuid,
    },

    /// Bulk-write entities from a JSON file (an object or a list of objects).
    Bulk {
        collection: Uuid,
        file: PathBuf,
        /// Update matching entities in place instead of replacing them.
        #[arg(long)]
        merge: bool,
    },

    /// Queue a full reprocess of a collection.
    Process {
        collection: Uuid,
    },

    /// Queue the mapping queries in a JSON/YAML request body.
    Mapping {
        collection: Uuid,
        file: PathBuf,
    },

    /// List pending jobs in claim order.
    Jobs,

    /// Claim the next pending job and print it (`null` when none is pending).
    Take,

    /// Print the effective configuration.
    Config,
}
