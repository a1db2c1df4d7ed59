//! Listing Migration Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Resumable bulk migration of property listings from a legacy CSV export
//! into a relational store, with images re-hosted on object storage.
//!
//! # Overview
//!
//! - **Parsing**: [`parser::RecordParser`] streams rows of the export
//! - **Transformation**: [`transform`] decodes, normalizes and validates rows
//! - **Writing**: [`writer::BatchWriter`] deduplicates and batch-inserts
//! - **Images**: [`assets::AssetTransferEngine`] downloads and re-uploads media
//! - **Resumability**: [`checkpoint::CheckpointStore`] persists run state
//! - **Control flow**: [`orchestrator::Orchestrator`] runs one [`Mode`]
//!
//! # Example
//!
//! ```no_run
//! use listing_migrate::{CheckpointStore, FileBackend, MigrationConfig, Mode, Orchestrator};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = MigrationConfig::from_env()?;
//!     let mut checkpoint = CheckpointStore::open(FileBackend::new(&config.checkpoint_path))?;
//!
//!     let summary = Orchestrator::new(config, "./listings.csv")
//!         .run(Mode::Validate, &mut checkpoint)
//!         .await?;
//!     summary.print();
//!     Ok(())
//! }
//! ```

pub mod assets;
pub mod checkpoint;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod parser;
pub mod progress;
pub mod report;
pub mod storage;
pub mod transform;
pub mod writer;

// Re-export commonly used types
pub use checkpoint::{CheckpointStore, FileBackend, MemoryBackend, Phase};
pub use config::MigrationConfig;
pub use error::{MigrateError, Result};
pub use orchestrator::{Mode, Orchestrator};
pub use report::RunSummary;

use clap::Parser;
use listing_common::logging::LogConfig;
use std::path::PathBuf;
use tracing::Level;

/// Migrate legacy property listings into the property store
#[derive(Parser, Debug)]
#[command(name = "listing-migrate")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Operating mode
    #[arg(value_enum)]
    pub mode: Mode,

    /// Path of the CSV export
    #[arg(short, long, env = "MIGRATION_INPUT", default_value = "./listings.csv")]
    pub input: PathBuf,

    /// Only process the first N rows
    #[arg(short, long)]
    pub limit: Option<usize>,

    /// Checkpoint file (overrides MIGRATION_CHECKPOINT_PATH)
    #[arg(long)]
    pub checkpoint: Option<PathBuf>,

    /// Hide progress bars
    #[arg(long)]
    pub no_progress: bool,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Logging settings for this run; `LOG_*` variables override the flags
    /// and a malformed one is an error
    pub fn log_config(&self) -> anyhow::Result<LogConfig> {
        let level = if self.verbose { Level::DEBUG } else { Level::INFO };
        LogConfig::builder()
            .level(level)
            .run_name("migration")
            .filter_directives("sqlx=warn,aws_config=warn,aws_smithy_runtime=warn,hyper=warn")
            .build()
            .merge_env()
    }
}
