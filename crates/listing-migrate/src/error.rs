//! Run-level error types
//!
//! Row-level problems (validation, duplicates, per-image failures) never
//! surface here; they are recorded in the checkpoint and the reports. A
//! [`MigrateError`] aborts the current mode.

use thiserror::Error;

use crate::checkpoint::CheckpointError;
use crate::db::StoreError;

/// Result type alias for migration operations
pub type Result<T> = std::result::Result<T, MigrateError>;

/// Fatal errors for a migration run
#[derive(Error, Debug)]
pub enum MigrateError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse input file: {0}")]
    Parse(#[from] csv::Error),

    #[error("Property store error: {0}")]
    Store(#[from] StoreError),

    #[error("Object storage error: {0}")]
    Storage(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Failed to write report: {0}")]
    Report(#[from] serde_json::Error),

    #[error(transparent)]
    Common(#[from] listing_common::CommonError),
}

impl MigrateError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an object storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }
}
