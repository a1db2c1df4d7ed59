//! Persisted, resumable run state
//!
//! [`CheckpointStore`] owns one [`RunCheckpoint`] and writes it through a
//! [`CheckpointBackend`] after every mutating call. The file backend writes a
//! temporary sibling and renames it over the checkpoint, so a kill mid-write
//! leaves the previous state intact.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

/// Errors from loading or persisting a checkpoint
#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt checkpoint: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Checkpoint backend unavailable: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Pipeline phase; also tags where a failure happened
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Parsing,
    Importing,
    Images,
    Complete,
}

impl Phase {
    pub fn as_str(&self) -> &str {
        match self {
            Phase::Parsing => "parsing",
            Phase::Importing => "importing",
            Phase::Images => "images",
            Phase::Complete => "complete",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row or image that did not make it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub external_id: String,
    pub row: usize,
    pub error: String,
    pub phase: Phase,
}

impl FailureRecord {
    pub fn new(external_id: impl Into<String>, row: usize, error: impl Into<String>, phase: Phase) -> Self {
        Self {
            external_id: external_id.into(),
            row,
            error: error.into(),
            phase,
        }
    }
}

/// Durable state of one migration run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunCheckpoint {
    pub phase: Phase,

    /// Highest 1-based row handled so far (0 = nothing yet)
    pub last_processed_row: usize,

    pub total_rows: usize,

    /// Store ids of records imported by this run
    #[serde(default)]
    pub imported_ids: Vec<Uuid>,

    #[serde(default)]
    pub failures: Vec<FailureRecord>,

    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RunCheckpoint {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            phase: Phase::Parsing,
            last_processed_row: 0,
            total_rows: 0,
            imported_ids: Vec::new(),
            failures: Vec::new(),
            started_at: now,
            updated_at: now,
        }
    }

    pub fn success_count(&self) -> usize {
        self.imported_ids.len()
    }

    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }

    /// Failures recorded in one phase
    pub fn failures_in(&self, phase: Phase) -> impl Iterator<Item = &FailureRecord> {
        self.failures.iter().filter(move |f| f.phase == phase)
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

impl Default for RunCheckpoint {
    fn default() -> Self {
        Self::new()
    }
}

/// Where a checkpoint lives
pub trait CheckpointBackend: Send + Sync {
    fn load(&self) -> Result<Option<RunCheckpoint>>;
    fn save(&self, checkpoint: &RunCheckpoint) -> Result<()>;
    fn delete(&self) -> Result<()>;
    fn exists(&self) -> bool;

    /// Human-readable location for logs
    fn describe(&self) -> String;
}

/// JSON file backend
#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "checkpoint.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl CheckpointBackend for FileBackend {
    fn load(&self) -> Result<Option<RunCheckpoint>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    fn save(&self, checkpoint: &RunCheckpoint) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(checkpoint)?;
        let tmp = self.temp_path();
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn delete(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }

    fn exists(&self) -> bool {
        self.path.exists()
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// In-process backend; clones share the same slot
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    slot: Arc<Mutex<Option<RunCheckpoint>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last persisted state
    pub fn snapshot(&self) -> Option<RunCheckpoint> {
        self.slot.lock().ok().and_then(|slot| slot.clone())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Option<RunCheckpoint>>> {
        self.slot
            .lock()
            .map_err(|e| CheckpointError::Backend(e.to_string()))
    }
}

impl CheckpointBackend for MemoryBackend {
    fn load(&self) -> Result<Option<RunCheckpoint>> {
        Ok(self.lock()?.clone())
    }

    fn save(&self, checkpoint: &RunCheckpoint) -> Result<()> {
        *self.lock()? = Some(checkpoint.clone());
        Ok(())
    }

    fn delete(&self) -> Result<()> {
        *self.lock()? = None;
        Ok(())
    }

    fn exists(&self) -> bool {
        self.lock().map(|slot| slot.is_some()).unwrap_or(false)
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

/// Run state plus the backend it is persisted to
pub struct CheckpointStore {
    backend: Box<dyn CheckpointBackend>,
    state: RunCheckpoint,
}

impl CheckpointStore {
    /// Load the persisted checkpoint, or start a fresh one
    pub fn open(backend: impl CheckpointBackend + 'static) -> Result<Self> {
        Self::open_boxed(Box::new(backend))
    }

    pub fn open_boxed(backend: Box<dyn CheckpointBackend>) -> Result<Self> {
        let state = match backend.load()? {
            Some(state) => {
                info!(
                    location = %backend.describe(),
                    phase = %state.phase,
                    last_row = state.last_processed_row,
                    "Loaded checkpoint"
                );
                state
            },
            None => RunCheckpoint::new(),
        };

        Ok(Self { backend, state })
    }

    pub fn state(&self) -> &RunCheckpoint {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    pub fn last_processed_row(&self) -> usize {
        self.state.last_processed_row
    }

    /// Whether a checkpoint has been persisted
    pub fn exists(&self) -> bool {
        self.backend.exists()
    }

    pub fn set_phase(&mut self, phase: Phase) -> Result<()> {
        debug!(from = %self.state.phase, to = %phase, "Phase transition");
        self.state.phase = phase;
        self.persist()
    }

    pub fn set_total_rows(&mut self, total: usize) -> Result<()> {
        self.state.total_rows = total;
        self.persist()
    }

    /// Move the row cursor forward; a lower row never moves it back
    pub fn advance_to(&mut self, row: usize) -> Result<()> {
        self.state.last_processed_row = self.state.last_processed_row.max(row);
        self.persist()
    }

    pub fn record_success(&mut self, id: Uuid) -> Result<()> {
        self.state.imported_ids.push(id);
        self.persist()
    }

    pub fn record_successes(&mut self, ids: impl IntoIterator<Item = Uuid>) -> Result<()> {
        self.state.imported_ids.extend(ids);
        self.persist()
    }

    pub fn record_failure(&mut self, failure: FailureRecord) -> Result<()> {
        self.state.failures.push(failure);
        self.persist()
    }

    pub fn record_failures(&mut self, failures: impl IntoIterator<Item = FailureRecord>) -> Result<()> {
        self.state.failures.extend(failures);
        self.persist()
    }

    /// Start over with a fresh state (persisted immediately)
    pub fn reset(&mut self) -> Result<()> {
        info!(location = %self.backend.describe(), "Resetting checkpoint");
        self.state = RunCheckpoint::new();
        self.persist()
    }

    /// Remove the persisted checkpoint; in-memory state is reset too
    pub fn delete(&mut self) -> Result<()> {
        self.backend.delete()?;
        self.state = RunCheckpoint::new();
        Ok(())
    }

    fn persist(&mut self) -> Result<()> {
        self.state.touch();
        self.backend.save(&self.state)
    }
}
