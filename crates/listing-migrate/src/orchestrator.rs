//! Run-level control flow for every operating mode
//!
//! The [`Orchestrator`] owns the collaborators (store, asset engine, config)
//! while the run state is an explicit [`CheckpointStore`] handed to each
//! phase. Import reads the export lazily in windows of a few batches; after
//! every written chunk the checkpoint records successes, failures and the row
//! cursor together, so everything at or below `last_processed_row` has been
//! accounted for exactly once.

use clap::ValueEnum;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::assets::AssetTransferEngine;
use crate::checkpoint::{CheckpointStore, FailureRecord, Phase};
use crate::config::MigrationConfig;
use crate::db::{CountFilter, PropertyStore};
use crate::error::{MigrateError, Result};
use crate::models::{columns, ImageRefs};
use crate::parser::{ParsedRow, RecordParser};
use crate::progress::create_progress_bar;
use crate::report::{
    self, RunSummary, StoreCounts, ValidationReport, VerificationReport, VALIDATION_REPORT_FILE,
    VERIFICATION_REPORT_FILE,
};
use crate::transform;
use crate::writer::BatchWriter;

/// Batches read from the export per import window
const WINDOW_BATCHES: usize = 10;

/// Operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Transform and validate every row without writing anything
    Validate,
    /// Fresh import of the first few rows
    Test,
    /// Migrate images of stored records that have no primary image yet
    Images,
    /// Fresh import of every row, then images
    Full,
    /// Continue an interrupted import after the last processed row
    Resume,
    /// Reconcile store counts against the checkpoint
    Verify,
    /// Print the current checkpoint
    Status,
}

impl Mode {
    pub fn as_str(&self) -> &str {
        match self {
            Mode::Validate => "validate",
            Mode::Test => "test",
            Mode::Images => "images",
            Mode::Full => "full",
            Mode::Resume => "resume",
            Mode::Verify => "verify",
            Mode::Status => "status",
        }
    }

    /// Whether the mode reads or writes the property store
    pub fn needs_store(&self) -> bool {
        !matches!(self, Mode::Validate | Mode::Status)
    }

    /// Whether the mode transfers images
    pub fn needs_assets(&self) -> bool {
        matches!(self, Mode::Images | Mode::Full)
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct Orchestrator {
    config: MigrationConfig,
    input: PathBuf,
    limit: Option<usize>,
    store: Option<Arc<dyn PropertyStore>>,
    assets: Option<AssetTransferEngine>,
}

impl Orchestrator {
    pub fn new(config: MigrationConfig, input: impl Into<PathBuf>) -> Self {
        Self {
            config,
            input: input.into(),
            limit: None,
            store: None,
            assets: None,
        }
    }

    /// Row limit; test mode falls back to the configured test limit
    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn PropertyStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_assets(mut self, engine: AssetTransferEngine) -> Self {
        self.assets = Some(engine);
        self
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    pub fn input(&self) -> &Path {
        &self.input
    }

    fn store(&self) -> Result<&Arc<dyn PropertyStore>> {
        self.store
            .as_ref()
            .ok_or_else(|| MigrateError::config("this mode needs a property store (DATABASE_URL)"))
    }

    fn assets(&self) -> Result<&AssetTransferEngine> {
        self.assets
            .as_ref()
            .ok_or_else(|| MigrateError::config("this mode needs object storage (S3_BUCKET)"))
    }

    /// Run one mode to completion
    pub async fn run(&self, mode: Mode, checkpoint: &mut CheckpointStore) -> Result<RunSummary> {
        let started = Instant::now();
        let mut summary = RunSummary::new(mode.as_str());
        info!(mode = %mode, input = %self.input.display(), "Starting migration");

        match mode {
            Mode::Validate => {
                self.validate(&mut summary)?;
            },
            Mode::Test => {
                checkpoint.reset()?;
                let limit = self.limit.unwrap_or(self.config.test_limit);
                self.import(checkpoint, 0, Some(limit), &mut summary).await?;
                checkpoint.set_phase(Phase::Complete)?;
            },
            Mode::Images => {
                self.migrate_images(checkpoint, &mut summary).await?;
                checkpoint.set_phase(Phase::Complete)?;
            },
            Mode::Full => {
                self.preflight().await;
                checkpoint.reset()?;
                self.import(checkpoint, 0, self.limit, &mut summary).await?;
                self.migrate_images(checkpoint, &mut summary).await?;
                checkpoint.set_phase(Phase::Complete)?;
            },
            Mode::Resume => {
                if !checkpoint.exists() {
                    warn!("No checkpoint found; resuming from the first row");
                }
                let start_after = checkpoint.last_processed_row();
                let images_interrupted = checkpoint.phase() == Phase::Images;
                info!(start_after, "Resuming import");

                self.import(checkpoint, start_after, self.limit, &mut summary).await?;
                if images_interrupted {
                    self.migrate_images(checkpoint, &mut summary).await?;
                }
                checkpoint.set_phase(Phase::Complete)?;
            },
            Mode::Verify => {
                self.verify(checkpoint, &mut summary).await?;
            },
            Mode::Status => {
                self.status(checkpoint, &mut summary);
            },
        }

        summary.elapsed = started.elapsed();
        info!(mode = %mode, elapsed = ?summary.elapsed, "Migration finished");
        Ok(summary)
    }

    async fn preflight(&self) {
        let delay = self.config.preflight_delay();
        if delay.is_zero() {
            return;
        }
        warn!(
            "Full migration resets the checkpoint and imports every row; starting in {}s (Ctrl+C to cancel)",
            delay.as_secs()
        );
        tokio::time::sleep(delay).await;
    }

    /// Dry run: transform and validate every row, write the report
    #[instrument(skip(self, summary))]
    fn validate(&self, summary: &mut RunSummary) -> Result<ValidationReport> {
        let parser = RecordParser::new(&self.input).with_limit(self.limit);
        let mut report = ValidationReport::new(self.input.display().to_string());
        let mut occurrences: Vec<(String, usize)> = Vec::new();

        for row in parser.rows()? {
            let row = row?;
            let external_id = row.record.get(columns::ID).unwrap_or_default().to_string();

            match transform::prepare(&row) {
                Ok(prepared) => {
                    report.record_valid(row.row_number, &external_id, prepared.warnings);
                },
                Err(e) => {
                    debug!(row = row.row_number, "Invalid row: {}", e);
                    report.record_invalid(row.row_number, &external_id, e.issues);
                },
            }
            occurrences.push((external_id, row.row_number));
        }

        report.set_duplicates(occurrences.iter().map(|(id, row)| (id.as_str(), *row)));

        summary.total = report.total_rows;
        summary.valid = report.valid;
        summary.invalid = report.invalid;

        if !report.duplicate_external_ids.is_empty() {
            warn!(
                "{} external ids appear on more than one row; later rows will be skipped as duplicates",
                report.duplicate_external_ids.len()
            );
        }
        report::write_report(&self.config.report_dir, VALIDATION_REPORT_FILE, &report)?;
        Ok(report)
    }

    /// Import rows after `start_after`, up to `limit`
    async fn import(
        &self,
        checkpoint: &mut CheckpointStore,
        start_after: usize,
        limit: Option<usize>,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let writer = BatchWriter::new(self.store()?.clone(), self.config.writer_config());
        let parser = RecordParser::new(&self.input).with_limit(limit);

        let file_rows = parser.count_rows()?;
        let total = limit.map_or(file_rows, |l| l.min(file_rows));
        checkpoint.set_total_rows(total)?;
        checkpoint.set_phase(Phase::Importing)?;
        summary.total = total;

        let remaining = total.saturating_sub(start_after);
        info!(total, start_after, remaining, "Importing rows");
        let progress = create_progress_bar(remaining as u64, "Importing rows", self.config.show_progress);

        let window_size = self.config.batch_size.max(1) * WINDOW_BATCHES;
        let mut window: Vec<ParsedRow> = Vec::with_capacity(window_size);
        let mut windows = 0;

        for row in parser.rows()? {
            let row = row?;
            if row.row_number <= start_after {
                continue;
            }
            window.push(row);

            if window.len() == window_size {
                if windows > 0 {
                    self.batch_pause().await;
                }
                let rows = std::mem::take(&mut window);
                self.import_window(&writer, checkpoint, rows, &progress, summary).await?;
                windows += 1;
            }
        }
        if !window.is_empty() {
            if windows > 0 {
                self.batch_pause().await;
            }
            self.import_window(&writer, checkpoint, window, &progress, summary).await?;
        }

        progress.finish_and_clear();
        info!(
            imported = summary.imported,
            failed = summary.failed,
            "Import phase finished"
        );
        Ok(())
    }

    async fn batch_pause(&self) {
        let pause = self.config.writer_config().batch_pause;
        if !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
    }

    async fn import_window(
        &self,
        writer: &BatchWriter,
        checkpoint: &mut CheckpointStore,
        rows: Vec<ParsedRow>,
        progress: &indicatif::ProgressBar,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let last_row = rows.last().map(|r| r.row_number).unwrap_or_default();
        let mut candidates = Vec::with_capacity(rows.len());
        let mut candidate_rows = Vec::with_capacity(rows.len());
        let mut invalid: VecDeque<FailureRecord> = VecDeque::new();

        for row in &rows {
            match transform::prepare(row) {
                Ok(prepared) => {
                    if prepared.property.external_id.is_empty() {
                        warn!(
                            row = row.row_number,
                            "Row has no external id; the empty string is used as its dedup key"
                        );
                    }
                    candidate_rows.push(prepared.row_number);
                    candidates.push(prepared.property);
                },
                Err(e) => {
                    let external_id = row.record.get(columns::ID).unwrap_or_default();
                    warn!(row = row.row_number, external_id, "Validation failed: {}", e);
                    invalid.push_back(FailureRecord::new(
                        external_id,
                        row.row_number,
                        e.to_string(),
                        Phase::Parsing,
                    ));
                },
            }
        }

        summary.valid += candidates.len();
        summary.invalid += invalid.len();
        summary.failed += invalid.len();
        progress.inc(invalid.len() as u64);

        let row_of = |index: usize| candidate_rows.get(index).copied().unwrap_or(last_row);

        let outcome = writer
            .write_all(&candidates, progress, |chunk| {
                let chunk_last_row = row_of(chunk.range.end.saturating_sub(1));

                let mut failures: Vec<FailureRecord> = chunk
                    .failed
                    .iter()
                    .map(|f| {
                        FailureRecord::new(&f.external_id, row_of(f.index), &f.reason, Phase::Importing)
                    })
                    .collect();
                while let Some(failure) = invalid.pop_front() {
                    if failure.row > chunk_last_row {
                        invalid.push_front(failure);
                        break;
                    }
                    failures.push(failure);
                }

                checkpoint.record_successes(chunk.successful.iter().map(|w| w.id))?;
                checkpoint.record_failures(failures)?;
                checkpoint.advance_to(chunk_last_row)?;
                Ok(())
            })
            .await?;

        checkpoint.record_failures(invalid)?;
        checkpoint.advance_to(last_row)?;

        summary.imported += outcome.successful.len();
        summary.failed += outcome.failed.len();
        Ok(())
    }

    /// Image references of every source row, keyed by external id (first row wins)
    fn load_image_refs(&self) -> Result<HashMap<String, (usize, ImageRefs)>> {
        let mut lookup = HashMap::new();
        RecordParser::new(&self.input).for_each(|row| {
            let external_id = row.record.get(columns::ID).unwrap_or_default().to_string();
            lookup
                .entry(external_id)
                .or_insert_with(|| (row.row_number, transform::image_refs(&row.record)));
            std::ops::ControlFlow::Continue(())
        })?;
        Ok(lookup)
    }

    /// Migrate images for every stored record still missing a primary image
    async fn migrate_images(
        &self,
        checkpoint: &mut CheckpointStore,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let store = self.store()?;
        let engine = self.assets()?;
        checkpoint.set_phase(Phase::Images)?;

        let pending = store.list_missing_primary_image().await?;
        if pending.is_empty() {
            info!("No records are missing images");
            return Ok(());
        }

        let lookup = self.load_image_refs()?;
        info!(
            records = pending.len(),
            concurrency = engine.concurrency(),
            "Migrating images"
        );
        let progress = create_progress_bar(pending.len() as u64, "Migrating images", self.config.show_progress);
        let pause_every = self.config.record_pause_every;
        let pause = self.config.record_pause();

        for (n, record) in pending.iter().enumerate() {
            match lookup.get(&record.external_id) {
                Some((row, refs)) if !refs.is_empty() => {
                    let migration = engine.migrate_record(record.id, refs).await;
                    summary.images_succeeded += migration.succeeded();
                    summary.images_failed += migration.failed();

                    // Persist per record so a crash loses at most this one
                    if migration.has_any() {
                        let gallery = (!migration.gallery_urls.is_empty())
                            .then_some(migration.gallery_urls.as_slice());
                        store
                            .update_images(record.id, migration.primary_url.as_deref(), gallery)
                            .await?;
                    }
                    if !migration.errors.is_empty() {
                        checkpoint.record_failures(migration.errors.iter().map(|e| {
                            FailureRecord::new(&record.external_id, *row, e, Phase::Images)
                        }))?;
                    }
                },
                Some(_) => {
                    debug!(external_id = %record.external_id, "Source row has no images");
                },
                None => {
                    warn!(external_id = %record.external_id, "Stored record not found in the input file");
                },
            }

            progress.inc(1);
            let done = n + 1;
            if pause_every > 0 && done % pause_every == 0 && done < pending.len() && !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
        }

        progress.finish_and_clear();
        info!(
            succeeded = summary.images_succeeded,
            failed = summary.images_failed,
            "Image phase finished"
        );
        Ok(())
    }

    /// Reconcile store counts with the checkpoint and write the report
    async fn verify(&self, checkpoint: &CheckpointStore, summary: &mut RunSummary) -> Result<VerificationReport> {
        let store = self.store()?;
        let counts = StoreCounts {
            total: store.count(CountFilter::All).await?,
            with_external_id: store.count(CountFilter::WithExternalId).await?,
            with_primary_image: store.count(CountFilter::WithPrimaryImage).await?,
            with_gallery: store.count(CountFilter::WithGallery).await?,
            published: store.count(CountFilter::Published).await?,
        };

        let state = checkpoint.exists().then(|| checkpoint.state());
        if state.is_none() {
            warn!("No checkpoint found; verifying store counts only");
        }
        let verification = VerificationReport::build(counts, state);

        for check in &verification.checks {
            if check.passed {
                info!(check = %check.name, "{}", check.detail);
            } else {
                warn!(check = %check.name, "Check failed: {}", check.detail);
            }
        }

        summary.total = counts.total as usize;
        if let Some(cp) = &verification.checkpoint {
            summary.imported = cp.imported;
            summary.invalid = cp.validation_failures;
            summary.failed = cp.validation_failures + cp.import_failures;
            summary.images_failed = cp.image_failures;
        }
        summary.images_succeeded = counts.with_primary_image as usize;

        report::write_report(&self.config.report_dir, VERIFICATION_REPORT_FILE, &verification)?;
        Ok(verification)
    }

    fn status(&self, checkpoint: &CheckpointStore, summary: &mut RunSummary) {
        if !checkpoint.exists() {
            println!("No checkpoint at {}", self.config.checkpoint_path.display());
            return;
        }

        let state = checkpoint.state();
        println!("{}", report::checkpoint_table(state));

        summary.total = state.total_rows;
        summary.imported = state.success_count();
        summary.invalid = state.failures_in(Phase::Parsing).count();
        summary.failed = summary.invalid + state.failures_in(Phase::Importing).count();
        summary.images_failed = state.failures_in(Phase::Images).count();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::checkpoint::MemoryBackend;
    use crate::db::MemoryPropertyStore;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    fn export(rows: usize) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "ID,Title,City,State").unwrap();
        for i in 1..=rows {
            writeln!(file, "id-{i},Listing {i},Clayton,MO").unwrap();
        }
        file.flush().unwrap();
        file
    }

    fn config(dir: &TempDir) -> MigrationConfig {
        MigrationConfig::default()
            .without_pauses()
            .with_progress(false)
            .with_batch_size(2)
            .with_report_dir(dir.path().join("reports"))
    }

    #[test]
    fn test_mode_requirements() {
        assert!(!Mode::Validate.needs_store());
        assert!(!Mode::Status.needs_store());
        assert!(Mode::Verify.needs_store());
        assert!(Mode::Full.needs_assets());
        assert!(!Mode::Resume.needs_assets());
        assert_eq!(Mode::from_str("resume", true).unwrap(), Mode::Resume);
    }

    #[tokio::test]
    async fn test_import_without_store_is_a_config_error() {
        let dir = TempDir::new().unwrap();
        let file = export(1);
        let orchestrator = Orchestrator::new(config(&dir), file.path());
        let mut checkpoint = CheckpointStore::open(MemoryBackend::new()).unwrap();

        let result = orchestrator.run(Mode::Test, &mut checkpoint).await;
        assert!(matches!(result, Err(MigrateError::Config(_))));
    }

    #[tokio::test]
    async fn test_mode_imports_only_the_limit() {
        let dir = TempDir::new().unwrap();
        let file = export(25);
        let store = MemoryPropertyStore::new();
        let orchestrator = Orchestrator::new(config(&dir).with_test_limit(10), file.path())
            .with_store(Arc::new(store.clone()));
        let mut checkpoint = CheckpointStore::open(MemoryBackend::new()).unwrap();

        let summary = orchestrator.run(Mode::Test, &mut checkpoint).await.unwrap();

        assert_eq!(summary.total, 10);
        assert_eq!(summary.imported, 10);
        assert_eq!(store.len().await, 10);
        assert_eq!(checkpoint.last_processed_row(), 10);
        assert_eq!(checkpoint.phase(), Phase::Complete);
    }

    #[tokio::test]
    async fn test_import_windows_cover_every_row_once() {
        let dir = TempDir::new().unwrap();
        // batch size 2 => windows of 20 rows; 45 rows spans three windows
        let file = export(45);
        let store = MemoryPropertyStore::new();
        let orchestrator = Orchestrator::new(config(&dir), file.path()).with_store(Arc::new(store.clone()));
        let backend = MemoryBackend::new();
        let mut checkpoint = CheckpointStore::open(backend.clone()).unwrap();

        let summary = orchestrator.run(Mode::Resume, &mut checkpoint).await.unwrap();

        assert_eq!(summary.imported, 45);
        assert_eq!(store.len().await, 45);
        let persisted = backend.snapshot().unwrap();
        assert_eq!(persisted.last_processed_row, 45);
        assert_eq!(persisted.imported_ids.len(), 45);
    }
}
