//! Run summaries and machine-readable reports

use chrono::{DateTime, Utc};
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Table};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::checkpoint::{Phase, RunCheckpoint};
use crate::error::Result;
use crate::writer::DUPLICATE_REASON;

pub const VALIDATION_REPORT_FILE: &str = "validation-report.json";
pub const VERIFICATION_REPORT_FILE: &str = "verification-report.json";

/// End-of-run counters printed for every mode
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub mode: String,
    pub total: usize,
    pub valid: usize,
    pub invalid: usize,
    pub imported: usize,
    pub failed: usize,
    pub images_succeeded: usize,
    pub images_failed: usize,
    #[serde(skip)]
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn new(mode: impl Into<String>) -> Self {
        Self {
            mode: mode.into(),
            ..Default::default()
        }
    }

    pub fn to_table(&self) -> Table {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS)
            .set_header(vec!["Metric", "Count"]);

        let rows = [
            ("Total rows", self.total),
            ("Valid", self.valid),
            ("Invalid", self.invalid),
            ("Imported", self.imported),
            ("Failed", self.failed),
            ("Images succeeded", self.images_succeeded),
            ("Images failed", self.images_failed),
        ];
        for (label, count) in rows {
            table.add_row(vec![label.to_string(), count.to_string()]);
        }
        table
    }

    /// Print the table to stdout and log the counters
    pub fn print(&self) {
        println!();
        println!("Migration summary ({}, {:.1}s)", self.mode, self.elapsed.as_secs_f64());
        println!("{}", self.to_table());

        info!(
            mode = %self.mode,
            total = self.total,
            valid = self.valid,
            invalid = self.invalid,
            imported = self.imported,
            failed = self.failed,
            images_succeeded = self.images_succeeded,
            images_failed = self.images_failed,
            "Run summary"
        );
    }
}

/// Errors and warnings of one row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowIssues {
    pub row: usize,
    pub external_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// An external id present on more than one input row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateExternalId {
    pub external_id: String,
    pub rows: Vec<usize>,
}

/// Dry-run result of validate mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub generated_at: DateTime<Utc>,
    pub input: String,
    pub total_rows: usize,
    pub valid: usize,
    pub invalid: usize,
    pub rows_with_warnings: usize,
    /// Informational: duplicates are only classified at import
    pub duplicate_external_ids: Vec<DuplicateExternalId>,
    /// Rows with at least one error or warning
    pub rows: Vec<RowIssues>,
}

impl ValidationReport {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            generated_at: Utc::now(),
            input: input.into(),
            total_rows: 0,
            valid: 0,
            invalid: 0,
            rows_with_warnings: 0,
            duplicate_external_ids: Vec::new(),
            rows: Vec::new(),
        }
    }

    pub fn record_valid(&mut self, row: usize, external_id: &str, warnings: Vec<String>) {
        self.total_rows += 1;
        self.valid += 1;
        if !warnings.is_empty() {
            self.rows_with_warnings += 1;
            self.rows.push(RowIssues {
                row,
                external_id: external_id.to_string(),
                errors: Vec::new(),
                warnings,
            });
        }
    }

    pub fn record_invalid(&mut self, row: usize, external_id: &str, errors: Vec<String>) {
        self.total_rows += 1;
        self.invalid += 1;
        self.rows.push(RowIssues {
            row,
            external_id: external_id.to_string(),
            errors,
            warnings: Vec::new(),
        });
    }

    /// Fill `duplicate_external_ids` from `(external_id, row)` occurrences
    pub fn set_duplicates<'a>(&mut self, occurrences: impl IntoIterator<Item = (&'a str, usize)>) {
        let mut by_id: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for (external_id, row) in occurrences {
            by_id.entry(external_id).or_default().push(row);
        }

        self.duplicate_external_ids = by_id
            .into_iter()
            .filter(|(_, rows)| rows.len() > 1)
            .map(|(external_id, rows)| DuplicateExternalId {
                external_id: external_id.to_string(),
                rows,
            })
            .collect();
    }
}

/// Counts taken directly from the store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreCounts {
    pub total: u64,
    pub with_external_id: u64,
    pub with_primary_image: u64,
    pub with_gallery: u64,
    pub published: u64,
}

/// Counts recorded in the checkpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointCounts {
    pub phase: Phase,
    pub last_processed_row: usize,
    pub total_rows: usize,
    pub imported: usize,
    pub validation_failures: usize,
    pub import_failures: usize,
    pub duplicates: usize,
    pub image_failures: usize,
}

impl CheckpointCounts {
    pub fn from_checkpoint(checkpoint: &RunCheckpoint) -> Self {
        Self {
            phase: checkpoint.phase,
            last_processed_row: checkpoint.last_processed_row,
            total_rows: checkpoint.total_rows,
            imported: checkpoint.success_count(),
            validation_failures: checkpoint.failures_in(Phase::Parsing).count(),
            import_failures: checkpoint.failures_in(Phase::Importing).count(),
            duplicates: checkpoint
                .failures_in(Phase::Importing)
                .filter(|f| f.error == DUPLICATE_REASON)
                .count(),
            image_failures: checkpoint.failures_in(Phase::Images).count(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationCheck {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

impl VerificationCheck {
    fn new(name: &str, passed: bool, detail: String) -> Self {
        Self {
            name: name.to_string(),
            passed,
            detail,
        }
    }
}

/// Reconciliation of store contents against the checkpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub generated_at: DateTime<Utc>,
    pub store: StoreCounts,
    pub checkpoint: Option<CheckpointCounts>,
    pub missing_primary_image: u64,
    pub checks: Vec<VerificationCheck>,
    pub passed: bool,
}

impl VerificationReport {
    pub fn build(store: StoreCounts, checkpoint: Option<&RunCheckpoint>) -> Self {
        let checkpoint = checkpoint.map(CheckpointCounts::from_checkpoint);
        let mut checks = vec![
            VerificationCheck::new(
                "media_counts_within_total",
                store.with_primary_image <= store.total && store.with_gallery <= store.total,
                format!(
                    "{} with primary image, {} with gallery, {} total",
                    store.with_primary_image, store.with_gallery, store.total
                ),
            ),
        ];

        if let Some(cp) = &checkpoint {
            checks.push(VerificationCheck::new(
                "imported_records_present",
                store.total >= cp.imported as u64,
                format!("{} imported per checkpoint, {} in store", cp.imported, store.total),
            ));

            let accounted = cp.imported + cp.validation_failures + cp.import_failures;
            checks.push(VerificationCheck::new(
                "processed_rows_accounted",
                accounted == cp.last_processed_row,
                format!(
                    "{} processed rows, {} imported + {} invalid + {} failed",
                    cp.last_processed_row, cp.imported, cp.validation_failures, cp.import_failures
                ),
            ));

            if cp.phase == Phase::Complete {
                checks.push(VerificationCheck::new(
                    "all_rows_processed",
                    cp.last_processed_row >= cp.total_rows,
                    format!("{}/{} rows processed", cp.last_processed_row, cp.total_rows),
                ));
            }
        }

        let passed = checks.iter().all(|c| c.passed);
        Self {
            generated_at: Utc::now(),
            store,
            checkpoint,
            missing_primary_image: store.total.saturating_sub(store.with_primary_image),
            checks,
            passed,
        }
    }
}

/// Table view of a persisted checkpoint for status mode
pub fn checkpoint_table(checkpoint: &RunCheckpoint) -> Table {
    let counts = CheckpointCounts::from_checkpoint(checkpoint);
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec!["Field", "Value"]);

    let rows = [
        ("Phase", counts.phase.to_string()),
        (
            "Rows processed",
            format!("{}/{}", counts.last_processed_row, counts.total_rows),
        ),
        ("Imported", counts.imported.to_string()),
        ("Validation failures", counts.validation_failures.to_string()),
        ("Import failures", counts.import_failures.to_string()),
        ("Duplicates", counts.duplicates.to_string()),
        ("Image failures", counts.image_failures.to_string()),
        ("Started", checkpoint.started_at.to_rfc3339()),
        ("Updated", checkpoint.updated_at.to_rfc3339()),
    ];
    for (label, value) in rows {
        table.add_row(vec![label.to_string(), value]);
    }
    table
}

/// Write a report as pretty JSON under `dir`
pub fn write_report<T: Serialize>(dir: &Path, file_name: &str, report: &T) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(file_name);
    std::fs::write(&path, serde_json::to_string_pretty(report)?)?;
    info!("Report written to {}", path.display());
    Ok(path)
}
