//! Deduplicating batch writer
//!
//! Candidates are written in fixed-size chunks, one chunk at a time with a
//! pause in between. Per chunk:
//!
//! 1. Drop candidates whose external id is already stored, or already seen
//!    earlier in this write ("duplicate").
//! 2. Insert the rest with one batch statement.
//! 3. If the batch is rejected, insert each remaining candidate on its own so
//!    a single bad row only fails itself.

use indicatif::ProgressBar;
use std::collections::HashSet;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::{PropertyStore, StoreError};
use crate::error::Result;
use crate::models::CanonicalProperty;

/// Failure reason for an external id that is already taken
pub const DUPLICATE_REASON: &str = "duplicate";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriterConfig {
    pub batch_size: usize,
    pub batch_pause: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            batch_pause: Duration::from_millis(500),
        }
    }
}

/// A stored candidate; `index` is its position in the input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenRecord {
    pub index: usize,
    pub id: Uuid,
    pub external_id: String,
}

/// A rejected candidate; `index` is its position in the input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedRecord {
    pub index: usize,
    pub external_id: String,
    pub reason: String,
}

impl RejectedRecord {
    pub fn is_duplicate(&self) -> bool {
        self.reason == DUPLICATE_REASON
    }
}

/// Result of one chunk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkOutcome {
    /// Input positions covered by this chunk
    pub range: Range<usize>,
    pub successful: Vec<WrittenRecord>,
    pub failed: Vec<RejectedRecord>,
    /// Whether the batch insert was rejected and rows went in one by one
    pub fell_back: bool,
}

/// Partition of all candidates into stored and rejected
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteOutcome {
    pub successful: Vec<WrittenRecord>,
    pub failed: Vec<RejectedRecord>,
}

impl WriteOutcome {
    pub fn duplicates(&self) -> usize {
        self.failed.iter().filter(|f| f.is_duplicate()).count()
    }
}

pub struct BatchWriter {
    store: Arc<dyn PropertyStore>,
    config: WriterConfig,
}

impl BatchWriter {
    pub fn new(store: Arc<dyn PropertyStore>, config: WriterConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> WriterConfig {
        self.config
    }

    /// Write every candidate, chunk by chunk.
    ///
    /// `on_chunk` runs after each chunk (checkpointing, reporting); an error
    /// from it stops the write. Store lookups that fail abort the write too;
    /// insert failures are per-candidate.
    pub async fn write_all<F>(
        &self,
        candidates: &[CanonicalProperty],
        progress: &ProgressBar,
        mut on_chunk: F,
    ) -> Result<WriteOutcome>
    where
        F: FnMut(&ChunkOutcome) -> Result<()>,
    {
        let batch_size = self.config.batch_size.max(1);
        let chunks = candidates.len().div_ceil(batch_size);
        let mut seen = HashSet::new();
        let mut outcome = WriteOutcome::default();

        for (n, chunk) in candidates.chunks(batch_size).enumerate() {
            let start = n * batch_size;
            let result = self.write_chunk(chunk, start, &mut seen).await?;

            info!(
                "Batch {}/{}: {} stored, {} failed{}",
                n + 1,
                chunks,
                result.successful.len(),
                result.failed.len(),
                if result.fell_back { " (individual fallback)" } else { "" }
            );
            progress.inc(chunk.len() as u64);
            on_chunk(&result)?;

            outcome.successful.extend(result.successful);
            outcome.failed.extend(result.failed);

            if n + 1 < chunks && !self.config.batch_pause.is_zero() {
                tokio::time::sleep(self.config.batch_pause).await;
            }
        }

        Ok(outcome)
    }

    /// Pre-filter, batch insert, fall back to single inserts
    async fn write_chunk(
        &self,
        chunk: &[CanonicalProperty],
        offset: usize,
        seen: &mut HashSet<String>,
    ) -> Result<ChunkOutcome> {
        let mut outcome = ChunkOutcome {
            range: offset..offset + chunk.len(),
            ..Default::default()
        };

        let mut pending: Vec<(usize, &CanonicalProperty)> = Vec::with_capacity(chunk.len());
        for (i, candidate) in chunk.iter().enumerate() {
            let index = offset + i;
            let external_id = &candidate.external_id;

            let duplicate = seen.contains(external_id)
                || self.store.find_by_external_id(external_id).await?.is_some();
            if duplicate {
                debug!(external_id = %external_id, "Skipping duplicate");
                outcome.failed.push(RejectedRecord {
                    index,
                    external_id: external_id.clone(),
                    reason: DUPLICATE_REASON.to_string(),
                });
                continue;
            }

            seen.insert(external_id.clone());
            pending.push((index, candidate));
        }

        if pending.is_empty() {
            return Ok(outcome);
        }

        let batch: Vec<&CanonicalProperty> = pending.iter().map(|(_, c)| *c).collect();
        match self.store.insert_batch(&batch).await {
            Ok(ids) => {
                for ((index, candidate), id) in pending.iter().zip(ids) {
                    outcome.successful.push(WrittenRecord {
                        index: *index,
                        id,
                        external_id: candidate.external_id.clone(),
                    });
                }
            },
            Err(e) => {
                warn!(
                    "Batch insert of {} rows failed ({}); inserting individually",
                    pending.len(),
                    e
                );
                outcome.fell_back = true;

                for (index, candidate) in pending {
                    match self.store.insert(candidate).await {
                        Ok(id) => outcome.successful.push(WrittenRecord {
                            index,
                            id,
                            external_id: candidate.external_id.clone(),
                        }),
                        Err(e) => {
                            let reason = match e {
                                StoreError::Duplicate(_) => DUPLICATE_REASON.to_string(),
                                other => other.to_string(),
                            };
                            warn!(external_id = %candidate.external_id, "Insert failed: {}", reason);
                            outcome.failed.push(RejectedRecord {
                                index,
                                external_id: candidate.external_id.clone(),
                                reason,
                            });
                        },
                    }
                }
            },
        }

        Ok(outcome)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::db::MemoryPropertyStore;

    fn candidate(external_id: &str) -> CanonicalProperty {
        let mut p = CanonicalProperty::empty(external_id);
        p.city = "Clayton".to_string();
        p.state = "MO".to_string();
        p
    }

    fn writer(store: &MemoryPropertyStore, batch_size: usize) -> BatchWriter {
        BatchWriter::new(
            Arc::new(store.clone()),
            WriterConfig {
                batch_size,
                batch_pause: Duration::from_millis(500),
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_bad_row_does_not_poison_its_batch() {
        let store = MemoryPropertyStore::new();
        let mut candidates: Vec<_> = (0..6).map(|i| candidate(&format!("p-{}", i))).collect();
        candidates[3].monthly_rent = Some(-100.0);

        let mut fallbacks = 0;
        let outcome = writer(&store, 50)
            .write_all(&candidates, &ProgressBar::hidden(), |chunk| {
                if chunk.fell_back {
                    fallbacks += 1;
                }
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(outcome.successful.len(), 5);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].index, 3);
        assert_eq!(outcome.failed[0].external_id, "p-3");
        assert!(outcome.failed[0].reason.contains("monthly_rent"));
        assert_eq!(fallbacks, 1);
        assert_eq!(store.len().await, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_run_is_all_duplicates() {
        let store = MemoryPropertyStore::new();
        let candidates: Vec<_> = (0..7).map(|i| candidate(&format!("p-{}", i))).collect();
        let w = writer(&store, 3);

        let first = w
            .write_all(&candidates, &ProgressBar::hidden(), |_| Ok(()))
            .await
            .unwrap();
        assert_eq!(first.successful.len(), 7);

        let second = w
            .write_all(&candidates, &ProgressBar::hidden(), |_| Ok(()))
            .await
            .unwrap();
        assert!(second.successful.is_empty());
        assert_eq!(second.duplicates(), 7);
        assert_eq!(store.len().await, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_batch_duplicate_is_rejected() {
        let store = MemoryPropertyStore::new();
        let candidates = vec![candidate("a"), candidate("b"), candidate("a")];

        let outcome = writer(&store, 2)
            .write_all(&candidates, &ProgressBar::hidden(), |_| Ok(()))
            .await
            .unwrap();

        assert_eq!(outcome.successful.len(), 2);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].index, 2);
        assert!(outcome.failed[0].is_duplicate());
    }

    #[tokio::test(start_paused = true)]
    async fn test_chunks_are_sequential_with_pause() {
        let store = MemoryPropertyStore::new();
        let candidates: Vec<_> = (0..5).map(|i| candidate(&format!("p-{}", i))).collect();

        let mut ranges = Vec::new();
        let started = tokio::time::Instant::now();
        let pb = ProgressBar::hidden();
        writer(&store, 2)
            .write_all(&candidates, &pb, |chunk| {
                ranges.push(chunk.range.clone());
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(ranges, vec![0..2, 2..4, 4..5]);
        // Two pauses between three chunks, none after the last
        assert_eq!(started.elapsed(), Duration::from_millis(1000));
        assert_eq!(pb.position(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_callback_error_stops_the_write() {
        let store = MemoryPropertyStore::new();
        let candidates: Vec<_> = (0..4).map(|i| candidate(&format!("p-{}", i))).collect();

        let result = writer(&store, 2)
            .write_all(&candidates, &ProgressBar::hidden(), |_| {
                Err(crate::error::MigrateError::config("stop"))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_empty_input() {
        let store = MemoryPropertyStore::new();
        let outcome = writer(&store, 10)
            .write_all(&[], &ProgressBar::hidden(), |_| Ok(()))
            .await
            .unwrap();
        assert_eq!(outcome, WriteOutcome::default());
    }
}
