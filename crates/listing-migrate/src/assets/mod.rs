//! Image transfer: legacy pseudo-URI -> download -> object storage
//!
//! Per image: parse the media id (a format error is final, no retry), build
//! the fetch URL, download with exponential backoff, upload under a
//! collision-resistant key and resolve the public URL. Partial failure never
//! fails a record: [`ImageMigration`] carries whatever succeeded plus one
//! error string per failed image.
//!
//! The primary image goes first, on its own. Gallery images then fan out
//! through a shared semaphore, so at most `concurrency` transfers are in
//! flight across every record the engine is handling.

pub mod fetcher;
pub mod media;

pub use fetcher::{AssetFetcher, HttpFetcher, RetryPolicy};
pub use media::{ImageRole, MediaResolver};

use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::models::ImageRefs;
use crate::storage::ObjectStore;

/// Per-image failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AssetError {
    #[error("unrecognized image reference: {0}")]
    Format(String),

    #[error("download failed after {attempts} attempts ({url}): {message}")]
    Download {
        url: String,
        attempts: u32,
        message: String,
    },

    #[error("upload failed: {0}")]
    Upload(String),
}

/// Outcome of one image transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssetTransferResult {
    pub success: bool,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AssetTransferResult {
    fn from_outcome(source: &str, outcome: Result<String, AssetError>) -> Self {
        match outcome {
            Ok(url) => Self {
                success: true,
                source: source.to_string(),
                url: Some(url),
                error: None,
            },
            Err(e) => Self {
                success: false,
                source: source.to_string(),
                url: None,
                error: Some(e.to_string()),
            },
        }
    }
}

/// Images migrated for one record
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageMigration {
    pub primary_url: Option<String>,
    /// Successful gallery URLs in gallery order
    pub gallery_urls: Vec<String>,
    /// One entry per failed image
    pub errors: Vec<String>,
    pub results: Vec<AssetTransferResult>,
}

impl ImageMigration {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }

    /// Whether at least one image made it (and the record should be updated)
    pub fn has_any(&self) -> bool {
        self.primary_url.is_some() || !self.gallery_urls.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct AssetTransferConfig {
    pub concurrency: usize,
    pub retry: RetryPolicy,
    pub media_url_template: String,
}

/// Moves a record's images into object storage
#[derive(Clone)]
pub struct AssetTransferEngine {
    fetcher: Arc<dyn AssetFetcher>,
    store: Arc<dyn ObjectStore>,
    resolver: MediaResolver,
    limiter: Arc<Semaphore>,
    concurrency: usize,
    retry: RetryPolicy,
}

impl AssetTransferEngine {
    pub fn new(
        config: AssetTransferConfig,
        fetcher: Arc<dyn AssetFetcher>,
        store: Arc<dyn ObjectStore>,
    ) -> Result<Self, regex::Error> {
        let concurrency = config.concurrency.max(1);
        Ok(Self {
            fetcher,
            store,
            resolver: MediaResolver::new(config.media_url_template)?,
            limiter: Arc::new(Semaphore::new(concurrency)),
            concurrency,
            retry: config.retry,
        })
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Migrate a record's primary image and gallery
    #[instrument(skip(self, refs), fields(gallery = refs.gallery.len()))]
    pub async fn migrate_record(&self, record_id: Uuid, refs: &ImageRefs) -> ImageMigration {
        let mut migration = ImageMigration::default();

        if let Some(primary) = &refs.primary {
            let outcome = self.transfer(record_id, ImageRole::Primary, 0, primary).await;
            if let Ok(url) = &outcome {
                migration.primary_url = Some(url.clone());
            }
            Self::collect(&mut migration, primary, outcome);
        }

        let gallery: Vec<(&String, Result<String, AssetError>)> = stream::iter(refs.gallery.iter().enumerate())
            .map(|(index, uri)| async move {
                let outcome = self.limited_transfer(record_id, index, uri).await;
                (uri, outcome)
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        for (uri, outcome) in gallery {
            if let Ok(url) = &outcome {
                migration.gallery_urls.push(url.clone());
            }
            Self::collect(&mut migration, uri, outcome);
        }

        debug!(
            succeeded = migration.succeeded(),
            failed = migration.failed(),
            "Record images migrated"
        );
        migration
    }

    fn collect(migration: &mut ImageMigration, source: &str, outcome: Result<String, AssetError>) {
        if let Err(e) = &outcome {
            warn!(source, error = %e, "Image transfer failed");
            migration.errors.push(format!("{}: {}", source, e));
        }
        migration
            .results
            .push(AssetTransferResult::from_outcome(source, outcome));
    }

    async fn limited_transfer(
        &self,
        record_id: Uuid,
        index: usize,
        uri: &str,
    ) -> Result<String, AssetError> {
        let _permit = self
            .limiter
            .acquire()
            .await
            .map_err(|e| AssetError::Download {
                url: uri.to_string(),
                attempts: 0,
                message: e.to_string(),
            })?;
        self.transfer(record_id, ImageRole::Gallery, index, uri).await
    }

    /// One image end to end; returns its public URL
    pub async fn transfer(
        &self,
        record_id: Uuid,
        role: ImageRole,
        index: usize,
        uri: &str,
    ) -> Result<String, AssetError> {
        let media = self.resolver.parse(uri)?;
        let url = self.resolver.fetch_url(&media.media_id);

        let bytes = fetcher::fetch_with_retry(self.fetcher.as_ref(), &url, self.retry).await?;

        let key = media::storage_key(record_id, role, index, media.extension);
        let stored = self
            .store
            .upload(&key, bytes, media.content_type)
            .await
            .map_err(|e| AssetError::Upload(format!("{:#}", e)))?;

        Ok(self.store.public_url(&stored))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::storage::MemoryObjectStore;
    use anyhow::bail;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Counts concurrent fetches; URLs containing "broken" always fail
    #[derive(Default)]
    struct TrackingFetcher {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AssetFetcher for TrackingFetcher {
        async fn fetch(&self, url: &str) -> anyhow::Result<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            tokio::time::sleep(Duration::from_millis(50)).await;

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if url.contains("broken") {
                bail!("HTTP error: 500")
            }
            Ok(url.as_bytes().to_vec())
        }
    }

    fn engine(
        concurrency: usize,
        fetcher: Arc<TrackingFetcher>,
        store: MemoryObjectStore,
    ) -> AssetTransferEngine {
        AssetTransferEngine::new(
            AssetTransferConfig {
                concurrency,
                retry: RetryPolicy::new(1, Duration::from_millis(10)),
                media_url_template: "https://media.test/{media_id}".to_string(),
            },
            fetcher,
            Arc::new(store),
        )
        .unwrap()
    }

    fn uri(media_id: &str) -> String {
        format!("wix:image://v1/{}/file#originWidth=10", media_id)
    }

    #[tokio::test(start_paused = true)]
    async fn test_gallery_concurrency_is_bounded() {
        let fetcher = Arc::new(TrackingFetcher::default());
        let engine = engine(10, fetcher.clone(), MemoryObjectStore::default());

        let refs = ImageRefs {
            primary: None,
            gallery: (0..50).map(|i| uri(&format!("img{}~mv2.jpg", i))).collect(),
        };
        let migration = engine.migrate_record(Uuid::new_v4(), &refs).await;

        assert_eq!(migration.gallery_urls.len(), 50);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 50);
        let max = fetcher.max_in_flight.load(Ordering::SeqCst);
        assert!(max <= 10, "{} transfers in flight", max);
        assert!(max > 1, "gallery did not fan out");
    }

    #[tokio::test(start_paused = true)]
    async fn test_limit_is_shared_across_records() {
        let fetcher = Arc::new(TrackingFetcher::default());
        let engine = engine(4, fetcher.clone(), MemoryObjectStore::default());

        let refs = ImageRefs {
            primary: None,
            gallery: (0..12).map(|i| uri(&format!("g{}.png", i))).collect(),
        };
        let a = engine.clone();
        let b = engine.clone();
        let (ra, rb) = tokio::join!(
            a.migrate_record(Uuid::new_v4(), &refs),
            b.migrate_record(Uuid::new_v4(), &refs)
        );

        assert_eq!(ra.gallery_urls.len() + rb.gallery_urls.len(), 24);
        assert!(fetcher.max_in_flight.load(Ordering::SeqCst) <= 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_failure_keeps_successes_in_order() {
        let fetcher = Arc::new(TrackingFetcher::default());
        let store = MemoryObjectStore::new("https://cdn.test");
        let engine = engine(3, fetcher, store.clone());
        let record_id = Uuid::new_v4();

        let refs = ImageRefs {
            primary: Some(uri("front~mv2.png")),
            gallery: vec![
                uri("a~mv2.jpg"),
                "not-a-pseudo-uri".to_string(),
                uri("broken~mv2.jpg"),
                uri("d~mv2.webp"),
            ],
        };
        let migration = engine.migrate_record(record_id, &refs).await;

        let primary = migration.primary_url.clone().unwrap();
        assert!(primary.starts_with(&format!("https://cdn.test/properties/{}/primary-0-", record_id)));
        assert!(primary.ends_with(".png"));

        assert_eq!(migration.gallery_urls.len(), 2);
        assert!(migration.gallery_urls[0].contains("/gallery-0-"));
        assert!(migration.gallery_urls[1].contains("/gallery-3-"));
        assert!(migration.gallery_urls[1].ends_with(".webp"));

        assert_eq!(migration.errors.len(), 2);
        assert!(migration.errors[0].starts_with("not-a-pseudo-uri: unrecognized image reference"));
        assert!(migration.errors[1].contains("after 2 attempts"));
        assert_eq!(migration.succeeded(), 3);
        assert_eq!(migration.failed(), 2);
        assert!(migration.has_any());

        let key = primary.trim_start_matches("https://cdn.test/");
        assert_eq!(store.get(key).unwrap().content_type, "image/png");
        assert_eq!(store.len(), 3);
    }

    #[tokio::test]
    async fn test_format_error_is_not_retried() {
        let fetcher = Arc::new(TrackingFetcher::default());
        let engine = engine(2, fetcher.clone(), MemoryObjectStore::default());

        let err = engine
            .transfer(Uuid::new_v4(), ImageRole::Primary, 0, "https://example.com/x.jpg")
            .await
            .unwrap_err();
        assert!(matches!(err, AssetError::Format(_)));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_no_images_is_empty_migration() {
        let fetcher = Arc::new(TrackingFetcher::default());
        let engine = engine(2, fetcher, MemoryObjectStore::default());
        let migration = engine.migrate_record(Uuid::new_v4(), &ImageRefs::default()).await;
        assert_eq!(migration, ImageMigration::default());
        assert!(!migration.has_any());
    }
}
