//! Shared fixtures for the listing-migrate integration tests
//!
//! Everything runs against the in-memory adapters: [`MemoryPropertyStore`],
//! [`MemoryObjectStore`] and a [`StubFetcher`] that serves bytes for any URL
//! except the ones containing `broken`.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use listing_migrate::assets::{AssetFetcher, AssetTransferEngine};
use listing_migrate::db::{
    CountFilter, MemoryPropertyStore, PropertyStore, StoreError, StoredPropertyRef,
};
use listing_migrate::models::CanonicalProperty;
use listing_migrate::storage::MemoryObjectStore;
use listing_migrate::{MigrationConfig, Orchestrator};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;

pub const HEADERS: &[&str] = &["ID", "Title", "Address", "City", "State", "Rent", "Image", "Gallery"];

/// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,listing_migrate=info")),
        )
        .with_test_writer()
        .try_init();
}

/// One export row; unset columns are written empty
#[derive(Debug, Clone, Default)]
pub struct Row {
    pub id: String,
    pub title: String,
    pub address: String,
    pub city: String,
    pub state: String,
    pub rent: String,
    pub image: String,
    pub gallery: String,
}

impl Row {
    pub fn valid(id: &str) -> Self {
        Self {
            id: id.to_string(),
            title: format!("Listing {}", id),
            city: "Clayton".to_string(),
            state: "MO".to_string(),
            rent: "$1,250".to_string(),
            ..Default::default()
        }
    }

    pub fn with_city(mut self, city: &str) -> Self {
        self.city = city.to_string();
        self
    }

    pub fn with_image(mut self, media_id: &str) -> Self {
        self.image = media_uri(media_id);
        self
    }

    pub fn with_gallery(mut self, media_ids: &[&str]) -> Self {
        let uris: Vec<String> = media_ids.iter().map(|id| media_uri(id)).collect();
        self.gallery = serde_json::to_string(&uris).unwrap();
        self
    }

    fn fields(&self) -> [&str; 8] {
        [
            self.id.as_str(),
            self.title.as_str(),
            self.address.as_str(),
            self.city.as_str(),
            self.state.as_str(),
            self.rent.as_str(),
            self.image.as_str(),
            self.gallery.as_str(),
        ]
    }
}

pub fn media_uri(media_id: &str) -> String {
    format!("wix:image://v1/{}/photo.jpg#originWidth=800&originHeight=600", media_id)
}

/// Temporary working directory holding the export, checkpoint and reports
pub struct Workspace {
    pub dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    pub fn input(&self) -> PathBuf {
        self.dir.path().join("listings.csv")
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.dir.path().join("migration-checkpoint.json")
    }

    pub fn report_dir(&self) -> PathBuf {
        self.dir.path().join("reports")
    }

    /// Write the export with a proper CSV writer (JSON cells need quoting)
    pub fn write_export(&self, rows: &[Row]) -> PathBuf {
        let path = self.input();
        let mut writer = csv::Writer::from_path(&path).unwrap();
        writer.write_record(HEADERS).unwrap();
        for row in rows {
            writer.write_record(row.fields()).unwrap();
        }
        writer.flush().unwrap();
        path
    }

    pub fn config(&self) -> MigrationConfig {
        MigrationConfig::default()
            .without_pauses()
            .with_progress(false)
            .with_batch_size(5)
            .with_checkpoint_path(self.checkpoint_path())
            .with_report_dir(self.report_dir())
    }

    pub fn read_report(&self, file: &str) -> serde_json::Value {
        read_json(&self.report_dir().join(file))
    }
}

pub fn read_json(path: &Path) -> serde_json::Value {
    let content = std::fs::read_to_string(path).unwrap();
    serde_json::from_str(&content).unwrap()
}

/// Serves the URL bytes; any URL containing "broken" fails
#[derive(Default)]
pub struct StubFetcher {
    pub calls: AtomicUsize,
}

#[async_trait]
impl AssetFetcher for StubFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if url.contains("broken") {
            bail!("HTTP error: 404 Not Found")
        }
        Ok(url.as_bytes().to_vec())
    }
}

pub fn asset_engine(
    config: &MigrationConfig,
    fetcher: Arc<StubFetcher>,
    objects: &MemoryObjectStore,
) -> AssetTransferEngine {
    AssetTransferEngine::new(config.asset_config(), fetcher, Arc::new(objects.clone())).unwrap()
}

/// Orchestrator wired to in-memory adapters
pub fn orchestrator(
    workspace: &Workspace,
    store: &MemoryPropertyStore,
    objects: &MemoryObjectStore,
) -> Orchestrator {
    let config = workspace.config();
    let engine = asset_engine(&config, Arc::new(StubFetcher::default()), objects);
    Orchestrator::new(config, workspace.input())
        .with_store(Arc::new(store.clone()))
        .with_assets(engine)
}

/// Store whose lookups start failing after a fixed number of calls,
/// simulating a database that goes away mid-run
pub struct FailingStore {
    inner: MemoryPropertyStore,
    lookups_left: AtomicUsize,
}

impl FailingStore {
    pub fn new(inner: MemoryPropertyStore, lookups: usize) -> Self {
        Self {
            inner,
            lookups_left: AtomicUsize::new(lookups),
        }
    }
}

#[async_trait]
impl PropertyStore for FailingStore {
    async fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<StoredPropertyRef>, StoreError> {
        let left = self.lookups_left.load(Ordering::SeqCst);
        if left == 0 {
            return Err(StoreError::Database("connection reset by peer".to_string()));
        }
        self.lookups_left.store(left - 1, Ordering::SeqCst);
        self.inner.find_by_external_id(external_id).await
    }

    async fn insert(&self, property: &CanonicalProperty) -> Result<Uuid, StoreError> {
        self.inner.insert(property).await
    }

    async fn insert_batch(&self, properties: &[&CanonicalProperty]) -> Result<Vec<Uuid>, StoreError> {
        self.inner.insert_batch(properties).await
    }

    async fn update_images(
        &self,
        id: Uuid,
        primary_image_url: Option<&str>,
        gallery_urls: Option<&[String]>,
    ) -> Result<(), StoreError> {
        self.inner.update_images(id, primary_image_url, gallery_urls).await
    }

    async fn count(&self, filter: CountFilter) -> Result<u64, StoreError> {
        self.inner.count(filter).await
    }

    async fn list_missing_primary_image(&self) -> Result<Vec<StoredPropertyRef>, StoreError> {
        self.inner.list_missing_primary_image().await
    }
}
