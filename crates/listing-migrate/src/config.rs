//! Migration configuration
//!
//! Loaded from environment variables (a `.env` file is picked up by the
//! binary first) with defaults for every tuning knob. External services are
//! only required by the modes that touch them; see
//! [`MigrationConfig::require_database`] and
//! [`MigrationConfig::require_storage`].

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use listing_common::env;

use crate::assets::{AssetTransferConfig, RetryPolicy};
use crate::error::{MigrateError, Result};
use crate::storage::StorageConfig;
use crate::writer::WriterConfig;

pub const DEFAULT_MEDIA_BASE_URL: &str = "https://static.wixstatic.com/media/{media_id}";

/// Upper bound on image retries; keeps backoff delays strictly increasing
pub const MAX_IMAGE_RETRIES: u32 = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    #[serde(skip_serializing)]
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub storage: StorageConfig,

    /// Candidates per batch insert
    pub batch_size: usize,
    pub batch_pause_ms: u64,
    /// Row limit for test mode
    pub test_limit: usize,

    pub image_concurrency: usize,
    pub image_max_retries: u32,
    pub image_retry_base_ms: u64,
    pub image_timeout_secs: u64,
    /// Pause after every N records in the image phase (0 = never)
    pub record_pause_every: usize,
    pub record_pause_ms: u64,
    /// Static-asset URL template containing `{media_id}`
    pub media_base_url: String,

    /// Cancel window before a destructive full run
    pub preflight_secs: u64,

    pub checkpoint_path: PathBuf,
    pub report_dir: PathBuf,
    pub show_progress: bool,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            database_max_connections: 5,
            storage: StorageConfig {
                region: "us-east-1".to_string(),
                ..Default::default()
            },
            batch_size: 50,
            batch_pause_ms: 500,
            test_limit: 10,
            image_concurrency: 10,
            image_max_retries: 3,
            image_retry_base_ms: 1000,
            image_timeout_secs: 30,
            record_pause_every: 5,
            record_pause_ms: 1000,
            media_base_url: DEFAULT_MEDIA_BASE_URL.to_string(),
            preflight_secs: 5,
            checkpoint_path: PathBuf::from("./migration-checkpoint.json"),
            report_dir: PathBuf::from("./migration-reports"),
            show_progress: true,
        }
    }
}

impl MigrationConfig {
    /// Load from environment variables and validate
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            database_url: env::var("DATABASE_URL"),
            database_max_connections: env::parse_or(
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            )?,
            storage: StorageConfig::from_env()?,
            batch_size: env::parse_or("MIGRATION_BATCH_SIZE", defaults.batch_size)?,
            batch_pause_ms: env::parse_or("MIGRATION_BATCH_PAUSE_MS", defaults.batch_pause_ms)?,
            test_limit: env::parse_or("MIGRATION_TEST_LIMIT", defaults.test_limit)?,
            image_concurrency: env::parse_or(
                "MIGRATION_IMAGE_CONCURRENCY",
                defaults.image_concurrency,
            )?,
            image_max_retries: env::parse_or(
                "MIGRATION_IMAGE_MAX_RETRIES",
                defaults.image_max_retries,
            )?,
            image_retry_base_ms: env::parse_or(
                "MIGRATION_IMAGE_RETRY_BASE_MS",
                defaults.image_retry_base_ms,
            )?,
            image_timeout_secs: env::parse_or(
                "MIGRATION_IMAGE_TIMEOUT_SECS",
                defaults.image_timeout_secs,
            )?,
            record_pause_every: env::parse_or(
                "MIGRATION_RECORD_PAUSE_EVERY",
                defaults.record_pause_every,
            )?,
            record_pause_ms: env::parse_or("MIGRATION_RECORD_PAUSE_MS", defaults.record_pause_ms)?,
            media_base_url: env::var("MIGRATION_MEDIA_BASE_URL").unwrap_or(defaults.media_base_url),
            preflight_secs: env::parse_or("MIGRATION_PREFLIGHT_SECS", defaults.preflight_secs)?,
            checkpoint_path: env::var("MIGRATION_CHECKPOINT_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.checkpoint_path),
            report_dir: env::var("MIGRATION_REPORT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.report_dir),
            show_progress: env::flag_or("MIGRATION_SHOW_PROGRESS", defaults.show_progress)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Check mode-independent settings
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(MigrateError::config("MIGRATION_BATCH_SIZE must be greater than 0"));
        }
        if self.image_concurrency == 0 {
            return Err(MigrateError::config(
                "MIGRATION_IMAGE_CONCURRENCY must be greater than 0",
            ));
        }
        if self.image_max_retries > MAX_IMAGE_RETRIES {
            return Err(MigrateError::config(format!(
                "MIGRATION_IMAGE_MAX_RETRIES must be at most {}",
                MAX_IMAGE_RETRIES
            )));
        }
        if self.image_timeout_secs == 0 {
            return Err(MigrateError::config(
                "MIGRATION_IMAGE_TIMEOUT_SECS must be greater than 0",
            ));
        }
        if self.database_max_connections == 0 {
            return Err(MigrateError::config(
                "DATABASE_MAX_CONNECTIONS must be greater than 0",
            ));
        }
        if !self.media_base_url.contains(crate::assets::media::MEDIA_ID_PLACEHOLDER) {
            return Err(MigrateError::config(
                "MIGRATION_MEDIA_BASE_URL must contain {media_id}",
            ));
        }
        Ok(())
    }

    /// Database URL for modes that touch the store
    pub fn require_database(&self) -> Result<&str> {
        self.database_url
            .as_deref()
            .ok_or_else(|| MigrateError::config("DATABASE_URL must be set"))
    }

    /// Object storage settings for modes that migrate images
    pub fn require_storage(&self) -> Result<&StorageConfig> {
        self.storage.validate()?;
        Ok(&self.storage)
    }

    pub fn writer_config(&self) -> WriterConfig {
        WriterConfig {
            batch_size: self.batch_size,
            batch_pause: Duration::from_millis(self.batch_pause_ms),
        }
    }

    pub fn asset_config(&self) -> AssetTransferConfig {
        AssetTransferConfig {
            concurrency: self.image_concurrency,
            retry: RetryPolicy::new(
                self.image_max_retries,
                Duration::from_millis(self.image_retry_base_ms),
            ),
            media_url_template: self.media_base_url.clone(),
        }
    }

    pub fn image_timeout(&self) -> Duration {
        Duration::from_secs(self.image_timeout_secs)
    }

    pub fn record_pause(&self) -> Duration {
        Duration::from_millis(self.record_pause_ms)
    }

    pub fn preflight_delay(&self) -> Duration {
        Duration::from_secs(self.preflight_secs)
    }

    pub fn with_checkpoint_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.checkpoint_path = path.into();
        self
    }

    pub fn with_report_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.report_dir = dir.into();
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_test_limit(mut self, limit: usize) -> Self {
        self.test_limit = limit;
        self
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Drop every pause and delay (tests, local dry runs)
    pub fn without_pauses(mut self) -> Self {
        self.batch_pause_ms = 0;
        self.record_pause_ms = 0;
        self.preflight_secs = 0;
        self.image_retry_base_ms = 0;
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serial_test::serial;

    const KEYS: &[&str] = &[
        "DATABASE_URL",
        "MIGRATION_BATCH_SIZE",
        "MIGRATION_IMAGE_CONCURRENCY",
        "MIGRATION_SHOW_PROGRESS",
        "MIGRATION_CHECKPOINT_PATH",
        "MIGRATION_MEDIA_BASE_URL",
        "MIGRATION_IMAGE_MAX_RETRIES",
        "S3_PATH_STYLE",
        "S3_REGION",
    ];

    fn clear_env() {
        for key in KEYS {
            std::env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear_env();
        let config = MigrationConfig::from_env().unwrap();

        assert_eq!(config.batch_size, 50);
        assert_eq!(config.batch_pause_ms, 500);
        assert_eq!(config.test_limit, 10);
        assert_eq!(config.image_concurrency, 10);
        assert_eq!(config.image_max_retries, 3);
        assert_eq!(config.media_base_url, DEFAULT_MEDIA_BASE_URL);
        assert_eq!(config.checkpoint_path, PathBuf::from("./migration-checkpoint.json"));
        assert!(config.show_progress);
        assert!(config.database_url.is_none());
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        clear_env();
        std::env::set_var("DATABASE_URL", "postgres://localhost/listings");
        std::env::set_var("MIGRATION_BATCH_SIZE", "25");
        std::env::set_var("MIGRATION_SHOW_PROGRESS", "false");
        std::env::set_var("MIGRATION_CHECKPOINT_PATH", "/tmp/cp.json");

        let config = MigrationConfig::from_env().unwrap();
        assert_eq!(config.require_database().unwrap(), "postgres://localhost/listings");
        assert_eq!(config.writer_config().batch_size, 25);
        assert!(!config.show_progress);
        assert_eq!(config.checkpoint_path, PathBuf::from("/tmp/cp.json"));

        clear_env();
    }

    #[test]
    #[serial]
    fn test_invalid_values_are_rejected() {
        clear_env();
        std::env::set_var("MIGRATION_IMAGE_CONCURRENCY", "0");
        assert!(matches!(MigrationConfig::from_env(), Err(MigrateError::Config(_))));

        std::env::remove_var("MIGRATION_IMAGE_CONCURRENCY");
        std::env::set_var("MIGRATION_MEDIA_BASE_URL", "https://media.test/static");
        assert!(MigrationConfig::from_env().is_err());

        std::env::remove_var("MIGRATION_MEDIA_BASE_URL");
        std::env::set_var("MIGRATION_BATCH_SIZE", "fifty");
        let err = MigrationConfig::from_env().unwrap_err();
        assert!(matches!(err, MigrateError::Common(_)));
        assert!(err.to_string().contains("MIGRATION_BATCH_SIZE"));

        clear_env();
        std::env::set_var("MIGRATION_IMAGE_MAX_RETRIES", "11");
        assert!(matches!(MigrationConfig::from_env(), Err(MigrateError::Config(_))));
        std::env::set_var("MIGRATION_IMAGE_MAX_RETRIES", "10");
        assert_eq!(MigrationConfig::from_env().unwrap().image_max_retries, 10);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_storage_keys_follow_env_rules() {
        clear_env();
        std::env::set_var("S3_REGION", "");
        std::env::set_var("S3_PATH_STYLE", "yes");
        let config = MigrationConfig::from_env().unwrap();
        assert_eq!(config.storage.region, "us-east-1");
        assert!(config.storage.path_style);

        std::env::set_var("S3_PATH_STYLE", "definitely");
        let err = MigrationConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("S3_PATH_STYLE"));

        clear_env();
    }

    #[test]
    fn test_required_services() {
        let config = MigrationConfig::default();
        assert!(matches!(config.require_database(), Err(MigrateError::Config(_))));
        assert!(matches!(config.require_storage(), Err(MigrateError::Config(_))));
    }

    #[test]
    fn test_asset_config_mapping() {
        let config = MigrationConfig::default();
        let assets = config.asset_config();
        assert_eq!(assets.concurrency, 10);
        assert_eq!(assets.retry.total_attempts(), 4);
        assert_eq!(assets.retry.base_delay, Duration::from_millis(1000));
    }
}
