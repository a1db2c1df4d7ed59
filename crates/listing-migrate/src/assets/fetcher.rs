//! Image download with retry

use anyhow::{bail, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

use super::AssetError;

/// Fetches raw bytes for a URL (one attempt, no retry)
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// reqwest-backed fetcher
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("listing-migrate/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl AssetFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            bail!("HTTP error: {}", response.status());
        }

        let bytes = response.bytes().await?;
        Ok(bytes.to_vec())
    }
}

/// Exponential backoff: `max_retries + 1` attempts, the delay doubling from
/// `base_delay`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Delay before retry number `retry` (1-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }

    pub fn total_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(1000))
    }
}

/// Fetch with retry; the last error is surfaced once attempts run out
pub async fn fetch_with_retry(
    fetcher: &dyn AssetFetcher,
    url: &str,
    policy: RetryPolicy,
) -> std::result::Result<Vec<u8>, AssetError> {
    let attempts = policy.total_attempts();
    let mut attempt = 1;

    loop {
        match fetcher.fetch(url).await {
            Ok(bytes) => {
                debug!(url, attempt, bytes = bytes.len(), "Downloaded image");
                return Ok(bytes);
            },
            Err(e) if attempt < attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    "Download attempt {}/{} failed for {}: {:#}; retrying in {:?}",
                    attempt, attempts, url, e, delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            },
            Err(e) => {
                return Err(AssetError::Download {
                    url: url.to_string(),
                    attempts,
                    message: format!("{:#}", e),
                });
            },
        }
    }
}
