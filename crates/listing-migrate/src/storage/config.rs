use listing_common::env;
use serde::{Deserialize, Serialize};

use crate::error::{MigrateError, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    pub endpoint: Option<String>,
    pub region: String,
    pub bucket: String,
    /// Static credentials; when absent the default AWS provider chain is used
    pub access_key: Option<String>,
    #[serde(skip_serializing)]
    pub secret_key: Option<String>,
    pub path_style: bool,
    /// Base for public object URLs (CDN or bucket website)
    pub public_url_base: Option<String>,
}

impl StorageConfig {
    /// Read `S3_*` keys; blank keys take their defaults, malformed ones fail
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            endpoint: env::var("S3_ENDPOINT"),
            region: env::var("S3_REGION").unwrap_or_else(|| "us-east-1".to_string()),
            bucket: env::var("S3_BUCKET").unwrap_or_default(),
            access_key: env::var("S3_ACCESS_KEY").or_else(|| env::var("AWS_ACCESS_KEY_ID")),
            secret_key: env::var("S3_SECRET_KEY").or_else(|| env::var("AWS_SECRET_ACCESS_KEY")),
            path_style: env::flag_or("S3_PATH_STYLE", false)?,
            public_url_base: env::var("S3_PUBLIC_URL_BASE"),
        })
    }

    pub fn for_minio(endpoint: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            region: "us-east-1".to_string(),
            bucket: bucket.into(),
            access_key: Some("minioadmin".to_string()),
            secret_key: Some("minioadmin".to_string()),
            path_style: true,
            public_url_base: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.bucket.trim().is_empty() {
            return Err(MigrateError::config("S3_BUCKET must be set"));
        }
        if self.access_key.is_some() != self.secret_key.is_some() {
            return Err(MigrateError::config(
                "S3_ACCESS_KEY and S3_SECRET_KEY must be set together",
            ));
        }
        Ok(())
    }

    /// Public URL of a stored object
    pub fn public_url(&self, key: &str) -> String {
        let key = key.trim_start_matches('/');
        if let Some(base) = &self.public_url_base {
            format!("{}/{}", base.trim_end_matches('/'), key)
        } else if let Some(endpoint) = &self.endpoint {
            format!("{}/{}/{}", endpoint.trim_end_matches('/'), self.bucket, key)
        } else {
            format!("https://{}.s3.{}.amazonaws.com/{}", self.bucket, self.region, key)
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_for_minio() {
        let config = StorageConfig::for_minio("http://localhost:9000", "listings");
        assert_eq!(config.endpoint, Some("http://localhost:9000".to_string()));
        assert!(config.path_style);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_public_url_variants() {
        let mut config = StorageConfig::for_minio("http://localhost:9000/", "listings");
        assert_eq!(
            config.public_url("properties/a/primary-0.jpg"),
            "http://localhost:9000/listings/properties/a/primary-0.jpg"
        );

        config.public_url_base = Some("https://cdn.example.com/".to_string());
        assert_eq!(
            config.public_url("/properties/a/primary-0.jpg"),
            "https://cdn.example.com/properties/a/primary-0.jpg"
        );

        let aws = StorageConfig {
            region: "us-east-2".to_string(),
            bucket: "listings".to_string(),
            ..Default::default()
        };
        assert_eq!(
            aws.public_url("k.png"),
            "https://listings.s3.us-east-2.amazonaws.com/k.png"
        );
    }

    #[test]
    fn test_validate_requires_bucket() {
        let config = StorageConfig::default();
        assert!(matches!(config.validate(), Err(MigrateError::Config(_))));
    }

    #[test]
    #[serial]
    fn test_from_env() {
        std::env::set_var("S3_BUCKET", "from-env");
        std::env::set_var("S3_PATH_STYLE", "yes");
        std::env::set_var("S3_REGION", "  ");

        let config = StorageConfig::from_env().unwrap();
        assert_eq!(config.bucket, "from-env");
        assert_eq!(config.region, "us-east-1");
        assert!(config.path_style);

        std::env::remove_var("S3_BUCKET");
        std::env::remove_var("S3_PATH_STYLE");
        std::env::remove_var("S3_REGION");
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_malformed_path_style() {
        std::env::set_var("S3_PATH_STYLE", "sometimes");

        let err = StorageConfig::from_env().unwrap_err();
        assert!(matches!(err, MigrateError::Common(_)));
        assert!(err.to_string().contains("S3_PATH_STYLE"));

        std::env::remove_var("S3_PATH_STYLE");
    }
}
