//! Relational property store seam
//!
//! The pipeline only needs a handful of operations, captured by
//! [`PropertyStore`]. [`PgPropertyStore`] is the production adapter;
//! [`MemoryPropertyStore`] enforces the same uniqueness and CHECK constraints
//! in-process for tests and dry runs.

pub mod memory;
pub mod postgres;

pub use memory::MemoryPropertyStore;
pub use postgres::PgPropertyStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::models::CanonicalProperty;

/// Errors surfaced by a property store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Unique constraint on `external_id` violated
    #[error("duplicate")]
    Duplicate(String),

    /// A CHECK / NOT NULL constraint rejected the row
    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("database error: {0}")]
    Database(String),
}

impl StoreError {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, StoreError::Duplicate(_))
    }
}

/// Identity of a stored record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredPropertyRef {
    pub id: Uuid,
    pub external_id: String,
}

/// Predicates for [`PropertyStore::count`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountFilter {
    All,
    WithExternalId,
    WithPrimaryImage,
    WithGallery,
    Published,
}

#[async_trait]
pub trait PropertyStore: Send + Sync {
    async fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<StoredPropertyRef>, StoreError>;

    /// Insert one record and return its generated id
    async fn insert(&self, property: &CanonicalProperty) -> Result<Uuid, StoreError>;

    /// Insert all records or none; ids come back in input order
    async fn insert_batch(&self, properties: &[&CanonicalProperty]) -> Result<Vec<Uuid>, StoreError>;

    /// Set media fields; a `None` argument leaves that field untouched
    async fn update_images(
        &self,
        id: Uuid,
        primary_image_url: Option<&str>,
        gallery_urls: Option<&[String]>,
    ) -> Result<(), StoreError>;

    async fn count(&self, filter: CountFilter) -> Result<u64, StoreError>;

    /// Records without a primary image, oldest first
    async fn list_missing_primary_image(&self) -> Result<Vec<StoredPropertyRef>, StoreError>;
}
