//! In-process property store
//!
//! Mirrors the SQL schema's `UNIQUE (external_id)` and CHECK constraints so
//! that writer and orchestrator behavior can be exercised without Postgres.
//! Batch inserts are all-or-nothing, like a single INSERT statement.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{CountFilter, PropertyStore, StoreError, StoredPropertyRef};
use crate::models::{CanonicalProperty, ListingStatus};

#[derive(Debug, Clone, PartialEq)]
pub struct StoredProperty {
    pub id: Uuid,
    pub property: CanonicalProperty,
}

/// Shared in-memory table; clones see the same rows
#[derive(Debug, Clone, Default)]
pub struct MemoryPropertyStore {
    rows: Arc<Mutex<Vec<StoredProperty>>>,
}

impl MemoryPropertyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored row in insertion order
    pub async fn all(&self) -> Vec<StoredProperty> {
        self.rows.lock().await.clone()
    }

    pub async fn get(&self, id: Uuid) -> Option<StoredProperty> {
        self.rows.lock().await.iter().find(|r| r.id == id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.rows.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.lock().await.is_empty()
    }
}

/// The schema's CHECK constraints
fn check_constraints(p: &CanonicalProperty) -> Result<(), StoreError> {
    let violation = |column: &str| {
        Err(StoreError::Constraint(format!(
            "new row for relation \"properties\" violates check constraint on {}",
            column
        )))
    };

    if p.title.trim().is_empty() {
        return violation("title");
    }
    if p.latitude.is_some_and(|v| !(-90.0..=90.0).contains(&v)) {
        return violation("latitude");
    }
    if p.longitude.is_some_and(|v| !(-180.0..=180.0).contains(&v)) {
        return violation("longitude");
    }
    if p.bedrooms.is_some_and(|v| !(0..=50).contains(&v)) {
        return violation("bedrooms");
    }
    if p.bathrooms.is_some_and(|v| !(0.0..=50.0).contains(&v)) {
        return violation("bathrooms");
    }
    if p.square_feet.is_some_and(|v| !(1..=1_000_000).contains(&v)) {
        return violation("square_feet");
    }
    if p.monthly_rent.is_some_and(|v| !(0.0..=1_000_000.0).contains(&v)) {
        return violation("monthly_rent");
    }
    Ok(())
}

fn stored_ref(row: &StoredProperty) -> StoredPropertyRef {
    StoredPropertyRef {
        id: row.id,
        external_id: row.property.external_id.clone(),
    }
}

#[async_trait]
impl PropertyStore for MemoryPropertyStore {
    async fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<StoredPropertyRef>, StoreError> {
        let rows = self.rows.lock().await;
        Ok(rows
            .iter()
            .find(|r| r.property.external_id == external_id)
            .map(stored_ref))
    }

    async fn insert(&self, property: &CanonicalProperty) -> Result<Uuid, StoreError> {
        let mut ids = self.insert_batch(&[property]).await?;
        ids.pop()
            .ok_or_else(|| StoreError::Database("insert returned no id".to_string()))
    }

    async fn insert_batch(&self, properties: &[&CanonicalProperty]) -> Result<Vec<Uuid>, StoreError> {
        let mut rows = self.rows.lock().await;

        // Validate everything before touching the table
        let mut staged: Vec<StoredProperty> = Vec::with_capacity(properties.len());
        for property in properties {
            check_constraints(property)?;

            let taken = rows
                .iter()
                .chain(staged.iter())
                .any(|r| r.property.external_id == property.external_id);
            if taken {
                return Err(StoreError::Duplicate(property.external_id.clone()));
            }

            staged.push(StoredProperty {
                id: Uuid::new_v4(),
                property: (*property).clone(),
            });
        }

        let ids = staged.iter().map(|r| r.id).collect();
        rows.extend(staged);
        Ok(ids)
    }

    async fn update_images(
        &self,
        id: Uuid,
        primary_image_url: Option<&str>,
        gallery_urls: Option<&[String]>,
    ) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().await;
        if let Some(row) = rows.iter_mut().find(|r| r.id == id) {
            if let Some(url) = primary_image_url {
                row.property.primary_image_url = Some(url.to_string());
            }
            if let Some(urls) = gallery_urls {
                row.property.gallery_urls = Some(urls.to_vec());
            }
        }
        Ok(())
    }

    async fn count(&self, filter: CountFilter) -> Result<u64, StoreError> {
        let rows = self.rows.lock().await;
        let n = rows
            .iter()
            .filter(|r| {
                let p = &r.property;
                match filter {
                    CountFilter::All => true,
                    CountFilter::WithExternalId => !p.external_id.is_empty(),
                    CountFilter::WithPrimaryImage => p.primary_image_url.is_some(),
                    CountFilter::WithGallery => {
                        p.gallery_urls.as_ref().is_some_and(|g| !g.is_empty())
                    },
                    CountFilter::Published => p.status == ListingStatus::Published,
                }
            })
            .count();
        Ok(n as u64)
    }

    async fn list_missing_primary_image(&self) -> Result<Vec<StoredPropertyRef>, StoreError> {
        let rows = self.rows.lock().await;
        Ok(rows
            .iter()
            .filter(|r| r.property.primary_image_url.is_none())
            .map(stored_ref)
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn property(external_id: &str) -> CanonicalProperty {
        let mut p = CanonicalProperty::empty(external_id);
        p.city = "Clayton".to_string();
        p.state = "MO".to_string();
        p
    }

    #[tokio::test]
    async fn test_unique_external_id() {
        let store = MemoryPropertyStore::new();
        store.insert(&property("a")).await.unwrap();

        let err = store.insert(&property("a")).await.unwrap_err();
        assert_eq!(err, StoreError::Duplicate("a".to_string()));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_batch_is_all_or_nothing() {
        let store = MemoryPropertyStore::new();
        let good = property("a");
        let mut bad = property("b");
        bad.monthly_rent = Some(-10.0);

        let err = store.insert_batch(&[&good, &bad]).await.unwrap_err();
        assert!(matches!(err, StoreError::Constraint(_)));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_duplicate_within_one_batch() {
        let store = MemoryPropertyStore::new();
        let a = property("a");
        let err = store.insert_batch(&[&a, &a]).await.unwrap_err();
        assert!(err.is_duplicate());
    }

    #[tokio::test]
    async fn test_update_images_and_counts() {
        let store = MemoryPropertyStore::new();
        let id = store.insert(&property("a")).await.unwrap();
        store.insert(&property("")).await.unwrap();

        assert_eq!(store.list_missing_primary_image().await.unwrap().len(), 2);

        let gallery = vec!["https://cdn.test/g.jpg".to_string()];
        store
            .update_images(id, Some("https://cdn.test/p.jpg"), Some(&gallery))
            .await
            .unwrap();

        assert_eq!(store.count(CountFilter::All).await.unwrap(), 2);
        assert_eq!(store.count(CountFilter::WithExternalId).await.unwrap(), 1);
        assert_eq!(store.count(CountFilter::WithPrimaryImage).await.unwrap(), 1);
        assert_eq!(store.count(CountFilter::WithGallery).await.unwrap(), 1);
        assert_eq!(store.count(CountFilter::Published).await.unwrap(), 2);
        assert_eq!(store.list_missing_primary_image().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_images_none_leaves_fields() {
        let store = MemoryPropertyStore::new();
        let id = store.insert(&property("a")).await.unwrap();
        store.update_images(id, Some("https://cdn.test/p.jpg"), None).await.unwrap();

        let row = store.get(id).await.unwrap();
        assert_eq!(row.property.primary_image_url.as_deref(), Some("https://cdn.test/p.jpg"));
        assert_eq!(row.property.gallery_urls, None);
    }
}
