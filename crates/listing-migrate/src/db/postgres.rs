//! PostgreSQL property store

use async_trait::async_trait;
use sqlx::error::ErrorKind;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder, Row};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use super::{CountFilter, PropertyStore, StoreError, StoredPropertyRef};
use crate::models::CanonicalProperty;

const INSERT_COLUMNS: &str = r#"
    INSERT INTO properties (
        id, external_id, title, description,
        street, city, state, postal_code, country, latitude, longitude,
        unit_type, bedrooms, bathrooms, square_feet,
        laundry, pet_policy, parking, furnished, amenities,
        landlord_name, landlord_email, landlord_phone, listing_url,
        monthly_rent, primary_image_url, gallery_urls, status, featured
    )
"#;

/// Property store backed by a Postgres pool
#[derive(Clone)]
pub struct PgPropertyStore {
    pool: PgPool,
}

impl PgPropertyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and apply pending migrations
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect(url)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        info!("Database connection pool established");

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StoreError::Database(format!("Migration failed: {}", e)))?;

        info!("Database migrations completed");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Map a sqlx error onto the store taxonomy
fn classify(err: sqlx::Error, external_id: &str) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        match db_err.kind() {
            ErrorKind::UniqueViolation => return StoreError::Duplicate(external_id.to_string()),
            ErrorKind::CheckViolation | ErrorKind::NotNullViolation | ErrorKind::ForeignKeyViolation => {
                return StoreError::Constraint(db_err.message().to_string())
            },
            _ => {},
        }
    }
    StoreError::Database(err.to_string())
}

fn push_property(qb: &mut QueryBuilder<'_, Postgres>, ids: &mut Vec<Uuid>, properties: &[&CanonicalProperty]) {
    qb.push_values(properties.iter(), |mut b, p| {
        let id = Uuid::new_v4();
        ids.push(id);

        b.push_bind(id)
            .push_bind(p.external_id.clone())
            .push_bind(p.title.clone())
            .push_bind(p.description.clone())
            .push_bind(p.street.clone())
            .push_bind(p.city.clone())
            .push_bind(p.state.clone())
            .push_bind(p.postal_code.clone())
            .push_bind(p.country.clone())
            .push_bind(p.latitude)
            .push_bind(p.longitude)
            .push_bind(p.unit_type.clone())
            .push_bind(p.bedrooms)
            .push_bind(p.bathrooms)
            .push_bind(p.square_feet)
            .push_bind(p.laundry.clone())
            .push_bind(p.pet_policy.clone())
            .push_bind(p.parking.clone())
            .push_bind(p.furnished.clone())
            .push_bind(p.amenities.clone())
            .push_bind(p.landlord_name.clone())
            .push_bind(p.landlord_email.clone())
            .push_bind(p.landlord_phone.clone())
            .push_bind(p.listing_url.clone())
            .push_bind(p.monthly_rent)
            .push_bind(p.primary_image_url.clone())
            .push_bind(p.gallery_urls.clone())
            .push_bind(p.status.as_str().to_string())
            .push_bind(p.featured);
    });
}

#[async_trait]
impl PropertyStore for PgPropertyStore {
    async fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<StoredPropertyRef>, StoreError> {
        let row = sqlx::query("SELECT id, external_id FROM properties WHERE external_id = $1")
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| classify(e, external_id))?;

        row.map(|r| {
            Ok(StoredPropertyRef {
                id: r.try_get("id").map_err(|e| classify(e, external_id))?,
                external_id: r.try_get("external_id").map_err(|e| classify(e, external_id))?,
            })
        })
        .transpose()
    }

    async fn insert(&self, property: &CanonicalProperty) -> Result<Uuid, StoreError> {
        let mut ids = self.insert_batch(&[property]).await?;
        ids.pop()
            .ok_or_else(|| StoreError::Database("insert returned no id".to_string()))
    }

    async fn insert_batch(&self, properties: &[&CanonicalProperty]) -> Result<Vec<Uuid>, StoreError> {
        if properties.is_empty() {
            return Ok(Vec::new());
        }

        let mut ids = Vec::with_capacity(properties.len());
        let mut qb = QueryBuilder::<Postgres>::new(INSERT_COLUMNS);
        push_property(&mut qb, &mut ids, properties);

        // A single statement is atomic: any bad row rejects the whole batch
        let label = if properties.len() == 1 {
            properties[0].external_id.as_str()
        } else {
            "<batch>"
        };
        qb.build()
            .execute(&self.pool)
            .await
            .map_err(|e| classify(e, label))?;

        debug!("Inserted {} properties", ids.len());
        Ok(ids)
    }

    async fn update_images(
        &self,
        id: Uuid,
        primary_image_url: Option<&str>,
        gallery_urls: Option<&[String]>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE properties
            SET primary_image_url = COALESCE($2, primary_image_url),
                gallery_urls = COALESCE($3, gallery_urls),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(primary_image_url)
        .bind(gallery_urls.map(<[String]>::to_vec))
        .execute(&self.pool)
        .await
        .map_err(|e| classify(e, &id.to_string()))?;

        Ok(())
    }

    async fn count(&self, filter: CountFilter) -> Result<u64, StoreError> {
        let sql = match filter {
            CountFilter::All => "SELECT COUNT(*) FROM properties",
            CountFilter::WithExternalId => {
                "SELECT COUNT(*) FROM properties WHERE external_id <> ''"
            },
            CountFilter::WithPrimaryImage => {
                "SELECT COUNT(*) FROM properties WHERE primary_image_url IS NOT NULL"
            },
            CountFilter::WithGallery => {
                "SELECT COUNT(*) FROM properties WHERE cardinality(gallery_urls) > 0"
            },
            CountFilter::Published => {
                "SELECT COUNT(*) FROM properties WHERE status = 'published'"
            },
        };

        let n: i64 = sqlx::query_scalar(sql)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| classify(e, ""))?;
        Ok(u64::try_from(n).unwrap_or_default())
    }

    async fn list_missing_primary_image(&self) -> Result<Vec<StoredPropertyRef>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, external_id
            FROM properties
            WHERE primary_image_url IS NULL
            ORDER BY created_at, external_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| classify(e, ""))?;

        rows.into_iter()
            .map(|r| {
                Ok(StoredPropertyRef {
                    id: r.try_get("id").map_err(|e| classify(e, ""))?,
                    external_id: r.try_get("external_id").map_err(|e| classify(e, ""))?,
                })
            })
            .collect()
    }
}
