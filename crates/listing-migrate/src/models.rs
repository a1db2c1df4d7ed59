//! Core data model: raw export rows and the canonical property record

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Column names of the legacy listings export.
///
/// The transformer pattern-matches on these names, so they are part of the
/// input contract.
pub mod columns {
    pub const ID: &str = "ID";
    pub const TITLE: &str = "Title";
    pub const DESCRIPTION: &str = "Description";
    pub const ADDRESS: &str = "Address";
    pub const STREET: &str = "Street";
    pub const CITY: &str = "City";
    pub const STATE: &str = "State";
    pub const ZIP: &str = "Zip";
    pub const COUNTRY: &str = "Country";
    pub const LATITUDE: &str = "Latitude";
    pub const LONGITUDE: &str = "Longitude";
    pub const UNIT_TYPE: &str = "Unit Type";
    pub const BEDROOMS: &str = "Bedrooms";
    pub const BATHROOMS: &str = "Bathrooms";
    pub const SQUARE_FOOTAGE: &str = "Square Footage";
    pub const LAUNDRY: &str = "Laundry";
    pub const PETS: &str = "Pets";
    pub const PARKING: &str = "Parking";
    pub const FURNISHED: &str = "Furnished";
    pub const AMENITIES: &str = "Amenities";
    pub const LANDLORD_NAME: &str = "Landlord Name";
    pub const LANDLORD_EMAIL: &str = "Landlord Email";
    pub const LANDLORD_PHONE: &str = "Landlord Phone";
    pub const LISTING_URL: &str = "Listing URL";
    pub const RENT: &str = "Rent";
    pub const IMAGE: &str = "Image";
    pub const GALLERY: &str = "Gallery";
    pub const STATUS: &str = "Status";
    pub const FEATURED: &str = "Featured";
}

/// One row of the legacy export, keyed by column name.
///
/// Every field is optional in practice; nothing about a row is assumed
/// well-formed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    fields: BTreeMap<String, String>,
}

impl RawRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a record from `(column, value)` pairs
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            fields: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(column.into(), value.into());
    }

    /// Trimmed value of a column; `None` when absent or blank.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields
            .get(column)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// Raw value of a column exactly as exported.
    pub fn get_raw(&self, column: &str) -> Option<&str> {
        self.fields.get(column).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Publication state of a listing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingStatus {
    Draft,
    #[default]
    Published,
    Archived,
}

impl ListingStatus {
    pub fn as_str(&self) -> &str {
        match self {
            ListingStatus::Draft => "draft",
            ListingStatus::Published => "published",
            ListingStatus::Archived => "archived",
        }
    }

    /// Lenient parse used for the export's free-text status column
    pub fn parse_lenient(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "draft" | "hidden" | "unpublished" => Some(ListingStatus::Draft),
            "published" | "live" | "active" | "visible" => Some(ListingStatus::Published),
            "archived" | "inactive" | "rented" => Some(ListingStatus::Archived),
            _ => None,
        }
    }
}

impl From<String> for ListingStatus {
    fn from(s: String) -> Self {
        ListingStatus::parse_lenient(&s).unwrap_or_default()
    }
}

impl std::fmt::Display for ListingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized listing, the migration target.
///
/// The two media fields start out `None` and are only populated by the image
/// stage after at least one transfer succeeded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalProperty {
    /// Legacy identifier, the sole de-duplication key across runs
    pub external_id: String,

    pub title: String,
    pub description: Option<String>,

    pub street: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub country: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,

    pub unit_type: Option<String>,
    pub bedrooms: Option<i32>,
    pub bathrooms: Option<f64>,
    pub square_feet: Option<i32>,

    pub laundry: Option<String>,
    pub pet_policy: Option<String>,
    pub parking: Option<String>,
    pub furnished: Option<String>,
    pub amenities: Vec<String>,

    pub landlord_name: Option<String>,
    pub landlord_email: Option<String>,
    pub landlord_phone: Option<String>,
    pub listing_url: Option<String>,

    pub monthly_rent: Option<f64>,

    pub primary_image_url: Option<String>,
    pub gallery_urls: Option<Vec<String>>,

    pub status: ListingStatus,
    pub featured: bool,
}

impl CanonicalProperty {
    /// Empty record for an external identifier; every other field takes its
    /// schema default.
    pub fn empty(external_id: impl Into<String>) -> Self {
        Self {
            external_id: external_id.into(),
            title: crate::transform::DEFAULT_TITLE.to_string(),
            description: None,
            street: String::new(),
            city: String::new(),
            state: String::new(),
            postal_code: String::new(),
            country: None,
            latitude: None,
            longitude: None,
            unit_type: None,
            bedrooms: None,
            bathrooms: None,
            square_feet: None,
            laundry: None,
            pet_policy: None,
            parking: None,
            furnished: None,
            amenities: Vec::new(),
            landlord_name: None,
            landlord_email: None,
            landlord_phone: None,
            listing_url: None,
            monthly_rent: None,
            primary_image_url: None,
            gallery_urls: None,
            status: ListingStatus::default(),
            featured: false,
        }
    }
}

/// Image references carried by a raw row, recovered for the image stage
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageRefs {
    pub primary: Option<String>,
    pub gallery: Vec<String>,
}

impl ImageRefs {
    pub fn is_empty(&self) -> bool {
        self.primary.is_none() && self.gallery.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_record_get_trims_and_hides_blank() {
        let record = RawRecord::from_pairs([("City", "  Chesterfield "), ("State", "   ")]);

        assert_eq!(record.get("City"), Some("Chesterfield"));
        assert_eq!(record.get("State"), None);
        assert_eq!(record.get_raw("State"), Some("   "));
        assert_eq!(record.get("Zip"), None);
    }

    #[test]
    fn test_listing_status_parse() {
        assert_eq!(ListingStatus::parse_lenient("Published"), Some(ListingStatus::Published));
        assert_eq!(ListingStatus::parse_lenient(" draft "), Some(ListingStatus::Draft));
        assert_eq!(ListingStatus::parse_lenient("ARCHIVED"), Some(ListingStatus::Archived));
        assert_eq!(ListingStatus::parse_lenient("unknown"), None);
        assert_eq!(ListingStatus::from("nonsense".to_string()), ListingStatus::Published);
    }

    #[test]
    fn test_listing_status_serde() {
        let json = serde_json::to_string(&ListingStatus::Archived).unwrap();
        assert_eq!(json, "\"archived\"");
    }
}
