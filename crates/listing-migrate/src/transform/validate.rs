//! Schema validation of canonical records
//!
//! Errors reject the row (it is skipped and recorded). Warnings flag
//! recommended fields that are missing and never reject anything.

use serde::Serialize;
use thiserror::Error;

use super::normalize::{MAX_BATHROOMS, MAX_BEDROOMS, MAX_MONTHLY_RENT, MAX_SQUARE_FEET};
use crate::models::{CanonicalProperty, ImageRefs};

pub const MAX_TITLE_LEN: usize = 255;

/// Row-level validation failure with every problem found
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{}", .issues.join("; "))]
pub struct ValidationError {
    pub issues: Vec<String>,
}

/// Check a canonical record against the target schema
pub fn validate(property: &CanonicalProperty) -> Result<(), ValidationError> {
    let mut issues = Vec::new();

    if property.title.trim().is_empty() {
        issues.push("title: required".to_string());
    } else if property.title.chars().count() > MAX_TITLE_LEN {
        issues.push(format!("title: longer than {} characters", MAX_TITLE_LEN));
    }
    if property.city.trim().is_empty() {
        issues.push("city: required".to_string());
    }
    if property.state.trim().is_empty() {
        issues.push("state: required".to_string());
    }

    if let Some(bedrooms) = property.bedrooms {
        if !(0.0..=MAX_BEDROOMS).contains(&f64::from(bedrooms)) {
            issues.push(format!("bedrooms: {} out of range", bedrooms));
        }
    }
    if let Some(bathrooms) = property.bathrooms {
        if !(0.0..=MAX_BATHROOMS).contains(&bathrooms) {
            issues.push(format!("bathrooms: {} out of range", bathrooms));
        }
    }
    if let Some(sqft) = property.square_feet {
        if !(1..=MAX_SQUARE_FEET).contains(&i64::from(sqft)) {
            issues.push(format!("square_feet: {} out of range", sqft));
        }
    }
    if let Some(rent) = property.monthly_rent {
        if !(0.0..=MAX_MONTHLY_RENT).contains(&rent) {
            issues.push(format!("monthly_rent: {} out of range", rent));
        }
    }
    if let Some(email) = &property.landlord_email {
        if !email.contains('@') {
            issues.push("landlord_email: invalid".to_string());
        }
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(ValidationError { issues })
    }
}

/// Recommended-but-optional fields that are missing
pub fn warnings(property: &CanonicalProperty, images: &ImageRefs) -> Vec<String> {
    let mut warnings = Vec::new();

    if property.square_feet.is_none() {
        warnings.push("square_feet: missing".to_string());
    }
    if property.description.is_none() {
        warnings.push("description: missing".to_string());
    }
    if property.monthly_rent.is_none() {
        warnings.push("monthly_rent: missing".to_string());
    }
    if images.primary.is_none() {
        warnings.push("primary_image: missing".to_string());
    }
    if property.latitude.is_none() || property.longitude.is_none() {
        warnings.push("coordinates: missing".to_string());
    }
    if property.street.is_empty() {
        warnings.push("street: missing".to_string());
    }
    if property.postal_code.is_empty() {
        warnings.push("postal_code: missing".to_string());
    }
    if property.external_id.is_empty() {
        warnings.push("external_id: empty".to_string());
    }

    warnings
}
