//! Raw export row -> canonical property record
//!
//! [`transform`] is a pure mapping with no I/O; the same [`RawRecord`] always
//! yields the same [`CanonicalProperty`]. [`prepare`] adds schema validation
//! and the warning list used by the validate report. Media fields are always
//! left empty here: the image stage fills them in later, and the original
//! image references are recovered separately with [`image_refs`].

pub mod decode;
pub mod normalize;
pub mod validate;

pub use validate::ValidationError;

use crate::models::{columns, CanonicalProperty, ImageRefs, ListingStatus, RawRecord};
use crate::parser::ParsedRow;
use decode::FieldValue;
use normalize::CompositeLocation;

/// Title used when the export has none
pub const DEFAULT_TITLE: &str = "Untitled Property";

/// A row that passed validation, ready for the writer
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRow {
    pub row_number: usize,
    pub property: CanonicalProperty,
    pub images: ImageRefs,
    pub warnings: Vec<String>,
}

/// Transform and validate one parsed row
pub fn prepare(row: &ParsedRow) -> Result<PreparedRow, ValidationError> {
    let property = transform(&row.record);
    validate::validate(&property)?;

    let images = image_refs(&row.record);
    let warnings = validate::warnings(&property, &images);

    Ok(PreparedRow {
        row_number: row.row_number,
        property,
        images,
        warnings,
    })
}

/// Map a raw row onto the canonical schema
pub fn transform(raw: &RawRecord) -> CanonicalProperty {
    let location = raw
        .get(columns::ADDRESS)
        .and_then(CompositeLocation::from_cell)
        .unwrap_or_default();

    let text = |column: &str| raw.get(column).map(str::to_string);
    let tag = |column: &str| raw.get(column).and_then(decode::tag_value);

    let latitude = location
        .latitude
        .or_else(|| normalize::parse_f64(raw.get(columns::LATITUDE)));
    let longitude = location
        .longitude
        .or_else(|| normalize::parse_f64(raw.get(columns::LONGITUDE)));

    let status = tag(columns::STATUS)
        .and_then(|s| ListingStatus::parse_lenient(&s))
        .unwrap_or_default();

    CanonicalProperty {
        external_id: raw.get(columns::ID).unwrap_or_default().to_string(),
        title: text(columns::TITLE).unwrap_or_else(|| DEFAULT_TITLE.to_string()),
        description: text(columns::DESCRIPTION),

        street: location
            .street
            .or_else(|| text(columns::STREET))
            .unwrap_or_default(),
        city: location
            .city
            .or_else(|| text(columns::CITY))
            .unwrap_or_default(),
        state: location
            .state
            .or_else(|| text(columns::STATE))
            .unwrap_or_default(),
        postal_code: location
            .postal_code
            .or_else(|| text(columns::ZIP))
            .unwrap_or_default(),
        country: location.country.or_else(|| text(columns::COUNTRY)),
        latitude: normalize::coordinate(latitude, 90.0),
        longitude: normalize::coordinate(longitude, 180.0),

        unit_type: tag(columns::UNIT_TYPE),
        bedrooms: normalize::bedrooms(raw.get(columns::BEDROOMS)),
        bathrooms: normalize::bathrooms(raw.get(columns::BATHROOMS)),
        square_feet: normalize::square_feet(raw.get(columns::SQUARE_FOOTAGE)),

        laundry: tag(columns::LAUNDRY),
        pet_policy: tag(columns::PETS),
        parking: tag(columns::PARKING),
        furnished: tag(columns::FURNISHED),
        amenities: raw
            .get(columns::AMENITIES)
            .map(decode::string_list)
            .unwrap_or_default(),

        landlord_name: text(columns::LANDLORD_NAME),
        landlord_email: normalize::email(raw.get(columns::LANDLORD_EMAIL)),
        landlord_phone: normalize::phone(raw.get(columns::LANDLORD_PHONE)),
        listing_url: normalize::url(raw.get(columns::LISTING_URL)),

        monthly_rent: normalize::monthly_rent(raw.get(columns::RENT)),

        primary_image_url: None,
        gallery_urls: None,

        status,
        featured: normalize::featured(raw.get(columns::FEATURED)),
    }
}

/// Original image references of a row, in gallery order
pub fn image_refs(raw: &RawRecord) -> ImageRefs {
    let primary = raw.get(columns::IMAGE).and_then(|cell| match decode::decode(cell) {
        FieldValue::Structured(value) => decode::image_reference(&value),
        FieldValue::Text(text) => Some(text.to_string()),
    });

    let gallery = raw
        .get(columns::GALLERY)
        .map(|cell| match decode::decode(cell) {
            FieldValue::Structured(serde_json::Value::Array(items)) => items
                .iter()
                .filter_map(decode::image_reference)
                .collect(),
            FieldValue::Structured(value) => decode::image_reference(&value).into_iter().collect(),
            FieldValue::Text(text) => text
                .split([',', ';', '\n'])
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        })
        .unwrap_or_default();

    ImageRefs { primary, gallery }
}
