//! Field-level normalization rules
//!
//! Each function takes the trimmed cell (or `None` when the column is absent
//! or blank) and returns the canonical value. Unparseable or out-of-range
//! input becomes `None`; nothing here fails.

use serde_json::{Map, Value};

use super::decode::{self, FieldValue};

pub const MAX_BEDROOMS: f64 = 50.0;
pub const MAX_BATHROOMS: f64 = 50.0;
pub const MAX_SQUARE_FEET: i64 = 1_000_000;
pub const MAX_MONTHLY_RENT: f64 = 1_000_000.0;

/// Address parts recovered from the composite `Address` cell
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompositeLocation {
    pub formatted: Option<String>,
    pub street: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl CompositeLocation {
    /// Decode the composite cell. `None` when the cell is not a JSON object.
    pub fn from_cell(raw: &str) -> Option<Self> {
        let map = decode::decode_object(raw)?;

        let formatted = str_field(&map, "formatted");
        let street = street_from_parts(&map).or_else(|| {
            formatted
                .as_deref()
                .and_then(|f| f.split(',').next())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        });

        let state = map
            .get("subdivisions")
            .and_then(Value::as_array)
            .and_then(|subs| subs.first())
            .and_then(|first| first.get("code"))
            .and_then(decode::scalar_string);

        let location = map.get("location").and_then(Value::as_object);
        let latitude = location
            .and_then(|l| l.get("latitude"))
            .and_then(decode::scalar_f64);
        let longitude = location
            .and_then(|l| l.get("longitude"))
            .and_then(decode::scalar_f64);

        Some(Self {
            formatted,
            street,
            city: str_field(&map, "city"),
            state,
            postal_code: str_field(&map, "postalCode").map(|p| postal_code_prefix(&p)),
            country: str_field(&map, "country"),
            latitude,
            longitude,
        })
    }
}

fn str_field(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.get(key).and_then(decode::scalar_string)
}

fn street_from_parts(map: &Map<String, Value>) -> Option<String> {
    let parts = map.get("streetAddress")?.as_object()?;
    let number = str_field(parts, "number");
    let name = str_field(parts, "name");

    match (number, name) {
        (Some(number), Some(name)) => Some(format!("{} {}", number, name)),
        (None, Some(name)) => Some(name),
        _ => None,
    }
}

/// Keep only the segment before the first hyphen (`63011-4246` -> `63011`)
pub fn postal_code_prefix(postal: &str) -> String {
    postal
        .split('-')
        .next()
        .unwrap_or_default()
        .trim()
        .to_string()
}

/// Square footage with every non-digit stripped (`888 SF` -> 888)
pub fn square_feet(raw: Option<&str>) -> Option<i32> {
    let digits: String = raw?.chars().filter(char::is_ascii_digit).collect();
    let value: i64 = digits.parse().ok()?;
    if (1..=MAX_SQUARE_FEET).contains(&value) {
        i32::try_from(value).ok()
    } else {
        None
    }
}

/// Whole bedroom count in 0..=50; `Studio` counts as zero
pub fn bedrooms(raw: Option<&str>) -> Option<i32> {
    let raw = raw?;
    if raw.eq_ignore_ascii_case("studio") {
        return Some(0);
    }

    let value = leading_number(raw)?;
    if value.fract() != 0.0 || !(0.0..=MAX_BEDROOMS).contains(&value) {
        return None;
    }
    Some(value as i32)
}

/// Bathroom count in 0..=50, half steps allowed
pub fn bathrooms(raw: Option<&str>) -> Option<f64> {
    let value = leading_number(raw?)?;
    if (value * 2.0).fract() != 0.0 || !(0.0..=MAX_BATHROOMS).contains(&value) {
        return None;
    }
    Some(value)
}

/// Monthly rent with currency symbols and thousands separators stripped
pub fn monthly_rent(raw: Option<&str>) -> Option<f64> {
    let cleaned: String = raw?
        .chars()
        .filter(|c| !matches!(c, '$' | ',' | ' '))
        .collect();
    let value = leading_number(&cleaned)?;
    if (0.0..=MAX_MONTHLY_RENT).contains(&value) {
        Some(value)
    } else {
        None
    }
}

/// Parse a coordinate and keep it only within `-bound..=bound`
pub fn coordinate(value: Option<f64>, bound: f64) -> Option<f64> {
    value.filter(|v| v.is_finite() && (-bound..=bound).contains(v))
}

/// Parse a plain numeric coordinate cell
pub fn parse_f64(raw: Option<&str>) -> Option<f64> {
    raw?.trim().parse().ok()
}

/// Leading numeric part of a cell (`2.5 baths` -> 2.5)
fn leading_number(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    let end = trimmed
        .char_indices()
        .find(|(i, c)| !(c.is_ascii_digit() || *c == '.' || (*i == 0 && *c == '-')))
        .map(|(i, _)| i)
        .unwrap_or(trimmed.len());
    trimmed[..end].parse().ok()
}

pub fn email(raw: Option<&str>) -> Option<String> {
    raw.filter(|v| v.contains('@')).map(str::to_string)
}

pub fn phone(raw: Option<&str>) -> Option<String> {
    raw.filter(|v| !v.is_empty()).map(str::to_string)
}

pub fn url(raw: Option<&str>) -> Option<String> {
    raw.filter(|v| {
        let lower = v.to_ascii_lowercase();
        lower.starts_with("http://") || lower.starts_with("https://")
    })
    .map(str::to_string)
}

/// True only for JSON `true` or the strings `true`/`1` (any case)
pub fn featured(raw: Option<&str>) -> bool {
    let Some(raw) = raw else {
        return false;
    };
    match decode::decode(raw) {
        FieldValue::Structured(Value::Bool(b)) => b,
        FieldValue::Structured(Value::Number(n)) => n.as_i64() == Some(1),
        FieldValue::Structured(Value::String(s)) => truthy(&s),
        FieldValue::Structured(_) => false,
        FieldValue::Text(text) => truthy(text),
    }
}

fn truthy(text: &str) -> bool {
    let text = text.trim();
    text.eq_ignore_ascii_case("true") || text == "1"
}
