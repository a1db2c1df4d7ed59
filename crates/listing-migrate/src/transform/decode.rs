//! Decoding of JSON-in-text cells
//!
//! Several export columns hold serialized structures (objects, single-element
//! tag arrays) and sometimes plain text instead. Every such cell goes through
//! [`decode`] first: either it parses as JSON and is handled structurally, or
//! it is kept as an opaque string. Nothing outside this module inspects the
//! raw JSON text.

use serde_json::{Map, Value};

/// A cell after the structured-or-text decode step
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue<'a> {
    /// The cell parsed as JSON
    Structured(Value),
    /// The cell is plain text (already trimmed)
    Text(&'a str),
}

/// Decode a cell as JSON, falling back to its trimmed text
pub fn decode(raw: &str) -> FieldValue<'_> {
    let trimmed = raw.trim();
    match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => FieldValue::Structured(value),
        Err(_) => FieldValue::Text(trimmed),
    }
}

/// Decode a cell that should hold a JSON object
pub fn decode_object(raw: &str) -> Option<Map<String, Value>> {
    match decode(raw) {
        FieldValue::Structured(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Scalar out of a single-element tag array.
///
/// `["Furnished"]` yields `Furnished`; a bare `Furnished` is returned as is.
/// An empty list is not a tag array, so the raw text is the value.
pub fn tag_value(raw: &str) -> Option<String> {
    match decode(raw) {
        FieldValue::Structured(Value::Array(items)) => match items.first() {
            Some(first) => scalar_string(first),
            None => non_empty(raw),
        },
        FieldValue::Structured(other) => scalar_string(&other).or_else(|| non_empty(raw)),
        FieldValue::Text(text) => non_empty(text),
    }
}

/// List out of either a JSON array or comma-separated text.
pub fn string_list(raw: &str) -> Vec<String> {
    match decode(raw) {
        FieldValue::Structured(Value::Array(items)) => {
            items.iter().filter_map(scalar_string).collect()
        },
        FieldValue::Structured(Value::String(text)) => split_commas(&text),
        FieldValue::Structured(_) | FieldValue::Text(_) => split_commas(raw),
    }
}

/// Comma-split, trim, drop empties
pub fn split_commas(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// String form of a scalar JSON value; `None` for blanks, nulls and containers
pub fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => non_empty(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// Number out of a JSON number or a numeric string
pub fn scalar_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Image reference out of a cell: a bare string, an object with `src`/`url`,
/// or the first element of an array of either.
pub fn image_reference(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => non_empty(s),
        Value::Object(map) => map
            .get("src")
            .or_else(|| map.get("url"))
            .and_then(scalar_string),
        Value::Array(items) => items.first().and_then(image_reference),
        _ => None,
    }
}

fn non_empty(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
