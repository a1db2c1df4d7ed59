//! Typed environment variable lookups
//!
//! Unset and blank variables count as absent. A variable that is set but does
//! not parse is a [`CommonError::Config`] naming the key, never a silent
//! fallback to the default.

use std::fmt::Display;
use std::str::FromStr;

use crate::error::{CommonError, Result};

/// Trimmed value of `key`; `None` when unset or blank
pub fn var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse `key` if it is set
pub fn parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    var(key)
        .map(|raw| {
            raw.parse().map_err(|e| {
                CommonError::config(format!("{} has invalid value '{}': {}", key, raw, e))
            })
        })
        .transpose()
}

/// Parse `key`, or `default` when unset
pub fn parse_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    Ok(parse(key)?.unwrap_or(default))
}

/// Boolean flag accepting true/false, 1/0, yes/no and on/off
pub fn flag_or(key: &str, default: bool) -> Result<bool> {
    let Some(raw) = var(key) else {
        return Ok(default);
    };
    match raw.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(CommonError::config(format!(
            "{} has invalid value '{}': expected true or false",
            key, raw
        ))),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    // Each test owns its keys, so no serialization is needed

    #[test]
    fn test_blank_counts_as_unset() {
        std::env::set_var("LISTING_COMMON_TEST_BLANK", "   ");
        assert_eq!(var("LISTING_COMMON_TEST_BLANK"), None);
        assert_eq!(parse_or("LISTING_COMMON_TEST_BLANK", 7usize).unwrap(), 7);
        std::env::remove_var("LISTING_COMMON_TEST_BLANK");
    }

    #[test]
    fn test_parse_trims_and_rejects_garbage() {
        std::env::set_var("LISTING_COMMON_TEST_NUM", " 25 ");
        assert_eq!(parse::<usize>("LISTING_COMMON_TEST_NUM").unwrap(), Some(25));

        std::env::set_var("LISTING_COMMON_TEST_NUM", "twenty");
        let err = parse_or("LISTING_COMMON_TEST_NUM", 50usize).unwrap_err();
        assert!(matches!(err, CommonError::Config(_)));
        assert!(err.to_string().contains("LISTING_COMMON_TEST_NUM"));
        std::env::remove_var("LISTING_COMMON_TEST_NUM");
    }

    #[test]
    fn test_flag_spellings() {
        std::env::set_var("LISTING_COMMON_TEST_FLAG", "Yes");
        assert!(flag_or("LISTING_COMMON_TEST_FLAG", false).unwrap());
        std::env::set_var("LISTING_COMMON_TEST_FLAG", "0");
        assert!(!flag_or("LISTING_COMMON_TEST_FLAG", true).unwrap());
        std::env::set_var("LISTING_COMMON_TEST_FLAG", "maybe");
        assert!(flag_or("LISTING_COMMON_TEST_FLAG", true).is_err());
        std::env::remove_var("LISTING_COMMON_TEST_FLAG");

        assert!(flag_or("LISTING_COMMON_TEST_FLAG_UNSET", true).unwrap());
    }
}
