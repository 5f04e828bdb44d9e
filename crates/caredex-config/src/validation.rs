//! Configuration validation framework

use crate::{ConfigError, ConfigResult};
use regex::Regex;

/// Get URL validation regex - returns None if regex compilation fails
fn get_url_regex() -> Option<&'static Regex> {
    static URL_REGEX: std::sync::OnceLock<Option<Regex>> = std::sync::OnceLock::new();
    URL_REGEX
        .get_or_init(|| Regex::new(r"^https?://[^\s/$.?#].[^\s]*$").ok())
        .as_ref()
}

/// Trait for validating configuration values
pub trait Validate {
    /// Validate this configuration object
    ///
    /// # Errors
    /// Returns validation errors if the configuration is invalid
    fn validate(&self) -> ConfigResult<()>;
}

/// Validate a URL string
///
/// # Errors
/// Returns `ConfigError::InvalidUrl` if the URL format is invalid
pub fn validate_url(url: &str, field_name: &str) -> ConfigResult<()> {
    let valid = get_url_regex().map_or_else(
        || url.starts_with("http://") || url.starts_with("https://"),
        |regex| regex.is_match(url),
    );

    if valid {
        Ok(())
    } else {
        Err(ConfigError::InvalidUrl {
            field: field_name.to_string(),
            url: url.to_string(),
        })
    }
}

/// Validate a value is within a range
///
/// # Errors
/// Returns `ConfigError::OutOfRange` if value is outside the specified range
pub fn validate_range(value: u64, min: u64, max: u64, field_name: &str) -> ConfigResult<()> {
    if value < min || value > max {
        Err(ConfigError::OutOfRange {
            field: field_name.to_string(),
            value,
            min,
            max,
        })
    } else {
        Ok(())
    }
}

/// Validate a floating point value is finite and within `[min, max]`
///
/// # Errors
/// Returns `ConfigError::OutOfRangeFloat` if the value is NaN, infinite or outside the range
pub fn validate_float_range(value: f64, min: f64, max: f64, field_name: &str) -> ConfigResult<()> {
    if value.is_finite() && value >= min && value <= max {
        Ok(())
    } else {
        Err(ConfigError::OutOfRangeFloat {
            field: field_name.to_string(),
            value,
            min,
            max,
        })
    }
}

/// Validate a string is not empty
///
/// # Errors
/// Returns `ConfigError::MissingField` if the string is empty or whitespace-only
pub fn validate_non_empty(value: &str, field_name: &str) -> ConfigResult<()> {
    if value.trim().is_empty() {
        Err(ConfigError::MissingField {
            field: field_name.to_string(),
        })
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_url() {
        assert!(validate_url("https://generativelanguage.googleapis.com", "gemini").is_ok());
        assert!(validate_url("http://127.0.0.1:8080", "store").is_ok());
        assert!(matches!(
            validate_url("ftp://example.com", "store"),
            Err(ConfigError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_validate_float_range_rejects_nan() {
        assert!(validate_float_range(0.8, 0.0, 1.0, "warning").is_ok());
        assert!(validate_float_range(f64::NAN, 0.0, 1.0, "warning").is_err());
        assert!(validate_float_range(1.5, 0.0, 1.0, "warning").is_err());
    }

    #[test]
    fn test_validate_range_bounds_inclusive() {
        assert!(validate_range(1, 1, 10, "x").is_ok());
        assert!(validate_range(10, 1, 10, "x").is_ok());
        assert!(validate_range(11, 1, 10, "x").is_err());
    }
}
