//! Common error handling utilities and patterns
//!
//! This module provides traits to reduce duplication in error handling
//! across Caredex crates while maintaining flexibility for crate-specific needs.

/// Common error variants that appear across multiple crates
///
/// Each crate-level error enum implements this so shared helpers (config
/// loading, HTTP plumbing) can build the right variant without knowing the
/// concrete type.
pub trait CommonError: std::error::Error + Send + Sync + 'static {
    /// Create a configuration error variant
    fn config_error(msg: impl Into<String>) -> Self
    where
        Self: Sized;

    /// Create a parsing/serialization error variant
    fn parse_error(msg: impl Into<String>) -> Self
    where
        Self: Sized;

    /// Create a generic "other" error variant
    fn other_error(msg: impl Into<String>) -> Self
    where
        Self: Sized;
}

/// Decode a JSON response body into `T`, mapping failures to the caller's
/// parse error variant
///
/// # Errors
/// Returns `E::parse_error` naming `what` when the body is not valid JSON for `T`
pub fn decode_json<T, E>(body: &str, what: &str) -> Result<T, E>
where
    T: serde::de::DeserializeOwned,
    E: CommonError,
{
    serde_json::from_str(body).map_err(|e| E::parse_error(format!("{what}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use thiserror::Error;

    #[derive(Debug, Error)]
    enum TestError {
        #[error("Configuration error: {0}")]
        Configuration(String),
        #[error("Parse error: {0}")]
        Parse(String),
        #[error("Other error: {0}")]
        Other(String),
    }

    impl CommonError for TestError {
        fn config_error(msg: impl Into<String>) -> Self {
            Self::Configuration(msg.into())
        }

        fn parse_error(msg: impl Into<String>) -> Self {
            Self::Parse(msg.into())
        }

        fn other_error(msg: impl Into<String>) -> Self {
            Self::Other(msg.into())
        }
    }

    #[test]
    fn test_common_error_trait() {
        let config_err = TestError::config_error("missing GEMINI_API_KEY");
        assert_eq!(
            config_err.to_string(),
            "Configuration error: missing GEMINI_API_KEY"
        );

        let parse_err = TestError::parse_error("bad json");
        assert_eq!(parse_err.to_string(), "Parse error: bad json");
    }

    #[test]
    fn test_decode_json_maps_to_parse_error() {
        let ok: Result<Vec<f32>, TestError> = decode_json("[0.5, 1.0]", "vector");
        assert_eq!(ok.unwrap(), vec![0.5, 1.0]);

        let bad: Result<Vec<f32>, TestError> = decode_json("{", "vector");
        assert!(matches!(bad, Err(TestError::Parse(msg)) if msg.starts_with("vector:")));
    }
}
