//! Configuration error types

use thiserror::Error;

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Invalid URL format
    #[error("Invalid URL for {field}: {url}")]
    InvalidUrl { field: String, url: String },

    /// Missing required field
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    /// Invalid range value
    #[error("Value {value} is out of range for {field} (expected {min}-{max})")]
    OutOfRange {
        field: String,
        value: u64,
        min: u64,
        max: u64,
    },

    /// Fractional value outside the accepted interval
    #[error("Value {value} is out of range for {field} (expected {min}-{max})")]
    OutOfRangeFloat {
        field: String,
        value: f64,
        min: f64,
        max: f64,
    },

    /// Provider name that no client exists for
    #[error("Unknown embedding provider '{name}' (expected one of: gemini, openai)")]
    UnknownProvider { name: String },

    /// No embedding provider has credentials; nothing can be generated
    #[error(
        "No embedding provider credentials configured: set GEMINI_API_KEY and/or OPENAI_API_KEY"
    )]
    NoProviderCredentials,

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    YamlParsing(#[from] serde_yaml::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error message
    #[error("Configuration error: {message}")]
    Generic { message: String },
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;
