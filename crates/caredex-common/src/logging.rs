//! Tracing subscriber installation for binaries
//!
//! Libraries only emit `tracing` events; the binary decides where they go.

use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Output format for log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable single-line output
    #[default]
    Pretty,
    /// Newline-delimited JSON for log shippers
    Json,
}

/// Errors raised while installing the global subscriber
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Invalid log filter '{filter}': {message}")]
    InvalidFilter { filter: String, message: String },

    #[error("Global subscriber already installed: {0}")]
    AlreadyInstalled(String),
}

/// Install the global tracing subscriber
///
/// `RUST_LOG` takes precedence over `default_level` when set.
///
/// # Errors
/// Returns `LoggingError` if the filter cannot be parsed or a subscriber is
/// already installed
pub fn init_logging(default_level: &str, format: LogFormat) -> Result<(), LoggingError> {
    let filter = match std::env::var("RUST_LOG") {
        Ok(value) if !value.trim().is_empty() => EnvFilter::try_new(&value).map_err(|e| {
            LoggingError::InvalidFilter {
                filter: value.clone(),
                message: e.to_string(),
            }
        })?,
        _ => EnvFilter::try_new(default_level).map_err(|e| LoggingError::InvalidFilter {
            filter: default_level.to_string(),
            message: e.to_string(),
        })?,
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true);

    let result = match format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };

    result.map_err(|e| LoggingError::AlreadyInstalled(e.to_string()))
}
