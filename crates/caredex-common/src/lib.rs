//! Common utilities and patterns shared across Caredex crates
//!
//! This crate provides shared functionality to reduce duplication across
//! the various Caredex components: correlation ids for tracing a request
//! through the embedding pipeline, error-context helpers, environment
//! bootstrap and log subscriber installation.

pub mod correlation;
pub mod error;
pub mod init;
pub mod logging;

pub use correlation::CorrelationId;
pub use error::{CommonError, decode_json};
pub use init::initialize_environment;
pub use logging::{LogFormat, LoggingError, init_logging};
