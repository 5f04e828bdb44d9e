//! Error types for entity store operations

use caredex_common::CommonError;
use caredex_embeddings::EmbeddingError;
use thiserror::Error;
use uuid::Uuid;

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Data store is not configured: {0}")]
    NotConfigured(String),

    #[error("{operation} failed with HTTP {status}: {message}")]
    Http {
        operation: String,
        status: u16,
        message: String,
    },

    #[error("{operation} could not reach the data store: {message}")]
    Transport { operation: String, message: String },

    #[error("Entity {id} not found")]
    NotFound { id: Uuid },

    #[error("Response parsing failed: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Other error: {0}")]
    Other(String),
}

impl StoreError {
    /// Whether retrying the same call later could succeed
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

impl CommonError for StoreError {
    fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    fn parse_error(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    fn other_error(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}

impl From<StoreError> for EmbeddingError {
    fn from(err: StoreError) -> Self {
        Self::Ledger(err.to_string())
    }
}
