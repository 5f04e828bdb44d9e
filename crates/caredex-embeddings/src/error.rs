//! Error types for the caredex-embeddings crate
//!
//! The variants follow the pipeline's failure taxonomy: caller errors,
//! terminal provider errors, transient provider errors that are retried,
//! budget gating, and the aggregate raised after every provider failed.

use crate::budget::BudgetCeiling;
use caredex_common::CommonError;
use caredex_config::ProviderKind;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for embedding operations
pub type EmbedResult<T> = Result<T, EmbeddingError>;

/// How the retry policy should treat an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Server errors, timeouts, connection resets
    Transient,
    /// HTTP 429 that is not quota exhaustion; retried with a longer backoff
    RateLimited,
    /// Never retried
    Terminal,
}

/// One provider's terminal failure, kept for the aggregate error
#[derive(Debug)]
pub struct ProviderFailure {
    pub provider: ProviderKind,
    pub error: EmbeddingError,
}

impl fmt::Display for ProviderFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.provider, self.error)
    }
}

fn join_failures(failures: &[ProviderFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Comprehensive error type for embedding operations
#[derive(Error, Debug)]
pub enum EmbeddingError {
    /// Empty or oversized text, or otherwise unusable caller input
    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },

    /// Provider rejected the request shape (HTTP 400 and other 4xx)
    #[error("{provider} rejected the request (HTTP {status}): {message}")]
    BadRequest {
        provider: ProviderKind,
        status: u16,
        message: String,
    },

    /// Bad or missing credentials (HTTP 401/403)
    #[error("{provider} authentication failed (HTTP {status}): {message}")]
    AuthFailure {
        provider: ProviderKind,
        status: u16,
        message: String,
    },

    /// Account quota or billing limit reached; retrying will not help
    #[error(
        "{provider} quota exhausted: {message} (check the account's plan or billing limits, or route traffic to another provider)"
    )]
    QuotaExhausted {
        provider: ProviderKind,
        message: String,
    },

    /// Transient rate limit (HTTP 429)
    #[error("{provider} rate limited: {message}")]
    RateLimited {
        provider: ProviderKind,
        retry_after: Option<Duration>,
        message: String,
    },

    /// Server error, timeout or connection failure
    #[error("{provider} transient failure: {message}")]
    TransientProvider {
        provider: ProviderKind,
        status: Option<u16>,
        message: String,
    },

    /// Provider returned a vector that cannot be padded or truncated
    #[error("Dimension mismatch: expected {expected}, provider returned {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Generation blocked before any provider call
    #[error("Budget exceeded ({ceiling} ceiling): {reason}")]
    BudgetExceeded {
        ceiling: BudgetCeiling,
        reason: String,
    },

    /// Provider has no client (missing credentials or not registered)
    #[error("Embedding provider {provider} is not configured")]
    ProviderUnavailable { provider: ProviderKind },

    /// Every attempted provider failed terminally
    #[error("Embedding generation failed on every provider: {}", join_failures(.failures))]
    AllProvidersFailed { failures: Vec<ProviderFailure> },

    /// Response body could not be parsed
    #[error("Response parsing failed: {0}")]
    Parse(String),

    /// Configuration and environment errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Usage ledger could not be read or written
    #[error("Usage ledger error: {0}")]
    Ledger(String),

    /// Generic error for other cases
    #[error("Other error: {0}")]
    Other(String),
}

impl EmbeddingError {
    /// Create an invalid input error
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            reason: reason.into(),
        }
    }

    /// Retry classification for the provider client's backoff loop
    pub const fn retry_class(&self) -> RetryClass {
        match self {
            Self::TransientProvider { .. } => RetryClass::Transient,
            Self::RateLimited { .. } => RetryClass::RateLimited,
            _ => RetryClass::Terminal,
        }
    }

    /// Whether the provider client may retry this error
    pub const fn is_retryable(&self) -> bool {
        !matches!(self.retry_class(), RetryClass::Terminal)
    }

    /// Whether a different provider could plausibly succeed
    ///
    /// Caller errors and budget gating are provider-independent, so they
    /// never trigger fallback.
    pub const fn allows_fallback(&self) -> bool {
        !matches!(
            self,
            Self::InvalidInput { .. }
                | Self::BudgetExceeded { .. }
                | Self::Config(_)
                | Self::AllProvidersFailed { .. }
        )
    }

    /// Whether this error (or any aggregated failure) is quota exhaustion
    pub fn is_quota_exhausted(&self) -> bool {
        match self {
            Self::QuotaExhausted { .. } => true,
            Self::AllProvidersFailed { failures } => {
                failures.iter().any(|f| f.error.is_quota_exhausted())
            }
            _ => false,
        }
    }

    /// Provider the error originated from, if any
    pub const fn provider(&self) -> Option<ProviderKind> {
        match self {
            Self::BadRequest { provider, .. }
            | Self::AuthFailure { provider, .. }
            | Self::QuotaExhausted { provider, .. }
            | Self::RateLimited { provider, .. }
            | Self::TransientProvider { provider, .. }
            | Self::ProviderUnavailable { provider } => Some(*provider),
            _ => None,
        }
    }

    /// Short machine-readable label for metrics and per-item error records
    pub const fn kind_label(&self) -> &'static str {
        match self {
            Self::InvalidInput { .. } => "invalid_input",
            Self::BadRequest { .. } => "bad_request",
            Self::AuthFailure { .. } => "auth_failure",
            Self::QuotaExhausted { .. } => "quota_exhausted",
            Self::RateLimited { .. } => "rate_limited",
            Self::TransientProvider { .. } => "transient",
            Self::DimensionMismatch { .. } => "dimension_mismatch",
            Self::BudgetExceeded { .. } => "budget_exceeded",
            Self::ProviderUnavailable { .. } => "provider_unavailable",
            Self::AllProvidersFailed { .. } => "all_providers_failed",
            Self::Parse(_) => "parse",
            Self::Config(_) => "config",
            Self::Ledger(_) => "ledger",
            Self::Other(_) => "other",
        }
    }
}

impl CommonError for EmbeddingError {
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

impl From<caredex_config::ConfigError> for EmbeddingError {
    fn from(err: caredex_config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        let transient = EmbeddingError::TransientProvider {
            provider: ProviderKind::Gemini,
            status: Some(503),
            message: "unavailable".into(),
        };
        let limited = EmbeddingError::RateLimited {
            provider: ProviderKind::Gemini,
            retry_after: None,
            message: "slow down".into(),
        };
        let quota = EmbeddingError::QuotaExhausted {
            provider: ProviderKind::OpenAi,
            message: "insufficient_quota".into(),
        };
        let auth = EmbeddingError::AuthFailure {
            provider: ProviderKind::OpenAi,
            status: 401,
            message: "bad key".into(),
        };

        assert_eq!(transient.retry_class(), RetryClass::Transient);
        assert_eq!(limited.retry_class(), RetryClass::RateLimited);
        assert!(!quota.is_retryable());
        assert!(!auth.is_retryable());
        assert!(quota.allows_fallback());
        assert!(auth.allows_fallback());
    }

    #[test]
    fn test_budget_and_input_errors_never_fall_back() {
        let budget = EmbeddingError::BudgetExceeded {
            ceiling: BudgetCeiling::Daily,
            reason: "over".into(),
        };
        assert!(!budget.allows_fallback());
        assert!(!EmbeddingError::invalid_input("empty").allows_fallback());
    }

    #[test]
    fn test_aggregate_names_every_provider() {
        let err = EmbeddingError::AllProvidersFailed {
            failures: vec![
                ProviderFailure {
                    provider: ProviderKind::Gemini,
                    error: EmbeddingError::QuotaExhausted {
                        provider: ProviderKind::Gemini,
                        message: "daily limit".into(),
                    },
                },
                ProviderFailure {
                    provider: ProviderKind::OpenAi,
                    error: EmbeddingError::TransientProvider {
                        provider: ProviderKind::OpenAi,
                        status: Some(502),
                        message: "bad gateway".into(),
                    },
                },
            ],
        };

        let message = err.to_string();
        assert!(message.contains("[gemini]"));
        assert!(message.contains("daily limit"));
        assert!(message.contains("[openai]"));
        assert!(message.contains("bad gateway"));
        assert!(err.is_quota_exhausted());
    }

    #[test]
    fn test_quota_message_has_remediation_hint() {
        let err = EmbeddingError::QuotaExhausted {
            provider: ProviderKind::Gemini,
            message: "limit reached".into(),
        };
        assert!(err.to_string().contains("billing"));
    }
}
