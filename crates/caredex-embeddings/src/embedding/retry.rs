//! Retry policy for provider calls
//!
//! Transient failures back off exponentially from `base_delay`. Rate limits
//! use the same curve scaled by `rate_limit_multiplier` and never wait less
//! than a server-supplied `Retry-After`. Every delay is capped at
//! `max_delay` before jitter is added.

use crate::error::{EmbedResult, EmbeddingError, RetryClass};
use caredex_config::{ProviderKind, RetryConfig};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// What to do after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

/// Backoff parameters, built from `RetryConfig`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub rate_limit_multiplier: f64,
    pub jitter_ratio: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            rate_limit_multiplier: config.rate_limit_multiplier.max(1.0),
            jitter_ratio: config.jitter_ratio.clamp(0.0, 1.0),
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries
    pub const fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            rate_limit_multiplier: 1.0,
            jitter_ratio: 0.0,
        }
    }

    /// Deterministic delay before attempt `failed_attempts + 1`, without jitter
    pub fn backoff(&self, failed_attempts: u32, class: RetryClass) -> Duration {
        let exponent = failed_attempts.saturating_sub(1).min(16);
        let mut delay = self.base_delay.saturating_mul(1_u32 << exponent);
        if class == RetryClass::RateLimited {
            delay = delay.mul_f64(self.rate_limit_multiplier);
        }
        delay.min(self.max_delay)
    }

    /// Decide whether to retry after `failed_attempts` attempts ended in `error`
    pub fn decide(&self, failed_attempts: u32, error: &EmbeddingError) -> RetryDecision {
        let class = error.retry_class();
        if class == RetryClass::Terminal || failed_attempts >= self.max_attempts {
            return RetryDecision::GiveUp;
        }

        let mut delay = self.backoff(failed_attempts, class);
        if let EmbeddingError::RateLimited {
            retry_after: Some(server_hint),
            ..
        } = error
        {
            delay = delay.max(*server_hint);
        }
        RetryDecision::RetryAfter(self.with_jitter(delay))
    }

    fn with_jitter(&self, delay: Duration) -> Duration {
        if self.jitter_ratio <= 0.0 || delay.is_zero() {
            return delay;
        }
        let factor = rand::rng().random_range(0.0..=self.jitter_ratio);
        delay + delay.mul_f64(factor)
    }
}

/// Run `operation` until it succeeds, fails terminally or attempts run out
///
/// The closure receives the 1-based attempt number.
///
/// # Errors
/// Returns the last error from `operation`
pub async fn retry_with_policy<T, F, Fut>(
    policy: &RetryPolicy,
    provider: ProviderKind,
    mut operation: F,
) -> EmbedResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = EmbedResult<T>>,
{
    let mut attempt = 1;
    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) => match policy.decide(attempt, &error) {
                RetryDecision::GiveUp => return Err(error),
                RetryDecision::RetryAfter(delay) => {
                    tracing::warn!(
                        provider = %provider,
                        attempt,
                        max_attempts = policy.max_attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %error,
                        "Provider call failed, retrying"
                    );
                    metrics::counter!(
                        "caredex_provider_retries_total",
                        "provider" => provider.as_str(),
                        "kind" => error.kind_label()
                    )
                    .increment(1);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            },
        }
    }
}
