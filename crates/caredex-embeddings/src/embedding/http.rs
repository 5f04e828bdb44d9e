//! Shared plumbing for HTTP embedding providers
//!
//! Status classification, input preparation and result assembly are the
//! same for every provider; only the request shape and the way a provider
//! signals quota exhaustion differ.

use super::dimensions::{NegotiatedDimensions, fit_to_dimensions, negotiate_dimensions};
use super::retry::RetryPolicy;
use crate::cost::CostEstimator;
use crate::error::{EmbedResult, EmbeddingError};
use crate::text::truncate_at_word_boundary;
use crate::types::{EmbeddingRequest, EmbeddingResult, TokenUsage};
use caredex_config::{ProviderConfig, ProviderKind};
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::time::Duration;

/// Longest provider error body carried into an error message
const MAX_ERROR_BODY_CHARS: usize = 300;

/// How a provider expects its credential
#[derive(Debug, Clone, Copy)]
pub(crate) enum AuthStyle {
    Bearer,
    Header(&'static str),
}

/// Decides whether a 429 body means quota exhaustion rather than a rate limit
pub(crate) type QuotaDetector = fn(&str) -> bool;

/// Input text after length checks
pub(crate) struct PreparedText<'a> {
    pub text: Cow<'a, str>,
    pub truncated: bool,
}

/// State shared by every HTTP provider client
pub(crate) struct ProviderCore {
    pub config: ProviderConfig,
    pub retry: RetryPolicy,
    pub estimator: CostEstimator,
    client: reqwest::Client,
    api_key: Secret<String>,
    auth: AuthStyle,
    truncate_oversized: bool,
    is_quota_exhausted: QuotaDetector,
}

impl ProviderCore {
    pub fn new(
        config: ProviderConfig,
        auth: AuthStyle,
        is_quota_exhausted: QuotaDetector,
    ) -> EmbedResult<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or(EmbeddingError::ProviderUnavailable {
                provider: config.kind,
            })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EmbeddingError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            config,
            retry: RetryPolicy::default(),
            estimator: CostEstimator::default(),
            client,
            api_key: Secret::new(api_key),
            auth,
            truncate_oversized: true,
            is_quota_exhausted,
        })
    }

    pub fn with_truncation(mut self, truncate_oversized: bool) -> Self {
        self.truncate_oversized = truncate_oversized;
        self
    }

    pub const fn kind(&self) -> ProviderKind {
        self.config.kind
    }

    /// `{base_url}/{path}` without a doubled slash
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Enforce the provider's input limit
    ///
    /// Oversized text is cut at a word boundary when truncation is enabled,
    /// otherwise rejected.
    pub fn prepare_text<'a>(&self, text: &'a str) -> EmbedResult<PreparedText<'a>> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::invalid_input("text must not be empty"));
        }

        let max = self.config.max_input_chars;
        let length = text.chars().count();
        if length <= max {
            return Ok(PreparedText {
                text: Cow::Borrowed(text),
                truncated: false,
            });
        }

        if !self.truncate_oversized {
            return Err(EmbeddingError::invalid_input(format!(
                "text has {length} characters; {} accepts at most {max}",
                self.kind()
            )));
        }

        tracing::debug!(
            provider = %self.kind(),
            length,
            max,
            "Truncating oversized input at word boundary"
        );
        Ok(PreparedText {
            text: truncate_at_word_boundary(text, max),
            truncated: true,
        })
    }

    /// Width to request from the provider and width to return
    pub fn negotiate(&self, request: &EmbeddingRequest) -> NegotiatedDimensions {
        let requested = request
            .dimensions()
            .unwrap_or(self.config.default_dimensions);
        negotiate_dimensions(
            requested,
            &self.config.supported_dimensions,
            self.config.default_dimensions,
        )
    }

    /// POST a JSON body once and return the raw success body
    pub async fn post_json<B: Serialize + Sync>(&self, url: &str, body: &B) -> EmbedResult<String> {
        let builder = self.client.post(url).json(body);
        let builder = match self.auth {
            AuthStyle::Bearer => builder.bearer_auth(self.api_key.expose_secret()),
            AuthStyle::Header(name) => builder.header(name, self.api_key.expose_secret()),
        };

        let response = builder
            .send()
            .await
            .map_err(|e| transport_error(self.kind(), &e))?;
        let status = response.status();
        let retry_after = parse_retry_after(response.headers());
        let text = response
            .text()
            .await
            .map_err(|e| transport_error(self.kind(), &e))?;

        if status.is_success() {
            return Ok(text);
        }

        let error = classify_status(
            self.kind(),
            status.as_u16(),
            retry_after,
            &text,
            self.is_quota_exhausted,
        );
        metrics::counter!(
            "caredex_provider_errors_total",
            "provider" => self.kind().as_str(),
            "kind" => error.kind_label()
        )
        .increment(1);
        Err(error)
    }

    /// Reshape the raw vector and attach provenance
    pub fn finish(
        &self,
        raw: Vec<f32>,
        model: &str,
        negotiated: NegotiatedDimensions,
        usage: TokenUsage,
        truncated_input: bool,
        generation_time: Duration,
    ) -> EmbedResult<EmbeddingResult> {
        let (embedding, adjustment) = fit_to_dimensions(raw, negotiated.target)?;
        if adjustment.is_adjusted() {
            tracing::debug!(
                provider = %self.kind(),
                target = negotiated.target,
                ?adjustment,
                "Reshaped provider vector to requested width"
            );
        }

        Ok(EmbeddingResult {
            embedding,
            provider: self.kind(),
            model: model.to_string(),
            dimensions: negotiated.target,
            usage,
            estimated_cost: self
                .estimator
                .estimate_cost(usage.total_tokens, self.kind(), model),
            generation_time,
            cache_hit: false,
            generated_at: chrono::Utc::now(),
            dimension_adjustment: adjustment,
            truncated_input,
        })
    }
}

/// `{"error": {"message": ...}}`, the envelope both providers use
#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .map(|envelope| envelope.error.message)
        .filter(|message| !message.is_empty())
        .unwrap_or_else(|| body.chars().take(MAX_ERROR_BODY_CHARS).collect())
}

/// Map an HTTP failure onto the error taxonomy
pub(crate) fn classify_status(
    provider: ProviderKind,
    status: u16,
    retry_after: Option<Duration>,
    body: &str,
    is_quota_exhausted: QuotaDetector,
) -> EmbeddingError {
    let message = error_message(body);
    match status {
        401 | 403 => EmbeddingError::AuthFailure {
            provider,
            status,
            message,
        },
        429 if is_quota_exhausted(body) => EmbeddingError::QuotaExhausted { provider, message },
        429 => EmbeddingError::RateLimited {
            provider,
            retry_after,
            message,
        },
        408 | 500..=599 => EmbeddingError::TransientProvider {
            provider,
            status: Some(status),
            message,
        },
        _ => EmbeddingError::BadRequest {
            provider,
            status,
            message,
        },
    }
}

fn transport_error(provider: ProviderKind, error: &reqwest::Error) -> EmbeddingError {
    let message = if error.is_timeout() {
        format!("request timed out: {error}")
    } else if error.is_connect() {
        format!("connection failed: {error}")
    } else {
        error.to_string()
    };
    EmbeddingError::TransientProvider {
        provider,
        status: error.status().map(|s| s.as_u16()),
        message,
    }
}

/// `Retry-After` in delta-seconds form
fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn never(_: &str) -> bool {
        false
    }

    fn always(_: &str) -> bool {
        true
    }

    #[test]
    fn test_status_classification() {
        let p = ProviderKind::Gemini;
        assert!(matches!(
            classify_status(p, 400, None, "{}", never),
            EmbeddingError::BadRequest { status: 400, .. }
        ));
        assert!(matches!(
            classify_status(p, 403, None, "", never),
            EmbeddingError::AuthFailure { status: 403, .. }
        ));
        assert!(matches!(
            classify_status(p, 429, Some(Duration::from_secs(2)), "", never),
            EmbeddingError::RateLimited {
                retry_after: Some(_),
                ..
            }
        ));
        assert!(matches!(
            classify_status(p, 429, None, "", always),
            EmbeddingError::QuotaExhausted { .. }
        ));
        assert!(matches!(
            classify_status(p, 503, None, "", never),
            EmbeddingError::TransientProvider {
                status: Some(503),
                ..
            }
        ));
    }

    #[test]
    fn test_error_message_extracted_from_envelope() {
        let body = r#"{"error":{"message":"API key not valid","status":"INVALID_ARGUMENT"}}"#;
        assert_eq!(error_message(body), "API key not valid");
        assert_eq!(error_message("plain failure"), "plain failure");
    }

    #[test]
    fn test_missing_key_is_provider_unavailable() {
        let result = ProviderCore::new(ProviderConfig::gemini_defaults(), AuthStyle::Bearer, never);
        assert!(matches!(
            result,
            Err(EmbeddingError::ProviderUnavailable {
                provider: ProviderKind::Gemini
            })
        ));
    }

    #[test]
    fn test_prepare_text_truncates_or_rejects() {
        let mut config = ProviderConfig::openai_defaults().with_api_key("k");
        config.max_input_chars = 10;

        let core = ProviderCore::new(config.clone(), AuthStyle::Bearer, never).unwrap();
        let prepared = core.prepare_text("general surgery unit").unwrap();
        assert!(prepared.truncated);
        assert_eq!(prepared.text, "general");

        let strict = ProviderCore::new(config, AuthStyle::Bearer, never)
            .unwrap()
            .with_truncation(false);
        assert!(matches!(
            strict.prepare_text("general surgery unit"),
            Err(EmbeddingError::InvalidInput { .. })
        ));
    }
}
