//! `OpenAI` embeddings client (`/v1/embeddings`)
//!
//! One endpoint serves both single and batch calls: `input` is an array and
//! results carry an `index`. Usage is reported per call, so batch usage is
//! apportioned across items by estimated length.

use super::http::{AuthStyle, ProviderCore};
use super::retry::{RetryPolicy, retry_with_policy};
use super::traits::EmbeddingProvider;
use crate::cost::CostEstimator;
use crate::error::{EmbedResult, EmbeddingError};
use crate::text::estimate_tokens;
use crate::types::{EmbeddingRequest, EmbeddingResult, TokenUsage};
use async_trait::async_trait;
use caredex_common::decode_json;
use caredex_config::{ProviderConfig, ProviderKind};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// `OpenAI` embedding provider
pub struct OpenAiProvider {
    core: ProviderCore,
}

impl OpenAiProvider {
    /// Create a client; the config must carry an API key
    ///
    /// # Errors
    /// Returns `EmbeddingError::ProviderUnavailable` without credentials
    pub fn new(config: ProviderConfig) -> EmbedResult<Self> {
        Ok(Self {
            core: ProviderCore::new(config, AuthStyle::Bearer, is_quota_exhausted)?,
        })
    }

    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.core.retry = policy;
        self
    }

    #[must_use]
    pub fn with_cost_estimator(mut self, estimator: CostEstimator) -> Self {
        self.core.estimator = estimator;
        self
    }

    #[must_use]
    pub fn with_truncation(mut self, truncate_oversized: bool) -> Self {
        self.core = self.core.with_truncation(truncate_oversized);
        self
    }

    /// Call the endpoint for texts that share one native width
    async fn embed_texts(
        &self,
        model: &str,
        texts: Vec<&str>,
        native_dimensions: usize,
    ) -> EmbedResult<(Vec<Vec<f32>>, Usage)> {
        let expected = texts.len();
        let body = EmbeddingsRequest {
            model,
            input: texts,
            encoding_format: "float",
            // Only the text-embedding-3 family accepts a width
            dimensions: model
                .starts_with("text-embedding-3")
                .then_some(native_dimensions),
        };
        let url = self.core.endpoint("v1/embeddings");

        let raw = retry_with_policy(&self.core.retry, self.kind(), |_| self.core.post_json(&url, &body)).await?;
        let mut response: EmbeddingsResponse =
            decode_json::<_, EmbeddingError>(&raw, "openai embeddings response")?;

        if response.data.len() != expected {
            return Err(EmbeddingError::Parse(format!(
                "openai returned {} embeddings for {expected} inputs",
                response.data.len()
            )));
        }
        response.data.sort_by_key(|item| item.index);
        let vectors = response.data.into_iter().map(|item| item.embedding).collect();
        Ok((vectors, response.usage))
    }
}

/// Billing quota exhausted, as opposed to a request rate limit
fn is_quota_exhausted(body: &str) -> bool {
    body.contains("insufficient_quota")
}

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
    encoding_format: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingData>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

#[derive(Deserialize, Default, Clone, Copy)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

/// Split a batch's reported tokens across items in proportion to their length
fn apportion_tokens(total: u32, estimates: &[u32]) -> Vec<u32> {
    let sum: u64 = estimates.iter().map(|e| u64::from(*e)).sum();
    if sum == 0 {
        return estimates.to_vec();
    }
    estimates
        .iter()
        .map(|estimate| {
            let share = u64::from(total) * u64::from(*estimate) / sum;
            u32::try_from(share).unwrap_or(u32::MAX)
        })
        .collect()
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    fn config(&self) -> &ProviderConfig {
        &self.core.config
    }

    #[tracing::instrument(skip(self, request), fields(provider = "openai", model = %model))]
    async fn generate(&self, request: &EmbeddingRequest, model: &str) -> EmbedResult<EmbeddingResult> {
        let prepared = self.core.prepare_text(request.text())?;
        let negotiated = self.core.negotiate(request);

        let started = Instant::now();
        let (mut vectors, usage) = self
            .embed_texts(model, vec![prepared.text.as_ref()], negotiated.native)
            .await?;
        let elapsed = started.elapsed();

        let raw = vectors
            .pop()
            .ok_or_else(|| EmbeddingError::Parse("openai returned no embedding".to_string()))?;
        let usage = if usage.total_tokens == 0 {
            TokenUsage::estimated(estimate_tokens(&prepared.text))
        } else {
            TokenUsage::reported(usage.prompt_tokens, usage.total_tokens)
        };

        self.core
            .finish(raw, model, negotiated, usage, prepared.truncated, elapsed)
    }

    #[tracing::instrument(skip(self, requests), fields(provider = "openai", model = %model, batch = requests.len()))]
    async fn generate_batch(
        &self,
        requests: &[EmbeddingRequest],
        model: &str,
    ) -> EmbedResult<Vec<EmbeddingResult>> {
        let Some(first) = requests.first() else {
            return Ok(Vec::new());
        };

        let negotiated = self.core.negotiate(first);
        if requests
            .iter()
            .any(|r| self.core.negotiate(r) != negotiated)
        {
            // Mixed widths cannot share one call
            let mut results = Vec::with_capacity(requests.len());
            for request in requests {
                results.push(self.generate(request, model).await?);
            }
            return Ok(results);
        }

        let prepared = requests
            .iter()
            .map(|request| self.core.prepare_text(request.text()))
            .collect::<EmbedResult<Vec<_>>>()?;

        let started = Instant::now();
        let (vectors, usage) = self
            .embed_texts(
                model,
                prepared.iter().map(|p| p.text.as_ref()).collect(),
                negotiated.native,
            )
            .await?;
        let elapsed = started.elapsed();

        let estimates: Vec<u32> = prepared.iter().map(|p| estimate_tokens(&p.text)).collect();
        let reported = usage.total_tokens != 0;
        let tokens = if reported {
            apportion_tokens(usage.total_tokens, &estimates)
        } else {
            estimates
        };

        vectors
            .into_iter()
            .zip(prepared)
            .zip(tokens)
            .map(|((raw, text), tokens)| {
                self.core.finish(
                    raw,
                    model,
                    negotiated,
                    if reported {
                        TokenUsage::reported(tokens, tokens)
                    } else {
                        TokenUsage::estimated(tokens)
                    },
                    text.truncated,
                    elapsed,
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_detection() {
        assert!(is_quota_exhausted(
            r#"{"error":{"message":"You exceeded your current quota","type":"insufficient_quota","code":"insufficient_quota"}}"#
        ));
        assert!(!is_quota_exhausted(
            r#"{"error":{"message":"Rate limit reached","type":"requests","code":"rate_limit_exceeded"}}"#
        ));
    }

    #[test]
    fn test_apportion_tokens() {
        assert_eq!(apportion_tokens(30, &[1, 2]), vec![10, 20]);
        assert_eq!(apportion_tokens(10, &[0, 0]), vec![0, 0]);
    }

    #[test]
    fn test_dimensions_only_sent_for_v3_models() {
        let body = EmbeddingsRequest {
            model: "text-embedding-ada-002",
            input: vec!["x"],
            encoding_format: "float",
            dimensions: "text-embedding-ada-002"
                .starts_with("text-embedding-3")
                .then_some(1536),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("dimensions").is_none());
        assert_eq!(json["input"][0], "x");
    }
}
