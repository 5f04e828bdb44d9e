//! Google Gemini embedding client
//!
//! Uses `models/{model}:embedContent` for single texts and
//! `models/{model}:batchEmbedContents` for batches. Gemini does not report
//! token usage, so usage is estimated from text length.

use super::http::{AuthStyle, ProviderCore};
use super::retry::{RetryPolicy, retry_with_policy};
use super::traits::EmbeddingProvider;
use crate::cost::CostEstimator;
use crate::error::{EmbedResult, EmbeddingError};
use crate::text::estimate_tokens;
use crate::types::{EmbeddingRequest, EmbeddingResult, TaskHint, TokenUsage};
use async_trait::async_trait;
use caredex_common::decode_json;
use caredex_config::{ProviderConfig, ProviderKind};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Gemini embedding provider
pub struct GeminiProvider {
    core: ProviderCore,
}

impl GeminiProvider {
    /// Create a client; the config must carry an API key
    ///
    /// # Errors
    /// Returns `EmbeddingError::ProviderUnavailable` without credentials
    pub fn new(config: ProviderConfig) -> EmbedResult<Self> {
        Ok(Self {
            core: ProviderCore::new(config, AuthStyle::Header("x-goog-api-key"), is_quota_exhausted)?,
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

    fn content_request<'a>(
        model: &str,
        text: &'a str,
        request: &'a EmbeddingRequest,
        native_dimensions: usize,
    ) -> ContentRequest<'a> {
        ContentRequest {
            model: format!("models/{model}"),
            content: Content {
                parts: vec![Part { text }],
            },
            task_type: request.task().gemini_task_type(),
            // Gemini only accepts a title for retrieval documents
            title: request
                .title()
                .filter(|_| request.task() == TaskHint::Document),
            output_dimensionality: native_dimensions,
        }
    }
}

/// Daily or billing quota, as opposed to a per-minute rate limit
fn is_quota_exhausted(body: &str) -> bool {
    let body = body.to_ascii_lowercase();
    ["perday", "per day", "billing", "check your plan", "limit: 0"]
        .iter()
        .any(|marker| body.contains(marker))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ContentRequest<'a> {
    model: String,
    content: Content<'a>,
    task_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<&'a str>,
    output_dimensionality: usize,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct BatchRequest<'a> {
    requests: Vec<ContentRequest<'a>>,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Values,
}

#[derive(Deserialize)]
struct BatchResponse {
    #[serde(default)]
    embeddings: Vec<Values>,
}

#[derive(Deserialize)]
struct Values {
    #[serde(default)]
    values: Vec<f32>,
}

#[async_trait]
impl EmbeddingProvider for GeminiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    fn config(&self) -> &ProviderConfig {
        &self.core.config
    }

    #[tracing::instrument(skip(self, request), fields(provider = "gemini", model = %model))]
    async fn generate(&self, request: &EmbeddingRequest, model: &str) -> EmbedResult<EmbeddingResult> {
        let prepared = self.core.prepare_text(request.text())?;
        let negotiated = self.core.negotiate(request);
        let url = self.core.endpoint(&format!("v1beta/models/{model}:embedContent"));
        let body = Self::content_request(model, &prepared.text, request, negotiated.native);

        let started = Instant::now();
        let raw = retry_with_policy(&self.core.retry, self.kind(), |_| self.core.post_json(&url, &body)).await?;
        let response: EmbedResponse = decode_json::<_, EmbeddingError>(&raw, "gemini embedContent response")?;
        let elapsed = started.elapsed();

        let tokens = estimate_tokens(&prepared.text);
        self.core.finish(
            response.embedding.values,
            model,
            negotiated,
            TokenUsage::estimated(tokens),
            prepared.truncated,
            elapsed,
        )
    }

    #[tracing::instrument(skip(self, requests), fields(provider = "gemini", model = %model, batch = requests.len()))]
    async fn generate_batch(
        &self,
        requests: &[EmbeddingRequest],
        model: &str,
    ) -> EmbedResult<Vec<EmbeddingResult>> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }

        let prepared = requests
            .iter()
            .map(|request| self.core.prepare_text(request.text()))
            .collect::<EmbedResult<Vec<_>>>()?;
        let negotiated: Vec<_> = requests.iter().map(|r| self.core.negotiate(r)).collect();

        let body = BatchRequest {
            requests: requests
                .iter()
                .zip(&prepared)
                .zip(&negotiated)
                .map(|((request, text), dims)| {
                    Self::content_request(model, &text.text, request, dims.native)
                })
                .collect(),
        };
        let url = self.core.endpoint(&format!("v1beta/models/{model}:batchEmbedContents"));

        let started = Instant::now();
        let raw = retry_with_policy(&self.core.retry, self.kind(), |_| self.core.post_json(&url, &body)).await?;
        let elapsed = started.elapsed();
        drop(body);
        let response: BatchResponse =
            decode_json::<_, EmbeddingError>(&raw, "gemini batchEmbedContents response")?;

        if response.embeddings.len() != requests.len() {
            return Err(EmbeddingError::Parse(format!(
                "gemini returned {} embeddings for {} inputs",
                response.embeddings.len(),
                requests.len()
            )));
        }

        response
            .embeddings
            .into_iter()
            .zip(prepared)
            .zip(negotiated)
            .map(|((values, text), dims)| {
                self.core.finish(
                    values.values,
                    model,
                    dims,
                    TokenUsage::estimated(estimate_tokens(&text.text)),
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
            r#"{"error":{"status":"RESOURCE_EXHAUSTED","message":"Quota exceeded for metric: EmbedContentRequestsPerDay"}}"#
        ));
        assert!(!is_quota_exhausted(
            r#"{"error":{"status":"RESOURCE_EXHAUSTED","message":"Too many requests per minute"}}"#
        ));
    }

    #[test]
    fn test_request_shape() {
        let request = EmbeddingRequest::new("Cardiology at St. Mary")
            .unwrap()
            .with_title("St. Mary");
        let body = GeminiProvider::content_request("gemini-embedding-001", request.text(), &request, 768);
        let json = serde_json::to_value(&body).unwrap();

        assert_eq!(json["model"], "models/gemini-embedding-001");
        assert_eq!(json["content"]["parts"][0]["text"], "Cardiology at St. Mary");
        assert_eq!(json["taskType"], "RETRIEVAL_DOCUMENT");
        assert_eq!(json["title"], "St. Mary");
        assert_eq!(json["outputDimensionality"], 768);
    }

    #[test]
    fn test_query_request_drops_title() {
        let request = EmbeddingRequest::query("pediatric cardiologist")
            .unwrap()
            .with_title("ignored");
        let body = GeminiProvider::content_request("m", request.text(), &request, 768);
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["taskType"], "RETRIEVAL_QUERY");
        assert!(json.get("title").is_none());
    }
}
