//! Network-free embedding provider

use crate::probe::InFlightProbe;
use async_trait::async_trait;
use caredex_config::{ProviderConfig, ProviderKind};
use caredex_embeddings::{
    DimensionAdjustment, EmbedResult, EmbeddingError, EmbeddingProvider, EmbeddingRequest,
    EmbeddingResult, TokenUsage, estimate_tokens,
};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Stable pseudo-embedding derived from the text, values in `[-1, 1]`
pub fn deterministic_vector(text: &str, dimensions: usize) -> Vec<f32> {
    let digest = Sha256::digest(text.as_bytes());
    (0..dimensions)
        .map(|i| {
            let byte = digest.get(i % digest.len()).copied().unwrap_or_default();
            (f32::from(byte) / 127.5) - 1.0
        })
        .collect()
}

/// Provider that answers from memory, with scripted failures and latency
pub struct MockProvider {
    config: ProviderConfig,
    calls: AtomicUsize,
    scripted: Mutex<VecDeque<EmbeddingError>>,
    fail_texts: Mutex<Vec<String>>,
    latency: Duration,
    probe: Option<InFlightProbe>,
}

impl MockProvider {
    pub fn new(kind: ProviderKind) -> Self {
        let config = match kind {
            ProviderKind::Gemini => ProviderConfig::gemini_defaults(),
            ProviderKind::OpenAi => ProviderConfig::openai_defaults(),
        }
        .with_api_key("test-key");
        Self {
            config,
            calls: AtomicUsize::new(0),
            scripted: Mutex::new(VecDeque::new()),
            fail_texts: Mutex::new(Vec::new()),
            latency: Duration::ZERO,
            probe: None,
        }
    }

    /// Fail the next call with `error`; queued errors are consumed in order
    #[must_use]
    pub fn fail_next(self, error: EmbeddingError) -> Self {
        self.scripted.lock().unwrap().push_back(error);
        self
    }

    /// Fail every call whose text contains `needle` with a quota error
    #[must_use]
    pub fn fail_texts_containing(self, needle: impl Into<String>) -> Self {
        self.fail_texts.lock().unwrap().push(needle.into());
        self
    }

    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    #[must_use]
    pub fn with_probe(mut self, probe: InFlightProbe) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Calls made to `generate` (batch calls count once per item)
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for MockProvider {
    fn kind(&self) -> ProviderKind {
        self.config.kind
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    async fn generate(
        &self,
        request: &EmbeddingRequest,
        model: &str,
    ) -> EmbedResult<EmbeddingResult> {
        let _guard = self.probe.as_ref().map(InFlightProbe::enter);
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if let Some(error) = self.scripted.lock().unwrap().pop_front() {
            return Err(error);
        }
        let blocked = self
            .fail_texts
            .lock()
            .unwrap()
            .iter()
            .any(|needle| request.text().contains(needle.as_str()));
        if blocked {
            return Err(EmbeddingError::QuotaExhausted {
                provider: self.kind(),
                message: "scripted quota failure".to_string(),
            });
        }

        let dimensions = request.dimensions().unwrap_or(self.config.default_dimensions);
        let tokens = estimate_tokens(request.text());
        Ok(EmbeddingResult {
            embedding: deterministic_vector(request.text(), dimensions),
            provider: self.kind(),
            model: model.to_string(),
            dimensions,
            usage: TokenUsage::estimated(tokens),
            estimated_cost: f64::from(tokens) / 1000.0 * self.config.cost_per_1k_tokens,
            generation_time: self.latency,
            cache_hit: false,
            generated_at: chrono::Utc::now(),
            dimension_adjustment: DimensionAdjustment::None,
            truncated_input: false,
        })
    }
}
