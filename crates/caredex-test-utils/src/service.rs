//! Scripted `EmbeddingService` for orchestration tests

use crate::probe::InFlightProbe;
use crate::provider::deterministic_vector;
use async_trait::async_trait;
use caredex_config::{BudgetConfig, ProviderKind};
use caredex_embeddings::{
    BudgetCeiling, BudgetState, DimensionAdjustment, EmbedResult, EmbeddingError,
    EmbeddingRequest, EmbeddingResult, EmbeddingService, EmbeddingStats, GenerateOptions,
    ProviderFailure, TokenUsage, estimate_tokens,
};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Embedding service that never touches the network
///
/// Texts containing a registered needle fail terminally. A failing item
/// fails the whole `embed_batch` call, like a real provider batch would.
pub struct ScriptedEmbeddingService {
    default_dimensions: usize,
    fail_texts: Mutex<Vec<String>>,
    fail_batches: AtomicBool,
    over_budget: AtomicBool,
    latency: Duration,
    probe: Option<InFlightProbe>,
    embed_calls: AtomicUsize,
    batch_calls: AtomicUsize,
    seen_options: Mutex<Vec<GenerateOptions>>,
}

impl Default for ScriptedEmbeddingService {
    fn default() -> Self {
        Self::new(768)
    }
}

impl ScriptedEmbeddingService {
    pub fn new(default_dimensions: usize) -> Self {
        Self {
            default_dimensions,
            fail_texts: Mutex::new(Vec::new()),
            fail_batches: AtomicBool::new(false),
            over_budget: AtomicBool::new(false),
            latency: Duration::ZERO,
            probe: None,
            embed_calls: AtomicUsize::new(0),
            batch_calls: AtomicUsize::new(0),
            seen_options: Mutex::new(Vec::new()),
        }
    }

    /// Fail every item whose text contains `needle`
    #[must_use]
    pub fn fail_texts_containing(self, needle: impl Into<String>) -> Self {
        self.fail_texts.lock().unwrap().push(needle.into());
        self
    }

    /// Make every `embed_batch` call fail so callers fall back to single calls
    #[must_use]
    pub fn failing_batches(self) -> Self {
        self.fail_batches.store(true, Ordering::SeqCst);
        self
    }

    /// Reject every call as over the daily ceiling
    pub fn set_over_budget(&self, over: bool) {
        self.over_budget.store(over, Ordering::SeqCst);
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

    pub fn embed_calls(&self) -> usize {
        self.embed_calls.load(Ordering::SeqCst)
    }

    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }

    /// Options passed to every call, in call order
    pub fn seen_options(&self) -> Vec<GenerateOptions> {
        self.seen_options.lock().unwrap().clone()
    }

    fn check_budget(&self) -> EmbedResult<()> {
        if self.over_budget.load(Ordering::SeqCst) {
            return Err(EmbeddingError::BudgetExceeded {
                ceiling: BudgetCeiling::Daily,
                reason: "daily budget of $0.0000 would be exceeded by $0.0001".to_string(),
            });
        }
        Ok(())
    }

    fn generate(
        &self,
        request: &EmbeddingRequest,
        options: &GenerateOptions,
    ) -> EmbedResult<EmbeddingResult> {
        let blocked = self
            .fail_texts
            .lock()
            .unwrap()
            .iter()
            .any(|needle| request.text().contains(needle.as_str()));
        let provider = options.provider.unwrap_or(ProviderKind::Gemini);
        if blocked {
            return Err(EmbeddingError::AllProvidersFailed {
                failures: vec![ProviderFailure {
                    provider,
                    error: EmbeddingError::Other("scripted failure".to_string()),
                }],
            });
        }

        let dimensions = request.dimensions().unwrap_or(self.default_dimensions);
        let tokens = estimate_tokens(request.text());
        Ok(EmbeddingResult {
            embedding: deterministic_vector(request.text(), dimensions),
            provider,
            model: options
                .model
                .clone()
                .unwrap_or_else(|| "scripted-embedding".to_string()),
            dimensions,
            usage: TokenUsage::estimated(tokens),
            estimated_cost: 0.0,
            generation_time: self.latency,
            cache_hit: false,
            generated_at: chrono::Utc::now(),
            dimension_adjustment: DimensionAdjustment::None,
            truncated_input: false,
        })
    }

    async fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

#[async_trait]
impl EmbeddingService for ScriptedEmbeddingService {
    async fn embed(
        &self,
        request: EmbeddingRequest,
        options: &GenerateOptions,
    ) -> EmbedResult<EmbeddingResult> {
        let _guard = self.probe.as_ref().map(InFlightProbe::enter);
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        self.seen_options.lock().unwrap().push(options.clone());
        self.simulate_latency().await;
        self.check_budget()?;
        self.generate(&request, options)
    }

    async fn embed_batch(
        &self,
        requests: Vec<EmbeddingRequest>,
        options: &GenerateOptions,
    ) -> EmbedResult<Vec<EmbeddingResult>> {
        let _guard = self.probe.as_ref().map(InFlightProbe::enter);
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        self.seen_options.lock().unwrap().push(options.clone());
        self.simulate_latency().await;
        self.check_budget()?;
        if self.fail_batches.load(Ordering::SeqCst) {
            return Err(EmbeddingError::TransientProvider {
                provider: options.provider.unwrap_or(ProviderKind::Gemini),
                status: Some(503),
                message: "scripted batch failure".to_string(),
            });
        }
        requests
            .iter()
            .map(|request| self.generate(request, options))
            .collect()
    }

    fn estimate_cost(&self, _texts: &[&str], _provider: Option<ProviderKind>) -> f64 {
        0.0
    }

    async fn budget_state(&self) -> EmbedResult<BudgetState> {
        let config = BudgetConfig::default();
        Ok(BudgetState {
            daily_spend: 0.0,
            monthly_spend: 0.0,
            daily_limit: config.daily_limit,
            monthly_limit: config.monthly_limit,
            warning_threshold: config.warning_threshold,
        })
    }

    fn default_dimensions(&self) -> usize {
        self.default_dimensions
    }

    async fn get_stats(&self) -> EmbeddingStats {
        EmbeddingStats {
            total_requests: self.embed_calls() + self.batch_calls(),
            provider_calls: self.embed_calls() + self.batch_calls(),
            primary_provider: ProviderKind::Gemini.to_string(),
            default_dimensions: self.default_dimensions,
            ..EmbeddingStats::default()
        }
    }
}
