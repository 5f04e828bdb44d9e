//! Trait abstractions for embedding generation
//!
//! `EmbeddingProvider` is one external API client. `EmbeddingService` is the
//! single entry point the rest of the system talks to; it layers caching,
//! budget gating and provider fallback over the providers.

use crate::budget::BudgetState;
use crate::error::EmbedResult;
use crate::types::{EmbeddingRequest, EmbeddingResult};
use async_trait::async_trait;
use caredex_common::CorrelationId;
use caredex_config::{ProviderConfig, ProviderKind};
use serde::Serialize;

/// Client for one external embedding API
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Which provider this client talks to
    fn kind(&self) -> ProviderKind;

    /// Static settings: default model, supported widths, input limit, pricing
    fn config(&self) -> &ProviderConfig;

    fn default_model(&self) -> &str {
        &self.config().default_model
    }

    /// Generate one embedding
    ///
    /// The returned vector always has `request.dimensions()` elements
    /// (or the provider default when unset).
    async fn generate(&self, request: &EmbeddingRequest, model: &str)
    -> EmbedResult<EmbeddingResult>;

    /// Generate embeddings for several texts, results in input order
    ///
    /// The default calls `generate` one text at a time.
    async fn generate_batch(
        &self,
        requests: &[EmbeddingRequest],
        model: &str,
    ) -> EmbedResult<Vec<EmbeddingResult>> {
        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            results.push(self.generate(request, model).await?);
        }
        Ok(results)
    }
}

/// Whether a call is gated by the budget monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetPolicy {
    Enforce,
    Skip,
}

/// Per-call options for the embedding service
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    /// Explicit provider; defaults to the service's primary
    pub provider: Option<ProviderKind>,
    /// Explicit model for the selected provider
    pub model: Option<String>,
    pub use_cache: bool,
    pub allow_fallback: bool,
    pub budget: BudgetPolicy,
    pub correlation_id: Option<CorrelationId>,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self::for_documents()
    }
}

impl GenerateOptions {
    /// Options for indexing entity text: budget enforced
    pub fn for_documents() -> Self {
        Self {
            provider: None,
            model: None,
            use_cache: true,
            allow_fallback: true,
            budget: BudgetPolicy::Enforce,
            correlation_id: None,
        }
    }

    /// Options for interactive queries: no budget pre-check
    pub fn for_queries() -> Self {
        Self {
            budget: BudgetPolicy::Skip,
            ..Self::for_documents()
        }
    }

    #[must_use]
    pub const fn with_provider(mut self, provider: ProviderKind) -> Self {
        self.provider = Some(provider);
        self
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    #[must_use]
    pub const fn without_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }

    #[must_use]
    pub const fn without_fallback(mut self) -> Self {
        self.allow_fallback = false;
        self
    }

    #[must_use]
    pub const fn with_budget(mut self, budget: BudgetPolicy) -> Self {
        self.budget = budget;
        self
    }

    #[must_use]
    pub const fn with_correlation_id(mut self, id: CorrelationId) -> Self {
        self.correlation_id = Some(id);
        self
    }
}

/// Unified embedding entry point
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    /// Embed one text
    async fn embed(
        &self,
        request: EmbeddingRequest,
        options: &GenerateOptions,
    ) -> EmbedResult<EmbeddingResult>;

    /// Embed several texts; results are in input order
    ///
    /// All-or-nothing: callers that need per-item recovery retry items
    /// individually with `embed`.
    async fn embed_batch(
        &self,
        requests: Vec<EmbeddingRequest>,
        options: &GenerateOptions,
    ) -> EmbedResult<Vec<EmbeddingResult>>;

    /// Estimated USD cost of embedding `texts` with `provider` (primary when `None`)
    fn estimate_cost(&self, texts: &[&str], provider: Option<ProviderKind>) -> f64;

    /// Current spend against the configured ceilings
    async fn budget_state(&self) -> EmbedResult<BudgetState>;

    /// Width used when a request does not specify one
    fn default_dimensions(&self) -> usize;

    /// Get service statistics
    async fn get_stats(&self) -> EmbeddingStats;
}

/// Statistics about embedding generation
#[derive(Debug, Clone, Default, Serialize)]
pub struct EmbeddingStats {
    /// Texts requested through `embed`/`embed_batch`
    pub total_requests: usize,

    /// Requests answered from the cache
    pub cache_hits: usize,

    /// Successful provider calls (a batch call counts once)
    pub provider_calls: usize,

    /// Times the fallback provider was tried
    pub fallback_attempts: usize,

    /// Calls that ended in an error
    pub failures: usize,

    /// Requests rejected by the budget monitor
    pub budget_rejections: usize,

    /// Sum of estimated cost for generated embeddings
    pub total_estimated_cost: f64,

    /// Average provider call time in milliseconds
    pub avg_generation_time_ms: f64,

    pub primary_provider: String,
    pub fallback_provider: Option<String>,
    pub default_dimensions: usize,
}
