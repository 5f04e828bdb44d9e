//! Unified embedding service
//!
//! Every request walks the same phases:
//!
//! ```text
//! PENDING -> CACHE_CHECK -> BUDGET_CHECK -> GENERATING -> CACHE_WRITE -> DONE
//!                 |              |             |
//!                 +-> DONE       +-> FAILED    +-> FALLBACK_GENERATING -> CACHE_WRITE
//!                   (cache hit)                                       \-> FAILED
//! ```
//!
//! The budget phase is skipped for calls made with `BudgetPolicy::Skip`. The
//! fallback pass repeats the budget check with its own cost estimate.

use super::factory::{ProviderFactory, ProviderRegistry};
use super::traits::{
    BudgetPolicy, EmbeddingProvider, EmbeddingService, EmbeddingStats, GenerateOptions,
};
use crate::budget::{BudgetMonitor, BudgetState};
use crate::cache::{CacheKey, CacheStats, ResultCache};
use crate::cost::CostEstimator;
use crate::error::{EmbedResult, EmbeddingError, ProviderFailure};
use crate::types::{EmbeddingRequest, EmbeddingResult};
use async_trait::async_trait;
use caredex_common::CorrelationId;
use caredex_config::{EmbeddingConfig, ProviderKind};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

/// Lifecycle of one `embed`/`embed_batch` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPhase {
    Pending,
    CacheCheck,
    BudgetCheck,
    Generating,
    FallbackGenerating,
    CacheWrite,
    Done,
    Failed,
}

impl RequestPhase {
    /// Whether `next` is a legal successor of `self`
    pub const fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::CacheCheck)
                | (
                    Self::CacheCheck,
                    Self::Done | Self::BudgetCheck | Self::Generating
                )
                | (Self::BudgetCheck, Self::Generating)
                | (
                    Self::Generating,
                    Self::CacheWrite | Self::FallbackGenerating
                )
                | (Self::FallbackGenerating, Self::CacheWrite)
                | (Self::CacheWrite, Self::Done)
        ) || (matches!(next, Self::Failed) && !self.is_terminal())
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for RequestPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "PENDING",
            Self::CacheCheck => "CACHE_CHECK",
            Self::BudgetCheck => "BUDGET_CHECK",
            Self::Generating => "GENERATING",
            Self::FallbackGenerating => "FALLBACK_GENERATING",
            Self::CacheWrite => "CACHE_WRITE",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
        })
    }
}

/// Tracks the phase of one call and logs every transition
struct PhaseTracker {
    phase: RequestPhase,
    correlation_id: CorrelationId,
}

impl PhaseTracker {
    const fn new(correlation_id: CorrelationId) -> Self {
        Self {
            phase: RequestPhase::Pending,
            correlation_id,
        }
    }

    fn advance(&mut self, next: RequestPhase) {
        debug_assert!(
            self.phase.can_advance_to(next),
            "illegal phase transition {} -> {next}",
            self.phase
        );
        tracing::trace!(
            correlation_id = %self.correlation_id,
            from = %self.phase,
            to = %next,
            "Embedding request phase"
        );
        self.phase = next;
    }
}

/// One call's worth of provider work
#[derive(Clone, Copy)]
enum Work<'a> {
    One(&'a EmbeddingRequest),
    Many(&'a [EmbeddingRequest]),
}

/// Embedding service with caching, budget gating and provider fallback
pub struct UnifiedEmbeddingService {
    providers: ProviderRegistry,
    primary: ProviderKind,
    fallback: Option<ProviderKind>,
    default_dimensions: usize,
    cache: Option<Arc<ResultCache>>,
    budget: Arc<BudgetMonitor>,
    estimator: CostEstimator,
    stats: RwLock<EmbeddingStats>,
}

impl UnifiedEmbeddingService {
    /// Build the service from configuration
    ///
    /// # Errors
    /// Returns `EmbeddingError::Config` when no provider has credentials
    pub fn from_config(config: &EmbeddingConfig, budget: Arc<BudgetMonitor>) -> EmbedResult<Self> {
        let primary = config.effective_primary()?;
        let fallback = config.effective_fallback(primary);
        let factory = ProviderFactory::new(config);

        let mut builder = UnifiedEmbeddingServiceBuilder::new()
            .with_primary(factory.create(primary)?)
            .with_default_dimensions(config.default_dimensions)
            .with_cost_estimator(CostEstimator::from_config(config))
            .with_budget(budget);
        if let Some(kind) = fallback {
            match factory.create(kind) {
                Ok(provider) => builder = builder.with_fallback(provider),
                Err(e) => {
                    tracing::warn!(provider = %kind, error = %e, "Fallback provider unavailable");
                }
            }
        }
        if config.cache.enabled {
            builder = builder.with_cache(Arc::new(ResultCache::from_config(&config.cache)));
        }

        let service = builder.build()?;
        tracing::info!(
            primary = %service.primary,
            fallback = service.fallback.map(ProviderKind::as_str).unwrap_or("none"),
            default_dimensions = service.default_dimensions,
            cache = service.cache.is_some(),
            "Embedding service ready"
        );
        Ok(service)
    }

    pub fn builder() -> UnifiedEmbeddingServiceBuilder {
        UnifiedEmbeddingServiceBuilder::new()
    }

    pub const fn primary(&self) -> ProviderKind {
        self.primary
    }

    pub const fn fallback(&self) -> Option<ProviderKind> {
        self.fallback
    }

    /// Cache counters, when caching is enabled
    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(|cache| cache.stats())
    }

    /// Options for a query embedding, honoring `enforce_on_queries`
    pub fn query_options(&self) -> GenerateOptions {
        let budget = if self.budget.config().enforce_on_queries {
            BudgetPolicy::Enforce
        } else {
            BudgetPolicy::Skip
        };
        GenerateOptions::for_queries().with_budget(budget)
    }

    fn cache_lookup(&self, key: &CacheKey, options: &GenerateOptions) -> Option<EmbeddingResult> {
        if !options.use_cache {
            return None;
        }
        let mut hit = self.cache.as_ref()?.get(key)?;
        hit.cache_hit = true;
        Some(hit)
    }

    fn cache_store(&self, key: CacheKey, result: &EmbeddingResult, options: &GenerateOptions) {
        if let Some(cache) = self.cache.as_ref().filter(|_| options.use_cache) {
            cache.put(key, result.clone());
        }
    }

    /// Model for `kind`: the explicit override when it targets this provider
    fn model_for(&self, kind: ProviderKind, options: &GenerateOptions) -> Option<String> {
        let provider = self.providers.get(&kind)?;
        let targeted = options.provider.unwrap_or(self.primary) == kind;
        Some(
            options
                .model
                .clone()
                .filter(|_| targeted)
                .unwrap_or_else(|| provider.default_model().to_string()),
        )
    }

    async fn generate_with_fallback(
        &self,
        work: Work<'_>,
        texts: &[&str],
        options: &GenerateOptions,
        tracker: &mut PhaseTracker,
    ) -> EmbedResult<Vec<EmbeddingResult>> {
        let primary = options.provider.unwrap_or(self.primary);
        let fallback = self
            .fallback
            .filter(|kind| options.allow_fallback && *kind != primary);

        if options.budget == BudgetPolicy::Enforce {
            tracker.advance(RequestPhase::BudgetCheck);
            if let Err(e) = self.gate_budget(primary, texts, options).await {
                self.record_failure(&e, tracker).await;
                return Err(e);
            }
        }

        tracker.advance(RequestPhase::Generating);
        let primary_error = match self.call_provider(primary, work, options, tracker).await {
            Ok(results) => return Ok(results),
            Err(e) => e,
        };

        let Some(fallback) = fallback.filter(|_| primary_error.allows_fallback()) else {
            self.record_failure(&primary_error, tracker).await;
            return Err(primary_error);
        };

        tracing::warn!(
            correlation_id = %tracker.correlation_id,
            primary = %primary,
            fallback = %fallback,
            error = %primary_error,
            "Primary embedding provider failed; trying fallback"
        );
        metrics::counter!(
            "caredex_embedding_fallbacks_total",
            "from" => primary.as_str(),
            "to" => fallback.as_str()
        )
        .increment(1);
        self.stats.write().await.fallback_attempts += 1;
        tracker.advance(RequestPhase::FallbackGenerating);

        let fallback_result = if options.budget == BudgetPolicy::Enforce {
            match self.gate_budget(fallback, texts, options).await {
                Ok(()) => self.call_provider(fallback, work, options, tracker).await,
                Err(e) => Err(e),
            }
        } else {
            self.call_provider(fallback, work, options, tracker).await
        };

        match fallback_result {
            Ok(results) => Ok(results),
            Err(fallback_error) => {
                let error = EmbeddingError::AllProvidersFailed {
                    failures: vec![
                        ProviderFailure {
                            provider: primary,
                            error: primary_error,
                        },
                        ProviderFailure {
                            provider: fallback,
                            error: fallback_error,
                        },
                    ],
                };
                self.record_failure(&error, tracker).await;
                Err(error)
            }
        }
    }

    /// Budget pre-check for a pass on `kind`
    async fn gate_budget(
        &self,
        kind: ProviderKind,
        texts: &[&str],
        options: &GenerateOptions,
    ) -> EmbedResult<()> {
        let estimate = self
            .model_for(kind, options)
            .map_or(0.0, |model| self.estimator.estimate_batch_cost(texts, kind, &model));
        let result = self.budget.check_budget(estimate).await.into_result();
        if result.is_err() {
            self.stats.write().await.budget_rejections += 1;
        }
        result
    }

    async fn call_provider(
        &self,
        kind: ProviderKind,
        work: Work<'_>,
        options: &GenerateOptions,
        tracker: &PhaseTracker,
    ) -> EmbedResult<Vec<EmbeddingResult>> {
        let provider = self
            .providers
            .get(&kind)
            .ok_or(EmbeddingError::ProviderUnavailable { provider: kind })?;
        let model = self
            .model_for(kind, options)
            .unwrap_or_else(|| provider.default_model().to_string());

        let started = Instant::now();
        let results = match work {
            Work::One(request) => vec![provider.generate(request, &model).await?],
            Work::Many(requests) => provider.generate_batch(requests, &model).await?,
        };
        let elapsed = started.elapsed();

        metrics::histogram!("caredex_embedding_generation_seconds", "provider" => kind.as_str())
            .record(elapsed.as_secs_f64());
        metrics::counter!("caredex_embeddings_generated_total", "provider" => kind.as_str())
            .increment(results.len() as u64);

        for result in &results {
            if let Err(e) = self
                .budget
                .record_usage(result, Some(tracker.correlation_id))
                .await
            {
                tracing::warn!(error = %e, "Failed to record embedding usage");
            }
        }

        let mut stats = self.stats.write().await;
        let calls = stats.provider_calls as f64;
        stats.avg_generation_time_ms = stats
            .avg_generation_time_ms
            .mul_add(calls, elapsed.as_secs_f64() * 1000.0)
            / (calls + 1.0);
        stats.provider_calls += 1;
        stats.total_estimated_cost += results.iter().map(|r| r.estimated_cost).sum::<f64>();
        drop(stats);

        tracing::debug!(
            correlation_id = %tracker.correlation_id,
            provider = %kind,
            model = %model,
            count = results.len(),
            elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            "Generated embeddings"
        );
        Ok(results)
    }

    async fn record_failure(&self, error: &EmbeddingError, tracker: &mut PhaseTracker) {
        tracker.advance(RequestPhase::Failed);
        metrics::counter!("caredex_embedding_failures_total", "kind" => error.kind_label())
            .increment(1);
        self.stats.write().await.failures += 1;
    }
}

#[async_trait]
impl EmbeddingService for UnifiedEmbeddingService {
    #[tracing::instrument(skip_all, fields(task = %request.task(), chars = request.text().len()))]
    async fn embed(
        &self,
        request: EmbeddingRequest,
        options: &GenerateOptions,
    ) -> EmbedResult<EmbeddingResult> {
        let mut tracker = PhaseTracker::new(options.correlation_id.unwrap_or_default());
        let request = request.resolve_dimensions(self.default_dimensions);
        let key = CacheKey::new(
            request.text(),
            request.dimensions().unwrap_or(self.default_dimensions),
            request.task(),
        );
        self.stats.write().await.total_requests += 1;
        metrics::counter!("caredex_embedding_requests_total").increment(1);

        tracker.advance(RequestPhase::CacheCheck);
        if let Some(hit) = self.cache_lookup(&key, options) {
            self.stats.write().await.cache_hits += 1;
            tracker.advance(RequestPhase::Done);
            return Ok(hit);
        }

        let mut results = self
            .generate_with_fallback(Work::One(&request), &[request.text()], options, &mut tracker)
            .await?;
        let result = results
            .pop()
            .ok_or_else(|| EmbeddingError::Other("provider returned no result".to_string()))?;

        tracker.advance(RequestPhase::CacheWrite);
        self.cache_store(key, &result, options);
        tracker.advance(RequestPhase::Done);
        Ok(result)
    }

    #[tracing::instrument(skip_all, fields(batch = requests.len()))]
    async fn embed_batch(
        &self,
        requests: Vec<EmbeddingRequest>,
        options: &GenerateOptions,
    ) -> EmbedResult<Vec<EmbeddingResult>> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }

        let mut tracker = PhaseTracker::new(options.correlation_id.unwrap_or_default());
        let requests: Vec<EmbeddingRequest> = requests
            .into_iter()
            .map(|r| r.resolve_dimensions(self.default_dimensions))
            .collect();
        let keys: Vec<CacheKey> = requests
            .iter()
            .map(|r| {
                CacheKey::new(
                    r.text(),
                    r.dimensions().unwrap_or(self.default_dimensions),
                    r.task(),
                )
            })
            .collect();
        self.stats.write().await.total_requests += requests.len();
        metrics::counter!("caredex_embedding_requests_total").increment(requests.len() as u64);

        tracker.advance(RequestPhase::CacheCheck);
        let mut slots: Vec<Option<EmbeddingResult>> = keys
            .iter()
            .map(|key| self.cache_lookup(key, options))
            .collect();
        let hits = slots.iter().filter(|slot| slot.is_some()).count();
        self.stats.write().await.cache_hits += hits;

        let (misses, miss_keys): (Vec<EmbeddingRequest>, Vec<CacheKey>) = requests
            .into_iter()
            .zip(keys)
            .zip(&slots)
            .filter(|(_, slot)| slot.is_none())
            .map(|(pair, _)| pair)
            .unzip();

        if misses.is_empty() {
            tracker.advance(RequestPhase::Done);
            return Ok(slots.into_iter().flatten().collect());
        }

        let texts: Vec<&str> = misses.iter().map(EmbeddingRequest::text).collect();
        let generated = self
            .generate_with_fallback(Work::Many(&misses), &texts, options, &mut tracker)
            .await?;
        if generated.len() != misses.len() {
            let error = EmbeddingError::Parse(format!(
                "provider returned {} results for {} inputs",
                generated.len(),
                misses.len()
            ));
            self.record_failure(&error, &mut tracker).await;
            return Err(error);
        }

        tracker.advance(RequestPhase::CacheWrite);
        let mut generated = generated.into_iter().zip(miss_keys);
        for slot in slots.iter_mut().filter(|slot| slot.is_none()) {
            if let Some((result, key)) = generated.next() {
                self.cache_store(key, &result, options);
                *slot = Some(result);
            }
        }
        tracker.advance(RequestPhase::Done);

        Ok(slots.into_iter().flatten().collect())
    }

    fn estimate_cost(&self, texts: &[&str], provider: Option<ProviderKind>) -> f64 {
        let kind = provider.unwrap_or(self.primary);
        let options = GenerateOptions::default().with_provider(kind);
        self.model_for(kind, &options)
            .map_or(0.0, |model| self.estimator.estimate_batch_cost(texts, kind, &model))
    }

    async fn budget_state(&self) -> EmbedResult<BudgetState> {
        self.budget.state().await
    }

    fn default_dimensions(&self) -> usize {
        self.default_dimensions
    }

    async fn get_stats(&self) -> EmbeddingStats {
        self.stats.read().await.clone()
    }
}

/// Assembles a `UnifiedEmbeddingService` from explicit parts
pub struct UnifiedEmbeddingServiceBuilder {
    providers: ProviderRegistry,
    primary: Option<ProviderKind>,
    fallback: Option<ProviderKind>,
    default_dimensions: usize,
    cache: Option<Arc<ResultCache>>,
    budget: Option<Arc<BudgetMonitor>>,
    estimator: CostEstimator,
}

impl UnifiedEmbeddingServiceBuilder {
    pub fn new() -> Self {
        Self {
            providers: ProviderRegistry::new(),
            primary: None,
            fallback: None,
            default_dimensions: EmbeddingConfig::default().default_dimensions,
            cache: None,
            budget: None,
            estimator: CostEstimator::default(),
        }
    }

    #[must_use]
    pub fn with_primary(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.primary = Some(provider.kind());
        self.providers.insert(provider.kind(), provider);
        self
    }

    #[must_use]
    pub fn with_fallback(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.fallback = Some(provider.kind());
        self.providers.insert(provider.kind(), provider);
        self
    }

    #[must_use]
    pub const fn with_default_dimensions(mut self, dimensions: usize) -> Self {
        self.default_dimensions = dimensions;
        self
    }

    #[must_use]
    pub fn with_cache(mut self, cache: Arc<ResultCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    #[must_use]
    pub fn with_budget(mut self, budget: Arc<BudgetMonitor>) -> Self {
        self.budget = Some(budget);
        self
    }

    #[must_use]
    pub fn with_cost_estimator(mut self, estimator: CostEstimator) -> Self {
        self.estimator = estimator;
        self
    }

    /// Finish the service; without a budget monitor, an in-memory one with default limits is used
    ///
    /// # Errors
    /// Returns `EmbeddingError::Config` when no primary provider was set
    pub fn build(self) -> EmbedResult<UnifiedEmbeddingService> {
        let primary = self
            .primary
            .ok_or_else(|| EmbeddingError::Config("no primary embedding provider".to_string()))?;
        let fallback = self.fallback.filter(|kind| *kind != primary);
        let budget = self.budget.unwrap_or_else(|| {
            Arc::new(BudgetMonitor::in_memory(caredex_config::BudgetConfig::default()))
        });

        let stats = EmbeddingStats {
            primary_provider: primary.to_string(),
            fallback_provider: fallback.map(|kind| kind.to_string()),
            default_dimensions: self.default_dimensions,
            ..EmbeddingStats::default()
        };

        Ok(UnifiedEmbeddingService {
            providers: self.providers,
            primary,
            fallback,
            default_dimensions: self.default_dimensions,
            cache: self.cache,
            budget,
            estimator: self.estimator,
            stats: RwLock::new(stats),
        })
    }
}

impl Default for UnifiedEmbeddingServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::InMemoryUsageLedger;
    use crate::types::{DimensionAdjustment, TaskHint, TokenUsage};
    use caredex_config::{BudgetConfig, ProviderConfig};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    type ErrorFactory = fn(ProviderKind) -> EmbeddingError;

    /// Mock provider for testing without network
    struct MockEmbeddingProvider {
        config: ProviderConfig,
        calls: AtomicUsize,
        batch_sizes: Mutex<Vec<usize>>,
        fail_with: Option<ErrorFactory>,
        cost_per_item: f64,
    }

    impl MockEmbeddingProvider {
        fn new(kind: ProviderKind) -> Self {
            let config = match kind {
                ProviderKind::Gemini => ProviderConfig::gemini_defaults(),
                ProviderKind::OpenAi => ProviderConfig::openai_defaults(),
            };
            Self {
                config,
                calls: AtomicUsize::new(0),
                batch_sizes: Mutex::new(Vec::new()),
                fail_with: None,
                cost_per_item: 0.001,
            }
        }

        fn failing(kind: ProviderKind, error: ErrorFactory) -> Self {
            Self {
                fail_with: Some(error),
                ..Self::new(kind)
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl EmbeddingProvider for MockEmbeddingProvider {
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
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(error) = self.fail_with {
                return Err(error(self.kind()));
            }
            let dims = request.dimensions().unwrap_or(self.config.default_dimensions);
            Ok(EmbeddingResult {
                embedding: vec![request.text().len() as f32; dims],
                provider: self.kind(),
                model: model.to_string(),
                dimensions: dims,
                usage: TokenUsage::estimated(1),
                estimated_cost: self.cost_per_item,
                generation_time: Duration::from_millis(1),
                cache_hit: false,
                generated_at: chrono::Utc::now(),
                dimension_adjustment: DimensionAdjustment::None,
                truncated_input: false,
            })
        }

        async fn generate_batch(
            &self,
            requests: &[EmbeddingRequest],
            model: &str,
        ) -> EmbedResult<Vec<EmbeddingResult>> {
            self.batch_sizes.lock().unwrap().push(requests.len());
            let mut results = Vec::new();
            for request in requests {
                results.push(self.generate(request, model).await?);
            }
            Ok(results)
        }
    }

    fn auth_failure(provider: ProviderKind) -> EmbeddingError {
        EmbeddingError::AuthFailure {
            provider,
            status: 401,
            message: "invalid key".into(),
        }
    }

    fn quota(provider: ProviderKind) -> EmbeddingError {
        EmbeddingError::QuotaExhausted {
            provider,
            message: "daily quota".into(),
        }
    }

    fn service(
        primary: Arc<MockEmbeddingProvider>,
        fallback: Option<Arc<MockEmbeddingProvider>>,
    ) -> UnifiedEmbeddingService {
        let mut builder = UnifiedEmbeddingService::builder()
            .with_primary(primary)
            .with_default_dimensions(8)
            .with_cache(Arc::new(ResultCache::new(Duration::from_secs(60), 100)));
        if let Some(fallback) = fallback {
            builder = builder.with_fallback(fallback);
        }
        builder.build().unwrap()
    }

    #[test]
    fn test_phase_transitions() {
        use RequestPhase::{
            BudgetCheck, CacheCheck, CacheWrite, Done, Failed, FallbackGenerating, Generating,
            Pending,
        };
        assert!(Pending.can_advance_to(CacheCheck));
        assert!(CacheCheck.can_advance_to(Done));
        assert!(Generating.can_advance_to(FallbackGenerating));
        assert!(BudgetCheck.can_advance_to(Failed));
        assert!(FallbackGenerating.can_advance_to(CacheWrite));
        assert!(!Pending.can_advance_to(Generating));
        assert!(!FallbackGenerating.can_advance_to(Generating));
        assert!(!Done.can_advance_to(Failed));
        assert!(!CacheWrite.can_advance_to(BudgetCheck));
    }

    #[tokio::test]
    async fn test_second_call_served_from_cache() {
        let primary = Arc::new(MockEmbeddingProvider::new(ProviderKind::Gemini));
        let service = service(Arc::clone(&primary), None);

        let first = service
            .embed(EmbeddingRequest::new("Cardiology").unwrap(), &GenerateOptions::default())
            .await
            .unwrap();
        let second = service
            .embed(EmbeddingRequest::new("  cardiology ").unwrap(), &GenerateOptions::default())
            .await
            .unwrap();

        assert!(!first.cache_hit);
        assert!(second.cache_hit);
        assert_eq!(first.embedding, second.embedding);
        assert_eq!(primary.calls(), 1);

        let stats = service.get_stats().await;
        assert_eq!(stats.total_requests, 2);
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.provider_calls, 1);
    }

    #[tokio::test]
    async fn test_cache_bypass_option() {
        let primary = Arc::new(MockEmbeddingProvider::new(ProviderKind::Gemini));
        let service = service(Arc::clone(&primary), None);
        let options = GenerateOptions::default().without_cache();

        for _ in 0..2 {
            service
                .embed(EmbeddingRequest::new("Cardiology").unwrap(), &options)
                .await
                .unwrap();
        }
        assert_eq!(primary.calls(), 2);
    }

    #[tokio::test]
    async fn test_fallback_after_primary_failure() {
        let primary = Arc::new(MockEmbeddingProvider::failing(ProviderKind::Gemini, quota));
        let fallback = Arc::new(MockEmbeddingProvider::new(ProviderKind::OpenAi));
        let service = service(Arc::clone(&primary), Some(Arc::clone(&fallback)));

        let result = service
            .embed(EmbeddingRequest::new("Oncology").unwrap(), &GenerateOptions::default())
            .await
            .unwrap();

        assert_eq!(result.provider, ProviderKind::OpenAi);
        assert_eq!(result.model, "text-embedding-3-small");
        assert_eq!(result.embedding.len(), 8);
        assert_eq!(primary.calls(), 1);
        assert_eq!(fallback.calls(), 1);
        assert_eq!(service.get_stats().await.fallback_attempts, 1);
    }

    #[tokio::test]
    async fn test_all_providers_failed_names_both() {
        let primary = Arc::new(MockEmbeddingProvider::failing(ProviderKind::Gemini, quota));
        let fallback = Arc::new(MockEmbeddingProvider::failing(
            ProviderKind::OpenAi,
            auth_failure,
        ));
        let service = service(primary, Some(fallback));

        let err = service
            .embed(EmbeddingRequest::new("Oncology").unwrap(), &GenerateOptions::default())
            .await
            .unwrap_err();

        let message = err.to_string();
        assert!(matches!(err, EmbeddingError::AllProvidersFailed { .. }));
        assert!(message.contains("gemini"));
        assert!(message.contains("openai"));
        assert!(err.is_quota_exhausted());
        assert_eq!(service.get_stats().await.failures, 1);
    }

    #[tokio::test]
    async fn test_fallback_disabled_per_call() {
        let primary = Arc::new(MockEmbeddingProvider::failing(
            ProviderKind::Gemini,
            auth_failure,
        ));
        let fallback = Arc::new(MockEmbeddingProvider::new(ProviderKind::OpenAi));
        let service = service(primary, Some(Arc::clone(&fallback)));

        let err = service
            .embed(
                EmbeddingRequest::new("Oncology").unwrap(),
                &GenerateOptions::default().without_fallback(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, EmbeddingError::AuthFailure { .. }));
        assert_eq!(fallback.calls(), 0);
    }

    #[tokio::test]
    async fn test_budget_blocks_before_generation() {
        let primary = Arc::new(MockEmbeddingProvider::new(ProviderKind::OpenAi));
        let budget = Arc::new(BudgetMonitor::in_memory(BudgetConfig {
            daily_limit: 0.0,
            monthly_limit: 0.0,
            warning_threshold: 0.8,
            enforce_on_queries: false,
        }));
        let service = UnifiedEmbeddingService::builder()
            .with_primary(Arc::clone(&primary) as Arc<dyn EmbeddingProvider>)
            .with_budget(budget)
            .build()
            .unwrap();

        let err = service
            .embed(EmbeddingRequest::new("Oncology").unwrap(), &GenerateOptions::for_documents())
            .await
            .unwrap_err();
        assert!(matches!(err, EmbeddingError::BudgetExceeded { .. }));
        assert_eq!(primary.calls(), 0);
        assert_eq!(service.get_stats().await.budget_rejections, 1);

        // Queries skip the pre-check by default
        let query = service
            .embed(EmbeddingRequest::query("oncology").unwrap(), &service.query_options())
            .await
            .unwrap();
        assert_eq!(query.provider, ProviderKind::OpenAi);
    }

    #[tokio::test]
    async fn test_usage_recorded_in_ledger() {
        let ledger = Arc::new(InMemoryUsageLedger::new());
        let budget = Arc::new(BudgetMonitor::new(
            BudgetConfig::default(),
            Arc::clone(&ledger) as Arc<dyn crate::budget::UsageLedger>,
        ));
        let service = UnifiedEmbeddingService::builder()
            .with_primary(Arc::new(MockEmbeddingProvider::new(ProviderKind::Gemini)))
            .with_budget(budget)
            .build()
            .unwrap();

        service
            .embed(EmbeddingRequest::new("Neurology").unwrap(), &GenerateOptions::default())
            .await
            .unwrap();

        let records = ledger.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].provider, ProviderKind::Gemini);
        let state = service.budget_state().await.unwrap();
        assert!((state.daily_spend - 0.001).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_batch_preserves_order_and_only_sends_misses() {
        let primary = Arc::new(MockEmbeddingProvider::new(ProviderKind::Gemini));
        let service = service(Arc::clone(&primary), None);

        service
            .embed(EmbeddingRequest::new("bb").unwrap(), &GenerateOptions::default())
            .await
            .unwrap();

        let requests = ["a", "bb", "ccc", "dddd"]
            .iter()
            .map(|t| EmbeddingRequest::new(*t).unwrap())
            .collect();
        let results = service
            .embed_batch(requests, &GenerateOptions::default())
            .await
            .unwrap();

        let firsts: Vec<f32> = results.iter().map(|r| r.embedding[0]).collect();
        assert_eq!(firsts, vec![1.0, 2.0, 3.0, 4.0]);
        assert!(results[1].cache_hit);
        assert_eq!(*primary.batch_sizes.lock().unwrap(), vec![3]);
    }

    #[tokio::test]
    async fn test_default_dimensions_applied() {
        let primary = Arc::new(MockEmbeddingProvider::new(ProviderKind::Gemini));
        let service = service(primary, None);

        let default = service
            .embed(EmbeddingRequest::new("Dermatology").unwrap(), &GenerateOptions::default())
            .await
            .unwrap();
        let explicit = service
            .embed(
                EmbeddingRequest::new("Dermatology")
                    .unwrap()
                    .with_dimensions(16)
                    .with_task(TaskHint::Similarity),
                &GenerateOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(default.embedding.len(), 8);
        assert_eq!(explicit.embedding.len(), 16);
        assert!(!explicit.cache_hit);
    }

    #[tokio::test]
    async fn test_explicit_provider_and_model() {
        let primary = Arc::new(MockEmbeddingProvider::new(ProviderKind::Gemini));
        let other = Arc::new(MockEmbeddingProvider::new(ProviderKind::OpenAi));
        let service = service(Arc::clone(&primary), Some(Arc::clone(&other)));

        let result = service
            .embed(
                EmbeddingRequest::new("Radiology").unwrap(),
                &GenerateOptions::default()
                    .with_provider(ProviderKind::OpenAi)
                    .with_model("text-embedding-3-large"),
            )
            .await
            .unwrap();

        assert_eq!(result.provider, ProviderKind::OpenAi);
        assert_eq!(result.model, "text-embedding-3-large");
        assert_eq!(primary.calls(), 0);
    }
}
