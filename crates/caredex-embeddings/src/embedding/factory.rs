//! Provider construction from configuration

use super::gemini::GeminiProvider;
use super::openai::OpenAiProvider;
use super::retry::RetryPolicy;
use super::traits::EmbeddingProvider;
use crate::cost::CostEstimator;
use crate::error::{EmbedResult, EmbeddingError};
use caredex_config::{EmbeddingConfig, ProviderKind};
use std::collections::HashMap;
use std::sync::Arc;

/// Providers available to the service, keyed by kind
pub type ProviderRegistry = HashMap<ProviderKind, Arc<dyn EmbeddingProvider>>;

/// Builds provider clients that share one retry policy and rate table
pub struct ProviderFactory {
    config: EmbeddingConfig,
    retry: RetryPolicy,
    estimator: CostEstimator,
}

impl ProviderFactory {
    pub fn new(config: &EmbeddingConfig) -> Self {
        Self {
            config: config.clone(),
            retry: RetryPolicy::from(&config.retry),
            estimator: CostEstimator::from_config(config),
        }
    }

    /// Create the client for `kind`
    ///
    /// # Errors
    /// Returns `EmbeddingError::ProviderUnavailable` when the provider has no credentials
    pub fn create(&self, kind: ProviderKind) -> EmbedResult<Arc<dyn EmbeddingProvider>> {
        let provider_config = self.config.provider(kind).clone();
        let truncate = self.config.truncate_oversized;

        let provider: Arc<dyn EmbeddingProvider> = match kind {
            ProviderKind::Gemini => Arc::new(
                GeminiProvider::new(provider_config)?
                    .with_retry_policy(self.retry)
                    .with_cost_estimator(self.estimator.clone())
                    .with_truncation(truncate),
            ),
            ProviderKind::OpenAi => Arc::new(
                OpenAiProvider::new(provider_config)?
                    .with_retry_policy(self.retry)
                    .with_cost_estimator(self.estimator.clone())
                    .with_truncation(truncate),
            ),
        };

        tracing::debug!(
            provider = %kind,
            model = provider.default_model(),
            "Created embedding provider"
        );
        Ok(provider)
    }

    /// Create a client from a provider name such as `"gemini"` or `"openai"`
    ///
    /// # Errors
    /// Returns `EmbeddingError::Config` for unknown names and
    /// `EmbeddingError::ProviderUnavailable` without credentials
    pub fn create_by_name(&self, name: &str) -> EmbedResult<Arc<dyn EmbeddingProvider>> {
        let kind: ProviderKind = name.parse()?;
        self.create(kind)
    }

    /// Every provider that has credentials
    pub fn create_configured(&self) -> ProviderRegistry {
        self.config
            .configured_providers()
            .into_iter()
            .filter_map(|kind| match self.create(kind) {
                Ok(provider) => Some((kind, provider)),
                Err(e) => {
                    tracing::warn!(provider = %kind, error = %e, "Skipping embedding provider");
                    None
                }
            })
            .collect()
    }
}
