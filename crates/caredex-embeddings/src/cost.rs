//! Per-provider, per-model cost estimation

use crate::text::estimate_tokens;
use caredex_config::{EmbeddingConfig, ProviderKind};
use std::collections::HashMap;

/// Published prices (USD per 1K input tokens) for models we know about
const KNOWN_MODEL_RATES: &[(ProviderKind, &str, f64)] = &[
    (ProviderKind::Gemini, "gemini-embedding-001", 0.000_15),
    (ProviderKind::Gemini, "text-embedding-004", 0.0),
    (ProviderKind::OpenAi, "text-embedding-3-small", 0.000_02),
    (ProviderKind::OpenAi, "text-embedding-3-large", 0.000_13),
    (ProviderKind::OpenAi, "text-embedding-ada-002", 0.000_1),
];

/// Estimates USD cost from token counts
///
/// Unknown models are priced at their provider's configured default rate.
#[derive(Debug, Clone)]
pub struct CostEstimator {
    rates: HashMap<(ProviderKind, String), f64>,
    provider_defaults: HashMap<ProviderKind, f64>,
}

impl Default for CostEstimator {
    fn default() -> Self {
        Self::from_config(&EmbeddingConfig::default())
    }
}

impl CostEstimator {
    /// Build the rate table, letting configured rates override published ones
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        let mut rates: HashMap<(ProviderKind, String), f64> = KNOWN_MODEL_RATES
            .iter()
            .map(|(kind, model, rate)| ((*kind, (*model).to_string()), *rate))
            .collect();
        let mut provider_defaults = HashMap::new();

        for kind in ProviderKind::ALL {
            let provider = config.provider(kind);
            rates.insert(
                (kind, provider.default_model.clone()),
                provider.cost_per_1k_tokens,
            );
            provider_defaults.insert(kind, provider.cost_per_1k_tokens);
        }

        Self {
            rates,
            provider_defaults,
        }
    }

    /// Override the rate for one model
    #[must_use]
    pub fn with_rate(mut self, provider: ProviderKind, model: impl Into<String>, per_1k: f64) -> Self {
        self.rates.insert((provider, model.into()), per_1k.max(0.0));
        self
    }

    /// USD per 1K tokens
    pub fn rate_per_1k(&self, provider: ProviderKind, model: &str) -> f64 {
        self.rates
            .get(&(provider, model.to_string()))
            .or_else(|| self.provider_defaults.get(&provider))
            .copied()
            .unwrap_or(0.0)
    }

    /// Cost of `tokens` input tokens
    pub fn estimate_cost(&self, tokens: u32, provider: ProviderKind, model: &str) -> f64 {
        f64::from(tokens) / 1000.0 * self.rate_per_1k(provider, model)
    }

    /// Cost of embedding `text`, using the length-based token estimate
    pub fn estimate_text_cost(&self, text: &str, provider: ProviderKind, model: &str) -> f64 {
        self.estimate_cost(estimate_tokens(text), provider, model)
    }

    /// Cost of embedding every text in `texts`
    pub fn estimate_batch_cost(&self, texts: &[&str], provider: ProviderKind, model: &str) -> f64 {
        texts
            .iter()
            .map(|text| self.estimate_text_cost(text, provider, model))
            .sum()
    }
}
