//! Centralized configuration management for caredex
//!
//! This crate provides a unified configuration system for the embedding
//! pipeline: provider credentials and defaults, result cache, retry policy,
//! spend ceilings, batch indexing and the hosted data store.
//!
//! Configuration follows a simple hierarchy:
//! 1. Safe defaults (defined as constants)
//! 2. Environment variable overrides
//! 3. Optional file source (TOML or YAML)
//! 4. Runtime validation

pub mod error;
pub mod source;
pub mod validation;

pub use error::{ConfigError, ConfigResult};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// =============================================================================
// SAFE DEFAULTS - Work for any environment (dev, staging, prod, test)
// =============================================================================

// Provider selection
const DEFAULT_PRIMARY_PROVIDER: ProviderKind = ProviderKind::Gemini; // Free tier first
const DEFAULT_FALLBACK_PROVIDER: ProviderKind = ProviderKind::OpenAi;
const DEFAULT_FALLBACK_ENABLED: bool = true;
const DEFAULT_EMBEDDING_DIMENSIONS: usize = 768;
const DEFAULT_TRUNCATE_OVERSIZED: bool = true;
const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 30;

// Gemini
const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const DEFAULT_GEMINI_MODEL: &str = "gemini-embedding-001";
const DEFAULT_GEMINI_DIMENSIONS: usize = 768;
const GEMINI_SUPPORTED_DIMENSIONS: [usize; 3] = [768, 1536, 3072];
const DEFAULT_GEMINI_MAX_INPUT_CHARS: usize = 8_000; // ~2048 tokens
const DEFAULT_GEMINI_COST_PER_1K_TOKENS: f64 = 0.000_15;

// OpenAI
const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_OPENAI_MODEL: &str = "text-embedding-3-small";
const DEFAULT_OPENAI_DIMENSIONS: usize = 1536;
const OPENAI_SUPPORTED_DIMENSIONS: [usize; 3] = [512, 768, 1536];
const DEFAULT_OPENAI_MAX_INPUT_CHARS: usize = 32_000; // ~8191 tokens
const DEFAULT_OPENAI_COST_PER_1K_TOKENS: f64 = 0.000_02;

// Result cache
const DEFAULT_CACHE_ENABLED: bool = true;
const DEFAULT_CACHE_TTL_SECS: u64 = 3600; // 1 hour
const DEFAULT_CACHE_MAX_ENTRIES: usize = 10_000;
const DEFAULT_CACHE_SWEEP_PROBABILITY: f64 = 0.1;

// Retry policy
const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 500;
const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 30_000;
const DEFAULT_RETRY_RATE_LIMIT_MULTIPLIER: f64 = 4.0;
const DEFAULT_RETRY_JITTER_RATIO: f64 = 0.25;

// Budget
const DEFAULT_BUDGET_DAILY_LIMIT: f64 = 5.0;
const DEFAULT_BUDGET_MONTHLY_LIMIT: f64 = 50.0;
const DEFAULT_BUDGET_WARNING_THRESHOLD: f64 = 0.8;
const DEFAULT_BUDGET_ENFORCE_ON_QUERIES: bool = false; // Latency over strict pre-check

// Batch indexing
const DEFAULT_INDEXING_BATCH_SIZE: usize = 20;
const DEFAULT_INDEXING_MAX_BATCH_SIZE: usize = 100; // Provider-imposed ceiling
const DEFAULT_INDEXING_MAX_CONCURRENCY: usize = 3;
const DEFAULT_INDEXING_LONG_TEXT_CHARS: usize = 2000;
const DEFAULT_INDEXING_SHORT_TEXT_CHARS: usize = 500;

// Hosted data store (PostgREST-compatible)
const DEFAULT_STORE_TIMEOUT_SECS: u64 = 30;
const DEFAULT_HOSPITALS_TABLE: &str = "hospitals";
const DEFAULT_DOCTORS_TABLE: &str = "doctors";
const DEFAULT_USAGE_TABLE: &str = "embedding_usage";
const DEFAULT_SEARCH_FUNCTION: &str = "search_entities";

// Telemetry
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_JSON_LOGS: bool = false;

/// Read and parse an environment variable, falling back to `default`
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

/// Read an environment variable, treating blank values as absent
fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// External embedding providers with a client implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProviderKind {
    /// Google Gemini embedding API
    #[serde(rename = "gemini")]
    Gemini,

    /// `OpenAI` embeddings API
    #[serde(rename = "openai")]
    OpenAi,
}

impl ProviderKind {
    /// All known providers, in default priority order
    pub const ALL: [Self; 2] = [Self::Gemini, Self::OpenAi];

    /// Stable lowercase identifier used in config, logs and stored metadata
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Gemini => "gemini",
            Self::OpenAi => "openai",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gemini" | "google" => Ok(Self::Gemini),
            "openai" | "open-ai" => Ok(Self::OpenAi),
            other => Err(ConfigError::UnknownProvider {
                name: other.to_string(),
            }),
        }
    }
}

/// Core configuration for the entire caredex application
///
/// All settings have safe defaults and can be overridden via environment variables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Embedding providers, cache and retry behaviour
    pub embedding: EmbeddingConfig,

    /// Daily/monthly spend ceilings
    pub budget: BudgetConfig,

    /// Batch indexing configuration
    pub indexing: IndexingConfig,

    /// Hosted entity store configuration
    pub store: StoreConfig,

    /// Logging configuration
    pub telemetry: TelemetryConfig,
}

impl ApplicationConfig {
    /// Load configuration from environment variables with safe defaults
    pub fn from_env() -> Self {
        Self {
            embedding: EmbeddingConfig::from_env(),
            budget: BudgetConfig::from_env(),
            indexing: IndexingConfig::from_env(),
            store: StoreConfig::from_env(),
            telemetry: TelemetryConfig::from_env(),
        }
    }
}

impl validation::Validate for ApplicationConfig {
    fn validate(&self) -> ConfigResult<()> {
        self.embedding.validate()?;
        self.budget.validate()?;
        self.indexing.validate()?;
        self.store.validate()?;
        validation::validate_non_empty(&self.telemetry.log_level, "telemetry.log_level")?;
        Ok(())
    }
}

/// Embedding configuration - provider selection plus shared pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Provider used unless a call overrides it
    pub primary_provider: ProviderKind,

    /// Provider tried after the primary terminally fails
    pub fallback_provider: Option<ProviderKind>,

    /// Process-wide switch for fallback; calls may still opt out individually
    pub fallback_enabled: bool,

    /// Dimensionality requested when a call does not specify one
    pub default_dimensions: usize,

    /// Truncate oversized input at a word boundary (true) or reject it (false)
    pub truncate_oversized: bool,

    /// Gemini client settings
    pub gemini: ProviderConfig,

    /// `OpenAI` client settings
    pub openai: ProviderConfig,

    /// Result cache settings
    pub cache: CacheConfig,

    /// Low-level retry/backoff settings shared by all provider clients
    pub retry: RetryConfig,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            primary_provider: DEFAULT_PRIMARY_PROVIDER,
            fallback_provider: Some(DEFAULT_FALLBACK_PROVIDER),
            fallback_enabled: DEFAULT_FALLBACK_ENABLED,
            default_dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
            truncate_oversized: DEFAULT_TRUNCATE_OVERSIZED,
            gemini: ProviderConfig::gemini_defaults(),
            openai: ProviderConfig::openai_defaults(),
            cache: CacheConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl EmbeddingConfig {
    /// Load configuration from environment variables with safe defaults
    pub fn from_env() -> Self {
        let primary_provider = env_string("CAREDEX_EMBEDDING_PROVIDER")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_PRIMARY_PROVIDER);

        // "none" disables the fallback entirely
        let fallback_provider = match env_string("CAREDEX_EMBEDDING_FALLBACK_PROVIDER") {
            Some(value) if value.eq_ignore_ascii_case("none") => None,
            Some(value) => value.parse().ok(),
            None => Some(DEFAULT_FALLBACK_PROVIDER),
        };

        let timeout_secs = env_or(
            "CAREDEX_PROVIDER_TIMEOUT_SECS",
            DEFAULT_PROVIDER_TIMEOUT_SECS,
        );

        let mut gemini = ProviderConfig::gemini_defaults();
        gemini.api_key = env_string("GEMINI_API_KEY").or_else(|| env_string("GOOGLE_API_KEY"));
        gemini.default_model = env_or("CAREDEX_GEMINI_MODEL", gemini.default_model);
        gemini.base_url = env_or("CAREDEX_GEMINI_BASE_URL", gemini.base_url);
        gemini.timeout_secs = timeout_secs;

        let mut openai = ProviderConfig::openai_defaults();
        openai.api_key = env_string("OPENAI_API_KEY");
        openai.default_model = env_or("CAREDEX_OPENAI_MODEL", openai.default_model);
        openai.base_url = env_or("CAREDEX_OPENAI_BASE_URL", openai.base_url);
        openai.timeout_secs = timeout_secs;

        Self {
            primary_provider,
            fallback_provider,
            fallback_enabled: env_or(
                "CAREDEX_EMBEDDING_FALLBACK_ENABLED",
                DEFAULT_FALLBACK_ENABLED,
            ),
            default_dimensions: env_or(
                "CAREDEX_EMBEDDING_DIMENSIONS",
                DEFAULT_EMBEDDING_DIMENSIONS,
            ),
            truncate_oversized: env_or(
                "CAREDEX_EMBEDDING_TRUNCATE_OVERSIZED",
                DEFAULT_TRUNCATE_OVERSIZED,
            ),
            gemini,
            openai,
            cache: CacheConfig::from_env(),
            retry: RetryConfig::from_env(),
        }
    }

    /// Settings for one provider
    pub const fn provider(&self, kind: ProviderKind) -> &ProviderConfig {
        match kind {
            ProviderKind::Gemini => &self.gemini,
            ProviderKind::OpenAi => &self.openai,
        }
    }

    /// Providers that have credentials, in priority order (primary first)
    pub fn configured_providers(&self) -> Vec<ProviderKind> {
        let mut kinds: Vec<ProviderKind> = ProviderKind::ALL
            .into_iter()
            .filter(|kind| self.provider(*kind).has_credentials())
            .collect();
        kinds.sort_by_key(|kind| *kind != self.primary_provider);
        kinds
    }

    /// Primary provider actually usable at startup
    ///
    /// If the configured primary has no credentials, the first provider that
    /// does is promoted and a warning is logged.
    ///
    /// # Errors
    /// Returns `ConfigError::NoProviderCredentials` if no provider has credentials
    pub fn effective_primary(&self) -> ConfigResult<ProviderKind> {
        if self.provider(self.primary_provider).has_credentials() {
            return Ok(self.primary_provider);
        }

        let promoted = self
            .configured_providers()
            .into_iter()
            .next()
            .ok_or(ConfigError::NoProviderCredentials)?;
        tracing::warn!(
            configured = %self.primary_provider,
            promoted = %promoted,
            "Primary embedding provider has no credentials; promoting next configured provider"
        );
        Ok(promoted)
    }

    /// Fallback provider actually usable at startup
    ///
    /// Returns `None` (with a warning) when fallback is enabled but the
    /// fallback provider has no credentials or equals the primary.
    pub fn effective_fallback(&self, primary: ProviderKind) -> Option<ProviderKind> {
        if !self.fallback_enabled {
            return None;
        }
        let fallback = self.fallback_provider?;
        if fallback == primary {
            tracing::warn!(
                provider = %fallback,
                "Fallback provider is the same as the primary; fallback disabled"
            );
            return None;
        }
        if !self.provider(fallback).has_credentials() {
            tracing::warn!(
                provider = %fallback,
                "Fallback provider has no credentials; continuing without fallback"
            );
            return None;
        }
        Some(fallback)
    }
}

impl validation::Validate for EmbeddingConfig {
    fn validate(&self) -> ConfigResult<()> {
        validation::validate_range(
            self.default_dimensions as u64,
            1,
            10_000,
            "embedding.default_dimensions",
        )?;

        self.gemini.validate()?;
        self.openai.validate()?;
        self.cache.validate()?;
        self.retry.validate()?;

        // Absence of every credential is fatal; a missing fallback is only a warning
        if self.configured_providers().is_empty() {
            return Err(ConfigError::NoProviderCredentials);
        }
        if let Ok(primary) = self.effective_primary() {
            let _ = self.effective_fallback(primary);
        }

        Ok(())
    }
}

/// Per-provider client configuration, loaded once at startup
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Which provider these settings belong to
    pub kind: ProviderKind,

    /// Model used when a call does not name one
    pub default_model: String,

    /// Native output width when no supported dimensionality is requested
    pub default_dimensions: usize,

    /// Output widths the provider can produce natively
    pub supported_dimensions: Vec<usize>,

    /// Maximum input length in characters
    pub max_input_chars: usize,

    /// Estimated USD cost per 1,000 input tokens for the default model
    pub cost_per_1k_tokens: f64,

    /// API base URL (overridable for proxies and tests)
    pub base_url: String,

    /// Per-request timeout
    pub timeout_secs: u64,

    /// API credential; never serialized
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("kind", &self.kind)
            .field("default_model", &self.default_model)
            .field("default_dimensions", &self.default_dimensions)
            .field("supported_dimensions", &self.supported_dimensions)
            .field("max_input_chars", &self.max_input_chars)
            .field("cost_per_1k_tokens", &self.cost_per_1k_tokens)
            .field("base_url", &self.base_url)
            .field("timeout_secs", &self.timeout_secs)
            .field("has_credentials", &self.has_credentials())
            .finish()
    }
}

impl ProviderConfig {
    /// Gemini defaults without credentials
    pub fn gemini_defaults() -> Self {
        Self {
            kind: ProviderKind::Gemini,
            default_model: DEFAULT_GEMINI_MODEL.to_string(),
            default_dimensions: DEFAULT_GEMINI_DIMENSIONS,
            supported_dimensions: GEMINI_SUPPORTED_DIMENSIONS.to_vec(),
            max_input_chars: DEFAULT_GEMINI_MAX_INPUT_CHARS,
            cost_per_1k_tokens: DEFAULT_GEMINI_COST_PER_1K_TOKENS,
            base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            timeout_secs: DEFAULT_PROVIDER_TIMEOUT_SECS,
            api_key: None,
        }
    }

    /// `OpenAI` defaults without credentials
    pub fn openai_defaults() -> Self {
        Self {
            kind: ProviderKind::OpenAi,
            default_model: DEFAULT_OPENAI_MODEL.to_string(),
            default_dimensions: DEFAULT_OPENAI_DIMENSIONS,
            supported_dimensions: OPENAI_SUPPORTED_DIMENSIONS.to_vec(),
            max_input_chars: DEFAULT_OPENAI_MAX_INPUT_CHARS,
            cost_per_1k_tokens: DEFAULT_OPENAI_COST_PER_1K_TOKENS,
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            timeout_secs: DEFAULT_PROVIDER_TIMEOUT_SECS,
            api_key: None,
        }
    }

    /// Set the credential (builder style, mostly for tests and tooling)
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Point the client at a different base URL
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Whether a non-empty credential is present
    pub fn has_credentials(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }
}

impl validation::Validate for ProviderConfig {
    fn validate(&self) -> ConfigResult<()> {
        let field = |name: &str| format!("embedding.{}.{name}", self.kind);

        validation::validate_non_empty(&self.default_model, &field("default_model"))?;
        validation::validate_url(&self.base_url, &field("base_url"))?;
        validation::validate_range(
            self.default_dimensions as u64,
            1,
            10_000,
            &field("default_dimensions"),
        )?;
        if !self.supported_dimensions.contains(&self.default_dimensions) {
            return Err(ConfigError::Generic {
                message: format!(
                    "{} ({}) is not among supported dimensions {:?}",
                    field("default_dimensions"),
                    self.default_dimensions,
                    self.supported_dimensions
                ),
            });
        }
        validation::validate_range(
            self.max_input_chars as u64,
            1,
            1_000_000,
            &field("max_input_chars"),
        )?;
        validation::validate_float_range(
            self.cost_per_1k_tokens,
            0.0,
            1.0,
            &field("cost_per_1k_tokens"),
        )?;
        validation::validate_range(self.timeout_secs, 1, 600, &field("timeout_secs"))?;
        Ok(())
    }
}

/// In-process result cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Whether lookups and writes happen at all
    pub enabled: bool,

    /// Maximum age of an entry before it is treated as a miss
    pub ttl_secs: u64,

    /// Size threshold that forces a sweep on write
    pub max_entries: usize,

    /// Fraction of writes that also trigger an opportunistic sweep
    pub sweep_probability: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: DEFAULT_CACHE_ENABLED,
            ttl_secs: DEFAULT_CACHE_TTL_SECS,
            max_entries: DEFAULT_CACHE_MAX_ENTRIES,
            sweep_probability: DEFAULT_CACHE_SWEEP_PROBABILITY,
        }
    }
}

impl CacheConfig {
    /// Load configuration from environment variables with safe defaults
    pub fn from_env() -> Self {
        Self {
            enabled: env_or("CAREDEX_CACHE_ENABLED", DEFAULT_CACHE_ENABLED),
            ttl_secs: env_or("CAREDEX_CACHE_TTL_SECS", DEFAULT_CACHE_TTL_SECS),
            max_entries: env_or("CAREDEX_CACHE_MAX_ENTRIES", DEFAULT_CACHE_MAX_ENTRIES),
            sweep_probability: env_or(
                "CAREDEX_CACHE_SWEEP_PROBABILITY",
                DEFAULT_CACHE_SWEEP_PROBABILITY,
            ),
        }
    }
}

impl validation::Validate for CacheConfig {
    fn validate(&self) -> ConfigResult<()> {
        validation::validate_range(self.ttl_secs, 1, 7 * 24 * 3600, "cache.ttl_secs")?;
        validation::validate_range(self.max_entries as u64, 1, 10_000_000, "cache.max_entries")?;
        validation::validate_float_range(self.sweep_probability, 0.0, 1.0, "cache.sweep_probability")
    }
}

/// Retry/backoff settings for provider clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first call
    pub max_attempts: u32,

    /// Delay before the first retry
    pub base_delay_ms: u64,

    /// Upper bound for any single delay
    pub max_delay_ms: u64,

    /// Extra multiplier applied to rate-limit (429) backoff
    pub rate_limit_multiplier: f64,

    /// Random jitter as a fraction of the computed delay
    pub jitter_ratio: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_RETRY_MAX_DELAY_MS,
            rate_limit_multiplier: DEFAULT_RETRY_RATE_LIMIT_MULTIPLIER,
            jitter_ratio: DEFAULT_RETRY_JITTER_RATIO,
        }
    }
}

impl RetryConfig {
    /// Load configuration from environment variables with safe defaults
    pub fn from_env() -> Self {
        Self {
            max_attempts: env_or("CAREDEX_RETRY_MAX_ATTEMPTS", DEFAULT_RETRY_MAX_ATTEMPTS),
            base_delay_ms: env_or("CAREDEX_RETRY_BASE_DELAY_MS", DEFAULT_RETRY_BASE_DELAY_MS),
            max_delay_ms: env_or("CAREDEX_RETRY_MAX_DELAY_MS", DEFAULT_RETRY_MAX_DELAY_MS),
            rate_limit_multiplier: env_or(
                "CAREDEX_RETRY_RATE_LIMIT_MULTIPLIER",
                DEFAULT_RETRY_RATE_LIMIT_MULTIPLIER,
            ),
            jitter_ratio: env_or("CAREDEX_RETRY_JITTER_RATIO", DEFAULT_RETRY_JITTER_RATIO),
        }
    }
}

impl validation::Validate for RetryConfig {
    fn validate(&self) -> ConfigResult<()> {
        validation::validate_range(u64::from(self.max_attempts), 1, 10, "retry.max_attempts")?;
        validation::validate_range(self.base_delay_ms, 0, 60_000, "retry.base_delay_ms")?;
        validation::validate_range(self.max_delay_ms, 0, 600_000, "retry.max_delay_ms")?;
        if self.max_delay_ms < self.base_delay_ms {
            return Err(ConfigError::Generic {
                message: format!(
                    "retry.max_delay_ms ({}) must be >= retry.base_delay_ms ({})",
                    self.max_delay_ms, self.base_delay_ms
                ),
            });
        }
        validation::validate_float_range(
            self.rate_limit_multiplier,
            1.0,
            100.0,
            "retry.rate_limit_multiplier",
        )?;
        validation::validate_float_range(self.jitter_ratio, 0.0, 1.0, "retry.jitter_ratio")
    }
}

/// Spend ceilings enforced before generation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Maximum estimated USD spend per calendar day (UTC)
    pub daily_limit: f64,

    /// Maximum estimated USD spend per calendar month (UTC)
    pub monthly_limit: f64,

    /// Fraction of a ceiling at which a non-blocking warning is emitted
    pub warning_threshold: f64,

    /// Also gate single ad-hoc query embeddings (off: latency wins)
    pub enforce_on_queries: bool,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            daily_limit: DEFAULT_BUDGET_DAILY_LIMIT,
            monthly_limit: DEFAULT_BUDGET_MONTHLY_LIMIT,
            warning_threshold: DEFAULT_BUDGET_WARNING_THRESHOLD,
            enforce_on_queries: DEFAULT_BUDGET_ENFORCE_ON_QUERIES,
        }
    }
}

impl BudgetConfig {
    /// Load configuration from environment variables with safe defaults
    pub fn from_env() -> Self {
        Self {
            daily_limit: env_or("CAREDEX_BUDGET_DAILY_LIMIT", DEFAULT_BUDGET_DAILY_LIMIT),
            monthly_limit: env_or("CAREDEX_BUDGET_MONTHLY_LIMIT", DEFAULT_BUDGET_MONTHLY_LIMIT),
            warning_threshold: env_or(
                "CAREDEX_BUDGET_WARNING_THRESHOLD",
                DEFAULT_BUDGET_WARNING_THRESHOLD,
            ),
            enforce_on_queries: env_or(
                "CAREDEX_BUDGET_ENFORCE_ON_QUERIES",
                DEFAULT_BUDGET_ENFORCE_ON_QUERIES,
            ),
        }
    }
}

impl validation::Validate for BudgetConfig {
    fn validate(&self) -> ConfigResult<()> {
        validation::validate_float_range(self.daily_limit, 0.0, 1_000_000.0, "budget.daily_limit")?;
        validation::validate_float_range(
            self.monthly_limit,
            0.0,
            10_000_000.0,
            "budget.monthly_limit",
        )?;
        validation::validate_float_range(
            self.warning_threshold,
            0.0,
            1.0,
            "budget.warning_threshold",
        )?;
        if self.monthly_limit < self.daily_limit {
            tracing::warn!(
                daily = self.daily_limit,
                monthly = self.monthly_limit,
                "Monthly budget is lower than the daily budget; the monthly ceiling will dominate"
            );
        }
        Ok(())
    }
}

/// Batch indexing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexingConfig {
    /// Baseline items per provider round-trip before adaptive adjustment
    pub batch_size: usize,

    /// Hard provider-imposed ceiling on items per round-trip
    pub max_batch_size: usize,

    /// Maximum simultaneously in-flight batches
    pub max_concurrency: usize,

    /// Average prepared-text length above which batches shrink
    pub long_text_chars: usize,

    /// Average prepared-text length below which batches grow
    pub short_text_chars: usize,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_INDEXING_BATCH_SIZE,
            max_batch_size: DEFAULT_INDEXING_MAX_BATCH_SIZE,
            max_concurrency: DEFAULT_INDEXING_MAX_CONCURRENCY,
            long_text_chars: DEFAULT_INDEXING_LONG_TEXT_CHARS,
            short_text_chars: DEFAULT_INDEXING_SHORT_TEXT_CHARS,
        }
    }
}

impl IndexingConfig {
    /// Load configuration from environment variables with safe defaults
    pub fn from_env() -> Self {
        Self {
            batch_size: env_or("CAREDEX_INDEXING_BATCH_SIZE", DEFAULT_INDEXING_BATCH_SIZE),
            max_batch_size: env_or(
                "CAREDEX_INDEXING_MAX_BATCH_SIZE",
                DEFAULT_INDEXING_MAX_BATCH_SIZE,
            ),
            max_concurrency: env_or(
                "CAREDEX_INDEXING_MAX_CONCURRENCY",
                DEFAULT_INDEXING_MAX_CONCURRENCY,
            ),
            long_text_chars: env_or(
                "CAREDEX_INDEXING_LONG_TEXT_CHARS",
                DEFAULT_INDEXING_LONG_TEXT_CHARS,
            ),
            short_text_chars: env_or(
                "CAREDEX_INDEXING_SHORT_TEXT_CHARS",
                DEFAULT_INDEXING_SHORT_TEXT_CHARS,
            ),
        }
    }
}

impl validation::Validate for IndexingConfig {
    fn validate(&self) -> ConfigResult<()> {
        validation::validate_range(
            self.max_batch_size as u64,
            1,
            2048,
            "indexing.max_batch_size",
        )?;
        validation::validate_range(
            self.batch_size as u64,
            1,
            self.max_batch_size as u64,
            "indexing.batch_size",
        )?;
        validation::validate_range(
            self.max_concurrency as u64,
            1,
            64,
            "indexing.max_concurrency",
        )?;
        if self.short_text_chars >= self.long_text_chars {
            return Err(ConfigError::Generic {
                message: format!(
                    "indexing.short_text_chars ({}) must be below indexing.long_text_chars ({})",
                    self.short_text_chars, self.long_text_chars
                ),
            });
        }
        Ok(())
    }
}

/// Hosted entity store (PostgREST-compatible REST API)
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Base URL of the REST API; `None` disables store-backed commands
    pub url: Option<String>,

    /// Service key sent as `apikey` and bearer token; never serialized
    #[serde(skip_serializing)]
    pub api_key: Option<String>,

    /// Per-request timeout
    pub timeout_secs: u64,

    /// Table holding hospital rows
    pub hospitals_table: String,

    /// Table holding doctor rows
    pub doctors_table: String,

    /// Table receiving one row per successful generation
    pub usage_table: String,

    /// Stored procedure performing ranked entity search
    pub search_function: String,
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("url", &self.url)
            .field("has_api_key", &self.api_key.is_some())
            .field("timeout_secs", &self.timeout_secs)
            .field("hospitals_table", &self.hospitals_table)
            .field("doctors_table", &self.doctors_table)
            .field("usage_table", &self.usage_table)
            .field("search_function", &self.search_function)
            .finish()
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: None,
            api_key: None,
            timeout_secs: DEFAULT_STORE_TIMEOUT_SECS,
            hospitals_table: DEFAULT_HOSPITALS_TABLE.to_string(),
            doctors_table: DEFAULT_DOCTORS_TABLE.to_string(),
            usage_table: DEFAULT_USAGE_TABLE.to_string(),
            search_function: DEFAULT_SEARCH_FUNCTION.to_string(),
        }
    }
}

impl StoreConfig {
    /// Load configuration from environment variables with safe defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            url: env_string("CAREDEX_STORE_URL"),
            api_key: env_string("CAREDEX_STORE_API_KEY"),
            timeout_secs: env_or("CAREDEX_STORE_TIMEOUT_SECS", DEFAULT_STORE_TIMEOUT_SECS),
            hospitals_table: env_or("CAREDEX_STORE_HOSPITALS_TABLE", defaults.hospitals_table),
            doctors_table: env_or("CAREDEX_STORE_DOCTORS_TABLE", defaults.doctors_table),
            usage_table: env_or("CAREDEX_STORE_USAGE_TABLE", defaults.usage_table),
            search_function: env_or("CAREDEX_STORE_SEARCH_FUNCTION", defaults.search_function),
        }
    }
}

impl validation::Validate for StoreConfig {
    fn validate(&self) -> ConfigResult<()> {
        if let Some(url) = &self.url {
            validation::validate_url(url, "store.url")?;
        }
        validation::validate_range(self.timeout_secs, 1, 600, "store.timeout_secs")?;
        validation::validate_non_empty(&self.hospitals_table, "store.hospitals_table")?;
        validation::validate_non_empty(&self.doctors_table, "store.doctors_table")?;
        validation::validate_non_empty(&self.usage_table, "store.usage_table")?;
        validation::validate_non_empty(&self.search_function, "store.search_function")
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset
    pub log_level: String,

    /// Emit newline-delimited JSON instead of human-readable lines
    pub json_logs: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            json_logs: DEFAULT_JSON_LOGS,
        }
    }
}

impl TelemetryConfig {
    /// Load configuration from environment variables with safe defaults
    pub fn from_env() -> Self {
        Self {
            log_level: env_or("CAREDEX_LOG_LEVEL", DEFAULT_LOG_LEVEL.to_string()),
            json_logs: env_or("CAREDEX_JSON_LOGS", DEFAULT_JSON_LOGS),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::validation::Validate;
    use super::*;

    fn config_with_keys(gemini: bool, openai: bool) -> EmbeddingConfig {
        let mut config = EmbeddingConfig::default();
        if gemini {
            config.gemini.api_key = Some("g-key".to_string());
        }
        if openai {
            config.openai.api_key = Some("o-key".to_string());
        }
        config
    }

    #[test]
    fn test_defaults_are_valid_once_credentials_exist() {
        let mut app = ApplicationConfig::default();
        app.embedding = config_with_keys(true, true);
        assert!(app.validate().is_ok());
    }

    #[test]
    fn test_no_credentials_is_fatal() {
        let config = config_with_keys(false, false);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NoProviderCredentials)
        ));
        assert!(matches!(
            config.effective_primary(),
            Err(ConfigError::NoProviderCredentials)
        ));
    }

    #[test]
    fn test_missing_fallback_credentials_disables_fallback() {
        let config = config_with_keys(true, false);
        assert!(config.validate().is_ok());
        assert_eq!(config.effective_primary().unwrap(), ProviderKind::Gemini);
        assert_eq!(config.effective_fallback(ProviderKind::Gemini), None);
    }

    #[test]
    fn test_primary_without_credentials_is_promoted() {
        let config = config_with_keys(false, true);
        assert_eq!(config.effective_primary().unwrap(), ProviderKind::OpenAi);
        // Fallback would be OpenAI itself, which is now the primary
        assert_eq!(config.effective_fallback(ProviderKind::OpenAi), None);
    }

    #[test]
    fn test_configured_providers_lists_primary_first() {
        let mut config = config_with_keys(true, true);
        config.primary_provider = ProviderKind::OpenAi;
        assert_eq!(
            config.configured_providers(),
            vec![ProviderKind::OpenAi, ProviderKind::Gemini]
        );
    }

    #[test]
    fn test_provider_kind_parsing() {
        assert_eq!("Gemini".parse::<ProviderKind>().unwrap(), ProviderKind::Gemini);
        assert_eq!(" openai ".parse::<ProviderKind>().unwrap(), ProviderKind::OpenAi);
        assert!(matches!(
            "cohere".parse::<ProviderKind>(),
            Err(ConfigError::UnknownProvider { .. })
        ));
    }

    #[test]
    fn test_debug_output_redacts_api_key() {
        let provider = ProviderConfig::gemini_defaults().with_api_key("super-secret");
        let rendered = format!("{provider:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("has_credentials: true"));
    }

    #[test]
    fn test_unsupported_default_dimensions_rejected() {
        let mut provider = ProviderConfig::openai_defaults();
        provider.default_dimensions = 1000;
        assert!(provider.validate().is_err());
    }

    #[test]
    fn test_indexing_thresholds_must_be_ordered() {
        let indexing = IndexingConfig {
            short_text_chars: 3000,
            ..IndexingConfig::default()
        };
        assert!(indexing.validate().is_err());
    }

    #[test]
    fn test_batch_size_cannot_exceed_ceiling() {
        let indexing = IndexingConfig {
            batch_size: 500,
            max_batch_size: 100,
            ..IndexingConfig::default()
        };
        assert!(matches!(
            indexing.validate(),
            Err(ConfigError::OutOfRange { .. })
        ));
    }
}
