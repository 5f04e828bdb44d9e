//! Embedding generation for the Caredex healthcare directory
//!
//! This crate turns hospital and doctor text into fixed-width vectors
//! through external embedding APIs (Gemini, `OpenAI`). The
//! [`UnifiedEmbeddingService`] is the entry point: it checks the
//! [`ResultCache`], gates spend with the [`BudgetMonitor`], calls the primary
//! provider with retry and falls back to the secondary provider on failure.

pub mod budget;
pub mod cache;
pub mod clock;
pub mod cost;
pub mod embedding;
pub mod error;
pub mod text;
pub mod types;

pub use budget::{
    BudgetCeiling, BudgetDecision, BudgetMonitor, BudgetState, InMemoryUsageLedger, UsageLedger,
    UsageRecord,
};
pub use cache::{CacheKey, CacheStats, ResultCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use cost::CostEstimator;
pub use embedding::{
    BudgetPolicy, EmbeddingProvider, EmbeddingService, EmbeddingStats, GeminiProvider,
    GenerateOptions, OpenAiProvider, ProviderFactory, RetryPolicy, UnifiedEmbeddingService,
};
pub use error::{EmbedResult, EmbeddingError, ProviderFailure, RetryClass};
pub use text::{estimate_tokens, normalize_text, truncate_at_word_boundary};
pub use types::{
    DimensionAdjustment, EmbeddingMetadata, EmbeddingRequest, EmbeddingResult, TaskHint,
    TokenUsage,
};
