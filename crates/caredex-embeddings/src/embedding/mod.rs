//! Embedding providers and the unified service built on top of them

pub mod dimensions;
pub mod factory;
pub mod gemini;
mod http;
pub mod openai;
pub mod retry;
pub mod service;
pub mod traits;

pub use dimensions::{NegotiatedDimensions, fit_to_dimensions, negotiate_dimensions};
pub use factory::{ProviderFactory, ProviderRegistry};
pub use gemini::GeminiProvider;
pub use openai::OpenAiProvider;
pub use retry::{RetryDecision, RetryPolicy, retry_with_policy};
pub use service::{RequestPhase, UnifiedEmbeddingService, UnifiedEmbeddingServiceBuilder};
pub use traits::{BudgetPolicy, EmbeddingProvider, EmbeddingService, EmbeddingStats, GenerateOptions};
