//! Request and result types shared by providers, the cache and the service

use crate::error::{EmbedResult, EmbeddingError};
use caredex_config::ProviderKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Intended use of an embedding, forwarded to providers that accept one
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskHint {
    /// Stored entity text (hospital or doctor profile)
    #[default]
    Document,
    /// Free-text search query
    Query,
    /// Symmetric similarity comparison
    Similarity,
}

impl TaskHint {
    /// Gemini `taskType` value
    pub const fn gemini_task_type(self) -> &'static str {
        match self {
            Self::Document => "RETRIEVAL_DOCUMENT",
            Self::Query => "RETRIEVAL_QUERY",
            Self::Similarity => "SEMANTIC_SIMILARITY",
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Query => "query",
            Self::Similarity => "similarity",
        }
    }
}

impl fmt::Display for TaskHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single text to embed
///
/// Constructed per call; the text is guaranteed non-blank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddingRequest {
    text: String,
    dimensions: Option<usize>,
    task: TaskHint,
    title: Option<String>,
}

impl EmbeddingRequest {
    /// Create a document request
    ///
    /// # Errors
    /// Returns `EmbeddingError::InvalidInput` for empty or whitespace-only text
    pub fn new(text: impl Into<String>) -> EmbedResult<Self> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(EmbeddingError::invalid_input("text must not be empty"));
        }
        Ok(Self {
            text,
            dimensions: None,
            task: TaskHint::Document,
            title: None,
        })
    }

    /// Create a query request
    ///
    /// # Errors
    /// Returns `EmbeddingError::InvalidInput` for empty or whitespace-only text
    pub fn query(text: impl Into<String>) -> EmbedResult<Self> {
        Ok(Self::new(text)?.with_task(TaskHint::Query))
    }

    #[must_use]
    pub const fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = Some(dimensions);
        self
    }

    #[must_use]
    pub const fn with_task(mut self, task: TaskHint) -> Self {
        self.task = task;
        self
    }

    /// Title sent alongside document embeddings where the provider supports it
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        let title = title.into();
        self.title = (!title.trim().is_empty()).then_some(title);
        self
    }

    /// Fill in the dimensionality when the caller did not ask for one
    #[must_use]
    pub const fn resolve_dimensions(mut self, default: usize) -> Self {
        if self.dimensions.is_none() {
            self.dimensions = Some(default);
        }
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub const fn dimensions(&self) -> Option<usize> {
        self.dimensions
    }

    pub const fn task(&self) -> TaskHint {
        self.task
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }
}

/// Token accounting for one generated embedding
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub total_tokens: u32,
    /// True when the provider did not report usage and it was estimated from text length
    pub estimated: bool,
}

impl TokenUsage {
    pub const fn reported(input_tokens: u32, total_tokens: u32) -> Self {
        Self {
            input_tokens,
            total_tokens,
            estimated: false,
        }
    }

    pub const fn estimated(tokens: u32) -> Self {
        Self {
            input_tokens: tokens,
            total_tokens: tokens,
            estimated: true,
        }
    }
}

/// How the provider's vector was reshaped to the requested width
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DimensionAdjustment {
    #[default]
    None,
    /// Shorter native vector extended by cyclic duplication
    Padded { native: usize },
    /// Longer native vector cut to the requested width
    Truncated { native: usize },
}

impl DimensionAdjustment {
    pub const fn is_adjusted(self) -> bool {
        !matches!(self, Self::None)
    }
}

/// A generated (or cached) embedding with its provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingResult {
    pub embedding: Vec<f32>,
    pub provider: ProviderKind,
    pub model: String,
    pub dimensions: usize,
    pub usage: TokenUsage,
    pub estimated_cost: f64,
    #[serde(with = "duration_millis")]
    pub generation_time: Duration,
    pub cache_hit: bool,
    pub generated_at: DateTime<Utc>,
    pub dimension_adjustment: DimensionAdjustment,
    /// Input was cut at a word boundary to fit the provider's length limit
    pub truncated_input: bool,
}

impl EmbeddingResult {
    /// Provenance without the vector, for persistence alongside it
    pub fn metadata(&self) -> EmbeddingMetadata {
        EmbeddingMetadata {
            provider: self.provider,
            model: self.model.clone(),
            dimensions: self.dimensions,
            input_tokens: self.usage.input_tokens,
            estimated_cost: self.estimated_cost,
            generated_at: self.generated_at,
            dimension_adjustment: self.dimension_adjustment,
            truncated_input: self.truncated_input,
        }
    }
}

/// Stored next to each entity's vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingMetadata {
    pub provider: ProviderKind,
    pub model: String,
    pub dimensions: usize,
    pub input_tokens: u32,
    pub estimated_cost: f64,
    pub generated_at: DateTime<Utc>,
    pub dimension_adjustment: DimensionAdjustment,
    pub truncated_input: bool,
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_text_rejected() {
        assert!(matches!(
            EmbeddingRequest::new("   \n\t"),
            Err(EmbeddingError::InvalidInput { .. })
        ));
        assert!(EmbeddingRequest::query("").is_err());
    }

    #[test]
    fn test_request_builder() {
        let request = EmbeddingRequest::new("Cardiology clinic")
            .unwrap()
            .with_title("St. Mary")
            .resolve_dimensions(768);
        assert_eq!(request.dimensions(), Some(768));
        assert_eq!(request.task(), TaskHint::Document);
        assert_eq!(request.title(), Some("St. Mary"));

        // An explicit width wins over the default
        let explicit = EmbeddingRequest::query("heart")
            .unwrap()
            .with_dimensions(1536)
            .resolve_dimensions(768);
        assert_eq!(explicit.dimensions(), Some(1536));
        assert_eq!(explicit.task(), TaskHint::Query);
    }

    #[test]
    fn test_gemini_task_types() {
        assert_eq!(TaskHint::Document.gemini_task_type(), "RETRIEVAL_DOCUMENT");
        assert_eq!(TaskHint::Query.gemini_task_type(), "RETRIEVAL_QUERY");
        assert_eq!(
            TaskHint::Similarity.gemini_task_type(),
            "SEMANTIC_SIMILARITY"
        );
    }

    #[test]
    fn test_metadata_serializes_adjustment() {
        let result = EmbeddingResult {
            embedding: vec![0.1, 0.2],
            provider: ProviderKind::OpenAi,
            model: "text-embedding-3-small".into(),
            dimensions: 2,
            usage: TokenUsage::estimated(3),
            estimated_cost: 0.0,
            generation_time: Duration::from_millis(12),
            cache_hit: false,
            generated_at: Utc::now(),
            dimension_adjustment: DimensionAdjustment::Padded { native: 1 },
            truncated_input: false,
        };
        let json = serde_json::to_value(result.metadata()).unwrap();
        assert_eq!(json["provider"], "openai");
        assert_eq!(json["dimension_adjustment"]["kind"], "padded");
        assert_eq!(json["dimension_adjustment"]["native"], 1);
    }
}
