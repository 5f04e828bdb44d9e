//! Query-time entity search
//!
//! Embeds the query through the unified embedding service and hands the
//! vector plus filters to the external search procedure. When the query
//! cannot be embedded the procedure still runs, in text-only mode.

use crate::error::{SearchError, SearchResult};
use caredex_common::CorrelationId;
use caredex_embeddings::{EmbeddingRequest, EmbeddingService, GenerateOptions};
use caredex_store::{EntitySearch, SearchCandidate, SearchRequest};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// How a response was ranked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    /// Query vector plus text filters
    Semantic,
    /// Embedding failed; text filters only
    TextOnly,
}

/// Ranked candidates and how they were produced
#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub candidates: Vec<SearchCandidate>,
    pub mode: SearchMode,
    /// Why the query could not be embedded, in text-only mode
    pub embedding_error: Option<String>,
    pub correlation_id: CorrelationId,
    pub query_cache_hit: bool,
}

impl SearchResponse {
    pub const fn is_degraded(&self) -> bool {
        matches!(self.mode, SearchMode::TextOnly)
    }
}

/// Search over hospitals and doctors
pub struct EntitySearchService {
    embedding_service: Arc<dyn EmbeddingService>,
    search: Arc<dyn EntitySearch>,
    query_options: GenerateOptions,
    dimensions: Option<usize>,
    search_timeout: Duration,
}

impl EntitySearchService {
    pub fn new(embedding_service: Arc<dyn EmbeddingService>, search: Arc<dyn EntitySearch>) -> Self {
        Self {
            embedding_service,
            search,
            query_options: GenerateOptions::for_queries(),
            dimensions: None,
            search_timeout: Duration::from_secs(30),
        }
    }

    /// Options used for query embeddings (budget policy, provider override)
    #[must_use]
    pub fn with_query_options(mut self, options: GenerateOptions) -> Self {
        self.query_options = options;
        self
    }

    /// Query vector width; must match the stored entity vectors
    #[must_use]
    pub const fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = Some(dimensions);
        self
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.search_timeout = timeout;
        self
    }

    /// Run one search
    ///
    /// # Errors
    /// Returns `SearchError::EmptyQuery` for a blank query, or a store error
    /// or timeout from the search procedure. Embedding failures never error.
    #[tracing::instrument(skip(self, request), fields(query = %request.query_text, limit = request.limit))]
    pub async fn search(&self, mut request: SearchRequest) -> SearchResult<SearchResponse> {
        let query = request.query_text.trim().to_string();
        if query.is_empty() {
            return Err(SearchError::EmptyQuery);
        }
        request.query_text.clone_from(&query);
        request.query_embedding = None;

        let correlation_id = CorrelationId::new();
        let options = self
            .query_options
            .clone()
            .with_correlation_id(correlation_id);
        let dimensions = self
            .dimensions
            .unwrap_or_else(|| self.embedding_service.default_dimensions());

        let mut embedding_error = None;
        let mut query_cache_hit = false;
        match EmbeddingRequest::query(query.clone()) {
            Ok(embedding_request) => {
                match self
                    .embedding_service
                    .embed(embedding_request.with_dimensions(dimensions), &options)
                    .await
                {
                    Ok(result) => {
                        query_cache_hit = result.cache_hit;
                        request.query_embedding = Some(result.embedding);
                    }
                    Err(e) => {
                        tracing::warn!(
                            correlation_id = %correlation_id,
                            error = %e,
                            "Query embedding failed, falling back to text-only search"
                        );
                        embedding_error = Some(e.to_string());
                    }
                }
            }
            Err(e) => embedding_error = Some(e.to_string()),
        }

        let mode = if request.query_embedding.is_some() {
            SearchMode::Semantic
        } else {
            SearchMode::TextOnly
        };
        metrics::counter!(
            "caredex_search_requests_total",
            "mode" => if mode == SearchMode::Semantic { "semantic" } else { "text_only" }
        )
        .increment(1);

        let search = self.search.search_entities(&request);
        let candidates = tokio::time::timeout(self.search_timeout, search)
            .await
            .map_err(|_| SearchError::SearchTimeout {
                query: query.clone(),
                timeout_ms: u64::try_from(self.search_timeout.as_millis()).unwrap_or(u64::MAX),
                correlation_id,
            })?
            .map_err(|source| SearchError::StoreFailed {
                correlation_id,
                source,
            })?;

        tracing::info!(
            correlation_id = %correlation_id,
            results = candidates.len(),
            mode = ?mode,
            "Search complete"
        );

        Ok(SearchResponse {
            candidates,
            mode,
            embedding_error,
            correlation_id,
            query_cache_hit,
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use caredex_store::{EntityKind, InMemoryEntityStore};
    use caredex_test_utils::ScriptedEmbeddingService;

    fn candidate(name: &str, kind: EntityKind) -> SearchCandidate {
        SearchCandidate {
            id: caredex_store::Entity::new(kind, name).id,
            kind,
            name: name.to_string(),
            city: Some("Seattle".to_string()),
            state: Some("WA".to_string()),
            score: 0.9,
            similarity: Some(0.8),
        }
    }

    fn store_with_results() -> InMemoryEntityStore {
        let store = InMemoryEntityStore::new();
        store.set_search_results(vec![
            candidate("Seattle Children's", EntityKind::Hospital),
            candidate("Dr. Jane Doe", EntityKind::Doctor),
        ]);
        store
    }

    #[tokio::test]
    async fn test_semantic_search_sends_query_vector() {
        let store = store_with_results();
        let service = EntitySearchService::new(
            Arc::new(ScriptedEmbeddingService::new(768)),
            Arc::new(store.clone()),
        );

        let response = service
            .search(SearchRequest::new("  pediatric cardiology ").with_location("Seattle"))
            .await
            .unwrap();

        assert_eq!(response.mode, SearchMode::Semantic);
        assert_eq!(response.candidates.len(), 2);
        let sent = store.recorded_searches();
        assert_eq!(sent[0].query_text, "pediatric cardiology");
        assert_eq!(sent[0].query_embedding.as_ref().map(Vec::len), Some(768));
        assert_eq!(sent[0].location_filter.as_deref(), Some("Seattle"));
    }

    #[tokio::test]
    async fn test_embedding_failure_degrades_to_text_only() {
        let store = store_with_results();
        let embeddings = ScriptedEmbeddingService::new(768);
        embeddings.set_over_budget(true);
        let service = EntitySearchService::new(Arc::new(embeddings), Arc::new(store.clone()));

        let response = service
            .search(SearchRequest::new("cardiologist near me"))
            .await
            .unwrap();

        assert!(response.is_degraded());
        assert!(response.embedding_error.is_some());
        assert_eq!(response.candidates.len(), 2);
        assert!(store.recorded_searches()[0].query_embedding.is_none());
    }

    #[tokio::test]
    async fn test_kind_filter_and_limit_pass_through() {
        let store = store_with_results();
        let service = EntitySearchService::new(
            Arc::new(ScriptedEmbeddingService::new(64)),
            Arc::new(store.clone()),
        );

        let response = service
            .search(
                SearchRequest::new("heart doctor")
                    .with_kinds(vec![EntityKind::Doctor])
                    .with_limit(1),
            )
            .await
            .unwrap();

        assert_eq!(response.candidates.len(), 1);
        assert_eq!(response.candidates[0].kind, EntityKind::Doctor);
    }

    #[tokio::test]
    async fn test_blank_query_rejected() {
        let service = EntitySearchService::new(
            Arc::new(ScriptedEmbeddingService::new(64)),
            Arc::new(InMemoryEntityStore::new()),
        );
        assert!(matches!(
            service.search(SearchRequest::new("   ")).await,
            Err(SearchError::EmptyQuery)
        ));
    }

    #[tokio::test]
    async fn test_store_failure_surfaces() {
        let store = InMemoryEntityStore::new();
        store.fail_next("gateway down");
        let service = EntitySearchService::new(
            Arc::new(ScriptedEmbeddingService::new(64)),
            Arc::new(store),
        );
        let err = service.search(SearchRequest::new("oncology")).await.unwrap_err();
        assert!(matches!(err, SearchError::StoreFailed { .. }));
    }
}
