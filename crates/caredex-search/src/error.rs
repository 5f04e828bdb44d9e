use caredex_common::CorrelationId;
use thiserror::Error;

/// Search-specific error types with correlation ID support
///
/// Embedding failures are deliberately absent: a query that cannot be
/// embedded is searched in text-only mode instead of failing.
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Search query is empty")]
    EmptyQuery,

    #[error("Entity search failed (correlation: {correlation_id}): {source}")]
    StoreFailed {
        correlation_id: CorrelationId,
        #[source]
        source: caredex_store::StoreError,
    },

    #[error(
        "Search timeout after {timeout_ms}ms for query '{query}' (correlation: {correlation_id})"
    )]
    SearchTimeout {
        query: String,
        timeout_ms: u64,
        correlation_id: CorrelationId,
    },
}

/// Result type for search operations
pub type SearchResult<T> = std::result::Result<T, SearchError>;
