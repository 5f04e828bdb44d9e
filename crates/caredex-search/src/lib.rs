//! Entity search with query embeddings and a text-only fallback

pub mod error;
pub mod search;

pub use error::{SearchError, SearchResult};
pub use search::{EntitySearchService, SearchMode, SearchResponse};
