//! Store traits for dependency injection and testing

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StoreResult;
use crate::models::{EmbeddingUpdate, Entity, EntityKind, SearchCandidate, SearchRequest};

/// Read entities and write their embeddings
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Entities of the given kinds that have no stored embedding
    async fn find_missing_embeddings(
        &self,
        kinds: &[EntityKind],
        limit: Option<usize>,
    ) -> StoreResult<Vec<Entity>>;

    /// Entities with the given ids, across all kinds; unknown ids are skipped
    async fn fetch_entities(&self, ids: &[Uuid]) -> StoreResult<Vec<Entity>>;

    /// Every entity of the given kinds
    async fn fetch_all(&self, kinds: &[EntityKind]) -> StoreResult<Vec<Entity>>;

    /// Atomically replace one entity's vector and metadata
    async fn update_embedding(&self, update: &EmbeddingUpdate) -> StoreResult<()>;
}

/// The external "search entities" procedure
#[async_trait]
pub trait EntitySearch: Send + Sync {
    /// Ranked candidates; `request.query_embedding == None` means text-only
    async fn search_entities(&self, request: &SearchRequest) -> StoreResult<Vec<SearchCandidate>>;
}
