//! In-memory implementation of the store traits for testing

// Allow test-specific patterns in mock implementation
#![allow(clippy::unwrap_used)] // Mocks can panic on lock poisoning
#![allow(clippy::significant_drop_tightening)] // Mock locks don't need optimization

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::models::{EmbeddingUpdate, Entity, EntityKind, SearchCandidate, SearchRequest};
use crate::traits::{EntitySearch, EntityStore};

type EntityList = Arc<Mutex<Vec<Entity>>>;
type UpdateMap = Arc<Mutex<HashMap<Uuid, EmbeddingUpdate>>>;

/// Mock store for testing
#[derive(Clone, Default)]
pub struct InMemoryEntityStore {
    pub entities: EntityList,
    pub updates: UpdateMap,
    pub search_requests: Arc<Mutex<Vec<SearchRequest>>>,
    pub search_results: Arc<Mutex<Vec<SearchCandidate>>>,

    // Behavior controls for testing
    should_fail_next: Arc<Mutex<Option<String>>>,
    failing_updates: Arc<Mutex<HashSet<Uuid>>>,
}

impl InMemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with entities
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned
    pub fn with_entities(entities: Vec<Entity>) -> Self {
        let store = Self::new();
        store.entities.lock().unwrap().extend(entities);
        store
    }

    /// Configure the next operation to fail
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned
    pub fn fail_next(&self, message: &str) {
        *self.should_fail_next.lock().unwrap() = Some(message.to_string());
    }

    /// Make every update for `id` fail
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned
    pub fn fail_updates_for(&self, id: Uuid) {
        self.failing_updates.lock().unwrap().insert(id);
    }

    /// Candidates returned by every search
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned
    pub fn set_search_results(&self, results: Vec<SearchCandidate>) {
        *self.search_results.lock().unwrap() = results;
    }

    /// Stored update for one entity, if any
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned
    pub fn update_for(&self, id: Uuid) -> Option<EmbeddingUpdate> {
        self.updates.lock().unwrap().get(&id).cloned()
    }

    /// Number of entities that have a stored embedding
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned
    pub fn embedded_count(&self) -> usize {
        self.updates.lock().unwrap().len()
    }

    /// Requests seen by `search_entities`
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned
    pub fn recorded_searches(&self) -> Vec<SearchRequest> {
        self.search_requests.lock().unwrap().clone()
    }

    fn check_fail(&self) -> StoreResult<()> {
        match self.should_fail_next.lock().unwrap().take() {
            Some(message) => Err(StoreError::Other(message)),
            None => Ok(()),
        }
    }

    fn select(&self, predicate: impl Fn(&Entity) -> bool) -> Vec<Entity> {
        self.entities
            .lock()
            .unwrap()
            .iter()
            .filter(|entity| predicate(entity))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn find_missing_embeddings(
        &self,
        kinds: &[EntityKind],
        limit: Option<usize>,
    ) -> StoreResult<Vec<Entity>> {
        self.check_fail()?;
        let embedded: HashSet<Uuid> = self.updates.lock().unwrap().keys().copied().collect();
        let mut missing =
            self.select(|entity| kinds.contains(&entity.kind) && !embedded.contains(&entity.id));
        if let Some(limit) = limit {
            missing.truncate(limit);
        }
        Ok(missing)
    }

    async fn fetch_entities(&self, ids: &[Uuid]) -> StoreResult<Vec<Entity>> {
        self.check_fail()?;
        Ok(self.select(|entity| ids.contains(&entity.id)))
    }

    async fn fetch_all(&self, kinds: &[EntityKind]) -> StoreResult<Vec<Entity>> {
        self.check_fail()?;
        Ok(self.select(|entity| kinds.contains(&entity.kind)))
    }

    async fn update_embedding(&self, update: &EmbeddingUpdate) -> StoreResult<()> {
        self.check_fail()?;
        if self.failing_updates.lock().unwrap().contains(&update.entity_id) {
            return Err(StoreError::Http {
                operation: "update embedding".to_string(),
                status: 500,
                message: "simulated write failure".to_string(),
            });
        }
        let known = self
            .entities
            .lock()
            .unwrap()
            .iter()
            .any(|entity| entity.id == update.entity_id);
        if !known {
            return Err(StoreError::NotFound {
                id: update.entity_id,
            });
        }
        self.updates
            .lock()
            .unwrap()
            .insert(update.entity_id, update.clone());
        Ok(())
    }
}

#[async_trait]
impl EntitySearch for InMemoryEntityStore {
    async fn search_entities(&self, request: &SearchRequest) -> StoreResult<Vec<SearchCandidate>> {
        self.check_fail()?;
        self.search_requests.lock().unwrap().push(request.clone());
        let results = self.search_results.lock().unwrap();
        Ok(results
            .iter()
            .filter(|candidate| request.kinds.contains(&candidate.kind))
            .take(request.limit)
            .cloned()
            .collect())
    }
}
