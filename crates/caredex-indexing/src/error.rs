//! Error types for indexing orchestration

use caredex_common::CommonError;
use caredex_embeddings::EmbeddingError;
use caredex_store::StoreError;
use serde::Serialize;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Result type alias for indexing operations
pub type IndexingResult<T> = Result<T, IndexingError>;

/// Job-level failures; per-entity failures are [`ItemError`]s instead
#[derive(Error, Debug)]
pub enum IndexingError {
    #[error("Indexing job {job_id} is already in progress")]
    AlreadyInProgress { job_id: Uuid },

    #[error("Entity discovery failed: {0}")]
    Discovery(#[from] StoreError),

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Invalid job target: {0}")]
    InvalidTarget(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Indexing task failed: {0}")]
    Other(String),
}

impl CommonError for IndexingError {
    fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    fn parse_error(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    fn other_error(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}

/// Stage at which one entity failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemErrorKind {
    /// No provider produced a vector
    Generation,
    /// Vector produced but the store rejected the update
    Persistence,
    /// Blocked by a budget ceiling before any provider call
    Budget,
}

impl fmt::Display for ItemErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Generation => "generation",
            Self::Persistence => "persistence",
            Self::Budget => "budget",
        })
    }
}

/// One entity that could not be indexed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemError {
    pub entity_id: Uuid,
    pub entity_name: String,
    pub message: String,
    pub kind: ItemErrorKind,
}

impl ItemError {
    pub fn generation(entity: &caredex_store::Entity, error: &EmbeddingError) -> Self {
        let kind = if matches!(error, EmbeddingError::BudgetExceeded { .. }) {
            ItemErrorKind::Budget
        } else {
            ItemErrorKind::Generation
        };
        Self {
            entity_id: entity.id,
            entity_name: entity.name.clone(),
            message: error.to_string(),
            kind,
        }
    }

    pub fn persistence(entity: &caredex_store::Entity, error: &StoreError) -> Self {
        Self {
            entity_id: entity.id,
            entity_name: entity.name.clone(),
            message: error.to_string(),
            kind: ItemErrorKind::Persistence,
        }
    }
}

impl fmt::Display for ItemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) {} failure: {}",
            self.entity_name, self.entity_id, self.kind, self.message
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use caredex_store::{Entity, EntityKind};

    #[test]
    fn test_budget_errors_are_classified_separately() {
        let entity = Entity::new(EntityKind::Hospital, "Mercy");
        let error = EmbeddingError::BudgetExceeded {
            ceiling: caredex_embeddings::BudgetCeiling::Monthly,
            reason: "monthly budget exhausted".to_string(),
        };
        let item = ItemError::generation(&entity, &error);
        assert_eq!(item.kind, ItemErrorKind::Budget);
        assert_eq!(item.entity_id, entity.id);
    }

    #[test]
    fn test_persistence_error_display_names_entity() {
        let entity = Entity::new(EntityKind::Doctor, "Dr. Grey");
        let item = ItemError::persistence(&entity, &StoreError::NotFound { id: entity.id });
        let text = item.to_string();
        assert!(text.starts_with("Dr. Grey"));
        assert!(text.contains("persistence failure"));
    }
}
