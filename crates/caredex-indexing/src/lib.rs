//! Indexing orchestration for Caredex
//!
//! Discovers directory entities that need vectors, embeds them in bounded
//! concurrent batches through the unified embedding service, and writes the
//! results back to the entity store.

pub mod batch;
pub mod error;
pub mod job;
pub mod progress;
pub mod sizing;

// Re-export error types
pub use error::{IndexingError, IndexingResult, ItemError, ItemErrorKind};

// Re-export main orchestration types
pub use batch::{BatchOptions, BatchOrchestrator, BatchOutcome, BatchStats, EntityEmbedding};
pub use job::{IndexingJob, IndexingJobManager, JobHandle, JobRequest, JobState, JobTarget};
pub use progress::{ProgressObserver, ProgressSnapshot, ProgressTracker};
pub use sizing::BatchSizing;
