//! Caredex data layer over the hosted directory database
//!
//! Entities live in per-kind tables behind a PostgREST gateway. The
//! [`EntityStore`] and [`EntitySearch`] traits are what the indexing and
//! search crates depend on; [`RestStore`] is the production implementation
//! and [`InMemoryEntityStore`] backs tests.

pub mod error;
pub mod ledger;
pub mod models;
pub mod rest;
pub mod traits;

pub mod mock;
pub use mock::InMemoryEntityStore;

// Public exports
pub use caredex_config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use ledger::RestUsageLedger;
pub use models::{EmbeddingUpdate, Entity, EntityKind, SearchCandidate, SearchRequest};
pub use rest::RestStore;
pub use traits::{EntitySearch, EntityStore};
