//! Shared test utilities for Caredex integration tests
//!
//! Provides network-free embedding providers and services with scripted
//! failures, an [`InFlightProbe`] for asserting concurrency bounds, and
//! directory fixtures.
//!
//! ## Usage
//!
//! In your test crate's `Cargo.toml`:
//! ```toml
//! [dev-dependencies]
//! caredex-test-utils = { path = "../caredex-test-utils" }
//! ```

// Test infrastructure: panicking on a poisoned lock is acceptable
#![allow(clippy::unwrap_used)]
#![allow(clippy::significant_drop_tightening)]

pub mod fixtures;
pub mod probe;
pub mod provider;
pub mod service;

pub use fixtures::{e2e_entities, sample_directory, test_budget_config, test_embedding_config};
pub use probe::{InFlightGuard, InFlightProbe};
pub use provider::{MockProvider, deterministic_vector};
pub use service::ScriptedEmbeddingService;
