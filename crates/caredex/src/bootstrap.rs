//! Application bootstrap and service wiring
//!
//! Keeps configuration loading and dependency construction out of the
//! command handlers.

use caredex_config::ApplicationConfig;
use caredex_config::source::{ConfigurationLoader, EnvironmentSource, file_source};
use caredex_embeddings::{
    BudgetMonitor, InMemoryUsageLedger, UnifiedEmbeddingService, UsageLedger,
};
use caredex_store::{RestStore, RestUsageLedger};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Bootstrap result type
pub type BootstrapResult<T> = anyhow::Result<T>;

/// Load configuration from defaults, the environment and an optional file
///
/// # Errors
///
/// Returns error if the merged configuration fails validation
pub fn load_config(config_file: Option<&Path>) -> BootstrapResult<ApplicationConfig> {
    let mut loader = ConfigurationLoader::new().add_source(Box::new(EnvironmentSource));
    if let Some(path) = config_file {
        loader = loader.add_source(file_source(path));
    }
    Ok(loader.load()?)
}

/// Connect to the hosted data store, if one is configured
///
/// # Errors
///
/// Returns error if the store client cannot be built
pub fn setup_store(config: &ApplicationConfig) -> BootstrapResult<Option<Arc<RestStore>>> {
    if config.store.url.is_none() {
        info!("No data store configured");
        return Ok(None);
    }
    info!("Initializing data store client...");
    Ok(Some(Arc::new(RestStore::new(config.store.clone())?)))
}

/// Budget monitor backed by the store's usage table, or in memory without one
pub fn setup_budget(
    config: &ApplicationConfig,
    store: Option<&Arc<RestStore>>,
) -> Arc<BudgetMonitor> {
    let ledger: Arc<dyn UsageLedger> = if let Some(store) = store {
        Arc::new(RestUsageLedger::new(Arc::clone(store)))
    } else {
        warn!("Usage ledger is in memory; spend resets when the process exits");
        Arc::new(InMemoryUsageLedger::new())
    };
    Arc::new(BudgetMonitor::new(config.budget.clone(), ledger))
}

/// Build the unified embedding service
///
/// # Errors
///
/// Returns error if no provider can be constructed
pub fn setup_embedding_service(
    config: &ApplicationConfig,
    budget: Arc<BudgetMonitor>,
) -> BootstrapResult<Arc<UnifiedEmbeddingService>> {
    info!("Initializing embedding service...");
    Ok(Arc::new(UnifiedEmbeddingService::from_config(
        &config.embedding,
        budget,
    )?))
}

/// Require a store for commands that read or write entities
///
/// # Errors
///
/// Returns error when `store.url` is not configured
pub fn require_store(store: Option<Arc<RestStore>>) -> BootstrapResult<Arc<RestStore>> {
    store.ok_or_else(|| {
        anyhow::anyhow!("this command needs a data store; set CAREDEX_STORE_URL and CAREDEX_STORE_API_KEY")
    })
}
