//! Usage ledger persisted in the data store's usage table

use crate::rest::RestStore;
use async_trait::async_trait;
use caredex_embeddings::{EmbedResult, UsageLedger, UsageRecord};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// `UsageLedger` over the `embedding_usage` table, so spend survives restarts
pub struct RestUsageLedger {
    store: Arc<RestStore>,
}

impl RestUsageLedger {
    pub const fn new(store: Arc<RestStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl UsageLedger for RestUsageLedger {
    async fn spend_since(&self, since: DateTime<Utc>) -> EmbedResult<f64> {
        Ok(self.store.usage_since(since).await?)
    }

    async fn record(&self, record: UsageRecord) -> EmbedResult<()> {
        Ok(self.store.insert_usage(&record).await?)
    }
}
