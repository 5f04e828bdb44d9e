//! PostgREST-backed entity store
//!
//! Talks to `{url}/rest/v1/{table}` with the `apikey` and bearer headers a
//! hosted Postgres (Supabase-style) gateway expects. Vectors live in an
//! `embedding` column next to an `embedding_metadata` JSON column.

use crate::error::{StoreError, StoreResult};
use crate::models::{
    ENTITY_COLUMNS, EmbeddingUpdate, Entity, EntityKind, EntityRow, SearchCandidate, SearchRequest,
};
use crate::traits::{EntitySearch, EntityStore};
use async_trait::async_trait;
use caredex_common::decode_json;
use caredex_config::StoreConfig;
use chrono::Utc;
use secrecy::{ExposeSecret, Secret};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use uuid::Uuid;

/// HTTP client for the hosted data store
pub struct RestStore {
    client: reqwest::Client,
    base_url: String,
    api_key: Secret<String>,
    config: StoreConfig,
}

impl RestStore {
    /// Build a client from configuration
    ///
    /// # Errors
    /// Returns `StoreError::NotConfigured` when the URL or key is missing
    pub fn new(config: StoreConfig) -> StoreResult<Self> {
        let url = config
            .url
            .clone()
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| StoreError::NotConfigured("CAREDEX_STORE_URL is not set".to_string()))?;
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                StoreError::NotConfigured("CAREDEX_STORE_API_KEY is not set".to_string())
            })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| StoreError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: format!("{}/rest/v1", url.trim_end_matches('/')),
            api_key: Secret::new(api_key),
            config,
        })
    }

    pub const fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let key = self.api_key.expose_secret();
        self.client
            .request(method, format!("{}/{path}", self.base_url))
            .header("apikey", key)
            .bearer_auth(key)
    }

    async fn send(&self, operation: &str, builder: reqwest::RequestBuilder) -> StoreResult<String> {
        let response = builder.send().await.map_err(|e| StoreError::Transport {
            operation: operation.to_string(),
            message: e.to_string(),
        })?;
        let status = response.status();
        let body = response.text().await.map_err(|e| StoreError::Transport {
            operation: operation.to_string(),
            message: e.to_string(),
        })?;

        if status.is_success() {
            Ok(body)
        } else {
            Err(StoreError::Http {
                operation: operation.to_string(),
                status: status.as_u16(),
                message: body.chars().take(300).collect(),
            })
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        operation: &str,
        path: &str,
        query: &[(&str, String)],
    ) -> StoreResult<T> {
        let body = self
            .send(operation, self.request(reqwest::Method::GET, path).query(query))
            .await?;
        decode_json::<T, StoreError>(&body, operation)
    }

    async fn select_entities(
        &self,
        kind: EntityKind,
        filters: &[(&str, String)],
    ) -> StoreResult<Vec<Entity>> {
        let mut query = vec![("select", ENTITY_COLUMNS.to_string())];
        query.extend(filters.iter().cloned());
        let rows: Vec<EntityRow> = self
            .get_json(&format!("select {kind}s"), kind.table(&self.config), &query)
            .await?;
        Ok(rows.into_iter().map(|row| row.into_entity(kind)).collect())
    }

    /// Sum of `estimated_cost` recorded at or after `since` in the usage table
    pub(crate) async fn usage_since(&self, since: chrono::DateTime<Utc>) -> StoreResult<f64> {
        #[derive(serde::Deserialize)]
        struct CostRow {
            estimated_cost: f64,
        }

        let query = [
            ("select", "estimated_cost".to_string()),
            (
                "recorded_at",
                format!(
                    "gte.{}",
                    since.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
                ),
            ),
        ];
        let rows: Vec<CostRow> = self
            .get_json("read usage ledger", &self.config.usage_table, &query)
            .await?;
        Ok(rows.iter().map(|row| row.estimated_cost).sum())
    }

    /// Append one row to the usage table
    pub(crate) async fn insert_usage<T: Serialize + Sync>(&self, row: &T) -> StoreResult<()> {
        let builder = self
            .request(reqwest::Method::POST, &self.config.usage_table)
            .header("Prefer", "return=minimal")
            .json(row);
        self.send("record usage", builder).await.map(|_| ())
    }
}

#[derive(Serialize)]
struct EmbeddingPatch<'a> {
    embedding: &'a [f32],
    embedding_metadata: &'a caredex_embeddings::EmbeddingMetadata,
    embedding_updated_at: chrono::DateTime<Utc>,
}

#[derive(Serialize)]
struct SearchParams<'a> {
    query_text: &'a str,
    query_embedding: Option<&'a [f32]>,
    location_filter: Option<&'a str>,
    filters: &'a std::collections::BTreeMap<String, String>,
    entity_kinds: Vec<&'static str>,
    match_limit: usize,
}

fn id_list(ids: &[Uuid]) -> String {
    let joined = ids.iter().map(Uuid::to_string).collect::<Vec<_>>().join(",");
    format!("in.({joined})")
}

#[async_trait]
impl EntityStore for RestStore {
    #[tracing::instrument(skip(self), fields(kinds = ?kinds))]
    async fn find_missing_embeddings(
        &self,
        kinds: &[EntityKind],
        limit: Option<usize>,
    ) -> StoreResult<Vec<Entity>> {
        let mut filters = vec![("embedding", "is.null".to_string())];
        if let Some(limit) = limit {
            filters.push(("limit", limit.to_string()));
        }

        let mut entities = Vec::new();
        for kind in kinds {
            entities.extend(self.select_entities(*kind, &filters).await?);
        }
        tracing::debug!(count = entities.len(), "Found entities without embeddings");
        Ok(entities)
    }

    async fn fetch_entities(&self, ids: &[Uuid]) -> StoreResult<Vec<Entity>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let filters = [("id", id_list(ids))];
        let mut entities = Vec::new();
        for kind in EntityKind::ALL {
            entities.extend(self.select_entities(kind, &filters).await?);
        }
        Ok(entities)
    }

    async fn fetch_all(&self, kinds: &[EntityKind]) -> StoreResult<Vec<Entity>> {
        let mut entities = Vec::new();
        for kind in kinds {
            entities.extend(self.select_entities(*kind, &[]).await?);
        }
        Ok(entities)
    }

    #[tracing::instrument(skip(self, update), fields(entity_id = %update.entity_id, kind = %update.kind))]
    async fn update_embedding(&self, update: &EmbeddingUpdate) -> StoreResult<()> {
        let patch = EmbeddingPatch {
            embedding: &update.embedding,
            embedding_metadata: &update.metadata,
            embedding_updated_at: Utc::now(),
        };
        let builder = self
            .request(reqwest::Method::PATCH, update.kind.table(&self.config))
            .query(&[("id", format!("eq.{}", update.entity_id))])
            .header("Prefer", "return=representation")
            .json(&patch);

        let body = self.send("update embedding", builder).await?;
        let updated: Vec<serde_json::Value> =
            decode_json::<_, StoreError>(&body, "update embedding response")?;
        if updated.is_empty() {
            return Err(StoreError::NotFound {
                id: update.entity_id,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl EntitySearch for RestStore {
    #[tracing::instrument(skip(self, request), fields(text_only = request.query_embedding.is_none(), limit = request.limit))]
    async fn search_entities(&self, request: &SearchRequest) -> StoreResult<Vec<SearchCandidate>> {
        let params = SearchParams {
            query_text: &request.query_text,
            query_embedding: request.query_embedding.as_deref(),
            location_filter: request.location_filter.as_deref(),
            filters: &request.filters,
            entity_kinds: request.kinds.iter().map(|kind| kind.as_str()).collect(),
            match_limit: request.limit,
        };
        let builder = self
            .request(
                reqwest::Method::POST,
                &format!("rpc/{}", self.config.search_function),
            )
            .json(&params);

        let body = self.send("search entities", builder).await?;
        decode_json::<_, StoreError>(&body, "search entities response")
    }
}
