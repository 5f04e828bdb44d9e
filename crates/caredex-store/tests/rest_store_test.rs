//! HTTP-level tests for the PostgREST store against a mock server

#![allow(clippy::unwrap_used)]

use caredex_common::CorrelationId;
use caredex_config::{ProviderKind, StoreConfig};
use caredex_embeddings::{DimensionAdjustment, EmbeddingMetadata, UsageLedger, UsageRecord};
use caredex_store::{
    EmbeddingUpdate, EntityKind, EntitySearch, EntityStore, RestStore, RestUsageLedger,
    SearchRequest, StoreError,
};
use chrono::{TimeZone, Utc};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn store_for(server: &MockServer) -> RestStore {
    let config = StoreConfig {
        url: Some(server.uri()),
        api_key: Some("service-key".to_string()),
        ..StoreConfig::default()
    };
    RestStore::new(config).unwrap()
}

fn metadata() -> EmbeddingMetadata {
    EmbeddingMetadata {
        provider: ProviderKind::Gemini,
        model: "text-embedding-004".to_string(),
        dimensions: 3,
        input_tokens: 12,
        estimated_cost: 0.000_001,
        generated_at: Utc::now(),
        dimension_adjustment: DimensionAdjustment::None,
        truncated_input: false,
    }
}

#[test]
fn test_missing_configuration_is_reported() {
    let result = RestStore::new(StoreConfig::default());
    assert!(matches!(result, Err(StoreError::NotConfigured(_))));
}

#[tokio::test]
async fn test_find_missing_embeddings_queries_each_table() {
    let server = MockServer::start().await;
    let hospital_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/hospitals"))
        .and(query_param("embedding", "is.null"))
        .and(header("apikey", "service-key"))
        .and(header("authorization", "Bearer service-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "id": hospital_id,
            "name": "Mercy General",
            "city": "Sacramento",
            "state": "CA",
            "specialties": ["cardiology"],
            "services": null
        }])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/doctors"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let store = store_for(&server);
    let entities = store
        .find_missing_embeddings(&EntityKind::ALL, None)
        .await
        .unwrap();

    assert_eq!(entities.len(), 1);
    let hospital = &entities[0];
    assert_eq!(hospital.id, hospital_id);
    assert_eq!(hospital.kind, EntityKind::Hospital);
    assert_eq!(hospital.location().as_deref(), Some("Sacramento, CA"));
    assert!(hospital.services.is_empty());
}

#[tokio::test]
async fn test_update_embedding_patches_row() {
    let server = MockServer::start().await;
    let id = Uuid::new_v4();

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/doctors"))
        .and(query_param("id", format!("eq.{id}").as_str()))
        .and(body_partial_json(json!({
            "embedding": [0.5, 0.25, 0.125],
            "embedding_metadata": { "provider": "gemini", "dimensions": 3 }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "id": id }])))
        .expect(1)
        .mount(&server)
        .await;

    let store = store_for(&server);
    store
        .update_embedding(&EmbeddingUpdate {
            entity_id: id,
            kind: EntityKind::Doctor,
            embedding: vec![0.5, 0.25, 0.125],
            metadata: metadata(),
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_update_of_missing_row_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let id = Uuid::new_v4();
    let err = store_for(&server)
        .update_embedding(&EmbeddingUpdate {
            entity_id: id,
            kind: EntityKind::Hospital,
            embedding: vec![0.0; 3],
            metadata: metadata(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound { id: missing } if missing == id));
}

#[tokio::test]
async fn test_server_error_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream down"))
        .mount(&server)
        .await;

    let err = store_for(&server)
        .fetch_all(&[EntityKind::Hospital])
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Http { status: 503, .. }));
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_search_sends_null_embedding_in_text_only_mode() {
    let server = MockServer::start().await;
    let id = Uuid::new_v4();

    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/search_entities"))
        .and(body_partial_json(json!({
            "query_text": "pediatric cardiology",
            "query_embedding": null,
            "location_filter": "Seattle",
            "filters": { "accepting_patients": "true" },
            "match_limit": 5
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "id": id,
            "kind": "doctor",
            "name": "Dr. Jane Doe",
            "city": "Seattle",
            "state": "WA",
            "score": 0.82
        }])))
        .expect(1)
        .mount(&server)
        .await;

    let request = SearchRequest::new("pediatric cardiology")
        .with_location("Seattle")
        .with_filter("accepting_patients", "true")
        .with_limit(5);
    let results = store_for(&server).search_entities(&request).await.unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].kind, EntityKind::Doctor);
    assert!(results[0].similarity.is_none());
}

#[tokio::test]
async fn test_usage_ledger_sums_and_records() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/embedding_usage"))
        .and(query_param("recorded_at", "gte.2026-03-01T00:00:00.000Z"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "estimated_cost": 0.25 },
            { "estimated_cost": 0.5 }
        ])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/embedding_usage"))
        .and(header("prefer", "return=minimal"))
        .and(body_partial_json(json!({ "provider": "openai", "input_tokens": 40 })))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let ledger = RestUsageLedger::new(Arc::new(store_for(&server)));
    let since = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
    let spend = ledger.spend_since(since).await.unwrap();
    assert!((spend - 0.75).abs() < 1e-9);

    ledger
        .record(UsageRecord {
            provider: ProviderKind::OpenAi,
            model: "text-embedding-3-small".to_string(),
            input_tokens: 40,
            total_tokens: 40,
            estimated_cost: 0.000_8,
            recorded_at: Utc::now(),
            correlation_id: Some(CorrelationId::new()),
        })
        .await
        .unwrap();
}
