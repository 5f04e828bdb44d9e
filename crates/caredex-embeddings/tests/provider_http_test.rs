//! HTTP provider behavior against a mock server

use caredex_config::{ProviderConfig, ProviderKind};
use caredex_embeddings::{
    BudgetMonitor, DimensionAdjustment, EmbeddingError, EmbeddingProvider, EmbeddingRequest,
    EmbeddingService, GeminiProvider, GenerateOptions, OpenAiProvider, RetryPolicy,
    UnifiedEmbeddingService,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        rate_limit_multiplier: 1.0,
        jitter_ratio: 0.0,
    }
}

fn gemini(server: &MockServer) -> GeminiProvider {
    let config = ProviderConfig::gemini_defaults()
        .with_api_key("gemini-test-key")
        .with_base_url(server.uri());
    GeminiProvider::new(config)
        .unwrap()
        .with_retry_policy(fast_retry())
}

fn openai(server: &MockServer) -> OpenAiProvider {
    let config = ProviderConfig::openai_defaults()
        .with_api_key("openai-test-key")
        .with_base_url(server.uri());
    OpenAiProvider::new(config)
        .unwrap()
        .with_retry_policy(fast_retry())
}

fn openai_body(vectors: &[Vec<f32>], prompt_tokens: u32) -> serde_json::Value {
    let data: Vec<_> = vectors
        .iter()
        .enumerate()
        .map(|(index, embedding)| json!({"object": "embedding", "index": index, "embedding": embedding}))
        .collect();
    json!({
        "object": "list",
        "data": data,
        "model": "text-embedding-3-small",
        "usage": {"prompt_tokens": prompt_tokens, "total_tokens": prompt_tokens}
    })
}

#[tokio::test]
async fn test_gemini_embed_content_request_and_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-embedding-001:embedContent"))
        .and(header("x-goog-api-key", "gemini-test-key"))
        .and(body_partial_json(json!({
            "model": "models/gemini-embedding-001",
            "taskType": "RETRIEVAL_DOCUMENT",
            "outputDimensionality": 768
        })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"embedding": {"values": vec![0.25_f32; 768]}})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let provider = gemini(&server);
    let request = EmbeddingRequest::new("St. Mary Hospital, cardiology and oncology")
        .unwrap()
        .with_dimensions(768);
    let result = provider.generate(&request, "gemini-embedding-001").await.unwrap();

    assert_eq!(result.provider, ProviderKind::Gemini);
    assert_eq!(result.embedding.len(), 768);
    assert_eq!(result.dimensions, 768);
    assert!(result.usage.estimated);
    assert!(result.estimated_cost > 0.0);
    assert_eq!(result.dimension_adjustment, DimensionAdjustment::None);
}

#[tokio::test]
async fn test_short_vector_padded_to_requested_width() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-embedding-001:embedContent"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"embedding": {"values": [0.1, 0.2, 0.3]}})),
        )
        .mount(&server)
        .await;

    let request = EmbeddingRequest::new("Clinic").unwrap().with_dimensions(768);
    let result = gemini(&server)
        .generate(&request, "gemini-embedding-001")
        .await
        .unwrap();

    assert_eq!(result.embedding.len(), 768);
    assert_eq!(
        result.dimension_adjustment,
        DimensionAdjustment::Padded { native: 3 }
    );
    assert!((result.embedding[3] - 0.1).abs() < f32::EPSILON);
}

#[tokio::test]
async fn test_gemini_batch_endpoint_keeps_order() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-embedding-001:batchEmbedContents"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "embeddings": [
                {"values": vec![1.0_f32; 768]},
                {"values": vec![2.0_f32; 768]}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let requests = vec![
        EmbeddingRequest::new("first").unwrap().with_dimensions(768),
        EmbeddingRequest::new("second").unwrap().with_dimensions(768),
    ];
    let results = gemini(&server)
        .generate_batch(&requests, "gemini-embedding-001")
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    assert!((results[0].embedding[0] - 1.0).abs() < f32::EPSILON);
    assert!((results[1].embedding[0] - 2.0).abs() < f32::EPSILON);
}

#[tokio::test]
async fn test_openai_reports_usage() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .and(header("authorization", "Bearer openai-test-key"))
        .and(body_partial_json(json!({"model": "text-embedding-3-small", "dimensions": 768})))
        .respond_with(ResponseTemplate::new(200).set_body_json(openai_body(&[vec![0.5; 768]], 12)))
        .expect(1)
        .mount(&server)
        .await;

    let request = EmbeddingRequest::new("Dr. Jane Doe, pediatric cardiologist")
        .unwrap()
        .with_dimensions(768);
    let result = openai(&server)
        .generate(&request, "text-embedding-3-small")
        .await
        .unwrap();

    assert_eq!(result.usage.input_tokens, 12);
    assert!(!result.usage.estimated);
    assert!((result.estimated_cost - 12.0 / 1000.0 * 0.000_02).abs() < 1e-12);
}

#[tokio::test]
async fn test_openai_batch_splits_reported_usage() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .and(body_partial_json(json!({"input": ["North clinic", "South clinic"]})))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(openai_body(&[vec![0.1; 768], vec![0.2; 768]], 10)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let requests = vec![
        EmbeddingRequest::new("North clinic").unwrap().with_dimensions(768),
        EmbeddingRequest::new("South clinic").unwrap().with_dimensions(768),
    ];
    let results = openai(&server)
        .generate_batch(&requests, "text-embedding-3-small")
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    for result in &results {
        assert!(!result.usage.estimated);
        assert_eq!(result.usage.input_tokens, 5);
    }
}

#[tokio::test]
async fn test_transient_error_retried_then_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream unavailable"))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(openai_body(&[vec![0.5; 1536]], 3)))
        .expect(1)
        .mount(&server)
        .await;

    let request = EmbeddingRequest::new("Urgent care").unwrap();
    let result = openai(&server)
        .generate(&request, "text-embedding-3-small")
        .await
        .unwrap();
    assert_eq!(result.embedding.len(), 1536);
}

#[tokio::test]
async fn test_transient_error_exhausts_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let err = openai(&server)
        .generate(&EmbeddingRequest::new("x").unwrap(), "text-embedding-3-small")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EmbeddingError::TransientProvider {
            status: Some(500),
            ..
        }
    ));
}

#[tokio::test]
async fn test_quota_exhaustion_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": {
                "message": "You exceeded your current quota, please check your plan and billing details.",
                "type": "insufficient_quota",
                "code": "insufficient_quota"
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let err = openai(&server)
        .generate(&EmbeddingRequest::new("x").unwrap(), "text-embedding-3-small")
        .await
        .unwrap_err();
    assert!(err.is_quota_exhausted());
    assert!(err.to_string().contains("exceeded your current quota"));
}

#[tokio::test]
async fn test_rate_limit_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-embedding-001:embedContent"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": {"status": "RESOURCE_EXHAUSTED", "message": "Too many requests per minute"}
        })))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-embedding-001:embedContent"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"embedding": {"values": vec![0.1_f32; 768]}})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let result = gemini(&server)
        .generate(&EmbeddingRequest::new("x").unwrap(), "gemini-embedding-001")
        .await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_auth_failure_is_terminal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-embedding-001:embedContent"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "error": {"code": 403, "message": "API key not valid", "status": "PERMISSION_DENIED"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let err = gemini(&server)
        .generate(&EmbeddingRequest::new("x").unwrap(), "gemini-embedding-001")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EmbeddingError::AuthFailure { status: 403, ref message, .. } if message == "API key not valid"
    ));
}

#[tokio::test]
async fn test_oversized_input_truncated_before_sending() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-embedding-001:embedContent"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"embedding": {"values": vec![0.1_f32; 768]}})),
        )
        .mount(&server)
        .await;

    let long_text = "cardiology ".repeat(2000);
    let result = gemini(&server)
        .generate(&EmbeddingRequest::new(long_text).unwrap(), "gemini-embedding-001")
        .await
        .unwrap();
    assert!(result.truncated_input);
    // ~8000 chars at four chars per token
    assert!(result.usage.input_tokens <= 2000);
}

#[tokio::test]
async fn test_service_falls_back_from_gemini_quota_to_openai() {
    let gemini_server = MockServer::start().await;
    let openai_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": {"status": "RESOURCE_EXHAUSTED", "message": "Quota exceeded for metric EmbedContentRequestsPerDay"}
        })))
        .expect(1)
        .mount(&gemini_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(openai_body(&[vec![0.3; 768]], 5)))
        .expect(1)
        .mount(&openai_server)
        .await;

    let service = UnifiedEmbeddingService::builder()
        .with_primary(Arc::new(gemini(&gemini_server)))
        .with_fallback(Arc::new(openai(&openai_server)))
        .with_default_dimensions(768)
        .with_budget(Arc::new(BudgetMonitor::in_memory(
            caredex_config::BudgetConfig::default(),
        )))
        .build()
        .unwrap();

    let result = service
        .embed(
            EmbeddingRequest::new("Mercy General, emergency medicine").unwrap(),
            &GenerateOptions::for_documents(),
        )
        .await
        .unwrap();

    assert_eq!(result.provider, ProviderKind::OpenAi);
    assert_eq!(result.embedding.len(), 768);
    assert_eq!(service.get_stats().await.fallback_attempts, 1);
}

#[tokio::test]
async fn test_service_retries_transient_primary_without_fallback() {
    let gemini_server = MockServer::start().await;
    let openai_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-embedding-001:embedContent"))
        .respond_with(ResponseTemplate::new(503).set_body_string("backend unavailable"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&gemini_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-embedding-001:embedContent"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"embedding": {"values": vec![0.2_f32; 768]}})),
        )
        .expect(1)
        .mount(&gemini_server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(openai_body(&[vec![0.3; 768]], 5)))
        .expect(0)
        .mount(&openai_server)
        .await;

    let service = UnifiedEmbeddingService::builder()
        .with_primary(Arc::new(gemini(&gemini_server)))
        .with_fallback(Arc::new(openai(&openai_server)))
        .with_default_dimensions(768)
        .with_budget(Arc::new(BudgetMonitor::in_memory(
            caredex_config::BudgetConfig::default(),
        )))
        .build()
        .unwrap();

    let result = service
        .embed(
            EmbeddingRequest::new("Harborview clinic, family medicine").unwrap(),
            &GenerateOptions::for_documents(),
        )
        .await
        .unwrap();

    assert_eq!(result.provider, ProviderKind::Gemini);
    let stats = service.get_stats().await;
    assert_eq!(stats.fallback_attempts, 0);
    assert_eq!(stats.failures, 0);
}
