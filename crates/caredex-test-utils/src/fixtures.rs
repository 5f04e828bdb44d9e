//! Directory fixtures and test configuration

use caredex_config::{BudgetConfig, EmbeddingConfig, RetryConfig};
use caredex_store::{Entity, EntityKind};

/// Embedding configuration pointed at `gemini_url`/`openai_url` with fast retries
pub fn test_embedding_config(gemini_url: &str, openai_url: &str) -> EmbeddingConfig {
    let mut config = EmbeddingConfig::default();
    config.gemini = config.gemini.with_api_key("gemini-test-key").with_base_url(gemini_url);
    config.openai = config.openai.with_api_key("openai-test-key").with_base_url(openai_url);
    config.retry = RetryConfig {
        max_attempts: 3,
        base_delay_ms: 1,
        max_delay_ms: 5,
        rate_limit_multiplier: 2.0,
        jitter_ratio: 0.0,
    };
    config.cache.sweep_probability = 0.0;
    config
}

/// Generous ceilings so budget never interferes unless a test wants it to
pub fn test_budget_config() -> BudgetConfig {
    BudgetConfig {
        daily_limit: 100.0,
        monthly_limit: 1000.0,
        ..BudgetConfig::default()
    }
}

/// The two-entity scenario: a Boston hospital and a Seattle clinic
pub fn e2e_entities() -> Vec<Entity> {
    vec![
        Entity::new(EntityKind::Hospital, "General Hospital")
            .with_location("Boston", "MA")
            .with_specialties(["cardiology"])
            .with_description("400 beds"),
        Entity::new(EntityKind::Hospital, "Pediatric Clinic")
            .with_location("Seattle", "WA")
            .with_description("no emergency services"),
    ]
}

/// `count` hospitals and doctors alternating, with distinct names
pub fn sample_directory(count: usize) -> Vec<Entity> {
    (0..count)
        .map(|i| {
            if i % 2 == 0 {
                Entity::new(EntityKind::Hospital, format!("Hospital {i}"))
                    .with_location("Denver", "CO")
                    .with_services(["emergency", "radiology"])
            } else {
                Entity::new(EntityKind::Doctor, format!("Dr. Sample {i}"))
                    .with_affiliation("Hospital 0")
                    .with_specialties(["family medicine"])
            }
        })
        .collect()
}
