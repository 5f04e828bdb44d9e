//! Command handlers
//!
//! Results go to stdout as JSON; logs and progress go to stderr.

use crate::bootstrap::{
    BootstrapResult, require_store, setup_budget, setup_embedding_service, setup_store,
};
use crate::cli::{EmbedArgs, IndexArgs, SearchArgs};
use crate::signal::shutdown_token;
use caredex_config::ApplicationConfig;
use caredex_embeddings::{
    EmbeddingRequest, EmbeddingResult, EmbeddingService, GenerateOptions, TaskHint,
};
use caredex_indexing::{IndexingJobManager, JobRequest, JobState, ProgressSnapshot};
use caredex_search::EntitySearchService;
use caredex_store::{EntitySearch, EntityStore, SearchRequest};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

/// Values shown when `--full` is not given
const PREVIEW_LEN: usize = 8;

fn print_json<T: Serialize + ?Sized>(value: &T) -> BootstrapResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn summarize(result: &EmbeddingResult, full: bool) -> serde_json::Value {
    let shown = if full { result.embedding.len() } else { PREVIEW_LEN };
    let embedding: Vec<f32> = result.embedding.iter().copied().take(shown).collect();
    json!({
        "provider": result.provider,
        "model": result.model,
        "dimensions": result.dimensions,
        "cache_hit": result.cache_hit,
        "estimated_cost": result.estimated_cost,
        "usage": result.usage,
        "generation_time_ms": result.generation_time.as_millis(),
        "dimension_adjustment": result.dimension_adjustment,
        "truncated_input": result.truncated_input,
        "embedding": embedding,
    })
}

/// `caredex embed`
///
/// # Errors
///
/// Returns error for blank input or when every provider fails
pub async fn embed(config: &ApplicationConfig, args: EmbedArgs) -> BootstrapResult<()> {
    let store = setup_store(config)?;
    let budget = setup_budget(config, store.as_ref());
    let service = setup_embedding_service(config, budget)?;

    let task = TaskHint::from(args.task);
    let mut requests = Vec::with_capacity(args.texts.len());
    for text in args.texts {
        let mut request = EmbeddingRequest::new(text)?.with_task(task);
        if let Some(dimensions) = args.dimensions {
            request = request.with_dimensions(dimensions);
        }
        if let Some(title) = &args.title {
            request = request.with_title(title.clone());
        }
        requests.push(request);
    }

    let mut options = if task == TaskHint::Query {
        service.query_options()
    } else {
        GenerateOptions::for_documents()
    };
    if let Some(provider) = args.provider {
        options = options.with_provider(provider);
    }
    if let Some(model) = args.model {
        options = options.with_model(model);
    }
    if args.no_cache {
        options = options.without_cache();
    }
    if args.no_fallback {
        options = options.without_fallback();
    }

    let results = if requests.len() == 1 {
        let request = requests.remove(0);
        vec![service.embed(request, &options).await?]
    } else {
        service.embed_batch(requests, &options).await?
    };

    let summaries: Vec<_> = results.iter().map(|r| summarize(r, args.full)).collect();
    print_json(&json!({
        "results": summaries,
        "stats": service.get_stats().await,
        "cache": service.cache_stats(),
    }))
}

fn report_progress(snapshot: &ProgressSnapshot) {
    eprintln!(
        "[{}/{}] batches {}/{} ok={} failed={}",
        snapshot.processed,
        snapshot.total,
        snapshot.batches_completed,
        snapshot.total_batches,
        snapshot.successful,
        snapshot.failed,
    );
}

/// `caredex index`
///
/// # Errors
///
/// Returns error when no store is configured or the job fails to start
pub async fn index(config: &ApplicationConfig, args: IndexArgs) -> BootstrapResult<()> {
    let store = require_store(setup_store(config)?)?;
    let budget = setup_budget(config, Some(&store));
    let service = setup_embedding_service(config, budget)?;

    let manager = IndexingJobManager::new(
        Arc::clone(&store) as Arc<dyn EntityStore>,
        service as Arc<dyn EmbeddingService>,
        &config.indexing,
    );

    let mut request = if args.ids.is_empty() {
        JobRequest::missing_embeddings()
    } else {
        JobRequest::for_ids(args.ids)
    };
    if !args.kinds.is_empty() {
        request = request.with_kinds(args.kinds);
    }
    if args.force {
        request = request.forced();
    }
    if let Some(batch_size) = args.batch_size {
        request = request.with_batch_size(batch_size);
    }
    if let Some(concurrency) = args.concurrency {
        request = request.with_max_concurrency(concurrency);
    }
    if let Some(dimensions) = args.dimensions {
        request = request.with_dimensions(dimensions);
    }
    let request = request.with_observer(Arc::new(report_progress));

    let cancel = shutdown_token();
    let job = manager.run_until_cancelled(request, &cancel).await?;
    print_json(&job)?;

    if job.state == JobState::Failed {
        anyhow::bail!(
            "indexing job {} failed: {}",
            job.id,
            job.failure.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

/// `caredex search`
///
/// # Errors
///
/// Returns error for a blank query or a failed store search
pub async fn search(config: &ApplicationConfig, args: SearchArgs) -> BootstrapResult<()> {
    let store = require_store(setup_store(config)?)?;
    let budget = setup_budget(config, Some(&store));
    let service = setup_embedding_service(config, budget)?;

    let query_options = service.query_options();
    let searcher = EntitySearchService::new(
        service as Arc<dyn EmbeddingService>,
        store as Arc<dyn EntitySearch>,
    )
    .with_query_options(query_options)
    .with_dimensions(config.embedding.default_dimensions);

    let mut request = SearchRequest::new(args.query).with_limit(args.limit);
    if let Some(location) = args.location {
        request = request.with_location(location);
    }
    if !args.kinds.is_empty() {
        request = request.with_kinds(args.kinds);
    }
    for (key, value) in args.filters {
        request = request.with_filter(key, value);
    }

    let response = searcher.search(request).await?;
    print_json(&response)
}

/// `caredex budget`
///
/// # Errors
///
/// Returns error when the usage ledger cannot be read
pub async fn budget(config: &ApplicationConfig) -> BootstrapResult<()> {
    let store = setup_store(config)?;
    let ledger = if store.is_some() { "store" } else { "memory" };
    let monitor = setup_budget(config, store.as_ref());

    let state = monitor.state().await?;
    let decision = monitor.check_budget(0.0).await;
    print_json(&json!({
        "ledger": ledger,
        "state": state,
        "daily_remaining": state.daily_remaining(),
        "monthly_remaining": state.monthly_remaining(),
        "daily_utilization": state.daily_utilization(),
        "monthly_utilization": state.monthly_utilization(),
        "allowed": decision.allowed,
        "warnings": decision.warnings,
    }))
}

/// `caredex config`
///
/// # Errors
///
/// Returns error if the configuration cannot be rendered
pub fn show_config(config: &ApplicationConfig) -> BootstrapResult<()> {
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}
