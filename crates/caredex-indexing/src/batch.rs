//! Bounded-concurrency batch orchestration
//!
//! Entities are rendered to text, split into adaptively sized batches and
//! sent through the [`EmbeddingService`] with at most `max_concurrency`
//! batches in flight. A batch that fails as a whole is retried item by item;
//! items that still fail become [`ItemError`]s and the run carries on.

use crate::error::{ItemError, ItemErrorKind};
use crate::progress::{ProgressObserver, ProgressSnapshot, ProgressTracker};
use crate::sizing::BatchSizing;
use caredex_config::IndexingConfig;
use caredex_embeddings::{
    EmbeddingError, EmbeddingRequest, EmbeddingResult, EmbeddingService, GenerateOptions,
};
use caredex_store::{EmbeddingUpdate, Entity, EntityStore};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Per-run overrides
#[derive(Clone, Default)]
pub struct BatchOptions {
    /// Output width; the service default when `None`
    pub dimensions: Option<usize>,
    /// Starting batch size before adaptive adjustment
    pub batch_size: Option<usize>,
    pub max_concurrency: Option<usize>,
    pub generate: GenerateOptions,
    pub observer: Option<Arc<dyn ProgressObserver>>,
    /// Stops new batches from starting; dispatched batches drain
    pub cancel: CancellationToken,
}

impl BatchOptions {
    #[must_use]
    pub const fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = Some(dimensions);
        self
    }

    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    #[must_use]
    pub const fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = Some(max_concurrency);
        self
    }

    #[must_use]
    pub fn with_generate_options(mut self, generate: GenerateOptions) -> Self {
        self.generate = generate;
        self
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

impl std::fmt::Debug for BatchOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchOptions")
            .field("dimensions", &self.dimensions)
            .field("batch_size", &self.batch_size)
            .field("max_concurrency", &self.max_concurrency)
            .field("generate", &self.generate)
            .field("has_observer", &self.observer.is_some())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

/// A successfully embedded entity
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityEmbedding {
    pub entity: Entity,
    pub result: EmbeddingResult,
}

/// Counters for one orchestrator run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchStats {
    pub total: usize,
    pub processed: usize,
    pub successful: usize,
    pub failed: usize,
    pub generation_failures: usize,
    pub persistence_failures: usize,
    pub budget_failures: usize,
    pub batches: usize,
    pub batch_size: usize,
    pub max_concurrency: usize,
    pub aborted: bool,
    #[serde(with = "elapsed_millis")]
    pub elapsed: Duration,
}

/// Everything a run produced
///
/// `results` and `errors` follow input order regardless of which batch
/// finished first.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub results: Vec<EntityEmbedding>,
    pub errors: Vec<ItemError>,
    pub stats: BatchStats,
}

impl BatchOutcome {
    pub fn is_complete(&self) -> bool {
        self.stats.processed == self.stats.total
    }
}

struct WorkItem {
    position: usize,
    entity: Entity,
    request: EmbeddingRequest,
}

#[derive(Default)]
struct BatchDone {
    results: Vec<(usize, EntityEmbedding)>,
    errors: Vec<(usize, ItemError)>,
}

/// Fans batches out to the embedding service under a concurrency bound
pub struct BatchOrchestrator {
    service: Arc<dyn EmbeddingService>,
    store: Option<Arc<dyn EntityStore>>,
    sizing: BatchSizing,
    max_concurrency: usize,
}

impl BatchOrchestrator {
    pub fn new(service: Arc<dyn EmbeddingService>, sizing: BatchSizing, max_concurrency: usize) -> Self {
        Self {
            service,
            store: None,
            sizing,
            max_concurrency: max_concurrency.max(1),
        }
    }

    pub fn from_config(service: Arc<dyn EmbeddingService>, config: &IndexingConfig) -> Self {
        Self::new(service, BatchSizing::from_config(config), config.max_concurrency)
    }

    /// Persist every generated vector to `store` as part of its batch
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn EntityStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub const fn sizing(&self) -> BatchSizing {
        self.sizing
    }

    /// Embed (and persist, when a store is attached) every entity
    ///
    /// Never fails as a whole: per-entity problems land in
    /// [`BatchOutcome::errors`].
    pub async fn process_batch(&self, entities: Vec<Entity>, options: BatchOptions) -> BatchOutcome {
        let tracker = Arc::new(ProgressTracker::new(options.observer.clone()));
        self.process_with_tracker(entities, options, tracker).await
    }

    #[tracing::instrument(skip_all, fields(entities = entities.len()))]
    pub(crate) async fn process_with_tracker(
        &self,
        entities: Vec<Entity>,
        options: BatchOptions,
        tracker: Arc<ProgressTracker>,
    ) -> BatchOutcome {
        let started = Instant::now();
        let total = entities.len();
        let dimensions = options
            .dimensions
            .unwrap_or_else(|| self.service.default_dimensions());
        let max_concurrency = options.max_concurrency.unwrap_or(self.max_concurrency).max(1);

        let mut done = BatchDone::default();
        let mut work = Vec::with_capacity(total);
        for (position, entity) in entities.into_iter().enumerate() {
            match entity.to_request(dimensions) {
                Ok(request) => work.push(WorkItem {
                    position,
                    entity,
                    request,
                }),
                Err(e) => done.errors.push((position, ItemError::generation(&entity, &e))),
            }
        }

        let sizing = options
            .batch_size
            .map_or(self.sizing, |base| self.sizing.with_base(base));
        let texts: Vec<&str> = work.iter().map(|item| item.request.text()).collect();
        let batch_size = sizing.batch_size_for(&texts);
        let batches = split_batches(work, batch_size);

        tracker.begin(total, batches.len());
        if !done.errors.is_empty() {
            tracker.record_skipped(done.errors.len());
        }
        if total == 0 {
            tracker.finish_empty();
        }

        info!(
            total,
            batches = batches.len(),
            batch_size,
            max_concurrency,
            dimensions,
            "Starting batch run"
        );

        let semaphore = Arc::new(Semaphore::new(max_concurrency));
        let mut join_set = JoinSet::new();

        for (index, batch) in batches.into_iter().enumerate() {
            let permit = tokio::select! {
                biased;
                () = options.cancel.cancelled() => break,
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let worker = BatchWorker {
                service: Arc::clone(&self.service),
                store: self.store.clone(),
                options: options.generate.clone(),
                tracker: Arc::clone(&tracker),
            };
            join_set.spawn(async move {
                let _permit = permit;
                worker.run(index, batch).await
            });
        }

        let aborted = options.cancel.is_cancelled();
        if aborted {
            tracker.stop();
            info!(in_flight = join_set.len(), "Cancellation requested, draining in-flight batches");
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(batch) => {
                    done.results.extend(batch.results);
                    done.errors.extend(batch.errors);
                }
                Err(e) => error!(error = %e, "Batch task panicked"),
            }
        }

        done.results.sort_by_key(|(position, _)| *position);
        done.errors.sort_by_key(|(position, _)| *position);

        let snapshot = tracker.snapshot();
        let errors: Vec<ItemError> = done.errors.into_iter().map(|(_, e)| e).collect();
        let count = |kind: ItemErrorKind| errors.iter().filter(|e| e.kind == kind).count();
        let stats = BatchStats {
            total,
            processed: snapshot.processed,
            successful: snapshot.successful,
            failed: snapshot.failed,
            generation_failures: count(ItemErrorKind::Generation),
            persistence_failures: count(ItemErrorKind::Persistence),
            budget_failures: count(ItemErrorKind::Budget),
            batches: snapshot.batches_completed,
            batch_size,
            max_concurrency,
            aborted: aborted || snapshot.aborted,
            elapsed: started.elapsed(),
        };

        info!(
            successful = stats.successful,
            failed = stats.failed,
            aborted = stats.aborted,
            elapsed_ms = stats.elapsed.as_millis(),
            "Batch run finished"
        );

        BatchOutcome {
            results: done.results.into_iter().map(|(_, r)| r).collect(),
            errors,
            stats,
        }
    }
}

fn split_batches(work: Vec<WorkItem>, batch_size: usize) -> Vec<Vec<WorkItem>> {
    let mut batches = Vec::new();
    let mut current = Vec::with_capacity(batch_size);
    for item in work {
        current.push(item);
        if current.len() == batch_size {
            batches.push(std::mem::replace(&mut current, Vec::with_capacity(batch_size)));
        }
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

struct BatchWorker {
    service: Arc<dyn EmbeddingService>,
    store: Option<Arc<dyn EntityStore>>,
    options: GenerateOptions,
    tracker: Arc<ProgressTracker>,
}

impl BatchWorker {
    async fn run(self, index: usize, items: Vec<WorkItem>) -> BatchDone {
        let started = Instant::now();
        let generated = self.generate(index, items).await;

        let mut done = BatchDone::default();
        for (item, outcome) in generated {
            match outcome {
                Ok(result) => match self.persist(&item, &result).await {
                    Ok(()) => done.results.push((
                        item.position,
                        EntityEmbedding {
                            entity: item.entity,
                            result,
                        },
                    )),
                    Err(e) => done.errors.push((item.position, e)),
                },
                Err(e) => done.errors.push((item.position, e)),
            }
        }

        let snapshot: ProgressSnapshot = self
            .tracker
            .record_batch(done.results.len(), done.errors.len());
        debug!(
            batch = index,
            successful = done.results.len(),
            failed = done.errors.len(),
            processed = snapshot.processed,
            total = snapshot.total,
            "Batch complete"
        );

        metrics::histogram!("caredex_indexing_batch_seconds").record(started.elapsed().as_secs_f64());
        metrics::counter!("caredex_indexing_items_total", "outcome" => "success")
            .increment(done.results.len() as u64);
        metrics::counter!("caredex_indexing_items_total", "outcome" => "failure")
            .increment(done.errors.len() as u64);
        done
    }

    /// One provider round-trip for the batch, one-by-one if that fails
    ///
    /// Budget and quota failures are not retried per item.
    async fn generate(
        &self,
        index: usize,
        items: Vec<WorkItem>,
    ) -> Vec<(WorkItem, Result<EmbeddingResult, ItemError>)> {
        let requests: Vec<EmbeddingRequest> = items.iter().map(|item| item.request.clone()).collect();

        match self.service.embed_batch(requests, &self.options).await {
            Ok(results) if results.len() == items.len() => {
                items.into_iter().zip(results.into_iter().map(Ok)).collect()
            }
            Ok(results) => {
                warn!(
                    batch = index,
                    expected = items.len(),
                    received = results.len(),
                    "Batch returned the wrong number of vectors, retrying items one by one"
                );
                self.generate_individually(items).await
            }
            Err(e)
                if matches!(e, EmbeddingError::BudgetExceeded { .. }) || e.is_quota_exhausted() =>
            {
                warn!(batch = index, error = %e, "Batch blocked by budget or quota, not retrying items");
                items
                    .into_iter()
                    .map(|item| {
                        let error = ItemError::generation(&item.entity, &e);
                        (item, Err(error))
                    })
                    .collect()
            }
            Err(e) => {
                warn!(batch = index, error = %e, "Batch failed, retrying items one by one");
                metrics::counter!("caredex_indexing_batch_fallbacks_total").increment(1);
                self.generate_individually(items).await
            }
        }
    }

    async fn generate_individually(
        &self,
        items: Vec<WorkItem>,
    ) -> Vec<(WorkItem, Result<EmbeddingResult, ItemError>)> {
        let mut generated = Vec::with_capacity(items.len());
        for item in items {
            let outcome = self
                .service
                .embed(item.request.clone(), &self.options)
                .await
                .map_err(|e| {
                    warn!(entity_id = %item.entity.id, entity = %item.entity.name, error = %e, "Entity embedding failed");
                    ItemError::generation(&item.entity, &e)
                });
            generated.push((item, outcome));
        }
        generated
    }

    async fn persist(&self, item: &WorkItem, result: &EmbeddingResult) -> Result<(), ItemError> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let update = EmbeddingUpdate {
            entity_id: item.entity.id,
            kind: item.entity.kind,
            embedding: result.embedding.clone(),
            metadata: result.metadata(),
        };
        store.update_embedding(&update).await.map_err(|e| {
            warn!(entity_id = %item.entity.id, error = %e, "Failed to persist embedding");
            ItemError::persistence(&item.entity, &e)
        })
    }
}

mod elapsed_millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use caredex_store::EntityKind;

    fn items(count: usize) -> Vec<WorkItem> {
        (0..count)
            .map(|position| {
                let entity = Entity::new(EntityKind::Hospital, format!("Hospital {position}"));
                let request = entity.to_request(8).unwrap();
                WorkItem {
                    position,
                    entity,
                    request,
                }
            })
            .collect()
    }

    #[test]
    fn test_split_batches_keeps_order_and_remainder() {
        let batches = split_batches(items(7), 3);
        let sizes: Vec<usize> = batches.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
        let positions: Vec<usize> = batches.iter().flatten().map(|i| i.position).collect();
        assert_eq!(positions, (0..7).collect::<Vec<_>>());
    }

    #[test]
    fn test_split_batches_empty() {
        assert!(split_batches(Vec::new(), 5).is_empty());
    }
}
