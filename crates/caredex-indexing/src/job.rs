//! Indexing job lifecycle
//!
//! One job at a time per manager: discover entities, run them through the
//! [`BatchOrchestrator`] with persistence, and keep a progress snapshot that
//! can be read synchronously from any thread while the job runs.

use crate::batch::{BatchOptions, BatchOrchestrator};
use crate::error::{IndexingError, IndexingResult, ItemError};
use crate::progress::{ProgressObserver, ProgressSnapshot, ProgressTracker};
use caredex_common::CorrelationId;
use caredex_embeddings::{EmbeddingService, GenerateOptions};
use caredex_store::{Entity, EntityKind, EntityStore};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Lifecycle of the manager's job slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Idle,
    Discovering,
    Running,
    Complete,
    Failed,
}

impl JobState {
    /// A job holds the slot in these states
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Discovering | Self::Running)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Discovering => "discovering",
            Self::Running => "running",
            Self::Complete => "complete",
            Self::Failed => "failed",
        })
    }
}

/// Which entities a job covers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", content = "ids", rename_all = "snake_case")]
pub enum JobTarget {
    /// Entities without a stored embedding (everything when forced)
    MissingEmbeddings,
    /// Exactly these entities, whatever their current state
    Ids(Vec<Uuid>),
}

/// Parameters for one job
#[derive(Clone)]
pub struct JobRequest {
    pub target: JobTarget,
    pub kinds: Vec<EntityKind>,
    /// Reprocess entities that already have embeddings and skip the cache
    pub force: bool,
    pub batch_size: Option<usize>,
    pub max_concurrency: Option<usize>,
    pub dimensions: Option<usize>,
    pub observer: Option<Arc<dyn ProgressObserver>>,
}

impl Default for JobRequest {
    fn default() -> Self {
        Self::missing_embeddings()
    }
}

impl JobRequest {
    pub fn missing_embeddings() -> Self {
        Self {
            target: JobTarget::MissingEmbeddings,
            kinds: EntityKind::ALL.to_vec(),
            force: false,
            batch_size: None,
            max_concurrency: None,
            dimensions: None,
            observer: None,
        }
    }

    pub fn for_ids(ids: Vec<Uuid>) -> Self {
        Self {
            target: JobTarget::Ids(ids),
            ..Self::missing_embeddings()
        }
    }

    #[must_use]
    pub fn with_kinds(mut self, kinds: Vec<EntityKind>) -> Self {
        self.kinds = kinds;
        self
    }

    #[must_use]
    pub const fn forced(mut self) -> Self {
        self.force = true;
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
    pub const fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = Some(dimensions);
        self
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = Some(observer);
        self
    }
}

impl fmt::Debug for JobRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRequest")
            .field("target", &self.target)
            .field("kinds", &self.kinds)
            .field("force", &self.force)
            .field("batch_size", &self.batch_size)
            .field("max_concurrency", &self.max_concurrency)
            .field("dimensions", &self.dimensions)
            .finish_non_exhaustive()
    }
}

/// Final report of a job
#[derive(Debug, Clone, Serialize)]
pub struct IndexingJob {
    pub id: Uuid,
    pub target: JobTarget,
    pub kinds: Vec<EntityKind>,
    pub force: bool,
    pub state: JobState,
    pub total: usize,
    pub processed: usize,
    pub successful: usize,
    pub failed: usize,
    pub generation_failures: usize,
    pub persistence_failures: usize,
    pub budget_failures: usize,
    pub errors: Vec<ItemError>,
    pub is_complete: bool,
    pub aborted: bool,
    /// Why discovery or setup failed
    pub failure: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

struct ActiveJob {
    id: Uuid,
    cancel: CancellationToken,
    tracker: Arc<ProgressTracker>,
}

struct JobSlot {
    state: JobState,
    active: Option<ActiveJob>,
    last: Option<IndexingJob>,
}

/// Runs indexing jobs one at a time
///
/// Cheap to clone; clones share the same job slot.
#[derive(Clone)]
pub struct IndexingJobManager {
    store: Arc<dyn EntityStore>,
    orchestrator: Arc<BatchOrchestrator>,
    slot: Arc<Mutex<JobSlot>>,
}

/// Handle to a job started with [`IndexingJobManager::start`]
pub struct JobHandle {
    pub job_id: Uuid,
    manager: IndexingJobManager,
    task: tokio::task::JoinHandle<IndexingResult<IndexingJob>>,
}

impl JobHandle {
    /// Abort this job if it is still the running one
    pub fn cancel(&self) -> bool {
        self.manager.cancel_job(self.job_id)
    }

    /// Wait for the job to finish
    ///
    /// # Errors
    /// Returns the job's error, or `IndexingError::Other` if the task panicked
    pub async fn wait(self) -> IndexingResult<IndexingJob> {
        self.task
            .await
            .map_err(|e| IndexingError::Other(format!("indexing task failed: {e}")))?
    }
}

impl IndexingJobManager {
    /// Build a manager whose orchestrator persists into `store`
    pub fn new(
        store: Arc<dyn EntityStore>,
        service: Arc<dyn EmbeddingService>,
        config: &caredex_config::IndexingConfig,
    ) -> Self {
        let orchestrator =
            BatchOrchestrator::from_config(service, config).with_store(Arc::clone(&store));
        Self::with_orchestrator(store, orchestrator)
    }

    /// Use a prepared orchestrator; it should persist into the same store
    pub fn with_orchestrator(store: Arc<dyn EntityStore>, orchestrator: BatchOrchestrator) -> Self {
        Self {
            store,
            orchestrator: Arc::new(orchestrator),
            slot: Arc::new(Mutex::new(JobSlot {
                state: JobState::Idle,
                active: None,
                last: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, JobSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> JobState {
        self.lock().state
    }

    /// Progress of the running job, or the final numbers of the last one
    pub fn progress(&self) -> Option<ProgressSnapshot> {
        let slot = self.lock();
        if let Some(active) = &slot.active {
            return Some(active.tracker.snapshot());
        }
        slot.last.as_ref().map(|job| ProgressSnapshot {
            job_id: Some(job.id),
            total: job.total,
            processed: job.processed,
            successful: job.successful,
            failed: job.failed,
            batches_completed: 0,
            total_batches: 0,
            complete: job.is_complete,
            aborted: job.aborted,
        })
    }

    /// Report of the most recently finished job
    pub fn last_job(&self) -> Option<IndexingJob> {
        self.lock().last.clone()
    }

    /// Abort the running job
    ///
    /// Progress callbacks stop and the slot is released immediately; batches
    /// already dispatched finish in the background. Returns the aborted
    /// job's id, if any job was running.
    pub fn cancel(&self) -> Option<Uuid> {
        let id = self.lock().active.as_ref().map(|active| active.id)?;
        self.cancel_job(id).then_some(id)
    }

    /// Abort `job_id` if it still holds the slot
    pub fn cancel_job(&self, job_id: Uuid) -> bool {
        let mut slot = self.lock();
        if !slot.active.as_ref().is_some_and(|active| active.id == job_id) {
            return false;
        }
        let Some(active) = slot.active.take() else {
            return false;
        };
        active.cancel.cancel();
        active.tracker.stop();
        slot.state = JobState::Complete;
        info!(job_id = %active.id, "Indexing job cancelled");
        true
    }

    /// Run a job on a background task
    ///
    /// # Errors
    /// Returns `IndexingError::AlreadyInProgress` when a job holds the slot
    pub fn start(&self, request: JobRequest) -> IndexingResult<JobHandle> {
        let (job_id, cancel, tracker) = self.acquire(&request)?;
        let manager = self.clone();
        let task =
            tokio::spawn(async move { manager.execute(job_id, request, cancel, tracker).await });
        Ok(JobHandle {
            job_id,
            manager: self.clone(),
            task,
        })
    }

    /// Run a job to completion on the current task
    ///
    /// # Errors
    /// Returns `IndexingError::AlreadyInProgress` when a job holds the slot, or
    /// `IndexingError::Discovery` when entities could not be listed
    pub async fn run(&self, request: JobRequest) -> IndexingResult<IndexingJob> {
        let (job_id, cancel, tracker) = self.acquire(&request)?;
        self.execute(job_id, request, cancel, tracker).await
    }

    /// Like [`run`](Self::run) but stops starting batches once `cancel` fires
    ///
    /// # Errors
    /// Same as [`run`](Self::run)
    pub async fn run_until_cancelled(
        &self,
        request: JobRequest,
        cancel: &CancellationToken,
    ) -> IndexingResult<IndexingJob> {
        let (job_id, token, tracker) = self.acquire(&request)?;
        let manager = self.clone();
        let watcher_done = CancellationToken::new();
        let watcher_stop = watcher_done.clone();
        let external = cancel.clone();
        let watcher = tokio::spawn(async move {
            tokio::select! {
                () = external.cancelled() => {
                    manager.cancel_job(job_id);
                }
                () = watcher_stop.cancelled() => {}
            }
        });
        let result = self.execute(job_id, request, token, tracker).await;
        watcher_done.cancel();
        if let Err(e) = watcher.await {
            warn!(error = %e, "Cancellation watcher failed");
        }
        result
    }

    fn acquire(
        &self,
        request: &JobRequest,
    ) -> IndexingResult<(Uuid, CancellationToken, Arc<ProgressTracker>)> {
        let mut slot = self.lock();
        if let Some(active) = slot.active.as_ref().filter(|_| slot.state.is_active()) {
            warn!(job_id = %active.id, "Rejected indexing job: another job is in progress");
            return Err(IndexingError::AlreadyInProgress { job_id: active.id });
        }
        if let JobTarget::Ids(ids) = &request.target {
            if ids.is_empty() {
                return Err(IndexingError::InvalidTarget(
                    "reindex requested with an empty id list".to_string(),
                ));
            }
        }

        let job_id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let tracker = Arc::new(ProgressTracker::new(request.observer.clone()).with_job_id(job_id));
        slot.state = JobState::Discovering;
        slot.active = Some(ActiveJob {
            id: job_id,
            cancel: cancel.clone(),
            tracker: Arc::clone(&tracker),
        });
        Ok((job_id, cancel, tracker))
    }

    /// Apply a state change only while `job_id` still owns the slot
    ///
    /// A report from a cancelled job that drains late never replaces the
    /// report of a job started after it.
    fn transition(&self, job_id: Uuid, state: JobState, report: Option<IndexingJob>) {
        let mut slot = self.lock();
        let owns_slot = slot.active.as_ref().is_some_and(|active| active.id == job_id);
        if owns_slot {
            slot.state = state;
            if !state.is_active() {
                slot.active = None;
            }
        }
        if let Some(report) = report {
            let newer = slot
                .last
                .as_ref()
                .is_none_or(|last| last.started_at <= report.started_at);
            if owns_slot || newer {
                slot.last = Some(report);
            } else {
                debug!(job_id = %job_id, "Discarding report of a superseded job");
            }
        }
    }

    #[tracing::instrument(skip(self, request, cancel, tracker), fields(job_id = %job_id, force = request.force))]
    async fn execute(
        &self,
        job_id: Uuid,
        request: JobRequest,
        cancel: CancellationToken,
        tracker: Arc<ProgressTracker>,
    ) -> IndexingResult<IndexingJob> {
        let started_at = Utc::now();
        info!(target = ?request.target, kinds = ?request.kinds, "Indexing job started");

        let entities = match self.discover(&request).await {
            Ok(entities) => entities,
            Err(e) => {
                error!(error = %e, "Entity discovery failed");
                let report = IndexingJob {
                    id: job_id,
                    target: request.target.clone(),
                    kinds: request.kinds.clone(),
                    force: request.force,
                    state: JobState::Failed,
                    total: 0,
                    processed: 0,
                    successful: 0,
                    failed: 0,
                    generation_failures: 0,
                    persistence_failures: 0,
                    budget_failures: 0,
                    errors: Vec::new(),
                    is_complete: false,
                    aborted: false,
                    failure: Some(e.to_string()),
                    started_at,
                    finished_at: Utc::now(),
                };
                self.transition(job_id, JobState::Failed, Some(report));
                return Err(e);
            }
        };

        info!(entities = entities.len(), "Discovery complete");
        self.transition(job_id, JobState::Running, None);

        let generate = if request.force {
            GenerateOptions::for_documents().without_cache()
        } else {
            GenerateOptions::for_documents()
        }
        .with_correlation_id(CorrelationId::from(job_id));

        let options = BatchOptions {
            dimensions: request.dimensions,
            batch_size: request.batch_size,
            max_concurrency: request.max_concurrency,
            generate,
            observer: request.observer.clone(),
            cancel,
        };
        let outcome = self
            .orchestrator
            .process_with_tracker(entities, options, tracker)
            .await;

        let stats = outcome.stats;
        let report = IndexingJob {
            id: job_id,
            target: request.target,
            kinds: request.kinds,
            force: request.force,
            state: JobState::Complete,
            total: stats.total,
            processed: stats.processed,
            successful: stats.successful,
            failed: stats.failed,
            generation_failures: stats.generation_failures,
            persistence_failures: stats.persistence_failures,
            budget_failures: stats.budget_failures,
            errors: outcome.errors,
            is_complete: true,
            aborted: stats.aborted,
            failure: None,
            started_at,
            finished_at: Utc::now(),
        };

        info!(
            total = report.total,
            successful = report.successful,
            failed = report.failed,
            aborted = report.aborted,
            "Indexing job finished"
        );
        self.transition(job_id, JobState::Complete, Some(report.clone()));
        Ok(report)
    }

    async fn discover(&self, request: &JobRequest) -> IndexingResult<Vec<Entity>> {
        let entities = match (&request.target, request.force) {
            (JobTarget::Ids(ids), _) => {
                let found = self.store.fetch_entities(ids).await?;
                if found.len() < ids.len() {
                    warn!(
                        requested = ids.len(),
                        found = found.len(),
                        "Some requested entities do not exist"
                    );
                }
                found
                    .into_iter()
                    .filter(|entity| request.kinds.contains(&entity.kind))
                    .collect()
            }
            (JobTarget::MissingEmbeddings, true) => self.store.fetch_all(&request.kinds).await?,
            (JobTarget::MissingEmbeddings, false) => {
                self.store.find_missing_embeddings(&request.kinds, None).await?
            }
        };
        Ok(entities)
    }
}
