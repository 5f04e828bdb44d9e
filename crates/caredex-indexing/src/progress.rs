//! Progress tracking shared by concurrently completing batches

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use uuid::Uuid;

/// Point-in-time view of a running batch or job
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub job_id: Option<Uuid>,
    pub total: usize,
    pub processed: usize,
    pub successful: usize,
    pub failed: usize,
    pub batches_completed: usize,
    pub total_batches: usize,
    pub complete: bool,
    pub aborted: bool,
}

impl ProgressSnapshot {
    /// Fraction processed, 1.0 for an empty job
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.processed as f64 / self.total as f64
        }
    }
}

/// Receives a snapshot after every completed batch
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, snapshot: &ProgressSnapshot);
}

impl<F> ProgressObserver for F
where
    F: Fn(&ProgressSnapshot) + Send + Sync,
{
    fn on_progress(&self, snapshot: &ProgressSnapshot) {
        self(snapshot);
    }
}

/// Monotonic counters plus observer fan-out
///
/// Counters only grow. The observer is called while the counters are
/// locked, so it sees snapshots in order and must not call back into the
/// tracker. Once `stop` is called no further snapshots are delivered.
pub struct ProgressTracker {
    state: Mutex<ProgressSnapshot>,
    observer: Option<Arc<dyn ProgressObserver>>,
    stopped: AtomicBool,
}

impl ProgressTracker {
    pub fn new(observer: Option<Arc<dyn ProgressObserver>>) -> Self {
        Self {
            state: Mutex::new(ProgressSnapshot::default()),
            observer,
            stopped: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn with_job_id(self, job_id: Uuid) -> Self {
        self.lock().job_id = Some(job_id);
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ProgressSnapshot> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set the work size once discovery is done
    pub fn begin(&self, total: usize, total_batches: usize) {
        let mut state = self.lock();
        state.total = total;
        state.total_batches = total_batches;
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.lock().clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Count one finished batch and notify the observer
    pub fn record_batch(&self, successful: usize, failed: usize) -> ProgressSnapshot {
        self.apply(successful, failed, true)
    }

    /// Count items that failed before reaching any batch
    pub fn record_skipped(&self, failed: usize) -> ProgressSnapshot {
        self.apply(0, failed, false)
    }

    fn apply(&self, successful: usize, failed: usize, batch_done: bool) -> ProgressSnapshot {
        let mut state = self.lock();
        if state.complete {
            return state.clone();
        }
        let remaining = state.total.saturating_sub(state.processed);
        let successful = successful.min(remaining);
        let failed = failed.min(remaining - successful);

        state.successful += successful;
        state.failed += failed;
        state.processed += successful + failed;
        if batch_done {
            state.batches_completed = (state.batches_completed + 1).min(state.total_batches);
        }
        state.complete = state.processed == state.total;

        let snapshot = state.clone();
        if !self.is_stopped() {
            if let Some(observer) = &self.observer {
                observer.on_progress(&snapshot);
            }
        }
        snapshot
    }

    /// Close out a job with nothing to process
    ///
    /// Delivers the single completion snapshot that batches would otherwise
    /// have produced.
    pub fn finish_empty(&self) -> ProgressSnapshot {
        let mut state = self.lock();
        if state.total == 0 && !state.complete {
            state.complete = true;
            if !self.is_stopped() {
                if let Some(observer) = &self.observer {
                    observer.on_progress(&state);
                }
            }
        }
        state.clone()
    }

    /// Mark aborted and silence the observer
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.lock().aborted = true;
    }
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("state", &self.snapshot())
            .field("stopped", &self.is_stopped())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collecting() -> (Arc<Mutex<Vec<ProgressSnapshot>>>, Arc<dyn ProgressObserver>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let observer: Arc<dyn ProgressObserver> =
            Arc::new(move |snapshot: &ProgressSnapshot| sink.lock().unwrap().push(snapshot.clone()));
        (seen, observer)
    }

    #[test]
    fn test_completion_reported_exactly_once() {
        let (seen, observer) = collecting();
        let tracker = ProgressTracker::new(Some(observer));
        tracker.begin(5, 2);

        tracker.record_batch(3, 0);
        tracker.record_batch(1, 1);
        // Late duplicate report cannot push counts past the total
        tracker.record_batch(2, 0);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen.iter().filter(|s| s.processed == s.total).count(), 1);
        assert!(seen.last().unwrap().complete);
        assert!(seen.windows(2).all(|w| w[0].processed <= w[1].processed));
        assert_eq!(tracker.snapshot().successful, 4);
        assert_eq!(tracker.snapshot().failed, 1);
    }

    #[test]
    fn test_stop_silences_observer() {
        let (seen, observer) = collecting();
        let tracker = ProgressTracker::new(Some(observer));
        tracker.begin(4, 4);
        tracker.record_batch(1, 0);
        tracker.stop();
        tracker.record_batch(1, 0);

        assert_eq!(seen.lock().unwrap().len(), 1);
        let snapshot = tracker.snapshot();
        assert!(snapshot.aborted);
        assert_eq!(snapshot.processed, 2);
    }

    #[test]
    fn test_empty_job_completes_once() {
        let (seen, observer) = collecting();
        let tracker = ProgressTracker::new(Some(observer));
        tracker.begin(0, 0);
        tracker.finish_empty();
        tracker.finish_empty();
        assert_eq!(seen.lock().unwrap().len(), 1);
        assert!((tracker.snapshot().fraction() - 1.0).abs() < f64::EPSILON);
    }
}
