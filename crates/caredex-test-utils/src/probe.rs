//! Counting probe for in-flight work

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Tracks how many calls are in flight and the highest count ever seen
#[derive(Debug, Clone, Default)]
pub struct InFlightProbe {
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    total: Arc<AtomicUsize>,
}

impl InFlightProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark one call as started; it ends when the guard drops
    pub fn enter(&self) -> InFlightGuard {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.total.fetch_add(1, Ordering::SeqCst);
        InFlightGuard {
            current: Arc::clone(&self.current),
        }
    }

    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    /// Highest simultaneous in-flight count observed
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Calls entered so far
    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}

/// Decrements the probe's in-flight count on drop
#[derive(Debug)]
pub struct InFlightGuard {
    current: Arc<AtomicUsize>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peak_tracks_overlap() {
        let probe = InFlightProbe::new();
        let a = probe.enter();
        let b = probe.enter();
        assert_eq!(probe.current(), 2);
        drop(a);
        let _c = probe.enter();
        drop(b);
        assert_eq!(probe.peak(), 2);
        assert_eq!(probe.total(), 3);
        assert_eq!(probe.current(), 1);
    }
}
