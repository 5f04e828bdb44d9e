//! In-memory result cache keyed by normalized text
//!
//! Entries expire strictly after the TTL and are evicted lazily on read.
//! Writes occasionally sweep every expired entry, and always sweep once the
//! cache grows past its size threshold.

use crate::clock::{Clock, SystemClock};
use crate::text::normalize_text;
use crate::types::{EmbeddingResult, TaskHint};
use caredex_config::CacheConfig;
use chrono::{DateTime, TimeDelta, Utc};
use rand::Rng;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Hex SHA-256 of normalized text, width and task hint
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(text: &str, dimensions: usize, task: TaskHint) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(normalize_text(text).as_bytes());
        hasher.update(b"|");
        hasher.update(dimensions.to_string().as_bytes());
        hasher.update(b"|");
        hasher.update(task.as_str().as_bytes());
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    result: EmbeddingResult,
    inserted_at: DateTime<Utc>,
}

/// Cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// TTL cache of embedding results
pub struct ResultCache {
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
    ttl: TimeDelta,
    max_entries: usize,
    sweep_probability: f64,
    clock: Arc<dyn Clock>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl ResultCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl: TimeDelta::from_std(ttl).unwrap_or_else(|_| TimeDelta::days(365)),
            max_entries: max_entries.max(1),
            sweep_probability: 0.0,
            clock: Arc::new(SystemClock),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(Duration::from_secs(config.ttl_secs), config.max_entries)
            .with_sweep_probability(config.sweep_probability)
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Chance that a write sweeps expired entries even below the size threshold
    #[must_use]
    pub fn with_sweep_probability(mut self, probability: f64) -> Self {
        self.sweep_probability = probability.clamp(0.0, 1.0);
        self
    }

    /// Look up a live entry; an expired entry is removed and reported as a miss
    pub fn get(&self, key: &CacheKey) -> Option<EmbeddingResult> {
        let now = self.clock.now();
        let mut entries = self.lock();

        match entries.get(key).map(|entry| self.is_expired(entry, now)) {
            None => {
                drop(entries);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Some(true) => {
                entries.remove(key);
                drop(entries);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Some(false) => {
                let result = entries.get(key).map(|entry| entry.result.clone());
                drop(entries);
                self.hits.fetch_add(1, Ordering::Relaxed);
                result
            }
        }
    }

    /// Store a result, overwriting any previous entry for the key
    pub fn put(&self, key: CacheKey, result: EmbeddingResult) {
        let now = self.clock.now();
        let mut entries = self.lock();
        entries.insert(
            key,
            CacheEntry {
                result,
                inserted_at: now,
            },
        );

        let over_threshold = entries.len() > self.max_entries;
        let lucky = self.sweep_probability > 0.0 && rand::rng().random_bool(self.sweep_probability);
        if over_threshold || lucky {
            let removed = self.sweep_locked(&mut entries, now);
            if entries.len() > self.max_entries {
                self.evict_oldest_locked(&mut entries);
            }
            tracing::debug!(removed, remaining = entries.len(), "Swept embedding cache");
        }
    }

    /// Remove every expired entry, returning how many were removed
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.lock();
        self.sweep_locked(&mut entries, now)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<CacheKey, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_expired(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        now - entry.inserted_at > self.ttl
    }

    fn sweep_locked(&self, entries: &mut HashMap<CacheKey, CacheEntry>, now: DateTime<Utc>) -> usize {
        let before = entries.len();
        entries.retain(|_, entry| !self.is_expired(entry, now));
        let removed = before - entries.len();
        self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    fn evict_oldest_locked(&self, entries: &mut HashMap<CacheKey, CacheEntry>) {
        let excess = entries.len().saturating_sub(self.max_entries);
        let mut by_age: Vec<(CacheKey, DateTime<Utc>)> = entries
            .iter()
            .map(|(key, entry)| (key.clone(), entry.inserted_at))
            .collect();
        by_age.sort_by_key(|(_, inserted_at)| *inserted_at);
        for (key, _) in by_age.into_iter().take(excess) {
            entries.remove(&key);
        }
        self.evictions.fetch_add(excess as u64, Ordering::Relaxed);
    }
}

impl fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultCache")
            .field("ttl", &self.ttl)
            .field("max_entries", &self.max_entries)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
