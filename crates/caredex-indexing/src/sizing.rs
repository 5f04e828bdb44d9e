//! Adaptive batch sizing from average prepared-text length

use caredex_config::IndexingConfig;

/// Picks items-per-round-trip from the texts about to be sent
///
/// Provider batch payloads are token-bound, so long texts get smaller
/// batches and short texts larger ones. The result never exceeds
/// `max_batch_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSizing {
    pub base: usize,
    pub max_batch_size: usize,
    pub long_text_chars: usize,
    pub short_text_chars: usize,
}

impl Default for BatchSizing {
    fn default() -> Self {
        Self::from_config(&IndexingConfig::default())
    }
}

impl BatchSizing {
    pub fn from_config(config: &IndexingConfig) -> Self {
        Self {
            base: config.batch_size,
            max_batch_size: config.max_batch_size,
            long_text_chars: config.long_text_chars,
            short_text_chars: config.short_text_chars,
        }
    }

    /// Same thresholds with a different starting size
    #[must_use]
    pub const fn with_base(mut self, base: usize) -> Self {
        self.base = base;
        self
    }

    /// Mean character count, zero for an empty set
    pub fn average_chars<S: AsRef<str>>(texts: &[S]) -> usize {
        if texts.is_empty() {
            return 0;
        }
        let total: usize = texts.iter().map(|t| t.as_ref().chars().count()).sum();
        total / texts.len()
    }

    pub fn batch_size_for<S: AsRef<str>>(&self, texts: &[S]) -> usize {
        let ceiling = self.max_batch_size.max(1);
        let base = self.base.clamp(1, ceiling);
        let average = Self::average_chars(texts);

        let size = if average > self.long_text_chars {
            base / 2
        } else if average > 0 && average < self.short_text_chars {
            base.saturating_mul(2)
        } else {
            base
        };

        tracing::debug!(average_chars = average, batch_size = size, "Adaptive batch size");
        size.clamp(1, ceiling)
    }
}
