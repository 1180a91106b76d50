//! Completion signal deduplication cache

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Default dedup TTL (5 minutes)
const DEDUP_TTL_SECS: u64 = 300;

/// Maximum dedup cache entries
const DEDUP_MAX_ENTRIES: usize = 512;

/// Completion deduplication cache
///
/// Collapses repeated completion signals for the same response id so the
/// finalize path runs once per logical completion. Uses a TTL-based eviction
/// strategy with a hard cap on entries.
#[derive(Debug)]
pub struct CompletionDedup {
    cache: HashMap<String, Instant>,
    ttl: Duration,
    max_entries: usize,
}

impl Default for CompletionDedup {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEDUP_TTL_SECS), DEDUP_MAX_ENTRIES)
    }
}

impl CompletionDedup {
    /// Create a cache with a custom TTL and capacity
    #[must_use]
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            cache: HashMap::new(),
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    /// Check if the given key has completed recently.
    ///
    /// Returns `true` if this is a duplicate (already seen within TTL).
    /// Returns `false` on first sight and records the key.
    pub fn is_duplicate(&mut self, key: &str) -> bool {
        let now = Instant::now();

        if let Some(ts) = self.cache.get(key)
            && now.duration_since(*ts) < self.ttl
        {
            return true;
        }

        // Evict expired entries when at capacity
        if self.cache.len() >= self.max_entries {
            self.cache.retain(|_, ts| now.duration_since(*ts) < self.ttl);
        }

        // Still full: drop the oldest
        if self.cache.len() >= self.max_entries
            && let Some(oldest) = self
                .cache
                .iter()
                .min_by_key(|(_, ts)| **ts)
                .map(|(k, _)| k.clone())
        {
            self.cache.remove(&oldest);
        }

        self.cache.insert(key.to_string(), now);
        false
    }

    /// Number of tracked keys
    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Whether no key is tracked
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Forget every key
    pub fn clear(&mut self) {
        self.cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sight_is_not_duplicate() {
        let mut dedup = CompletionDedup::default();
        assert!(!dedup.is_duplicate("resp_1"));
        assert!(dedup.is_duplicate("resp_1"));
        assert!(!dedup.is_duplicate("resp_2"));
    }

    #[test]
    fn expired_keys_are_accepted_again() {
        let mut dedup = CompletionDedup::new(Duration::ZERO, 8);
        assert!(!dedup.is_duplicate("resp_1"));
        assert!(!dedup.is_duplicate("resp_1"));
    }

    #[test]
    fn capacity_is_bounded() {
        let mut dedup = CompletionDedup::new(Duration::from_secs(60), 3);
        for i in 0..10 {
            dedup.is_duplicate(&format!("resp_{i}"));
        }
        assert!(dedup.len() <= 3);
        assert!(dedup.is_duplicate("resp_9"));
    }
}
