//! Per-key decaying miss counters

use keyed_task_cache::{CacheConfig, Evicted, KeyedTaskCache};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Suppresses keys that missed `threshold` times within `window`.
///
/// Each penalty is undone on its own once `window` has passed, so the counter
/// approximates a sliding window rather than a fixed bucket.
pub struct RateLimiter {
    counters: KeyedTaskCache<Arc<AtomicI64>, Evicted>,
    threshold: i64,
    window: Duration,
}

impl RateLimiter {
    pub fn new(threshold: i64, window: Duration, capacity: usize) -> Self {
        let counters = KeyedTaskCache::new(CacheConfig {
            capacity,
            ..Default::default()
        });
        Self {
            counters,
            threshold,
            window,
        }
    }

    /// Whether `key` is below the miss threshold
    pub async fn allow(&self, key: &str) -> bool {
        self.counter(key).await.load(Ordering::Acquire) < self.threshold
    }

    /// Record a miss for `key`, reverted after the window
    pub async fn penalize(&self, key: &str) {
        let counter = self.counter(key).await;
        counter.fetch_add(1, Ordering::AcqRel);

        let window = self.window;
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            counter.fetch_sub(1, Ordering::AcqRel);
        });
    }

    /// Current miss count for `key`
    pub async fn misses(&self, key: &str) -> i64 {
        self.counter(key).await.load(Ordering::Acquire)
    }

    async fn counter(&self, key: &str) -> Arc<AtomicI64> {
        self.counters
            .get(key, || async { Ok(Arc::new(AtomicI64::new(0))) })
            .await
            // Evicted mid-creation: count against a throwaway counter
            .unwrap_or_else(|_| Arc::new(AtomicI64::new(0)))
    }
}
