//! Store configuration and statistics

use keyed_task_cache::{CacheConfig, CacheStats};
use serde::Serialize;
use std::time::Duration;

/// Configuration for a [`TieredStore`](crate::TieredStore)
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// How long a finished pull/push/touch is shared with later callers
    pub op_expire: Duration,
    /// Entry bound of each operation cache, zero is unbounded
    pub op_capacity: usize,
    /// Provider traversals running at once, per operation
    pub concurrency: usize,
    /// Misses within `rate_window` before a key is suppressed
    pub rate_threshold: i64,
    pub rate_window: Duration,
    pub rate_capacity: usize,
    /// Deadline for a single provider call
    pub provider_timeout: Duration,
    /// Deadline for the background promotion started by touch
    pub promotion_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            op_expire: Duration::from_secs(5 * 60),
            op_capacity: 0,
            concurrency: 10,
            rate_threshold: 10,
            rate_window: Duration::from_secs(60),
            rate_capacity: 100_000,
            provider_timeout: Duration::from_secs(30),
            promotion_timeout: Duration::from_secs(60),
        }
    }
}

impl StoreConfig {
    /// Cache settings shared by the three operation caches. Failures are
    /// handed to concurrent callers but never kept.
    pub(crate) fn op_cache(&self) -> CacheConfig {
        CacheConfig {
            concurrency: self.concurrency,
            expire: self.op_expire,
            capacity: self.op_capacity,
            store_errors: false,
            ..Default::default()
        }
    }
}

/// Operation cache statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    pub pull: CacheStats,
    pub push: CacheStats,
    pub touch: CacheStats,
}
