//! Cache types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Lifecycle state of a cache entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum TaskStatus {
    /// No entry exists for the key
    None = 0,
    /// Inserted, waiting for an execution slot
    Enqueued = 1,
    /// The factory is executing
    Running = 2,
    /// A successful result is memoized
    Done = 3,
    /// A failed result is memoized
    Failed = 4,
    /// Removed by eviction or expiry
    Canceled = 5,
}

impl TaskStatus {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Enqueued,
            2 => Self::Running,
            3 => Self::Done,
            4 => Self::Failed,
            5 => Self::Canceled,
            _ => Self::None,
        }
    }

    /// Whether a result has been memoized
    pub fn is_complete(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// Configuration for a [`KeyedTaskCache`](crate::KeyedTaskCache)
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of factories executing at once
    pub concurrency: usize,
    /// TTL of a successful result, zero never expires
    pub expire: Duration,
    /// TTL of a failed result, `None` uses `expire`
    pub error_expire: Option<Duration>,
    /// Cancels entries still waiting for a slot after this long
    pub init_expire: Option<Duration>,
    /// Entry count the eviction sweep works against, zero disables it
    pub capacity: usize,
    /// Fraction of `capacity` above which a sweep runs
    pub clean_threshold: f64,
    /// Fraction of `capacity` removed by one sweep
    pub clean_ratio: f64,
    /// Allow the sweep to remove entries that never completed
    pub evict_not_inited: bool,
    /// Keep failed results until `error_expire`; when false they are dropped
    /// as soon as the waiting callers have been answered
    pub store_errors: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            expire: Duration::ZERO,
            error_expire: None,
            init_expire: None,
            capacity: 0,
            clean_threshold: 0.9,
            clean_ratio: 0.1,
            evict_not_inited: false,
            store_errors: true,
        }
    }
}

impl CacheConfig {
    pub(crate) fn failure_ttl(&self) -> Duration {
        self.error_expire.unwrap_or(self.expire)
    }
}

/// Statistics about the cache
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// Returned to callers whose entry was removed before it produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evicted;

impl fmt::Display for Evicted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cache entry evicted before completion")
    }
}

impl std::error::Error for Evicted {}
