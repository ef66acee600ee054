//! Single-flight keyed task cache with TTL expiration and LRU eviction
//!
//! Deduplicates concurrent computations per key, memoizes their results
//! (success or failure) for a configurable time, and bounds the number of
//! retained entries with a least-recently-used sweep.

mod cache;
mod types;

pub use cache::KeyedTaskCache;
pub use types::{CacheConfig, CacheStats, Evicted, TaskStatus};
