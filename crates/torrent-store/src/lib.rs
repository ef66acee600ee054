//! Tiered torrent store
//!
//! Composes an ordered list of storage providers (fastest first) into one
//! logical store. Reads search the tiers in order and backfill faster tiers
//! that missed, writes fan out slowest first, and keys that keep coming up
//! empty are briefly suppressed.

pub mod error;
pub mod provider;
pub mod providers;
pub mod rate;
pub mod store;
pub mod types;

pub use error::{ProviderError, StoreError};
pub use provider::StoreProvider;
pub use rate::RateLimiter;
pub use store::TieredStore;
pub use types::{StoreConfig, StoreStats};
