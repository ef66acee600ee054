//! In-process tier backed by a moka cache

use crate::error::ProviderError;
use crate::provider::StoreProvider;
use async_trait::async_trait;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;

/// Fast, volatile tier. Entries live for `ttl` since their last write or
/// touch, and the least used entries are dropped past `capacity`.
pub struct MemoryProvider {
    cache: Cache<String, Arc<Vec<u8>>>,
}

impl MemoryProvider {
    pub fn new(ttl: Duration, capacity: u64) -> Self {
        let cache = Cache::builder()
            .time_to_live(ttl)
            .max_capacity(capacity)
            .build();
        Self { cache }
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

#[async_trait]
impl StoreProvider for MemoryProvider {
    fn name(&self) -> &str {
        "memory"
    }

    async fn push(&self, key: &str, torrent: &[u8]) -> Result<(), ProviderError> {
        self.cache
            .insert(key.to_string(), Arc::new(torrent.to_vec()))
            .await;
        Ok(())
    }

    async fn pull(&self, key: &str) -> Result<Vec<u8>, ProviderError> {
        self.cache
            .get(key)
            .await
            .map(|torrent| torrent.as_ref().clone())
            .ok_or(ProviderError::NotFound)
    }

    async fn touch(&self, key: &str) -> Result<(), ProviderError> {
        // Re-inserting restarts the time to live
        let torrent = self.cache.get(key).await.ok_or(ProviderError::NotFound)?;
        self.cache.insert(key.to_string(), torrent).await;
        Ok(())
    }
}
