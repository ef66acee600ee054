//! Ordered multi-tier torrent store
//!
//! Providers are ordered fastest first. Reads walk the list forward and copy
//! hits back into the faster tiers, writes go slowest first so a fast tier
//! never holds something the durable tiers lack.

use crate::error::{ProviderError, Result, StoreError};
use crate::provider::StoreProvider;
use crate::rate::RateLimiter;
use crate::types::{StoreConfig, StoreStats};
use keyed_task_cache::KeyedTaskCache;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Tiered store with single-flight operations and miss suppression.
///
/// Cloning is cheap, clones share providers and caches.
#[derive(Clone)]
pub struct TieredStore {
    inner: Arc<Inner>,
}

struct Inner {
    providers: Vec<Arc<dyn StoreProvider>>,
    pulls: KeyedTaskCache<Vec<u8>, StoreError>,
    pushes: KeyedTaskCache<(), StoreError>,
    touches: KeyedTaskCache<(), StoreError>,
    rate: RateLimiter,
    config: StoreConfig,
}

impl TieredStore {
    pub fn new(providers: Vec<Arc<dyn StoreProvider>>, config: StoreConfig) -> Self {
        let op_cache = config.op_cache();
        let rate = RateLimiter::new(
            config.rate_threshold,
            config.rate_window,
            config.rate_capacity,
        );

        Self {
            inner: Arc::new(Inner {
                providers,
                pulls: KeyedTaskCache::new(op_cache.clone()),
                pushes: KeyedTaskCache::new(op_cache.clone()),
                touches: KeyedTaskCache::new(op_cache),
                rate,
                config,
            }),
        }
    }

    /// Fetch the torrent for `key` from the first tier that has it
    pub async fn pull(&self, key: &str) -> Result<Vec<u8>> {
        let inner = &self.inner;
        inner.pulls.get(key, || inner.pull_from(key, 0)).await
    }

    /// Write `torrent` to every tier, slowest first
    pub async fn push(&self, key: &str, torrent: &[u8]) -> Result<()> {
        let inner = &self.inner;
        inner.pushes.get(key, || inner.push_all(key, torrent)).await
    }

    /// Confirm `key` exists in some tier, promoting it in the background
    /// when only a slower tier has it
    pub async fn touch(&self, key: &str) -> Result<()> {
        let inner = &self.inner;
        inner.touches.get(key, || Inner::touch_scan(inner, key)).await
    }

    /// Provider names in tier order
    pub fn providers(&self) -> Vec<String> {
        self.inner
            .providers
            .iter()
            .map(|p| p.name().to_string())
            .collect()
    }

    pub async fn stats(&self) -> StoreStats {
        StoreStats {
            pull: self.inner.pulls.stats().await,
            push: self.inner.pushes.stats().await,
            touch: self.inner.touches.stats().await,
        }
    }
}

impl Inner {
    async fn call<T, F>(&self, fut: F) -> std::result::Result<T, ProviderError>
    where
        F: Future<Output = std::result::Result<T, ProviderError>>,
    {
        let deadline = self.config.provider_timeout;
        match tokio::time::timeout(deadline, fut).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(deadline)),
        }
    }

    /// Rate check shared by pull and touch. A suppressed key is penalized
    /// again so persistent hammering keeps it suppressed.
    async fn check_rate(&self, key: &str) -> Result<()> {
        if self.rate.allow(key).await {
            return Ok(());
        }
        self.rate.penalize(key).await;
        warn!(infohash = key, "Key suppressed after repeated misses");
        Err(StoreError::RateLimited)
    }

    async fn pull_from(&self, key: &str, start: usize) -> Result<Vec<u8>> {
        self.check_rate(key).await?;

        for (index, provider) in self.providers.iter().enumerate().skip(start) {
            let started = Instant::now();
            match self.call(provider.pull(key)).await {
                Ok(torrent) => {
                    debug!(
                        infohash = key,
                        provider = provider.name(),
                        duration = ?started.elapsed(),
                        "Pulled torrent"
                    );
                    self.promote(key, &torrent, index).await;
                    return Ok(torrent);
                }
                Err(ProviderError::NotFound) => continue,
                Err(e) => {
                    warn!(infohash = key, provider = provider.name(), error = %e, "Pull failed");
                    return Err(StoreError::provider(provider.name(), e));
                }
            }
        }

        self.rate.penalize(key).await;
        Err(StoreError::NotFound)
    }

    /// Copy a torrent found at `found_at` into every faster tier, fastest
    /// first. Failures are logged and do not affect the read.
    async fn promote(&self, key: &str, torrent: &[u8], found_at: usize) {
        for provider in &self.providers[..found_at] {
            if let Err(e) = self.call(provider.push(key, torrent)).await {
                warn!(infohash = key, provider = provider.name(), error = %e, "Promotion failed");
            }
        }
    }

    async fn push_all(&self, key: &str, torrent: &[u8]) -> Result<()> {
        for provider in self.providers.iter().rev() {
            let started = Instant::now();
            self.call(provider.push(key, torrent))
                .await
                .map_err(|e| {
                    warn!(infohash = key, provider = provider.name(), error = %e, "Push failed");
                    StoreError::provider(provider.name(), e)
                })?;
            debug!(
                infohash = key,
                provider = provider.name(),
                duration = ?started.elapsed(),
                "Pushed torrent"
            );
        }
        Ok(())
    }

    async fn touch_scan(self: &Arc<Self>, key: &str) -> Result<()> {
        self.check_rate(key).await?;

        let mut saw_missing = false;
        let mut last_error = None;

        for (index, provider) in self.providers.iter().enumerate() {
            match self.call(provider.touch(key)).await {
                Ok(()) => {
                    if index > 0 {
                        self.spawn_promotion(key, index);
                    }
                    return Ok(());
                }
                Err(ProviderError::NotFound) => saw_missing = true,
                Err(e) => {
                    warn!(infohash = key, provider = provider.name(), error = %e, "Touch failed");
                    last_error = Some(StoreError::provider(provider.name(), e));
                }
            }
        }

        match last_error {
            Some(err) if !saw_missing => Err(err),
            _ => {
                self.rate.penalize(key).await;
                Err(StoreError::NotFound)
            }
        }
    }

    fn spawn_promotion(self: &Arc<Self>, key: &str, found_at: usize) {
        let inner = Arc::clone(self);
        let key = key.to_string();
        let deadline = self.config.promotion_timeout;

        tokio::spawn(async move {
            match tokio::time::timeout(deadline, inner.pull_from(&key, found_at)).await {
                Ok(Ok(_)) => info!(infohash = %key, tier = found_at, "Promoted torrent after touch"),
                Ok(Err(e)) => warn!(infohash = %key, error = %e, "Promotion after touch failed"),
                Err(_) => warn!(infohash = %key, "Promotion after touch timed out"),
            }
        });
    }
}
