//! Single-flight task cache with per-entry expiry timers

use crate::types::{CacheConfig, CacheStats, Evicted, TaskStatus};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

type EntryMap<V, E> = HashMap<String, Arc<Entry<V, E>>>;

struct Timer {
    ttl: Duration,
    handle: JoinHandle<()>,
}

struct Entry<V, E> {
    key: String,
    /// Locked by the creating caller until the result is stored
    result: Mutex<Option<Result<V, E>>>,
    status: AtomicU8,
    canceled: AtomicBool,
    last_access: StdMutex<Instant>,
    /// Bumped on every arm/disarm so stale timers become no-ops
    generation: AtomicU64,
    timer: StdMutex<Option<Timer>>,
}

impl<V, E> Entry<V, E> {
    fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            result: Mutex::new(None),
            status: AtomicU8::new(TaskStatus::Enqueued as u8),
            canceled: AtomicBool::new(false),
            last_access: StdMutex::new(Instant::now()),
            generation: AtomicU64::new(0),
            timer: StdMutex::new(None),
        }
    }

    fn status(&self) -> TaskStatus {
        if self.is_canceled() {
            return TaskStatus::Canceled;
        }
        TaskStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    fn set_status(&self, status: TaskStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }

    fn touch(&self) {
        *self
            .last_access
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    fn last_access(&self) -> Instant {
        *self
            .last_access
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn timer(&self) -> MutexGuard<'_, Option<Timer>> {
        self.timer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cancel(&self) {
        if self.canceled.swap(true, Ordering::AcqRel) {
            return;
        }
        self.disarm();
    }

    fn disarm(&self) {
        let mut timer = self.timer();
        self.generation.fetch_add(1, Ordering::AcqRel);
        if let Some(timer) = timer.take() {
            timer.handle.abort();
        }
    }

    /// Replace the current timer with a fresh one firing after `ttl`
    fn arm<S>(&self, ttl: Duration, spawn: S)
    where
        S: FnOnce(u64, Duration) -> JoinHandle<()>,
    {
        let mut timer = self.timer();
        self.install(&mut timer, ttl, spawn);
    }

    /// Restart the current timer with its own TTL, if one is armed
    fn restart<S>(&self, spawn: S)
    where
        S: FnOnce(u64, Duration) -> JoinHandle<()>,
    {
        let mut timer = self.timer();
        if let Some(ttl) = timer.as_ref().map(|t| t.ttl) {
            self.install(&mut timer, ttl, spawn);
        }
    }

    fn install<S>(&self, timer: &mut Option<Timer>, ttl: Duration, spawn: S)
    where
        S: FnOnce(u64, Duration) -> JoinHandle<()>,
    {
        if self.is_canceled() {
            return;
        }
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let handle = spawn(generation, ttl);
        if let Some(old) = timer.replace(Timer { ttl, handle }) {
            old.handle.abort();
        }
    }

    /// Called by a firing timer; cancels the entry unless the timer is stale
    fn expire(&self, generation: u64) -> bool {
        let mut timer = self.timer();
        if self.generation.load(Ordering::Acquire) != generation {
            return false;
        }
        // Detach rather than abort: this runs on the timer's own task.
        timer.take();
        self.canceled.store(true, Ordering::Release);
        true
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

/// Remove `entry` from the map only if the key still maps to this exact entry
fn remove_entry<V, E>(entries: &mut EntryMap<V, E>, entry: &Arc<Entry<V, E>>) -> bool {
    let same = entries
        .get(&entry.key)
        .is_some_and(|current| Arc::ptr_eq(current, entry));
    if same {
        entries.remove(&entry.key);
    }
    same
}

async fn expire_after<V, E>(
    entries: Weak<RwLock<EntryMap<V, E>>>,
    entry: Weak<Entry<V, E>>,
    counters: Arc<Counters>,
    generation: u64,
    ttl: Duration,
) {
    tokio::time::sleep(ttl).await;

    let (Some(entries), Some(entry)) = (entries.upgrade(), entry.upgrade()) else {
        return;
    };
    let mut entries = entries.write().await;
    if !entry.expire(generation) {
        return;
    }
    if remove_entry(&mut entries, &entry) {
        counters.evictions.fetch_add(1, Ordering::Relaxed);
        trace!(key = %entry.key, "Cache entry expired");
    }
}

/// Cancels and unlinks the entry if the computing caller goes away early
struct Owner<V: Send + Sync + 'static, E: Send + Sync + 'static> {
    entries: Arc<RwLock<EntryMap<V, E>>>,
    entry: Arc<Entry<V, E>>,
    finished: bool,
}

impl<V: Send + Sync + 'static, E: Send + Sync + 'static> Drop for Owner<V, E> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.entry.cancel();
        debug!(key = %self.entry.key, "Computation abandoned, evicting entry");

        match self.entries.try_write() {
            Ok(mut entries) => {
                remove_entry(&mut entries, &self.entry);
            }
            Err(_) => {
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    let entries = Arc::clone(&self.entries);
                    let entry = Arc::clone(&self.entry);
                    handle.spawn(async move {
                        remove_entry(&mut *entries.write().await, &entry);
                    });
                }
            }
        }
    }
}

/// Keyed cache that runs each key's factory at most once at a time and
/// memoizes its result until the entry expires or is evicted
pub struct KeyedTaskCache<V, E> {
    entries: Arc<RwLock<EntryMap<V, E>>>,
    slots: Semaphore,
    config: CacheConfig,
    cleaning: AtomicBool,
    counters: Arc<Counters>,
}

impl<V, E> KeyedTaskCache<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + From<Evicted> + Send + Sync + 'static,
{
    /// Create a new cache
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::with_capacity(config.capacity))),
            slots: Semaphore::new(config.concurrency.max(1)),
            config,
            cleaning: AtomicBool::new(false),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Return the memoized result for `key`, running `factory` if no entry
    /// exists. Concurrent callers for the same key share one execution.
    pub async fn get<F, Fut>(&self, key: &str, factory: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let existing = {
            let entries = self.entries.read().await;
            entries.get(key).map(|entry| {
                self.refresh(entry);
                Arc::clone(entry)
            })
        };
        if let Some(entry) = existing {
            return self.join(&entry).await;
        }

        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get(key).cloned() {
            self.refresh(&entry);
            drop(entries);
            return self.join(&entry).await;
        }

        let entry = Arc::new(Entry::new(key));
        let mut slot = entry.result.lock().await;
        entries.insert(key.to_string(), Arc::clone(&entry));
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        self.clean(&mut entries);
        drop(entries);

        let mut owner = Owner {
            entries: Arc::clone(&self.entries),
            entry: Arc::clone(&entry),
            finished: false,
        };
        if let Some(ttl) = self.config.init_expire.filter(|ttl| !ttl.is_zero()) {
            self.arm(&entry, ttl);
        }

        let result = {
            let _permit = self.slots.acquire().await.ok();
            entry.disarm();
            if entry.is_canceled() {
                Err(E::from(Evicted))
            } else {
                entry.set_status(TaskStatus::Running);
                factory().await
            }
        };

        *slot = Some(result.clone());
        entry.set_status(if result.is_ok() {
            TaskStatus::Done
        } else {
            TaskStatus::Failed
        });
        drop(slot);

        if entry.is_canceled() {
            owner.finished = true;
            return result;
        }
        match &result {
            Ok(_) => self.schedule(&entry, self.config.expire),
            Err(_) if self.config.store_errors => {
                self.schedule(&entry, self.config.failure_ttl())
            }
            Err(_) => {
                // The owner guard stays armed until the entry is unlinked
                let mut entries = self.entries.write().await;
                remove_entry(&mut entries, &entry);
            }
        }
        owner.finished = true;
        result
    }

    /// Restart the expiry timer of an existing entry. Returns whether the
    /// key was present.
    pub async fn touch(&self, key: &str) -> bool {
        let entries = self.entries.read().await;
        match entries.get(key) {
            Some(entry) => {
                self.refresh(entry);
                true
            }
            None => false,
        }
    }

    /// Current lifecycle state of `key`, without creating an entry
    pub async fn status(&self, key: &str) -> (TaskStatus, bool) {
        let entries = self.entries.read().await;
        match entries.get(key) {
            Some(entry) => (entry.status(), true),
            None => (TaskStatus::None, false),
        }
    }

    /// Number of live entries
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Get current cache statistics
    pub async fn stats(&self) -> CacheStats {
        let entries = self.entries.read().await.len();
        CacheStats {
            entries,
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
        }
    }

    async fn join(&self, entry: &Entry<V, E>) -> Result<V, E> {
        self.counters.hits.fetch_add(1, Ordering::Relaxed);
        let slot = entry.result.lock().await;
        match slot.as_ref() {
            Some(result) => result.clone(),
            None => Err(E::from(Evicted)),
        }
    }

    fn refresh(&self, entry: &Arc<Entry<V, E>>) {
        entry.touch();
        let spawn = self.timer_spawner(entry);
        entry.restart(spawn);
    }

    fn schedule(&self, entry: &Arc<Entry<V, E>>, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }
        self.arm(entry, ttl);
    }

    fn arm(&self, entry: &Arc<Entry<V, E>>, ttl: Duration) {
        let spawn = self.timer_spawner(entry);
        entry.arm(ttl, spawn);
    }

    fn timer_spawner(&self, entry: &Arc<Entry<V, E>>) -> impl FnOnce(u64, Duration) -> JoinHandle<()> {
        let entries = Arc::downgrade(&self.entries);
        let weak = Arc::downgrade(entry);
        let counters = Arc::clone(&self.counters);
        move |generation, ttl| tokio::spawn(expire_after(entries, weak, counters, generation, ttl))
    }

    /// Evict least recently used entries once the map grows past the
    /// configured threshold. Running entries are never touched.
    fn clean(&self, entries: &mut EntryMap<V, E>) {
        let capacity = self.config.capacity;
        if capacity == 0 {
            return;
        }
        let threshold = (self.config.clean_threshold * capacity as f64).ceil() as usize;
        if entries.len() <= threshold {
            return;
        }
        if self.cleaning.swap(true, Ordering::AcqRel) {
            return;
        }

        let mut candidates: Vec<Arc<Entry<V, E>>> = entries.values().cloned().collect();
        candidates.sort_by_key(|entry| entry.last_access());

        let quota = (self.config.clean_ratio * capacity as f64).ceil() as usize;
        let mut removed = 0;
        for entry in candidates {
            if removed >= quota {
                break;
            }
            let status = entry.status();
            if status == TaskStatus::Running {
                continue;
            }
            if !status.is_complete() && !self.config.evict_not_inited {
                continue;
            }
            entry.cancel();
            entries.remove(&entry.key);
            removed += 1;
        }

        self.counters
            .evictions
            .fetch_add(removed as u64, Ordering::Relaxed);
        debug!(removed, remaining = entries.len(), "Evicted least recently used entries");
        self.cleaning.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug, Clone, PartialEq)]
    enum TestError {
        Evicted,
        Failed(String),
    }

    impl From<Evicted> for TestError {
        fn from(_: Evicted) -> Self {
            TestError::Evicted
        }
    }

    fn cache_with(config: CacheConfig) -> Arc<KeyedTaskCache<u32, TestError>> {
        Arc::new(KeyedTaskCache::new(config))
    }

    fn ttl_config(expire_ms: u64) -> CacheConfig {
        CacheConfig {
            expire: Duration::from_millis(expire_ms),
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_gets_run_factory_once() {
        let cache = cache_with(CacheConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));

        let gets = (0..10).map(|_| {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            async move {
                cache
                    .get("abc", || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(42)
                    })
                    .await
            }
        });
        let results = join_all(gets).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| *r == Ok(42)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_completed_result_is_memoized() {
        let cache = cache_with(CacheConfig::default());

        let first = cache.get("abc", || async { Ok(1) }).await;
        let second = cache.get("abc", || async { Ok(2) }).await;

        assert_eq!(first, Ok(1));
        assert_eq!(second, Ok(1));
        let stats = cache.stats().await;
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let cache = cache_with(ttl_config(100));
        cache.get("abc", || async { Ok(1) }).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(cache.status("abc").await, (TaskStatus::Done, true));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(cache.status("abc").await, (TaskStatus::None, false));
        assert_eq!(cache.stats().await.evictions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_touch_resets_ttl() {
        let cache = cache_with(ttl_config(100));
        cache.get("abc", || async { Ok(1) }).await.unwrap();

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(cache.touch("abc").await);

        tokio::time::sleep(Duration::from_millis(70)).await;
        assert_eq!(cache.status("abc").await, (TaskStatus::Done, true));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(cache.status("abc").await, (TaskStatus::None, false));
    }

    #[tokio::test(start_paused = true)]
    async fn test_touch_missing_key() {
        let cache = cache_with(ttl_config(100));
        assert!(!cache.touch("missing").await);
        assert_eq!(cache.status("missing").await, (TaskStatus::None, false));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_ttl_never_expires() {
        let cache = cache_with(CacheConfig::default());
        cache.get("abc", || async { Ok(1) }).await.unwrap();

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(cache.status("abc").await, (TaskStatus::Done, true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_eviction_removes_least_recently_used() {
        let cache = cache_with(CacheConfig {
            capacity: 10,
            clean_threshold: 0.9,
            clean_ratio: 0.1,
            ..Default::default()
        });

        for i in 0..10u32 {
            cache
                .get(&format!("key-{i}"), || async move { Ok(i) })
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        assert_eq!(cache.len().await, 9);
        assert_eq!(cache.status("key-0").await, (TaskStatus::None, false));
        assert_eq!(cache.status("key-9").await, (TaskStatus::Done, true));
        assert_eq!(cache.stats().await.evictions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_eviction_skips_running_entries() {
        let cache = cache_with(CacheConfig {
            capacity: 2,
            ..Default::default()
        });

        let slow = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                cache
                    .get("slow", || async {
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        Ok(0)
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(cache.status("slow").await, (TaskStatus::Running, true));

        cache.get("a", || async { Ok(1) }).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        cache.get("b", || async { Ok(2) }).await.unwrap();

        assert_eq!(cache.status("slow").await, (TaskStatus::Running, true));
        assert_eq!(cache.status("a").await, (TaskStatus::None, false));
        assert_eq!(slow.await.unwrap(), Ok(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_uses_error_ttl() {
        let cache = cache_with(CacheConfig {
            expire: Duration::from_secs(60),
            error_expire: Some(Duration::from_millis(10)),
            ..Default::default()
        });

        let result = cache
            .get("abc", || async { Err(TestError::Failed("boom".into())) })
            .await;
        assert_eq!(result, Err(TestError::Failed("boom".into())));
        assert_eq!(cache.status("abc").await, (TaskStatus::Failed, true));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.status("abc").await, (TaskStatus::None, false));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unstored_failure_is_recomputed() {
        let cache = cache_with(CacheConfig {
            expire: Duration::from_secs(60),
            store_errors: false,
            ..Default::default()
        });
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let calls = Arc::clone(&calls);
            let result = cache
                .get("abc", || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(TestError::Failed("boom".into()))
                })
                .await;
            assert!(result.is_err());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.status("abc").await, (TaskStatus::None, false));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_computation_evicts_waiters() {
        let cache = cache_with(CacheConfig::default());

        let owner = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                cache
                    .get("abc", || async {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        Ok(1)
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(1)).await;

        let waiter = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.get("abc", || async { Ok(2) }).await })
        };
        tokio::time::sleep(Duration::from_millis(1)).await;

        owner.abort();
        assert_eq!(waiter.await.unwrap(), Err(TestError::Evicted));
        assert_eq!(cache.status("abc").await, (TaskStatus::None, false));

        // A fresh caller recomputes
        assert_eq!(cache.get("abc", || async { Ok(3) }).await, Ok(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unstored_failure_unlinked_when_owner_dropped_while_removing() {
        let cache = cache_with(CacheConfig {
            store_errors: false,
            ..Default::default()
        });

        let owner = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                cache
                    .get("abc", || async {
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        Err(TestError::Failed("boom".into()))
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(1)).await;

        // Hold the map so the owner blocks on removal after its factory fails
        let guard = cache.entries.read().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        owner.abort();
        let _ = owner.await;
        drop(guard);

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(cache.status("abc").await, (TaskStatus::None, false));
        assert_eq!(cache.get("abc", || async { Ok(7) }).await, Ok(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_limit_serializes_factories() {
        let cache = cache_with(CacheConfig {
            concurrency: 1,
            ..Default::default()
        });
        let started = Instant::now();

        let gets = ["a", "b"].map(|key| {
            let cache = Arc::clone(&cache);
            async move {
                cache
                    .get(key, || async {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok(1)
                    })
                    .await
            }
        });
        join_all(gets).await;

        assert!(started.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_init_expire_cancels_enqueued_entry() {
        let cache = cache_with(CacheConfig {
            concurrency: 1,
            init_expire: Some(Duration::from_millis(50)),
            ..Default::default()
        });

        let busy = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                cache
                    .get("busy", || async {
                        tokio::time::sleep(Duration::from_millis(200)).await;
                        Ok(1)
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(1)).await;

        let queued = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.get("queued", || async { Ok(2) }).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(cache.status("queued").await, (TaskStatus::Enqueued, true));

        assert_eq!(queued.await.unwrap(), Err(TestError::Evicted));
        assert_eq!(busy.await.unwrap(), Ok(1));
        assert_eq!(cache.status("queued").await, (TaskStatus::None, false));
    }
}
