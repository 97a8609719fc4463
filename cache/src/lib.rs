//! # Chama Cache
//!
//! A generic key-value cache with TTL expiry and capacity-bounded eviction,
//! used to memoize expensive or rate-limited reads (nearby providers, route
//! directions, category lists) and optionally persist them across restarts.
//!
//! ## Semantics
//!
//! - Entries expire strictly after their TTL (`now > expires_at`); expiry is
//!   checked lazily on every `get`, so the background sweeper is advisory
//!   housekeeping only.
//! - When the in-memory store exceeds its capacity after an insert, exactly
//!   one entry is evicted: the one with the oldest *insertion* timestamp.
//!   Reads do not refresh eviction priority.
//! - The cache is an explicitly constructed, injectable object. The sweeper
//!   has an explicit start/stop lifecycle so tests control it (or call
//!   [`EphemeralCache::sweep_now`] directly) instead of depending on a real
//!   wall-clock interval.
//!
//! ## Example
//!
//! ```ignore
//! use chama_cache::{CacheConfig, CacheOptions, EphemeralCache};
//! use chama_core::environment::SystemClock;
//! use std::sync::Arc;
//!
//! let cache: EphemeralCache<Vec<String>> =
//!     EphemeralCache::new(CacheConfig::default(), Arc::new(SystemClock));
//!
//! cache.set("categories", vec!["limpeza".into()], CacheOptions::default()).await;
//! let hit = cache.get("categories").await;
//! ```

use chama_core::environment::Clock;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

pub mod storage;

pub use storage::{DurableStorage, StorageError};

/// Configuration for an [`EphemeralCache`].
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Prefix for durable keys; `clear` only touches keys under it
    pub namespace: String,
    /// TTL applied when a `set` does not specify one
    pub default_ttl: Duration,
    /// Maximum number of in-memory entries before eviction kicks in
    pub max_entries: usize,
    /// Interval between background sweep passes
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            namespace: "cache".to_string(),
            default_ttl: Duration::from_secs(5 * 60),
            max_entries: 50,
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl CacheConfig {
    /// Set the durable-key namespace
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the default TTL
    #[must_use]
    pub const fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Set the in-memory capacity
    #[must_use]
    pub const fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    /// Set the sweep interval
    #[must_use]
    pub const fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }
}

/// Per-call options for [`EphemeralCache::set`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheOptions {
    /// Override the configured default TTL
    pub ttl: Option<Duration>,
    /// Additionally write a durable copy
    pub persistent: bool,
}

impl CacheOptions {
    /// Options with a specific TTL
    #[must_use]
    pub const fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            persistent: false,
        }
    }

    /// Options requesting a durable copy
    #[must_use]
    pub const fn persistent() -> Self {
        Self {
            ttl: None,
            persistent: true,
        }
    }

    /// Mark these options as persistent
    #[must_use]
    pub const fn and_persistent(mut self) -> Self {
        self.persistent = true;
        self
    }
}

/// An in-memory entry.
#[derive(Debug, Clone)]
struct Entry<V> {
    data: V,
    /// Insertion time - eviction priority, never refreshed by reads
    timestamp: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

/// Shape of a durable record (JSON).
#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct StoredRecord<V> {
    data: V,
    timestamp: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

/// Handle for a running background sweeper.
///
/// Aborts the sweep task on [`SweeperHandle::stop`] or drop.
#[derive(Debug)]
pub struct SweeperHandle {
    task: tokio::task::JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop the background sweeper
    pub fn stop(self) {
        self.task.abort();
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

type EntryMap<V> = HashMap<String, Entry<V>>;

/// A TTL + capacity-bounded cache with optional durable backing.
///
/// Cloning is cheap and shares the underlying store; the app treats one
/// instance per value type as a process-wide service. Concurrent `set` calls
/// on the same key race with last-write-wins semantics - entries are
/// independently replaceable snapshots, never merged.
pub struct EphemeralCache<V> {
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    storage: Option<Arc<dyn DurableStorage>>,
    entries: Arc<Mutex<EntryMap<V>>>,
}

impl<V> Clone for EphemeralCache<V> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            clock: Arc::clone(&self.clock),
            storage: self.storage.as_ref().map(Arc::clone),
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<V> std::fmt::Debug for EphemeralCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EphemeralCache")
            .field("namespace", &self.config.namespace)
            .field("entries", &self.len())
            .finish_non_exhaustive()
    }
}

impl<V> EphemeralCache<V> {
    /// Create a memory-only cache.
    #[must_use]
    pub fn new(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            storage: None,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Create a cache with a durable backing store for `persistent` entries.
    #[must_use]
    pub fn with_storage(
        config: CacheConfig,
        clock: Arc<dyn Clock>,
        storage: Arc<dyn DurableStorage>,
    ) -> Self {
        Self {
            config,
            clock,
            storage: Some(storage),
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn lock_entries(&self) -> std::sync::MutexGuard<'_, EntryMap<V>> {
        // Mutex poison is unrecoverable noise here; the map stays usable.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn durable_key(&self, key: &str) -> String {
        format!("{}:{key}", self.config.namespace)
    }

    fn expiry_for(&self, now: DateTime<Utc>, options: CacheOptions) -> DateTime<Utc> {
        let ttl = options.ttl.unwrap_or(self.config.default_ttl);
        now + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::seconds(0))
    }

    /// Number of in-memory entries (including not-yet-swept expired ones).
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    /// Whether the in-memory store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock_entries().is_empty()
    }

    /// Remove expired entries from memory now; returns how many were dropped.
    ///
    /// `get` already checks expiry lazily, so this is housekeeping rather
    /// than a correctness requirement.
    pub fn sweep_now(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.lock_entries();
        let before = entries.len();
        entries.retain(|_, entry| now <= entry.expires_at);
        let dropped = before - entries.len();
        if dropped > 0 {
            metrics::counter!("cache.expired", "namespace" => self.config.namespace.clone())
                .increment(u64::try_from(dropped).unwrap_or(u64::MAX));
            tracing::debug!(dropped, "Cache sweep removed expired entries");
        }
        dropped
    }
}

impl<V> EphemeralCache<V>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Store `data` under `key`.
    ///
    /// If the in-memory store exceeds its capacity after insertion, the entry
    /// with the oldest insertion timestamp is evicted (exactly one). With
    /// `options.persistent` a durable copy is written as well; persist
    /// failures are logged, never surfaced.
    pub async fn set(&self, key: &str, data: V, options: CacheOptions) {
        let now = self.clock.now();
        let expires_at = self.expiry_for(now, options);

        {
            let mut entries = self.lock_entries();
            entries.insert(
                key.to_string(),
                Entry {
                    data: data.clone(),
                    timestamp: now,
                    expires_at,
                },
            );

            if entries.len() > self.config.max_entries {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.timestamp)
                    .map(|(k, _)| k.clone());
                if let Some(victim) = oldest {
                    entries.remove(&victim);
                    metrics::counter!("cache.evictions", "namespace" => self.config.namespace.clone())
                        .increment(1);
                    tracing::debug!(key = %victim, "Evicted oldest cache entry");
                }
            }
        }

        if options.persistent {
            self.persist(key, data, now, expires_at).await;
        }
    }

    async fn persist(&self, key: &str, data: V, timestamp: DateTime<Utc>, expires_at: DateTime<Utc>) {
        let Some(storage) = &self.storage else {
            return;
        };

        let record = StoredRecord {
            data,
            timestamp,
            expires_at,
        };
        let payload = match serde_json::to_string(&record) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(key, error = %err, "Failed to serialize cache entry for persistence");
                return;
            },
        };

        if let Err(err) = storage.set(&self.durable_key(key), payload).await {
            tracing::warn!(key, error = %err, "Failed to persist cache entry");
        }
    }

    /// Look up `key`.
    ///
    /// Checks memory first; on a memory miss (or expired entry) falls back to
    /// durable storage, promoting a live durable copy back into memory and
    /// deleting an expired one. Absence is a normal outcome: the return is
    /// `None`, never an error.
    pub async fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now();

        {
            let mut entries = self.lock_entries();
            match entries.get(key) {
                Some(entry) if now > entry.expires_at => {
                    entries.remove(key);
                    metrics::counter!("cache.expired", "namespace" => self.config.namespace.clone())
                        .increment(1);
                },
                Some(entry) => {
                    metrics::counter!("cache.hits", "namespace" => self.config.namespace.clone())
                        .increment(1);
                    return Some(entry.data.clone());
                },
                None => {},
            }
        }

        let promoted = self.promote_from_storage(key, now).await;
        let label = if promoted.is_some() { "cache.hits" } else { "cache.misses" };
        metrics::counter!(label, "namespace" => self.config.namespace.clone()).increment(1);
        promoted
    }

    /// Try to load `key` from durable storage, promoting it into memory.
    async fn promote_from_storage(&self, key: &str, now: DateTime<Utc>) -> Option<V> {
        let storage = self.storage.as_ref()?;
        let durable_key = self.durable_key(key);

        let payload = match storage.get(&durable_key).await {
            Ok(payload) => payload?,
            Err(err) => {
                tracing::warn!(key, error = %err, "Durable cache read failed");
                return None;
            },
        };

        let record: StoredRecord<V> = match serde_json::from_str(&payload) {
            Ok(record) => record,
            Err(err) => {
                tracing::warn!(key, error = %err, "Corrupt durable cache entry, dropping");
                if let Err(err) = storage.remove(&durable_key).await {
                    tracing::warn!(key, error = %err, "Failed to drop corrupt durable entry");
                }
                return None;
            },
        };

        if now > record.expires_at {
            if let Err(err) = storage.remove(&durable_key).await {
                tracing::warn!(key, error = %err, "Failed to remove expired durable entry");
            }
            return None;
        }

        let mut entries = self.lock_entries();
        entries.insert(
            key.to_string(),
            Entry {
                data: record.data.clone(),
                timestamp: record.timestamp,
                expires_at: record.expires_at,
            },
        );
        Some(record.data)
    }

    /// Return the cached value for `key`, or fetch, store and return it.
    ///
    /// # Errors
    ///
    /// Fetcher failures propagate to the caller unchanged - no retry, and
    /// nothing is stored.
    pub async fn get_or_fetch<F, Fut, E>(
        &self,
        key: &str,
        options: CacheOptions,
        fetcher: F,
    ) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(hit) = self.get(key).await {
            return Ok(hit);
        }

        let fetched = fetcher().await?;
        self.set(key, fetched.clone(), options).await;
        Ok(fetched)
    }

    /// Remove `key` from memory and durable storage. Idempotent.
    pub async fn invalidate(&self, key: &str) {
        self.lock_entries().remove(key);

        if let Some(storage) = &self.storage {
            if let Err(err) = storage.remove(&self.durable_key(key)).await {
                tracing::warn!(key, error = %err, "Failed to invalidate durable entry");
            }
        }
    }

    /// Remove every memory entry and every durable entry under this cache's
    /// namespace.
    pub async fn clear(&self) {
        self.lock_entries().clear();

        let Some(storage) = &self.storage else {
            return;
        };

        let prefix = format!("{}:", self.config.namespace);
        match storage.keys().await {
            Ok(keys) => {
                let ours: Vec<String> =
                    keys.into_iter().filter(|k| k.starts_with(&prefix)).collect();
                if !ours.is_empty() {
                    if let Err(err) = storage.multi_remove(&ours).await {
                        tracing::warn!(error = %err, "Failed to clear durable cache entries");
                    }
                }
            },
            Err(err) => {
                tracing::warn!(error = %err, "Failed to enumerate durable cache keys");
            },
        }
    }

    /// Fan out `get` over several keys concurrently.
    ///
    /// Each key succeeds or misses independently; there is no atomicity
    /// across the batch.
    pub async fn batch_get(&self, keys: &[String]) -> Vec<(String, Option<V>)> {
        futures::future::join_all(keys.iter().map(|key| async move {
            (key.clone(), self.get(key).await)
        }))
        .await
    }

    /// Fan out `set` over several items concurrently with shared options.
    pub async fn batch_set(&self, items: Vec<(String, V)>, options: CacheOptions) {
        futures::future::join_all(
            items
                .into_iter()
                .map(|(key, value)| async move { self.set(&key, value, options).await }),
        )
        .await;
    }

    /// Start the periodic background sweeper.
    ///
    /// Returns a handle that stops the sweeper when dropped or explicitly
    /// stopped. Tests that want determinism skip this and call
    /// [`EphemeralCache::sweep_now`] themselves.
    #[must_use]
    pub fn start_sweeper(&self) -> SweeperHandle {
        let cache = self.clone();
        let interval = self.config.sweep_interval;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately; skip it so the cadence is
            // interval-aligned from start.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                cache.sweep_now();
            }
        });

        SweeperHandle { task }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)] // Test code
mod tests {
    use super::*;
    use chama_testing::SteppingClock;

    fn small_cache(clock: &SteppingClock, max_entries: usize) -> EphemeralCache<String> {
        EphemeralCache::new(
            CacheConfig::default()
                .with_namespace("test")
                .with_max_entries(max_entries)
                .with_default_ttl(Duration::from_secs(60)),
            Arc::new(clock.clone()),
        )
    }

    #[tokio::test]
    async fn set_then_get_returns_the_value() {
        let clock = SteppingClock::default();
        let cache = small_cache(&clock, 50);

        cache.set("k", "v".to_string(), CacheOptions::default()).await;
        assert_eq!(cache.get("k").await, Some("v".to_string()));
    }

    #[tokio::test]
    async fn zero_ttl_expires_after_any_delay() {
        let clock = SteppingClock::default();
        let cache = small_cache(&clock, 50);

        cache
            .set("k", "v".to_string(), CacheOptions::with_ttl(Duration::ZERO))
            .await;
        clock.advance(Duration::from_millis(1));
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn expiry_comparison_is_strict() {
        let clock = SteppingClock::default();
        let cache = small_cache(&clock, 50);

        cache
            .set(
                "k",
                "v".to_string(),
                CacheOptions::with_ttl(Duration::from_secs(10)),
            )
            .await;

        // Exactly at the expiry instant the entry is still live
        clock.advance(Duration::from_secs(10));
        assert_eq!(cache.get("k").await, Some("v".to_string()));

        clock.advance(Duration::from_millis(1));
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn capacity_overflow_evicts_exactly_the_oldest() {
        let clock = SteppingClock::default();
        let cache = small_cache(&clock, 3);

        for (i, key) in ["a", "b", "c", "d"].iter().enumerate() {
            // Distinct insertion timestamps so the eviction order is defined
            clock.advance(Duration::from_millis(10));
            cache
                .set(key, format!("v{i}"), CacheOptions::default())
                .await;
        }

        assert_eq!(cache.len(), 3);
        assert_eq!(cache.get("a").await, None, "oldest entry must be evicted");
        assert!(cache.get("b").await.is_some());
        assert!(cache.get("d").await.is_some());
    }

    #[tokio::test]
    async fn reads_do_not_refresh_eviction_priority() {
        let clock = SteppingClock::default();
        let cache = small_cache(&clock, 2);

        clock.advance(Duration::from_millis(10));
        cache.set("old", "1".to_string(), CacheOptions::default()).await;
        clock.advance(Duration::from_millis(10));
        cache.set("new", "2".to_string(), CacheOptions::default()).await;

        // A hit on the oldest entry must not save it from eviction
        assert!(cache.get("old").await.is_some());

        clock.advance(Duration::from_millis(10));
        cache.set("newest", "3".to_string(), CacheOptions::default()).await;

        assert_eq!(cache.get("old").await, None);
        assert!(cache.get("new").await.is_some());
        assert!(cache.get("newest").await.is_some());
    }

    #[tokio::test]
    async fn invalidate_is_idempotent() {
        let clock = SteppingClock::default();
        let cache = small_cache(&clock, 50);

        cache.set("k", "v".to_string(), CacheOptions::default()).await;
        cache.invalidate("k").await;
        assert_eq!(cache.get("k").await, None);
        cache.invalidate("k").await;
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn get_or_fetch_caches_the_fetched_value() {
        let clock = SteppingClock::default();
        let cache = small_cache(&clock, 50);
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = Arc::clone(&calls);
            let value: Result<String, String> = cache
                .get_or_fetch("k", CacheOptions::default(), move || async move {
                    calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    Ok("fetched".to_string())
                })
                .await;
            assert_eq!(value.unwrap(), "fetched");
        }

        assert_eq!(
            calls.load(std::sync::atomic::Ordering::SeqCst),
            1,
            "fetcher runs once, later calls hit the cache"
        );
    }

    #[tokio::test]
    async fn get_or_fetch_propagates_fetcher_errors() {
        let clock = SteppingClock::default();
        let cache = small_cache(&clock, 50);

        let result: Result<String, String> = cache
            .get_or_fetch("k", CacheOptions::default(), || async {
                Err("backend down".to_string())
            })
            .await;

        assert_eq!(result, Err("backend down".to_string()));
        assert_eq!(cache.get("k").await, None, "failed fetches store nothing");
    }

    #[tokio::test]
    async fn sweep_now_drops_only_expired_entries() {
        let clock = SteppingClock::default();
        let cache = small_cache(&clock, 50);

        cache
            .set(
                "short",
                "1".to_string(),
                CacheOptions::with_ttl(Duration::from_secs(1)),
            )
            .await;
        cache
            .set(
                "long",
                "2".to_string(),
                CacheOptions::with_ttl(Duration::from_secs(600)),
            )
            .await;

        clock.advance(Duration::from_secs(2));
        assert_eq!(cache.sweep_now(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("long").await.is_some());
    }

    #[tokio::test]
    async fn batch_operations_cover_each_key_independently() {
        let clock = SteppingClock::default();
        let cache = small_cache(&clock, 50);

        cache
            .batch_set(
                vec![("a".to_string(), "1".to_string()), ("b".to_string(), "2".to_string())],
                CacheOptions::default(),
            )
            .await;

        let results = cache
            .batch_get(&["a".to_string(), "b".to_string(), "missing".to_string()])
            .await;

        let by_key: HashMap<_, _> = results.into_iter().collect();
        assert_eq!(by_key["a"], Some("1".to_string()));
        assert_eq!(by_key["b"], Some("2".to_string()));
        assert_eq!(by_key["missing"], None);
    }

    #[tokio::test]
    async fn clear_empties_the_memory_store() {
        let clock = SteppingClock::default();
        let cache = small_cache(&clock, 50);

        cache.set("a", "1".to_string(), CacheOptions::default()).await;
        cache.set("b", "2".to_string(), CacheOptions::default()).await;
        cache.clear().await;
        assert!(cache.is_empty());
    }
}
