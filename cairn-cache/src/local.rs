//! Bounded, expiring in-memory cache with optional conflict-aware writes.
//!
//! [`LocalCache`] wraps a `moka` cache, which owns the eviction policy
//! (size or weight bound, time-to-idle, time-to-live). On top of it this
//! module adds:
//!
//! - an optional [`ConflictResolver`] applied atomically per key on `put`
//! - hit/miss/load/eviction counters, gated by `record_stats`
//! - a [`RemovalCause`]-tagged listener
//!
//! # Removal listener
//!
//! The listener runs on whichever thread performs the engine's maintenance
//! or the removal itself. It is not guaranteed to run on the thread that
//! caused the removal, and must not block.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use cairn_core::{
    CacheConfig, CacheError, CacheResult, CacheStats, ConfigError, ConflictError,
    ConflictResolver, Resolution, StateError, StatsSource,
};
use moka::notification::RemovalCause as EngineRemovalCause;
use moka::ops::compute::{CompResult, Op};
use moka::sync::Cache;

/// Computes the weight of an entry for weight-bounded caches.
pub type Weigher<K, V> = Arc<dyn Fn(&K, &V) -> u32 + Send + Sync>;

/// Observes entries leaving the cache.
pub type RemovalListener<K, V> = Arc<dyn Fn(&K, &V, RemovalCause) + Send + Sync>;

/// Why an entry left the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemovalCause {
    /// Removed by an invalidate call.
    Explicit,
    /// Overwritten by a put.
    Replaced,
    /// Expired after access or after write.
    Expired,
    /// Evicted by the size or weight bound.
    Size,
}

impl RemovalCause {
    /// True for removals the engine decided on (bounds and expiry).
    pub fn was_evicted(&self) -> bool {
        matches!(self, RemovalCause::Expired | RemovalCause::Size)
    }
}

impl From<EngineRemovalCause> for RemovalCause {
    fn from(cause: EngineRemovalCause) -> Self {
        match cause {
            EngineRemovalCause::Explicit => RemovalCause::Explicit,
            EngineRemovalCause::Replaced => RemovalCause::Replaced,
            EngineRemovalCause::Expired => RemovalCause::Expired,
            EngineRemovalCause::Size => RemovalCause::Size,
        }
    }
}

/// Atomic counters behind [`CacheStats`].
#[derive(Debug, Default)]
struct StatsCounter {
    hits: AtomicU64,
    misses: AtomicU64,
    load_successes: AtomicU64,
    load_failures: AtomicU64,
    evictions: AtomicU64,
}

impl StatsCounter {
    fn snapshot(&self, size: u64) -> CacheStats {
        CacheStats {
            hit_count: self.hits.load(Ordering::Relaxed),
            miss_count: self.misses.load(Ordering::Relaxed),
            load_success_count: self.load_successes.load(Ordering::Relaxed),
            load_failure_count: self.load_failures.load(Ordering::Relaxed),
            eviction_count: self.evictions.load(Ordering::Relaxed),
            size,
        }
    }
}

/// Thread-safe bounded cache.
///
/// # Example
///
/// ```
/// use cairn_cache::LocalCache;
/// use cairn_core::{CacheConfig, ConflictResolver};
///
/// let config = CacheConfig::builder("greetings")
///     .maximum_size(100)
///     .record_stats(true)
///     .build()
///     .unwrap();
///
/// let cache: LocalCache<String, String> = LocalCache::builder(config)
///     .resolver(ConflictResolver::FirstWriteWins)
///     .build()
///     .unwrap();
///
/// cache.put("en".to_string(), "hello".to_string()).unwrap();
/// let kept = cache.put("en".to_string(), "hi".to_string()).unwrap();
/// assert_eq!(kept, "hello");
/// assert_eq!(cache.get(&"en".to_string()).as_deref(), Some("hello"));
/// ```
pub struct LocalCache<K, V> {
    config: Arc<CacheConfig>,
    engine: Cache<K, V>,
    resolver: Option<ConflictResolver<V>>,
    counter: Arc<StatsCounter>,
}

impl<K, V> LocalCache<K, V>
where
    K: Hash + Eq + Clone + fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn builder(config: CacheConfig) -> LocalCacheBuilder<K, V> {
        LocalCacheBuilder::new(config)
    }

    /// A cache with no resolver, weigher or listener.
    pub fn new(config: CacheConfig) -> CacheResult<Self> {
        Self::builder(config).build()
    }

    pub fn resolver(&self) -> Option<&ConflictResolver<V>> {
        self.resolver.as_ref()
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let value = self.engine.get(key);
        self.record_lookup(value.is_some());
        value
    }

    /// Look up several keys. Absent keys are left out of the result.
    pub fn get_all(&self, keys: impl IntoIterator<Item = K>) -> HashMap<K, V> {
        keys.into_iter()
            .filter_map(|key| self.get(&key).map(|value| (key, value)))
            .collect()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.engine.contains_key(key)
    }

    /// Store `value` under `key` and return what ended up stored.
    ///
    /// Without a resolver this overwrites unconditionally. With one, the
    /// stored value is `resolver.resolve(existing, value)`, computed
    /// atomically with respect to other writes on the same key. A write the
    /// resolver turns away leaves the stored entry untouched, expiry included.
    pub fn put(&self, key: K, value: V) -> CacheResult<V> {
        if self.resolver.is_none() {
            self.engine.insert(key, value.clone());
            return Ok(value);
        }
        self.put_with(key, value, |_, _| {})
    }

    /// Store every entry with [`put`](Self::put) semantics.
    ///
    /// Stops at the first conflict; entries applied before it stay applied.
    pub fn put_all(&self, entries: impl IntoIterator<Item = (K, V)>) -> CacheResult<()> {
        for (key, value) in entries {
            self.put(key, value)?;
        }
        Ok(())
    }

    /// Resolve and store inside the engine's per-key compute, then hand the
    /// stored value to `on_stored` while still inside it.
    pub(crate) fn put_with<F>(&self, key: K, value: V, on_stored: F) -> CacheResult<V>
    where
        F: FnOnce(&K, &V),
    {
        let resolver = self.resolver.as_ref();
        let hook_key = key.clone();

        let outcome = self
            .engine
            .entry(key)
            .and_try_compute_with(|existing| {
                let current = existing.as_ref().map(|entry| entry.value());
                let resolution = match resolver {
                    Some(resolver) => resolver.decide(current, value)?,
                    None => Resolution::Store(value),
                };
                // A kept value must not count as replaced or restart its TTL.
                let op = match (resolution, current) {
                    (Resolution::KeepExisting, Some(current)) => {
                        on_stored(&hook_key, current);
                        Op::Nop
                    }
                    (Resolution::KeepExisting, None) => Op::Nop,
                    (Resolution::Store(stored), _) => {
                        on_stored(&hook_key, &stored);
                        Op::Put(stored)
                    }
                };
                Ok::<_, ConflictError>(op)
            })
            .map_err(|source| {
                tracing::debug!(
                    cache = %self.name(),
                    key = ?hook_key,
                    resolver = resolver.map(|r| r.kind()).unwrap_or("none"),
                    "Write rejected by conflict resolver"
                );
                CacheError::Conflict {
                    cache: self.name().to_string(),
                    key: format!("{:?}", hook_key),
                    source,
                }
            })?;

        match outcome {
            CompResult::Inserted(entry)
            | CompResult::ReplacedWith(entry)
            | CompResult::Unchanged(entry) => Ok(entry.into_value()),
            CompResult::Removed(_) | CompResult::StillNone(_) => Err(StateError::Engine {
                cache: self.name().to_string(),
                reason: "put produced no stored value".to_string(),
            }
            .into()),
        }
    }

    /// Return the cached value, or load and cache it.
    ///
    /// Concurrent callers for the same absent key share a single `load` call.
    pub fn compute_if_absent<F>(&self, key: K, load: F) -> V
    where
        F: FnOnce() -> V,
    {
        let mut loaded = false;
        let value = self.engine.get_with(key, || {
            loaded = true;
            load()
        });

        if loaded {
            self.record_lookup(false);
            self.record(|c| &c.load_successes);
        } else {
            self.record_lookup(true);
        }
        value
    }

    /// Fallible [`compute_if_absent`](Self::compute_if_absent).
    ///
    /// A failed load caches nothing. Callers waiting on the same key receive
    /// the same shared error.
    pub fn try_compute_if_absent<F, E>(&self, key: K, load: F) -> Result<V, Arc<E>>
    where
        F: FnOnce() -> Result<V, E>,
        E: Send + Sync + 'static,
    {
        let mut loaded = false;
        let result = self.engine.try_get_with(key, || {
            loaded = true;
            load()
        });

        match (&result, loaded) {
            (Ok(_), false) => self.record_lookup(true),
            (Ok(_), true) => {
                self.record_lookup(false);
                self.record(|c| &c.load_successes);
            }
            (Err(_), true) => {
                self.record_lookup(false);
                self.record(|c| &c.load_failures);
            }
            (Err(_), false) => self.record_lookup(false),
        }
        result
    }

    pub fn invalidate(&self, key: &K) {
        self.engine.invalidate(key);
    }

    pub fn invalidate_keys(&self, keys: impl IntoIterator<Item = K>) {
        for key in keys {
            self.engine.invalidate(&key);
        }
    }

    pub fn invalidate_all(&self) {
        self.engine.invalidate_all();
    }

    /// Run pending maintenance now: expired entries are dropped and
    /// bounds are enforced without waiting for the next access.
    pub fn clean_up(&self) {
        self.engine.run_pending_tasks();
    }

    /// Approximate entry count. Call [`clean_up`](Self::clean_up) first for
    /// an exact figure.
    pub fn entry_count(&self) -> u64 {
        self.engine.entry_count()
    }

    /// Total weight of all entries; equals the entry count when unweighted.
    pub fn weighted_size(&self) -> u64 {
        self.engine.weighted_size()
    }

    /// Current statistics. Only `size` is populated when `record_stats` is off.
    pub fn stats(&self) -> CacheStats {
        let size = self.engine.entry_count();
        if self.config.record_stats() {
            self.counter.snapshot(size)
        } else {
            CacheStats::size_only(size)
        }
    }

    fn record_lookup(&self, hit: bool) {
        if hit {
            self.record(|c| &c.hits);
        } else {
            self.record(|c| &c.misses);
        }
    }

    fn record(&self, counter: impl FnOnce(&StatsCounter) -> &AtomicU64) {
        if self.config.record_stats() {
            counter(&self.counter).fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl<K, V> LocalCache<K, V> {
    pub fn name(&self) -> &str {
        self.config.name()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }
}

impl<K, V> StatsSource for LocalCache<K, V>
where
    K: Hash + Eq + Clone + fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        self.config.name()
    }

    fn stats(&self) -> CacheStats {
        LocalCache::stats(self)
    }
}

impl<K, V> fmt::Debug for LocalCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalCache")
            .field("name", &self.config.name())
            .field("resolver", &self.resolver.as_ref().map(|r| r.kind()))
            .finish_non_exhaustive()
    }
}

// ============================================================================
// BUILDER
// ============================================================================

/// Builder for [`LocalCache`].
pub struct LocalCacheBuilder<K, V> {
    config: CacheConfig,
    resolver: Option<ConflictResolver<V>>,
    weigher: Option<Weigher<K, V>>,
    listener: Option<RemovalListener<K, V>>,
}

impl<K, V> LocalCacheBuilder<K, V>
where
    K: Hash + Eq + Clone + fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn new(config: CacheConfig) -> Self {
        Self {
            config,
            resolver: None,
            weigher: None,
            listener: None,
        }
    }

    pub fn resolver(mut self, resolver: ConflictResolver<V>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Required when the config sets `maximum_weight`.
    pub fn weigher<F>(mut self, weigher: F) -> Self
    where
        F: Fn(&K, &V) -> u32 + Send + Sync + 'static,
    {
        self.weigher = Some(Arc::new(weigher));
        self
    }

    /// Observe removals. See the module docs for threading.
    pub fn removal_listener<F>(mut self, listener: F) -> Self
    where
        F: Fn(&K, &V, RemovalCause) + Send + Sync + 'static,
    {
        self.listener = Some(Arc::new(listener));
        self
    }

    pub fn build(self) -> CacheResult<LocalCache<K, V>> {
        let config = Arc::new(self.config);

        for (option, enabled) in [
            ("weak_keys", config.weak_keys()),
            ("weak_values", config.weak_values()),
            ("soft_values", config.soft_values()),
        ] {
            if enabled {
                return Err(ConfigError::Unsupported {
                    option: option.to_string(),
                }
                .into());
            }
        }

        let counter = Arc::new(StatsCounter::default());
        let mut builder = Cache::<K, V>::builder().name(config.name());

        if let Some(size) = config.maximum_size() {
            builder = builder.max_capacity(size);
        }
        match (config.maximum_weight(), self.weigher) {
            (Some(weight), Some(weigher)) => {
                builder = builder
                    .max_capacity(weight)
                    .weigher(move |key: &K, value: &V| weigher(key, value));
            }
            (Some(_), None) => {
                return Err(ConfigError::MissingField {
                    field: "weigher".to_string(),
                }
                .into());
            }
            (None, Some(_)) => {
                return Err(ConfigError::MissingField {
                    field: "maximum_weight".to_string(),
                }
                .into());
            }
            (None, None) => {}
        }
        if let Some(ttl) = config.expire_after_access() {
            builder = builder.time_to_idle(ttl);
        }
        if let Some(ttl) = config.expire_after_write() {
            builder = builder.time_to_live(ttl);
        }

        let listener_counter = Arc::clone(&counter);
        let record_stats = config.record_stats();
        let listener = self.listener;
        builder = builder.eviction_listener(move |key: Arc<K>, value: V, cause| {
            let cause = RemovalCause::from(cause);
            if record_stats && cause.was_evicted() {
                listener_counter.evictions.fetch_add(1, Ordering::Relaxed);
            }
            if let Some(listener) = &listener {
                listener(&key, &value, cause);
            }
        });

        Ok(LocalCache {
            config,
            engine: builder.build(),
            resolver: self.resolver,
            counter,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Barrier, Mutex};
    use std::thread;
    use std::time::Duration;

    fn config(name: &str) -> CacheConfig {
        CacheConfig::builder(name).record_stats(true).build().unwrap()
    }

    fn cache(name: &str) -> LocalCache<String, u64> {
        LocalCache::new(config(name)).unwrap()
    }

    fn key(s: &str) -> String {
        s.to_string()
    }

    #[test]
    fn test_put_then_get() {
        let cache = cache("plain");
        assert_eq!(cache.put(key("a"), 1).unwrap(), 1);
        assert_eq!(cache.get(&key("a")), Some(1));
        cache.put(key("a"), 2).unwrap();
        assert_eq!(cache.get(&key("a")), Some(2));
    }

    #[test]
    fn test_get_all_returns_present_only() {
        let cache = cache("bulk");
        cache
            .put_all(vec![(key("a"), 1), (key("b"), 2)])
            .unwrap();

        let found = cache.get_all(vec![key("a"), key("b"), key("missing")]);
        assert_eq!(found.len(), 2);
        assert_eq!(found.get("a"), Some(&1));
        assert!(!found.contains_key("missing"));
    }

    #[test]
    fn test_invalidate() {
        let cache = cache("invalidate");
        cache.put_all(vec![(key("a"), 1), (key("b"), 2), (key("c"), 3)]).unwrap();

        cache.invalidate(&key("a"));
        assert_eq!(cache.get(&key("a")), None);

        cache.invalidate_keys(vec![key("b")]);
        assert!(!cache.contains_key(&key("b")));

        cache.invalidate_all();
        cache.clean_up();
        assert_eq!(cache.get(&key("c")), None);
        assert_eq!(cache.entry_count(), 0);
    }

    #[test]
    fn test_throw_on_conflict_rejects_second_write() {
        let cache: LocalCache<String, u64> = LocalCache::builder(config("strict"))
            .resolver(ConflictResolver::ThrowOnConflict)
            .build()
            .unwrap();

        cache.put(key("a"), 1).unwrap();
        let err = cache.put(key("a"), 2).unwrap_err();

        assert!(matches!(err, CacheError::Conflict { ref cache, .. } if cache == "strict"));
        assert_eq!(cache.get(&key("a")), Some(1));
    }

    #[test]
    fn test_put_all_stops_at_first_conflict() {
        let cache: LocalCache<String, u64> = LocalCache::builder(config("strict-bulk"))
            .resolver(ConflictResolver::ThrowOnConflict)
            .build()
            .unwrap();
        cache.put(key("b"), 0).unwrap();

        let result = cache.put_all(vec![(key("a"), 1), (key("b"), 2), (key("c"), 3)]);

        assert!(result.is_err());
        assert_eq!(cache.get(&key("a")), Some(1));
        assert_eq!(cache.get(&key("b")), Some(0));
        assert_eq!(cache.get(&key("c")), None);
    }

    #[test]
    fn test_merge_resolver_through_cache() {
        let cache: LocalCache<String, u64> = LocalCache::builder(config("counter"))
            .resolver(ConflictResolver::merge(|old: &u64, new: u64| old + new))
            .build()
            .unwrap();

        for _ in 0..5 {
            cache.put(key("hits"), 2).unwrap();
        }
        assert_eq!(cache.get(&key("hits")), Some(10));
    }

    #[test]
    fn test_concurrent_merge_is_atomic() {
        let cache: Arc<LocalCache<String, u64>> = Arc::new(
            LocalCache::builder(config("atomic"))
                .resolver(ConflictResolver::merge(|old: &u64, new: u64| old + new))
                .build()
                .unwrap(),
        );

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for _ in 0..250 {
                        cache.put(key("n"), 1).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(cache.get(&key("n")), Some(2000));
    }

    #[test]
    fn test_last_write_wins_concurrent_yields_one_of_the_writes() {
        let cache: Arc<LocalCache<String, u64>> = Arc::new(
            LocalCache::builder(config("lww"))
                .resolver(ConflictResolver::LastWriteWins)
                .build()
                .unwrap(),
        );
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = [1u64, 2u64]
            .into_iter()
            .map(|v| {
                let cache = Arc::clone(&cache);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    cache.put(key("k"), v).unwrap()
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let stored = cache.get(&key("k")).unwrap();
        assert!(stored == 1 || stored == 2);
    }

    #[test]
    fn test_first_write_wins_concurrent_has_single_winner() {
        let cache: Arc<LocalCache<String, u64>> = Arc::new(
            LocalCache::builder(config("fww"))
                .resolver(ConflictResolver::FirstWriteWins)
                .build()
                .unwrap(),
        );
        let barrier = Arc::new(Barrier::new(4));

        let handles: Vec<_> = (1u64..=4)
            .map(|v| {
                let cache = Arc::clone(&cache);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    (v, cache.put(key("k"), v).unwrap())
                })
            })
            .collect();
        let results: Vec<(u64, u64)> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let stored = cache.get(&key("k")).unwrap();
        let winners: Vec<_> = results.iter().filter(|(written, _)| *written == stored).collect();
        assert_eq!(winners.len(), 1);
        assert!(results.iter().all(|(_, returned)| *returned == stored));
    }

    #[test]
    fn test_compute_if_absent_loads_once_under_race() {
        let cache = Arc::new(cache("loader"));
        let loads = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let loads = Arc::clone(&loads);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    cache.compute_if_absent(key("expensive"), || {
                        loads.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(20));
                        42
                    })
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), 42);
        }

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        let stats = cache.stats();
        assert_eq!(stats.load_success_count, 1);
        assert_eq!(stats.request_count(), 8);
    }

    #[test]
    fn test_try_compute_if_absent_failure_caches_nothing() {
        let cache = cache("fallible");

        let err = cache
            .try_compute_if_absent(key("k"), || Err::<u64, _>("backend down".to_string()))
            .unwrap_err();
        assert_eq!(err.as_str(), "backend down");
        assert!(!cache.contains_key(&key("k")));

        let value = cache
            .try_compute_if_absent(key("k"), || Ok::<_, String>(9))
            .unwrap();
        assert_eq!(value, 9);

        let stats = cache.stats();
        assert_eq!(stats.load_failure_count, 1);
        assert_eq!(stats.load_success_count, 1);
        assert_eq!(stats.miss_count, 2);
    }

    #[test]
    fn test_stats_recorded() {
        let cache = cache("stats");
        cache.put(key("a"), 1).unwrap();
        cache.get(&key("a"));
        cache.get(&key("a"));
        cache.get(&key("b"));
        cache.clean_up();

        let stats = cache.stats();
        assert_eq!(stats.hit_count, 2);
        assert_eq!(stats.miss_count, 1);
        assert_eq!(stats.size, 1);
    }

    #[test]
    fn test_stats_disabled_reports_size_only() {
        let cache: LocalCache<String, u64> =
            LocalCache::new(CacheConfig::builder("quiet").build().unwrap()).unwrap();
        cache.put(key("a"), 1).unwrap();
        cache.get(&key("a"));
        cache.get(&key("zzz"));
        cache.clean_up();

        let stats = cache.stats();
        assert_eq!(stats, CacheStats::size_only(1));
    }

    #[test]
    fn test_size_bound_evicts_and_notifies() {
        let causes = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&causes);
        let cache: LocalCache<String, u64> = LocalCache::builder(
            CacheConfig::builder("tiny")
                .maximum_size(2)
                .record_stats(true)
                .build()
                .unwrap(),
        )
        .removal_listener(move |_k: &String, _v: &u64, cause| seen.lock().unwrap().push(cause))
        .build()
        .unwrap();

        for i in 0..20 {
            cache.put(format!("k{}", i), i).unwrap();
            cache.clean_up();
        }

        assert!(cache.entry_count() <= 2);
        assert!(cache.stats().eviction_count > 0);
        assert!(causes.lock().unwrap().contains(&RemovalCause::Size));
    }

    #[test]
    fn test_explicit_removal_is_not_an_eviction() {
        let causes = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&causes);
        let cache: LocalCache<String, u64> = LocalCache::builder(config("explicit"))
            .removal_listener(move |_k: &String, _v: &u64, cause| seen.lock().unwrap().push(cause))
            .build()
            .unwrap();

        cache.put(key("a"), 1).unwrap();
        cache.invalidate(&key("a"));
        cache.clean_up();

        assert_eq!(*causes.lock().unwrap(), vec![RemovalCause::Explicit]);
        assert_eq!(cache.stats().eviction_count, 0);
    }

    #[test]
    fn test_expire_after_write() {
        let cache: LocalCache<String, u64> = LocalCache::new(
            CacheConfig::builder("ttl")
                .expire_after_write(Duration::from_millis(30))
                .build()
                .unwrap(),
        )
        .unwrap();

        cache.put(key("a"), 1).unwrap();
        assert_eq!(cache.get(&key("a")), Some(1));
        thread::sleep(Duration::from_millis(80));
        assert_eq!(cache.get(&key("a")), None);
    }

    #[test]
    fn test_rejected_write_does_not_notify_replacement() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&events);
        let cache: LocalCache<String, u64> = LocalCache::builder(config("kept"))
            .resolver(ConflictResolver::FirstWriteWins)
            .removal_listener(move |_k: &String, v: &u64, cause| {
                seen.lock().unwrap().push((*v, cause))
            })
            .build()
            .unwrap();

        cache.put(key("a"), 1).unwrap();
        assert_eq!(cache.put(key("a"), 2).unwrap(), 1);
        cache.clean_up();

        assert!(events.lock().unwrap().is_empty());
        assert_eq!(cache.get(&key("a")), Some(1));
    }

    #[test]
    fn test_rejected_write_keeps_original_expiry() {
        let cache: LocalCache<String, u64> = LocalCache::builder(
            CacheConfig::builder("kept-ttl")
                .expire_after_write(Duration::from_millis(150))
                .build()
                .unwrap(),
        )
        .resolver(ConflictResolver::by_version(|v: &u64| *v))
        .build()
        .unwrap();

        cache.put(key("a"), 5).unwrap();
        thread::sleep(Duration::from_millis(100));
        assert_eq!(cache.put(key("a"), 1).unwrap(), 5);
        thread::sleep(Duration::from_millis(100));

        assert_eq!(cache.get(&key("a")), None);
    }

    #[test]
    fn test_weight_bound_requires_weigher() {
        let config = CacheConfig::builder("weighted")
            .maximum_weight(1024)
            .build()
            .unwrap();
        let err = LocalCache::<String, u64>::new(config.clone()).unwrap_err();
        assert!(matches!(
            err,
            CacheError::Config(ConfigError::MissingField { ref field }) if field == "weigher"
        ));

        let cache: LocalCache<String, u64> = LocalCache::builder(config)
            .weigher(|_k: &String, _v: &u64| 16)
            .build()
            .unwrap();
        cache.put(key("a"), 1).unwrap();
        cache.clean_up();
        assert_eq!(cache.weighted_size(), 16);
    }

    #[test]
    fn test_reference_flags_are_unsupported() {
        let config = CacheConfig::builder("weak").weak_keys(true).build().unwrap();
        let err = LocalCache::<String, u64>::new(config).unwrap_err();
        assert!(matches!(err, CacheError::Config(ConfigError::Unsupported { .. })));
    }

    #[test]
    fn test_put_with_hook_sees_resolved_value() {
        let cache: LocalCache<String, u64> = LocalCache::builder(config("hook"))
            .resolver(ConflictResolver::FirstWriteWins)
            .build()
            .unwrap();
        cache.put(key("a"), 1).unwrap();

        let mut seen = None;
        let stored = cache
            .put_with(key("a"), 5, |k, v| seen = Some((k.clone(), *v)))
            .unwrap();

        assert_eq!(stored, 1);
        assert_eq!(seen, Some((key("a"), 1)));
    }
}
