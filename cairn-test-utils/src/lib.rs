//! Cairn Test Utilities
//!
//! Shared test infrastructure for the Cairn workspace:
//! - In-memory writers that record, fail, or block on demand
//! - Proptest generators for statistics and configuration
//! - Fixtures for common cache configurations
//! - Async helpers and tracing setup

pub use cairn_core::{
    CacheConfig, CacheStats, CacheWriter, RequeuePolicy, StatsCollectorConfig, StatsSnapshot,
    WriteBehindConfig, WriteError, WriteResult,
};

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

// ============================================================================
// WRITERS
// ============================================================================

/// Writer that keeps everything it is given in memory.
#[derive(Debug)]
pub struct RecordingWriter<K, V> {
    store: Mutex<HashMap<K, V>>,
    batches: Mutex<Vec<HashMap<K, V>>>,
    deleted: Mutex<Vec<K>>,
    write_calls: AtomicUsize,
    delete_calls: AtomicUsize,
}

impl<K, V> Default for RecordingWriter<K, V> {
    fn default() -> Self {
        Self {
            store: Mutex::new(HashMap::new()),
            batches: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
            write_calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
        }
    }
}

impl<K, V> RecordingWriter<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `write` or `write_all` calls.
    pub fn write_calls(&self) -> usize {
        self.write_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    /// Every batch passed to `write_all`, in call order.
    pub fn batches(&self) -> Vec<HashMap<K, V>> {
        self.batches.lock().unwrap().clone()
    }

    /// Sum of all batch sizes.
    pub fn total_written(&self) -> usize {
        self.batches.lock().unwrap().iter().map(HashMap::len).sum()
    }

    /// Latest persisted value for `key`.
    pub fn stored(&self, key: &K) -> Option<V> {
        self.store.lock().unwrap().get(key).cloned()
    }

    pub fn store_snapshot(&self) -> HashMap<K, V> {
        self.store.lock().unwrap().clone()
    }

    /// Every key passed to `delete` or `delete_all`, in call order.
    pub fn deleted(&self) -> Vec<K> {
        self.deleted.lock().unwrap().clone()
    }
}

impl<K, V> CacheWriter<K, V> for RecordingWriter<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn write(&self, key: &K, value: &V) -> WriteResult<()> {
        let batch = HashMap::from([(key.clone(), value.clone())]);
        self.write_all(&batch)
    }

    fn write_all(&self, entries: &HashMap<K, V>) -> WriteResult<()> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        self.store
            .lock()
            .unwrap()
            .extend(entries.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.batches.lock().unwrap().push(entries.clone());
        Ok(())
    }

    fn delete(&self, key: &K) -> WriteResult<()> {
        self.delete_all(std::slice::from_ref(key))
    }

    fn delete_all(&self, keys: &[K]) -> WriteResult<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        let mut store = self.store.lock().unwrap();
        for key in keys {
            store.remove(key);
        }
        self.deleted.lock().unwrap().extend(keys.iter().cloned());
        Ok(())
    }
}

/// Writer that fails on demand and otherwise records like [`RecordingWriter`].
#[derive(Debug)]
pub struct FailingWriter<K, V> {
    inner: RecordingWriter<K, V>,
    fail_remaining: AtomicUsize,
    failing: AtomicBool,
    attempts: AtomicUsize,
    error: WriteError,
}

impl<K, V> FailingWriter<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Succeeds until told otherwise; failures are transient.
    pub fn new() -> Self {
        Self::with_error(WriteError::transient("injected failure"))
    }

    pub fn with_error(error: WriteError) -> Self {
        Self {
            inner: RecordingWriter::new(),
            fail_remaining: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
            attempts: AtomicUsize::new(0),
            error,
        }
    }

    /// Fail the next `n` batch calls, then succeed.
    pub fn fail_next(&self, n: usize) {
        self.fail_remaining.store(n, Ordering::SeqCst);
    }

    /// Fail every call until switched off.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Calls made, failed or not.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// What actually got persisted.
    pub fn inner(&self) -> &RecordingWriter<K, V> {
        &self.inner
    }

    fn check(&self) -> WriteResult<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(self.error.clone());
        }
        let consumed = self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match consumed {
            Ok(_) => Err(self.error.clone()),
            Err(_) => Ok(()),
        }
    }
}

impl<K, V> Default for FailingWriter<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> CacheWriter<K, V> for FailingWriter<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn write(&self, key: &K, value: &V) -> WriteResult<()> {
        self.check()?;
        self.inner.write(key, value)
    }

    fn write_all(&self, entries: &HashMap<K, V>) -> WriteResult<()> {
        self.check()?;
        self.inner.write_all(entries)
    }

    fn delete(&self, key: &K) -> WriteResult<()> {
        self.check()?;
        self.inner.delete(key)
    }

    fn delete_all(&self, keys: &[K]) -> WriteResult<()> {
        self.check()?;
        self.inner.delete_all(keys)
    }
}

/// Writer whose batch calls park until [`release`](Self::release) is called.
///
/// Lets a test act while a flush is in flight. Call
/// [`fail_when_released`](Self::fail_when_released) to make the parked call
/// fail instead of succeed.
#[derive(Debug)]
pub struct BlockingWriter<K, V> {
    inner: RecordingWriter<K, V>,
    gate: Mutex<bool>,
    opened: Condvar,
    entered: AtomicUsize,
    fail: AtomicBool,
}

impl<K, V> BlockingWriter<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            inner: RecordingWriter::new(),
            gate: Mutex::new(false),
            opened: Condvar::new(),
            entered: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        }
    }

    /// Calls that have reached the gate.
    pub fn entered(&self) -> usize {
        self.entered.load(Ordering::SeqCst)
    }

    pub fn fail_when_released(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Open the gate for every current and future call.
    pub fn release(&self) {
        *self.gate.lock().unwrap() = true;
        self.opened.notify_all();
    }

    pub fn inner(&self) -> &RecordingWriter<K, V> {
        &self.inner
    }

    fn wait(&self) -> WriteResult<()> {
        self.entered.fetch_add(1, Ordering::SeqCst);
        let mut open = self.gate.lock().unwrap();
        while !*open {
            open = self.opened.wait(open).unwrap();
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(WriteError::transient("released with failure"));
        }
        Ok(())
    }
}

impl<K, V> Default for BlockingWriter<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> CacheWriter<K, V> for BlockingWriter<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn write(&self, key: &K, value: &V) -> WriteResult<()> {
        self.wait()?;
        self.inner.write(key, value)
    }

    fn write_all(&self, entries: &HashMap<K, V>) -> WriteResult<()> {
        self.wait()?;
        self.inner.write_all(entries)
    }

    fn delete(&self, key: &K) -> WriteResult<()> {
        self.wait()?;
        self.inner.delete(key)
    }

    fn delete_all(&self, keys: &[K]) -> WriteResult<()> {
        self.wait()?;
        self.inner.delete_all(keys)
    }
}

// ============================================================================
// ASYNC HELPERS
// ============================================================================

/// Poll `condition` every few milliseconds until it holds or `timeout`
/// elapses. Returns whether it held.
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Install a test-writer subscriber honouring `RUST_LOG`. Safe to call from
/// every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for Cairn value types.

    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use proptest::prelude::*;

    /// Counter values small enough that sums never saturate.
    const MAX_COUNT: u64 = 1_000_000;

    pub fn arb_cache_name() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9-]{0,15}"
    }

    pub fn arb_cache_stats() -> impl Strategy<Value = CacheStats> {
        (
            0..MAX_COUNT,
            0..MAX_COUNT,
            0..MAX_COUNT,
            0..MAX_COUNT,
            0..MAX_COUNT,
            0..MAX_COUNT,
        )
            .prop_map(|(hit, miss, load_ok, load_err, evictions, size)| CacheStats {
                hit_count: hit,
                miss_count: miss,
                load_success_count: load_ok,
                load_failure_count: load_err,
                eviction_count: evictions,
                size,
            })
    }

    pub fn arb_timestamp() -> impl Strategy<Value = DateTime<Utc>> {
        (1_600_000_000i64..1_900_000_000i64).prop_map(|secs| {
            Utc.timestamp_opt(secs, 0)
                .single()
                .unwrap_or_else(Utc::now)
        })
    }

    pub fn arb_snapshot() -> impl Strategy<Value = StatsSnapshot> {
        (arb_cache_name(), arb_cache_stats(), arb_timestamp())
            .prop_map(|(name, stats, at)| StatsSnapshot::new(name, stats, at))
    }

    pub fn arb_requeue_policy() -> impl Strategy<Value = RequeuePolicy> {
        prop_oneof![
            Just(RequeuePolicy::PreserveNewer),
            Just(RequeuePolicy::RestoreFailed),
        ]
    }

    /// Valid write-behind settings with short intervals.
    pub fn arb_write_behind_config() -> impl Strategy<Value = WriteBehindConfig> {
        (1usize..64, 5u64..200, arb_requeue_policy()).prop_map(|(batch, interval_ms, policy)| {
            WriteBehindConfig::new()
                .with_batch_size(batch)
                .with_flush_interval(Duration::from_millis(interval_ms))
                .with_requeue_policy(policy)
                .with_shutdown_timeout(Duration::from_secs(2))
        })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built configurations for common scenarios.

    use super::*;

    /// Unbounded cache with statistics on.
    pub fn stats_config(name: &str) -> CacheConfig {
        CacheConfig::builder(name)
            .record_stats(true)
            .build()
            .expect("fixture config is valid")
    }

    pub fn bounded_config(name: &str, maximum_size: u64) -> CacheConfig {
        CacheConfig::builder(name)
            .maximum_size(maximum_size)
            .record_stats(true)
            .build()
            .expect("fixture config is valid")
    }

    /// Worker that never fires on its own; tests flush by hand.
    pub fn manual_flush() -> WriteBehindConfig {
        WriteBehindConfig::new()
            .with_batch_size(1_000)
            .with_flush_interval(Duration::from_secs(3600))
            .with_shutdown_timeout(Duration::from_secs(2))
    }

    /// Worker that flushes quickly.
    pub fn fast_flush(batch_size: usize) -> WriteBehindConfig {
        WriteBehindConfig::new()
            .with_batch_size(batch_size)
            .with_flush_interval(Duration::from_millis(20))
            .with_shutdown_timeout(Duration::from_secs(2))
    }

    pub fn fast_stats() -> StatsCollectorConfig {
        StatsCollectorConfig::new()
            .with_snapshot_interval(Duration::from_millis(20))
            .with_history_capacity(5)
            .with_shutdown_timeout(Duration::from_secs(1))
    }

    /// Stats with the given hit and miss counts; every other counter zero.
    pub fn hits_and_misses(hits: u64, misses: u64) -> CacheStats {
        CacheStats {
            hit_count: hits,
            miss_count: misses,
            ..CacheStats::default()
        }
    }
}
