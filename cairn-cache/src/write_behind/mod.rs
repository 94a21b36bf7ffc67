//! Write-behind cache.
//!
//! A [`WriteBehindCache`] serves reads and writes from a [`LocalCache`] and
//! persists writes to a [`CacheWriter`] asynchronously, in batches:
//!
//! - `put` stores the resolved value in memory and buffers it for
//!   persistence. The caller never waits on the backing store.
//! - The buffer holds one intent per key. A later write replaces an
//!   earlier one that has not been flushed yet.
//! - A background tokio task flushes every `flush_interval`, and early when
//!   the buffer reaches `batch_size`.
//! - A failed batch is put back in the buffer according to the configured
//!   [`RequeuePolicy`](cairn_core::RequeuePolicy) and retried on the next pass.
//!
//! # Durability
//!
//! Intents are removed from the buffer before the writer is called. If the
//! process dies between the drain and a successful write, that batch is
//! lost. There is no ceiling on the buffer either: a writer that keeps
//! failing lets it grow without bound.

mod buffer;
mod metrics;
mod worker;

pub use buffer::PendingWrite;
pub use metrics::{WriteBehindMetrics, WriteBehindMetricsSnapshot};

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use cairn_core::{
    CacheConfig, CacheError, CacheResult, CacheStats, CacheWriter, ConfigError, ConflictResolver,
    StateError, StatsSource, WriteBehindConfig, WriteError, WriteFailure,
};
use tokio::runtime::Handle;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

use crate::local::{LocalCache, LocalCacheBuilder, RemovalCause};
use buffer::PendingBuffer;

/// Result of one flush pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FlushOutcome {
    /// Intents drained and persisted
    pub(crate) flushed: usize,
    /// Intents left in the buffer afterwards
    pub(crate) remaining: usize,
}

/// State shared between the cache handle and its worker task.
pub(crate) struct Inner<K, V> {
    local: LocalCache<K, V>,
    writer: Arc<dyn CacheWriter<K, V>>,
    config: WriteBehindConfig,
    pending: PendingBuffer<K, V>,
    flush_lock: Mutex<()>,
    flush_requested: Notify,
    closed: AtomicBool,
    metrics: WriteBehindMetrics,
}

impl<K, V> Inner<K, V>
where
    K: Hash + Eq + Clone + fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        self.local.name()
    }

    /// Drain one batch and hand it to the writer.
    ///
    /// Only one pass runs at a time per cache. Writes go first; deletions
    /// only once the writes have succeeded.
    fn flush_pass(&self) -> CacheResult<FlushOutcome> {
        let _guard = self.flush_lock.lock().map_err(|_| StateError::LockPoisoned {
            cache: self.name().to_string(),
        })?;

        let drained = self.pending.drain(self.config.batch_size);
        if drained.is_empty() {
            self.pending.end_pass();
            tracing::trace!(cache = %self.name(), "Flush pass found nothing to write");
            return Ok(FlushOutcome {
                flushed: 0,
                remaining: self.pending.len(),
            });
        }

        WriteBehindMetrics::add(&self.metrics.flush_passes, 1);
        let epoch = drained.epoch();

        let mut writes = HashMap::new();
        let mut deletes = Vec::new();
        for (key, intent) in drained.batch {
            match intent {
                PendingWrite::Write(value) => {
                    writes.insert(key, value);
                }
                PendingWrite::Delete => deletes.push(key),
            }
        }

        let result = self.persist(writes, deletes, epoch);
        self.pending.end_pass();

        result.map(|flushed| FlushOutcome {
            flushed,
            remaining: self.pending.len(),
        })
    }

    fn persist(&self, writes: HashMap<K, V>, deletes: Vec<K>, epoch: u64) -> CacheResult<usize> {
        let written = writes.len();
        let deleted = deletes.len();

        if !writes.is_empty() {
            if let Err(source) = self.writer.write_all(&writes) {
                let failed = writes
                    .into_iter()
                    .map(|(key, value)| (key, PendingWrite::Write(value)))
                    .chain(deletes.into_iter().map(|key| (key, PendingWrite::Delete)));
                return Err(self.fail(failed, written + deleted, source, epoch));
            }
            WriteBehindMetrics::add(&self.metrics.entries_written, written);
        }

        if !deletes.is_empty() {
            if let Err(source) = self.writer.delete_all(&deletes) {
                let failed = deletes.into_iter().map(|key| (key, PendingWrite::Delete));
                return Err(self.fail(failed, deleted, source, epoch));
            }
            WriteBehindMetrics::add(&self.metrics.entries_deleted, deleted);
        }

        tracing::debug!(
            cache = %self.name(),
            written,
            deleted,
            "Flushed batch to backing store"
        );
        Ok(written + deleted)
    }

    fn fail(
        &self,
        failed: impl IntoIterator<Item = (K, PendingWrite<V>)>,
        entries: usize,
        source: WriteError,
        epoch: u64,
    ) -> CacheError {
        let requeued = self
            .pending
            .requeue(failed, self.config.requeue_policy, epoch);

        WriteBehindMetrics::add(&self.metrics.failed_flushes, 1);
        WriteBehindMetrics::add(&self.metrics.entries_requeued, requeued);

        tracing::warn!(
            cache = %self.name(),
            entries,
            requeued,
            retryable = source.is_retryable(),
            error = %source,
            "Writer rejected batch; entries re-queued"
        );

        WriteFailure {
            cache: self.name().to_string(),
            entries,
            source,
        }
        .into()
    }

    /// Ask for another pass right away when the last one left more behind
    /// than it took, or a full batch.
    fn schedule_follow_up(&self, outcome: &FlushOutcome) {
        if outcome.remaining > outcome.flushed || outcome.remaining >= self.config.batch_size {
            self.flush_requested.notify_one();
        }
    }

    fn after_enqueue(&self, depth: usize) {
        if depth >= self.config.batch_size {
            self.flush_requested.notify_one();
        }
    }

    fn ensure_open(&self) -> CacheResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StateError::ShutDown {
                cache: self.name().to_string(),
            }
            .into());
        }
        Ok(())
    }
}

/// Handle on a running flush worker.
struct Worker {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

/// Cache that persists writes asynchronously in batches.
///
/// See the [module docs](self) for the buffering model and its durability
/// caveat.
///
/// # Example
///
/// ```ignore
/// let cache: WriteBehindCache<String, Profile> =
///     WriteBehindCache::builder(config, Arc::new(ProfileWriter::new(pool)))
///         .write_behind(WriteBehindConfig::production())
///         .build()?;
///
/// cache.put("alice".to_string(), profile)?;
/// // ...
/// cache.shutdown().await?;
/// ```
pub struct WriteBehindCache<K, V> {
    inner: Arc<Inner<K, V>>,
    worker: Mutex<Option<Worker>>,
}

impl<K, V> WriteBehindCache<K, V>
where
    K: Hash + Eq + Clone + fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn builder(
        config: CacheConfig,
        writer: Arc<dyn CacheWriter<K, V>>,
    ) -> WriteBehindCacheBuilder<K, V> {
        WriteBehindCacheBuilder {
            local: LocalCache::builder(config),
            writer,
            config: WriteBehindConfig::default(),
            runtime: None,
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn write_behind_config(&self) -> &WriteBehindConfig {
        &self.inner.config
    }

    /// The in-memory cache behind this one.
    pub fn local(&self) -> &LocalCache<K, V> {
        &self.inner.local
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.inner.local.get(key)
    }

    pub fn get_all(&self, keys: impl IntoIterator<Item = K>) -> HashMap<K, V> {
        self.inner.local.get_all(keys)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.local.contains_key(key)
    }

    /// Store `value` and buffer the stored (resolved) value for persistence.
    ///
    /// Returns what ended up in the cache. Fails with `StateError::ShutDown`
    /// once shutdown has begun, or with a conflict from the resolver; in
    /// both cases nothing is buffered.
    pub fn put(&self, key: K, value: V) -> CacheResult<V> {
        self.inner.ensure_open()?;

        let pending = &self.inner.pending;
        let mut depth = 0;
        let stored = self.inner.local.put_with(key, value, |key, stored| {
            depth = pending.enqueue(key.clone(), PendingWrite::Write(stored.clone()));
        })?;

        self.inner.after_enqueue(depth);
        Ok(stored)
    }

    /// [`put`](Self::put) every entry, stopping at the first error.
    pub fn put_all(&self, entries: impl IntoIterator<Item = (K, V)>) -> CacheResult<()> {
        for (key, value) in entries {
            self.put(key, value)?;
        }
        Ok(())
    }

    /// Remove `key` from memory and buffer its deletion from the backing store.
    pub fn delete(&self, key: &K) -> CacheResult<()> {
        self.inner.ensure_open()?;

        self.inner.local.invalidate(key);
        let depth = self.inner.pending.enqueue(key.clone(), PendingWrite::Delete);
        self.inner.after_enqueue(depth);
        Ok(())
    }

    /// Loads are not buffered: a loaded value came from the backing store.
    pub fn compute_if_absent<F>(&self, key: K, load: F) -> V
    where
        F: FnOnce() -> V,
    {
        self.inner.local.compute_if_absent(key, load)
    }

    pub fn try_compute_if_absent<F, E>(&self, key: K, load: F) -> Result<V, Arc<E>>
    where
        F: FnOnce() -> Result<V, E>,
        E: Send + Sync + 'static,
    {
        self.inner.local.try_compute_if_absent(key, load)
    }

    /// Drop `key` from memory and discard its unflushed intent.
    pub fn invalidate(&self, key: &K) {
        self.inner.local.invalidate(key);
        self.inner.pending.purge(key);
    }

    pub fn invalidate_keys(&self, keys: impl IntoIterator<Item = K>) {
        for key in keys {
            self.invalidate(&key);
        }
    }

    /// Drop everything from memory and discard every unflushed intent.
    pub fn invalidate_all(&self) {
        self.inner.local.invalidate_all();
        let purged = self.inner.pending.purge_all();
        if purged > 0 {
            tracing::debug!(
                cache = %self.name(),
                purged,
                "Discarded pending writes on invalidate_all"
            );
        }
    }

    pub fn clean_up(&self) {
        self.inner.local.clean_up();
    }

    pub fn entry_count(&self) -> u64 {
        self.inner.local.entry_count()
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.local.stats()
    }

    /// Run one flush pass on the calling thread and return how many intents
    /// it persisted. Blocks on the writer.
    ///
    /// Must not be called from inside an async task; use
    /// [`flush_async`](Self::flush_async) there.
    pub fn flush(&self) -> CacheResult<usize> {
        let outcome = self.inner.flush_pass()?;
        self.inner.schedule_follow_up(&outcome);
        Ok(outcome.flushed)
    }

    /// [`flush`](Self::flush) on tokio's blocking pool.
    pub async fn flush_async(&self) -> CacheResult<usize> {
        let outcome = worker::run_pass(Arc::clone(&self.inner)).await?;
        self.inner.schedule_follow_up(&outcome);
        Ok(outcome.flushed)
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    pub fn has_pending_writes(&self) -> bool {
        !self.inner.pending.is_empty()
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub fn metrics(&self) -> WriteBehindMetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Stop accepting writes, flush everything buffered, then stop the worker.
    ///
    /// Flushing stops at the first writer failure; that error is returned
    /// after the worker has been stopped, and the unflushed intents remain
    /// visible through [`pending_count`](Self::pending_count). Waiting for
    /// the worker is bounded by `shutdown_timeout`, after which it is
    /// aborted. A second call returns `Ok(())` immediately.
    pub async fn shutdown(&self) -> CacheResult<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        tracing::info!(
            cache = %self.name(),
            pending = self.pending_count(),
            "Write-behind cache shutting down"
        );

        let drained = self.drain_pending().await;
        self.stop_worker().await;

        match &drained {
            Ok(()) => tracing::info!(cache = %self.name(), "Write-behind cache shut down"),
            Err(e) => tracing::warn!(
                cache = %self.name(),
                unflushed = self.pending_count(),
                error = %e,
                "Shutdown could not flush every pending write"
            ),
        }
        drained
    }

    /// Stop immediately, discarding every unflushed intent. Returns how many
    /// were discarded.
    pub fn shutdown_now(&self) -> usize {
        self.inner.closed.store(true, Ordering::Release);

        let discarded = self.inner.pending.purge_all();
        WriteBehindMetrics::add(&self.inner.metrics.entries_discarded, discarded);

        if let Some(worker) = self.take_worker() {
            let _ = worker.shutdown_tx.send(true);
            worker.join.abort();
        }

        tracing::warn!(
            cache = %self.name(),
            discarded,
            "Write-behind cache stopped; pending writes discarded"
        );
        discarded
    }

    async fn drain_pending(&self) -> CacheResult<()> {
        while !self.inner.pending.is_empty() {
            let outcome = worker::run_pass(Arc::clone(&self.inner)).await?;
            if outcome.flushed == 0 && outcome.remaining == 0 {
                break;
            }
        }
        Ok(())
    }

    async fn stop_worker(&self) {
        let Some(Worker {
            shutdown_tx,
            mut join,
        }) = self.take_worker()
        else {
            return;
        };

        let _ = shutdown_tx.send(true);
        let timeout = self.inner.config.shutdown_timeout;
        if tokio::time::timeout(timeout, &mut join).await.is_err() {
            join.abort();
            tracing::warn!(
                cache = %self.name(),
                timeout_ms = timeout.as_millis() as u64,
                "Write-behind worker did not stop in time; aborted"
            );
        }
    }

    fn take_worker(&self) -> Option<Worker> {
        match self.worker.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

impl<K, V> StatsSource for WriteBehindCache<K, V>
where
    K: Hash + Eq + Clone + fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn stats(&self) -> CacheStats {
        self.inner.local.stats()
    }

    fn pending_writes(&self) -> Option<usize> {
        Some(self.inner.pending.len())
    }
}

impl<K, V> Drop for WriteBehindCache<K, V> {
    fn drop(&mut self) {
        let worker = match self.worker.get_mut() {
            Ok(slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(worker) = worker {
            let _ = worker.shutdown_tx.send(true);
            worker.join.abort();

            let lost = self.inner.pending.last_depth();
            if lost > 0 {
                tracing::warn!(
                    cache = %self.inner.local.name(),
                    lost,
                    "Write-behind cache dropped without shutdown; pending writes lost"
                );
            }
        }
    }
}

impl<K, V> fmt::Debug for WriteBehindCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteBehindCache")
            .field("local", &self.inner.local)
            .field("config", &self.inner.config)
            .field("closed", &self.inner.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

// ============================================================================
// BUILDER
// ============================================================================

/// Builder for [`WriteBehindCache`].
pub struct WriteBehindCacheBuilder<K, V> {
    local: LocalCacheBuilder<K, V>,
    writer: Arc<dyn CacheWriter<K, V>>,
    config: WriteBehindConfig,
    runtime: Option<Handle>,
}

impl<K, V> WriteBehindCacheBuilder<K, V>
where
    K: Hash + Eq + Clone + fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn resolver(mut self, resolver: ConflictResolver<V>) -> Self {
        self.local = self.local.resolver(resolver);
        self
    }

    pub fn weigher<F>(mut self, weigher: F) -> Self
    where
        F: Fn(&K, &V) -> u32 + Send + Sync + 'static,
    {
        self.local = self.local.weigher(weigher);
        self
    }

    /// Removals observed here are in-memory only; they never reach the writer.
    pub fn removal_listener<F>(mut self, listener: F) -> Self
    where
        F: Fn(&K, &V, RemovalCause) + Send + Sync + 'static,
    {
        self.local = self.local.removal_listener(listener);
        self
    }

    pub fn write_behind(mut self, config: WriteBehindConfig) -> Self {
        self.config = config;
        self
    }

    /// Runtime to host the flush worker. Defaults to the current one.
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    pub fn build(self) -> CacheResult<WriteBehindCache<K, V>> {
        self.config.validate()?;
        let runtime = match self.runtime {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|_| ConfigError::NoRuntime)?,
        };

        let inner = Arc::new(Inner {
            local: self.local.build()?,
            writer: self.writer,
            config: self.config,
            pending: PendingBuffer::new(),
            flush_lock: Mutex::new(()),
            flush_requested: Notify::new(),
            closed: AtomicBool::new(false),
            metrics: WriteBehindMetrics::new(),
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = runtime.spawn(worker::flush_worker(Arc::clone(&inner), shutdown_rx));

        Ok(WriteBehindCache {
            inner,
            worker: Mutex::new(Some(Worker { shutdown_tx, join })),
        })
    }
}
