//! Statistics collector.
//!
//! [`CacheStatsCollector`] keeps a registry of named [`StatsSource`]s, a
//! bounded [`StatsHistory`] for each, and optionally a background task that
//! snapshots every cache on a fixed interval and hands a [`StatsReport`] to
//! a reporter callback.
//!
//! Aggregates are computed by summing counters across caches, so the
//! aggregate hit rate is weighted by request volume.

mod history;
mod report;

pub use history::StatsHistory;
pub use report::{log_report, StatsReport};

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use cairn_core::{
    CacheResult, CacheStats, ConfigError, StatsCollectorConfig, StatsSnapshot, StatsSource,
};
use chrono::Utc;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::metrics::{CacheMetrics, NoopCacheMetrics};

/// Callback receiving each periodic report. Runs on the collector's task
/// and must not block.
pub type StatsReporter = Arc<dyn Fn(&StatsReport) + Send + Sync>;

struct Registered {
    source: Arc<dyn StatsSource>,
    history: Mutex<StatsHistory>,
}

/// State shared with the snapshot task.
struct Shared {
    config: StatsCollectorConfig,
    caches: RwLock<BTreeMap<String, Registered>>,
    sink: Arc<dyn CacheMetrics>,
    reporter: Option<StatsReporter>,
}

impl Shared {
    /// Read every source once and build a report from those readings. With
    /// `record`, the same readings are appended to each cache's history.
    fn capture(&self, record: bool) -> StatsReport {
        let caches = self.caches.read().unwrap_or_else(PoisonError::into_inner);
        let timestamp = Utc::now();

        let mut stats = BTreeMap::new();
        let mut pending_writes = BTreeMap::new();
        for (name, registered) in caches.iter() {
            let current = registered.source.stats();
            if record {
                registered
                    .history
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(StatsSnapshot::new(name.clone(), current, timestamp));
            }
            stats.insert(name.clone(), current);
            if let Some(pending) = registered.source.pending_writes() {
                pending_writes.insert(name.clone(), pending);
            }
        }
        drop(caches);

        StatsReport {
            timestamp,
            aggregate: CacheStats::sum(stats.values()),
            caches: stats,
            pending_writes,
        }
    }

    /// One collection cycle: record history, refresh the sink, and return
    /// the report for the readings just recorded.
    fn snapshot(&self) -> StatsReport {
        let report = self.capture(true);
        self.sink.refresh();
        report
    }
}

struct SnapshotTask {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

/// Registry of cache statistics with bounded history and periodic reporting.
///
/// # Example
///
/// ```ignore
/// let collector = CacheStatsCollector::builder(StatsCollectorConfig::from_env())
///     .reporter(log_report)
///     .build()?;
///
/// collector.register("profiles", profiles.clone());
/// collector.start()?;
/// ```
pub struct CacheStatsCollector {
    shared: Arc<Shared>,
    runtime: Option<Handle>,
    task: Mutex<Option<SnapshotTask>>,
}

impl CacheStatsCollector {
    /// Collector with no metrics sink and no reporter.
    pub fn new(config: StatsCollectorConfig) -> CacheResult<Self> {
        Self::builder(config).build()
    }

    pub fn builder(config: StatsCollectorConfig) -> CacheStatsCollectorBuilder {
        CacheStatsCollectorBuilder {
            config,
            sink: Arc::new(NoopCacheMetrics),
            reporter: None,
            runtime: None,
        }
    }

    pub fn config(&self) -> &StatsCollectorConfig {
        &self.shared.config
    }

    /// Start tracking `source` under `name`.
    ///
    /// Registering a name again replaces its source but keeps its history.
    pub fn register(&self, name: impl Into<String>, source: Arc<dyn StatsSource>) {
        let name = name.into();
        self.shared.sink.register_cache(&name, Arc::clone(&source));

        let mut caches = self.write_caches();
        match caches.get_mut(&name) {
            Some(existing) => {
                existing.source = source;
                tracing::debug!(cache = %name, "Replaced stats source");
            }
            None => {
                caches.insert(
                    name.clone(),
                    Registered {
                        source,
                        history: Mutex::new(StatsHistory::new(self.shared.config.history_capacity)),
                    },
                );
                tracing::debug!(cache = %name, "Registered stats source");
            }
        }
    }

    /// Stop tracking `name` and drop its history. Returns whether it was registered.
    pub fn unregister(&self, name: &str) -> bool {
        let removed = self.write_caches().remove(name).is_some();
        if removed {
            self.shared.sink.unregister(name);
            tracing::debug!(cache = %name, "Unregistered stats source");
        }
        removed
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.read_caches().contains_key(name)
    }

    pub fn cache_names(&self) -> Vec<String> {
        self.read_caches().keys().cloned().collect()
    }

    /// Current stats for `name`.
    pub fn get_stats(&self, name: &str) -> Option<CacheStats> {
        self.read_caches()
            .get(name)
            .map(|registered| registered.source.stats())
    }

    /// Current stats for every registered cache, keyed by name.
    pub fn get_all_stats(&self) -> BTreeMap<String, CacheStats> {
        self.read_caches()
            .iter()
            .map(|(name, registered)| (name.clone(), registered.source.stats()))
            .collect()
    }

    /// Counters summed across every registered cache.
    pub fn aggregate_stats(&self) -> CacheStats {
        CacheStats::sum(self.get_all_stats().values())
    }

    /// Retained snapshots for `name`, oldest first. Empty for unknown names.
    pub fn get_history(&self, name: &str) -> Vec<StatsSnapshot> {
        self.read_caches()
            .get(name)
            .map(|registered| {
                registered
                    .history
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .to_vec()
            })
            .unwrap_or_default()
    }

    /// Snapshot every registered cache now. Returns how many were taken.
    pub fn take_snapshot(&self) -> usize {
        self.shared.snapshot().caches.len()
    }

    /// Current stats for every cache, without touching history.
    pub fn report(&self) -> StatsReport {
        self.shared.capture(false)
    }

    /// Start the periodic snapshot task. Does nothing if it is already running.
    ///
    /// Fails with `ConfigError::NoRuntime` when no runtime was supplied to the
    /// builder and none is current.
    pub fn start(&self) -> CacheResult<()> {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.as_ref().is_some_and(|t| !t.join.is_finished()) {
            return Ok(());
        }

        let runtime = match &self.runtime {
            Some(handle) => handle.clone(),
            None => Handle::try_current().map_err(|_| ConfigError::NoRuntime)?,
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = runtime.spawn(snapshot_worker(Arc::clone(&self.shared), shutdown_rx));
        *task = Some(SnapshotTask { shutdown_tx, join });
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|t| !t.join.is_finished())
    }

    /// Signal the snapshot task to stop without waiting for it.
    pub fn stop(&self) {
        if let Some(task) = self.take_task() {
            let _ = task.shutdown_tx.send(true);
        }
    }

    /// Signal the snapshot task and wait for it, aborting it after
    /// `shutdown_timeout`.
    pub async fn shutdown(&self) {
        let Some(SnapshotTask {
            shutdown_tx,
            mut join,
        }) = self.take_task()
        else {
            return;
        };

        let _ = shutdown_tx.send(true);
        let timeout = self.shared.config.shutdown_timeout;
        if tokio::time::timeout(timeout, &mut join).await.is_err() {
            join.abort();
            tracing::warn!(
                timeout_ms = timeout.as_millis() as u64,
                "Stats collector did not stop in time; aborted"
            );
        }
    }

    fn take_task(&self) -> Option<SnapshotTask> {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn read_caches(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, Registered>> {
        self.shared.caches.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_caches(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, Registered>> {
        self.shared.caches.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for CacheStatsCollector {
    fn drop(&mut self) {
        let task = self
            .task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            let _ = task.shutdown_tx.send(true);
            task.join.abort();
        }
    }
}

impl std::fmt::Debug for CacheStatsCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStatsCollector")
            .field("config", &self.shared.config)
            .field("caches", &self.cache_names())
            .finish_non_exhaustive()
    }
}

/// Builder for [`CacheStatsCollector`].
pub struct CacheStatsCollectorBuilder {
    config: StatsCollectorConfig,
    sink: Arc<dyn CacheMetrics>,
    reporter: Option<StatsReporter>,
    runtime: Option<Handle>,
}

impl CacheStatsCollectorBuilder {
    pub fn metrics(mut self, sink: Arc<dyn CacheMetrics>) -> Self {
        self.sink = sink;
        self
    }

    pub fn reporter<F>(mut self, reporter: F) -> Self
    where
        F: Fn(&StatsReport) + Send + Sync + 'static,
    {
        self.reporter = Some(Arc::new(reporter));
        self
    }

    /// Runtime to host the snapshot task. Defaults to the one current at `start`.
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    pub fn build(self) -> CacheResult<CacheStatsCollector> {
        self.config.validate()?;
        Ok(CacheStatsCollector {
            shared: Arc::new(Shared {
                config: self.config,
                caches: RwLock::new(BTreeMap::new()),
                sink: self.sink,
                reporter: self.reporter,
            }),
            runtime: self.runtime,
            task: Mutex::new(None),
        })
    }
}

async fn snapshot_worker(shared: Arc<Shared>, mut shutdown_rx: watch::Receiver<bool>) {
    let period = shared.config.snapshot_interval;
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        snapshot_interval_ms = period.as_millis() as u64,
        history_capacity = shared.config.history_capacity,
        "Stats collector started"
    );

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    tracing::info!("Stats collector shutting down");
                    break;
                }
            }

            _ = ticker.tick() => {
                let report = shared.snapshot();
                tracing::trace!(caches = report.caches.len(), "Took stats snapshot");
                if let Some(reporter) = &shared.reporter {
                    reporter(&report);
                }
            }
        }
    }
}
