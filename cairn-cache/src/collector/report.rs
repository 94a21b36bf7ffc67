//! Periodic statistics report.

use std::collections::BTreeMap;

use cairn_core::CacheStats;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Statistics for every registered cache at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsReport {
    pub timestamp: DateTime<Utc>,
    /// Per-cache stats keyed by cache name
    pub caches: BTreeMap<String, CacheStats>,
    /// Sum over `caches`
    pub aggregate: CacheStats,
    /// Buffered write counts, for caches that buffer writes
    pub pending_writes: BTreeMap<String, usize>,
}

impl StatsReport {
    pub fn total_pending_writes(&self) -> usize {
        self.pending_writes.values().sum()
    }
}

/// Reporter that writes the report through `tracing`: the aggregate at
/// `info`, each cache at `debug`.
pub fn log_report(report: &StatsReport) {
    tracing::info!(
        caches = report.caches.len(),
        requests = report.aggregate.request_count(),
        hit_rate = report.aggregate.hit_rate(),
        evictions = report.aggregate.eviction_count,
        size = report.aggregate.size,
        pending_writes = report.total_pending_writes(),
        "Cache statistics"
    );

    for (name, stats) in &report.caches {
        tracing::debug!(
            cache = %name,
            hits = stats.hit_count,
            misses = stats.miss_count,
            hit_rate = stats.hit_rate(),
            load_failures = stats.load_failure_count,
            evictions = stats.eviction_count,
            size = stats.size,
            pending_writes = report.pending_writes.get(name).copied(),
            "Cache statistics"
        );
    }
}
