//! Cairn Cache - bounded in-memory caches with write-behind persistence.
//!
//! - [`LocalCache`]: size/weight bounded, expiring cache with optional
//!   conflict resolution on writes
//! - [`WriteBehindCache`]: a `LocalCache` whose writes are persisted to a
//!   [`CacheWriter`] in background batches
//! - [`CacheStatsCollector`]: named statistics registry with bounded
//!   history and periodic reporting
//! - [`CacheService`]: owns named caches and shuts them down together
//!
//! Value types and contracts live in `cairn-core` and are re-exported here.

pub mod collector;
pub mod local;
pub mod metrics;
pub mod service;
pub mod write_behind;

pub use collector::{
    log_report, CacheStatsCollector, CacheStatsCollectorBuilder, StatsHistory, StatsReport,
    StatsReporter,
};
pub use local::{LocalCache, LocalCacheBuilder, RemovalCause, RemovalListener, Weigher};
pub use metrics::{CacheMetrics, NoopCacheMetrics};
#[cfg(feature = "prometheus")]
pub use metrics::PrometheusCacheMetrics;
pub use service::{CacheService, ManagedCache};
pub use write_behind::{
    PendingWrite, WriteBehindCache, WriteBehindCacheBuilder, WriteBehindMetrics,
    WriteBehindMetricsSnapshot,
};

pub use cairn_core::{
    CacheConfig, CacheConfigBuilder, CacheError, CacheResult, CacheStats, CacheWriter,
    ConfigError, ConflictError, ConflictResolver, RequeuePolicy, Resolution, StateError,
    StatsCollectorConfig, StatsSnapshot, StatsSource, WriteBehindConfig, WriteError,
    WriteFailure, WriteResult,
};
