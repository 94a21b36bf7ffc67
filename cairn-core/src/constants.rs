//! Constants for Cairn
//!
//! Defaults used by the configuration types when neither the caller nor the
//! environment supplies a value.

// ============================================================================
// WRITE-BEHIND
// ============================================================================

/// Default number of entries drained per flush pass
pub const DEFAULT_WRITE_BEHIND_BATCH_SIZE: usize = 100;

/// Default delay between scheduled flush passes (milliseconds)
pub const DEFAULT_WRITE_BEHIND_FLUSH_INTERVAL_MS: u64 = 5_000;

/// Default bound on the graceful part of a write-behind shutdown (seconds)
pub const DEFAULT_WRITE_BEHIND_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// STATISTICS
// ============================================================================

/// Default delay between statistics snapshots (seconds)
pub const DEFAULT_STATS_SNAPSHOT_INTERVAL_SECS: u64 = 60;

/// Default number of snapshots retained per cache
pub const DEFAULT_STATS_HISTORY_CAPACITY: usize = 60;

/// Default bound on stopping the statistics worker (seconds)
pub const DEFAULT_STATS_SHUTDOWN_TIMEOUT_SECS: u64 = 5;

// ============================================================================
// ENVIRONMENT
// ============================================================================

pub const ENV_WRITE_BEHIND_BATCH_SIZE: &str = "CAIRN_WRITE_BEHIND_BATCH_SIZE";
pub const ENV_WRITE_BEHIND_FLUSH_INTERVAL_MS: &str = "CAIRN_WRITE_BEHIND_FLUSH_INTERVAL_MS";
pub const ENV_WRITE_BEHIND_REQUEUE_POLICY: &str = "CAIRN_WRITE_BEHIND_REQUEUE_POLICY";
pub const ENV_WRITE_BEHIND_SHUTDOWN_TIMEOUT_SECS: &str = "CAIRN_WRITE_BEHIND_SHUTDOWN_TIMEOUT_SECS";

pub const ENV_STATS_SNAPSHOT_INTERVAL_SECS: &str = "CAIRN_STATS_SNAPSHOT_INTERVAL_SECS";
pub const ENV_STATS_HISTORY_CAPACITY: &str = "CAIRN_STATS_HISTORY_CAPACITY";
pub const ENV_STATS_SHUTDOWN_TIMEOUT_SECS: &str = "CAIRN_STATS_SHUTDOWN_TIMEOUT_SECS";
