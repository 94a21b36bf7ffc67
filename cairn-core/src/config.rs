//! Configuration types

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::error::ConfigError;

// ============================================================================
// CACHE CONFIG
// ============================================================================

/// Bounds and behaviour of a single named cache.
///
/// Immutable once built. Callers share it behind an `Arc`.
///
/// # Example
///
/// ```
/// use cairn_core::CacheConfig;
/// use std::time::Duration;
///
/// let config = CacheConfig::builder("sessions")
///     .maximum_size(10_000)
///     .expire_after_access(Duration::from_secs(300))
///     .record_stats(true)
///     .build()
///     .expect("valid config");
///
/// assert_eq!(config.name(), "sessions");
/// assert_eq!(config.maximum_size(), Some(10_000));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    name: String,
    maximum_size: Option<u64>,
    maximum_weight: Option<u64>,
    expire_after_access: Option<Duration>,
    expire_after_write: Option<Duration>,
    weak_keys: bool,
    weak_values: bool,
    soft_values: bool,
    record_stats: bool,
}

impl CacheConfig {
    /// Start building a config for the cache called `name`.
    pub fn builder(name: impl Into<String>) -> CacheConfigBuilder {
        CacheConfigBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Maximum number of entries, if bounded by count.
    pub fn maximum_size(&self) -> Option<u64> {
        self.maximum_size
    }

    /// Maximum total weight, if bounded by weight.
    pub fn maximum_weight(&self) -> Option<u64> {
        self.maximum_weight
    }

    pub fn expire_after_access(&self) -> Option<Duration> {
        self.expire_after_access
    }

    pub fn expire_after_write(&self) -> Option<Duration> {
        self.expire_after_write
    }

    pub fn weak_keys(&self) -> bool {
        self.weak_keys
    }

    pub fn weak_values(&self) -> bool {
        self.weak_values
    }

    pub fn soft_values(&self) -> bool {
        self.soft_values
    }

    /// Whether hit/miss/load/eviction counters are maintained.
    pub fn record_stats(&self) -> bool {
        self.record_stats
    }

    /// True when any reference-strength flag is set.
    pub fn uses_reference_semantics(&self) -> bool {
        self.weak_keys || self.weak_values || self.soft_values
    }
}

/// Builder for [`CacheConfig`].
#[derive(Debug, Clone)]
pub struct CacheConfigBuilder {
    config: CacheConfig,
}

impl CacheConfigBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            config: CacheConfig {
                name: name.into(),
                maximum_size: None,
                maximum_weight: None,
                expire_after_access: None,
                expire_after_write: None,
                weak_keys: false,
                weak_values: false,
                soft_values: false,
                record_stats: false,
            },
        }
    }

    pub fn maximum_size(mut self, size: u64) -> Self {
        self.config.maximum_size = Some(size);
        self
    }

    /// Bound by total weight. The cache must also be given a weigher.
    pub fn maximum_weight(mut self, weight: u64) -> Self {
        self.config.maximum_weight = Some(weight);
        self
    }

    pub fn expire_after_access(mut self, ttl: Duration) -> Self {
        self.config.expire_after_access = Some(ttl);
        self
    }

    pub fn expire_after_write(mut self, ttl: Duration) -> Self {
        self.config.expire_after_write = Some(ttl);
        self
    }

    pub fn weak_keys(mut self, enabled: bool) -> Self {
        self.config.weak_keys = enabled;
        self
    }

    pub fn weak_values(mut self, enabled: bool) -> Self {
        self.config.weak_values = enabled;
        self
    }

    pub fn soft_values(mut self, enabled: bool) -> Self {
        self.config.soft_values = enabled;
        self
    }

    pub fn record_stats(mut self, enabled: bool) -> Self {
        self.config.record_stats = enabled;
        self
    }

    /// Validate and freeze the config.
    pub fn build(self) -> Result<CacheConfig, ConfigError> {
        let config = self.config;

        if config.name.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "name".to_string(),
            });
        }
        if config.maximum_size.is_some() && config.maximum_weight.is_some() {
            return Err(ConfigError::IncompatibleOptions {
                option_a: "maximum_size".to_string(),
                option_b: "maximum_weight".to_string(),
            });
        }
        if config.weak_values && config.soft_values {
            return Err(ConfigError::IncompatibleOptions {
                option_a: "weak_values".to_string(),
                option_b: "soft_values".to_string(),
            });
        }
        for (field, bound) in [
            ("maximum_size", config.maximum_size),
            ("maximum_weight", config.maximum_weight),
        ] {
            if bound == Some(0) {
                return Err(invalid(field, "0", "must be greater than zero"));
            }
        }
        for (field, ttl) in [
            ("expire_after_access", config.expire_after_access),
            ("expire_after_write", config.expire_after_write),
        ] {
            if ttl == Some(Duration::ZERO) {
                return Err(invalid(field, "0s", "must be greater than zero"));
            }
        }

        Ok(config)
    }
}

// ============================================================================
// WRITE-BEHIND CONFIG
// ============================================================================

/// What happens to a batch the writer rejected.
///
/// Initial buffering always coalesces (one pending value per key). This
/// policy only governs how a failed batch is put back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequeuePolicy {
    /// Re-insert only where no newer value was buffered during the attempt.
    #[default]
    PreserveNewer,
    /// Re-insert the failed batch unconditionally.
    ///
    /// A value buffered while the failed attempt was in flight is overwritten
    /// by the stale one. This is an accepted trade-off, kept for writers
    /// that need the failed batch replayed verbatim.
    RestoreFailed,
}

impl FromStr for RequeuePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "preserve-newer" | "preserve_newer" => Ok(RequeuePolicy::PreserveNewer),
            "restore-failed" | "restore_failed" => Ok(RequeuePolicy::RestoreFailed),
            other => Err(invalid(
                "requeue_policy",
                other,
                "expected preserve-newer or restore-failed",
            )),
        }
    }
}

/// Configuration for a write-behind cache's flush worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteBehindConfig {
    /// Maximum entries per flush pass; reaching it also triggers a pass
    /// (default: 100)
    pub batch_size: usize,

    /// Delay between scheduled flush passes (default: 5 seconds)
    pub flush_interval: Duration,

    /// Re-queue behaviour for failed batches (default: preserve newer)
    pub requeue_policy: RequeuePolicy,

    /// Bound on waiting for the worker to stop during shutdown
    /// (default: 30 seconds)
    pub shutdown_timeout: Duration,
}

impl Default for WriteBehindConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_WRITE_BEHIND_BATCH_SIZE,
            flush_interval: Duration::from_millis(DEFAULT_WRITE_BEHIND_FLUSH_INTERVAL_MS),
            requeue_policy: RequeuePolicy::default(),
            shutdown_timeout: Duration::from_secs(DEFAULT_WRITE_BEHIND_SHUTDOWN_TIMEOUT_SECS),
        }
    }
}

impl WriteBehindConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create WriteBehindConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `CAIRN_WRITE_BEHIND_BATCH_SIZE`: Entries per flush pass (default: 100)
    /// - `CAIRN_WRITE_BEHIND_FLUSH_INTERVAL_MS`: Flush delay (default: 5000)
    /// - `CAIRN_WRITE_BEHIND_REQUEUE_POLICY`: `preserve-newer` or `restore-failed`
    /// - `CAIRN_WRITE_BEHIND_SHUTDOWN_TIMEOUT_SECS`: Shutdown bound (default: 30)
    ///
    /// Unparseable values fall back to the defaults.
    pub fn from_env() -> Self {
        let batch_size = env_or(ENV_WRITE_BEHIND_BATCH_SIZE, DEFAULT_WRITE_BEHIND_BATCH_SIZE);

        let flush_interval = Duration::from_millis(env_or(
            ENV_WRITE_BEHIND_FLUSH_INTERVAL_MS,
            DEFAULT_WRITE_BEHIND_FLUSH_INTERVAL_MS,
        ));

        let requeue_policy = env_or(ENV_WRITE_BEHIND_REQUEUE_POLICY, RequeuePolicy::default());

        let shutdown_timeout = Duration::from_secs(env_or(
            ENV_WRITE_BEHIND_SHUTDOWN_TIMEOUT_SECS,
            DEFAULT_WRITE_BEHIND_SHUTDOWN_TIMEOUT_SECS,
        ));

        Self {
            batch_size,
            flush_interval,
            requeue_policy,
            shutdown_timeout,
        }
    }

    /// Small batches and short delays, for development and tests.
    pub fn development() -> Self {
        Self {
            batch_size: 10,
            flush_interval: Duration::from_millis(100),
            requeue_policy: RequeuePolicy::PreserveNewer,
            shutdown_timeout: Duration::from_secs(2),
        }
    }

    /// Larger batches for production backing stores.
    pub fn production() -> Self {
        Self {
            batch_size: 500,
            flush_interval: Duration::from_millis(DEFAULT_WRITE_BEHIND_FLUSH_INTERVAL_MS),
            requeue_policy: RequeuePolicy::PreserveNewer,
            shutdown_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn with_requeue_policy(mut self, policy: RequeuePolicy) -> Self {
        self.requeue_policy = policy;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(invalid("batch_size", "0", "must be greater than zero"));
        }
        if self.flush_interval.is_zero() {
            return Err(invalid("flush_interval", "0ms", "must be greater than zero"));
        }
        Ok(())
    }
}

// ============================================================================
// STATS COLLECTOR CONFIG
// ============================================================================

/// Configuration for the statistics collector's snapshot worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsCollectorConfig {
    /// Delay between snapshot-and-report cycles (default: 60 seconds)
    pub snapshot_interval: Duration,

    /// Snapshots retained per cache (default: 60)
    pub history_capacity: usize,

    /// Bound on waiting for the worker to stop (default: 5 seconds)
    pub shutdown_timeout: Duration,
}

impl Default for StatsCollectorConfig {
    fn default() -> Self {
        Self {
            snapshot_interval: Duration::from_secs(DEFAULT_STATS_SNAPSHOT_INTERVAL_SECS),
            history_capacity: DEFAULT_STATS_HISTORY_CAPACITY,
            shutdown_timeout: Duration::from_secs(DEFAULT_STATS_SHUTDOWN_TIMEOUT_SECS),
        }
    }
}

impl StatsCollectorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create StatsCollectorConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `CAIRN_STATS_SNAPSHOT_INTERVAL_SECS`: Snapshot delay (default: 60)
    /// - `CAIRN_STATS_HISTORY_CAPACITY`: Snapshots kept per cache (default: 60)
    /// - `CAIRN_STATS_SHUTDOWN_TIMEOUT_SECS`: Shutdown bound (default: 5)
    pub fn from_env() -> Self {
        Self {
            snapshot_interval: Duration::from_secs(env_or(
                ENV_STATS_SNAPSHOT_INTERVAL_SECS,
                DEFAULT_STATS_SNAPSHOT_INTERVAL_SECS,
            )),
            history_capacity: env_or(ENV_STATS_HISTORY_CAPACITY, DEFAULT_STATS_HISTORY_CAPACITY),
            shutdown_timeout: Duration::from_secs(env_or(
                ENV_STATS_SHUTDOWN_TIMEOUT_SECS,
                DEFAULT_STATS_SHUTDOWN_TIMEOUT_SECS,
            )),
        }
    }

    pub fn with_snapshot_interval(mut self, interval: Duration) -> Self {
        self.snapshot_interval = interval;
        self
    }

    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.history_capacity == 0 {
            return Err(invalid("history_capacity", "0", "must be greater than zero"));
        }
        if self.snapshot_interval.is_zero() {
            return Err(invalid("snapshot_interval", "0s", "must be greater than zero"));
        }
        Ok(())
    }
}

// ============================================================================
// HELPERS
// ============================================================================

fn env_or<T: FromStr>(var: &str, default: T) -> T {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn invalid(field: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_config_builder() {
        let config = CacheConfig::builder("profiles")
            .maximum_size(500)
            .expire_after_write(Duration::from_secs(60))
            .expire_after_access(Duration::from_secs(30))
            .record_stats(true)
            .build()
            .unwrap();

        assert_eq!(config.name(), "profiles");
        assert_eq!(config.maximum_size(), Some(500));
        assert_eq!(config.maximum_weight(), None);
        assert_eq!(config.expire_after_write(), Some(Duration::from_secs(60)));
        assert_eq!(config.expire_after_access(), Some(Duration::from_secs(30)));
        assert!(config.record_stats());
        assert!(!config.uses_reference_semantics());
    }

    #[test]
    fn test_cache_config_requires_name() {
        let err = CacheConfig::builder("  ").build().unwrap_err();
        assert!(matches!(err, ConfigError::MissingField { ref field } if field == "name"));
    }

    #[test]
    fn test_cache_config_rejects_size_and_weight() {
        let err = CacheConfig::builder("blobs")
            .maximum_size(10)
            .maximum_weight(1024)
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::IncompatibleOptions { .. }));
    }

    #[test]
    fn test_cache_config_rejects_zero_ttl() {
        let err = CacheConfig::builder("tokens")
            .expire_after_write(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { ref field, .. } if field == "expire_after_write"
        ));
    }

    #[test]
    fn test_cache_config_rejects_zero_bounds() {
        let err = CacheConfig::builder("zero").maximum_size(0).build().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { ref field, .. } if field == "maximum_size"
        ));

        let err = CacheConfig::builder("zero").maximum_weight(0).build().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { ref field, .. } if field == "maximum_weight"
        ));
    }

    #[test]
    fn test_cache_config_rejects_weak_and_soft_values() {
        let err = CacheConfig::builder("refs")
            .weak_values(true)
            .soft_values(true)
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::IncompatibleOptions { .. }));
    }

    #[test]
    fn test_requeue_policy_parse() {
        assert_eq!(
            "preserve-newer".parse::<RequeuePolicy>().unwrap(),
            RequeuePolicy::PreserveNewer
        );
        assert_eq!(
            "RESTORE_FAILED".parse::<RequeuePolicy>().unwrap(),
            RequeuePolicy::RestoreFailed
        );
        assert!("coalesce".parse::<RequeuePolicy>().is_err());
    }

    #[test]
    fn test_write_behind_config_builder() {
        let config = WriteBehindConfig::new()
            .with_batch_size(25)
            .with_flush_interval(Duration::from_millis(250))
            .with_requeue_policy(RequeuePolicy::RestoreFailed)
            .with_shutdown_timeout(Duration::from_secs(3));

        assert_eq!(config.batch_size, 25);
        assert_eq!(config.flush_interval, Duration::from_millis(250));
        assert_eq!(config.requeue_policy, RequeuePolicy::RestoreFailed);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(3));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_write_behind_config_validation() {
        assert!(WriteBehindConfig::new().with_batch_size(0).validate().is_err());
        assert!(WriteBehindConfig::new()
            .with_flush_interval(Duration::ZERO)
            .validate()
            .is_err());
        assert!(WriteBehindConfig::development().validate().is_ok());
        assert!(WriteBehindConfig::production().validate().is_ok());
    }

    #[test]
    fn test_write_behind_config_from_env() {
        std::env::set_var(ENV_WRITE_BEHIND_BATCH_SIZE, "7");
        std::env::set_var(ENV_WRITE_BEHIND_REQUEUE_POLICY, "restore-failed");
        std::env::set_var(ENV_WRITE_BEHIND_FLUSH_INTERVAL_MS, "not-a-number");

        let config = WriteBehindConfig::from_env();

        std::env::remove_var(ENV_WRITE_BEHIND_BATCH_SIZE);
        std::env::remove_var(ENV_WRITE_BEHIND_REQUEUE_POLICY);
        std::env::remove_var(ENV_WRITE_BEHIND_FLUSH_INTERVAL_MS);

        assert_eq!(config.batch_size, 7);
        assert_eq!(config.requeue_policy, RequeuePolicy::RestoreFailed);
        assert_eq!(
            config.flush_interval,
            Duration::from_millis(DEFAULT_WRITE_BEHIND_FLUSH_INTERVAL_MS)
        );
    }

    #[test]
    fn test_stats_collector_config_validation() {
        let config = StatsCollectorConfig::new()
            .with_history_capacity(5)
            .with_snapshot_interval(Duration::from_millis(20));
        assert!(config.validate().is_ok());
        assert!(StatsCollectorConfig::new()
            .with_history_capacity(0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_stats_collector_config_from_env_defaults() {
        let config = StatsCollectorConfig::from_env();
        assert!(config.history_capacity > 0);
        assert!(!config.snapshot_interval.is_zero());
    }
}
