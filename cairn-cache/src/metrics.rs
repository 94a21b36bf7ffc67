//! Metrics sinks fed by the statistics collector.
//!
//! The collector tells its sink when caches come and go, and asks it to
//! refresh after every snapshot. [`NoopCacheMetrics`] ignores all of it.
//! With the `prometheus` feature, [`PrometheusCacheMetrics`] exports
//! per-cache gauges labelled by cache name.

use std::sync::Arc;

use cairn_core::StatsSource;

/// Destination for cache statistics outside the process.
pub trait CacheMetrics: Send + Sync {
    fn register_cache(&self, name: &str, cache: Arc<dyn StatsSource>);

    fn unregister(&self, name: &str);

    /// Pull fresh values from every registered cache.
    fn refresh(&self) {}
}

/// Sink that records nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCacheMetrics;

impl CacheMetrics for NoopCacheMetrics {
    fn register_cache(&self, _name: &str, _cache: Arc<dyn StatsSource>) {}

    fn unregister(&self, _name: &str) {}
}

#[cfg(feature = "prometheus")]
pub use self::prometheus_sink::PrometheusCacheMetrics;

#[cfg(feature = "prometheus")]
mod prometheus_sink {
    use std::collections::HashMap;
    use std::sync::{Arc, PoisonError, RwLock};

    use cairn_core::{CacheResult, ConfigError, StatsSource};
    use prometheus::{Encoder, IntGaugeVec, Opts, Registry, TextEncoder};

    use super::CacheMetrics;

    const LABEL: &str = "cache";

    fn gauge(registry: &Registry, name: &str, help: &str) -> CacheResult<IntGaugeVec> {
        let register_failed = |e: prometheus::Error| ConfigError::InvalidValue {
            field: "metrics".to_string(),
            value: name.to_string(),
            reason: e.to_string(),
        };

        let vec = IntGaugeVec::new(Opts::new(name, help), &[LABEL]).map_err(register_failed)?;
        registry
            .register(Box::new(vec.clone()))
            .map_err(register_failed)?;
        Ok(vec)
    }

    fn clamp(value: u64) -> i64 {
        i64::try_from(value).unwrap_or(i64::MAX)
    }

    /// Per-cache gauges in a dedicated Prometheus registry.
    ///
    /// Values are copied from each cache on [`refresh`](CacheMetrics::refresh),
    /// which the collector calls after every snapshot.
    pub struct PrometheusCacheMetrics {
        registry: Registry,
        sources: RwLock<HashMap<String, Arc<dyn StatsSource>>>,
        hits: IntGaugeVec,
        misses: IntGaugeVec,
        load_successes: IntGaugeVec,
        load_failures: IntGaugeVec,
        evictions: IntGaugeVec,
        size: IntGaugeVec,
        pending_writes: IntGaugeVec,
    }

    impl PrometheusCacheMetrics {
        /// Create the gauges in a fresh registry.
        pub fn new() -> CacheResult<Self> {
            Self::with_registry(Registry::new())
        }

        /// Create the gauges in `registry`, e.g. one shared with other metrics.
        pub fn with_registry(registry: Registry) -> CacheResult<Self> {
            Ok(Self {
                hits: gauge(&registry, "cairn_cache_hits", "Cache lookups that found a value")?,
                misses: gauge(&registry, "cairn_cache_misses", "Cache lookups that found nothing")?,
                load_successes: gauge(
                    &registry,
                    "cairn_cache_load_successes",
                    "Values loaded into the cache",
                )?,
                load_failures: gauge(
                    &registry,
                    "cairn_cache_load_failures",
                    "Loads that returned an error",
                )?,
                evictions: gauge(
                    &registry,
                    "cairn_cache_evictions",
                    "Entries evicted by size bound or expiry",
                )?,
                size: gauge(&registry, "cairn_cache_size", "Current number of entries")?,
                pending_writes: gauge(
                    &registry,
                    "cairn_cache_pending_writes",
                    "Writes buffered for the backing store",
                )?,
                sources: RwLock::new(HashMap::new()),
                registry,
            })
        }

        pub fn registry(&self) -> &Registry {
            &self.registry
        }

        /// Render every metric in the registry in the text exposition format.
        pub fn encode_text(&self) -> String {
            let mut buffer = Vec::new();
            if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
                tracing::warn!(error = %e, "Failed to encode cache metrics");
                return String::new();
            }
            String::from_utf8(buffer).unwrap_or_default()
        }

        fn all(&self) -> [&IntGaugeVec; 7] {
            [
                &self.hits,
                &self.misses,
                &self.load_successes,
                &self.load_failures,
                &self.evictions,
                &self.size,
                &self.pending_writes,
            ]
        }

        fn publish(&self, name: &str, source: &dyn StatsSource) {
            let stats = source.stats();
            let labels = [name];
            self.hits.with_label_values(&labels).set(clamp(stats.hit_count));
            self.misses.with_label_values(&labels).set(clamp(stats.miss_count));
            self.load_successes
                .with_label_values(&labels)
                .set(clamp(stats.load_success_count));
            self.load_failures
                .with_label_values(&labels)
                .set(clamp(stats.load_failure_count));
            self.evictions.with_label_values(&labels).set(clamp(stats.eviction_count));
            self.size.with_label_values(&labels).set(clamp(stats.size));
            if let Some(pending) = source.pending_writes() {
                self.pending_writes
                    .with_label_values(&labels)
                    .set(clamp(pending as u64));
            }
        }
    }

    impl CacheMetrics for PrometheusCacheMetrics {
        fn register_cache(&self, name: &str, cache: Arc<dyn StatsSource>) {
            self.publish(name, cache.as_ref());
            self.sources
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(name.to_string(), cache);
        }

        fn unregister(&self, name: &str) {
            self.sources
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(name);
            for vec in self.all() {
                // Absent when the cache never reported; nothing to remove then.
                let _ = vec.remove_label_values(&[name]);
            }
        }

        fn refresh(&self) {
            let sources = self.sources.read().unwrap_or_else(PoisonError::into_inner);
            for (name, source) in sources.iter() {
                self.publish(name, source.as_ref());
            }
        }
    }

}
