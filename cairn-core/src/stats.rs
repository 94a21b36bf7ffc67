//! Cache statistics value types.
//!
//! [`CacheStats`] is a plain counter bundle. Aggregation across caches goes
//! through [`CacheStats::plus`], and rates are always recomputed from the
//! summed counters, never averaged from per-cache rates. A cache with ten
//! requests must not weigh as much as one with ten million.

use std::ops::{Add, Sub};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Point-in-time statistics for one cache, or an aggregate of several.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Lookups that found a value.
    pub hit_count: u64,
    /// Lookups that found nothing.
    pub miss_count: u64,
    /// Loader invocations that produced a value.
    pub load_success_count: u64,
    /// Loader invocations that failed.
    pub load_failure_count: u64,
    /// Entries removed by the size/weight bound or by expiry.
    pub eviction_count: u64,
    /// Approximate number of entries currently held.
    pub size: u64,
}

impl CacheStats {
    /// Stats carrying only a size, as reported by caches that do not record stats.
    pub fn size_only(size: u64) -> Self {
        Self {
            size,
            ..Default::default()
        }
    }

    /// Pairwise sum. Associative and commutative.
    pub fn plus(&self, other: &CacheStats) -> CacheStats {
        CacheStats {
            hit_count: self.hit_count.saturating_add(other.hit_count),
            miss_count: self.miss_count.saturating_add(other.miss_count),
            load_success_count: self.load_success_count.saturating_add(other.load_success_count),
            load_failure_count: self.load_failure_count.saturating_add(other.load_failure_count),
            eviction_count: self.eviction_count.saturating_add(other.eviction_count),
            size: self.size.saturating_add(other.size),
        }
    }

    /// Pairwise counter difference, `self - earlier`.
    ///
    /// Only meaningful when `earlier` was captured before `self`. Counters
    /// floor at zero. `size` is a gauge and keeps the value from `self`.
    pub fn minus(&self, earlier: &CacheStats) -> CacheStats {
        CacheStats {
            hit_count: self.hit_count.saturating_sub(earlier.hit_count),
            miss_count: self.miss_count.saturating_sub(earlier.miss_count),
            load_success_count: self.load_success_count.saturating_sub(earlier.load_success_count),
            load_failure_count: self.load_failure_count.saturating_sub(earlier.load_failure_count),
            eviction_count: self.eviction_count.saturating_sub(earlier.eviction_count),
            size: self.size,
        }
    }

    /// Hits plus misses.
    pub fn request_count(&self) -> u64 {
        self.hit_count.saturating_add(self.miss_count)
    }

    /// Hit rate (0.0 to 1.0); 0.0 when there were no requests.
    pub fn hit_rate(&self) -> f64 {
        ratio(self.hit_count, self.request_count())
    }

    /// Miss rate (0.0 to 1.0); 0.0 when there were no requests.
    pub fn miss_rate(&self) -> f64 {
        ratio(self.miss_count, self.request_count())
    }

    /// Successful plus failed loads.
    pub fn load_count(&self) -> u64 {
        self.load_success_count.saturating_add(self.load_failure_count)
    }

    pub fn load_failure_rate(&self) -> f64 {
        ratio(self.load_failure_count, self.load_count())
    }

    /// Sum an iterator of stats with [`plus`](Self::plus).
    pub fn sum<'a>(stats: impl IntoIterator<Item = &'a CacheStats>) -> CacheStats {
        stats
            .into_iter()
            .fold(CacheStats::default(), |acc, s| acc.plus(s))
    }
}

fn ratio(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}

impl Add for CacheStats {
    type Output = CacheStats;

    fn add(self, rhs: CacheStats) -> CacheStats {
        self.plus(&rhs)
    }
}

impl Sub for CacheStats {
    type Output = CacheStats;

    fn sub(self, rhs: CacheStats) -> CacheStats {
        self.minus(&rhs)
    }
}

/// Statistics for one cache captured at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub cache_name: String,
    pub stats: CacheStats,
    pub timestamp: DateTime<Utc>,
}

impl StatsSnapshot {
    pub fn new(cache_name: impl Into<String>, stats: CacheStats, timestamp: DateTime<Utc>) -> Self {
        Self {
            cache_name: cache_name.into(),
            stats,
            timestamp,
        }
    }

    /// Capture `stats` stamped with the current time.
    pub fn now(cache_name: impl Into<String>, stats: CacheStats) -> Self {
        Self::new(cache_name, stats, Utc::now())
    }

    /// Change since `previous`.
    ///
    /// The caller must ensure `previous` precedes `self`; ordering is not checked.
    pub fn delta(&self, previous: &StatsSnapshot) -> CacheStats {
        self.stats.minus(&previous.stats)
    }
}

/// Anything that can report [`CacheStats`] under a name.
pub trait StatsSource: Send + Sync {
    fn name(&self) -> &str;

    fn stats(&self) -> CacheStats;

    /// Buffered writes awaiting persistence, for caches that buffer any.
    fn pending_writes(&self) -> Option<usize> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use proptest::prelude::*;

    fn stats(hits: u64, misses: u64) -> CacheStats {
        CacheStats {
            hit_count: hits,
            miss_count: misses,
            ..Default::default()
        }
    }

    #[test]
    fn test_cache_stats_hit_rate() {
        let s = stats(80, 20);
        assert!((s.hit_rate() - 0.8).abs() < 0.001);
        assert!((s.miss_rate() - 0.2).abs() < 0.001);
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }

    #[test]
    fn test_aggregate_is_count_weighted() {
        let busy = stats(90, 10);
        let cold = stats(0, 10);
        let total = busy + cold;

        assert_eq!(total.request_count(), 110);
        assert!((total.hit_rate() - 90.0 / 110.0).abs() < 1e-9);
        assert!((total.hit_rate() - 0.45).abs() > 0.3);
    }

    #[test]
    fn test_minus_keeps_latest_size() {
        let earlier = CacheStats {
            hit_count: 10,
            eviction_count: 2,
            size: 50,
            ..Default::default()
        };
        let later = CacheStats {
            hit_count: 25,
            eviction_count: 3,
            size: 40,
            ..Default::default()
        };
        let delta = later - earlier;
        assert_eq!(delta.hit_count, 15);
        assert_eq!(delta.eviction_count, 1);
        assert_eq!(delta.size, 40);
    }

    #[test]
    fn test_minus_saturates_when_misordered() {
        let delta = stats(1, 1).minus(&stats(5, 5));
        assert_eq!(delta.hit_count, 0);
        assert_eq!(delta.miss_count, 0);
    }

    #[test]
    fn test_size_only() {
        let s = CacheStats::size_only(12);
        assert_eq!(s.size, 12);
        assert_eq!(s.request_count(), 0);
    }

    #[test]
    fn test_snapshot_delta() {
        let t0 = Utc::now();
        let before = StatsSnapshot::new("users", stats(10, 5), t0);
        let after = StatsSnapshot::new("users", stats(30, 6), t0 + ChronoDuration::seconds(60));
        let delta = after.delta(&before);
        assert_eq!(delta.hit_count, 20);
        assert_eq!(delta.miss_count, 1);
    }

    #[test]
    fn test_stats_serialize() {
        let json = serde_json::to_value(stats(3, 4)).unwrap();
        assert_eq!(json["hit_count"], 3);
        assert_eq!(json["miss_count"], 4);
    }

    fn stats_strategy() -> impl Strategy<Value = CacheStats> {
        (0u64..1_000_000, 0u64..1_000_000, 0u64..1000, 0u64..1000, 0u64..1000, 0u64..1000).prop_map(
            |(h, m, ls, lf, e, s)| CacheStats {
                hit_count: h,
                miss_count: m,
                load_success_count: ls,
                load_failure_count: lf,
                eviction_count: e,
                size: s,
            },
        )
    }

    proptest! {
        /// Property: plus is commutative.
        #[test]
        fn prop_plus_commutative(a in stats_strategy(), b in stats_strategy()) {
            prop_assert_eq!(a.plus(&b), b.plus(&a));
        }

        /// Property: plus is associative.
        #[test]
        fn prop_plus_associative(
            a in stats_strategy(),
            b in stats_strategy(),
            c in stats_strategy(),
        ) {
            prop_assert_eq!(a.plus(&b).plus(&c), a.plus(&b.plus(&c)));
        }

        /// Property: subtracting an addend recovers the counters of the other.
        #[test]
        fn prop_minus_inverts_plus(a in stats_strategy(), b in stats_strategy()) {
            let back = a.plus(&b).minus(&b);
            prop_assert_eq!(back.hit_count, a.hit_count);
            prop_assert_eq!(back.miss_count, a.miss_count);
            prop_assert_eq!(back.eviction_count, a.eviction_count);
        }

        /// Property: the aggregate hit rate equals summed hits over summed requests.
        #[test]
        fn prop_aggregate_hit_rate_weighted(all in prop::collection::vec(stats_strategy(), 1..8)) {
            let total = CacheStats::sum(&all);
            let hits: u64 = all.iter().map(|s| s.hit_count).sum();
            let requests: u64 = all.iter().map(|s| s.request_count()).sum();
            let expected = if requests == 0 { 0.0 } else { hits as f64 / requests as f64 };
            prop_assert!((total.hit_rate() - expected).abs() < 1e-12);
        }
    }
}
