//! Cache Statistics Module
//!
//! Per-shard, per-cluster and cache-wide counters returned by `stats`.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::cache::eviction::EvictionStats;
use crate::tasks::ExecutorStats;

// == Shard Stats ==
/// Snapshot of one shard. Fields read from the store are `None` when the
/// read failed transiently.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ShardStats {
    pub shard: String,
    /// Configured maximum age in seconds
    pub max_age: Option<i64>,
    /// Age in seconds of the oldest live entry
    pub oldest_age: Option<i64>,
    /// Configured maximum entry count
    pub max_entries: Option<u64>,
    /// Live entry count estimate (id range)
    pub entries: Option<u64>,
    pub eviction: EvictionStats,
}

// == Cluster Stats ==
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClusterStats {
    pub cluster: usize,
    pub asynchronous: bool,
    pub shards: Vec<ShardStats>,
    pub executor: ExecutorStats,
    /// Transient store failures swallowed by the failsafe layer
    pub failures_handled: u64,
}

impl ClusterStats {
    /// Sum of the known shard entry counts.
    pub fn total_entries(&self) -> u64 {
        self.shards.iter().filter_map(|shard| shard.entries).sum()
    }
}

// == Cache Stats ==
/// Cache-wide snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// Reads that found their key on the primary cluster
    pub hits: u64,
    /// Reads that did not
    pub misses: u64,
    pub hit_rate: f64,
    pub clusters: Vec<ClusterStats>,
}

// == Read Counters ==
/// Hit and miss counters shared by concurrent readers.
#[derive(Debug, Default)]
pub struct ReadCounters {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ReadCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.record(1, 0);
    }

    pub fn record_miss(&self) {
        self.record(0, 1);
    }

    pub fn record(&self, hits: u64, misses: u64) {
        if hits > 0 {
            self.hits.fetch_add(hits, Ordering::Relaxed);
        }
        if misses > 0 {
            self.misses.fetch_add(misses, Ordering::Relaxed);
        }
    }

    /// Builds the cache-wide snapshot around the cluster snapshots.
    pub fn snapshot(&self, clusters: Vec<ClusterStats>) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        CacheStats {
            hits,
            misses,
            hit_rate: hit_rate(hits, misses),
            clusters,
        }
    }
}

/// Returns hits / (hits + misses), or 0.0 if no reads have been made.
fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate_no_requests() {
        let counters = ReadCounters::new();
        let stats = counters.snapshot(Vec::new());
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.hit_rate, 0.0);
    }

    #[test]
    fn test_hit_rate_mixed() {
        let counters = ReadCounters::new();
        counters.record_hit();
        counters.record_miss();
        counters.record(2, 0);
        let stats = counters.snapshot(Vec::new());
        assert_eq!(stats.hits, 3);
        assert_eq!(stats.hit_rate, 0.75);
    }

    #[test]
    fn test_total_entries_skips_unknown_shards() {
        let stats = ClusterStats {
            shards: vec![
                ShardStats {
                    entries: Some(4),
                    ..ShardStats::default()
                },
                ShardStats::default(),
                ShardStats {
                    entries: Some(6),
                    ..ShardStats::default()
                },
            ],
            ..ClusterStats::default()
        };
        assert_eq!(stats.total_entries(), 10);
    }
}
