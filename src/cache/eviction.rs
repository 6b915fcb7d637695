//! Eviction Module
//!
//! Keeps shards bounded without scanning them. Every write adds pressure to a
//! per-shard counter; each time the counter crosses the batch size one
//! eviction batch is scheduled. Because the pressure multiplier is above 1,
//! eviction deletes rows faster than writes add them whenever the shard is
//! over its limits or holds expired rows.

use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{Duration, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::backing::BackingStore;
use crate::cache::size::SizeEstimator;
use crate::cache::SharedRng;
use crate::error::{CacheError, Result, StoreResult};

pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_PRESSURE_MULTIPLIER: f64 = 1.25;
pub const DEFAULT_OVER_SAMPLE_FACTOR: usize = 3;

/// Two weeks.
pub const DEFAULT_MAX_AGE_SECS: i64 = 14 * 24 * 60 * 60;

/// Counter resolution: pressure is tracked in thousandths of a write.
const SCALE: u64 = 1000;

// == Eviction Policy ==
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Oldest rows by insertion, filtered by creation time
    #[default]
    Age,
    /// Least recently accessed rows, filtered by last access
    Lru,
}

impl FromStr for EvictionPolicy {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "age" => Ok(Self::Age),
            "lru" => Ok(Self::Lru),
            other => Err(CacheError::Configuration(format!(
                "unknown eviction policy '{}'",
                other
            ))),
        }
    }
}

/// Eviction counters of one shard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EvictionStats {
    pub batches_scheduled: u64,
    pub batches_run: u64,
    pub rows_evicted: u64,
}

// == Eviction Controller ==
/// Write-pressure counter of one shard.
#[derive(Debug)]
pub struct EvictionController {
    counter: AtomicU64,
    trigger: u64,
    per_write: u64,
    scheduled: AtomicU64,
    batches_run: AtomicU64,
    evicted: AtomicU64,
}

impl EvictionController {
    /// Starts the counter at a random point below the trigger so shards do
    /// not all cross it on the same write.
    pub fn new(batch_size: usize, pressure_multiplier: f64, rng: &SharedRng) -> Result<Self> {
        if batch_size == 0 {
            return Err(CacheError::Configuration(
                "eviction batch size must be positive".to_string(),
            ));
        }
        if !pressure_multiplier.is_finite() || pressure_multiplier <= 0.0 {
            return Err(CacheError::Configuration(
                "pressure multiplier must be positive".to_string(),
            ));
        }

        let trigger = batch_size as u64 * SCALE;
        let start = rng.lock().gen_range(0..trigger);
        Ok(Self {
            counter: AtomicU64::new(start),
            trigger,
            per_write: ((pressure_multiplier * SCALE as f64).round() as u64).max(1),
            scheduled: AtomicU64::new(0),
            batches_run: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
        })
    }

    /// Adds the pressure of `count` written rows and returns how many
    /// eviction batches the caller must schedule.
    pub fn record_writes(&self, count: usize) -> u64 {
        let added = (count as u64).saturating_mul(self.per_write);
        let mut current = self.counter.load(Ordering::Relaxed);
        loop {
            let total = current.saturating_add(added);
            match self.counter.compare_exchange_weak(
                current,
                total % self.trigger,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    let batches = total / self.trigger;
                    if batches > 0 {
                        self.scheduled.fetch_add(batches, Ordering::Relaxed);
                    }
                    return batches;
                }
                Err(actual) => current = actual,
            }
        }
    }

    pub fn record_batch(&self, evicted: u64) {
        self.batches_run.fetch_add(1, Ordering::Relaxed);
        self.evicted.fetch_add(evicted, Ordering::Relaxed);
    }

    /// Pending pressure in thousandths of a write.
    pub fn pending(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> EvictionStats {
        EvictionStats {
            batches_scheduled: self.scheduled.load(Ordering::Relaxed),
            batches_run: self.batches_run.load(Ordering::Relaxed),
            rows_evicted: self.evicted.load(Ordering::Relaxed),
        }
    }
}

// == Eviction Settings ==
#[derive(Debug, Clone)]
pub struct EvictionSettings {
    pub policy: EvictionPolicy,
    pub batch_size: usize,
    pub over_sample_factor: usize,
    /// Rows older than this are evicted even when the shard is not full
    pub max_age: Option<Duration>,
    pub max_entries: Option<u64>,
    /// Estimated payload bytes
    pub max_size: Option<u64>,
}

impl Default for EvictionSettings {
    fn default() -> Self {
        Self {
            policy: EvictionPolicy::Age,
            batch_size: DEFAULT_BATCH_SIZE,
            over_sample_factor: DEFAULT_OVER_SAMPLE_FACTOR,
            max_age: Some(Duration::seconds(DEFAULT_MAX_AGE_SECS)),
            max_entries: None,
            max_size: None,
        }
    }
}

// == Evictor ==
/// Runs eviction batches against a shard's store.
#[derive(Debug, Clone)]
pub struct Evictor {
    settings: EvictionSettings,
    estimator: SizeEstimator,
    rng: SharedRng,
}

impl Evictor {
    pub fn new(settings: EvictionSettings, estimator: SizeEstimator, rng: SharedRng) -> Self {
        Self {
            settings,
            estimator,
            rng,
        }
    }

    pub fn settings(&self) -> &EvictionSettings {
        &self.settings
    }

    /// Whether the shard exceeds a configured entry or size limit.
    pub async fn cache_full(&self, store: &dyn BackingStore) -> StoreResult<bool> {
        if let Some(max_entries) = self.settings.max_entries {
            if store.id_range().await? > max_entries {
                return Ok(true);
            }
        }
        if let Some(max_size) = self.settings.max_size {
            let estimate = self.estimator.moving_average(store).await?;
            if estimate.size > max_size {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Ids of the rows the next batch should delete.
    pub async fn candidates(&self, store: &dyn BackingStore, full: bool) -> StoreResult<Vec<i64>> {
        let limit = self.settings.batch_size * self.settings.over_sample_factor.max(1);
        let rows = match self.settings.policy {
            EvictionPolicy::Age => store.ordered_by_id(limit).await?,
            EvictionPolicy::Lru => store.ordered_by_recency(limit).await?,
        };

        let ids: Vec<i64> = match (full, self.settings.max_age) {
            (true, _) => rows.iter().map(|row| row.id).collect(),
            (false, Some(max_age)) => {
                let cutoff = Utc::now() - max_age;
                rows.iter()
                    .filter(|row| row.at < cutoff)
                    .map(|row| row.id)
                    .collect()
            }
            (false, None) => Vec::new(),
        };

        let sample = {
            let mut rng = self.rng.lock();
            ids.choose_multiple(&mut *rng, self.settings.batch_size)
                .copied()
                .collect()
        };
        Ok(sample)
    }

    /// Runs one batch. Returns the number of rows deleted.
    pub async fn run_batch(&self, store: &dyn BackingStore) -> StoreResult<u64> {
        let full = self.cache_full(store).await?;
        if !full && self.settings.max_age.is_none() {
            return Ok(0);
        }

        let ids = self.candidates(store, full).await?;
        if ids.is_empty() {
            return Ok(0);
        }

        let deleted = store.delete_by_id(&ids).await?;
        debug!(full, candidates = ids.len(), deleted, "eviction batch finished");
        Ok(deleted)
    }
}
