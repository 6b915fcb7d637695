//! Cache Size Estimation
//!
//! Every row stores its byte size, so the total could be summed directly, but
//! that is a full scan. Instead:
//!
//! - The N largest rows (there is an index on byte size) are summed exactly.
//!   These are the outliers, and the smallest of them is the cutoff for the
//!   rest of the sample.
//! - Key hashes are uniform over the i64 domain, so the byte sizes of rows in
//!   a random key hash sub-range (excluding rows above the cutoff) are a
//!   sample of the remaining rows. The sub-range covers the fraction
//!   `F = N / (R - N)` of the domain, where `R = max(id) - min(id) + 1`
//!   approximates the row count because rows are deleted in id order.
//! - The sampled sum divided by `F` estimates the non-outlier size.
//!
//! ```text
//! OC  = min(byte_size of N largest rows)
//! OS  = sum(byte_size of N largest rows)
//! F   = min(N / (R - N), 1)
//! NSS = sum(byte_size of rows in K1..=K2 with byte_size <= OC)
//! ES  = OS + NSS / F
//! ```
//!
//! To damp the variance, raw estimates go through a moving average whose
//! history is stored in the cache itself.

use std::ops::RangeInclusive;

use rand::Rng;
use serde::Serialize;

use crate::cache::backing::BackingStore;
use crate::cache::entry::KeyHasher;
use crate::cache::SharedRng;
use crate::error::StoreResult;

/// Default number of outlier rows (and target sample rows).
pub const DEFAULT_SAMPLES: usize = 10_000;

/// Reserved key holding previous estimates, `|` separated.
pub const ESTIMATES_KEY: &str = "__shardcache_size_estimates";

pub const MAX_RETAINED_ESTIMATES: usize = 50;

/// Fraction of the table the retained estimates should cover between them.
pub const TARGET_SAMPLED_FRACTION: f64 = 0.0005;

/// Width of the key hash domain (2^64).
const KEY_HASH_DOMAIN: f64 = 18_446_744_073_709_551_616.0;

/// A single estimate of one shard's payload size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SizeEstimate {
    /// Estimated sum of byte sizes
    pub size: u64,
    /// True when no sampling was involved
    pub exact: bool,
    /// Row count estimate the sample was scaled by
    pub id_range: u64,
}

// == Size Estimator ==
#[derive(Clone)]
pub struct SizeEstimator {
    samples: usize,
    rng: SharedRng,
}

impl SizeEstimator {
    pub fn new(samples: usize, rng: SharedRng) -> Self {
        Self {
            samples: samples.max(1),
            rng,
        }
    }

    pub fn samples(&self) -> usize {
        self.samples
    }

    /// One raw estimate, without touching the history.
    pub async fn estimate(&self, store: &dyn BackingStore) -> StoreResult<SizeEstimate> {
        let samples = self.samples as u64;
        let outliers = store.largest_by_byte_size(self.samples).await?;
        let id_range = store.id_range().await?;

        // Fewer rows than samples: the outliers are the whole table.
        if outliers.count < samples {
            return Ok(SizeEstimate {
                size: outliers.sum,
                exact: true,
                id_range,
            });
        }

        let fraction = sampled_fraction(samples, id_range);
        let mut size = outliers.sum;
        if fraction > 0.0 {
            if let Some(cutoff) = outliers.min {
                let range = self.sample_range(fraction);
                let sampled = store.sum_byte_size_in_key_hash_range(range, cutoff).await?;
                size += (sampled as f64 / fraction).round() as u64;
            }
        }

        Ok(SizeEstimate {
            size,
            exact: fraction == 0.0 || fraction >= 1.0,
            id_range,
        })
    }

    /// A raw estimate averaged with the retained history, which is written
    /// back under [`ESTIMATES_KEY`].
    pub async fn moving_average(&self, store: &dyn BackingStore) -> StoreResult<SizeEstimate> {
        let estimate = self.estimate(store).await?;
        let previous = read_history(store).await?;
        let retained = retained_estimates(estimate.id_range, self.samples as u64);
        let values = push_estimate(previous, estimate.size, retained);

        let history = values
            .iter()
            .map(u64::to_string)
            .collect::<Vec<_>>()
            .join("|");
        store
            .upsert(vec![KeyHasher::row(
                ESTIMATES_KEY.as_bytes().to_vec(),
                history.into_bytes(),
            )])
            .await?;

        Ok(SizeEstimate {
            size: mean(&values),
            ..estimate
        })
    }

    /// A random contiguous key hash range covering `fraction` of the domain.
    fn sample_range(&self, fraction: f64) -> RangeInclusive<i64> {
        if fraction >= 1.0 {
            return i64::MIN..=i64::MAX;
        }
        let width = (KEY_HASH_DOMAIN * fraction) as i128;
        let start = self
            .rng
            .lock()
            .gen_range(i64::MIN as i128..=i64::MAX as i128 - width);
        (start as i64)..=((start + width) as i64)
    }
}

impl std::fmt::Debug for SizeEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SizeEstimator")
            .field("samples", &self.samples)
            .finish()
    }
}

fn sampled_fraction(samples: u64, id_range: u64) -> f64 {
    if id_range <= samples {
        0.0
    } else {
        (samples as f64 / (id_range - samples) as f64).min(1.0)
    }
}

fn retained_estimates(id_range: u64, samples: u64) -> usize {
    let for_target = ((id_range / samples) as f64 * TARGET_SAMPLED_FRACTION).floor() as usize + 1;
    for_target.min(MAX_RETAINED_ESTIMATES)
}

fn push_estimate(mut values: Vec<u64>, latest: u64, retained: usize) -> Vec<u64> {
    values.push(latest);
    let excess = values.len().saturating_sub(retained);
    values.drain(..excess);
    values
}

fn mean(values: &[u64]) -> u64 {
    if values.is_empty() {
        return 0;
    }
    (values.iter().sum::<u64>() as f64 / values.len() as f64).round() as u64
}

async fn read_history(store: &dyn BackingStore) -> StoreResult<Vec<u64>> {
    let key = ESTIMATES_KEY.as_bytes();
    let history = match store.get(KeyHasher::key_hash(key)).await? {
        Some((stored_key, value)) if stored_key == key => value,
        _ => return Ok(Vec::new()),
    };
    Ok(String::from_utf8_lossy(&history)
        .split('|')
        .filter_map(|value| value.parse().ok())
        .collect())
}
