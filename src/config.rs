//! Configuration Module
//!
//! Loads server configuration from environment variables and derives the
//! engine-facing [`CacheOptions`] from it.

use std::env;
use std::fmt;
use std::str::FromStr;

use chrono::Duration;

use crate::cache::cluster::{ClearMode, DEFAULT_DELETE_MATCHED_BATCH_SIZE};
use crate::cache::entry::KeyHasher;
use crate::cache::eviction::{
    EvictionPolicy, EvictionSettings, DEFAULT_BATCH_SIZE, DEFAULT_MAX_AGE_SECS,
    DEFAULT_OVER_SAMPLE_FACTOR, DEFAULT_PRESSURE_MULTIPLIER,
};
use crate::cache::failsafe::{log_error_handler, ErrorHandler};
use crate::cache::router::ShardLayout;
use crate::cache::size::DEFAULT_SAMPLES;
use crate::cache::MAX_KEY_LENGTH;
use crate::error::{CacheError, Result};
use crate::tasks::DEFAULT_CAPACITY;

/// Server configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port
    pub server_port: u16,
    /// Clusters separated by `;`, shards within a cluster by `,`
    pub clusters: String,
    pub eviction_batch_size: usize,
    pub pressure_multiplier: f64,
    pub over_sample_factor: usize,
    pub eviction_policy: EvictionPolicy,
    /// Zero disables age based eviction
    pub max_age_secs: u64,
    pub max_entries: Option<u64>,
    /// Estimated payload bytes per shard
    pub max_size: Option<u64>,
    pub size_estimate_samples: usize,
    pub max_key_bytes: usize,
    pub clear_with: ClearMode,
    pub executor_capacity: usize,
    pub rng_seed: Option<u64>,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    /// - `CLUSTERS` - shard layout, e.g. `a,b;c` (default: `shard0`)
    /// - `EVICTION_BATCH_SIZE` - rows per eviction batch (default: 100)
    /// - `PRESSURE_MULTIPLIER` - eviction pressure per write (default: 1.25)
    /// - `OVER_SAMPLE_FACTOR` - candidate rows per evicted row (default: 3)
    /// - `EVICTION_POLICY` - `age` or `lru` (default: age)
    /// - `MAX_AGE_SECS` - evict rows older than this (default: two weeks)
    /// - `MAX_ENTRIES` / `MAX_SIZE` - per shard limits (default: none)
    /// - `SIZE_ESTIMATE_SAMPLES` - size estimator sample count (default: 10000)
    /// - `MAX_KEY_BYTES` - longest accepted key (default: 1024)
    /// - `CLEAR_WITH` - `truncate` or `delete` (default: truncate)
    /// - `EXECUTOR_CAPACITY` - background queue length (default: 100)
    /// - `RNG_SEED` - seed for sampling and eviction jitter (default: random)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            server_port: env_or("SERVER_PORT", defaults.server_port),
            clusters: env::var("CLUSTERS").unwrap_or(defaults.clusters),
            eviction_batch_size: env_or("EVICTION_BATCH_SIZE", defaults.eviction_batch_size),
            pressure_multiplier: env_or("PRESSURE_MULTIPLIER", defaults.pressure_multiplier),
            over_sample_factor: env_or("OVER_SAMPLE_FACTOR", defaults.over_sample_factor),
            eviction_policy: env_or("EVICTION_POLICY", defaults.eviction_policy),
            max_age_secs: env_or("MAX_AGE_SECS", defaults.max_age_secs),
            max_entries: env_opt("MAX_ENTRIES"),
            max_size: env_opt("MAX_SIZE"),
            size_estimate_samples: env_or("SIZE_ESTIMATE_SAMPLES", defaults.size_estimate_samples),
            max_key_bytes: env_or("MAX_KEY_BYTES", defaults.max_key_bytes),
            clear_with: env_or("CLEAR_WITH", defaults.clear_with),
            executor_capacity: env_or("EXECUTOR_CAPACITY", defaults.executor_capacity),
            rng_seed: env_opt("RNG_SEED"),
        }
    }

    /// Parses the cluster layout and builds the engine options.
    pub fn cache_options(&self) -> Result<CacheOptions> {
        let clusters = self
            .clusters
            .split(';')
            .filter(|cluster| !cluster.trim().is_empty())
            .map(ShardLayout::parse)
            .collect::<Result<Vec<_>>>()?;
        if clusters.is_empty() {
            return Err(CacheError::Configuration(
                "CLUSTERS must name at least one shard".to_string(),
            ));
        }

        let max_age = match self.max_age_secs {
            0 => None,
            secs => Some(Duration::seconds(i64::try_from(secs).map_err(|_| {
                CacheError::Configuration(format!("MAX_AGE_SECS {} is too large", secs))
            })?)),
        };

        Ok(CacheOptions {
            clusters,
            eviction: EvictionSettings {
                policy: self.eviction_policy,
                batch_size: self.eviction_batch_size,
                over_sample_factor: self.over_sample_factor,
                max_age,
                max_entries: self.max_entries,
                max_size: self.max_size,
            },
            pressure_multiplier: self.pressure_multiplier,
            size_estimate_samples: self.size_estimate_samples,
            max_key_bytesize: self.max_key_bytes,
            clear_mode: self.clear_with,
            executor_capacity: self.executor_capacity,
            rng_seed: self.rng_seed,
            ..CacheOptions::default()
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_port: 3000,
            clusters: "shard0".to_string(),
            eviction_batch_size: DEFAULT_BATCH_SIZE,
            pressure_multiplier: DEFAULT_PRESSURE_MULTIPLIER,
            over_sample_factor: DEFAULT_OVER_SAMPLE_FACTOR,
            eviction_policy: EvictionPolicy::Age,
            max_age_secs: DEFAULT_MAX_AGE_SECS as u64,
            max_entries: None,
            max_size: None,
            size_estimate_samples: DEFAULT_SAMPLES,
            max_key_bytes: MAX_KEY_LENGTH,
            clear_with: ClearMode::Truncate,
            executor_capacity: DEFAULT_CAPACITY,
            rng_seed: None,
        }
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env_opt(name).unwrap_or(default)
}

fn env_opt<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

// == Cache Options ==
/// Construction-time settings of a [`ClusterSet`](crate::cache::ClusterSet).
#[derive(Clone)]
pub struct CacheOptions {
    /// One layout per cluster; the first is the primary
    pub clusters: Vec<ShardLayout>,
    pub eviction: EvictionSettings,
    pub pressure_multiplier: f64,
    pub size_estimate_samples: usize,
    pub max_key_bytesize: usize,
    pub clear_mode: ClearMode,
    pub delete_matched_batch_size: usize,
    pub executor_capacity: usize,
    pub rng_seed: Option<u64>,
    /// Called for every transient store failure the failsafe layer swallows
    pub error_handler: ErrorHandler,
}

impl CacheOptions {
    pub fn hasher(&self) -> KeyHasher {
        KeyHasher::new(self.max_key_bytesize)
    }
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            clusters: vec![ShardLayout::Shards(vec!["shard0".to_string()])],
            eviction: EvictionSettings::default(),
            pressure_multiplier: DEFAULT_PRESSURE_MULTIPLIER,
            size_estimate_samples: DEFAULT_SAMPLES,
            max_key_bytesize: MAX_KEY_LENGTH,
            clear_mode: ClearMode::Truncate,
            delete_matched_batch_size: DEFAULT_DELETE_MATCHED_BATCH_SIZE,
            executor_capacity: DEFAULT_CAPACITY,
            rng_seed: None,
            error_handler: log_error_handler(),
        }
    }
}

impl fmt::Debug for CacheOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheOptions")
            .field("clusters", &self.clusters)
            .field("eviction", &self.eviction)
            .field("pressure_multiplier", &self.pressure_multiplier)
            .field("size_estimate_samples", &self.size_estimate_samples)
            .field("max_key_bytesize", &self.max_key_bytesize)
            .field("clear_mode", &self.clear_mode)
            .field("delete_matched_batch_size", &self.delete_matched_batch_size)
            .field("executor_capacity", &self.executor_capacity)
            .field("rng_seed", &self.rng_seed)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.server_port, 3000);
        assert_eq!(config.clusters, "shard0");
        assert_eq!(config.eviction_batch_size, 100);
        assert_eq!(config.pressure_multiplier, 1.25);
        assert_eq!(config.max_age_secs, 1_209_600);
        assert_eq!(config.max_key_bytes, 1024);
    }

    #[test]
    fn test_config_from_env() {
        env::set_var("CLUSTERS", "a,b;c");
        env::set_var("EVICTION_POLICY", "lru");
        env::set_var("MAX_ENTRIES", "5000");
        env::set_var("RNG_SEED", "not a number");

        let config = Config::from_env();
        assert_eq!(config.clusters, "a,b;c");
        assert_eq!(config.eviction_policy, EvictionPolicy::Lru);
        assert_eq!(config.max_entries, Some(5000));
        assert_eq!(config.rng_seed, None);

        env::remove_var("CLUSTERS");
        env::remove_var("EVICTION_POLICY");
        env::remove_var("MAX_ENTRIES");
        env::remove_var("RNG_SEED");
    }

    #[test]
    fn test_cache_options_from_config() {
        let config = Config {
            clusters: "a,b; c ;".to_string(),
            max_age_secs: 0,
            clear_with: ClearMode::Delete,
            ..Config::default()
        };

        let options = config.cache_options().unwrap();
        assert_eq!(
            options.clusters,
            vec![
                ShardLayout::Shards(vec!["a".to_string(), "b".to_string()]),
                ShardLayout::Shards(vec!["c".to_string()]),
            ]
        );
        assert_eq!(options.eviction.max_age, None);
        assert_eq!(options.clear_mode, ClearMode::Delete);
    }

    #[test]
    fn test_cache_options_rejects_empty_layout() {
        let config = Config {
            clusters: " ; ".to_string(),
            ..Config::default()
        };
        assert!(matches!(
            config.cache_options(),
            Err(CacheError::Configuration(_))
        ));
    }
}
