//! Cluster Set
//!
//! The caller-facing cache. Holds a primary cluster and any number of
//! secondaries. Writes go to every cluster: the primary runs them inline and
//! its result is what the caller sees, secondaries queue them and their
//! failures are only logged. Reads are served by the primary alone.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::join_all;
use tracing::{info, warn};

use crate::cache::backing::BackingStore;
use crate::cache::cluster::Cluster;
use crate::cache::entry::KeyHasher;
use crate::cache::pattern::KeyPattern;
use crate::cache::router::ShardRouter;
use crate::cache::shared_rng;
use crate::cache::stats::{CacheStats, ReadCounters};
use crate::config::CacheOptions;
use crate::error::{CacheError, Result};

pub struct ClusterSet {
    clusters: Vec<Cluster>,
    hasher: KeyHasher,
    reads: ReadCounters,
}

impl ClusterSet {
    /// Builds every cluster in `options`. `connect` is called once per shard
    /// with the cluster index and shard name, and returns that shard's store.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new<F>(options: CacheOptions, mut connect: F) -> Result<Self>
    where
        F: FnMut(usize, &str) -> Arc<dyn BackingStore>,
    {
        if options.clusters.is_empty() {
            return Err(CacheError::Configuration(
                "at least one cluster is required".to_string(),
            ));
        }

        let rng = shared_rng(options.rng_seed);
        let mut clusters = Vec::with_capacity(options.clusters.len());
        for (index, layout) in options.clusters.iter().enumerate() {
            let router = ShardRouter::new(layout)?;
            let stores = router
                .shard_names()
                .iter()
                .map(|shard| connect(index, shard))
                .collect();
            clusters.push(Cluster::new(index, index > 0, router, stores, &options, &rng)?);
        }

        info!(clusters = clusters.len(), "cluster set ready");
        Ok(Self {
            clusters,
            hasher: options.hasher(),
            reads: ReadCounters::new(),
        })
    }

    pub fn primary(&self) -> &Cluster {
        &self.clusters[0]
    }

    pub fn clusters(&self) -> &[Cluster] {
        &self.clusters
    }

    pub fn hasher(&self) -> KeyHasher {
        self.hasher
    }

    /// Runs `op` on the primary, then on every secondary. Only the primary's
    /// result reaches the caller.
    async fn replicate<'a, T, F, Fut>(&'a self, method: &'static str, op: F) -> Result<T>
    where
        F: Fn(&'a Cluster) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let result = op(self.primary()).await;
        for cluster in &self.clusters[1..] {
            if let Err(e) = op(cluster).await {
                warn!(cluster = cluster.index(), method, error = %e, "secondary cluster failed");
            }
        }
        result
    }

    // == Reads ==
    pub async fn get(&self, key: impl AsRef<[u8]>) -> Result<Option<Vec<u8>>> {
        let key = key.as_ref();
        self.hasher.validate(key)?;
        let value = self.primary().get(key).await?;
        match value {
            Some(_) => self.reads.record_hit(),
            None => self.reads.record_miss(),
        }
        Ok(value)
    }

    pub async fn get_many(&self, keys: &[Vec<u8>]) -> Result<HashMap<Vec<u8>, Vec<u8>>> {
        for key in keys {
            self.hasher.validate(key)?;
        }
        let found = self.primary().get_many(keys).await?;
        let hits = found.len() as u64;
        self.reads
            .record(hits, (keys.len() as u64).saturating_sub(hits));
        Ok(found)
    }

    // == Writes ==
    pub async fn set(&self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Result<bool> {
        self.set_many(vec![(key.into(), value.into())]).await
    }

    pub async fn set_many(&self, entries: Vec<(Vec<u8>, Vec<u8>)>) -> Result<bool> {
        let rows = entries
            .into_iter()
            .map(|(key, value)| self.hasher.entry(key, value))
            .collect::<Result<Vec<_>>>()?;
        if rows.is_empty() {
            return Ok(true);
        }
        self.replicate("set_many", |cluster| cluster.write(rows.clone()))
            .await
    }

    pub async fn delete(&self, key: impl AsRef<[u8]>) -> Result<bool> {
        let deleted = self.delete_many(&[key.as_ref().to_vec()]).await?;
        Ok(deleted > 0)
    }

    /// Returns how many of `keys` the primary deleted.
    pub async fn delete_many(&self, keys: &[Vec<u8>]) -> Result<u64> {
        for key in keys {
            self.hasher.validate(key)?;
        }
        if keys.is_empty() {
            return Ok(0);
        }
        self.replicate("delete_many", |cluster| cluster.delete_many(keys))
            .await
    }

    /// Adds `amount` to the integer at `key`, starting from 0 when missing.
    /// Returns the new value, or `None` when the store failed transiently.
    pub async fn increment(&self, key: impl AsRef<[u8]>, amount: i64) -> Result<Option<i64>> {
        let key = key.as_ref();
        self.hasher.validate(key)?;
        self.replicate("increment", |cluster| cluster.increment(key.to_vec(), amount))
            .await
    }

    pub async fn decrement(&self, key: impl AsRef<[u8]>, amount: i64) -> Result<Option<i64>> {
        let amount = amount.checked_neg().ok_or_else(|| {
            CacheError::InvalidRequest(format!("Cannot decrement by {}", amount))
        })?;
        self.increment(key, amount).await
    }

    pub async fn clear(&self) -> Result<()> {
        self.replicate("clear", |cluster| cluster.clear()).await
    }

    /// Deletes every key matching a `LIKE` pattern. Returns the number of
    /// rows the primary deleted.
    pub async fn delete_matched(&self, pattern: &str) -> Result<u64> {
        let pattern = KeyPattern::new(pattern)?;
        self.replicate("delete_matched", |cluster| cluster.delete_matched(&pattern))
            .await
    }

    // == Maintenance ==
    /// Primary errors are returned. A secondary whose stats cannot be read
    /// is logged and left out of the snapshot.
    pub async fn stats(&self) -> Result<CacheStats> {
        let mut clusters = vec![self.primary().stats().await?];
        for cluster in &self.clusters[1..] {
            match cluster.stats().await {
                Ok(stats) => clusters.push(stats),
                Err(e) => {
                    warn!(cluster = cluster.index(), error = %e, "secondary stats unavailable");
                }
            }
        }
        Ok(self.reads.snapshot(clusters))
    }

    /// Waits until every cluster has applied its queued work.
    pub async fn drain(&self) {
        join_all(self.clusters.iter().map(Cluster::drain)).await;
    }

    /// Finishes queued work and stops every worker.
    pub async fn shutdown(self) {
        join_all(self.clusters.into_iter().map(Cluster::shutdown)).await;
        info!("cluster set stopped");
    }
}
