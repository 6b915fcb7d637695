//! Cluster
//!
//! One redundant copy of the cache: a shard router, one backing store and one
//! eviction controller per shard, and a background executor. A synchronous
//! cluster runs writes inline; an asynchronous one queues every side effect
//! on its executor and only serves reads inline.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cache::backing::{BackingStore, UpdateFn};
use crate::cache::entry::{KeyHasher, NewEntry};
use crate::cache::eviction::{EvictionController, Evictor};
use crate::cache::failsafe::Failsafe;
use crate::cache::pattern::KeyPattern;
use crate::cache::router::ShardRouter;
use crate::cache::size::SizeEstimator;
use crate::cache::stats::{ClusterStats, ShardStats};
use crate::cache::SharedRng;
use crate::config::CacheOptions;
use crate::error::{CacheError, Result, StoreError};
use crate::tasks::{AsyncExecutor, TaskHandler, TaskSubmitter};

/// Rows deleted per statement by `delete_matched`.
pub const DEFAULT_DELETE_MATCHED_BATCH_SIZE: usize = 1000;

/// Rows deleted per statement by an incremental clear.
const CLEAR_BATCH_SIZE: usize = 1000;

// == Clear Mode ==
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClearMode {
    /// Drop every row at once
    #[default]
    Truncate,
    /// Delete rows in batches
    Delete,
}

impl FromStr for ClearMode {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "truncate" => Ok(Self::Truncate),
            "delete" => Ok(Self::Delete),
            other => Err(CacheError::Configuration(format!(
                "unknown clear mode '{}'",
                other
            ))),
        }
    }
}

// == Shard ==
pub struct Shard {
    name: String,
    store: Arc<dyn BackingStore>,
    eviction: EvictionController,
}

impl Shard {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn store(&self) -> &Arc<dyn BackingStore> {
        &self.store
    }

    pub fn eviction(&self) -> &EvictionController {
        &self.eviction
    }
}

// == Background Tasks ==
/// A side effect to apply to one shard.
#[derive(Debug, Clone)]
pub enum Operation {
    Upsert(Vec<NewEntry>),
    DeleteKeyHashes(Vec<i64>),
    Increment { key: Vec<u8>, amount: i64 },
    Clear(ClearMode),
    DeleteMatching { pattern: KeyPattern, batch_size: usize },
    Evict,
}

/// Unit of work queued on a cluster's executor. The shard is fixed when
/// the task is submitted.
#[derive(Debug, Clone)]
pub struct Task {
    pub shard: usize,
    pub operation: Operation,
}

// == Cluster Core ==
/// Shard-level operations, shared by callers and the background worker.
struct ClusterCore {
    index: usize,
    shards: Vec<Shard>,
    evictor: Evictor,
    failsafe: Failsafe,
    submitter: TaskSubmitter<Task>,
}

impl ClusterCore {
    fn shard(&self, index: usize) -> Result<&Shard> {
        self.shards
            .get(index)
            .ok_or_else(|| CacheError::UnknownShard(index.to_string()))
    }

    /// Adds write pressure and queues the eviction batches it triggers.
    fn record_writes(&self, shard: &Shard, index: usize, count: usize) {
        for _ in 0..shard.eviction.record_writes(count) {
            let queued = self.submitter.submit(Task {
                shard: index,
                operation: Operation::Evict,
            });
            if !queued {
                debug!(cluster = self.index, shard = %shard.name, "eviction batch discarded");
            }
        }
    }

    async fn write(&self, index: usize, rows: Vec<NewEntry>) -> Result<bool> {
        let shard = self.shard(index)?;
        let count = rows.len();
        let written = self
            .failsafe
            .run("set", false, async {
                shard.store.upsert(rows).await.map(|()| true)
            })
            .await?;
        if written {
            self.record_writes(shard, index, count);
        }
        Ok(written)
    }

    async fn delete(&self, index: usize, key_hashes: &[i64]) -> Result<u64> {
        let shard = self.shard(index)?;
        self.failsafe
            .run("delete", 0, shard.store.delete_by_key_hash(key_hashes))
            .await
    }

    async fn increment(&self, index: usize, key: Vec<u8>, amount: i64) -> Result<Option<i64>> {
        let shard = self.shard(index)?;
        let key_hash = KeyHasher::key_hash(&key);
        let not_a_number = Arc::new(AtomicBool::new(false));

        let flag = not_a_number.clone();
        let row_key = key.clone();
        let update: UpdateFn = Box::new(move |current: Option<&[u8]>| {
            match next_counter_value(current, amount) {
                Some(next) => Some(KeyHasher::row(row_key, next.to_string().into_bytes())),
                None => {
                    flag.store(true, Ordering::Relaxed);
                    None
                }
            }
        });

        let written = self
            .failsafe
            .run("increment", None, shard.store.lock_and_write(&key, key_hash, update))
            .await?;
        if not_a_number.load(Ordering::Relaxed) {
            return Err(CacheError::InvalidRequest(format!(
                "Value of '{}' is not an integer or would overflow",
                String::from_utf8_lossy(&key)
            )));
        }

        match written {
            Some(value) => {
                self.record_writes(shard, index, 1);
                Ok(parse_counter(&value))
            }
            None => Ok(None),
        }
    }

    async fn clear(&self, index: usize, mode: ClearMode) -> Result<()> {
        let shard = self.shard(index)?;
        match mode {
            ClearMode::Truncate => self.failsafe.run("clear", (), shard.store.clear_all()).await,
            ClearMode::Delete => {
                self.failsafe
                    .run("clear", (), shard.store.clear_all_incremental(CLEAR_BATCH_SIZE))
                    .await
            }
        }
    }

    async fn delete_matching(
        &self,
        index: usize,
        pattern: &KeyPattern,
        batch_size: usize,
    ) -> Result<u64> {
        let shard = self.shard(index)?;
        self.failsafe
            .run("delete_matched", 0, shard.store.delete_matching(pattern, batch_size))
            .await
    }

    async fn evict(&self, index: usize) -> Result<u64> {
        let shard = self.shard(index)?;
        let evicted = self
            .failsafe
            .run("evict", 0, self.evictor.run_batch(shard.store.as_ref()))
            .await?;
        shard.eviction.record_batch(evicted);
        if evicted > 0 {
            debug!(cluster = self.index, shard = %shard.name, evicted, "evicted rows");
        }
        Ok(evicted)
    }

    async fn shard_stats(&self, shard: &Shard) -> Result<ShardStats> {
        let (entries, oldest) = self
            .failsafe
            .run("stats", (None, None), async {
                let entries = shard.store.id_range().await?;
                let oldest = shard.store.oldest_created_at().await?;
                Ok::<_, StoreError>((Some(entries), oldest))
            })
            .await?;

        let settings = self.evictor.settings();
        Ok(ShardStats {
            shard: shard.name.clone(),
            max_age: settings.max_age.map(|age| age.num_seconds()),
            oldest_age: oldest.map(|created| (Utc::now() - created).num_seconds()),
            max_entries: settings.max_entries,
            entries,
            eviction: shard.eviction.stats(),
        })
    }
}

#[async_trait]
impl TaskHandler<Task> for ClusterCore {
    async fn handle(&self, task: Task) -> Result<()> {
        let Task { shard, operation } = task;
        match operation {
            Operation::Upsert(rows) => {
                self.write(shard, rows).await?;
            }
            Operation::DeleteKeyHashes(key_hashes) => {
                self.delete(shard, &key_hashes).await?;
            }
            Operation::Increment { key, amount } => {
                self.increment(shard, key, amount).await?;
            }
            Operation::Clear(mode) => self.clear(shard, mode).await?,
            Operation::DeleteMatching {
                pattern,
                batch_size,
            } => {
                self.delete_matching(shard, &pattern, batch_size).await?;
            }
            Operation::Evict => {
                self.evict(shard).await?;
            }
        }
        Ok(())
    }
}

/// Current counter value plus `amount`. A missing value counts as zero.
fn next_counter_value(current: Option<&[u8]>, amount: i64) -> Option<i64> {
    let current = match current {
        Some(bytes) => parse_counter(bytes)?,
        None => 0,
    };
    current.checked_add(amount)
}

fn parse_counter(bytes: &[u8]) -> Option<i64> {
    std::str::from_utf8(bytes).ok()?.trim().parse().ok()
}

// == Cluster ==
pub struct Cluster {
    index: usize,
    asynchronous: bool,
    router: ShardRouter,
    core: Arc<ClusterCore>,
    executor: AsyncExecutor<Task>,
    clear_mode: ClearMode,
    delete_matched_batch_size: usize,
}

impl Cluster {
    /// Builds a cluster over one store per shard, in router order.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        index: usize,
        asynchronous: bool,
        router: ShardRouter,
        stores: Vec<Arc<dyn BackingStore>>,
        options: &CacheOptions,
        rng: &SharedRng,
    ) -> Result<Self> {
        if stores.len() != router.len() {
            return Err(CacheError::Configuration(format!(
                "cluster {} has {} shards but {} stores",
                index,
                router.len(),
                stores.len()
            )));
        }

        let mut shards = Vec::with_capacity(stores.len());
        for (name, store) in router.shard_names().iter().zip(stores) {
            shards.push(Shard {
                name: name.clone(),
                store,
                eviction: EvictionController::new(
                    options.eviction.batch_size,
                    options.pressure_multiplier,
                    rng,
                )?,
            });
        }

        let evictor = Evictor::new(
            options.eviction.clone(),
            SizeEstimator::new(options.size_estimate_samples, rng.clone()),
            rng.clone(),
        );
        let failsafe = Failsafe::new(options.error_handler.clone());

        let (executor, core) = AsyncExecutor::<Task>::start(
            format!("cluster{}", index),
            options.executor_capacity,
            |submitter| ClusterCore {
                index,
                shards,
                evictor,
                failsafe,
                submitter,
            },
        );

        info!(
            cluster = index,
            asynchronous,
            shards = ?router.shard_names(),
            "cluster ready"
        );

        Ok(Self {
            index,
            asynchronous,
            router,
            core,
            executor,
            clear_mode: options.clear_mode,
            delete_matched_batch_size: options.delete_matched_batch_size.max(1),
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn is_asynchronous(&self) -> bool {
        self.asynchronous
    }

    pub fn router(&self) -> &ShardRouter {
        &self.router
    }

    pub fn shards(&self) -> &[Shard] {
        &self.core.shards
    }

    /// Queues one task per shard. Returns false if any was discarded.
    fn submit_all(&self, tasks: impl IntoIterator<Item = Task>) -> bool {
        tasks
            .into_iter()
            .fold(true, |queued, task| self.executor.submit(task) && queued)
    }

    /// Upserts `rows`, split by shard.
    pub async fn write(&self, rows: Vec<NewEntry>) -> Result<bool> {
        let groups = self.router.partition(rows, |row| row.key.as_slice());
        if self.asynchronous {
            return Ok(self.submit_all(groups.into_iter().map(|(shard, rows)| Task {
                shard,
                operation: Operation::Upsert(rows),
            })));
        }

        let written = try_join_all(
            groups
                .into_iter()
                .map(|(shard, rows)| self.core.write(shard, rows)),
        )
        .await?;
        Ok(written.into_iter().all(|ok| ok))
    }

    pub async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let shard = self.core.shard(self.router.shard_for(key))?;
        let row = self
            .core
            .failsafe
            .run("get", None, shard.store.get(KeyHasher::key_hash(key)))
            .await?;
        Ok(row.and_then(|(stored, value)| (stored == key).then_some(value)))
    }

    /// Values of the keys found. A shard that fails transiently contributes
    /// nothing.
    pub async fn get_many(&self, keys: &[Vec<u8>]) -> Result<HashMap<Vec<u8>, Vec<u8>>> {
        let groups = self.router.partition(keys.iter(), |key| key.as_slice());
        let per_shard = try_join_all(groups.into_iter().map(|(index, group)| async move {
            let shard = self.core.shard(index)?;
            let hashes: Vec<i64> = group.iter().map(|key| KeyHasher::key_hash(key)).collect();
            let rows = self
                .core
                .failsafe
                .run("get_many", Vec::new(), shard.store.get_many(&hashes))
                .await?;
            Ok::<_, CacheError>(
                rows.into_iter()
                    .filter(|(key, _)| group.iter().any(|wanted| *wanted == key))
                    .collect::<Vec<_>>(),
            )
        }))
        .await?;

        Ok(per_shard.into_iter().flatten().collect())
    }

    /// Deletes `keys`, returning how many rows were removed.
    pub async fn delete_many(&self, keys: &[Vec<u8>]) -> Result<u64> {
        let groups: Vec<(usize, Vec<i64>)> = self
            .router
            .partition(keys.iter(), |key| key.as_slice())
            .into_iter()
            .map(|(shard, group)| {
                (
                    shard,
                    group.iter().map(|key| KeyHasher::key_hash(key)).collect(),
                )
            })
            .collect();

        if self.asynchronous {
            self.submit_all(groups.into_iter().map(|(shard, key_hashes)| Task {
                shard,
                operation: Operation::DeleteKeyHashes(key_hashes),
            }));
            return Ok(0);
        }

        let deleted = try_join_all(
            groups
                .iter()
                .map(|(shard, key_hashes)| self.core.delete(*shard, key_hashes)),
        )
        .await?;
        Ok(deleted.into_iter().sum())
    }

    /// Adds `amount` to the integer stored at `key` and returns the result.
    pub async fn increment(&self, key: Vec<u8>, amount: i64) -> Result<Option<i64>> {
        let shard = self.router.shard_for(&key);
        if self.asynchronous {
            self.executor.submit(Task {
                shard,
                operation: Operation::Increment { key, amount },
            });
            return Ok(None);
        }
        self.core.increment(shard, key, amount).await
    }

    pub async fn clear(&self) -> Result<()> {
        let mode = self.clear_mode;
        if self.asynchronous {
            self.submit_all((0..self.router.len()).map(|shard| Task {
                shard,
                operation: Operation::Clear(mode),
            }));
            return Ok(());
        }
        try_join_all((0..self.router.len()).map(|shard| self.core.clear(shard, mode))).await?;
        Ok(())
    }

    /// Deletes every key matching `pattern` on every shard.
    pub async fn delete_matched(&self, pattern: &KeyPattern) -> Result<u64> {
        let batch_size = self.delete_matched_batch_size;
        if self.asynchronous {
            self.submit_all((0..self.router.len()).map(|shard| Task {
                shard,
                operation: Operation::DeleteMatching {
                    pattern: pattern.clone(),
                    batch_size,
                },
            }));
            return Ok(0);
        }

        let deleted = try_join_all(
            (0..self.router.len()).map(|shard| self.core.delete_matching(shard, pattern, batch_size)),
        )
        .await?;
        Ok(deleted.into_iter().sum())
    }

    pub async fn stats(&self) -> Result<ClusterStats> {
        let shards = try_join_all(
            self.core
                .shards
                .iter()
                .map(|shard| self.core.shard_stats(shard)),
        )
        .await?;

        Ok(ClusterStats {
            cluster: self.index,
            asynchronous: self.asynchronous,
            shards,
            executor: self.executor.stats(),
            failures_handled: self.core.failsafe.handled_count(),
        })
    }

    /// Waits for queued work to finish, including eviction batches that the
    /// queued work scheduled.
    pub async fn drain(&self) {
        loop {
            let accepted = self.executor.stats().accepted;
            self.executor.drain().await;
            if self.executor.stats().accepted == accepted {
                return;
            }
        }
    }

    pub async fn shutdown(self) {
        self.drain().await;
        self.executor.shutdown().await;
        info!(cluster = self.index, "cluster stopped");
    }
}
