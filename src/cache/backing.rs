//! Backing Store Port
//!
//! The per-shard storage collaborator. Every shard of every cluster owns one
//! handle; implementations talk to the physical storage engine.

use std::ops::RangeInclusive;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::cache::entry::NewEntry;
use crate::cache::pattern::KeyPattern;
use crate::error::StoreResult;

/// Row id plus the timestamp an eviction policy orders by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowAge {
    pub id: i64,
    pub at: DateTime<Utc>,
}

/// Aggregate over the `n` largest rows by byte size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutlierSummary {
    pub sum: u64,
    pub count: u64,
    /// Smallest byte size among the rows, `None` when the store is empty
    pub min: Option<u64>,
}

/// Read-modify-write callback for [`BackingStore::lock_and_write`].
///
/// Receives the current value of the locked key (if any) and returns the row
/// to write, or `None` to leave the key untouched.
pub type UpdateFn = Box<dyn FnOnce(Option<&[u8]>) -> Option<NewEntry> + Send>;

#[async_trait]
pub trait BackingStore: Send + Sync {
    /// Inserts new rows or replaces value and byte size of existing ones,
    /// matching on key hash.
    async fn upsert(&self, rows: Vec<NewEntry>) -> StoreResult<()>;

    async fn get(&self, key_hash: i64) -> StoreResult<Option<(Vec<u8>, Vec<u8>)>>;

    async fn get_many(&self, key_hashes: &[i64]) -> StoreResult<Vec<(Vec<u8>, Vec<u8>)>>;

    async fn delete_by_key_hash(&self, key_hashes: &[i64]) -> StoreResult<u64>;

    /// Deletes rows by id. Ids that no longer exist are ignored.
    async fn delete_by_id(&self, ids: &[i64]) -> StoreResult<u64>;

    /// `max(id) - min(id) + 1`, or 0 when empty.
    async fn id_range(&self) -> StoreResult<u64>;

    async fn largest_by_byte_size(&self, n: usize) -> StoreResult<OutlierSummary>;

    /// Sum of byte sizes of rows whose key hash lies in `range` and whose
    /// byte size is at most `max_byte_size`.
    async fn sum_byte_size_in_key_hash_range(
        &self,
        range: RangeInclusive<i64>,
        max_byte_size: u64,
    ) -> StoreResult<u64>;

    /// Oldest rows first, with their creation time.
    async fn ordered_by_id(&self, limit: usize) -> StoreResult<Vec<RowAge>>;

    /// Least recently accessed rows first, with their last access time.
    async fn ordered_by_recency(&self, limit: usize) -> StoreResult<Vec<RowAge>>;

    /// Fast truncate.
    async fn clear_all(&self) -> StoreResult<()>;

    /// Deletes every row in batches of `batch_size`.
    async fn clear_all_incremental(&self, batch_size: usize) -> StoreResult<()>;

    /// Locks the row for `key` and writes whatever `update` returns.
    /// Returns the written value.
    async fn lock_and_write(
        &self,
        key: &[u8],
        key_hash: i64,
        update: UpdateFn,
    ) -> StoreResult<Option<Vec<u8>>>;

    /// Deletes rows whose key matches `pattern`, `batch_size` rows at a time.
    async fn delete_matching(&self, pattern: &KeyPattern, batch_size: usize) -> StoreResult<u64>;

    async fn oldest_created_at(&self) -> StoreResult<Option<DateTime<Utc>>>;
}
