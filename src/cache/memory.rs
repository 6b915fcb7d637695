//! In-Memory Backing Store
//!
//! A [`BackingStore`] holding rows in process memory. It mirrors the table
//! semantics the engine relies on (monotonic ids that are never reused,
//! upsert by key hash, id-ordered scans) and can be told to fail, which makes
//! it the store behind the binary and the test suite.

use std::collections::{BTreeMap, HashMap};
use std::ops::RangeInclusive;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use crate::cache::backing::{BackingStore, OutlierSummary, RowAge, UpdateFn};
use crate::cache::entry::{CacheEntry, NewEntry};
use crate::cache::pattern::KeyPattern;
use crate::error::{StoreError, StoreErrorKind, StoreResult};

#[derive(Debug, Default)]
struct Table {
    /// id -> row, ordered by id
    rows: BTreeMap<i64, CacheEntry>,
    /// key hash -> id
    by_hash: HashMap<i64, i64>,
    next_id: i64,
}

impl Table {
    fn upsert(&mut self, entry: NewEntry, now: DateTime<Utc>) {
        if let Some(id) = self.by_hash.get(&entry.key_hash) {
            if let Some(row) = self.rows.get_mut(id) {
                row.overwrite(entry, now);
                return;
            }
        }
        self.next_id += 1;
        let id = self.next_id;
        self.by_hash.insert(entry.key_hash, id);
        self.rows.insert(id, CacheEntry::from_new(id, entry, now));
    }

    fn remove(&mut self, id: i64) -> bool {
        match self.rows.remove(&id) {
            Some(row) => {
                self.by_hash.remove(&row.key_hash);
                true
            }
            None => false,
        }
    }

    fn touch(&mut self, key_hash: i64, now: DateTime<Utc>) -> Option<&CacheEntry> {
        let id = *self.by_hash.get(&key_hash)?;
        let row = self.rows.get_mut(&id)?;
        row.accessed_at = now;
        Some(row)
    }
}

// == Memory Store ==
#[derive(Debug)]
pub struct MemoryStore {
    name: String,
    table: Mutex<Table>,
    failure: Mutex<Option<StoreErrorKind>>,
}

impl MemoryStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: Mutex::new(Table::default()),
            failure: Mutex::new(None),
        }
    }

    /// Makes every following call fail with `kind` until [`MemoryStore::recover`].
    pub fn fail_with(&self, kind: StoreErrorKind) {
        *self.failure.lock() = Some(kind);
    }

    pub fn recover(&self) {
        *self.failure.lock() = None;
    }

    /// Number of live rows.
    pub fn len(&self) -> usize {
        self.table.lock().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live keys in id order.
    pub fn keys(&self) -> Vec<Vec<u8>> {
        self.table
            .lock()
            .rows
            .values()
            .map(|row| row.key.clone())
            .collect()
    }

    /// Exact sum of every row's byte size.
    pub fn total_byte_size(&self) -> u64 {
        self.table.lock().rows.values().map(|row| row.byte_size).sum()
    }

    /// Moves every row's timestamps `age` into the past.
    pub fn backdate(&self, age: Duration) {
        let mut table = self.table.lock();
        for row in table.rows.values_mut() {
            row.created_at = row.created_at - age;
            row.accessed_at = row.accessed_at - age;
        }
    }

    fn check(&self, operation: &str) -> StoreResult<()> {
        match *self.failure.lock() {
            Some(kind) => Err(StoreError::new(
                kind,
                format!("{} failed on {}", operation, self.name),
            )),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl BackingStore for MemoryStore {
    async fn upsert(&self, rows: Vec<NewEntry>) -> StoreResult<()> {
        self.check("upsert")?;
        let now = Utc::now();
        let mut table = self.table.lock();
        for row in rows {
            table.upsert(row, now);
        }
        Ok(())
    }

    async fn get(&self, key_hash: i64) -> StoreResult<Option<(Vec<u8>, Vec<u8>)>> {
        self.check("get")?;
        let mut table = self.table.lock();
        Ok(table
            .touch(key_hash, Utc::now())
            .map(|row| (row.key.clone(), row.value.clone())))
    }

    async fn get_many(&self, key_hashes: &[i64]) -> StoreResult<Vec<(Vec<u8>, Vec<u8>)>> {
        self.check("get_many")?;
        let now = Utc::now();
        let mut table = self.table.lock();
        Ok(key_hashes
            .iter()
            .filter_map(|hash| {
                table
                    .touch(*hash, now)
                    .map(|row| (row.key.clone(), row.value.clone()))
            })
            .collect())
    }

    async fn delete_by_key_hash(&self, key_hashes: &[i64]) -> StoreResult<u64> {
        self.check("delete_by_key_hash")?;
        let mut table = self.table.lock();
        let mut deleted = 0;
        for hash in key_hashes {
            if let Some(id) = table.by_hash.get(hash).copied() {
                if table.remove(id) {
                    deleted += 1;
                }
            }
        }
        Ok(deleted)
    }

    async fn delete_by_id(&self, ids: &[i64]) -> StoreResult<u64> {
        self.check("delete_by_id")?;
        let mut table = self.table.lock();
        Ok(ids.iter().filter(|id| table.remove(**id)).count() as u64)
    }

    async fn id_range(&self) -> StoreResult<u64> {
        self.check("id_range")?;
        let table = self.table.lock();
        match (table.rows.keys().next(), table.rows.keys().next_back()) {
            (Some(min), Some(max)) => Ok((max - min + 1) as u64),
            _ => Ok(0),
        }
    }

    async fn largest_by_byte_size(&self, n: usize) -> StoreResult<OutlierSummary> {
        self.check("largest_by_byte_size")?;
        let table = self.table.lock();
        let mut sizes: Vec<u64> = table.rows.values().map(|row| row.byte_size).collect();
        sizes.sort_unstable_by(|a, b| b.cmp(a));
        sizes.truncate(n);
        Ok(OutlierSummary {
            sum: sizes.iter().sum(),
            count: sizes.len() as u64,
            min: sizes.last().copied(),
        })
    }

    async fn sum_byte_size_in_key_hash_range(
        &self,
        range: RangeInclusive<i64>,
        max_byte_size: u64,
    ) -> StoreResult<u64> {
        self.check("sum_byte_size_in_key_hash_range")?;
        let table = self.table.lock();
        Ok(table
            .rows
            .values()
            .filter(|row| range.contains(&row.key_hash) && row.byte_size <= max_byte_size)
            .map(|row| row.byte_size)
            .sum())
    }

    async fn ordered_by_id(&self, limit: usize) -> StoreResult<Vec<RowAge>> {
        self.check("ordered_by_id")?;
        let table = self.table.lock();
        Ok(table
            .rows
            .values()
            .take(limit)
            .map(|row| RowAge {
                id: row.id,
                at: row.created_at,
            })
            .collect())
    }

    async fn ordered_by_recency(&self, limit: usize) -> StoreResult<Vec<RowAge>> {
        self.check("ordered_by_recency")?;
        let table = self.table.lock();
        let mut rows: Vec<RowAge> = table
            .rows
            .values()
            .map(|row| RowAge {
                id: row.id,
                at: row.accessed_at,
            })
            .collect();
        rows.sort_by_key(|row| (row.at, row.id));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn clear_all(&self) -> StoreResult<()> {
        self.check("clear_all")?;
        let mut table = self.table.lock();
        table.rows.clear();
        table.by_hash.clear();
        Ok(())
    }

    async fn clear_all_incremental(&self, batch_size: usize) -> StoreResult<()> {
        self.check("clear_all_incremental")?;
        let batch_size = batch_size.max(1);
        loop {
            let mut table = self.table.lock();
            let batch: Vec<i64> = table.rows.keys().take(batch_size).copied().collect();
            if batch.is_empty() {
                return Ok(());
            }
            for id in batch {
                table.remove(id);
            }
        }
    }

    async fn lock_and_write(
        &self,
        key: &[u8],
        key_hash: i64,
        update: UpdateFn,
    ) -> StoreResult<Option<Vec<u8>>> {
        self.check("lock_and_write")?;
        let mut table = self.table.lock();
        let current = table
            .by_hash
            .get(&key_hash)
            .and_then(|id| table.rows.get(id))
            .filter(|row| row.key == key)
            .map(|row| row.value.clone());

        match update(current.as_deref()) {
            Some(entry) => {
                let value = entry.value.clone();
                table.upsert(entry, Utc::now());
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn delete_matching(&self, pattern: &KeyPattern, batch_size: usize) -> StoreResult<u64> {
        self.check("delete_matching")?;
        let batch_size = batch_size.max(1);
        let mut deleted = 0;
        loop {
            let mut table = self.table.lock();
            let batch: Vec<i64> = table
                .rows
                .values()
                .filter(|row| pattern.is_match(&row.key))
                .take(batch_size)
                .map(|row| row.id)
                .collect();
            if batch.is_empty() {
                return Ok(deleted);
            }
            for id in batch {
                if table.remove(id) {
                    deleted += 1;
                }
            }
        }
    }

    async fn oldest_created_at(&self) -> StoreResult<Option<DateTime<Utc>>> {
        self.check("oldest_created_at")?;
        let table = self.table.lock();
        Ok(table.rows.values().next().map(|row| row.created_at))
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::entry::KeyHasher;

    fn entry(key: &str, value: &str) -> NewEntry {
        KeyHasher::new(1024).entry(key, value).unwrap()
    }

    fn hash(key: &str) -> i64 {
        KeyHasher::key_hash(key.as_bytes())
    }

    #[tokio::test]
    async fn test_upsert_and_get() {
        let store = MemoryStore::new("s");
        store.upsert(vec![entry("foo", "1")]).await.unwrap();

        let row = store.get(hash("foo")).await.unwrap();
        assert_eq!(row, Some((b"foo".to_vec(), b"1".to_vec())));
        assert_eq!(store.get(hash("bar")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_overwrite_keeps_id() {
        let store = MemoryStore::new("s");
        store.upsert(vec![entry("a", "1"), entry("b", "1")]).await.unwrap();
        store.upsert(vec![entry("a", "22")]).await.unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(store.keys(), vec![b"a".to_vec(), b"b".to_vec()]);
        assert_eq!(store.id_range().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_ids_are_never_reused() {
        let store = MemoryStore::new("s");
        store.upsert(vec![entry("a", "1"), entry("b", "1")]).await.unwrap();
        store.delete_by_key_hash(&[hash("a"), hash("b")]).await.unwrap();
        store.upsert(vec![entry("a", "1")]).await.unwrap();

        let rows = store.ordered_by_id(10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, 3);
    }

    #[tokio::test]
    async fn test_id_range_spans_gaps() {
        let store = MemoryStore::new("s");
        store
            .upsert(vec![entry("a", "1"), entry("b", "1"), entry("c", "1")])
            .await
            .unwrap();
        store.delete_by_key_hash(&[hash("b")]).await.unwrap();

        assert_eq!(store.id_range().await.unwrap(), 3);
        store.clear_all().await.unwrap();
        assert_eq!(store.id_range().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_by_id_ignores_missing() {
        let store = MemoryStore::new("s");
        store.upsert(vec![entry("a", "1")]).await.unwrap();

        assert_eq!(store.delete_by_id(&[1, 99]).await.unwrap(), 1);
        assert_eq!(store.delete_by_id(&[1]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_largest_by_byte_size() {
        let store = MemoryStore::new("s");
        store
            .upsert(vec![entry("a", "1"), entry("b", "123"), entry("c", "12345")])
            .await
            .unwrap();

        let summary = store.largest_by_byte_size(2).await.unwrap();
        assert_eq!(summary.count, 2);
        assert_eq!(summary.sum, (1 + 5 + 140) + (1 + 3 + 140));
        assert_eq!(summary.min, Some(1 + 3 + 140));

        let empty = MemoryStore::new("e").largest_by_byte_size(2).await.unwrap();
        assert_eq!(empty, OutlierSummary::default());
    }

    #[tokio::test]
    async fn test_sum_in_key_hash_range_honours_cutoff() {
        let store = MemoryStore::new("s");
        store
            .upsert(vec![entry("a", "1"), entry("b", "123456789")])
            .await
            .unwrap();

        let all = store
            .sum_byte_size_in_key_hash_range(i64::MIN..=i64::MAX, u64::MAX)
            .await
            .unwrap();
        assert_eq!(all, store.total_byte_size());

        let small = store
            .sum_byte_size_in_key_hash_range(i64::MIN..=i64::MAX, 142)
            .await
            .unwrap();
        assert_eq!(small, 142);
    }

    #[tokio::test]
    async fn test_ordered_by_recency_follows_reads() {
        let store = MemoryStore::new("s");
        store.upsert(vec![entry("a", "1"), entry("b", "1")]).await.unwrap();
        store.backdate(Duration::minutes(5));
        store.get(hash("a")).await.unwrap();

        let rows = store.ordered_by_recency(2).await.unwrap();
        assert_eq!(rows.iter().map(|r| r.id).collect::<Vec<_>>(), vec![2, 1]);
    }

    #[tokio::test]
    async fn test_lock_and_write_sees_current_value() {
        let store = MemoryStore::new("s");
        store.upsert(vec![entry("n", "41")]).await.unwrap();

        let written = store
            .lock_and_write(
                b"n",
                hash("n"),
                Box::new(|current: Option<&[u8]>| {
                    assert_eq!(current, Some(&b"41"[..]));
                    Some(entry("n", "42"))
                }),
            )
            .await
            .unwrap();

        assert_eq!(written, Some(b"42".to_vec()));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_clear_incremental_and_delete_matching() {
        let store = MemoryStore::new("s");
        let rows = (0..25).map(|i| entry(&format!("user:{}", i), "x")).collect();
        store.upsert(rows).await.unwrap();
        store.upsert(vec![entry("other", "x")]).await.unwrap();

        let pattern = KeyPattern::new("user:%").unwrap();
        assert_eq!(store.delete_matching(&pattern, 10).await.unwrap(), 25);
        assert_eq!(store.keys(), vec![b"other".to_vec()]);

        store.clear_all_incremental(10).await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let store = MemoryStore::new("s");
        store.fail_with(StoreErrorKind::Timeout);

        let err = store.get(hash("a")).await.unwrap_err();
        assert!(err.is_transient());

        store.recover();
        assert!(store.get(hash("a")).await.is_ok());
    }
}
