//! Cache Entry Module
//!
//! Defines cache rows and the [`KeyHasher`] that derives their key hash and
//! estimated byte size.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::error::{CacheError, Result};

/// Estimated cost of a row beyond its key and value: fixed size columns,
/// indexes and free space.
pub const ROW_OVERHEAD: u64 = 140;

// == New Entry ==
/// A row ready to be upserted into a backing store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEntry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub key_hash: i64,
    pub byte_size: u64,
}

// == Cache Entry ==
/// A row as held by a backing store.
///
/// `id` is assigned by the store on first insert and survives overwrites.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub id: i64,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub key_hash: i64,
    pub byte_size: u64,
    /// When the row was first inserted
    pub created_at: DateTime<Utc>,
    /// Last read or write of the row
    pub accessed_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Builds a fresh row from an upsert payload.
    pub fn from_new(id: i64, entry: NewEntry, now: DateTime<Utc>) -> Self {
        Self {
            id,
            key: entry.key,
            value: entry.value,
            key_hash: entry.key_hash,
            byte_size: entry.byte_size,
            created_at: now,
            accessed_at: now,
        }
    }

    /// Replaces value and byte size in place, keeping id and creation time.
    pub fn overwrite(&mut self, entry: NewEntry, now: DateTime<Utc>) {
        self.key = entry.key;
        self.value = entry.value;
        self.byte_size = entry.byte_size;
        self.accessed_at = now;
    }
}

// == Key Hasher ==
/// Derives the signed 64-bit key hash and byte size of cache rows, and
/// rejects malformed keys.
#[derive(Debug, Clone, Copy)]
pub struct KeyHasher {
    max_key_bytesize: usize,
}

impl KeyHasher {
    pub fn new(max_key_bytesize: usize) -> Self {
        Self { max_key_bytesize }
    }

    pub fn max_key_bytesize(&self) -> usize {
        self.max_key_bytesize
    }

    /// First eight bytes of the key's SHA-256 digest, read as a big-endian
    /// signed integer.
    pub fn key_hash(key: &[u8]) -> i64 {
        let digest = Sha256::digest(key);
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        i64::from_be_bytes(prefix)
    }

    pub fn byte_size(key: &[u8], value: &[u8]) -> u64 {
        key.len() as u64 + value.len() as u64 + ROW_OVERHEAD
    }

    /// Rejects empty keys and keys longer than the configured maximum.
    pub fn validate(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(CacheError::InvalidRequest("Key cannot be empty".to_string()));
        }
        if key.len() > self.max_key_bytesize {
            return Err(CacheError::InvalidRequest(format!(
                "Key exceeds maximum length of {} bytes",
                self.max_key_bytesize
            )));
        }
        Ok(())
    }

    /// Validates the key and builds an upsert payload.
    pub fn entry(&self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Result<NewEntry> {
        let key = key.into();
        self.validate(&key)?;
        Ok(Self::row(key, value.into()))
    }

    /// Builds a payload without validating the key. Used for internal keys
    /// such as the size estimate history.
    pub fn row(key: Vec<u8>, value: Vec<u8>) -> NewEntry {
        NewEntry {
            key_hash: Self::key_hash(&key),
            byte_size: Self::byte_size(&key, &value),
            key,
            value,
        }
    }
}
