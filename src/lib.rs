//! shardcache - A sharded, store-backed key/value cache
//!
//! Routes keys to shards with a Maglev ring, keeps a synchronous primary and
//! asynchronous secondary clusters, and bounds every shard with sampled,
//! write-pressure driven eviction.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod tasks;

pub use api::AppState;
pub use cache::ClusterSet;
pub use config::{CacheOptions, Config};
pub use error::{CacheError, Result};
