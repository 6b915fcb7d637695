//! Cache Module
//!
//! Sharded, store-backed caching: Maglev routing, redundant clusters,
//! write-pressure eviction and sampled size estimation.

pub mod backing;
pub mod cluster;
pub mod cluster_set;
pub mod entry;
pub mod eviction;
pub mod failsafe;
pub mod memory;
pub mod pattern;
pub mod ring;
pub mod router;
pub mod size;
pub mod stats;


use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;

// Re-export public types
pub use backing::{BackingStore, OutlierSummary, RowAge, UpdateFn};
pub use cluster::{ClearMode, Cluster, Operation, Task};
pub use cluster_set::ClusterSet;
pub use entry::{CacheEntry, KeyHasher, NewEntry};
pub use eviction::{EvictionController, EvictionPolicy, EvictionSettings, Evictor};
pub use failsafe::{ErrorHandler, Failsafe, FailsafeEvent};
pub use memory::MemoryStore;
pub use pattern::KeyPattern;
pub use ring::MaglevRing;
pub use router::{ShardLayout, ShardRouter};
pub use size::{SizeEstimate, SizeEstimator};
pub use stats::{CacheStats, ClusterStats, ShardStats};

// == Public Constants ==
/// Default maximum key length in bytes
pub const MAX_KEY_LENGTH: usize = 1024;

/// Random source shared by eviction jitter, eviction sampling and size
/// estimation. Seed it to make those reproducible.
pub type SharedRng = Arc<Mutex<StdRng>>;

pub fn shared_rng(seed: Option<u64>) -> SharedRng {
    let rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    Arc::new(Mutex::new(rng))
}
