//! Background Tasks Module
//!
//! Every cluster owns one bounded background queue. Secondary clusters apply
//! their writes through it, and every cluster runs its eviction batches on it.

mod executor;

pub use executor::{AsyncExecutor, ExecutorStats, TaskHandler, TaskSubmitter, DEFAULT_CAPACITY};
