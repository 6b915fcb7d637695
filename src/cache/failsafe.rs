//! Failsafe Module
//!
//! Wraps backing-store calls so transient storage failures degrade into a
//! documented fallback value instead of an error.

use std::fmt::Debug;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{error, warn};

use crate::error::{CacheError, Result, StoreError, StoreResult};

/// What the error handler is told about a swallowed failure.
#[derive(Debug)]
pub struct FailsafeEvent<'a> {
    /// Name of the operation that failed
    pub method: &'static str,
    /// Debug rendering of the fallback that was returned instead
    pub returning: String,
    pub error: &'a StoreError,
}

/// Callback invoked for every swallowed failure.
pub type ErrorHandler = Arc<dyn Fn(&FailsafeEvent<'_>) + Send + Sync>;

/// The default handler: log the failure at error level.
pub fn log_error_handler() -> ErrorHandler {
    Arc::new(|event: &FailsafeEvent<'_>| {
        error!(
            "{} failed, returned {}: {}",
            event.method, event.returning, event.error
        );
    })
}

// == Failsafe ==
pub struct Failsafe {
    handler: ErrorHandler,
    handled: AtomicU64,
}

impl Failsafe {
    pub fn new(handler: ErrorHandler) -> Self {
        Self {
            handler,
            handled: AtomicU64::new(0),
        }
    }

    /// Runs `call`. Transient failures are reported and replaced by
    /// `returning`; anything else is surfaced as [`CacheError::Store`].
    pub async fn run<T, F>(&self, method: &'static str, returning: T, call: F) -> Result<T>
    where
        T: Debug,
        F: Future<Output = StoreResult<T>>,
    {
        match call.await {
            Ok(value) => Ok(value),
            Err(e) if e.is_transient() => {
                self.handled.fetch_add(1, Ordering::Relaxed);
                warn!(method, handled = true, error = %e, "transient store failure");
                (self.handler)(&FailsafeEvent {
                    method,
                    returning: format!("{:?}", returning),
                    error: &e,
                });
                Ok(returning)
            }
            Err(e) => Err(CacheError::Store(e)),
        }
    }

    /// Number of failures swallowed so far.
    pub fn handled_count(&self) -> u64 {
        self.handled.load(Ordering::Relaxed)
    }
}

impl Default for Failsafe {
    fn default() -> Self {
        Self::new(log_error_handler())
    }
}

impl Debug for Failsafe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Failsafe")
            .field("handled", &self.handled_count())
            .finish()
    }
}
