//! Error types for the cache engine
//!
//! Provides unified error handling using thiserror. Backing-store failures
//! carry a [`StoreErrorKind`] so the failsafe layer can tell transient
//! failures apart from programming and constraint errors.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

// == Store Error ==
/// Classification of a backing-store failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    /// Statement or connection checkout timed out
    Timeout,
    /// Lock wait timeout or deadlock detected
    Deadlock,
    /// Connection dropped or could not be established
    ConnectionLost,
    /// Statement was canceled or aborted by the server
    Canceled,
    /// Constraint violation (unique, not null, ...)
    Constraint,
    /// Malformed statement or unexpected row shape
    Invalid,
}

impl StoreErrorKind {
    /// Returns true for failures that are expected to go away on their own.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            StoreErrorKind::Timeout
                | StoreErrorKind::Deadlock
                | StoreErrorKind::ConnectionLost
                | StoreErrorKind::Canceled
        )
    }
}

/// Error raised by a [`BackingStore`](crate::cache::BackingStore) call.
#[derive(Error, Debug, Clone)]
#[error("{kind:?}: {message}")]
pub struct StoreError {
    pub kind: StoreErrorKind,
    pub message: String,
}

impl StoreError {
    pub fn new(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }
}

/// Result type for backing-store calls.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

// == Cache Error Enum ==
/// Unified error type for the cache engine.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Key not found in cache
    #[error("Key not found: {0}")]
    NotFound(String),

    /// Invalid request data (malformed key, bad pattern, non-numeric counter)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Invalid construction-time configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A shard name or index that the cluster does not know about
    #[error("Unknown shard: {0}")]
    UnknownShard(String),

    /// Non-transient backing-store failure
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

// == IntoResponse Implementation ==
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = match &self {
            CacheError::NotFound(_) => StatusCode::NOT_FOUND,
            CacheError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            CacheError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
            CacheError::Configuration(_)
            | CacheError::UnknownShard(_)
            | CacheError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache engine.
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_kinds() {
        assert!(StoreError::new(StoreErrorKind::Timeout, "slow").is_transient());
        assert!(StoreError::new(StoreErrorKind::ConnectionLost, "gone").is_transient());
        assert!(StoreError::new(StoreErrorKind::Deadlock, "x").is_transient());
        assert!(StoreError::new(StoreErrorKind::Canceled, "x").is_transient());
        assert!(!StoreError::new(StoreErrorKind::Constraint, "x").is_transient());
        assert!(!StoreError::new(StoreErrorKind::Invalid, "x").is_transient());
    }

    #[test]
    fn test_store_error_converts_into_cache_error() {
        let err: CacheError = StoreError::new(StoreErrorKind::Invalid, "bad row").into();
        assert!(matches!(err, CacheError::Store(_)));
        assert!(err.to_string().contains("bad row"));
    }

    #[test]
    fn test_status_codes() {
        let response = CacheError::InvalidRequest("empty key".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = CacheError::NotFound("k".into()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
