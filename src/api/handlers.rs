//! API Handlers
//!
//! HTTP request handlers for each cache server endpoint.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};

use crate::cache::{BackingStore, CacheStats, ClusterSet, MemoryStore};
use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::models::{
    DeleteMatchedRequest, DeleteMatchedResponse, DeleteResponse, GetManyRequest,
    GetManyResponse, GetResponse, HealthResponse, IncrementRequest, IncrementResponse,
    MessageResponse, SetManyRequest, SetRequest, SetResponse,
};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<ClusterSet>,
}

impl AppState {
    pub fn new(cache: ClusterSet) -> Self {
        Self {
            cache: Arc::new(cache),
        }
    }

    /// Builds a cluster set with one in-memory store per configured shard.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn from_config(config: &Config) -> Result<Self> {
        let options = config.cache_options()?;
        let cache = ClusterSet::new(options, |cluster, shard| {
            Arc::new(MemoryStore::new(format!("cluster{}/{}", cluster, shard)))
                as Arc<dyn BackingStore>
        })?;
        Ok(Self::new(cache))
    }
}

fn text(bytes: Vec<u8>) -> String {
    String::from_utf8(bytes).unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
}

/// Handler for PUT /set
pub async fn set_handler(
    State(state): State<AppState>,
    Json(req): Json<SetRequest>,
) -> Result<Json<SetResponse>> {
    let stored = state.cache.set(req.key, req.value).await?;
    Ok(Json(SetResponse::new(1, stored)))
}

/// Handler for POST /set_many
pub async fn set_many_handler(
    State(state): State<AppState>,
    Json(req): Json<SetManyRequest>,
) -> Result<Json<SetResponse>> {
    let count = req.entries.len();
    let entries = req
        .entries
        .into_iter()
        .map(|entry| (entry.key.into_bytes(), entry.value.into_bytes()))
        .collect();
    let stored = state.cache.set_many(entries).await?;
    Ok(Json(SetResponse::new(count, stored)))
}

/// Handler for GET /get/:key
pub async fn get_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<GetResponse>> {
    match state.cache.get(&key).await? {
        Some(value) => Ok(Json(GetResponse::new(key, text(value)))),
        None => Err(CacheError::NotFound(key)),
    }
}

/// Handler for POST /get_many
pub async fn get_many_handler(
    State(state): State<AppState>,
    Json(req): Json<GetManyRequest>,
) -> Result<Json<GetManyResponse>> {
    let keys: Vec<Vec<u8>> = req.keys.into_iter().map(String::into_bytes).collect();
    let found = state.cache.get_many(&keys).await?;
    Ok(Json(GetManyResponse {
        values: found
            .into_iter()
            .map(|(key, value)| (text(key), text(value)))
            .collect(),
    }))
}

/// Handler for DELETE /del/:key
pub async fn delete_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<DeleteResponse>> {
    let deleted = state.cache.delete(&key).await?;
    Ok(Json(DeleteResponse::new(key, deleted)))
}

/// Handler for POST /incr/:key
///
/// The body is optional; without one the counter goes up by 1.
pub async fn increment_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
    body: Option<Json<IncrementRequest>>,
) -> Result<Json<IncrementResponse>> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let value = state.cache.increment(&key, req.amount).await?;
    Ok(Json(IncrementResponse { key, value }))
}

/// Handler for POST /clear
pub async fn clear_handler(State(state): State<AppState>) -> Result<Json<MessageResponse>> {
    state.cache.clear().await?;
    Ok(Json(MessageResponse::new("Cache cleared")))
}

/// Handler for POST /delete_matched
pub async fn delete_matched_handler(
    State(state): State<AppState>,
    Json(req): Json<DeleteMatchedRequest>,
) -> Result<Json<DeleteMatchedResponse>> {
    let deleted = state.cache.delete_matched(&req.pattern).await?;
    Ok(Json(DeleteMatchedResponse {
        pattern: req.pattern,
        deleted,
    }))
}

/// Handler for GET /stats
pub async fn stats_handler(State(state): State<AppState>) -> Result<Json<CacheStats>> {
    Ok(Json(state.cache.stats().await?))
}

/// Handler for GET /health
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}
