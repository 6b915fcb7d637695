//! Response DTOs for the cache server API
//!
//! Defines the structure of outgoing HTTP response bodies.

use std::collections::BTreeMap;

use serde::Serialize;

/// Response body for the GET operation (GET /get/:key)
#[derive(Debug, Clone, Serialize)]
pub struct GetResponse {
    /// The requested key
    pub key: String,
    /// The stored value
    pub value: String,
}

impl GetResponse {
    /// Creates a new GetResponse
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Response body for POST /get_many. Missing keys are left out.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GetManyResponse {
    pub values: BTreeMap<String, String>,
}

/// Response body for the SET operations (PUT /set, POST /set_many)
#[derive(Debug, Clone, Serialize)]
pub struct SetResponse {
    /// Number of entries in the request
    pub count: usize,
    /// False when the write was dropped by a transient store failure
    pub stored: bool,
}

impl SetResponse {
    pub fn new(count: usize, stored: bool) -> Self {
        Self { count, stored }
    }
}

/// Response body for the DELETE operation (DELETE /del/:key)
#[derive(Debug, Clone, Serialize)]
pub struct DeleteResponse {
    /// The key that was deleted
    pub key: String,
    pub deleted: bool,
}

impl DeleteResponse {
    pub fn new(key: impl Into<String>, deleted: bool) -> Self {
        Self {
            key: key.into(),
            deleted,
        }
    }
}

/// Response body for POST /incr/:key
#[derive(Debug, Clone, Serialize)]
pub struct IncrementResponse {
    pub key: String,
    /// New value, null when the store failed transiently
    pub value: Option<i64>,
}

/// Response body for POST /delete_matched
#[derive(Debug, Clone, Serialize)]
pub struct DeleteMatchedResponse {
    pub pattern: String,
    pub deleted: u64,
}

/// Response body for POST /clear
#[derive(Debug, Clone, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Response body for the health endpoint (GET /health)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Health status (e.g., "healthy")
    pub status: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    /// Creates a new HealthResponse with current timestamp
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_response_serialize() {
        let resp = GetResponse::new("test_key", "test_value");
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("test_key"));
        assert!(json.contains("test_value"));
    }

    #[test]
    fn test_set_response_serialize() {
        let json = serde_json::to_string(&SetResponse::new(2, true)).unwrap();
        assert_eq!(json, r#"{"count":2,"stored":true}"#);
    }

    #[test]
    fn test_increment_response_null_value() {
        let resp = IncrementResponse {
            key: "n".to_string(),
            value: None,
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert_eq!(json, r#"{"key":"n","value":null}"#);
    }

    #[test]
    fn test_get_many_response_is_sorted() {
        let mut resp = GetManyResponse::default();
        resp.values.insert("b".to_string(), "2".to_string());
        resp.values.insert("a".to_string(), "1".to_string());
        let json = serde_json::to_string(&resp).unwrap();
        assert_eq!(json, r#"{"values":{"a":"1","b":"2"}}"#);
    }

    #[test]
    fn test_health_response_serialize() {
        let resp = HealthResponse::healthy();
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("healthy"));
        assert!(json.contains("timestamp"));
    }
}
