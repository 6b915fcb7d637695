//! Request DTOs for the cache server API
//!
//! Defines the structure of incoming HTTP request bodies. Keys and values
//! travel as UTF-8 strings; key rules are enforced by the cache itself.

use serde::Deserialize;

/// Request body for the SET operation (PUT /set)
#[derive(Debug, Clone, Deserialize)]
pub struct SetRequest {
    /// The cache key
    pub key: String,
    /// The value to store
    pub value: String,
}

/// Request body for POST /set_many
#[derive(Debug, Clone, Deserialize)]
pub struct SetManyRequest {
    pub entries: Vec<SetRequest>,
}

/// Request body for POST /get_many
#[derive(Debug, Clone, Deserialize)]
pub struct GetManyRequest {
    pub keys: Vec<String>,
}

/// Optional request body for POST /incr/:key
#[derive(Debug, Clone, Deserialize)]
pub struct IncrementRequest {
    /// Amount to add, negative to decrement
    #[serde(default = "default_amount")]
    pub amount: i64,
}

impl Default for IncrementRequest {
    fn default() -> Self {
        Self {
            amount: default_amount(),
        }
    }
}

fn default_amount() -> i64 {
    1
}

/// Request body for POST /delete_matched
#[derive(Debug, Clone, Deserialize)]
pub struct DeleteMatchedRequest {
    /// `LIKE` pattern: `%` any run, `_` one byte, `\` escapes
    pub pattern: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_request_deserialize() {
        let json = r#"{"key": "test", "value": "hello"}"#;
        let req: SetRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.key, "test");
        assert_eq!(req.value, "hello");
    }

    #[test]
    fn test_set_many_request_deserialize() {
        let json = r#"{"entries": [{"key": "a", "value": "1"}, {"key": "b", "value": "2"}]}"#;
        let req: SetManyRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.entries.len(), 2);
        assert_eq!(req.entries[1].key, "b");
    }

    #[test]
    fn test_increment_amount_defaults_to_one() {
        let req: IncrementRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(req.amount, 1);
        let req: IncrementRequest = serde_json::from_str(r#"{"amount": -3}"#).unwrap();
        assert_eq!(req.amount, -3);
        assert_eq!(IncrementRequest::default().amount, 1);
    }

    #[test]
    fn test_delete_matched_request_deserialize() {
        let req: DeleteMatchedRequest = serde_json::from_str(r#"{"pattern": "user:%"}"#).unwrap();
        assert_eq!(req.pattern, "user:%");
    }
}
