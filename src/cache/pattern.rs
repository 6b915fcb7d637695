//! Key Patterns
//!
//! SQL `LIKE` style matchers for `delete_matched`: `%` matches any run of
//! bytes, `_` matches exactly one byte and `\` escapes the next character.

use regex::bytes::Regex;

use crate::error::{CacheError, Result};

const WILDCARDS: [char; 2] = ['%', '_'];

#[derive(Debug, Clone)]
pub struct KeyPattern {
    source: String,
    regex: Regex,
}

impl KeyPattern {
    /// Compiles a pattern. Patterns may not start with a wildcard, which
    /// would force a scan of every key.
    pub fn new(pattern: &str) -> Result<Self> {
        match pattern.chars().next() {
            None => {
                return Err(CacheError::InvalidRequest(
                    "Pattern cannot be empty".to_string(),
                ))
            }
            Some(first) if WILDCARDS.contains(&first) => {
                return Err(CacheError::InvalidRequest(
                    "Patterns cannot start with wildcards".to_string(),
                ))
            }
            Some(_) => {}
        }

        let mut expression = String::from("(?s-u)^");
        let mut chars = pattern.chars();
        while let Some(c) = chars.next() {
            match c {
                '%' => expression.push_str(".*"),
                '_' => expression.push('.'),
                '\\' => {
                    if let Some(escaped) = chars.next() {
                        expression.push_str(&regex::escape(&escaped.to_string()));
                    }
                }
                other => expression.push_str(&regex::escape(&other.to_string())),
            }
        }
        expression.push('$');

        let regex = Regex::new(&expression)
            .map_err(|e| CacheError::InvalidRequest(format!("Invalid pattern: {}", e)))?;

        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    pub fn is_match(&self, key: &[u8]) -> bool {
        self.regex.is_match(key)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}
