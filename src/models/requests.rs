//! Request DTOs for the cache server API
//!
//! Defines the structure of incoming HTTP request bodies.

use serde::Deserialize;
use serde_json::Value;

use crate::cache::{EntryType, PutOptions, MAX_KEY_LENGTH};

/// Request body for PUT /entries
///
/// Write options sit alongside the key and value:
/// `{"key": "user:1", "value": {...}, "ttl": 60, "tags": ["users"]}`
#[derive(Debug, Clone, Deserialize)]
pub struct PutEntryRequest {
    /// The cache key
    pub key: String,
    /// Any JSON value
    pub value: Value,
    #[serde(flatten)]
    pub options: PutOptions,
}

impl PutEntryRequest {
    /// Validates the request data
    ///
    /// Returns an error message if validation fails, None if valid.
    pub fn validate(&self) -> Option<String> {
        if self.key.is_empty() {
            return Some("Key cannot be empty".to_string());
        }
        if self.key.len() > MAX_KEY_LENGTH {
            return Some(format!(
                "Key exceeds maximum length of {} bytes",
                MAX_KEY_LENGTH
            ));
        }
        None
    }
}

/// Request body for POST /entries/:key/invalidate
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InvalidateRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

/// Request body for POST /invalidate/tags
#[derive(Debug, Clone, Deserialize)]
pub struct TagsRequest {
    pub tags: Vec<String>,
}

/// Request body for POST /clear; no type clears everything
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClearRequest {
    #[serde(default)]
    pub entry_type: Option<EntryType>,
}

/// Request body for POST /warmup
#[derive(Debug, Clone, Deserialize)]
pub struct WarmupRequest {
    pub keys: Vec<String>,
}

/// Request body for alert acknowledge/resolve
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActorRequest {
    #[serde(default)]
    pub actor: Option<String>,
}

impl ActorRequest {
    pub fn actor(&self) -> &str {
        self.actor.as_deref().unwrap_or("api")
    }
}
