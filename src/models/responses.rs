//! Response DTOs for the cache server API
//!
//! Defines the structure of outgoing HTTP response bodies.

use serde::Serialize;
use serde_json::Value;

use crate::cache::CacheEntry;

/// Response body for a hit on GET /entries/:key
#[derive(Debug, Clone, Serialize)]
pub struct EntryResponse {
    pub key: String,
    pub value: Value,
    pub hit: bool,
    pub entry: CacheEntry,
}

impl EntryResponse {
    pub fn new(value: Value, entry: CacheEntry) -> Self {
        Self {
            key: entry.key.clone(),
            value,
            hit: true,
            entry,
        }
    }
}

/// Response body for a miss on GET /entries/:key (sent with 404)
#[derive(Debug, Clone, Serialize)]
pub struct MissResponse {
    pub key: String,
    pub hit: bool,
    /// Status of the entry when it exists but is not servable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl MissResponse {
    pub fn new(key: impl Into<String>, status: Option<String>) -> Self {
        Self {
            key: key.into(),
            hit: false,
            status,
        }
    }
}

/// Response body for DELETE /entries/:key
#[derive(Debug, Clone, Serialize)]
pub struct DeleteResponse {
    pub key: String,
    pub deleted: bool,
}

/// Response body for POST /entries/:key/invalidate
#[derive(Debug, Clone, Serialize)]
pub struct InvalidateResponse {
    pub key: String,
    pub invalidated: bool,
}

/// Response body for bulk operations (tag invalidation, clear)
#[derive(Debug, Clone, Serialize)]
pub struct CountResponse {
    pub count: usize,
}

/// Response body for POST /warmup
#[derive(Debug, Clone, Serialize)]
pub struct WarmupResponse {
    pub loaded: usize,
}

/// Response body for the health endpoint (GET /health)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Health status (e.g., "healthy")
    pub status: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
    pub entries: usize,
}

impl HealthResponse {
    /// Creates a new HealthResponse with current timestamp
    pub fn healthy(entries: usize) -> Self {
        Self {
            status: "healthy".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            entries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_miss_response_serialize() {
        let json = serde_json::to_value(MissResponse::new("gone", None)).unwrap();
        assert_eq!(json["hit"], false);
        assert!(json.get("status").is_none());

        let json = serde_json::to_value(MissResponse::new("old", Some("expired".to_string()))).unwrap();
        assert_eq!(json["status"], "expired");
    }

    #[test]
    fn test_health_response_serialize() {
        let resp = HealthResponse::healthy(3);
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("healthy"));
        assert!(json.contains("timestamp"));
        assert!(json.contains("\"entries\":3"));
    }
}
