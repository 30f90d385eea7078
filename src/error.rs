//! Error types for the cache engine
//!
//! Provides unified error handling using thiserror.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the cache engine.
///
/// A lookup that misses is not an error; `get` reports it through its
/// `hit` flag instead.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Unknown key, strategy, rule, profile, schedule, task or alert id
    #[error("Not found: {0}")]
    NotFound(String),

    /// Rejected input (negative TTL, malformed rule condition, zero caps, ...)
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Eviction could not bring a strategy back under its caps
    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// A hook failed while an optimization task was executing
    #[error("Task execution failed: {0}")]
    TaskExecution(String),

    /// The persistence backend could not load or save a record
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Persistence(err.to_string())
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Persistence(err.to_string())
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = match &self {
            CacheError::NotFound(_) => StatusCode::NOT_FOUND,
            CacheError::Validation(_) => StatusCode::BAD_REQUEST,
            CacheError::CapacityExceeded(_) => StatusCode::INSUFFICIENT_STORAGE,
            CacheError::TaskExecution(_)
            | CacheError::Persistence(_)
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
    fn test_error_status_codes() {
        let cases = [
            (CacheError::NotFound("k".into()), StatusCode::NOT_FOUND),
            (CacheError::Validation("v".into()), StatusCode::BAD_REQUEST),
            (
                CacheError::CapacityExceeded("c".into()),
                StatusCode::INSUFFICIENT_STORAGE,
            ),
            (
                CacheError::TaskExecution("t".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }

    #[test]
    fn test_serde_error_maps_to_persistence() {
        let err: CacheError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, CacheError::Persistence(_)));
    }
}
