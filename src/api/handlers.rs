//! API Handlers
//!
//! HTTP request handlers for each engine endpoint. Handlers only translate
//! between HTTP and `CacheManager` calls.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::alerts::{AlertSpec, CacheAlert};
use crate::cache::{CacheEntry, CacheStats};
use crate::error::{CacheError, Result};
use crate::manager::CacheManager;
use crate::metrics::CacheMetrics;
use crate::models::{
    ActorRequest, ClearRequest, CountResponse, DeleteResponse, EntryResponse, HealthResponse,
    InvalidateRequest, InvalidateResponse, MissResponse, PutEntryRequest, TagsRequest,
    WarmupRequest, WarmupResponse,
};
use crate::optimization::{OptimizationTask, TaskSpec};
use crate::profile::{CacheProfile, ProfileSpec};
use crate::rules::{CacheRule, RuleSpec};
use crate::strategy::{CacheStrategy, StrategySpec, StrategyUpdate};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<CacheManager>,
}

impl AppState {
    pub fn new(manager: Arc<CacheManager>) -> Self {
        Self { manager }
    }
}

// == Entries ==
/// Handler for PUT /entries
pub async fn put_entry_handler(
    State(state): State<AppState>,
    Json(req): Json<PutEntryRequest>,
) -> Result<Json<CacheEntry>> {
    if let Some(error_msg) = req.validate() {
        return Err(CacheError::Validation(error_msg));
    }
    let entry = state.manager.put(&req.key, req.value, req.options).await?;
    Ok(Json(entry))
}

/// Handler for GET /entries/:key
///
/// A miss answers 404 with `{"hit": false}`.
pub async fn get_entry_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Response {
    let lookup = state.manager.get(&key).await;
    match (lookup.payload, lookup.entry) {
        (Some(value), Some(entry)) if lookup.hit => {
            (StatusCode::OK, Json(EntryResponse::new(value, entry))).into_response()
        }
        (_, entry) => {
            let status = entry.map(|e| e.status.to_string());
            (StatusCode::NOT_FOUND, Json(MissResponse::new(key, status))).into_response()
        }
    }
}

/// Handler for DELETE /entries/:key
pub async fn delete_entry_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<DeleteResponse>> {
    if !state.manager.delete(&key).await {
        return Err(CacheError::NotFound(format!("entry '{}'", key)));
    }
    Ok(Json(DeleteResponse { key, deleted: true }))
}

/// Handler for POST /entries/:key/invalidate
pub async fn invalidate_entry_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
    body: Option<Json<InvalidateRequest>>,
) -> Result<Json<InvalidateResponse>> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let reason = req.reason.as_deref().unwrap_or("invalidated via api");
    if !state.manager.invalidate(&key, reason).await {
        return Err(CacheError::NotFound(format!("entry '{}'", key)));
    }
    Ok(Json(InvalidateResponse {
        key,
        invalidated: true,
    }))
}

/// Handler for POST /invalidate/tags
pub async fn invalidate_tags_handler(
    State(state): State<AppState>,
    Json(req): Json<TagsRequest>,
) -> Result<Json<CountResponse>> {
    if req.tags.is_empty() {
        return Err(CacheError::Validation("At least one tag is required".to_string()));
    }
    let count = state.manager.invalidate_by_tags(&req.tags).await;
    Ok(Json(CountResponse { count }))
}

/// Handler for POST /clear
pub async fn clear_handler(
    State(state): State<AppState>,
    body: Option<Json<ClearRequest>>,
) -> Json<CountResponse> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let count = state.manager.clear(req.entry_type).await;
    Json(CountResponse { count })
}

/// Handler for POST /warmup
pub async fn warmup_handler(
    State(state): State<AppState>,
    Json(req): Json<WarmupRequest>,
) -> Result<Json<WarmupResponse>> {
    let loaded = state.manager.warmup(req.keys).await?;
    Ok(Json(WarmupResponse { loaded }))
}

// == Observability ==
/// Handler for GET /stats
pub async fn stats_handler(State(state): State<AppState>) -> Json<CacheStats> {
    Json(state.manager.stats().await)
}

/// Handler for GET /metrics
pub async fn metrics_handler(State(state): State<AppState>) -> Json<CacheMetrics> {
    Json(state.manager.metrics().await)
}

/// Handler for GET /health
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let entries = state.manager.stats().await.total_entries;
    Json(HealthResponse::healthy(entries))
}

// == Strategies ==
pub async fn list_strategies_handler(State(state): State<AppState>) -> Json<Vec<CacheStrategy>> {
    Json(state.manager.list_strategies().await)
}

pub async fn create_strategy_handler(
    State(state): State<AppState>,
    Json(spec): Json<StrategySpec>,
) -> Result<(StatusCode, Json<CacheStrategy>)> {
    let strategy = state.manager.create_strategy(spec).await?;
    Ok((StatusCode::CREATED, Json(strategy)))
}

pub async fn update_strategy_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(update): Json<StrategyUpdate>,
) -> Result<Json<CacheStrategy>> {
    Ok(Json(state.manager.update_strategy(&id, update).await?))
}

// == Rules ==
pub async fn list_rules_handler(State(state): State<AppState>) -> Json<Vec<CacheRule>> {
    Json(state.manager.list_rules().await)
}

pub async fn create_rule_handler(
    State(state): State<AppState>,
    Json(spec): Json<RuleSpec>,
) -> Result<(StatusCode, Json<CacheRule>)> {
    let rule = state.manager.create_rule(spec).await?;
    Ok((StatusCode::CREATED, Json(rule)))
}

// == Profiles ==
pub async fn list_profiles_handler(State(state): State<AppState>) -> Json<Vec<CacheProfile>> {
    Json(state.manager.list_profiles().await)
}

pub async fn create_profile_handler(
    State(state): State<AppState>,
    Json(spec): Json<ProfileSpec>,
) -> Result<(StatusCode, Json<CacheProfile>)> {
    let profile = state.manager.create_profile(spec).await?;
    Ok((StatusCode::CREATED, Json(profile)))
}

pub async fn apply_profile_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CacheProfile>> {
    Ok(Json(state.manager.apply_profile(&id).await?))
}

// == Optimization Tasks ==
pub async fn list_tasks_handler(State(state): State<AppState>) -> Json<Vec<OptimizationTask>> {
    Json(state.manager.list_optimization_tasks().await)
}

pub async fn create_task_handler(
    State(state): State<AppState>,
    Json(spec): Json<TaskSpec>,
) -> Result<(StatusCode, Json<OptimizationTask>)> {
    let task = state.manager.create_optimization_task(spec).await?;
    Ok((StatusCode::CREATED, Json(task)))
}

pub async fn execute_task_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<OptimizationTask>> {
    Ok(Json(state.manager.execute_optimization_task(&id).await?))
}

pub async fn cancel_task_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<OptimizationTask>> {
    Ok(Json(state.manager.cancel_optimization_task(&id).await?))
}

// == Alerts ==
pub async fn list_alerts_handler(State(state): State<AppState>) -> Json<Vec<CacheAlert>> {
    Json(state.manager.list_alerts().await)
}

/// Handler for POST /alerts
///
/// Answers 200 with `{"deduplicated": true}` when an open alert with the
/// same source and severity exists.
pub async fn create_alert_handler(
    State(state): State<AppState>,
    Json(spec): Json<AlertSpec>,
) -> Result<Response> {
    let response = match state.manager.create_alert(spec).await? {
        Some(alert) => (StatusCode::CREATED, Json(alert)).into_response(),
        None => (StatusCode::OK, Json(json!({ "deduplicated": true }))).into_response(),
    };
    Ok(response)
}

pub async fn acknowledge_alert_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<ActorRequest>>,
) -> Result<Json<CacheAlert>> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    Ok(Json(state.manager.acknowledge_alert(&id, req.actor()).await?))
}

pub async fn resolve_alert_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<ActorRequest>>,
) -> Result<Json<CacheAlert>> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    Ok(Json(state.manager.resolve_alert(&id, req.actor()).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn state() -> AppState {
        AppState::new(Arc::new(CacheManager::new(Config::default()).unwrap()))
    }

    fn put_request(key: &str, value: serde_json::Value) -> PutEntryRequest {
        serde_json::from_value(json!({ "key": key, "value": value })).unwrap()
    }

    #[tokio::test]
    async fn test_put_and_get_handler() {
        let state = state();

        let result = put_entry_handler(State(state.clone()), Json(put_request("test_key", json!("v")))).await;
        assert!(result.is_ok());

        let response = get_entry_handler(State(state), Path("test_key".to_string())).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_get_missing_key_is_404() {
        let response = get_entry_handler(State(state()), Path("nonexistent".to_string())).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_delete_handler() {
        let state = state();
        put_entry_handler(State(state.clone()), Json(put_request("to_delete", json!(1))))
            .await
            .unwrap();

        let result = delete_entry_handler(State(state.clone()), Path("to_delete".to_string())).await;
        assert!(result.is_ok());

        let result = delete_entry_handler(State(state), Path("to_delete".to_string())).await;
        assert!(matches!(result, Err(CacheError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_put_invalid_request() {
        let result = put_entry_handler(State(state()), Json(put_request("", json!(1)))).await;
        assert!(matches!(result, Err(CacheError::Validation(_))));
    }

    #[tokio::test]
    async fn test_stats_handler() {
        let response = stats_handler(State(state())).await;
        assert_eq!(response.hits, 0);
        assert_eq!(response.misses, 0);
    }

    #[tokio::test]
    async fn test_health_handler() {
        let response = health_handler(State(state())).await;
        assert_eq!(response.status, "healthy");
    }
}
