//! API Routes
//!
//! Configures the Axum router with all engine endpoints.

use axum::{
    routing::{get, patch, post, put},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::*;

/// Creates the main router with all endpoints configured.
///
/// # Endpoints
/// - `PUT /entries`, `GET|DELETE /entries/:key`, `POST /entries/:key/invalidate`
/// - `POST /invalidate/tags`, `POST /clear`, `POST /warmup`
/// - `GET /stats`, `GET /metrics`, `GET /health`
/// - `GET|POST /strategies`, `PATCH /strategies/:id`
/// - `GET|POST /rules`
/// - `GET|POST /profiles`, `POST /profiles/:id/apply`
/// - `GET|POST /tasks`, `POST /tasks/:id/execute`, `POST /tasks/:id/cancel`
/// - `GET|POST /alerts`, `POST /alerts/:id/acknowledge`, `POST /alerts/:id/resolve`
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/entries", put(put_entry_handler))
        .route(
            "/entries/:key",
            get(get_entry_handler).delete(delete_entry_handler),
        )
        .route("/entries/:key/invalidate", post(invalidate_entry_handler))
        .route("/invalidate/tags", post(invalidate_tags_handler))
        .route("/clear", post(clear_handler))
        .route("/warmup", post(warmup_handler))
        .route("/stats", get(stats_handler))
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .route(
            "/strategies",
            get(list_strategies_handler).post(create_strategy_handler),
        )
        .route("/strategies/:id", patch(update_strategy_handler))
        .route("/rules", get(list_rules_handler).post(create_rule_handler))
        .route(
            "/profiles",
            get(list_profiles_handler).post(create_profile_handler),
        )
        .route("/profiles/:id/apply", post(apply_profile_handler))
        .route("/tasks", get(list_tasks_handler).post(create_task_handler))
        .route("/tasks/:id/execute", post(execute_task_handler))
        .route("/tasks/:id/cancel", post(cancel_task_handler))
        .route("/alerts", get(list_alerts_handler).post(create_alert_handler))
        .route("/alerts/:id/acknowledge", post(acknowledge_alert_handler))
        .route("/alerts/:id/resolve", post(resolve_alert_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
