use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

use crate::state::AppState;

pub async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Pings the bucket store within the configured store timeout.
pub async fn redis(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let timeout = state.config.rate_limit.store_timeout();
    match tokio::time::timeout(timeout, state.store.ping()).await {
        Ok(Ok(())) => (StatusCode::OK, Json(json!({ "redis": "ok" }))),
        Ok(Err(e)) => {
            tracing::warn!("Health check failed: {e}");
            (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "redis": "down" })))
        }
        Err(_) => {
            tracing::warn!("Health check timed out after {timeout:?}");
            (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "redis": "down" })))
        }
    }
}
