use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use super::AppState;

/// `GET /health` on the private listener.
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// `GET /api/v1/status`: registry, pool, tasks and subtasks at this instant.
pub async fn status(State(state): State<Arc<AppState>>) -> Json<Value> {
    let snapshot = state.coordinator.snapshot();
    Json(json!({
        "config": state.settings,
        "ledger": snapshot,
    }))
}
