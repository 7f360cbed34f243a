use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;

use fanout_core::{Node, WorkerRegistration};

use super::{ack, Ack, ApiError, AppState};

/// `POST /api/v1/node/register/master`
pub async fn register_master(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Node>, JsonRejection>,
) -> Result<Json<Ack>, ApiError> {
    let Json(node) = payload?;
    state.coordinator.register_owner(node)?;
    Ok(ack())
}

/// `POST /api/v1/node/register/slave`
pub async fn register_slave(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<WorkerRegistration>, JsonRejection>,
) -> Result<Json<Ack>, ApiError> {
    let Json(registration) = payload?;
    state.coordinator.register_worker(registration)?;
    Ok(ack())
}
