use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

use fanout_core::{FanoutError, NodeId, TaskConfig};

use super::{ack, Ack, ApiError, AppState};

/// `POST /api/v1/task/add`
pub async fn add_task(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<TaskConfig>, JsonRejection>,
) -> Result<Json<Ack>, ApiError> {
    let Json(config) = payload?;
    state.coordinator.submit_task(config)?;
    Ok(ack())
}

#[derive(Debug, Deserialize)]
pub struct CloseParams {
    pub uuid: Option<String>,
}

/// `POST /api/v1/task/close?uuid=<owner>`
pub async fn close_task(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CloseParams>,
) -> Result<Json<Ack>, ApiError> {
    let owner_id = params
        .uuid
        .filter(|s| !s.trim().is_empty())
        .map(NodeId::from)
        .ok_or(FanoutError::MissingParam("uuid"))?;
    state.coordinator.close_task(&owner_id)?;
    Ok(ack())
}
