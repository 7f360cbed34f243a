//! Worker reports. Both are acknowledged right away and processed in the
//! background, so a slow owner never holds up a worker.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;

use fanout_core::{CompleteSubtaskRequest, SubtaskErrorReport};

use super::{ack, Ack, ApiError, AppState};

/// `POST /api/v1/subtask/complete`
pub async fn complete_subtask(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CompleteSubtaskRequest>, JsonRejection>,
) -> Result<Json<Ack>, ApiError> {
    let Json(report) = payload?;
    let coordinator = Arc::clone(&state.coordinator);
    tokio::spawn(async move { coordinator.report_result(report).await });
    Ok(ack())
}

/// `POST /api/v1/subtask/error`
pub async fn subtask_error(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SubtaskErrorReport>, JsonRejection>,
) -> Result<Json<Ack>, ApiError> {
    let Json(report) = payload?;
    let coordinator = Arc::clone(&state.coordinator);
    tokio::spawn(async move { coordinator.report_error(report).await });
    Ok(ack())
}
