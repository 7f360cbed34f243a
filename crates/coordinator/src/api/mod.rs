//! HTTP handlers for the node-facing API and the health endpoint.

mod nodes;
mod status;
mod subtasks;
mod tasks;

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use fanout_core::FanoutError;

use crate::coordinator::Coordinator;

pub use nodes::{register_master, register_slave};
pub use status::{health, status};
pub use subtasks::{complete_subtask, subtask_error};
pub use tasks::{add_task, close_task};

/// Shared handler state.
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
    /// Effective configuration, echoed by `GET /status`.
    pub settings: serde_json::Value,
}

impl AppState {
    pub fn new(coordinator: Arc<Coordinator>, settings: serde_json::Value) -> Arc<Self> {
        Arc::new(Self { coordinator, settings })
    }
}

/// Body of every acknowledgement.
#[derive(Debug, Serialize)]
pub struct Ack {
    pub status: &'static str,
}

pub(crate) fn ack() -> Json<Ack> {
    Json(Ack { status: "ok" })
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// [`FanoutError`] mapped onto a status code.
#[derive(Debug)]
pub struct ApiError(pub FanoutError);

impl From<FanoutError> for ApiError {
    fn from(e: FanoutError) -> Self {
        Self(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(FanoutError::MalformedBody(rejection.body_text()))
    }
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self.0 {
            FanoutError::OwnerNotFound(_) => StatusCode::NOT_FOUND,
            FanoutError::InvalidNode(_)
            | FanoutError::MissingParam(_)
            | FanoutError::Serialize(_)
            | FanoutError::MalformedBody(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        tracing::debug!(%status, error = %self.0, "request rejected");
        (status, Json(ErrorResponse { error: self.0.to_string() })).into_response()
    }
}
