//! HTTP router construction.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::api::{self, AppState};

/// Node-facing API served on the public port.
pub fn public_router(state: Arc<AppState>) -> Router {
    let v1 = Router::new()
        .route("/node/register/master", post(api::register_master))
        .route("/node/register/slave", post(api::register_slave))
        .route("/task/add", post(api::add_task))
        .route("/task/close", post(api::close_task))
        .route("/subtask/complete", post(api::complete_subtask))
        .route("/subtask/error", post(api::subtask_error))
        .route("/status", get(api::status));

    Router::new()
        .nest("/api/v1", v1)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Liveness endpoint served on the private port.
pub fn private_router() -> Router {
    Router::new().route("/health", get(api::health))
}
