//! Entry points for an external periodic trigger source.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
    routing::post,
};

use crate::app::dto::TaskStartedResponse;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/tasks/collect", post(collect))
        .route("/tasks/reap", post(reap))
}

/// Start a Collector run if a worker token is free; never waits for one.
pub async fn collect(Extension(services): Extension<Arc<AppServices>>) -> impl IntoResponse {
    let started = services.queue.spawn_collect();
    (StatusCode::ACCEPTED, Json(TaskStartedResponse { started }))
}

pub async fn reap(Extension(services): Extension<Arc<AppServices>>) -> impl IntoResponse {
    services.queue.spawn_reap();
    (StatusCode::ACCEPTED, Json(TaskStartedResponse { started: true }))
}
