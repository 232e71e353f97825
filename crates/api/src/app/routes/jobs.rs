use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use relayq_core::JobId;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/jobs", post(create_job))
        .route("/jobs/:id", get(get_job))
}

/// Create a job and dispatch it before answering.
pub async fn create_job(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::CreateJobRequest>,
) -> axum::response::Response {
    match services.queue.create_job(body.into()).await {
        Ok(job) => (
            StatusCode::CREATED,
            Json(dto::JobCreatedResponse::from(&job)),
        )
            .into_response(),
        Err(e) => errors::queue_error_to_response(e),
    }
}

pub async fn get_job(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: JobId = match id.parse() {
        Ok(id) => id,
        Err(e) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", format!("{e}"));
        }
    };

    match services.queue.job_result(id).await {
        Ok(result) => Json(result).into_response(),
        Err(e) => errors::queue_error_to_response(e),
    }
}
