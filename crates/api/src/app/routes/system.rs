use std::sync::Arc;

use axum::{Json, extract::Extension, http::StatusCode, response::IntoResponse};

use crate::app::errors;
use crate::app::services::AppServices;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// Job counts per status plus in-flight requests and free worker tokens.
pub async fn stats(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    match services.queue.stats().await {
        Ok(stats) => {
            let pool = services.queue.worker_pool();
            Json(serde_json::json!({
                "jobs": stats,
                "worker_tokens": {
                    "size": pool.size(),
                    "available": pool.available(),
                },
            }))
            .into_response()
        }
        Err(e) => errors::queue_error_to_response(e),
    }
}
