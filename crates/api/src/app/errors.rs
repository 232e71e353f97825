use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use relayq_infra::jobs::DispatchError;
use relayq_infra::{QueueError, StoreError};

pub fn queue_error_to_response(err: QueueError) -> axum::response::Response {
    match err {
        QueueError::Validation(e) => {
            json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string())
        }
        QueueError::NotFound(id) => {
            json_error(StatusCode::NOT_FOUND, "not_found", format!("job {id} not found"))
        }
        QueueError::Dispatch(DispatchError::Store(e)) | QueueError::Store(e) => {
            store_error_to_response(e)
        }
        QueueError::Dispatch(e @ DispatchError::Secret(_)) => {
            json_error(StatusCode::BAD_GATEWAY, "secret_error", e.to_string())
        }
        QueueError::Dispatch(e @ DispatchError::Transport(_)) => {
            json_error(StatusCode::BAD_GATEWAY, "transport_error", e.to_string())
        }
        QueueError::Dispatch(e @ DispatchError::Validation(_)) => {
            json_error(StatusCode::BAD_GATEWAY, "dispatch_error", e.to_string())
        }
    }
}

pub fn store_error_to_response(err: StoreError) -> axum::response::Response {
    match err {
        StoreError::NotFound(id) => {
            json_error(StatusCode::NOT_FOUND, "not_found", format!("job {id} not found"))
        }
        other => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "store_error",
            other.to_string(),
        ),
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
