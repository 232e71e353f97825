//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: store/transport/secrets wiring behind the job queue
//! - `routes/`: HTTP routes + handlers
//! - `dto.rs`: request/response DTOs
//! - `errors.rs`: consistent error responses

use std::sync::Arc;
use std::time::Duration;

use axum::{
    BoxError, Extension, Router, error_handling::HandleErrorLayer, http::StatusCode,
    routing::get,
};
use tower::ServiceBuilder;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

use services::AppServices;

/// Upper bound on handling one API request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(services: Arc<AppServices>) -> Router {
    Router::new()
        .route("/health", get(routes::system::health))
        .merge(routes::router())
        .layer(Extension(services))
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(handle_middleware_error))
                .timeout(REQUEST_TIMEOUT),
        )
}

async fn handle_middleware_error(err: BoxError) -> axum::response::Response {
    if err.is::<tower::timeout::error::Elapsed>() {
        errors::json_error(StatusCode::REQUEST_TIMEOUT, "timeout", "request timed out")
    } else {
        errors::json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            err.to_string(),
        )
    }
}
