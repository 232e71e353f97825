use axum::{Router, routing::get};

pub mod jobs;
pub mod system;
pub mod tasks;

/// Router for the queue endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/stats", get(system::stats))
        .merge(jobs::router())
        .merge(tasks::router())
}
