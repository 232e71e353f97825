//! Asynchronous HTTP transport boundary.
//!
//! `send` hands a request off and returns a handle immediately; the outcome
//! is only observed later by polling that handle. Nothing here waits for a
//! response on the caller's behalf.

pub mod in_memory;
pub mod reqwest_transport;

use async_trait::async_trait;

use relayq_core::{HttpRequest, PollOutcome, RequestHandle};

pub use in_memory::InMemoryTransport;
pub use reqwest_transport::ReqwestTransport;

/// Fire-and-forget HTTP transport with poll-based completion.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Start the call and return its handle without waiting for it.
    async fn send(&self, request: HttpRequest) -> Result<RequestHandle, TransportError>;

    /// Current outcome for `handle`.
    async fn poll(&self, handle: RequestHandle) -> Result<PollOutcome, TransportError>;

    /// The caller has recorded the outcome; the transport may forget it.
    async fn acknowledge(&self, handle: RequestHandle) -> Result<(), TransportError>;
}

/// Transport error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("transport unavailable: {0}")]
    Unavailable(String),
}
