//! `relayq-core`: domain foundation for the outbound HTTP job queue.
//!
//! This crate contains **pure domain** types (no I/O): identifiers, the job
//! state machine, the pending-request correlation record and the HTTP
//! request/outcome values exchanged with a transport.

pub mod error;
pub mod http;
pub mod id;
pub mod job;
pub mod pending;

pub use error::{DomainError, DomainResult};
pub use http::{HttpRequest, HttpResponse, PollOutcome, REQUEST_TIMEOUT_MS};
pub use id::{ClaimId, JobId, RequestHandle};
pub use job::{
    DEFAULT_RETRY_LIMIT, DispatchKind, HttpVerb, Job, JobResult, JobStatus, NewJob, ReapAction,
    STUCK_PROCESSING_THRESHOLD, ValidatedJob,
};
pub use pending::PendingRequest;
