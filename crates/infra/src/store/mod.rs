//! Job Store and Pending-Request Ledger.
//!
//! The two tables are the only shared mutable state of the queue. Every
//! read-then-act sequence claims rows first (a `{claimed_by, claimed_at}`
//! marker honoured for `claim_lease`), so concurrent Collector runs and
//! Reaper passes partition work instead of contending for it. Transitions
//! that touch both tables are atomic.
//!
//! ## Implementations
//!
//! - [`InMemoryStore`]: both tables behind one mutex (tests/dev)
//! - [`PostgresStore`]: `FOR UPDATE SKIP LOCKED` claims, one transaction per transition

pub mod in_memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use relayq_core::{
    ClaimId, DispatchKind, DomainError, Job, JobId, PendingRequest, RequestHandle, ValidatedJob,
};

pub use in_memory::InMemoryStore;
pub use postgres::PostgresStore;

/// Claims older than this are treated as abandoned.
pub const DEFAULT_CLAIM_LEASE_SECS: u64 = 60;

/// Job table operations.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a job in `pending`, assigning the next id.
    async fn insert_job(&self, job: ValidatedJob) -> Result<Job, StoreError>;

    async fn get_job(&self, id: JobId) -> Result<Option<Job>, StoreError>;

    /// Remove a job together with any ledger rows. Used to undo a creation
    /// whose initial dispatch failed.
    async fn delete_job(&self, id: JobId) -> Result<(), StoreError>;

    /// Atomically: apply the dispatch transition, drop any previous ledger
    /// row of the job, insert the ledger row for `handle` and release
    /// `claim` (required for reaper-driven dispatches).
    async fn record_dispatch(
        &self,
        job_id: JobId,
        handle: RequestHandle,
        kind: DispatchKind,
        claim: Option<ClaimId>,
    ) -> Result<Job, StoreError>;

    /// Atomically complete the job owning `handle` and delete its ledger row.
    async fn complete_request(&self, handle: RequestHandle, body: String) -> Result<Job, StoreError>;

    /// Atomically fail the job owning `handle` and delete its ledger row.
    async fn fail_request(&self, handle: RequestHandle) -> Result<Job, StoreError>;

    /// Claim up to `limit` unclaimed jobs the reaper should act on at `now`:
    /// failed with retry budget left, or stuck in processing.
    async fn claim_reapable(
        &self,
        claim: ClaimId,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Job>, StoreError>;

    /// Move a claimed, stuck job with no retry budget to `failed` and drop
    /// its ledger row.
    async fn exhaust_job(&self, job_id: JobId, claim: ClaimId) -> Result<Job, StoreError>;

    /// Give up a claim without changing the job.
    async fn release_job(&self, job_id: JobId, claim: ClaimId) -> Result<(), StoreError>;

    async fn stats(&self) -> Result<JobStats, StoreError>;
}

/// Pending-request table operations.
#[async_trait]
pub trait PendingRequestLedger: Send + Sync {
    /// Claim up to `limit` ledger rows not held by another run.
    async fn claim_pending(
        &self,
        claim: ClaimId,
        limit: usize,
    ) -> Result<Vec<PendingRequest>, StoreError>;

    /// Hand an unresolved row back for a later run.
    async fn release_pending(&self, handle: RequestHandle, claim: ClaimId)
    -> Result<(), StoreError>;

    async fn pending_for_job(&self, job_id: JobId) -> Result<Vec<PendingRequest>, StoreError>;

    async fn pending_count(&self) -> Result<usize, StoreError>;
}

/// Store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("no pending request for handle {0}")]
    StaleRequest(RequestHandle),
    #[error(transparent)]
    Transition(#[from] DomainError),
    #[error("claim on job {0} is no longer held")]
    ClaimLost(JobId),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Job counts per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobStats {
    pub pending: usize,
    pub processing: usize,
    pub complete: usize,
    pub failed: usize,
    pub in_flight_requests: usize,
}
