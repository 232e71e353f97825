//! Collector: drains the pending-request ledger by polling the transport
//! and applying the resulting transitions.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use relayq_core::{ClaimId, PendingRequest, PollOutcome};

use crate::config::DEFAULT_COLLECT_BATCH_SIZE;
use crate::store::{JobStore, PendingRequestLedger, StoreError};
use crate::transport::HttpTransport;

/// Tally of one Collector run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CollectReport {
    pub claimed: usize,
    pub completed: usize,
    pub failed: usize,
    pub still_pending: usize,
    /// Outcomes of requests a reaper reclaim replaced; dropped unrecorded.
    pub superseded: usize,
    pub errors: usize,
}

impl CollectReport {
    pub fn resolved(&self) -> usize {
        self.completed + self.failed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowOutcome {
    Completed,
    Failed,
    StillPending,
    Superseded,
}

pub struct Collector {
    store: Arc<dyn JobStore>,
    ledger: Arc<dyn PendingRequestLedger>,
    transport: Arc<dyn HttpTransport>,
    batch_size: usize,
}

impl Collector {
    pub fn new(
        store: Arc<dyn JobStore>,
        ledger: Arc<dyn PendingRequestLedger>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            store,
            ledger,
            transport,
            batch_size: DEFAULT_COLLECT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// One pass over the ledger rows this run manages to claim.
    ///
    /// Never waits on a request: unresolved rows are released for a later
    /// run. Per-row failures are counted, not propagated.
    #[instrument(skip(self), fields(claim_id = tracing::field::Empty), err)]
    pub async fn collect_once(&self) -> Result<CollectReport, StoreError> {
        let claim = ClaimId::new();
        tracing::Span::current().record("claim_id", tracing::field::display(claim));

        let rows = self.ledger.claim_pending(claim, self.batch_size).await?;
        let mut report = CollectReport {
            claimed: rows.len(),
            ..CollectReport::default()
        };

        for row in rows {
            match self.collect_row(&row, claim).await {
                Ok(RowOutcome::Completed) => report.completed += 1,
                Ok(RowOutcome::Failed) => report.failed += 1,
                Ok(RowOutcome::StillPending) => report.still_pending += 1,
                Ok(RowOutcome::Superseded) => report.superseded += 1,
                Err(e) => {
                    warn!(
                        job_id = %row.job_id,
                        request_handle = %row.request_handle,
                        error = %e,
                        "failed to collect request"
                    );
                    report.errors += 1;
                    if let Err(e) = self.ledger.release_pending(row.request_handle, claim).await {
                        warn!(request_handle = %row.request_handle, error = %e, "failed to release ledger row");
                    }
                }
            }
        }

        if report.claimed > 0 {
            info!(
                claimed = report.claimed,
                completed = report.completed,
                failed = report.failed,
                still_pending = report.still_pending,
                superseded = report.superseded,
                errors = report.errors,
                "collector run finished"
            );
        }
        Ok(report)
    }

    async fn collect_row(
        &self,
        row: &PendingRequest,
        claim: ClaimId,
    ) -> Result<RowOutcome, StoreError> {
        let handle = row.request_handle;
        let outcome = match self.transport.poll(handle).await {
            Ok(outcome) => outcome,
            Err(e) => {
                debug!(request_handle = %handle, error = %e, "poll failed; retrying next run");
                self.ledger.release_pending(handle, claim).await?;
                return Ok(RowOutcome::StillPending);
            }
        };

        let (result, kind) = match outcome {
            PollOutcome::Pending => {
                self.ledger.release_pending(handle, claim).await?;
                return Ok(RowOutcome::StillPending);
            }
            PollOutcome::Success(response) if response.is_success() => {
                let status_code = response.status_code;
                let job = self.store.complete_request(handle, response.body).await;
                if let Ok(job) = &job {
                    info!(job_id = %job.id, request_handle = %handle, status_code, "job complete");
                }
                (job, RowOutcome::Completed)
            }
            other => {
                let status_code = other.status_code();
                let job = self.store.fail_request(handle).await;
                if let Ok(job) = &job {
                    warn!(
                        job_id = %job.id,
                        request_handle = %handle,
                        status_code = ?status_code,
                        retry_count = job.retry_count,
                        retry_limit = job.retry_limit,
                        "job failed"
                    );
                }
                (job, RowOutcome::Failed)
            }
        };

        match result {
            Ok(_) => {}
            // A reaper reclaim replaced the row after we claimed it; the
            // outcome belongs to an abandoned request.
            Err(StoreError::StaleRequest(_)) => {
                debug!(request_handle = %handle, "outcome for abandoned request ignored");
                self.acknowledge(row).await;
                return Ok(RowOutcome::Superseded);
            }
            Err(e) => return Err(e),
        }

        self.acknowledge(row).await;
        Ok(kind)
    }

    async fn acknowledge(&self, row: &PendingRequest) {
        if let Err(e) = self.transport.acknowledge(row.request_handle).await {
            warn!(request_handle = %row.request_handle, error = %e, "failed to acknowledge outcome");
        }
    }
}
