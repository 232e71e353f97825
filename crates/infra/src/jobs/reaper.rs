//! Retry reaper: periodic sweep that re-dispatches failed jobs with retry
//! budget left and reclaims jobs stuck in `processing`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, instrument, warn};

use relayq_core::{ClaimId, DispatchKind, Job, ReapAction};

use super::dispatcher::{DispatchError, Dispatcher};
use crate::config::DEFAULT_REAP_BATCH_SIZE;
use crate::store::{JobStore, PendingRequestLedger, StoreError};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReapReport {
    pub claimed: usize,
    pub retried: usize,
    pub reclaimed: usize,
    pub exhausted: usize,
    pub errors: usize,
}

pub struct Reaper {
    store: Arc<dyn JobStore>,
    ledger: Arc<dyn PendingRequestLedger>,
    dispatcher: Arc<Dispatcher>,
    batch_size: usize,
}

impl Reaper {
    pub fn new(
        store: Arc<dyn JobStore>,
        ledger: Arc<dyn PendingRequestLedger>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            store,
            ledger,
            dispatcher,
            batch_size: DEFAULT_REAP_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub async fn reap(&self) -> Result<ReapReport, StoreError> {
        self.reap_at(Utc::now()).await
    }

    /// Sweep as of `now`. A job's dispatch failure releases its claim and
    /// is counted; the sweep moves on.
    #[instrument(skip(self), fields(claim_id = tracing::field::Empty), err)]
    pub async fn reap_at(&self, now: DateTime<Utc>) -> Result<ReapReport, StoreError> {
        let claim = ClaimId::new();
        tracing::Span::current().record("claim_id", tracing::field::display(claim));

        let jobs = self
            .store
            .claim_reapable(claim, now, self.batch_size)
            .await?;
        let mut report = ReapReport {
            claimed: jobs.len(),
            ..ReapReport::default()
        };

        for job in jobs {
            let action = job.reap_action(now);
            match self.reap_job(&job, action, claim).await {
                Ok(Some(ReapAction::Retry)) => report.retried += 1,
                Ok(Some(ReapAction::Reclaim)) => report.reclaimed += 1,
                Ok(Some(ReapAction::Exhaust)) => report.exhausted += 1,
                Ok(None) => {}
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "reap failed for job");
                    report.errors += 1;
                    if let Err(e) = self.store.release_job(job.id, claim).await {
                        warn!(job_id = %job.id, error = %e, "failed to release reaper claim");
                    }
                }
            }
        }

        if report.claimed > 0 {
            info!(
                claimed = report.claimed,
                retried = report.retried,
                reclaimed = report.reclaimed,
                exhausted = report.exhausted,
                errors = report.errors,
                "reaper pass finished"
            );
        }
        Ok(report)
    }

    async fn reap_job(
        &self,
        job: &Job,
        action: Option<ReapAction>,
        claim: ClaimId,
    ) -> Result<Option<ReapAction>, DispatchError> {
        match action {
            Some(ReapAction::Retry) => {
                self.dispatcher
                    .dispatch(job, DispatchKind::Retry, Some(claim))
                    .await?;
            }
            Some(ReapAction::Reclaim) => {
                warn!(job_id = %job.id, retry_count = job.retry_count, "reclaiming stuck job");
                let superseded = self.ledger.pending_for_job(job.id).await?;
                let dispatched = self
                    .dispatcher
                    .dispatch(job, DispatchKind::Reclaim, Some(claim))
                    .await?;
                for row in superseded {
                    if row.request_handle != dispatched.handle {
                        self.dispatcher.acknowledge(row.request_handle).await;
                    }
                }
            }
            Some(ReapAction::Exhaust) => {
                let job = self.store.exhaust_job(job.id, claim).await?;
                warn!(
                    job_id = %job.id,
                    retry_count = job.retry_count,
                    retry_limit = job.retry_limit,
                    "stuck job out of retries; marked failed"
                );
            }
            None => self.store.release_job(job.id, claim).await?,
        }
        Ok(action)
    }
}
