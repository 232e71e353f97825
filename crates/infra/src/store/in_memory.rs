//! In-memory job store and ledger for tests/dev.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use relayq_core::{
    ClaimId, DispatchKind, Job, JobId, JobStatus, PendingRequest, RequestHandle, ValidatedJob,
};

use super::{DEFAULT_CLAIM_LEASE_SECS, JobStats, JobStore, PendingRequestLedger, StoreError};

#[derive(Debug, Clone, Copy)]
struct Claim {
    id: ClaimId,
    at: DateTime<Utc>,
}

#[derive(Debug)]
struct JobRow {
    job: Job,
    claim: Option<Claim>,
}

#[derive(Debug)]
struct LedgerRow {
    request: PendingRequest,
    claim: Option<Claim>,
}

#[derive(Debug, Default)]
struct Tables {
    next_id: i64,
    jobs: BTreeMap<JobId, JobRow>,
    ledger: BTreeMap<RequestHandle, LedgerRow>,
}

/// Both tables behind one mutex, so every multi-row transition is atomic.
#[derive(Debug)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
    claim_lease: chrono::Duration,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            claim_lease: chrono::Duration::seconds(DEFAULT_CLAIM_LEASE_SECS as i64),
        }
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn with_claim_lease(mut self, lease: std::time::Duration) -> Self {
        self.claim_lease = chrono::Duration::from_std(lease).unwrap_or(self.claim_lease);
        self
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_free(&self, claim: &Option<Claim>, now: DateTime<Utc>) -> bool {
        match claim {
            None => true,
            Some(c) => c.at + self.claim_lease <= now,
        }
    }

    fn holds(claim: &Option<Claim>, id: ClaimId) -> bool {
        matches!(claim, Some(c) if c.id == id)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for InMemoryStore {
    async fn insert_job(&self, job: ValidatedJob) -> Result<Job, StoreError> {
        let mut tables = self.lock();
        tables.next_id += 1;
        let id = JobId::new(tables.next_id);
        let job = Job::from_validated(id, job, Utc::now());
        tables.jobs.insert(
            id,
            JobRow {
                job: job.clone(),
                claim: None,
            },
        );
        Ok(job)
    }

    async fn get_job(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        Ok(self.lock().jobs.get(&id).map(|row| row.job.clone()))
    }

    async fn delete_job(&self, id: JobId) -> Result<(), StoreError> {
        let mut tables = self.lock();
        tables.jobs.remove(&id).ok_or(StoreError::NotFound(id))?;
        tables.ledger.retain(|_, row| row.request.job_id != id);
        Ok(())
    }

    async fn record_dispatch(
        &self,
        job_id: JobId,
        handle: RequestHandle,
        kind: DispatchKind,
        claim: Option<ClaimId>,
    ) -> Result<Job, StoreError> {
        let mut tables = self.lock();
        let Tables { jobs, ledger, .. } = &mut *tables;

        let row = jobs.get_mut(&job_id).ok_or(StoreError::NotFound(job_id))?;
        if let Some(claim) = claim {
            if !Self::holds(&row.claim, claim) {
                return Err(StoreError::ClaimLost(job_id));
            }
        }
        if ledger.contains_key(&handle) {
            return Err(StoreError::Conflict(format!(
                "request handle {handle} is already in the ledger"
            )));
        }

        let mut job = row.job.clone();
        job.record_dispatch(kind)?;
        row.job = job.clone();
        row.claim = None;

        ledger.retain(|_, r| r.request.job_id != job_id);
        ledger.insert(
            handle,
            LedgerRow {
                request: PendingRequest::new(handle, job_id),
                claim: None,
            },
        );
        Ok(job)
    }

    async fn complete_request(&self, handle: RequestHandle, body: String) -> Result<Job, StoreError> {
        let mut tables = self.lock();
        let Tables { jobs, ledger, .. } = &mut *tables;

        let job_id = ledger
            .get(&handle)
            .map(|r| r.request.job_id)
            .ok_or(StoreError::StaleRequest(handle))?;
        let row = jobs.get_mut(&job_id).ok_or(StoreError::NotFound(job_id))?;

        let mut job = row.job.clone();
        job.complete(body)?;
        row.job = job.clone();
        ledger.remove(&handle);
        Ok(job)
    }

    async fn fail_request(&self, handle: RequestHandle) -> Result<Job, StoreError> {
        let mut tables = self.lock();
        let Tables { jobs, ledger, .. } = &mut *tables;

        let job_id = ledger
            .get(&handle)
            .map(|r| r.request.job_id)
            .ok_or(StoreError::StaleRequest(handle))?;
        let row = jobs.get_mut(&job_id).ok_or(StoreError::NotFound(job_id))?;

        let mut job = row.job.clone();
        job.fail()?;
        row.job = job.clone();
        ledger.remove(&handle);
        Ok(job)
    }

    async fn claim_reapable(
        &self,
        claim: ClaimId,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Job>, StoreError> {
        let claimed_at = Utc::now();
        let mut tables = self.lock();
        let mut claimed = Vec::new();

        for row in tables.jobs.values_mut() {
            if claimed.len() >= limit {
                break;
            }
            if !self.is_free(&row.claim, claimed_at) || row.job.reap_action(now).is_none() {
                continue;
            }
            row.claim = Some(Claim {
                id: claim,
                at: claimed_at,
            });
            claimed.push(row.job.clone());
        }

        Ok(claimed)
    }

    async fn exhaust_job(&self, job_id: JobId, claim: ClaimId) -> Result<Job, StoreError> {
        let mut tables = self.lock();
        let Tables { jobs, ledger, .. } = &mut *tables;

        let row = jobs.get_mut(&job_id).ok_or(StoreError::NotFound(job_id))?;
        if !Self::holds(&row.claim, claim) {
            return Err(StoreError::ClaimLost(job_id));
        }

        let mut job = row.job.clone();
        job.exhaust()?;
        row.job = job.clone();
        row.claim = None;
        ledger.retain(|_, r| r.request.job_id != job_id);
        Ok(job)
    }

    async fn release_job(&self, job_id: JobId, claim: ClaimId) -> Result<(), StoreError> {
        let mut tables = self.lock();
        let row = tables
            .jobs
            .get_mut(&job_id)
            .ok_or(StoreError::NotFound(job_id))?;
        if Self::holds(&row.claim, claim) {
            row.claim = None;
        }
        Ok(())
    }

    async fn stats(&self) -> Result<JobStats, StoreError> {
        let tables = self.lock();
        let mut stats = JobStats {
            in_flight_requests: tables.ledger.len(),
            ..JobStats::default()
        };
        for row in tables.jobs.values() {
            match row.job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Processing => stats.processing += 1,
                JobStatus::Complete => stats.complete += 1,
                JobStatus::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }
}

#[async_trait]
impl PendingRequestLedger for InMemoryStore {
    async fn claim_pending(
        &self,
        claim: ClaimId,
        limit: usize,
    ) -> Result<Vec<PendingRequest>, StoreError> {
        let now = Utc::now();
        let mut tables = self.lock();
        let mut claimed = Vec::new();

        for row in tables.ledger.values_mut() {
            if claimed.len() >= limit {
                break;
            }
            if !self.is_free(&row.claim, now) {
                continue;
            }
            row.claim = Some(Claim { id: claim, at: now });
            claimed.push(row.request.clone());
        }

        Ok(claimed)
    }

    async fn release_pending(
        &self,
        handle: RequestHandle,
        claim: ClaimId,
    ) -> Result<(), StoreError> {
        let mut tables = self.lock();
        if let Some(row) = tables.ledger.get_mut(&handle) {
            if Self::holds(&row.claim, claim) {
                row.claim = None;
            }
        }
        Ok(())
    }

    async fn pending_for_job(&self, job_id: JobId) -> Result<Vec<PendingRequest>, StoreError> {
        Ok(self
            .lock()
            .ledger
            .values()
            .filter(|row| row.request.job_id == job_id)
            .map(|row| row.request.clone())
            .collect())
    }

    async fn pending_count(&self) -> Result<usize, StoreError> {
        Ok(self.lock().ledger.len())
    }
}
