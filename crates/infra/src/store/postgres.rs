//! Postgres-backed job store and pending-request ledger.
//!
//! Tables are created by [`PostgresStore::migrate`] from
//! `migrations/0001_http_jobs.sql`. Transitions load the job row
//! `FOR UPDATE`, apply the domain state machine from `relayq-core` and write
//! the result back inside the same transaction, so the guards live in one
//! place for both store implementations.
//!
//! Every transition locks the job row before any of its ledger rows.
//! Resolving a request reads the owning job id unlocked, locks the job and
//! then re-checks the ledger row under lock; a row replaced in between is a
//! stale request.
//!
//! ## Claims
//!
//! Claim queries select candidates with `FOR UPDATE SKIP LOCKED` and stamp
//! `claimed_by`/`claimed_at` in the same statement. Rows locked by a
//! concurrent claim are skipped rather than waited for; a stamp older than
//! the lease is ignored.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (check violation) | `23514` | `Conflict` |
//! | anything else | n/a | `Storage` |

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use relayq_core::{
    ClaimId, DispatchKind, Job, JobId, JobStatus, PendingRequest, RequestHandle,
    STUCK_PROCESSING_THRESHOLD, ValidatedJob,
};

use super::{DEFAULT_CLAIM_LEASE_SECS, JobStats, JobStore, PendingRequestLedger, StoreError};

const MIGRATION: &str = include_str!("../../migrations/0001_http_jobs.sql");

const JOB_COLUMNS: &str = "id, verb, payload, url_path, status, retry_count, retry_limit, \
                           result_body, claimed_by, claimed_at, created_at, updated_at";

/// Postgres job store. Cheap to clone; shares the pool.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: Arc<PgPool>,
    claim_lease_secs: f64,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
            claim_lease_secs: DEFAULT_CLAIM_LEASE_SECS as f64,
        }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    pub fn with_claim_lease(mut self, lease: std::time::Duration) -> Self {
        self.claim_lease_secs = lease.as_secs_f64();
        self
    }

    /// Create the tables and indexes if they do not exist.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(MIGRATION)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, StoreError> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))
    }

    async fn lock_job(
        tx: &mut Transaction<'static, Postgres>,
        job_id: JobId,
    ) -> Result<JobRow, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM http_jobs WHERE id = $1 FOR UPDATE"
        ))
        .bind(job_id.get())
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("lock_job", e))?
        .ok_or(StoreError::NotFound(job_id))?;

        JobRow::decode(&row)
    }

    async fn request_owner(
        tx: &mut Transaction<'static, Postgres>,
        handle: RequestHandle,
    ) -> Result<JobId, StoreError> {
        let job_id: i64 =
            sqlx::query("SELECT job_id FROM http_pending_requests WHERE request_handle = $1")
                .bind(handle.get())
                .fetch_optional(&mut **tx)
                .await
                .map_err(|e| map_sqlx_error("request_owner", e))?
                .ok_or(StoreError::StaleRequest(handle))?
                .try_get("job_id")
                .map_err(|e| map_sqlx_error("request_owner", e))?;

        Ok(JobId::new(job_id))
    }

    /// Lock the ledger row for `handle`; the caller already holds the job lock.
    async fn lock_request(
        tx: &mut Transaction<'static, Postgres>,
        handle: RequestHandle,
        job_id: JobId,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "SELECT 1 AS found FROM http_pending_requests \
             WHERE request_handle = $1 AND job_id = $2 FOR UPDATE",
        )
        .bind(handle.get())
        .bind(job_id.get())
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("lock_request", e))?
        .ok_or(StoreError::StaleRequest(handle))?;
        Ok(())
    }

    /// Lock the job owning `handle`, then the ledger row itself.
    async fn lock_request_and_job(
        tx: &mut Transaction<'static, Postgres>,
        handle: RequestHandle,
    ) -> Result<Job, StoreError> {
        let job_id = Self::request_owner(tx, handle).await?;
        let job = Self::lock_job(tx, job_id).await?.into_job()?;
        Self::lock_request(tx, handle, job_id).await?;
        Ok(job)
    }

    async fn write_job(
        tx: &mut Transaction<'static, Postgres>,
        job: &Job,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE http_jobs
            SET status = $2,
                retry_count = $3,
                result_body = $4,
                claimed_by = NULL,
                claimed_at = NULL,
                updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(job.id.get())
        .bind(job.status.as_str())
        .bind(job.retry_count)
        .bind(&job.result_body)
        .bind(job.updated_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("write_job", e))?;
        Ok(())
    }

    async fn commit(tx: Transaction<'static, Postgres>) -> Result<(), StoreError> {
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }
}

#[async_trait]
impl JobStore for PostgresStore {
    #[instrument(skip(self, job), fields(verb = %job.verb), err)]
    async fn insert_job(&self, job: ValidatedJob) -> Result<Job, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO http_jobs (verb, payload, url_path, retry_limit)
            VALUES ($1, $2, $3, $4)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(job.verb.as_str())
        .bind(&job.payload)
        .bind(&job.url_path)
        .bind(job.retry_limit)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_job", e))?;

        JobRow::decode(&row)?.into_job()
    }

    async fn get_job(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM http_jobs WHERE id = $1"))
            .bind(id.get())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_job", e))?;

        row.map(|r| JobRow::decode(&r)?.into_job()).transpose()
    }

    async fn delete_job(&self, id: JobId) -> Result<(), StoreError> {
        let deleted = sqlx::query("DELETE FROM http_jobs WHERE id = $1")
            .bind(id.get())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_job", e))?
            .rows_affected();

        if deleted == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn record_dispatch(
        &self,
        job_id: JobId,
        handle: RequestHandle,
        kind: DispatchKind,
        claim: Option<ClaimId>,
    ) -> Result<Job, StoreError> {
        let mut tx = self.begin().await?;
        let row = Self::lock_job(&mut tx, job_id).await?;
        if let Some(claim) = claim {
            if row.claimed_by != Some(*claim.as_uuid()) {
                return Err(StoreError::ClaimLost(job_id));
            }
        }

        let mut job = row.into_job()?;
        job.record_dispatch(kind)?;

        sqlx::query("DELETE FROM http_pending_requests WHERE job_id = $1")
            .bind(job_id.get())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("drop_previous_request", e))?;

        sqlx::query("INSERT INTO http_pending_requests (request_handle, job_id) VALUES ($1, $2)")
            .bind(handle.get())
            .bind(job_id.get())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_pending_request", e))?;

        Self::write_job(&mut tx, &job).await?;
        Self::commit(tx).await?;
        Ok(job)
    }

    #[instrument(skip(self, body), err)]
    async fn complete_request(&self, handle: RequestHandle, body: String) -> Result<Job, StoreError> {
        let mut tx = self.begin().await?;
        let mut job = Self::lock_request_and_job(&mut tx, handle).await?;
        job.complete(body)?;

        Self::write_job(&mut tx, &job).await?;
        sqlx::query("DELETE FROM http_pending_requests WHERE request_handle = $1")
            .bind(handle.get())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_pending_request", e))?;
        Self::commit(tx).await?;
        Ok(job)
    }

    #[instrument(skip(self), err)]
    async fn fail_request(&self, handle: RequestHandle) -> Result<Job, StoreError> {
        let mut tx = self.begin().await?;
        let mut job = Self::lock_request_and_job(&mut tx, handle).await?;
        job.fail()?;

        Self::write_job(&mut tx, &job).await?;
        sqlx::query("DELETE FROM http_pending_requests WHERE request_handle = $1")
            .bind(handle.get())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_pending_request", e))?;
        Self::commit(tx).await?;
        Ok(job)
    }

    #[instrument(skip(self), fields(claim_id = %claim), err)]
    async fn claim_reapable(
        &self,
        claim: ClaimId,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Job>, StoreError> {
        let stuck_before =
            now - chrono::Duration::seconds(STUCK_PROCESSING_THRESHOLD.as_secs() as i64);

        let rows = sqlx::query(&format!(
            r#"
            WITH candidates AS (
                SELECT id
                FROM http_jobs
                WHERE ((status = 'failed' AND retry_count < retry_limit)
                       OR (status = 'processing' AND created_at < $2))
                  AND (claimed_by IS NULL OR claimed_at < now() - make_interval(secs => $4))
                ORDER BY id
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            UPDATE http_jobs
            SET claimed_by = $1, claimed_at = now()
            WHERE id IN (SELECT id FROM candidates)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(claim.as_uuid())
        .bind(stuck_before)
        .bind(limit as i64)
        .bind(self.claim_lease_secs)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("claim_reapable", e))?;

        let mut jobs = rows
            .iter()
            .map(|r| JobRow::decode(r)?.into_job())
            .collect::<Result<Vec<_>, _>>()?;
        jobs.sort_by_key(|j| j.id);
        Ok(jobs)
    }

    #[instrument(skip(self), err)]
    async fn exhaust_job(&self, job_id: JobId, claim: ClaimId) -> Result<Job, StoreError> {
        let mut tx = self.begin().await?;
        let row = Self::lock_job(&mut tx, job_id).await?;
        if row.claimed_by != Some(*claim.as_uuid()) {
            return Err(StoreError::ClaimLost(job_id));
        }

        let mut job = row.into_job()?;
        job.exhaust()?;

        Self::write_job(&mut tx, &job).await?;
        sqlx::query("DELETE FROM http_pending_requests WHERE job_id = $1")
            .bind(job_id.get())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_pending_request", e))?;
        Self::commit(tx).await?;
        Ok(job)
    }

    async fn release_job(&self, job_id: JobId, claim: ClaimId) -> Result<(), StoreError> {
        let exists = sqlx::query(
            r#"
            WITH released AS (
                UPDATE http_jobs
                SET claimed_by = NULL, claimed_at = NULL
                WHERE id = $1 AND claimed_by = $2
            )
            SELECT 1 AS found FROM http_jobs WHERE id = $1
            "#,
        )
        .bind(job_id.get())
        .bind(claim.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("release_job", e))?;

        match exists {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound(job_id)),
        }
    }

    async fn stats(&self) -> Result<JobStats, StoreError> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM http_jobs GROUP BY status")
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("stats", e))?;

        let mut stats = JobStats {
            in_flight_requests: self.pending_count().await?,
            ..JobStats::default()
        };
        for row in rows {
            let status: String = row.try_get("status").map_err(|e| map_sqlx_error("stats", e))?;
            let n: i64 = row.try_get("n").map_err(|e| map_sqlx_error("stats", e))?;
            let n = n as usize;
            match status.parse::<JobStatus>()? {
                JobStatus::Pending => stats.pending = n,
                JobStatus::Processing => stats.processing = n,
                JobStatus::Complete => stats.complete = n,
                JobStatus::Failed => stats.failed = n,
            }
        }
        Ok(stats)
    }
}

#[async_trait]
impl PendingRequestLedger for PostgresStore {
    #[instrument(skip(self), fields(claim_id = %claim), err)]
    async fn claim_pending(
        &self,
        claim: ClaimId,
        limit: usize,
    ) -> Result<Vec<PendingRequest>, StoreError> {
        let rows = sqlx::query(
            r#"
            WITH candidates AS (
                SELECT request_handle
                FROM http_pending_requests
                WHERE claimed_by IS NULL OR claimed_at < now() - make_interval(secs => $3)
                ORDER BY request_handle
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE http_pending_requests
            SET claimed_by = $1, claimed_at = now()
            WHERE request_handle IN (SELECT request_handle FROM candidates)
            RETURNING request_handle, job_id, created_at
            "#,
        )
        .bind(claim.as_uuid())
        .bind(limit as i64)
        .bind(self.claim_lease_secs)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("claim_pending", e))?;

        let mut pending = rows
            .iter()
            .map(decode_pending)
            .collect::<Result<Vec<_>, _>>()?;
        pending.sort_by_key(|p| p.request_handle);
        Ok(pending)
    }

    async fn release_pending(
        &self,
        handle: RequestHandle,
        claim: ClaimId,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE http_pending_requests
            SET claimed_by = NULL, claimed_at = NULL
            WHERE request_handle = $1 AND claimed_by = $2
            "#,
        )
        .bind(handle.get())
        .bind(claim.as_uuid())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("release_pending", e))?;
        Ok(())
    }

    async fn pending_for_job(&self, job_id: JobId) -> Result<Vec<PendingRequest>, StoreError> {
        let rows = sqlx::query(
            "SELECT request_handle, job_id, created_at FROM http_pending_requests WHERE job_id = $1",
        )
        .bind(job_id.get())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("pending_for_job", e))?;

        rows.iter().map(decode_pending).collect()
    }

    async fn pending_count(&self) -> Result<usize, StoreError> {
        let n: i64 = sqlx::query("SELECT COUNT(*) AS n FROM http_pending_requests")
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("pending_count", e))?
            .try_get("n")
            .map_err(|e| map_sqlx_error("pending_count", e))?;
        Ok(n as usize)
    }
}

fn decode_pending(row: &sqlx::postgres::PgRow) -> Result<PendingRequest, StoreError> {
    let decode = || -> Result<PendingRequest, sqlx::Error> {
        Ok(PendingRequest {
            request_handle: RequestHandle::new(row.try_get("request_handle")?),
            job_id: JobId::new(row.try_get("job_id")?),
            created_at: row.try_get("created_at")?,
        })
    };
    decode().map_err(|e| map_sqlx_error("decode_pending_request", e))
}

/// Map SQLx errors into store errors.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") | Some("23514") => StoreError::Conflict(msg),
                _ => StoreError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Storage(format!("connection pool closed in {}", operation))
        }
        _ => StoreError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}

// SQLx row types

#[derive(Debug)]
struct JobRow {
    id: i64,
    verb: String,
    payload: Option<serde_json::Value>,
    url_path: String,
    status: String,
    retry_count: i32,
    retry_limit: i32,
    result_body: Option<String>,
    claimed_by: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for JobRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(JobRow {
            id: row.try_get("id")?,
            verb: row.try_get("verb")?,
            payload: row.try_get("payload")?,
            url_path: row.try_get("url_path")?,
            status: row.try_get("status")?,
            retry_count: row.try_get("retry_count")?,
            retry_limit: row.try_get("retry_limit")?,
            result_body: row.try_get("result_body")?,
            claimed_by: row.try_get("claimed_by")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl JobRow {
    fn decode(row: &sqlx::postgres::PgRow) -> Result<Self, StoreError> {
        <JobRow as sqlx::FromRow<'_, sqlx::postgres::PgRow>>::from_row(row)
            .map_err(|e| map_sqlx_error("decode_job", e))
    }

    fn into_job(self) -> Result<Job, StoreError> {
        let id = self.id;
        let corrupt =
            move |e: relayq_core::DomainError| StoreError::Storage(format!("corrupt job row {id}: {e}"));
        Ok(Job {
            id: JobId::new(id),
            verb: self.verb.parse().map_err(corrupt)?,
            status: self.status.parse().map_err(corrupt)?,
            payload: self.payload,
            url_path: self.url_path,
            retry_count: self.retry_count,
            retry_limit: self.retry_limit,
            result_body: self.result_body,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relayq_core::NewJob;

    /// Runs only when `DATABASE_URL` is set.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn collect_racing_reclaim_of_the_same_job_never_deadlocks() {
        let Ok(url) = std::env::var("DATABASE_URL") else {
            return;
        };
        let store = PostgresStore::connect(&url).await.unwrap();
        store.migrate().await.unwrap();

        let mut next = Utc::now().timestamp_micros();
        for _ in 0..50 {
            let job = store
                .insert_job(NewJob::new("POST", "/race").with_retry_limit(5).validate().unwrap())
                .await
                .unwrap();
            let first = RequestHandle::new(next);
            let second = RequestHandle::new(next + 1);
            next += 2;
            store
                .record_dispatch(job.id, first, DispatchKind::Fresh, None)
                .await
                .unwrap();

            // Stamp a reaper claim directly; the job is not old enough to be reapable.
            let claim = ClaimId::new();
            sqlx::query("UPDATE http_jobs SET claimed_by = $1, claimed_at = now() WHERE id = $2")
                .bind(claim.as_uuid())
                .bind(job.id.get())
                .execute(&*store.pool)
                .await
                .unwrap();

            let collector = store.clone();
            let reaper = store.clone();
            let completed = tokio::spawn(async move {
                collector.complete_request(first, "ok".to_string()).await
            });
            let reclaimed = tokio::spawn(async move {
                reaper
                    .record_dispatch(job.id, second, DispatchKind::Reclaim, Some(claim))
                    .await
            });
            let completed = completed.await.unwrap();
            let reclaimed = reclaimed.await.unwrap();

            assert!(
                !matches!(completed, Err(StoreError::Storage(_))),
                "{completed:?}"
            );
            assert!(
                !matches!(reclaimed, Err(StoreError::Storage(_))),
                "{reclaimed:?}"
            );
            assert_eq!(
                completed.is_ok() as u8 + reclaimed.is_ok() as u8,
                1,
                "exactly one side wins: {completed:?} / {reclaimed:?}"
            );
            if completed.is_err() {
                assert!(matches!(completed, Err(StoreError::StaleRequest(h)) if h == first));
            }

            store.delete_job(job.id).await.unwrap();
        }
    }
}
