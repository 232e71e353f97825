//! Queue facade: job creation with synchronous initial dispatch, result
//! reads, and the collect/reap entry points the periodic triggers call.

use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};

use relayq_core::{DispatchKind, DomainError, Job, JobId, JobResult, NewJob};

use super::collector::{CollectReport, Collector};
use super::dispatcher::{DispatchError, Dispatcher};
use super::reaper::{ReapReport, Reaper};
use crate::config::QueueConfig;
use crate::secrets::SecretStore;
use crate::store::{JobStats, JobStore, PendingRequestLedger, StoreError};
use crate::transport::HttpTransport;
use crate::worker_pool::WorkerPool;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error(transparent)]
    Validation(#[from] DomainError),
    #[error("dispatch failed: {0}")]
    Dispatch(#[from] DispatchError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("job not found: {0}")]
    NotFound(JobId),
}

pub struct JobQueue {
    store: Arc<dyn JobStore>,
    ledger: Arc<dyn PendingRequestLedger>,
    dispatcher: Arc<Dispatcher>,
    collector: Collector,
    reaper: Reaper,
    pool: WorkerPool,
}

impl JobQueue {
    pub fn new(
        store: Arc<dyn JobStore>,
        ledger: Arc<dyn PendingRequestLedger>,
        transport: Arc<dyn HttpTransport>,
        secrets: Arc<dyn SecretStore>,
        config: &QueueConfig,
    ) -> Self {
        let dispatcher = Arc::new(
            Dispatcher::new(store.clone(), transport.clone(), secrets)
                .with_request_timeout_ms(config.request_timeout_ms),
        );
        let collector = Collector::new(store.clone(), ledger.clone(), transport)
            .with_batch_size(config.collect_batch_size);
        let reaper = Reaper::new(store.clone(), ledger.clone(), dispatcher.clone())
            .with_batch_size(config.reap_batch_size);

        Self {
            store,
            ledger,
            dispatcher,
            collector,
            reaper,
            pool: WorkerPool::new(config.worker_pool_size),
        }
    }

    /// Validate, insert and dispatch before returning.
    ///
    /// Creation and initial dispatch succeed or fail together: if the
    /// dispatch fails the inserted row is removed again.
    #[instrument(skip(self, new), fields(verb = %new.verb, url_path = %new.url_path), err)]
    pub async fn create_job(&self, new: NewJob) -> Result<Job, QueueError> {
        let validated = new.validate()?;
        let job = self.store.insert_job(validated).await?;
        debug!(job_id = %job.id, "job inserted");

        match self.dispatcher.dispatch(&job, DispatchKind::Fresh, None).await {
            Ok(dispatched) => {
                info!(job_id = %job.id, request_handle = %dispatched.handle, "job created");
                Ok(dispatched.job)
            }
            Err(e) => {
                if let Err(undo) = self.store.delete_job(job.id).await {
                    error!(job_id = %job.id, error = %undo, "failed to roll back job after dispatch error");
                }
                Err(e.into())
            }
        }
    }

    pub async fn get_job(&self, id: JobId) -> Result<Job, QueueError> {
        self.store
            .get_job(id)
            .await?
            .ok_or(QueueError::NotFound(id))
    }

    /// `{status, retry_count, result_body}` for external consumers.
    pub async fn job_result(&self, id: JobId) -> Result<JobResult, QueueError> {
        Ok(self.get_job(id).await?.to_result())
    }

    pub async fn stats(&self) -> Result<JobStats, QueueError> {
        Ok(self.store.stats().await?)
    }

    pub async fn in_flight(&self) -> Result<usize, QueueError> {
        Ok(self.ledger.pending_count().await?)
    }

    pub fn worker_pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// One Collector run if a worker token is free, `None` otherwise.
    pub async fn collect(&self) -> Result<Option<CollectReport>, StoreError> {
        let Some(token) = self.pool.try_acquire() else {
            debug!("no worker token available; skipping collect");
            return Ok(None);
        };
        let report = self.collector.collect_once().await;
        self.pool.release(token);
        report.map(Some)
    }

    /// Start a Collector run in the background if a worker token is free.
    /// The token travels with the task and is freed however the run ends.
    pub fn spawn_collect(self: &Arc<Self>) -> bool {
        let Some(token) = self.pool.try_acquire() else {
            debug!("no worker token available; skipping collect");
            return false;
        };
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            let _token = token;
            if let Err(e) = queue.collector.collect_once().await {
                warn!(error = %e, "collector run failed");
            }
        });
        true
    }

    pub async fn reap(&self) -> Result<ReapReport, StoreError> {
        self.reaper.reap().await
    }

    pub async fn reap_at(&self, now: chrono::DateTime<chrono::Utc>) -> Result<ReapReport, StoreError> {
        self.reaper.reap_at(now).await
    }

    pub fn spawn_reap(self: &Arc<Self>) {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = queue.reaper.reap().await {
                warn!(error = %e, "reaper pass failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::{InMemorySecretStore, SERVICE_ROLE_SECRET};
    use crate::store::InMemoryStore;
    use crate::transport::InMemoryTransport;
    use relayq_core::JobStatus;

    struct Fixture {
        store: Arc<InMemoryStore>,
        transport: Arc<InMemoryTransport>,
        secrets: Arc<InMemorySecretStore>,
        queue: Arc<JobQueue>,
    }

    fn fixture(config: QueueConfig) -> Fixture {
        let store = InMemoryStore::arc();
        let transport = Arc::new(InMemoryTransport::new());
        let secrets = Arc::new(InMemorySecretStore::with_dispatch_secrets(
            "k",
            "http://consumer",
        ));
        let queue = Arc::new(JobQueue::new(
            store.clone(),
            store.clone(),
            transport.clone(),
            secrets.clone(),
            &config,
        ));
        Fixture {
            store,
            transport,
            secrets,
            queue,
        }
    }

    #[tokio::test]
    async fn create_job_dispatches_before_returning() {
        let f = fixture(QueueConfig::default());
        let job = f
            .queue
            .create_job(NewJob::new("POST", "/ingest"))
            .await
            .unwrap();

        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.retry_count, 0);
        assert_eq!(f.transport.sent_count(), 1);
        assert_eq!(f.queue.in_flight().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn unsupported_verb_creates_nothing() {
        let f = fixture(QueueConfig::default());
        let err = f
            .queue
            .create_job(NewJob::new("PATCH", "/x"))
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::Validation(_)));
        assert_eq!(f.queue.stats().await.unwrap(), JobStats::default());
    }

    #[tokio::test]
    async fn failed_initial_dispatch_rolls_back_the_insert() {
        let f = fixture(QueueConfig::default());
        f.secrets.remove(SERVICE_ROLE_SECRET);

        let err = f
            .queue
            .create_job(NewJob::new("GET", "/x"))
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::Dispatch(DispatchError::Secret(_))));
        assert_eq!(f.store.get_job(JobId::new(1)).await.unwrap(), None);
        assert_eq!(f.queue.stats().await.unwrap(), JobStats::default());
    }

    #[tokio::test]
    async fn job_result_reads_back_status() {
        let f = fixture(QueueConfig::default());
        let job = f.queue.create_job(NewJob::new("GET", "/x")).await.unwrap();
        let (handle, _) = f.transport.last_sent().unwrap();
        f.transport.respond(handle, 200, "ok");

        f.queue.collect().await.unwrap().unwrap();
        let result = f.queue.job_result(job.id).await.unwrap();
        assert_eq!(result.status, JobStatus::Complete);
        assert_eq!(result.result_body.as_deref(), Some("ok"));

        assert!(matches!(
            f.queue.job_result(JobId::new(99)).await,
            Err(QueueError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn collect_is_skipped_when_no_token_is_free() {
        let f = fixture(QueueConfig {
            worker_pool_size: 1,
            ..QueueConfig::default()
        });
        let held = f.queue.worker_pool().try_acquire().unwrap();

        assert_eq!(f.queue.collect().await.unwrap(), None);
        assert!(!f.queue.spawn_collect());

        drop(held);
        assert!(f.queue.collect().await.unwrap().is_some());
        assert_eq!(f.queue.worker_pool().available(), 1);
    }
}
