//! Dispatcher: turns an eligible job into an outbound async HTTP call and
//! records the resulting pending request.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{info, instrument, warn};

use relayq_core::{
    ClaimId, DispatchKind, DomainError, HttpRequest, Job, REQUEST_TIMEOUT_MS, RequestHandle,
};

use crate::secrets::{CONSUMER_FUNCTION_SECRET, SERVICE_ROLE_SECRET, SecretError, SecretStore};
use crate::store::{JobStore, StoreError};
use crate::transport::{HttpTransport, TransportError};

/// Why a dispatch attempt did not happen.
///
/// None of these are retried here. Everything except `Store` fails before
/// the request leaves, so the job keeps its prior state.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Validation(#[from] DomainError),
    #[error(transparent)]
    Secret(#[from] SecretError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A dispatch that went out and was recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatched {
    pub handle: RequestHandle,
    pub job: Job,
}

pub struct Dispatcher {
    store: Arc<dyn JobStore>,
    transport: Arc<dyn HttpTransport>,
    secrets: Arc<dyn SecretStore>,
    request_timeout_ms: u64,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn JobStore>,
        transport: Arc<dyn HttpTransport>,
        secrets: Arc<dyn SecretStore>,
    ) -> Self {
        Self {
            store,
            transport,
            secrets,
            request_timeout_ms: REQUEST_TIMEOUT_MS,
        }
    }

    pub fn with_request_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.request_timeout_ms = timeout_ms;
        self
    }

    /// Resolve secrets and assemble the outbound request for `job`.
    pub async fn build_request(&self, job: &Job) -> Result<HttpRequest, DispatchError> {
        let api_key = self.secrets.secret(SERVICE_ROLE_SECRET).await?;
        let base_url = self.secrets.secret(CONSUMER_FUNCTION_SECRET).await?;

        let mut headers = BTreeMap::new();
        headers.insert("Authorization".to_string(), format!("Bearer {api_key}"));
        headers.insert("Content-Type".to_string(), "application/json".to_string());

        Ok(HttpRequest {
            method: job.verb,
            url: format!("{base_url}{}", job.url_path),
            headers,
            body: job.request_body(),
            timeout_ms: self.request_timeout_ms,
        })
    }

    /// Send `job`'s request and move it to `processing`.
    ///
    /// `claim` must be the reaper claim on the job for `Retry`/`Reclaim`.
    #[instrument(skip(self, job), fields(job_id = %job.id, kind = ?kind), err)]
    pub async fn dispatch(
        &self,
        job: &Job,
        kind: DispatchKind,
        claim: Option<ClaimId>,
    ) -> Result<Dispatched, DispatchError> {
        // Check the guard before anything irreversible leaves the process.
        job.clone().record_dispatch(kind)?;

        let request = self.build_request(job).await?;
        let handle = self.transport.send(request).await?;

        match self
            .store
            .record_dispatch(job.id, handle, kind, claim)
            .await
        {
            Ok(job) => {
                info!(
                    job_id = %job.id,
                    request_handle = %handle,
                    retry_count = job.retry_count,
                    "job dispatched"
                );
                Ok(Dispatched { handle, job })
            }
            Err(e) => {
                warn!(job_id = %job.id, request_handle = %handle, error = %e, "dispatch sent but not recorded");
                self.acknowledge(handle).await;
                Err(e.into())
            }
        }
    }

    /// Tell the transport nobody will read `handle`'s outcome.
    pub async fn acknowledge(&self, handle: RequestHandle) {
        if let Err(e) = self.transport.acknowledge(handle).await {
            warn!(request_handle = %handle, error = %e, "failed to drop abandoned request");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::InMemorySecretStore;
    use crate::store::{InMemoryStore, PendingRequestLedger};
    use crate::transport::InMemoryTransport;
    use relayq_core::{HttpVerb, JobStatus, NewJob};

    struct Fixture {
        store: Arc<InMemoryStore>,
        transport: Arc<InMemoryTransport>,
        secrets: Arc<InMemorySecretStore>,
        dispatcher: Dispatcher,
    }

    fn fixture() -> Fixture {
        let store = InMemoryStore::arc();
        let transport = Arc::new(InMemoryTransport::new());
        let secrets = Arc::new(InMemorySecretStore::with_dispatch_secrets(
            "svc-key",
            "https://consumer.test",
        ));
        let dispatcher = Dispatcher::new(store.clone(), transport.clone(), secrets.clone());
        Fixture {
            store,
            transport,
            secrets,
            dispatcher,
        }
    }

    async fn insert(store: &InMemoryStore, new: NewJob) -> Job {
        store.insert_job(new.validate().unwrap()).await.unwrap()
    }

    #[tokio::test]
    async fn fresh_dispatch_sends_bearer_request_and_records_it() {
        let f = fixture();
        let job = insert(
            &f.store,
            NewJob::new("POST", "/ingest").with_payload(serde_json::json!({"x": 1})),
        )
        .await;

        let dispatched = f
            .dispatcher
            .dispatch(&job, DispatchKind::Fresh, None)
            .await
            .unwrap();
        assert_eq!(dispatched.job.status, JobStatus::Processing);

        let (handle, request) = f.transport.last_sent().unwrap();
        assert_eq!(handle, dispatched.handle);
        assert_eq!(request.method, HttpVerb::Post);
        assert_eq!(request.url, "https://consumer.test/ingest");
        assert_eq!(request.header("authorization"), Some("Bearer svc-key"));
        assert_eq!(request.header("content-type"), Some("application/json"));
        assert_eq!(request.body, serde_json::json!({"x": 1}));
        assert_eq!(request.timeout_ms, REQUEST_TIMEOUT_MS);

        let pending = f.store.pending_for_job(job.id).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].request_handle, handle);
    }

    #[tokio::test]
    async fn get_requests_carry_an_empty_object() {
        let f = fixture();
        let job = insert(
            &f.store,
            NewJob::new("GET", "/status").with_payload(serde_json::json!({"ignored": true})),
        )
        .await;

        f.dispatcher
            .dispatch(&job, DispatchKind::Fresh, None)
            .await
            .unwrap();
        let (_, request) = f.transport.last_sent().unwrap();
        assert_eq!(request.body, serde_json::json!({}));
    }

    #[tokio::test]
    async fn missing_secret_fails_without_sending_or_transitioning() {
        let f = fixture();
        f.secrets.remove(CONSUMER_FUNCTION_SECRET);
        let job = insert(&f.store, NewJob::new("GET", "/x")).await;

        let err = f
            .dispatcher
            .dispatch(&job, DispatchKind::Fresh, None)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Secret(SecretError::Missing(_))));
        assert_eq!(f.transport.sent_count(), 0);

        let stored = f.store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Pending);
        assert_eq!(f.store.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn send_failure_leaves_job_untouched() {
        let f = fixture();
        f.transport.fail_sends(Some("connection pool exhausted"));
        let job = insert(&f.store, NewJob::new("DELETE", "/x")).await;

        let err = f
            .dispatcher
            .dispatch(&job, DispatchKind::Fresh, None)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Transport(_)));

        let stored = f.store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn ineligible_jobs_are_rejected_before_sending() {
        let f = fixture();
        let job = insert(&f.store, NewJob::new("GET", "/x")).await;

        let err = f
            .dispatcher
            .dispatch(&job, DispatchKind::Retry, Some(ClaimId::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Validation(_)));
        assert_eq!(f.transport.sent_count(), 0);
    }

    #[tokio::test]
    async fn lost_claim_drops_the_orphaned_request() {
        let f = fixture();
        let job = insert(&f.store, NewJob::new("POST", "/x").with_retry_limit(3)).await;
        let dispatched = f
            .dispatcher
            .dispatch(&job, DispatchKind::Fresh, None)
            .await
            .unwrap();
        let failed = f.store.fail_request(dispatched.handle).await.unwrap();

        // Never claimed by this id.
        let err = f
            .dispatcher
            .dispatch(&failed, DispatchKind::Retry, Some(ClaimId::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Store(StoreError::ClaimLost(_))));

        let (orphan, _) = f.transport.last_sent().unwrap();
        assert!(f.transport.acknowledged().contains(&orphan));
        let stored = f.store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
    }
}
