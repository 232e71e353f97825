//! `reqwest`-backed transport: one tokio task per call, outcomes kept in a
//! handle-keyed table until acknowledged or expired.
//!
//! Handles outlive the process in the ledger, so they come from one
//! process-wide sequence seeded from the wall clock in microseconds. A
//! restarted process starts above every handle its predecessor could have
//! issued unless that one averaged more than a request per microsecond.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, warn};

use relayq_core::{HttpRequest, HttpResponse, HttpVerb, PollOutcome, RequestHandle};

use super::{HttpTransport, TransportError};

/// Default retention of outcomes nobody acknowledged.
pub const DEFAULT_RESPONSE_TTL: Duration = Duration::from_secs(6 * 60 * 60);

#[derive(Debug)]
struct Slot {
    outcome: PollOutcome,
    sent_at: Instant,
}

type Slots = Arc<Mutex<HashMap<RequestHandle, Slot>>>;

static HANDLE_SEQUENCE: OnceLock<AtomicI64> = OnceLock::new();

fn next_handle() -> RequestHandle {
    let sequence =
        HANDLE_SEQUENCE.get_or_init(|| AtomicI64::new(Utc::now().timestamp_micros()));
    RequestHandle::new(sequence.fetch_add(1, Ordering::Relaxed))
}

#[derive(Debug)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    slots: Slots,
    response_ttl: Duration,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            slots: Arc::new(Mutex::new(HashMap::new())),
            response_ttl: DEFAULT_RESPONSE_TTL,
        }
    }

    pub fn with_response_ttl(mut self, ttl: Duration) -> Self {
        self.response_ttl = ttl;
        self
    }

    /// Number of outcomes currently retained (pending or resolved).
    pub fn tracked(&self) -> usize {
        lock(&self.slots).len()
    }

    fn build(&self, request: &HttpRequest) -> Result<reqwest::Request, TransportError> {
        let url = reqwest::Url::parse(&request.url)
            .map_err(|e| TransportError::InvalidRequest(format!("{}: {}", request.url, e)))?;

        let method = match request.method {
            HttpVerb::Get => reqwest::Method::GET,
            HttpVerb::Post => reqwest::Method::POST,
            HttpVerb::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self
            .client
            .request(method, url)
            .timeout(Duration::from_millis(request.timeout_ms));
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if request.method != HttpVerb::Get {
            let body = serde_json::to_vec(&request.body)
                .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
            builder = builder.body(body);
        }

        builder
            .build()
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))
    }

    fn purge_expired(&self) {
        let ttl = self.response_ttl;
        lock(&self.slots).retain(|_, slot| slot.sent_at.elapsed() < ttl);
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<RequestHandle, TransportError> {
        let built = self.build(&request)?;
        self.purge_expired();

        let handle = next_handle();
        lock(&self.slots).insert(
            handle,
            Slot {
                outcome: PollOutcome::Pending,
                sent_at: Instant::now(),
            },
        );

        let client = self.client.clone();
        let slots = self.slots.clone();
        let timeout_ms = request.timeout_ms;
        tokio::spawn(async move {
            let outcome = match client.execute(built).await {
                Ok(response) => {
                    let status_code = response.status().as_u16();
                    match response.text().await {
                        Ok(body) => PollOutcome::Success(HttpResponse::new(status_code, body)),
                        Err(e) => PollOutcome::Error {
                            status_code: Some(status_code),
                            message: format!("failed to read response body: {e}"),
                        },
                    }
                }
                Err(e) if e.is_timeout() => {
                    PollOutcome::error(format!("request timed out after {timeout_ms} ms"))
                }
                Err(e) => PollOutcome::Error {
                    status_code: e.status().map(|s| s.as_u16()),
                    message: e.to_string(),
                },
            };

            debug!(request_handle = %handle, status_code = ?outcome.status_code(), "request resolved");
            if let Some(slot) = lock(&slots).get_mut(&handle) {
                slot.outcome = outcome;
            }
        });

        Ok(handle)
    }

    async fn poll(&self, handle: RequestHandle) -> Result<PollOutcome, TransportError> {
        match lock(&self.slots).get(&handle) {
            Some(slot) => Ok(slot.outcome.clone()),
            None => {
                warn!(request_handle = %handle, "poll for unknown request handle");
                Ok(PollOutcome::error("unknown request handle"))
            }
        }
    }

    async fn acknowledge(&self, handle: RequestHandle) -> Result<(), TransportError> {
        lock(&self.slots).remove(&handle);
        Ok(())
    }
}

fn lock(slots: &Slots) -> MutexGuard<'_, HashMap<RequestHandle, Slot>> {
    slots.lock().unwrap_or_else(PoisonError::into_inner)
}
