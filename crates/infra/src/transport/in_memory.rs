//! Scriptable transport for tests and local runs.
//!
//! Every sent request is recorded; outcomes stay `Pending` until the test
//! resolves them with [`InMemoryTransport::resolve`] or
//! [`InMemoryTransport::respond`].

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use relayq_core::{HttpRequest, HttpResponse, PollOutcome, RequestHandle};

use super::{HttpTransport, TransportError};

#[derive(Debug, Default)]
struct State {
    next_handle: i64,
    sent: Vec<(RequestHandle, HttpRequest)>,
    outcomes: HashMap<RequestHandle, PollOutcome>,
    acknowledged: Vec<RequestHandle>,
    fail_sends: Option<String>,
}

#[derive(Debug, Default)]
pub struct InMemoryTransport {
    state: Mutex<State>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fix the outcome `poll` reports for `handle`.
    pub fn resolve(&self, handle: RequestHandle, outcome: PollOutcome) {
        self.lock().outcomes.insert(handle, outcome);
    }

    /// Resolve `handle` with an HTTP response.
    pub fn respond(&self, handle: RequestHandle, status_code: u16, body: impl Into<String>) {
        self.resolve(
            handle,
            PollOutcome::Success(HttpResponse::new(status_code, body)),
        );
    }

    /// Resolve every request that is still pending with the same response.
    pub fn respond_all(&self, status_code: u16, body: &str) -> usize {
        let mut state = self.lock();
        let open: Vec<RequestHandle> = state
            .sent
            .iter()
            .map(|(handle, _)| *handle)
            .filter(|handle| {
                !state.outcomes.contains_key(handle) && !state.acknowledged.contains(handle)
            })
            .collect();
        for handle in &open {
            state.outcomes.insert(
                *handle,
                PollOutcome::Success(HttpResponse::new(status_code, body)),
            );
        }
        open.len()
    }

    /// Make every subsequent `send` fail with `reason` (`None` restores).
    pub fn fail_sends(&self, reason: Option<&str>) {
        self.lock().fail_sends = reason.map(str::to_string);
    }

    pub fn sent(&self) -> Vec<(RequestHandle, HttpRequest)> {
        self.lock().sent.clone()
    }

    pub fn sent_count(&self) -> usize {
        self.lock().sent.len()
    }

    pub fn last_sent(&self) -> Option<(RequestHandle, HttpRequest)> {
        self.lock().sent.last().cloned()
    }

    pub fn acknowledged(&self) -> Vec<RequestHandle> {
        self.lock().acknowledged.clone()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl HttpTransport for InMemoryTransport {
    async fn send(&self, request: HttpRequest) -> Result<RequestHandle, TransportError> {
        let mut state = self.lock();
        if let Some(reason) = &state.fail_sends {
            return Err(TransportError::Unavailable(reason.clone()));
        }
        state.next_handle += 1;
        let handle = RequestHandle::new(state.next_handle);
        state.sent.push((handle, request));
        Ok(handle)
    }

    async fn poll(&self, handle: RequestHandle) -> Result<PollOutcome, TransportError> {
        let state = self.lock();
        if let Some(outcome) = state.outcomes.get(&handle) {
            return Ok(outcome.clone());
        }
        if state.sent.iter().any(|(h, _)| *h == handle) {
            Ok(PollOutcome::Pending)
        } else {
            Ok(PollOutcome::error("unknown request handle"))
        }
    }

    async fn acknowledge(&self, handle: RequestHandle) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.outcomes.remove(&handle);
        state.acknowledged.push(handle);
        Ok(())
    }
}
