//! HTTP request/outcome values exchanged with a transport.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::job::HttpVerb;

/// Per-attempt timeout handed to the transport.
pub const REQUEST_TIMEOUT_MS: u64 = 6000;

/// A fully resolved outbound call, ready for the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpRequest {
    pub method: HttpVerb,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: serde_json::Value,
    pub timeout_ms: u64,
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A response observed by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpResponse {
    pub status_code: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status_code: u16, body: impl Into<String>) -> Self {
        Self {
            status_code,
            body: body.into(),
        }
    }

    /// 2xx only. Any other status is a failed attempt.
    pub fn is_success(&self) -> bool {
        (200..=299).contains(&self.status_code)
    }
}

/// Answer to polling a request handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PollOutcome {
    /// No outcome yet; revisit on a later run.
    Pending,
    /// The transport received a response (any status code).
    Success(HttpResponse),
    /// The transport itself failed (timeout, connection error, ...).
    Error {
        status_code: Option<u16>,
        message: String,
    },
}

impl PollOutcome {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            status_code: None,
            message: message.into(),
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, PollOutcome::Pending)
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            PollOutcome::Pending => None,
            PollOutcome::Success(resp) => Some(resp.status_code),
            PollOutcome::Error { status_code, .. } => *status_code,
        }
    }
}
