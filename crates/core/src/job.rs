//! Job model and its lifecycle state machine.
//!
//! ```text
//! pending ──dispatch──► processing ──2xx──► complete
//!                          │   ▲
//!                    error │   │ reaper (retry_count < retry_limit)
//!                          ▼   │
//!                         failed
//! ```
//!
//! A stuck `processing` job is reclaimed in place (`retry_count += 1`,
//! fresh dispatch), or exhausted to `failed` once its retry budget is spent.
//! All mutations go through the methods below; a rejected guard leaves the
//! job untouched.

use core::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::JobId;

/// Retry ceiling applied when the producer does not choose one.
pub const DEFAULT_RETRY_LIMIT: i32 = 10;

/// How long a job may sit in `processing` (measured from `created_at`)
/// before the reaper presumes its request lost.
pub const STUCK_PROCESSING_THRESHOLD: Duration = Duration::from_secs(10 * 60);

/// HTTP methods a job may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpVerb {
    Get,
    Post,
    Delete,
}

impl HttpVerb {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpVerb::Get => "GET",
            HttpVerb::Post => "POST",
            HttpVerb::Delete => "DELETE",
        }
    }

    /// Whether the job payload is sent as the request body.
    pub fn carries_payload(&self) -> bool {
        matches!(self, HttpVerb::Post | HttpVerb::Delete)
    }
}

impl core::fmt::Display for HttpVerb {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpVerb {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpVerb::Get),
            "POST" => Ok(HttpVerb::Post),
            "DELETE" => Ok(HttpVerb::Delete),
            _ => Err(DomainError::validation(format!(
                "unsupported verb '{s}' (expected GET, POST or DELETE)"
            ))),
        }
    }
}

/// Job lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Complete,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Complete => "complete",
            JobStatus::Failed => "failed",
        }
    }
}

impl core::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "complete" => Ok(JobStatus::Complete),
            "failed" => Ok(JobStatus::Failed),
            other => Err(DomainError::validation(format!("unknown job status '{other}'"))),
        }
    }
}

/// Why a job is being dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchKind {
    /// First dispatch, right after creation.
    Fresh,
    /// Reaper retry of a `failed` job.
    Retry,
    /// Reaper reclaim of a job stuck in `processing`.
    Reclaim,
}

/// What the reaper should do with a job it scanned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReapAction {
    Retry,
    Reclaim,
    Exhaust,
}

/// Producer input for job creation (unvalidated).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewJob {
    pub verb: String,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
    pub url_path: String,
    #[serde(default)]
    pub retry_limit: Option<i32>,
}

impl NewJob {
    pub fn new(verb: impl Into<String>, url_path: impl Into<String>) -> Self {
        Self {
            verb: verb.into(),
            payload: None,
            url_path: url_path.into(),
            retry_limit: None,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_retry_limit(mut self, retry_limit: i32) -> Self {
        self.retry_limit = Some(retry_limit);
        self
    }

    /// Check the verb whitelist and apply defaults.
    pub fn validate(self) -> DomainResult<ValidatedJob> {
        let verb: HttpVerb = self.verb.parse()?;
        let retry_limit = self.retry_limit.unwrap_or(DEFAULT_RETRY_LIMIT);
        if retry_limit < 0 {
            return Err(DomainError::validation(format!(
                "retry_limit must not be negative (got {retry_limit})"
            )));
        }
        Ok(ValidatedJob {
            verb,
            payload: self.payload,
            url_path: self.url_path,
            retry_limit,
        })
    }
}

/// A creation request that passed validation; ready for insertion.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedJob {
    pub verb: HttpVerb,
    pub payload: Option<serde_json::Value>,
    pub url_path: String,
    pub retry_limit: i32,
}

/// A unit of work: one outbound HTTP call to be made and reconciled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub verb: HttpVerb,
    pub payload: Option<serde_json::Value>,
    pub url_path: String,
    pub status: JobStatus,
    pub retry_count: i32,
    pub retry_limit: i32,
    pub result_body: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Materialize a freshly inserted job.
    pub fn from_validated(id: JobId, new: ValidatedJob, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            verb: new.verb,
            payload: new.payload,
            url_path: new.url_path,
            status: JobStatus::Pending,
            retry_count: 0,
            retry_limit: new.retry_limit,
            result_body: None,
            created_at,
            updated_at: created_at,
        }
    }

    /// Body to send: the payload for POST/DELETE, otherwise an empty object.
    pub fn request_body(&self) -> serde_json::Value {
        match (&self.payload, self.verb.carries_payload()) {
            (Some(payload), true) => payload.clone(),
            _ => serde_json::json!({}),
        }
    }

    pub fn is_retry_eligible(&self) -> bool {
        self.status == JobStatus::Failed && self.retry_count < self.retry_limit
    }

    pub fn is_stuck(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Processing && self.created_at < now - stuck_threshold()
    }

    /// `complete`, or `failed` with no retry budget left.
    pub fn is_terminal(&self) -> bool {
        match self.status {
            JobStatus::Complete => true,
            JobStatus::Failed => !self.is_retry_eligible(),
            JobStatus::Pending | JobStatus::Processing => false,
        }
    }

    /// Decide what a reaper sweep at `now` does with this job, if anything.
    pub fn reap_action(&self, now: DateTime<Utc>) -> Option<ReapAction> {
        if self.is_retry_eligible() {
            return Some(ReapAction::Retry);
        }
        if self.is_stuck(now) {
            return Some(if self.retry_count < self.retry_limit {
                ReapAction::Reclaim
            } else {
                ReapAction::Exhaust
            });
        }
        None
    }

    /// Apply a dispatch: the job ends in `processing`.
    pub fn record_dispatch(&mut self, kind: DispatchKind) -> DomainResult<()> {
        match kind {
            DispatchKind::Fresh => {
                if self.status != JobStatus::Pending {
                    return Err(DomainError::transition(self.status, "dispatch"));
                }
            }
            DispatchKind::Retry => {
                if !self.is_retry_eligible() {
                    return Err(DomainError::transition(self.describe(), "retry"));
                }
            }
            DispatchKind::Reclaim => {
                if self.status != JobStatus::Processing || self.retry_count >= self.retry_limit {
                    return Err(DomainError::transition(self.describe(), "reclaim"));
                }
                self.retry_count += 1;
            }
        }
        self.status = JobStatus::Processing;
        self.touch();
        Ok(())
    }

    /// A 2xx response arrived.
    pub fn complete(&mut self, body: impl Into<String>) -> DomainResult<()> {
        if self.status != JobStatus::Processing {
            return Err(DomainError::transition(self.status, "complete"));
        }
        self.status = JobStatus::Complete;
        self.result_body = Some(body.into());
        self.touch();
        Ok(())
    }

    /// A non-2xx response or a transport error arrived.
    pub fn fail(&mut self) -> DomainResult<()> {
        if self.status != JobStatus::Processing {
            return Err(DomainError::transition(self.status, "fail"));
        }
        self.status = JobStatus::Failed;
        self.retry_count += 1;
        self.touch();
        Ok(())
    }

    /// Give up on a stuck job whose retry budget is spent.
    pub fn exhaust(&mut self) -> DomainResult<()> {
        if self.status != JobStatus::Processing || self.retry_count < self.retry_limit {
            return Err(DomainError::transition(self.describe(), "exhaust"));
        }
        self.status = JobStatus::Failed;
        self.touch();
        Ok(())
    }

    pub fn to_result(&self) -> JobResult {
        JobResult {
            id: self.id,
            status: self.status,
            retry_count: self.retry_count,
            result_body: self.result_body.clone(),
        }
    }

    fn describe(&self) -> String {
        format!(
            "{} (retry {}/{})",
            self.status, self.retry_count, self.retry_limit
        )
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// What external consumers read back for a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub id: JobId,
    pub status: JobStatus,
    pub retry_count: i32,
    pub result_body: Option<String>,
}

fn stuck_threshold() -> chrono::Duration {
    chrono::Duration::seconds(STUCK_PROCESSING_THRESHOLD.as_secs() as i64)
}
