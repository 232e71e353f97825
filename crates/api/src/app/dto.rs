use serde::{Deserialize, Serialize};

use relayq_core::{Job, JobId, JobStatus, NewJob};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    pub verb: String,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
    pub url_path: String,
    #[serde(default)]
    pub retry_limit: Option<i32>,
}

impl From<CreateJobRequest> for NewJob {
    fn from(req: CreateJobRequest) -> Self {
        NewJob {
            verb: req.verb,
            payload: req.payload,
            url_path: req.url_path,
            retry_limit: req.retry_limit,
        }
    }
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct JobCreatedResponse {
    pub id: JobId,
    pub status: JobStatus,
    pub retry_count: i32,
}

impl From<&Job> for JobCreatedResponse {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            status: job.status,
            retry_count: job.retry_count,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TaskStartedResponse {
    pub started: bool,
}
