//! Correlation record between an in-flight HTTP call and its job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{JobId, RequestHandle};

/// One row of the pending-request ledger.
///
/// Created atomically with a dispatch and deleted exactly once: by the
/// Collector when the call resolves, or by the Reaper when it reclaims a
/// stuck job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRequest {
    pub request_handle: RequestHandle,
    pub job_id: JobId,
    pub created_at: DateTime<Utc>,
}

impl PendingRequest {
    pub fn new(request_handle: RequestHandle, job_id: JobId) -> Self {
        Self {
            request_handle,
            job_id,
            created_at: Utc::now(),
        }
    }
}
