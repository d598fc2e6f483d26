//! Aggregated results of a drain.

use crate::{FailureClass, RequestId};
use serde::{Deserialize, Serialize};

/// A request that failed during a drain and was dropped from the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncError {
    pub request_id: RequestId,
    pub error: String,
    pub class: FailureClass,
}

/// Outcome of one drain of the queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    /// Requests replayed successfully and removed
    pub success: usize,
    /// Requests dropped after a permanent failure or an exhausted retry budget
    pub failed: usize,
    /// Requests kept in the queue for a later drain
    pub skipped: usize,
    /// One entry per failed request
    pub errors: Vec<SyncError>,
    /// Suggested delay before the next drain, when requests were kept
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

impl SyncResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&mut self) {
        self.success += 1;
    }

    pub fn record_failure(
        &mut self,
        request_id: impl Into<RequestId>,
        error: impl Into<String>,
        class: FailureClass,
    ) {
        self.failed += 1;
        self.errors.push(SyncError {
            request_id: request_id.into(),
            error: error.into(),
            class,
        });
    }

    /// Record a request kept for retry, tracking the shortest backoff delay.
    pub fn record_skipped(&mut self, delay_ms: u64) {
        self.skipped += 1;
        self.retry_after_ms = Some(match self.retry_after_ms {
            Some(current) => current.min(delay_ms),
            None => delay_ms,
        });
    }

    /// Total requests looked at.
    pub fn processed(&self) -> usize {
        self.success + self.failed + self.skipped
    }

    /// True when nothing was dropped.
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}
