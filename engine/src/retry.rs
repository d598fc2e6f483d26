//! Failure classification and retry backoff.
//!
//! The networking collaborator reports why a replay failed as a [`Failure`].
//! Transient failures keep the request queued until its retry budget is used
//! up; permanent failures drop it immediately.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a replay attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type", content = "status")]
pub enum Failure {
    /// The request never reached the server
    Network,
    /// No response within the allowed time
    Timeout,
    /// The server answered with a non-success status
    Status(u16),
    /// The request could not be built, e.g. a malformed header
    Invalid,
}

/// Whether a failed request is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureClass {
    /// Network failure, timeout, 5xx
    Transient,
    /// Client error or malformed request that will fail the same way again
    Permanent,
}

impl Failure {
    /// Classify the failure.
    ///
    /// 401 is transient: an expired session is refreshed by the networking
    /// collaborator and the request is replayed afterwards. 408 and 429 ask
    /// the client to come back later.
    pub fn classify(&self) -> FailureClass {
        match self {
            Failure::Network | Failure::Timeout => FailureClass::Transient,
            Failure::Invalid => FailureClass::Permanent,
            Failure::Status(status) => match *status {
                500..=599 => FailureClass::Transient,
                401 | 408 | 429 => FailureClass::Transient,
                _ => FailureClass::Permanent,
            },
        }
    }

    pub fn is_transient(&self) -> bool {
        self.classify() == FailureClass::Transient
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::Network => f.write_str("network error"),
            Failure::Timeout => f.write_str("timeout"),
            Failure::Status(status) => write!(f, "HTTP {}", status),
            Failure::Invalid => f.write_str("invalid request"),
        }
    }
}

/// Exponential backoff between drains of a failing request.
///
/// `delay = initial_delay * 2^retries`, capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackoffPolicy {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
        }
    }
}

impl BackoffPolicy {
    pub fn new(initial_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            initial_delay_ms,
            max_delay_ms,
        }
    }

    /// Delay before the next attempt of a request that has failed `retries` times.
    pub fn delay_for(&self, retries: u32) -> u64 {
        let factor = 1u64.checked_shl(retries).unwrap_or(u64::MAX);
        self.initial_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms)
    }
}
