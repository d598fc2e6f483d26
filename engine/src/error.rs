//! Error types for the Outbox engine.

use crate::RequestId;
use thiserror::Error;

/// All possible errors from the Outbox engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Queue errors
    #[error("request not found: {0}")]
    RequestNotFound(RequestId),

    #[error("duplicate request id: {0}")]
    DuplicateRequestId(RequestId),

    #[error("request {id} has {retries} retries, exceeding its limit of {max_retries}")]
    RetryInvariant {
        id: RequestId,
        retries: u32,
        max_retries: u32,
    },

    // Persistence format errors
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    // Conflict errors
    #[error("{0} entity is not a JSON object")]
    NotAnObject(&'static str),

    #[error("conflict resolution cancelled")]
    ResolutionCancelled,
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
