//! Unified error handling for the client runtime.

use crate::config::ConfigError;
use outbox_engine::Failure;

/// Runtime error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The durable storage rejected a read or write. Never swallowed.
    #[error("Queue persistence failed: {0}")]
    QueuePersistence(StorageError),

    #[error("Engine error: {0}")]
    Engine(#[from] outbox_engine::Error),

    /// A direct online mutation was rejected.
    #[error("Request failed: {0}")]
    Execute(#[from] ExecuteError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Offline state store is not initialized")]
    NotInitialized,
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        Error::QueuePersistence(err)
    }
}

/// Failures of the durable storage collaborator.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Rejection reported by the networking collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecuteError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The request could not be built; replaying it cannot succeed
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ExecuteError {
    /// The failure signal the engine classifies.
    pub fn failure(&self) -> Failure {
        match self {
            ExecuteError::Network(_) => Failure::Network,
            ExecuteError::Timeout => Failure::Timeout,
            ExecuteError::Status { status, .. } => Failure::Status(*status),
            ExecuteError::InvalidRequest(_) => Failure::Invalid,
        }
    }
}

/// Result type alias for the client runtime.
pub type Result<T> = std::result::Result<T, Error>;
