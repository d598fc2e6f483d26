//! Snapshot types for persisting and restoring the queue.
//!
//! Snapshots are the bridge between the in-memory [`Queue`](crate::Queue) and
//! the durable storage collaborator. The whole queue is written as one value,
//! since the storage has no partial-row update primitive.

use crate::{error::Result, Error, Priority, Queue, QueuedRequest};
use serde::{Deserialize, Serialize};

/// Version of the snapshot format for future compatibility.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// A point-in-time snapshot of the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    /// Snapshot format version
    pub format_version: u32,
    /// Entries in insertion order
    pub requests: Vec<QueuedRequest>,
}

/// Accepted persisted shapes: the versioned envelope or a bare array.
#[derive(Deserialize)]
#[serde(untagged)]
enum PersistedQueue {
    Versioned(QueueSnapshot),
    Legacy(Vec<QueuedRequest>),
}

impl QueueSnapshot {
    /// Create a snapshot of the given entries.
    pub fn new(requests: Vec<QueuedRequest>) -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            requests,
        }
    }

    /// Create an empty snapshot.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Check the queue invariants (unique ids, `retries <= max_retries`).
    pub fn validate(&self) -> Result<()> {
        Queue::from_requests(self.requests.clone())
            .map(|_| ())
            .map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Serialize to pretty JSON.
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let persisted: PersistedQueue =
            serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))?;

        let snapshot = match persisted {
            PersistedQueue::Versioned(snapshot) => snapshot,
            PersistedQueue::Legacy(requests) => Self::new(requests),
        };

        // Validate format version
        if snapshot.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(Error::InvalidSnapshot(format!(
                "unsupported snapshot format version: {} (max supported: {})",
                snapshot.format_version, SNAPSHOT_FORMAT_VERSION
            )));
        }

        snapshot.validate()?;
        Ok(snapshot)
    }
}

/// Metadata about a snapshot (without the full data).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    pub format_version: u32,
    pub total: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    /// Entries that have failed at least once
    pub retrying: usize,
}

impl From<&QueueSnapshot> for SnapshotMetadata {
    fn from(snapshot: &QueueSnapshot) -> Self {
        let count = |priority: Priority| {
            snapshot
                .requests
                .iter()
                .filter(|r| r.priority == priority)
                .count()
        };

        Self {
            format_version: snapshot.format_version,
            total: snapshot.len(),
            high: count(Priority::High),
            medium: count(Priority::Medium),
            low: count(Priority::Low),
            retrying: snapshot.requests.iter().filter(|r| r.retries > 0).count(),
        }
    }
}
