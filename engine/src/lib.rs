//! # Outbox Engine
//!
//! A deterministic core for offline-first mutation queues.
//!
//! This crate holds the logic of an offline sync subsystem: the queued request
//! model, the ordered queue and its persisted format, failure classification
//! and retry backoff, and field-level conflict detection and resolution
//! between a stale local copy of an entity and the server's copy.
//!
//! ## Design Principles
//!
//! - **No IO**: The engine never reads storage, the network or the clock
//! - **Deterministic**: Ids and timestamps are passed in, so the same inputs
//!   always produce the same outputs
//! - **Testable**: Pure logic, no mocks needed
//! - **Portable**: Runs anywhere Rust runs, and embeds in mobile hosts via [`ffi`]
//!
//! ## Core Concepts
//!
//! ### Queued requests
//!
//! A mutation made while offline becomes a [`QueuedRequest`]: method, url,
//! JSON body, headers, a [`Priority`] tier and a retry budget.
//!
//! ### Queue
//!
//! The [`Queue`] keeps entries in insertion order and hands them out in drain
//! order: high before medium before low, oldest first within a tier.
//! [`Queue::record_failure`] spends one retry and drops the entry once its
//! budget is exhausted.
//!
//! ### Failures
//!
//! [`Failure::classify`] splits replay failures into transient (network,
//! timeout, 5xx) and permanent (other 4xx, malformed requests).
//! [`BackoffPolicy`] computes the
//! delay before the next attempt.
//!
//! ### Conflicts
//!
//! [`detect`] lists the fields where a local and a server copy disagree.
//! [`resolve`] applies a [`ResolutionStrategy`]; [`auto_merge`] applies an
//! [`AutoMergeStrategy`] without user interaction.
//!
//! ## Quick Start
//!
//! ```rust
//! use outbox_engine::{HttpMethod, NewRequest, Priority, Queue};
//! use serde_json::json;
//!
//! let mut queue = Queue::new();
//!
//! queue
//!     .enqueue(
//!         NewRequest::new(HttpMethod::Post, "/contacts").with_data(json!({"name": "Alice"})),
//!         "req-1",
//!         1706745600000,
//!     )
//!     .unwrap();
//! queue
//!     .enqueue(
//!         NewRequest::new(HttpMethod::Delete, "/contacts/7").with_priority(Priority::High),
//!         "req-2",
//!         1706745601000,
//!     )
//!     .unwrap();
//!
//! let order: Vec<_> = queue.ordered().iter().map(|r| r.id.as_str()).collect();
//! assert_eq!(order, vec!["req-2", "req-1"]);
//! ```
//!
//! ## Persistence
//!
//! Use [`Queue::to_snapshot`] and [`Queue::from_snapshot`] with
//! [`QueueSnapshot`]. The whole queue is written as one JSON value.

pub mod conflict;
pub mod error;
pub mod ffi;
pub mod outcome;
pub mod queue;
pub mod request;
pub mod resolve;
pub mod retry;
pub mod snapshot;

// Re-export main types at crate root
pub use conflict::{detect, detect_entities, detect_with, Conflict, KeyScope};
pub use error::Error;
pub use outcome::{SyncError, SyncResult};
pub use queue::{Queue, RetryDecision};
pub use request::{HttpMethod, NewRequest, Priority, QueuedRequest, DEFAULT_MAX_RETRIES};
pub use resolve::{
    auto_merge, auto_merge_entities, resolve, resolve_entities, resolve_with, AutoMergeStrategy,
    ResolutionStrategy, Selection, Selections,
};
pub use retry::{BackoffPolicy, Failure, FailureClass};
pub use snapshot::{QueueSnapshot, SnapshotMetadata, SNAPSHOT_FORMAT_VERSION};

/// Type aliases for clarity
pub type RequestId = String;
pub type Timestamp = u64;
