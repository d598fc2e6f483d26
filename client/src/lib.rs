//! # Outbox Client
//!
//! Async runtime for the outbox engine: durable storage, connectivity
//! tracking, queue replay and the offline state store that ties them
//! together.
//!
//! ## Wiring
//!
//! ```rust,no_run
//! use outbox_client::{
//!     ConnectivityMonitor, DurableQueueStore, HttpExecutor, MemoryStorage, OfflineStateStore,
//!     SyncEngine,
//! };
//! use outbox_engine::{BackoffPolicy, HttpMethod, NewRequest};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let queue = Arc::new(DurableQueueStore::new(Arc::new(MemoryStorage::new())));
//! let engine = Arc::new(SyncEngine::new(queue, BackoffPolicy::default()));
//! let executor = Arc::new(HttpExecutor::new("https://api.example.com", None)?);
//! let monitor = ConnectivityMonitor::new_shared(false);
//!
//! let store = OfflineStateStore::new(monitor.clone(), engine, executor);
//! store.init().await?;
//!
//! store.enqueue(NewRequest::new(HttpMethod::Post, "/contacts")).await?;
//!
//! // Reconnecting drains the queue in the background
//! monitor.set_online(true);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connectivity;
pub mod error;
pub mod executor;
pub mod optimistic;
pub mod queue_store;
pub mod state;
pub mod storage;
pub mod sync;

pub use config::{Config, ConfigError};
pub use connectivity::{ConnectivityMonitor, Subscription};
pub use error::{Error, ExecuteError, Result, StorageError};
pub use executor::{Executor, FnExecutor, HttpExecutor};
pub use optimistic::{
    Mutation, MutationOutcome, MutationRequest, MutationState, OptimisticUpdateController,
};
pub use queue_store::DurableQueueStore;
pub use state::{OfflineState, OfflineStateStore};
pub use storage::{FileStorage, MemoryStorage, Storage};
pub use sync::SyncEngine;
