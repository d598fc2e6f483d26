//! Offline state store.
//!
//! The single source of truth for offline awareness. It owns the queue, the
//! sync engine and the connectivity subscription, and publishes an
//! [`OfflineState`] snapshot after every change. Other components go through
//! this store rather than touching the queue directly, which keeps
//! `pending_sync` equal to the queue length.

use crate::connectivity::ConnectivityMonitor;
use crate::error::{Error, Result};
use crate::executor::Executor;
use crate::queue_store::DurableQueueStore;
use crate::sync::SyncEngine;
use outbox_engine::{
    Conflict, NewRequest, QueuedRequest, RequestId, ResolutionStrategy, SyncResult, Timestamp,
};
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Snapshot of offline state for UI consumers.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineState {
    pub is_online: bool,
    /// Queue contents in drain order
    pub queued_requests: Vec<QueuedRequest>,
    pub last_sync: Option<Timestamp>,
    pub is_syncing: bool,
    /// Always equal to `queued_requests.len()`
    pub pending_sync: usize,
}

/// Process-wide offline state holder.
///
/// Constructed once by the application and shared via `Arc`.
pub struct OfflineStateStore {
    monitor: Arc<ConnectivityMonitor>,
    queue: Arc<DurableQueueStore>,
    engine: Arc<SyncEngine>,
    default_executor: Arc<dyn Executor>,
    state: watch::Sender<OfflineState>,
    initialized: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl OfflineStateStore {
    pub fn new(
        monitor: Arc<ConnectivityMonitor>,
        engine: Arc<SyncEngine>,
        default_executor: Arc<dyn Executor>,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(OfflineState {
            is_online: monitor.is_online(),
            ..OfflineState::default()
        });

        Arc::new(Self {
            queue: engine.queue().clone(),
            monitor,
            engine,
            default_executor,
            state,
            initialized: AtomicBool::new(false),
            task: Mutex::new(None),
        })
    }

    /// Load the persisted queue and start following connectivity.
    ///
    /// Calling it again is a no-op. Every transition to online while requests
    /// are pending starts a drain; when a drain keeps requests for retry, one
    /// follow-up drain is scheduled after the backoff delay.
    pub async fn init(self: &Arc<Self>) -> Result<()> {
        if self.initialized.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        if let Err(e) = self.load_queue().await {
            self.initialized.store(false, Ordering::Release);
            return Err(e);
        }

        let state = self.state();
        tracing::info!(
            online = state.is_online,
            pending = state.pending_sync,
            "Offline state store initialized"
        );

        // Starting online with a backlog drains right away, on the same timer
        // that schedules follow-ups.
        let drain_now = (state.is_online && state.pending_sync > 0).then_some(Duration::ZERO);
        let handle = tokio::spawn(follow_connectivity(
            Arc::downgrade(self),
            self.monitor.watch(),
            drain_now,
        ));
        if let Some(previous) = self.lock_task().replace(handle) {
            previous.abort();
        }

        Ok(())
    }

    /// Stop following connectivity.
    pub fn dispose(&self) {
        if let Some(handle) = self.lock_task().take() {
            handle.abort();
        }
        self.initialized.store(false, Ordering::Release);
        tracing::info!("Offline state store disposed");
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    // ========================================================================
    // Mutators
    // ========================================================================

    /// Queue a request for replay, returning its id.
    pub async fn add_to_queue(&self, request: NewRequest) -> Result<RequestId> {
        self.ensure_initialized()?;
        let queued = self.queue.enqueue(request).await?;
        self.refresh().await;
        Ok(queued.id)
    }

    /// Alias of [`add_to_queue`](Self::add_to_queue).
    pub async fn enqueue(&self, request: NewRequest) -> Result<RequestId> {
        self.add_to_queue(request).await
    }

    pub async fn remove_from_queue(&self, id: &str) -> Result<()> {
        self.ensure_initialized()?;
        self.queue.remove(id).await?;
        self.refresh().await;
        Ok(())
    }

    /// Drain the queue once with `executor`, or the default executor.
    ///
    /// Connectivity is not consulted; replay failures land in the result.
    /// State is republished after every settled entry.
    pub async fn sync_queue(&self, executor: Option<&dyn Executor>) -> Result<SyncResult> {
        self.ensure_initialized()?;
        let executor = executor.unwrap_or(self.default_executor.as_ref());

        self.state.send_modify(|state| state.is_syncing = true);
        let result = self.engine.drain_with(executor, || self.refresh()).await;
        self.refresh().await;

        if let Err(e) = &result {
            tracing::error!(error = %e, "Queue drain aborted");
        }
        result
    }

    pub async fn clear_queue(&self) -> Result<()> {
        self.ensure_initialized()?;
        self.queue.clear().await?;
        self.refresh().await;
        Ok(())
    }

    /// Reload the queue and `lastSync` from storage.
    pub async fn load_queue(&self) -> Result<()> {
        self.queue.load().await?;
        self.refresh().await;
        Ok(())
    }

    /// Recompute `pending_sync` and republish state from the queue.
    pub async fn update_pending_sync(&self) {
        self.refresh().await;
    }

    // ========================================================================
    // Readers
    // ========================================================================

    pub fn state(&self) -> OfflineState {
        self.state.borrow().clone()
    }

    /// Receiver that observes every published state.
    pub fn subscribe(&self) -> watch::Receiver<OfflineState> {
        self.state.subscribe()
    }

    pub async fn get_queue(&self) -> Vec<QueuedRequest> {
        self.queue.get_all().await
    }

    pub async fn get_queue_size(&self) -> usize {
        self.queue.size().await
    }

    pub fn is_online(&self) -> bool {
        self.monitor.is_online()
    }

    pub fn monitor(&self) -> &Arc<ConnectivityMonitor> {
        &self.monitor
    }

    // ========================================================================
    // Conflicts
    // ========================================================================

    pub fn detect_conflicts(
        &self,
        local: &Value,
        server: &Value,
        id_field: &str,
    ) -> Result<Vec<Conflict>> {
        Ok(outbox_engine::detect(local, server, id_field)?)
    }

    pub fn resolve_conflicts(
        &self,
        strategy: &ResolutionStrategy,
        local: &Value,
        server: &Value,
    ) -> Result<Value> {
        Ok(outbox_engine::resolve(strategy, local, server)?)
    }

    /// Ask `prompt` for a strategy when there are conflicts.
    ///
    /// Fails with `ResolutionCancelled` when the prompt returns `None`.
    pub fn resolve_interactively<P>(
        &self,
        conflicts: &[Conflict],
        local: &Value,
        server: &Value,
        prompt: P,
    ) -> Result<Value>
    where
        P: FnOnce(&[Conflict]) -> Option<ResolutionStrategy>,
    {
        Ok(outbox_engine::resolve_with(conflicts, local, server, prompt)?)
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn ensure_initialized(&self) -> Result<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(Error::NotInitialized)
        }
    }

    fn lock_task(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn refresh(&self) {
        let queued_requests = self.queue.get_all().await;
        let last_sync = self.queue.last_sync().await;
        let is_syncing = self.engine.is_syncing();
        let is_online = self.monitor.is_online();

        self.state.send_modify(|state| {
            state.pending_sync = queued_requests.len();
            state.queued_requests = queued_requests;
            state.last_sync = last_sync;
            state.is_syncing = is_syncing;
            state.is_online = is_online;
        });
    }

    fn publish_online(&self, online: bool) {
        self.state.send_if_modified(|state| {
            let changed = state.is_online != online;
            state.is_online = online;
            changed
        });
    }

    /// Drain with the default executor; returns the follow-up delay, if any.
    async fn auto_drain(&self) -> Option<Duration> {
        match self.sync_queue(None).await {
            Ok(result) => {
                let retry_after = result
                    .retry_after_ms
                    .filter(|_| self.state().pending_sync > 0)
                    .map(Duration::from_millis);
                if let Some(delay) = retry_after {
                    tracing::debug!(
                        delay_ms = delay.as_millis() as u64,
                        "Follow-up drain scheduled"
                    );
                }
                retry_after
            }
            Err(e) => {
                tracing::error!(error = %e, "Automatic drain failed");
                None
            }
        }
    }
}

impl Drop for OfflineStateStore {
    fn drop(&mut self) {
        if let Some(handle) = self.lock_task().take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for OfflineStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineStateStore")
            .field("state", &*self.state.borrow())
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}

/// Background task: drain on online transitions and after backoff delays.
async fn follow_connectivity(
    weak: Weak<OfflineStateStore>,
    mut online: watch::Receiver<bool>,
    mut retry_after: Option<Duration>,
) {

    loop {
        let delay = retry_after;
        let follow_up = async move {
            match delay {
                Some(delay) => tokio::time::sleep(delay).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            changed = online.changed() => {
                if changed.is_err() {
                    break;
                }
                let is_online = *online.borrow_and_update();
                let Some(store) = weak.upgrade() else { break };

                store.publish_online(is_online);
                let pending = store.state().pending_sync;
                retry_after = if is_online && pending > 0 {
                    tracing::info!(pending, "Back online, draining queue");
                    store.auto_drain().await
                } else {
                    None
                };
            }
            _ = follow_up => {
                let Some(store) = weak.upgrade() else { break };
                retry_after = if store.is_online() && store.state().pending_sync > 0 {
                    store.auto_drain().await
                } else {
                    None
                };
            }
        }
    }
}
