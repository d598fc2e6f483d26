//! Sync engine: replays the durable queue against the server.
//!
//! A drain walks a snapshot of the queue in drain order and replays each
//! entry once. The queue is persisted after every entry, so a crash mid-drain
//! leaves a valid queue holding exactly the entries not yet settled.

use crate::error::{Error, ExecuteError, Result};
use crate::executor::Executor;
use crate::queue_store::{now_millis, DurableQueueStore};
use outbox_engine::{BackoffPolicy, FailureClass, QueuedRequest, RetryDecision, SyncResult};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Drives replay of queued requests.
#[derive(Debug)]
pub struct SyncEngine {
    queue: Arc<DurableQueueStore>,
    backoff: BackoffPolicy,
    request_timeout: Option<Duration>,
    syncing: AtomicBool,
}

/// Clears the syncing flag on every exit path.
struct SyncGuard<'a>(&'a AtomicBool);

impl<'a> SyncGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SyncGuard(flag))
    }
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// How one replay attempt settled.
enum Settled {
    Succeeded,
    Retrying { delay_ms: u64 },
    Dropped { error: String, class: FailureClass },
    Gone,
}

impl SyncEngine {
    pub fn new(queue: Arc<DurableQueueStore>, backoff: BackoffPolicy) -> Self {
        Self {
            queue,
            backoff,
            request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
            syncing: AtomicBool::new(false),
        }
    }

    /// Set the per-request timeout; `None` waits for the executor indefinitely.
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn queue(&self) -> &Arc<DurableQueueStore> {
        &self.queue
    }

    pub fn backoff(&self) -> BackoffPolicy {
        self.backoff
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::Acquire)
    }

    /// Replay every queued request once.
    ///
    /// A call made while another drain is running returns an empty result
    /// without touching the queue. Persistence failures abort the drain.
    pub async fn drain(&self, executor: &dyn Executor) -> Result<SyncResult> {
        self.drain_with(executor, || async {}).await
    }

    /// Like [`drain`](Self::drain), awaiting `on_settled` after each entry
    /// is removed or rescheduled.
    pub async fn drain_with<F, Fut>(
        &self,
        executor: &dyn Executor,
        mut on_settled: F,
    ) -> Result<SyncResult>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ()>,
    {
        let Some(_guard) = SyncGuard::acquire(&self.syncing) else {
            tracing::warn!("Drain already in progress, skipping");
            return Ok(SyncResult::default());
        };

        let entries = self.queue.get_all().await;
        tracing::info!(queued = entries.len(), "Starting queue drain");

        let mut result = SyncResult::new();
        for entry in &entries {
            match self.settle(executor, entry).await? {
                Settled::Succeeded => result.record_success(),
                Settled::Retrying { delay_ms } => result.record_skipped(delay_ms),
                Settled::Dropped { error, class } => {
                    result.record_failure(entry.id.clone(), error, class)
                }
                Settled::Gone => continue,
            }
            on_settled().await;
        }

        // Every entry is already settled and persisted at this point
        if let Err(e) = self.queue.set_last_sync(now_millis()).await {
            tracing::error!(error = %e, "Failed to record last sync time");
        }

        tracing::info!(
            success = result.success,
            failed = result.failed,
            skipped = result.skipped,
            retry_after_ms = ?result.retry_after_ms,
            "Queue drain finished"
        );

        Ok(result)
    }

    async fn settle(&self, executor: &dyn Executor, entry: &QueuedRequest) -> Result<Settled> {
        // Removed by the caller while earlier entries were replaying
        if self.queue.get(&entry.id).await.is_none() {
            return Ok(Settled::Gone);
        }

        let err = match self.attempt(executor, entry).await {
            Ok(_) => {
                self.queue.remove(&entry.id).await?;
                tracing::debug!(request_id = %entry.id, url = %entry.url, "Request replayed");
                return Ok(Settled::Succeeded);
            }
            Err(err) => err,
        };

        let class = err.failure().classify();
        match class {
            FailureClass::Transient => match self.queue.record_failure(&entry.id).await {
                Ok(RetryDecision::Retry { retries }) => {
                    let delay_ms = self.backoff.delay_for(retries);
                    tracing::warn!(
                        request_id = %entry.id,
                        retries,
                        max_retries = entry.max_retries,
                        delay_ms,
                        error = %err,
                        "Replay failed, keeping request for retry"
                    );
                    Ok(Settled::Retrying { delay_ms })
                }
                Ok(RetryDecision::Exhausted { request }) => {
                    tracing::error!(
                        request_id = %entry.id,
                        retries = request.retries,
                        error = %err,
                        "Retries exhausted, dropping request"
                    );
                    Ok(Settled::Dropped {
                        error: format!("{} (gave up after {} retries)", err, request.retries),
                        class,
                    })
                }
                Err(Error::Engine(outbox_engine::Error::RequestNotFound(_))) => Ok(Settled::Gone),
                Err(e) => Err(e),
            },
            FailureClass::Permanent => {
                self.queue.remove(&entry.id).await?;
                tracing::error!(
                    request_id = %entry.id,
                    error = %err,
                    "Permanent failure, dropping request"
                );
                Ok(Settled::Dropped {
                    error: err.to_string(),
                    class,
                })
            }
        }
    }

    async fn attempt(
        &self,
        executor: &dyn Executor,
        entry: &QueuedRequest,
    ) -> std::result::Result<Value, ExecuteError> {
        match self.request_timeout {
            Some(limit) => tokio::time::timeout(limit, executor.execute(entry))
                .await
                .unwrap_or(Err(ExecuteError::Timeout)),
            None => executor.execute(entry).await,
        }
    }
}
