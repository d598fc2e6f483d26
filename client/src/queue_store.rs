//! Durable queue store.
//!
//! Wraps the engine [`Queue`] with persistence. Every mutation rewrites the
//! whole snapshot; the in-memory queue is only updated after the write
//! succeeds, so memory and storage never diverge.
//!
//! The write is a read-modify-write of one value. A crash between reading the
//! queue at startup and the next write can lose the most recent mutation.

use crate::error::{Error, Result, StorageError};
use crate::storage::{Storage, LAST_SYNC_KEY, QUEUE_KEY};
use outbox_engine::{NewRequest, Queue, QueueSnapshot, QueuedRequest, RetryDecision, Timestamp};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Current time in milliseconds since the Unix epoch.
pub fn now_millis() -> Timestamp {
    chrono::Utc::now().timestamp_millis().max(0) as Timestamp
}

#[derive(Debug, Default)]
struct Inner {
    queue: Queue,
    last_sync: Option<Timestamp>,
}

/// Persisted, ordered queue of pending requests.
///
/// The lock is held across each storage write, so storage operations are
/// serialised and never interleave.
pub struct DurableQueueStore {
    storage: Arc<dyn Storage>,
    inner: Mutex<Inner>,
}

impl DurableQueueStore {
    /// Create a store over `storage`. Call [`load`](Self::load) to restore
    /// persisted entries.
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Create a store and restore its persisted state.
    pub async fn open(storage: Arc<dyn Storage>) -> Result<Self> {
        let store = Self::new(storage);
        store.load().await?;
        Ok(store)
    }

    /// Reload the queue and `lastSync` from storage, replacing memory.
    pub async fn load(&self) -> Result<usize> {
        let mut inner = self.inner.lock().await;

        let queue = match self.storage.get(QUEUE_KEY).await? {
            Some(json) => Queue::from_snapshot(QueueSnapshot::from_json(&json)?)?,
            None => Queue::new(),
        };

        let last_sync = match self.storage.get(LAST_SYNC_KEY).await? {
            Some(raw) => Some(
                serde_json::from_str::<Timestamp>(&raw)
                    .map_err(|e| Error::QueuePersistence(StorageError::Serialization(e)))?,
            ),
            None => None,
        };

        tracing::info!(queued = queue.len(), ?last_sync, "Queue loaded from storage");

        let len = queue.len();
        inner.queue = queue;
        inner.last_sync = last_sync;
        Ok(len)
    }

    /// Queue a request, returning the persisted entry.
    pub async fn enqueue(&self, request: NewRequest) -> Result<QueuedRequest> {
        let mut inner = self.inner.lock().await;

        let id = uuid::Uuid::new_v4().to_string();
        let mut next = inner.queue.clone();
        let queued = next.enqueue(request, id, now_millis())?.clone();

        self.persist(&next).await?;
        inner.queue = next;

        tracing::debug!(
            request_id = %queued.id,
            method = %queued.method,
            url = %queued.url,
            priority = ?queued.priority,
            "Request queued"
        );

        Ok(queued)
    }

    /// Entries in drain order.
    pub async fn get_all(&self) -> Vec<QueuedRequest> {
        self.inner.lock().await.queue.ordered_cloned()
    }

    pub async fn get(&self, id: &str) -> Option<QueuedRequest> {
        self.inner.lock().await.queue.get(id).cloned()
    }

    /// Remove one entry. Removing an unknown id is a no-op.
    pub async fn remove(&self, id: &str) -> Result<Option<QueuedRequest>> {
        let mut inner = self.inner.lock().await;
        if !inner.queue.contains(id) {
            return Ok(None);
        }

        let mut next = inner.queue.clone();
        let removed = next.remove(id);

        self.persist(&next).await?;
        inner.queue = next;

        tracing::debug!(request_id = %id, "Request removed from queue");
        Ok(removed)
    }

    /// Count a transient failure; an exhausted entry is removed.
    pub async fn record_failure(&self, id: &str) -> Result<RetryDecision> {
        let mut inner = self.inner.lock().await;

        let mut next = inner.queue.clone();
        let decision = next.record_failure(id)?;

        self.persist(&next).await?;
        inner.queue = next;

        Ok(decision)
    }

    pub async fn size(&self) -> usize {
        self.inner.lock().await.queue.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.queue.is_empty()
    }

    /// Remove every entry.
    pub async fn clear(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;

        let next = Queue::new();
        self.persist(&next).await?;
        inner.queue = next;

        tracing::info!("Queue cleared");
        Ok(())
    }

    pub async fn last_sync(&self) -> Option<Timestamp> {
        self.inner.lock().await.last_sync
    }

    /// Persist the time of the last completed drain.
    pub async fn set_last_sync(&self, timestamp: Timestamp) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.storage
            .set(LAST_SYNC_KEY, timestamp.to_string())
            .await?;
        inner.last_sync = Some(timestamp);
        Ok(())
    }

    async fn persist(&self, queue: &Queue) -> Result<()> {
        let json = queue.to_snapshot().to_json()?;
        if let Err(e) = self.storage.set(QUEUE_KEY, json).await {
            tracing::error!(error = %e, "Failed to persist queue");
            return Err(Error::QueuePersistence(e));
        }
        Ok(())
    }
}

impl std::fmt::Debug for DurableQueueStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableQueueStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use outbox_engine::{HttpMethod, Priority, RequestId};

    fn request(url: &str, priority: Priority) -> NewRequest {
        NewRequest::new(HttpMethod::Post, url).with_priority(priority)
    }

    fn ids(requests: &[QueuedRequest]) -> Vec<RequestId> {
        requests.iter().map(|r| r.id.clone()).collect()
    }

    #[tokio::test]
    async fn enqueue_assigns_unique_ids() {
        let store = DurableQueueStore::new(Arc::new(MemoryStorage::new()));

        let a = store.enqueue(request("/a", Priority::Medium)).await.unwrap();
        let b = store.enqueue(request("/b", Priority::Medium)).await.unwrap();

        assert_ne!(a.id, b.id);
        assert_eq!(a.retries, 0);
        assert!(a.created_at > 0);
        assert_eq!(store.size().await, 2);
    }

    #[tokio::test]
    async fn get_all_is_in_drain_order() {
        let store = DurableQueueStore::new(Arc::new(MemoryStorage::new()));

        let low = store.enqueue(request("/low", Priority::Low)).await.unwrap();
        let medium = store.enqueue(request("/mid", Priority::Medium)).await.unwrap();
        let high = store.enqueue(request("/high", Priority::High)).await.unwrap();

        assert_eq!(
            ids(&store.get_all().await),
            vec![high.id, medium.id, low.id]
        );
    }

    #[tokio::test]
    async fn state_survives_reopen() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let store = DurableQueueStore::new(storage.clone());
        let queued = store.enqueue(request("/a", Priority::High)).await.unwrap();
        store.record_failure(&queued.id).await.unwrap();
        store.set_last_sync(1706745600000).await.unwrap();

        let reopened = DurableQueueStore::open(storage).await.unwrap();
        let restored = reopened.get(&queued.id).await.unwrap();
        assert_eq!(restored.retries, 1);
        assert_eq!(restored.priority, Priority::High);
        assert_eq!(reopened.last_sync().await, Some(1706745600000));
    }

    #[tokio::test]
    async fn remove_unknown_is_noop() {
        let store = DurableQueueStore::new(Arc::new(MemoryStorage::new()));
        assert!(store.remove("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn corrupted_snapshot_fails_load() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set(QUEUE_KEY, "{oops".into()).await.unwrap();

        let store = DurableQueueStore::new(storage);
        assert!(matches!(store.load().await, Err(Error::Engine(_))));
    }
}
