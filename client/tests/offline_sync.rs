//! Integration tests for the offline queue runtime.
//!
//! Storage and networking are replaced by in-process fakes, so these tests
//! run without a server.

use futures::future::BoxFuture;
use outbox_client::{
    ConnectivityMonitor, DurableQueueStore, Error, ExecuteError, Executor, FileStorage,
    FnExecutor, MemoryStorage, MutationRequest, MutationState, OfflineState, OfflineStateStore,
    OptimisticUpdateController, Storage, StorageError, SyncEngine,
};
use outbox_engine::{
    BackoffPolicy, FailureClass, HttpMethod, NewRequest, Priority, QueuedRequest, SyncResult,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// Storage whose writes can be switched to fail.
#[derive(Default)]
struct FlakyStorage {
    inner: MemoryStorage,
    failing: AtomicBool,
}

impl FlakyStorage {
    fn fail_writes(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl Storage for FlakyStorage {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>, StorageError>> {
        self.inner.get(key)
    }

    fn set<'a>(&'a self, key: &'a str, value: String) -> BoxFuture<'a, Result<(), StorageError>> {
        if self.failing.load(Ordering::SeqCst) {
            return Box::pin(async { Err(StorageError::Unavailable("quota exceeded".into())) });
        }
        self.inner.set(key, value)
    }

    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), StorageError>> {
        self.inner.remove(key)
    }
}

fn ok_executor() -> Arc<dyn Executor> {
    Arc::new(FnExecutor::new(|_| async { Ok(Value::Null) }))
}

/// Executor that fails with `status` for the first `failures` calls.
fn failing_executor(status: u16, failures: usize) -> (Arc<dyn Executor>, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let executor = FnExecutor::new(move |_| {
        let call = counter.fetch_add(1, Ordering::SeqCst);
        async move {
            if call < failures {
                Err(ExecuteError::Status {
                    status,
                    body: String::new(),
                })
            } else {
                Ok(Value::Null)
            }
        }
    });
    (Arc::new(executor), calls)
}

fn build_store(
    storage: Arc<dyn Storage>,
    online: bool,
    backoff: BackoffPolicy,
    executor: Arc<dyn Executor>,
) -> (Arc<OfflineStateStore>, Arc<ConnectivityMonitor>) {
    let queue = Arc::new(DurableQueueStore::new(storage));
    let engine = Arc::new(SyncEngine::new(queue, backoff));
    let monitor = ConnectivityMonitor::new_shared(online);
    let store = OfflineStateStore::new(monitor.clone(), engine, executor);
    (store, monitor)
}

async fn offline_store() -> Arc<OfflineStateStore> {
    let (store, _) = build_store(
        Arc::new(MemoryStorage::new()),
        false,
        BackoffPolicy::default(),
        ok_executor(),
    );
    store.init().await.unwrap();
    store
}

fn post(url: &str) -> NewRequest {
    NewRequest::new(HttpMethod::Post, url).with_data(json!({"url": url}))
}

async fn wait_for(store: &OfflineStateStore, done: impl Fn(&OfflineState) -> bool) {
    let mut rx = store.subscribe();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let reached = done(&*rx.borrow_and_update());
            if reached {
                break;
            }
            rx.changed().await.unwrap();
        }
    })
    .await
    .expect("state was never reached");
}

// ============================================================================
// Queue Properties
// ============================================================================

#[tokio::test]
async fn queue_size_matches_unremoved_entries() {
    let store = offline_store().await;
    let mut live: Vec<String> = Vec::new();

    for round in 0..12 {
        let id = store.enqueue(post(&format!("/items/{}", round))).await.unwrap();
        live.push(id);

        if round % 3 == 2 {
            let victim = live.remove(round % live.len());
            store.remove_from_queue(&victim).await.unwrap();
            // Removing twice changes nothing
            store.remove_from_queue(&victim).await.unwrap();
        }

        assert_eq!(store.get_queue_size().await, live.len());
        assert_eq!(store.state().pending_sync, live.len());
    }
}

#[tokio::test]
async fn queued_request_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let request = NewRequest::new(HttpMethod::Patch, "/contacts/7")
        .with_data(json!({"name": "Alice", "tags": ["vip"]}))
        .with_header("If-Match", "\"v2\"")
        .with_priority(Priority::High)
        .with_max_retries(5);

    let id = {
        let storage = Arc::new(FileStorage::open(dir.path()).await.unwrap());
        let (store, _) = build_store(storage, false, BackoffPolicy::default(), ok_executor());
        store.init().await.unwrap();
        let id = store.enqueue(request.clone()).await.unwrap();
        store.dispose();
        id
    };

    // Simulated process restart
    let storage = Arc::new(FileStorage::open(dir.path()).await.unwrap());
    let (store, _) = build_store(storage, false, BackoffPolicy::default(), ok_executor());
    store.init().await.unwrap();

    let restored = store.get_queue().await;
    assert_eq!(restored.len(), 1);
    assert_eq!(restored[0].id, id);
    assert_eq!(restored[0].retries, 0);
    assert_eq!(restored[0].to_new(), request);
    assert_eq!(store.state().pending_sync, 1);
}

// ============================================================================
// Drain Properties
// ============================================================================

#[tokio::test]
async fn end_to_end_priority_drain() {
    let store = offline_store().await;

    let high = store
        .enqueue(post("/a").with_priority(Priority::High))
        .await
        .unwrap();
    let medium_1 = store.enqueue(post("/b")).await.unwrap();
    let medium_2 = store.enqueue(post("/c")).await.unwrap();

    let order: Vec<String> = store
        .get_queue()
        .await
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(order, vec![high.clone(), medium_1.clone(), medium_2.clone()]);

    let replayed = Arc::new(Mutex::new(Vec::new()));
    let log = replayed.clone();
    let mock = FnExecutor::new(move |request: QueuedRequest| {
        log.lock().unwrap().push(request.id);
        async { Ok(json!({"ok": true})) }
    });

    let result = store.sync_queue(Some(&mock)).await.unwrap();
    assert_eq!(
        result,
        SyncResult {
            success: 3,
            failed: 0,
            skipped: 0,
            errors: vec![],
            retry_after_ms: None,
        }
    );
    assert_eq!(*replayed.lock().unwrap(), vec![high, medium_1, medium_2]);
    assert_eq!(store.get_queue_size().await, 0);
    assert!(store.state().last_sync.is_some());
}

#[tokio::test]
async fn concurrent_drain_is_a_noop() {
    let gate = Arc::new(Notify::new());
    let started = Arc::new(Notify::new());

    let executor: Arc<dyn Executor> = Arc::new(FnExecutor::new({
        let gate = gate.clone();
        let started = started.clone();
        move |_| {
            let gate = gate.clone();
            let started = started.clone();
            async move {
                started.notify_one();
                gate.notified().await;
                Ok(Value::Null)
            }
        }
    }));

    let (store, _) = build_store(
        Arc::new(MemoryStorage::new()),
        false,
        BackoffPolicy::default(),
        executor,
    );
    store.init().await.unwrap();
    store.enqueue(post("/slow")).await.unwrap();

    let first = tokio::spawn({
        let store = store.clone();
        async move { store.sync_queue(None).await }
    });
    started.notified().await;
    assert!(store.state().is_syncing);

    let second = store.sync_queue(None).await.unwrap();
    assert_eq!(second, SyncResult::default());
    assert_eq!(store.get_queue_size().await, 1);
    assert!(store.state().is_syncing);

    gate.notify_one();
    let first = first.await.unwrap().unwrap();
    assert_eq!(first.success, 1);
    assert_eq!(store.get_queue_size().await, 0);
    assert!(!store.state().is_syncing);
}

#[tokio::test]
async fn pending_sync_tracks_the_queue_mid_drain() {
    let gate = Arc::new(Notify::new());
    let started = Arc::new(Notify::new());
    let calls = Arc::new(AtomicUsize::new(0));

    let executor: Arc<dyn Executor> = Arc::new(FnExecutor::new({
        let gate = gate.clone();
        let started = started.clone();
        let calls = calls.clone();
        move |_| {
            let gate = gate.clone();
            let started = started.clone();
            let call = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                // The second request blocks until released
                if call == 1 {
                    started.notify_one();
                    gate.notified().await;
                }
                Ok(Value::Null)
            }
        }
    }));

    let (store, _) = build_store(
        Arc::new(MemoryStorage::new()),
        false,
        BackoffPolicy::default(),
        executor,
    );
    store.init().await.unwrap();
    store.enqueue(post("/first")).await.unwrap();
    let second = store.enqueue(post("/second")).await.unwrap();

    let drain = tokio::spawn({
        let store = store.clone();
        async move { store.sync_queue(None).await }
    });
    started.notified().await;

    let state = store.state();
    assert_eq!(store.get_queue_size().await, 1);
    assert_eq!(state.pending_sync, 1);
    assert_eq!(state.queued_requests.len(), 1);
    assert_eq!(state.queued_requests[0].id, second);
    assert!(state.is_syncing);

    gate.notify_one();
    assert_eq!(drain.await.unwrap().unwrap().success, 2);
    assert_eq!(store.state().pending_sync, 0);
}

#[tokio::test]
async fn retries_are_exhausted_after_three_drains() {
    let (executor, calls) = failing_executor(503, usize::MAX);
    let (store, _) = build_store(
        Arc::new(MemoryStorage::new()),
        false,
        BackoffPolicy::default(),
        executor,
    );
    store.init().await.unwrap();
    let id = store
        .enqueue(post("/flaky").with_max_retries(3))
        .await
        .unwrap();

    let mut errors = Vec::new();
    for drain in 1..=3 {
        let result = store.sync_queue(None).await.unwrap();
        errors.extend(result.errors.clone());

        if drain < 3 {
            assert_eq!(result.skipped, 1, "drain {}", drain);
            assert_eq!(store.get_queue().await[0].retries, drain);
        } else {
            assert_eq!(result.failed, 1);
            assert!(result.retry_after_ms.is_none());
        }
    }
    assert_eq!(store.get_queue_size().await, 0);

    // Never reappears
    let result = store.sync_queue(None).await.unwrap();
    errors.extend(result.errors);
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].request_id, id);
    assert_eq!(errors[0].class, FailureClass::Transient);
}

#[tokio::test]
async fn permanent_failures_do_not_stop_the_drain() {
    let store = offline_store().await;
    let rejected = store.enqueue(post("/rejected")).await.unwrap();
    store.enqueue(post("/accepted")).await.unwrap();

    let mock = FnExecutor::new(|request: QueuedRequest| async move {
        if request.url == "/rejected" {
            Err(ExecuteError::Status {
                status: 400,
                body: "bad request".into(),
            })
        } else {
            Ok(Value::Null)
        }
    });

    let result = store.sync_queue(Some(&mock)).await.unwrap();
    assert_eq!(result.success, 1);
    assert_eq!(result.failed, 1);
    assert_eq!(result.errors[0].request_id, rejected);
    assert_eq!(result.errors[0].class, FailureClass::Permanent);
    assert_eq!(store.get_queue_size().await, 0);
}

// ============================================================================
// Persistence Failures
// ============================================================================

#[tokio::test]
async fn storage_failure_surfaces_and_keeps_memory_consistent() {
    let storage = Arc::new(FlakyStorage::default());
    let (store, _) = build_store(
        storage.clone(),
        false,
        BackoffPolicy::default(),
        ok_executor(),
    );
    store.init().await.unwrap();
    store.enqueue(post("/kept")).await.unwrap();

    storage.fail_writes(true);
    let result = store.enqueue(post("/lost")).await;
    assert!(matches!(result, Err(Error::QueuePersistence(_))));
    assert_eq!(store.get_queue_size().await, 1);
    assert_eq!(store.state().pending_sync, 1);

    let drained = store.sync_queue(None).await;
    assert!(matches!(drained, Err(Error::QueuePersistence(_))));
    assert!(!store.state().is_syncing);
    assert_eq!(store.get_queue_size().await, 1);

    storage.fail_writes(false);
    let result = store.sync_queue(None).await.unwrap();
    assert_eq!(result.success, 1);
}

#[tokio::test]
async fn offline_mutation_rolls_back_when_queueing_fails() {
    let storage = Arc::new(FlakyStorage::default());
    let (store, _) = build_store(
        storage.clone(),
        false,
        BackoffPolicy::default(),
        ok_executor(),
    );
    store.init().await.unwrap();
    storage.fail_writes(true);

    let cache = Arc::new(Mutex::new(vec!["Bob"]));
    let controller = OptimisticUpdateController::new(store.clone());
    let mut mutation = controller.mutation();

    let request = MutationRequest::new(post("/contacts"), || async {
        Ok::<_, ExecuteError>(Value::Null)
    })
    .on_optimistic_update({
        let cache = cache.clone();
        move || cache.lock().unwrap().push("Alice")
    })
    .on_rollback({
        let cache = cache.clone();
        move || cache.lock().unwrap().retain(|name| *name != "Alice")
    });

    let result = mutation.run(request).await;
    assert!(matches!(result, Err(Error::QueuePersistence(_))));
    assert_eq!(mutation.state(), MutationState::Error);
    assert_eq!(*cache.lock().unwrap(), vec!["Bob"]);
    assert_eq!(store.get_queue_size().await, 0);
}

// ============================================================================
// Connectivity
// ============================================================================

#[tokio::test]
async fn reconnecting_drains_the_queue() {
    let (executor, calls) = failing_executor(503, 0);
    let (store, monitor) = build_store(
        Arc::new(MemoryStorage::new()),
        false,
        BackoffPolicy::default(),
        executor,
    );
    store.init().await.unwrap();
    store.enqueue(post("/a")).await.unwrap();
    store.enqueue(post("/b")).await.unwrap();

    // Staying offline does nothing
    monitor.set_online(false);
    tokio::task::yield_now().await;
    assert_eq!(store.state().pending_sync, 2);

    monitor.set_online(true);
    wait_for(&store, |state| state.is_online && state.pending_sync == 0).await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(store.state().last_sync.is_some());
    store.dispose();
}

#[tokio::test]
async fn kept_requests_get_a_follow_up_drain() {
    let (executor, calls) = failing_executor(503, 1);
    let (store, monitor) = build_store(
        Arc::new(MemoryStorage::new()),
        false,
        BackoffPolicy::new(10, 50),
        executor,
    );
    store.init().await.unwrap();
    store.enqueue(post("/a")).await.unwrap();

    monitor.set_online(true);
    wait_for(&store, |state| state.pending_sync == 0).await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    store.dispose();
}

#[tokio::test]
async fn starting_online_retries_after_backoff() {
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    {
        let (store, _) = build_store(
            storage.clone(),
            false,
            BackoffPolicy::default(),
            ok_executor(),
        );
        store.init().await.unwrap();
        store.enqueue(post("/a")).await.unwrap();
        store.dispose();
    }

    let (executor, calls) = failing_executor(503, 1);
    let (store, _) = build_store(storage, true, BackoffPolicy::new(10, 50), executor);
    store.init().await.unwrap();
    wait_for(&store, |state| state.pending_sync == 0).await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(store.state().last_sync.is_some());
    store.dispose();
}

#[tokio::test]
async fn state_follows_connectivity() {
    let (store, monitor) = build_store(
        Arc::new(MemoryStorage::new()),
        true,
        BackoffPolicy::default(),
        ok_executor(),
    );
    store.init().await.unwrap();
    assert!(store.state().is_online);

    monitor.set_online(false);
    wait_for(&store, |state| !state.is_online).await;
    assert!(!store.is_online());
    store.dispose();
}
