//! Optimistic updates.
//!
//! A [`Mutation`] applies a change to the caller's local cache before the
//! backing request is confirmed. Online, the mutation runs directly; offline,
//! its request is queued for replay. Any failure rolls the change back.
//!
//! Each run is independent. Two mutations over the same entity are not
//! coordinated.

use crate::error::{Error, Result};
use crate::state::OfflineStateStore;
use outbox_engine::{NewRequest, RequestId};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;

/// Lifecycle of one mutation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MutationState {
    #[default]
    Idle,
    Pending,
    Success,
    Error,
}

/// How a successful mutation was settled.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome<T> {
    /// The server accepted the mutation
    Applied(T),
    /// Offline: the request was queued under this id
    Queued(RequestId),
}

impl<T> MutationOutcome<T> {
    pub fn is_queued(&self) -> bool {
        matches!(self, MutationOutcome::Queued(_))
    }
}

type Hook = Box<dyn FnOnce() + Send>;

/// Everything one optimistic mutation needs.
pub struct MutationRequest<F> {
    request: NewRequest,
    mutation_fn: F,
    on_optimistic_update: Option<Hook>,
    on_rollback: Option<Hook>,
}

impl<F> MutationRequest<F> {
    /// `request` is queued when offline; `mutation_fn` runs when online.
    pub fn new(request: NewRequest, mutation_fn: F) -> Self {
        Self {
            request,
            mutation_fn,
            on_optimistic_update: None,
            on_rollback: None,
        }
    }

    /// Change applied to the local cache before anything else happens.
    pub fn on_optimistic_update(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.on_optimistic_update = Some(Box::new(hook));
        self
    }

    /// Undo of the optimistic change, run on failure.
    pub fn on_rollback(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.on_rollback = Some(Box::new(hook));
        self
    }
}

/// Creates mutations bound to an offline state store.
#[derive(Debug, Clone)]
pub struct OptimisticUpdateController {
    store: Arc<OfflineStateStore>,
}

impl OptimisticUpdateController {
    pub fn new(store: Arc<OfflineStateStore>) -> Self {
        Self { store }
    }

    /// A fresh mutation in the `Idle` state.
    pub fn mutation(&self) -> Mutation {
        Mutation {
            store: self.store.clone(),
            state: MutationState::Idle,
        }
    }

    /// Run a one-off mutation.
    pub async fn mutate<F, Fut, T, E>(
        &self,
        request: MutationRequest<F>,
    ) -> Result<MutationOutcome<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<Error>,
    {
        self.mutation().run(request).await
    }
}

/// One optimistic mutation and its state.
#[derive(Debug)]
pub struct Mutation {
    store: Arc<OfflineStateStore>,
    state: MutationState,
}

impl Mutation {
    pub fn state(&self) -> MutationState {
        self.state
    }

    pub fn is_pending(&self) -> bool {
        self.state == MutationState::Pending
    }

    /// Apply the optimistic change, then settle it.
    pub async fn run<F, Fut, T, E>(
        &mut self,
        request: MutationRequest<F>,
    ) -> Result<MutationOutcome<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<Error>,
    {
        let MutationRequest {
            request,
            mutation_fn,
            on_optimistic_update,
            on_rollback,
        } = request;

        self.state = MutationState::Pending;
        if let Some(apply) = on_optimistic_update {
            apply();
        }

        let outcome: Result<MutationOutcome<T>> = if self.store.is_online() {
            mutation_fn()
                .await
                .map(MutationOutcome::Applied)
                .map_err(Into::into)
        } else {
            self.store
                .add_to_queue(request)
                .await
                .map(MutationOutcome::Queued)
        };

        match outcome {
            Ok(outcome) => {
                self.state = MutationState::Success;
                if let MutationOutcome::Queued(id) = &outcome {
                    tracing::debug!(request_id = %id, "Offline mutation queued");
                }
                Ok(outcome)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Mutation failed, rolling back");
                if let Some(rollback) = on_rollback {
                    rollback();
                }
                self.state = MutationState::Error;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::ConnectivityMonitor;
    use crate::error::ExecuteError;
    use crate::executor::FnExecutor;
    use crate::queue_store::DurableQueueStore;
    use crate::storage::MemoryStorage;
    use crate::sync::SyncEngine;
    use outbox_engine::{BackoffPolicy, HttpMethod};
    use serde_json::{json, Value};
    use std::sync::Mutex;

    async fn controller(online: bool) -> (OptimisticUpdateController, Arc<OfflineStateStore>) {
        let queue = Arc::new(DurableQueueStore::new(Arc::new(MemoryStorage::new())));
        let engine = Arc::new(SyncEngine::new(queue, BackoffPolicy::default()));
        let executor = Arc::new(FnExecutor::new(|_| async { Ok(Value::Null) }));
        let store =
            OfflineStateStore::new(ConnectivityMonitor::new_shared(online), engine, executor);
        store.init().await.unwrap();
        (OptimisticUpdateController::new(store.clone()), store)
    }

    fn cache() -> Arc<Mutex<Vec<&'static str>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn new_contact() -> NewRequest {
        NewRequest::new(HttpMethod::Post, "/contacts").with_data(json!({"name": "Alice"}))
    }

    fn with_hooks<F>(
        request: MutationRequest<F>,
        cache: &Arc<Mutex<Vec<&'static str>>>,
    ) -> MutationRequest<F> {
        let add = cache.clone();
        let undo = cache.clone();
        request
            .on_optimistic_update(move || add.lock().unwrap().push("Alice"))
            .on_rollback(move || undo.lock().unwrap().retain(|name| *name != "Alice"))
    }

    #[tokio::test]
    async fn online_success() {
        let (controller, store) = controller(true).await;
        let cache = cache();
        let mut mutation = controller.mutation();
        assert_eq!(mutation.state(), MutationState::Idle);

        let outcome = mutation
            .run(with_hooks(
                MutationRequest::new(new_contact(), || async {
                    Ok::<_, ExecuteError>(json!({"id": 1}))
                }),
                &cache,
            ))
            .await
            .unwrap();

        assert_eq!(outcome, MutationOutcome::Applied(json!({"id": 1})));
        assert_eq!(mutation.state(), MutationState::Success);
        assert_eq!(*cache.lock().unwrap(), vec!["Alice"]);
        assert_eq!(store.get_queue_size().await, 0);
    }

    #[tokio::test]
    async fn online_failure_rolls_back() {
        let (controller, _store) = controller(true).await;
        let cache = cache();
        let mut mutation = controller.mutation();

        let result = mutation
            .run(with_hooks(
                MutationRequest::new(new_contact(), || async {
                    Err::<Value, _>(ExecuteError::Status {
                        status: 409,
                        body: "conflict".into(),
                    })
                }),
                &cache,
            ))
            .await;

        assert!(matches!(result, Err(Error::Execute(_))));
        assert_eq!(mutation.state(), MutationState::Error);
        assert!(cache.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn offline_mutation_is_queued() {
        let (controller, store) = controller(false).await;
        let cache = cache();

        let outcome = controller
            .mutate(with_hooks(
                MutationRequest::new(new_contact(), || async {
                    Err::<Value, _>(ExecuteError::Network("must not run".into()))
                }),
                &cache,
            ))
            .await
            .unwrap();

        let MutationOutcome::Queued(id) = outcome else {
            panic!("expected queued outcome");
        };
        assert_eq!(store.get_queue().await[0].id, id);
        assert_eq!(store.state().pending_sync, 1);
        assert_eq!(*cache.lock().unwrap(), vec!["Alice"]);
    }
}
