//! Connectivity monitor.
//!
//! Holds the current online/offline state and notifies listeners on every
//! transition. The platform's reachability integration (or [`spawn_probe`])
//! feeds it through [`ConnectivityMonitor::set_online`].
//!
//! [`spawn_probe`]: ConnectivityMonitor::spawn_probe

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

type Callback = Arc<dyn Fn(bool) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    next_id: AtomicU64,
    callbacks: Mutex<BTreeMap<u64, Callback>>,
}

impl Listeners {
    fn snapshot(&self) -> Vec<Callback> {
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}

/// Tracks whether the device can reach the network.
///
/// Thread-safe and can be shared via `Arc`.
pub struct ConnectivityMonitor {
    state: watch::Sender<bool>,
    listeners: Arc<Listeners>,
}

impl ConnectivityMonitor {
    pub fn new(initial: bool) -> Self {
        let (state, _) = watch::channel(initial);
        Self {
            state,
            listeners: Arc::new(Listeners::default()),
        }
    }

    /// Create a new monitor wrapped in Arc for sharing.
    pub fn new_shared(initial: bool) -> Arc<Self> {
        Arc::new(Self::new(initial))
    }

    pub fn is_online(&self) -> bool {
        *self.state.borrow()
    }

    /// Report the current connectivity.
    ///
    /// Listeners are only notified on a transition. Returns whether the
    /// state changed.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.state.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });

        if changed {
            if online {
                tracing::info!("Network online");
            } else {
                tracing::warn!("Network offline");
            }
            for callback in self.listeners.snapshot() {
                callback(online);
            }
        }

        changed
    }

    /// Receiver for async consumers.
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }

    /// Register a listener.
    ///
    /// The callback is invoked immediately with the current state, then on
    /// each transition until the returned [`Subscription`] is dropped.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let id = self.listeners.next_id.fetch_add(1, Ordering::Relaxed);
        let callback: Callback = Arc::new(callback);

        self.listeners
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, callback.clone());

        callback(self.is_online());

        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Poll a health endpoint and feed the result into the monitor.
    ///
    /// Any response counts as online; a transport error counts as offline.
    /// The task stops once the monitor is dropped.
    pub fn spawn_probe(
        self: &Arc<Self>,
        client: reqwest::Client,
        url: String,
        interval: Duration,
    ) -> JoinHandle<()> {
        let monitor = Arc::downgrade(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;

                let online = match client.head(&url).send().await {
                    Ok(_) => true,
                    Err(e) => {
                        tracing::debug!(url = %url, error = %e, "Connectivity probe failed");
                        false
                    }
                };

                match monitor.upgrade() {
                    Some(monitor) => {
                        monitor.set_online(online);
                    }
                    None => break,
                }
            }
        })
    }
}

impl std::fmt::Debug for ConnectivityMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectivityMonitor")
            .field("online", &self.is_online())
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// Handle for a registered listener. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    listeners: Weak<Listeners>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners
                .callbacks
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&self.id);
        }
    }
}
