//! Online/offline status with change notifications, plus a background probe
//! that keeps it current.

use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::gateway::RemoteGateway;

type StatusCallback = Arc<dyn Fn(bool) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    callbacks: Vec<(u64, StatusCallback)>,
}

/// Tracks whether the remote is reachable.
///
/// Subscribers are called once with the current status on subscription and
/// afterwards only when the status actually changes.
pub struct ConnectivityMonitor {
    status_tx: watch::Sender<bool>,
    listeners: Mutex<Listeners>,
}

impl std::fmt::Debug for ConnectivityMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectivityMonitor")
            .field("online", &self.is_online())
            .finish()
    }
}

impl ConnectivityMonitor {
    pub fn new(initially_online: bool) -> Arc<Self> {
        let (status_tx, _) = watch::channel(initially_online);
        Arc::new(Self {
            status_tx,
            listeners: Mutex::new(Listeners::default()),
        })
    }

    pub fn is_online(&self) -> bool {
        *self.status_tx.borrow()
    }

    /// Receiver for async consumers that prefer `changed()` over callbacks.
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.status_tx.subscribe()
    }

    /// Updates the status. Returns true and notifies subscribers only if it changed.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.status_tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if !changed {
            return false;
        }

        tracing::info!("Connectivity changed: {}", if online { "online" } else { "offline" });

        // Callbacks run without the lock held so they may (un)subscribe.
        let callbacks: Vec<StatusCallback> = self
            .lock_listeners()
            .callbacks
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for callback in callbacks {
            callback(online);
        }
        true
    }

    /// Registers `callback`, invoking it immediately with the current status.
    pub fn subscribe<F>(self: &Arc<Self>, callback: F) -> Subscription
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let callback: StatusCallback = Arc::new(callback);
        let id = {
            let mut listeners = self.lock_listeners();
            let id = listeners.next_id;
            listeners.next_id += 1;
            listeners.callbacks.push((id, Arc::clone(&callback)));
            id
        };

        callback(self.is_online());

        Subscription {
            monitor: Arc::downgrade(self),
            id,
            active: true,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock_listeners().callbacks.len()
    }

    fn unsubscribe(&self, id: u64) {
        self.lock_listeners()
            .callbacks
            .retain(|(callback_id, _)| *callback_id != id);
    }

    fn lock_listeners(&self) -> std::sync::MutexGuard<'_, Listeners> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle returned by [`ConnectivityMonitor::subscribe`]. Dropping it
/// unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    monitor: Weak<ConnectivityMonitor>,
    id: u64,
    active: bool,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Some(monitor) = self.monitor.upgrade() {
            monitor.unsubscribe(self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

/// Background task pinging the gateway on an interval.
pub struct ProbeHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ProbeHandle {
    /// Stops the probe and waits for it to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            tracing::warn!("Connectivity probe ended abnormally: {}", e);
        }
    }
}

/// Pings `gateway` immediately and then every `interval`, feeding the
/// result into `monitor`.
pub fn spawn_probe<G: RemoteGateway>(
    monitor: Arc<ConnectivityMonitor>,
    gateway: Arc<G>,
    interval: Duration,
) -> ProbeHandle {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let task = tokio::spawn(async move {
        loop {
            tokio::select! {
                online = gateway.ping() => {
                    monitor.set_online(online);
                }
                _ = shutdown_rx.changed() => break,
            }

            tokio::select! {
                () = tokio::time::sleep(interval) => {}
                _ = shutdown_rx.changed() => break,
            }
        }
        tracing::debug!("Connectivity probe shutting down");
    });

    ProbeHandle { shutdown_tx, task }
}
