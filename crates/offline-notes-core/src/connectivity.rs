//! Online/offline signal and transition events.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};

const EVENT_CAPACITY: usize = 16;

/// A change of connectivity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    /// Offline to online. Triggers a replay of queued mutations.
    Restored,
    /// Online to offline
    Lost,
}

/// Tracks whether the runtime environment can reach the network.
///
/// Cheap to clone; all clones share one state. Setting the same state twice
/// emits nothing, so each real transition produces exactly one event.
#[derive(Clone)]
pub struct ConnectivityMonitor {
    inner: Arc<Inner>,
}

struct Inner {
    state: watch::Sender<bool>,
    events: broadcast::Sender<ConnectivityEvent>,
}

impl ConnectivityMonitor {
    pub fn new(initially_online: bool) -> Self {
        let (state, _) = watch::channel(initially_online);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner { state, events }),
        }
    }

    pub fn is_online(&self) -> bool {
        *self.inner.state.borrow()
    }

    /// Report the environment's current connectivity.
    ///
    /// Returns the transition this caused, if any.
    pub fn set_online(&self, online: bool) -> Option<ConnectivityEvent> {
        let changed = self.inner.state.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if !changed {
            return None;
        }

        let event = if online {
            ConnectivityEvent::Restored
        } else {
            ConnectivityEvent::Lost
        };
        tracing::info!("Connectivity changed: {:?}", event);
        // Nobody listening is fine
        let _ = self.inner.events.send(event);
        Some(event)
    }

    /// Stream of transitions from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectivityEvent> {
        self.inner.events.subscribe()
    }

    /// Current state as a watch channel
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.inner.state.subscribe()
    }
}

impl std::fmt::Debug for ConnectivityMonitor {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ConnectivityMonitor")
            .field("online", &self.is_online())
            .finish()
    }
}
