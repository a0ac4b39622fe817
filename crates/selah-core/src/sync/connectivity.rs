//! Online/offline tracking and reconnect notifications

use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::watch;

/// Reachability of the remote store as last observed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkStatus {
    Online,
    Offline,
}

impl NetworkStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
        }
    }
}

/// Evidence about connectivity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivitySignal {
    /// The platform reported the network came up
    PlatformOnline,
    /// The platform reported the network went away
    PlatformOffline,
    /// A remote call failed for a network reason
    RequestFailed,
    /// A remote call reached the server
    RequestSucceeded,
}

/// A change of status caused by a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    WentOnline,
    WentOffline,
}

type ReconnectListener = Arc<dyn Fn(ConnectivitySignal) + Send + Sync>;

/// Tracks whether the remote store is reachable
///
/// Listeners registered with [`ConnectivityMonitor::on_reconnect`] run once per
/// offline to online transition, on the thread that reported the signal, and
/// receive the signal that caused it.
pub struct ConnectivityMonitor {
    status: watch::Sender<NetworkStatus>,
    listeners: Mutex<Vec<ReconnectListener>>,
}

impl ConnectivityMonitor {
    #[must_use]
    pub fn new(initial: NetworkStatus) -> Self {
        let (status, _) = watch::channel(initial);
        Self {
            status,
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn status(&self) -> NetworkStatus {
        *self.status.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.status() == NetworkStatus::Online
    }

    /// Observe status changes
    pub fn subscribe(&self) -> watch::Receiver<NetworkStatus> {
        self.status.subscribe()
    }

    /// Register a callback for offline to online transitions
    pub fn on_reconnect<F>(&self, listener: F)
    where
        F: Fn(ConnectivitySignal) + Send + Sync + 'static,
    {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(listener));
    }

    /// Drop every reconnect listener
    pub fn clear_listeners(&self) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Feed a signal in; returns the transition it caused, if any
    pub fn report(&self, signal: ConnectivitySignal) -> Option<Transition> {
        let next = match signal {
            ConnectivitySignal::PlatformOnline | ConnectivitySignal::RequestSucceeded => {
                NetworkStatus::Online
            }
            ConnectivitySignal::PlatformOffline | ConnectivitySignal::RequestFailed => {
                NetworkStatus::Offline
            }
        };

        let changed = self.status.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        if !changed {
            return None;
        }

        match next {
            NetworkStatus::Offline => {
                tracing::info!("Remote store unreachable ({signal:?}); queueing changes offline");
                Some(Transition::WentOffline)
            }
            NetworkStatus::Online => {
                tracing::info!("Remote store reachable again ({signal:?})");
                // Listeners may call back into the monitor, so run them unlocked
                let listeners = self
                    .listeners
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone();
                for listener in listeners {
                    listener(signal);
                }
                Some(Transition::WentOnline)
            }
        }
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(NetworkStatus::Online)
    }
}
