//! Connectivity monitor
//!
//! Tracks online/offline status and raises edge-triggered transitions exactly
//! once per change. The platform signal feeds `set_online`; `probe` is the
//! manual polling fallback against the authoritative store's health endpoint.

use tokio::sync::watch;

use crate::remote::AuthoritativeStore;

/// One observed status change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// offline -> online
    CameOnline,
    /// online -> offline
    WentOffline,
}

/// Shared online/offline state with edge detection
#[derive(Debug, Clone)]
pub struct ConnectivityMonitor {
    state: watch::Sender<bool>,
}

impl ConnectivityMonitor {
    /// Create a monitor with the given initial status
    #[must_use]
    pub fn new(initially_online: bool) -> Self {
        let (state, _) = watch::channel(initially_online);
        Self { state }
    }

    /// Current status
    pub fn is_online(&self) -> bool {
        *self.state.borrow()
    }

    /// Record a status observation; returns the transition when it changed
    pub fn set_online(&self, online: bool) -> Option<Transition> {
        let changed = self.state.send_if_modified(|current| {
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
        let transition = if online {
            Transition::CameOnline
        } else {
            Transition::WentOffline
        };
        tracing::debug!(?transition, "Connectivity changed");
        Some(transition)
    }

    /// Subscribe to status changes (async consumers)
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }

    /// Polling fallback: probe the server and feed the observation in
    pub async fn probe(&self, remote: &dyn AuthoritativeStore) -> Option<Transition> {
        let online = remote.ping().await;
        self.set_online(online)
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(false)
    }
}
