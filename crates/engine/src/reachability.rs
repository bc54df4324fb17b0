//! Connectivity signal.

use std::sync::Arc;

use tokio::sync::watch;

/// Clone-able online/offline signal.
///
/// Platform glue feeds transitions in via [`set_online`](Self::set_online);
/// the engine subscribes and reacts to edges (offline forces auto-pause,
/// online auto-resumes sessions that were not paused by the user).
#[derive(Clone)]
pub struct ReachabilityMonitor {
    tx: Arc<watch::Sender<bool>>,
}

impl ReachabilityMonitor {
    /// Creates a monitor with the given initial state.
    pub fn new(initially_online: bool) -> Self {
        let (tx, _rx) = watch::channel(initially_online);
        Self { tx: Arc::new(tx) }
    }

    /// Records a connectivity transition. Edge-triggered: setting the same
    /// value twice notifies subscribers once.
    pub fn set_online(&self, online: bool) {
        self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
    }

    /// Current state.
    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Subscribes to transitions.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for ReachabilityMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}
