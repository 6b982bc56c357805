//! Event Bus - navigation lifecycle events
//!
//! Design: one enum, one broadcast channel. Observers that need to react
//! synchronously use the router's observables; this is the async tap for
//! logging, tests and tooling.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Router events that can be dispatched
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouterEvent {
    NavigationRequested { url: String },
    CleanupAborted { url: String },
    PageUnloaded { url: String },
    PageLoaded { url: String },
    NavigationFailed { url: String, reason: String },
    Superseded { url: String },
    Prefetched { url: String },
}

impl RouterEvent {
    pub fn url(&self) -> &str {
        match self {
            RouterEvent::NavigationRequested { url }
            | RouterEvent::CleanupAborted { url }
            | RouterEvent::PageUnloaded { url }
            | RouterEvent::PageLoaded { url }
            | RouterEvent::NavigationFailed { url, .. }
            | RouterEvent::Superseded { url }
            | RouterEvent::Prefetched { url } => url,
        }
    }
}

/// Simple event bus using tokio broadcast channel
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<RouterEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event
    pub fn publish(&self, event: RouterEvent) {
        let _ = self.tx.send(event); // Ignore error if no subscribers
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<RouterEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
