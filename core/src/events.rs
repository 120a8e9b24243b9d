//! Broadcast bus for catalog and lifecycle changes.
//!
//! Subscribers get bounded buffers with drop-oldest semantics: a slow
//! consumer lags and skips, it never stalls the publisher.

use tokio::sync::broadcast;
use tracing::debug;

use crate::upstream::state::UpstreamLifecycle;

const DEFAULT_BUS_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    /// An upstream's discovered tools/resources/prompts changed (including
    /// becoming empty when it left the running state).
    CatalogChanged { upstream: String },
    UpstreamStateChanged {
        upstream: String,
        lifecycle: UpstreamLifecycle,
    },
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<GatewayEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: GatewayEvent) {
        // Err means no live subscribers, which is fine at startup.
        if let Err(err) = self.tx.send(event) {
            debug!("event dropped, no subscribers: {err}");
        }
    }
}
