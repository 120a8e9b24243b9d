//! Rebuilds the aggregated catalog whenever an upstream's contribution
//! changes, and publishes immutable versioned snapshots on a watch channel.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::catalog::Catalog;
use crate::events::EventBus;
use crate::events::GatewayEvent;
use crate::upstream::manager::UpstreamManager;

pub struct CatalogService {
    catalog_rx: watch::Receiver<Arc<Catalog>>,
    task: JoinHandle<()>,
}

impl Drop for CatalogService {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl CatalogService {
    /// Wires the rebuild loop. `catalog_tx` is the sender half of the watch
    /// channel whose receiver the manager (and anyone needing dependency
    /// gating) already holds.
    pub fn start(
        manager: Arc<UpstreamManager>,
        bus: &EventBus,
        catalog_tx: watch::Sender<Arc<Catalog>>,
    ) -> Self {
        let catalog_rx = catalog_tx.subscribe();
        let mut events = bus.subscribe();
        let task = tokio::spawn(async move {
            let mut version: u64 = 0;
            loop {
                match events.recv().await {
                    Ok(GatewayEvent::CatalogChanged { upstream }) => {
                        // Coalesce bursts: drain whatever else is queued
                        // before rebuilding once.
                        while let Ok(event) = events.try_recv() {
                            debug!("coalescing catalog event: {event:?}");
                        }
                        version += 1;
                        let snapshots = manager.catalog_snapshots().await;
                        let catalog = Catalog::build(version, &snapshots);
                        debug!(
                            "catalog v{version} rebuilt after `{upstream}` changed: {} items",
                            catalog.len()
                        );
                        let _ = catalog_tx.send(catalog);
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        // Missed events collapse into one rebuild.
                        debug!("catalog rebuild lagged {skipped} events");
                        version += 1;
                        let snapshots = manager.catalog_snapshots().await;
                        let _ = catalog_tx.send(Catalog::build(version, &snapshots));
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Self { catalog_rx, task }
    }

    /// The current immutable snapshot.
    pub fn current(&self) -> Arc<Catalog> {
        self.catalog_rx.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<Arc<Catalog>> {
        self.catalog_rx.clone()
    }
}
