//! Routing client.
//!
//! Bridges the control plane's read/watch contract to request execution.
//! Readers capture one snapshot pointer per request and use it throughout;
//! the background watcher swaps the pointer on version change, so a
//! mid-request routing update never splits one query across two table
//! versions.

use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::cluster::RoutingTable;

/// The read/watch surface the executor consumes. Backends (the in-process
/// store, or a hosted KV) are interchangeable behind this.
pub trait ControlPlane: Send + Sync {
    fn routing_table(&self) -> Arc<RoutingTable>;
    fn watch_routing(&self) -> watch::Receiver<u64>;
}

impl ControlPlane for crate::cluster::state::ClusterState {
    fn routing_table(&self) -> Arc<RoutingTable> {
        // Inherent method; same name, same contract.
        crate::cluster::state::ClusterState::routing_table(self)
    }

    fn watch_routing(&self) -> watch::Receiver<u64> {
        crate::cluster::state::ClusterState::watch_routing(self)
    }
}

/// Read-mostly routing cache: a single writer (the watcher) replaces the
/// snapshot pointer atomically; readers see a consistent table for a whole
/// request.
pub struct RoutingClient {
    control: Arc<dyn ControlPlane>,
    snapshot: ArcSwap<RoutingTable>,
}

impl RoutingClient {
    pub fn new(control: Arc<dyn ControlPlane>) -> Self {
        let initial = control.routing_table();
        RoutingClient {
            control,
            snapshot: ArcSwap::new(initial),
        }
    }

    /// Current cached snapshot.
    pub fn snapshot(&self) -> Arc<RoutingTable> {
        self.snapshot.load_full()
    }

    /// Re-read the control plane and publish the fresh table.
    pub fn refresh(&self) -> Arc<RoutingTable> {
        let fresh = self.control.routing_table();
        self.snapshot.store(Arc::clone(&fresh));
        debug!(version = fresh.version, "routing_snapshot_refreshed");
        fresh
    }

    /// Run the watcher until `shutdown` flips. On every version change the
    /// snapshot is refreshed and `on_change` runs (plan-cache invalidation
    /// hangs off this).
    pub async fn watch(
        self: Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
        on_change: impl Fn(&RoutingTable) + Send + Sync,
    ) {
        let mut changes = self.control.watch_routing();
        loop {
            tokio::select! {
                changed = changes.changed() => {
                    if changed.is_err() {
                        info!("routing_watch_closed");
                        return;
                    }
                    let table = self.refresh();
                    on_change(&table);
                }
                _ = shutdown.changed() => {
                    info!("routing_watch_shutdown");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::state::ClusterState;
    use crate::cluster::PipelineAssociations;

    #[test]
    fn test_snapshot_is_stable_until_refresh() {
        let state = Arc::new(ClusterState::new());
        state.register_node("node-a", "a", "addr");
        let client = RoutingClient::new(state.clone() as Arc<dyn ControlPlane>);
        assert_eq!(client.snapshot().version, 0);

        state
            .create_index("products", 1, PipelineAssociations::default())
            .expect("create");

        // The cached snapshot does not move on its own.
        assert_eq!(client.snapshot().version, 0);
        assert_eq!(client.refresh().version, 1);
        assert_eq!(client.snapshot().version, 1);
    }

    #[tokio::test]
    async fn test_watcher_refreshes_and_notifies() {
        let state = Arc::new(ClusterState::new());
        state.register_node("node-a", "a", "addr");
        let client = Arc::new(RoutingClient::new(state.clone() as Arc<dyn ControlPlane>));

        let (notify_tx, mut notify_rx) = tokio::sync::mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let watcher = tokio::spawn(Arc::clone(&client).watch(shutdown_rx, move |table| {
            let _ = notify_tx.send(table.version);
        }));

        state
            .create_index("products", 1, PipelineAssociations::default())
            .expect("create");

        let seen = notify_rx.recv().await.expect("change notification");
        assert_eq!(seen, 1);
        assert_eq!(client.snapshot().version, 1);

        let _ = shutdown_tx.send(true);
        watcher.await.expect("watcher exits");
    }
}
