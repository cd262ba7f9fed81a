//! In-process control-plane store.
//!
//! One backend for the read/watch contract the executor consumes: a
//! KV-style state store with watch notifications. Reads are linearizable
//! within the process (a single RwLock guards the authoritative state);
//! the routing table is republished as an immutable snapshot on every
//! version change.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::watch;
use tracing::info;

use crate::cluster::{
    ClusterHealth, HealthStatus, IndexMetadata, NodeInfo, PipelineAssociations, RoutingTable,
    ShardRouting, ShardState,
};
use crate::error::{Result, SearchError};

struct NodeEntry {
    name: String,
    address: String,
    last_heartbeat: Instant,
}

struct StateInner {
    indices: BTreeMap<String, IndexMetadata>,
    routing: Arc<RoutingTable>,
    nodes: BTreeMap<String, NodeEntry>,
    /// Round-robin cursor for shard assignment.
    next_assignment: usize,
}

/// Authoritative cluster state plus the watch channel consumers subscribe to.
pub struct ClusterState {
    inner: RwLock<StateInner>,
    routing_tx: watch::Sender<u64>,
}

impl ClusterState {
    pub fn new() -> Self {
        let (routing_tx, _) = watch::channel(0);
        ClusterState {
            inner: RwLock::new(StateInner {
                indices: BTreeMap::new(),
                routing: Arc::new(RoutingTable::empty()),
                nodes: BTreeMap::new(),
                next_assignment: 0,
            }),
            routing_tx,
        }
    }

    // Node lifecycle

    pub fn register_node(&self, id: &str, name: &str, address: &str) {
        let mut inner = self.inner.write();
        inner.nodes.insert(
            id.to_string(),
            NodeEntry {
                name: name.to_string(),
                address: address.to_string(),
                last_heartbeat: Instant::now(),
            },
        );
        info!(node = id, address, "node_registered");
    }

    pub fn heartbeat(&self, id: &str) -> bool {
        let mut inner = self.inner.write();
        match inner.nodes.get_mut(id) {
            Some(entry) => {
                entry.last_heartbeat = Instant::now();
                true
            }
            None => false,
        }
    }

    pub fn nodes(&self) -> Vec<NodeInfo> {
        let inner = self.inner.read();
        inner
            .nodes
            .iter()
            .map(|(id, entry)| NodeInfo {
                id: id.clone(),
                name: entry.name.clone(),
                address: entry.address.clone(),
                heartbeat_age_ms: entry.last_heartbeat.elapsed().as_millis() as u64,
            })
            .collect()
    }

    // Index lifecycle

    /// Create an index with `shards` primaries, assigned round-robin over
    /// registered nodes and started immediately.
    pub fn create_index(
        &self,
        name: &str,
        shards: u32,
        pipelines: PipelineAssociations,
    ) -> Result<IndexMetadata> {
        let mut inner = self.inner.write();
        if inner.indices.contains_key(name) {
            return Err(SearchError::IndexExists {
                index: name.to_string(),
            });
        }
        if shards == 0 {
            return Err(SearchError::bad_request(
                "shards",
                "an index needs at least one shard",
            ));
        }

        let node_ids: Vec<String> = inner.nodes.keys().cloned().collect();
        let mut routings = Vec::with_capacity(shards as usize);
        for shard in 0..shards {
            let assignment = if node_ids.is_empty() {
                None
            } else {
                let node = node_ids[inner.next_assignment % node_ids.len()].clone();
                inner.next_assignment += 1;
                Some(node)
            };
            let state = if assignment.is_some() {
                ShardState::Started
            } else {
                ShardState::Unassigned
            };
            routings.push(ShardRouting {
                shard,
                node: assignment,
                state,
            });
        }

        let metadata = IndexMetadata {
            name: name.to_string(),
            shards,
            pipelines,
            created_at: Utc::now(),
        };
        inner.indices.insert(name.to_string(), metadata.clone());
        Self::publish_routing(&mut inner, &self.routing_tx, |entries| {
            entries.insert(name.to_string(), routings);
        });
        info!(index = name, shards, "index_created");
        Ok(metadata)
    }

    /// Tombstone all shards of an index and drop its routing entries.
    pub fn delete_index(&self, name: &str) -> Result<IndexMetadata> {
        let mut inner = self.inner.write();
        let metadata = inner
            .indices
            .remove(name)
            .ok_or_else(|| SearchError::IndexNotFound {
                index: name.to_string(),
            })?;
        Self::publish_routing(&mut inner, &self.routing_tx, |entries| {
            entries.remove(name);
        });
        info!(index = name, "index_deleted");
        Ok(metadata)
    }

    /// Update pipeline associations. The only supported index mutation.
    pub fn set_pipelines(
        &self,
        name: &str,
        pipelines: PipelineAssociations,
    ) -> Result<IndexMetadata> {
        let mut inner = self.inner.write();
        let metadata = inner
            .indices
            .get_mut(name)
            .ok_or_else(|| SearchError::IndexNotFound {
                index: name.to_string(),
            })?;
        metadata.pipelines = pipelines;
        Ok(metadata.clone())
    }

    pub fn get_index(&self, name: &str) -> Option<IndexMetadata> {
        self.inner.read().indices.get(name).cloned()
    }

    pub fn indices(&self) -> Vec<IndexMetadata> {
        self.inner.read().indices.values().cloned().collect()
    }

    // Routing

    /// Current immutable routing snapshot.
    pub fn routing_table(&self) -> Arc<RoutingTable> {
        Arc::clone(&self.inner.read().routing)
    }

    /// Subscribe to routing version changes.
    pub fn watch_routing(&self) -> watch::Receiver<u64> {
        self.routing_tx.subscribe()
    }

    /// Rebuild and publish the routing table with `mutate` applied,
    /// bumping the version.
    fn publish_routing<F>(inner: &mut StateInner, tx: &watch::Sender<u64>, mutate: F)
    where
        F: FnOnce(&mut BTreeMap<String, Vec<ShardRouting>>),
    {
        let mut entries: BTreeMap<String, Vec<ShardRouting>> = inner
            .routing
            .indices()
            .map(|index| (index.clone(), inner.routing.shards(index).to_vec()))
            .collect();
        mutate(&mut entries);
        let version = inner.routing.version + 1;
        inner.routing = Arc::new(RoutingTable::new(version, entries));
        let _ = tx.send(version);
    }

    // Diagnostics

    pub fn health(&self) -> ClusterHealth {
        let inner = self.inner.read();
        let mut total = 0;
        let mut started = 0;
        let mut failed = 0;
        for index in inner.routing.indices() {
            for routing in inner.routing.shards(index) {
                total += 1;
                match routing.state {
                    ShardState::Started => started += 1,
                    ShardState::Failed => failed += 1,
                    ShardState::Unassigned | ShardState::Assigned => {}
                }
            }
        }
        let status = if total == 0 || started == total {
            HealthStatus::Green
        } else if started > 0 {
            HealthStatus::Yellow
        } else {
            HealthStatus::Red
        };
        ClusterHealth {
            status,
            nodes: inner.nodes.len(),
            indices: inner.indices.len(),
            shards_total: total,
            shards_started: started,
            shards_failed: failed,
        }
    }

    /// Snapshot for the `_cluster/state` endpoint.
    pub fn state_snapshot(&self) -> ClusterStateSnapshot {
        let (routing, indices) = {
            let inner = self.inner.read();
            (
                (*inner.routing).clone(),
                inner.indices.values().cloned().collect(),
            )
        };
        ClusterStateSnapshot {
            routing_version: routing.version,
            routing,
            indices,
            nodes: self.nodes(),
        }
    }
}

impl Default for ClusterState {
    fn default() -> Self {
        Self::new()
    }
}

/// Full control-plane view for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterStateSnapshot {
    pub routing_version: u64,
    pub routing: RoutingTable,
    pub indices: Vec<IndexMetadata>,
    pub nodes: Vec<NodeInfo>,
}
