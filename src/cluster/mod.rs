//! Cluster model: indexes, shards, routing, nodes.
//!
//! The coordinator only ever consumes the read/watch contract in
//! [`routing::ControlPlane`]; the in-process store in [`state`] is one
//! backend for it.

pub mod routing;
pub mod state;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type ShardId = u32;

/// Lifecycle of one shard. Only STARTED shards participate in queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardState {
    Unassigned,
    Assigned,
    Started,
    Failed,
}

/// Primary assignment of one shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardRouting {
    pub shard: ShardId,
    pub node: Option<String>,
    pub state: ShardState,
}

/// Versioned (index, shard) -> node map. Versions are monotonic; consumers
/// snapshot one table per request and refresh on version change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingTable {
    pub version: u64,
    entries: BTreeMap<String, Vec<ShardRouting>>,
}

impl RoutingTable {
    pub fn empty() -> Self {
        RoutingTable {
            version: 0,
            entries: BTreeMap::new(),
        }
    }

    pub fn new(version: u64, entries: BTreeMap<String, Vec<ShardRouting>>) -> Self {
        RoutingTable { version, entries }
    }

    pub fn has_index(&self, index: &str) -> bool {
        self.entries.contains_key(index)
    }

    pub fn shards(&self, index: &str) -> &[ShardRouting] {
        self.entries.get(index).map_or(&[], Vec::as_slice)
    }

    /// STARTED shards of an index with their assigned nodes.
    pub fn started_shards(&self, index: &str) -> Vec<(ShardId, String)> {
        self.shards(index)
            .iter()
            .filter(|routing| routing.state == ShardState::Started)
            .filter_map(|routing| {
                routing
                    .node
                    .as_ref()
                    .map(|node| (routing.shard, node.clone()))
            })
            .collect()
    }

    /// Node currently assigned to one shard, if routable.
    pub fn node_for(&self, index: &str, shard: ShardId) -> Option<&str> {
        self.shards(index)
            .iter()
            .find(|routing| routing.shard == shard && routing.state == ShardState::Started)
            .and_then(|routing| routing.node.as_deref())
    }

    pub fn indices(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }
}

/// A data-plane process hosting shards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: String,
    pub name: String,
    pub address: String,
    /// Milliseconds since the node last heartbeated.
    pub heartbeat_age_ms: u64,
}

/// Default pipelines applied for an index, by lifecycle point.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineAssociations {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

/// Logical index: a name, a fixed shard count, pipeline associations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub name: String,
    pub shards: u32,
    #[serde(default)]
    pub pipelines: PipelineAssociations,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Green,
    Yellow,
    Red,
}

/// Snapshot for the `_cluster/health` endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterHealth {
    pub status: HealthStatus,
    pub nodes: usize,
    pub indices: usize,
    pub shards_total: usize,
    pub shards_started: usize,
    pub shards_failed: usize,
}
