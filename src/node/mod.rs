//! Data-node plane.
//!
//! [`DataNode`] is the internal RPC surface between the coordinator and the
//! processes hosting shards. Two implementations: [`local::LocalDataNode`]
//! runs the in-memory shard engine in-process, [`remote::RemoteDataNode`]
//! speaks HTTP to a peer's `/_internal` routes. The coordinator only ever
//! holds `Arc<dyn DataNode>`.

pub mod engine;
pub mod local;
pub mod remote;

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::aggregation::PartialAgg;
use crate::cluster::ShardId;
use crate::error::Result;
use crate::execution::timeout::Deadline;
use crate::plan::physical::ShardFragment;

/// A JSON document source.
pub type Document = serde_json::Map<String, Value>;

/// Internal RPC surface between the executor and a data node.
#[async_trait]
pub trait DataNode: Send + Sync {
    /// Execute a plan fragment against one shard.
    async fn search(
        &self,
        fragment: &ShardFragment,
        shard: ShardId,
        deadline: &Deadline,
    ) -> Result<ShardSearchResponse>;

    async fn index_document(
        &self,
        index: &str,
        shard: ShardId,
        id: &str,
        source: Document,
    ) -> Result<()>;

    async fn get_document(
        &self,
        index: &str,
        shard: ShardId,
        id: &str,
    ) -> Result<Option<Document>>;

    /// Returns true when the document existed.
    async fn delete_document(&self, index: &str, shard: ShardId, id: &str) -> Result<bool>;

    async fn create_shard(&self, index: &str, shard: ShardId) -> Result<()>;

    async fn delete_shard(&self, index: &str, shard: ShardId) -> Result<()>;

    async fn shard_stats(&self, index: &str, shard: ShardId) -> Result<ShardStats>;
}

/// One matching document as returned by a shard, with the values of the
/// requested sort keys precomputed shard-side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardHit {
    pub id: String,
    pub score: f64,
    pub sort_values: Vec<SortValue>,
    pub source: Document,
}

/// Per-shard search result: up to `fetch` pre-sorted hits plus partial
/// aggregations over all matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardSearchResponse {
    pub hits: Vec<ShardHit>,
    /// Total matching documents on the shard, before the fetch cut.
    pub total_hits: u64,
    pub max_score: Option<f64>,
    pub partial_aggs: BTreeMap<String, PartialAgg>,
    pub stats: ShardStats,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardStats {
    pub doc_count: u64,
    pub took_ms: u64,
}

/// A sort key value with a total order across JSON scalar types.
///
/// Ranked null < bool < number < string; within a rank the natural order
/// applies (floats via total_cmp, so the order is total even with NaN).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SortValue {
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
}

impl SortValue {
    pub fn from_json(value: &Value) -> SortValue {
        match value {
            Value::Bool(b) => SortValue::Bool(*b),
            Value::Number(n) => n.as_f64().map_or(SortValue::Null, SortValue::Num),
            Value::String(s) => SortValue::Str(s.clone()),
            _ => SortValue::Null,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            SortValue::Null => 0,
            SortValue::Bool(_) => 1,
            SortValue::Num(_) => 2,
            SortValue::Str(_) => 3,
        }
    }
}

impl Eq for SortValue {}

impl Ord for SortValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (SortValue::Bool(a), SortValue::Bool(b)) => a.cmp(b),
            (SortValue::Num(a), SortValue::Num(b)) => a.total_cmp(b),
            (SortValue::Str(a), SortValue::Str(b)) => a.cmp(b),
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }
}

impl PartialOrd for SortValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Live node clients by node id. Read-mostly; registration happens at
/// bootstrap and on peer discovery.
#[derive(Default)]
pub struct NodeRegistry {
    clients: DashMap<String, Arc<dyn DataNode>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        NodeRegistry {
            clients: DashMap::new(),
        }
    }

    pub fn register(&self, node_id: &str, client: Arc<dyn DataNode>) {
        self.clients.insert(node_id.to_string(), client);
    }

    pub fn get(&self, node_id: &str) -> Option<Arc<dyn DataNode>> {
        self.clients.get(node_id).map(|entry| Arc::clone(&entry))
    }

    pub fn remove(&self, node_id: &str) {
        self.clients.remove(node_id);
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sort_value_rank_order() {
        let mut values = vec![
            SortValue::Str("a".to_string()),
            SortValue::Num(1.0),
            SortValue::Null,
            SortValue::Bool(true),
        ];
        values.sort();
        assert_eq!(values[0], SortValue::Null);
        assert_eq!(values[1], SortValue::Bool(true));
        assert_eq!(values[2], SortValue::Num(1.0));
        assert_eq!(values[3], SortValue::Str("a".to_string()));
    }

    #[test]
    fn test_sort_value_numeric_order() {
        let a = SortValue::from_json(&json!(2));
        let b = SortValue::from_json(&json!(10.5));
        assert!(a < b);
    }

    #[test]
    fn test_sort_value_from_non_scalar_is_null() {
        assert_eq!(SortValue::from_json(&json!([1, 2])), SortValue::Null);
        assert_eq!(SortValue::from_json(&json!({"a": 1})), SortValue::Null);
        assert_eq!(SortValue::from_json(&Value::Null), SortValue::Null);
    }

    #[test]
    fn test_sort_value_roundtrips() {
        let value = SortValue::Num(3.5);
        let json = serde_json::to_string(&value).expect("serialize");
        let back: SortValue = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, value);
    }
}
