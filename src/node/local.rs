//! In-process data node.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::cluster::ShardId;
use crate::error::{Result, SearchError, ShardErrorKind};
use crate::execution::timeout::Deadline;
use crate::node::engine::ShardEngine;
use crate::node::{DataNode, Document, ShardSearchResponse, ShardStats};
use crate::plan::physical::ShardFragment;

/// Hosts shard engines inside the coordinator process.
pub struct LocalDataNode {
    node_id: String,
    shards: DashMap<(String, ShardId), Arc<ShardEngine>>,
}

impl LocalDataNode {
    pub fn new(node_id: &str) -> Self {
        LocalDataNode {
            node_id: node_id.to_string(),
            shards: DashMap::new(),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    fn engine(&self, index: &str, shard: ShardId) -> Result<Arc<ShardEngine>> {
        self.shards
            .get(&(index.to_string(), shard))
            .map(|entry| Arc::clone(&entry))
            .ok_or_else(|| SearchError::ShardFailure {
                shard,
                node: self.node_id.clone(),
                kind: ShardErrorKind::SearchFailed,
                message: format!("shard {shard} of index '{index}' is not hosted here"),
            })
    }
}

#[async_trait]
impl DataNode for LocalDataNode {
    async fn search(
        &self,
        fragment: &ShardFragment,
        shard: ShardId,
        deadline: &Deadline,
    ) -> Result<ShardSearchResponse> {
        let engine = self.engine(&fragment.index, shard)?;
        engine.execute(fragment, deadline)
    }

    async fn index_document(
        &self,
        index: &str,
        shard: ShardId,
        id: &str,
        source: Document,
    ) -> Result<()> {
        let engine = self.engine(index, shard)?;
        engine.index(id, source);
        Ok(())
    }

    async fn get_document(
        &self,
        index: &str,
        shard: ShardId,
        id: &str,
    ) -> Result<Option<Document>> {
        let engine = self.engine(index, shard)?;
        Ok(engine.get(id))
    }

    async fn delete_document(&self, index: &str, shard: ShardId, id: &str) -> Result<bool> {
        let engine = self.engine(index, shard)?;
        Ok(engine.delete(id))
    }

    async fn create_shard(&self, index: &str, shard: ShardId) -> Result<()> {
        self.shards
            .insert((index.to_string(), shard), Arc::new(ShardEngine::new()));
        Ok(())
    }

    async fn delete_shard(&self, index: &str, shard: ShardId) -> Result<()> {
        self.shards.remove(&(index.to_string(), shard));
        Ok(())
    }

    async fn shard_stats(&self, index: &str, shard: ShardId) -> Result<ShardStats> {
        let engine = self.engine(index, shard)?;
        Ok(ShardStats {
            doc_count: engine.doc_count(),
            took_ms: 0,
        })
    }
}
