//! HTTP client for a peer data node.
//!
//! Speaks to the `/_internal/{index}/{shard}/...` routes a peer coordinator
//! exposes. Transport failures surface as ShardFailure/ConnectionFailed so
//! the dispatcher can fold them into the response tallies.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::cluster::ShardId;
use crate::error::{Result, SearchError, ShardErrorKind};
use crate::execution::timeout::Deadline;
use crate::node::{DataNode, Document, ShardSearchResponse, ShardStats};
use crate::plan::physical::ShardFragment;

/// Body of the internal shard-search route.
#[derive(Debug, Serialize, Deserialize)]
pub struct InternalSearchRequest {
    pub fragment: ShardFragment,
    /// Remaining request budget in milliseconds; 0 = unbounded.
    pub deadline_ms: u64,
}

/// Wire form of a shard-level error from a peer.
#[derive(Debug, Deserialize)]
struct InternalError {
    error: String,
}

pub struct RemoteDataNode {
    node_id: String,
    base_url: String,
    client: reqwest::Client,
}

impl RemoteDataNode {
    pub fn new(node_id: &str, base_url: &str) -> Self {
        RemoteDataNode {
            node_id: node_id.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, index: &str, shard: ShardId, suffix: &str) -> String {
        format!("{}/_internal/{index}/{shard}{suffix}", self.base_url)
    }

    fn connection_failed(&self, shard: ShardId, err: &reqwest::Error) -> SearchError {
        SearchError::ShardFailure {
            shard,
            node: self.node_id.clone(),
            kind: ShardErrorKind::ConnectionFailed,
            message: err.to_string(),
        }
    }

    async fn shard_error(
        &self,
        shard: ShardId,
        response: reqwest::Response,
    ) -> SearchError {
        let message = match response.json::<InternalError>().await {
            Ok(body) => body.error,
            Err(err) => err.to_string(),
        };
        SearchError::ShardFailure {
            shard,
            node: self.node_id.clone(),
            kind: ShardErrorKind::SearchFailed,
            message,
        }
    }
}

#[async_trait]
impl DataNode for RemoteDataNode {
    async fn search(
        &self,
        fragment: &ShardFragment,
        shard: ShardId,
        deadline: &Deadline,
    ) -> Result<ShardSearchResponse> {
        let body = InternalSearchRequest {
            fragment: fragment.clone(),
            deadline_ms: deadline
                .remaining()
                .map_or(0, |remaining| remaining.as_millis() as u64),
        };
        let response = self
            .client
            .post(self.url(&fragment.index, shard, "/_search"))
            .json(&body)
            .send()
            .await
            .map_err(|err| self.connection_failed(shard, &err))?;
        if !response.status().is_success() {
            return Err(self.shard_error(shard, response).await);
        }
        response
            .json::<ShardSearchResponse>()
            .await
            .map_err(|err| self.connection_failed(shard, &err))
    }

    async fn index_document(
        &self,
        index: &str,
        shard: ShardId,
        id: &str,
        source: Document,
    ) -> Result<()> {
        let response = self
            .client
            .put(self.url(index, shard, &format!("/_doc/{id}")))
            .json(&source)
            .send()
            .await
            .map_err(|err| self.connection_failed(shard, &err))?;
        if !response.status().is_success() {
            return Err(self.shard_error(shard, response).await);
        }
        Ok(())
    }

    async fn get_document(
        &self,
        index: &str,
        shard: ShardId,
        id: &str,
    ) -> Result<Option<Document>> {
        let response = self
            .client
            .get(self.url(index, shard, &format!("/_doc/{id}")))
            .send()
            .await
            .map_err(|err| self.connection_failed(shard, &err))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(self.shard_error(shard, response).await);
        }
        response
            .json::<Document>()
            .await
            .map(Some)
            .map_err(|err| self.connection_failed(shard, &err))
    }

    async fn delete_document(&self, index: &str, shard: ShardId, id: &str) -> Result<bool> {
        let response = self
            .client
            .delete(self.url(index, shard, &format!("/_doc/{id}")))
            .send()
            .await
            .map_err(|err| self.connection_failed(shard, &err))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !response.status().is_success() {
            return Err(self.shard_error(shard, response).await);
        }
        Ok(true)
    }

    async fn create_shard(&self, index: &str, shard: ShardId) -> Result<()> {
        let response = self
            .client
            .put(self.url(index, shard, ""))
            .send()
            .await
            .map_err(|err| self.connection_failed(shard, &err))?;
        if !response.status().is_success() {
            return Err(self.shard_error(shard, response).await);
        }
        Ok(())
    }

    async fn delete_shard(&self, index: &str, shard: ShardId) -> Result<()> {
        let response = self
            .client
            .delete(self.url(index, shard, ""))
            .send()
            .await
            .map_err(|err| self.connection_failed(shard, &err))?;
        if !response.status().is_success() {
            return Err(self.shard_error(shard, response).await);
        }
        Ok(())
    }

    async fn shard_stats(&self, index: &str, shard: ShardId) -> Result<ShardStats> {
        let response = self
            .client
            .get(self.url(index, shard, "/_stats"))
            .send()
            .await
            .map_err(|err| self.connection_failed(shard, &err))?;
        if !response.status().is_success() {
            return Err(self.shard_error(shard, response).await);
        }
        response
            .json::<ShardStats>()
            .await
            .map_err(|err| self.connection_failed(shard, &err))
    }
}
