//! HTTP API Data Transfer Objects
//!
//! Request/response types for the index, document, pipeline, and admin
//! endpoints. The search response itself is the merger's
//! [`crate::execution::merge::SearchResponse`], serialized as-is.

use serde::{Deserialize, Serialize};

use crate::cluster::{IndexMetadata, PipelineAssociations, ShardId};
use crate::execution::cache::CacheStats;
use crate::metrics::MetricsSnapshot;
use crate::node::Document;

/// Body of `PUT /{index}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateIndexRequest {
    pub shards: Option<u32>,
    #[serde(default)]
    pub pipelines: PipelineAssociations,
}

/// Body of `PUT /{index}/_settings`.
#[derive(Debug, Clone, Deserialize)]
pub struct IndexSettingsRequest {
    pub pipelines: PipelineAssociations,
}

#[derive(Debug, Serialize)]
pub struct AcknowledgedResponse {
    pub acknowledged: bool,
}

#[derive(Debug, Serialize)]
pub struct IndexResponse {
    pub acknowledged: bool,
    pub index: IndexMetadata,
}

/// Response of a document write or delete.
#[derive(Debug, Serialize)]
pub struct DocWriteResponse {
    #[serde(rename = "_index")]
    pub index: String,
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_shard")]
    pub shard: ShardId,
    pub result: String,
}

/// Response of `GET /{index}/_doc/{id}`.
#[derive(Debug, Serialize)]
pub struct GetDocResponse {
    #[serde(rename = "_index")]
    pub index: String,
    #[serde(rename = "_id")]
    pub id: String,
    pub found: bool,
    #[serde(rename = "_source", skip_serializing_if = "Option::is_none")]
    pub source: Option<Document>,
}

/// Body of `POST /_pipelines/{name}/_execute`.
#[derive(Debug, Deserialize)]
pub struct PipelineExecuteRequest {
    pub document: Document,
}

#[derive(Debug, Serialize)]
pub struct PipelineExecuteResponse {
    pub document: Document,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// `GET /metrics` response: process counters plus plan-cache statistics.
#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    #[serde(flatten)]
    pub metrics: MetricsSnapshot,
    pub plan_cache: CacheStats,
}
