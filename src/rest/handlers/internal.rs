//! Internal node routes.
//!
//! The HTTP face of the [`crate::node::DataNode`] contract: peers'
//! `RemoteDataNode` clients call these to reach shards hosted by this
//! process. Errors come back as `{"error": "..."}` with a non-2xx status
//! so the remote client can classify them.

use std::sync::Arc;

use axum::extract::Path;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};

use crate::cluster::ShardId;
use crate::coordinator::SearchCoordinator;
use crate::error::SearchError;
use crate::execution::timeout::Deadline;
use crate::node::remote::InternalSearchRequest;
use crate::node::{Document, ShardSearchResponse, ShardStats};

fn internal_error(err: &SearchError) -> Response {
    let status = match err {
        SearchError::TimedOut { .. } => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(serde_json::json!({"error": err.to_string()}))).into_response()
}

/// `POST /_internal/{index}/{shard}/_search`.
pub async fn shard_search(
    Extension(coordinator): Extension<Arc<SearchCoordinator>>,
    Path((_index, shard)): Path<(String, ShardId)>,
    Json(request): Json<InternalSearchRequest>,
) -> Response {
    let deadline = Deadline::from_millis(request.deadline_ms);
    match coordinator
        .local_node()
        .search(&request.fragment, shard, &deadline)
        .await
    {
        Ok(response) => Json::<ShardSearchResponse>(response).into_response(),
        Err(err) => internal_error(&err),
    }
}

/// `PUT /_internal/{index}/{shard}/_doc/{id}`.
pub async fn shard_put_document(
    Extension(coordinator): Extension<Arc<SearchCoordinator>>,
    Path((index, shard, id)): Path<(String, ShardId, String)>,
    Json(source): Json<Document>,
) -> Response {
    match coordinator
        .local_node()
        .index_document(&index, shard, &id, source)
        .await
    {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => internal_error(&err),
    }
}

/// `GET /_internal/{index}/{shard}/_doc/{id}`.
pub async fn shard_get_document(
    Extension(coordinator): Extension<Arc<SearchCoordinator>>,
    Path((index, shard, id)): Path<(String, ShardId, String)>,
) -> Response {
    match coordinator
        .local_node()
        .get_document(&index, shard, &id)
        .await
    {
        Ok(Some(source)) => Json(source).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(err) => internal_error(&err),
    }
}

/// `DELETE /_internal/{index}/{shard}/_doc/{id}`.
pub async fn shard_delete_document(
    Extension(coordinator): Extension<Arc<SearchCoordinator>>,
    Path((index, shard, id)): Path<(String, ShardId, String)>,
) -> Response {
    match coordinator
        .local_node()
        .delete_document(&index, shard, &id)
        .await
    {
        Ok(true) => StatusCode::OK.into_response(),
        Ok(false) => StatusCode::NOT_FOUND.into_response(),
        Err(err) => internal_error(&err),
    }
}

/// `PUT /_internal/{index}/{shard}`.
pub async fn shard_create(
    Extension(coordinator): Extension<Arc<SearchCoordinator>>,
    Path((index, shard)): Path<(String, ShardId)>,
) -> Response {
    match coordinator.local_node().create_shard(&index, shard).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => internal_error(&err),
    }
}

/// `DELETE /_internal/{index}/{shard}`.
pub async fn shard_delete(
    Extension(coordinator): Extension<Arc<SearchCoordinator>>,
    Path((index, shard)): Path<(String, ShardId)>,
) -> Response {
    match coordinator.local_node().delete_shard(&index, shard).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => internal_error(&err),
    }
}

/// `GET /_internal/{index}/{shard}/_stats`.
pub async fn shard_stats(
    Extension(coordinator): Extension<Arc<SearchCoordinator>>,
    Path((index, shard)): Path<(String, ShardId)>,
) -> Response {
    match coordinator.local_node().shard_stats(&index, shard).await {
        Ok(stats) => Json::<ShardStats>(stats).into_response(),
        Err(err) => internal_error(&err),
    }
}
