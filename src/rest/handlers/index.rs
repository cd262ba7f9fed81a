//! Index lifecycle handlers.

use std::sync::Arc;

use axum::extract::Path;
use axum::{Extension, Json};

use crate::coordinator::SearchCoordinator;
use crate::rest::dto::{
    AcknowledgedResponse, CreateIndexRequest, IndexResponse, IndexSettingsRequest,
};
use crate::rest::error::RestError;

/// `PUT /{index}` - create an index with a fixed shard count.
pub async fn create_index(
    Extension(coordinator): Extension<Arc<SearchCoordinator>>,
    Path(index): Path<String>,
    body: Option<Json<CreateIndexRequest>>,
) -> Result<Json<IndexResponse>, RestError> {
    let request = body.map(|Json(request)| request).unwrap_or_default();
    let metadata = coordinator
        .create_index(&index, request.shards, request.pipelines)
        .await?;
    Ok(Json(IndexResponse {
        acknowledged: true,
        index: metadata,
    }))
}

/// `GET /{index}` - index metadata.
pub async fn get_index(
    Extension(coordinator): Extension<Arc<SearchCoordinator>>,
    Path(index): Path<String>,
) -> Result<Json<IndexResponse>, RestError> {
    let metadata = coordinator.get_index(&index)?;
    Ok(Json(IndexResponse {
        acknowledged: true,
        index: metadata,
    }))
}

/// `DELETE /{index}` - tombstone all shards.
pub async fn delete_index(
    Extension(coordinator): Extension<Arc<SearchCoordinator>>,
    Path(index): Path<String>,
) -> Result<Json<AcknowledgedResponse>, RestError> {
    coordinator.delete_index(&index).await?;
    Ok(Json(AcknowledgedResponse { acknowledged: true }))
}

/// `PUT /{index}/_settings` - update default pipeline associations.
pub async fn put_settings(
    Extension(coordinator): Extension<Arc<SearchCoordinator>>,
    Path(index): Path<String>,
    Json(request): Json<IndexSettingsRequest>,
) -> Result<Json<IndexResponse>, RestError> {
    let metadata = coordinator.put_settings(&index, request.pipelines)?;
    Ok(Json(IndexResponse {
        acknowledged: true,
        index: metadata,
    }))
}
