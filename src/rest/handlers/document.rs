//! Document handlers.

use std::sync::Arc;

use axum::extract::Path;
use axum::{Extension, Json};

use crate::coordinator::SearchCoordinator;
use crate::node::Document;
use crate::rest::dto::{DocWriteResponse, GetDocResponse};
use crate::rest::error::RestError;

/// `PUT /{index}/_doc/{id}` - upsert through the document pipeline.
pub async fn put_document(
    Extension(coordinator): Extension<Arc<SearchCoordinator>>,
    Path((index, id)): Path<(String, String)>,
    Json(source): Json<Document>,
) -> Result<Json<DocWriteResponse>, RestError> {
    let write = coordinator.index_document(&index, &id, source).await?;
    Ok(Json(DocWriteResponse {
        index: write.index,
        id: write.id,
        shard: write.shard,
        result: "indexed".to_string(),
    }))
}

/// `GET /{index}/_doc/{id}` - single-shard fetch by id.
pub async fn get_document(
    Extension(coordinator): Extension<Arc<SearchCoordinator>>,
    Path((index, id)): Path<(String, String)>,
) -> Result<Json<GetDocResponse>, RestError> {
    let source = coordinator.get_document(&index, &id).await?;
    Ok(Json(GetDocResponse {
        index,
        found: source.is_some(),
        source,
        id,
    }))
}

/// `DELETE /{index}/_doc/{id}`.
pub async fn delete_document(
    Extension(coordinator): Extension<Arc<SearchCoordinator>>,
    Path((index, id)): Path<(String, String)>,
) -> Result<Json<DocWriteResponse>, RestError> {
    let existed = coordinator.delete_document(&index, &id).await?;
    let shard = crate::coordinator::route_document(&id, coordinator.get_index(&index)?.shards);
    Ok(Json(DocWriteResponse {
        index,
        id,
        shard,
        result: if existed { "deleted" } else { "not_found" }.to_string(),
    }))
}
