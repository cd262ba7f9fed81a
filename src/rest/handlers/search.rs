//! Search handler.

use std::sync::Arc;

use axum::extract::Path;
use axum::{Extension, Json};
use serde_json::Value;

use crate::coordinator::SearchCoordinator;
use crate::rest::error::RestError;

/// `POST /{index}/_search` - execute a search over all started shards.
pub async fn search(
    Extension(coordinator): Extension<Arc<SearchCoordinator>>,
    Path(index): Path<String>,
    body: Option<Json<Value>>,
) -> Result<Json<Value>, RestError> {
    let body = body
        .map(|Json(body)| body)
        .unwrap_or_else(|| serde_json::json!({}));
    let response = coordinator.search(&index, &body).await?;
    Ok(Json(response))
}
