//! Pipeline CRUD and test-execution handlers.

use std::sync::Arc;

use axum::extract::Path;
use axum::{Extension, Json};

use crate::coordinator::SearchCoordinator;
use crate::pipeline::{PipelineDef, PipelineInfo};
use crate::rest::dto::{AcknowledgedResponse, PipelineExecuteRequest, PipelineExecuteResponse};
use crate::rest::error::RestError;

/// `POST /_pipelines/{name}` - register or replace a pipeline.
pub async fn put_pipeline(
    Extension(coordinator): Extension<Arc<SearchCoordinator>>,
    Path(name): Path<String>,
    Json(def): Json<PipelineDef>,
) -> Result<Json<PipelineInfo>, RestError> {
    Ok(Json(coordinator.put_pipeline(&name, &def)?))
}

/// `GET /_pipelines/{name}`.
pub async fn get_pipeline(
    Extension(coordinator): Extension<Arc<SearchCoordinator>>,
    Path(name): Path<String>,
) -> Result<Json<PipelineInfo>, RestError> {
    let pipeline = coordinator.get_pipeline(&name)?;
    Ok(Json(PipelineInfo::from(pipeline.as_ref())))
}

/// `DELETE /_pipelines/{name}`.
pub async fn delete_pipeline(
    Extension(coordinator): Extension<Arc<SearchCoordinator>>,
    Path(name): Path<String>,
) -> Result<Json<AcknowledgedResponse>, RestError> {
    coordinator.delete_pipeline(&name)?;
    Ok(Json(AcknowledgedResponse { acknowledged: true }))
}

/// `POST /_pipelines/{name}/_execute` - run against an inline document;
/// stage errors surface instead of degrading.
pub async fn execute_pipeline(
    Extension(coordinator): Extension<Arc<SearchCoordinator>>,
    Path(name): Path<String>,
    Json(request): Json<PipelineExecuteRequest>,
) -> Result<Json<PipelineExecuteResponse>, RestError> {
    let document = coordinator.execute_pipeline(&name, request.document)?;
    Ok(Json(PipelineExecuteResponse { document }))
}
