//! Process health and metrics handlers.

use std::sync::Arc;

use axum::{Extension, Json};

use crate::coordinator::SearchCoordinator;
use crate::rest::dto::{HealthResponse, MetricsResponse};

/// `GET /health` - liveness.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// `GET /metrics` - process counters and plan-cache statistics.
pub async fn metrics(
    Extension(coordinator): Extension<Arc<SearchCoordinator>>,
) -> Json<MetricsResponse> {
    Json(MetricsResponse {
        metrics: coordinator.metrics().snapshot(),
        plan_cache: coordinator.cache().stats(),
    })
}
