//! Cluster diagnostics handlers.

use std::sync::Arc;

use axum::{Extension, Json};

use crate::cluster::state::ClusterStateSnapshot;
use crate::cluster::ClusterHealth;
use crate::coordinator::SearchCoordinator;

/// `GET /_cluster/health`.
pub async fn health(
    Extension(coordinator): Extension<Arc<SearchCoordinator>>,
) -> Json<ClusterHealth> {
    Json(coordinator.cluster_health())
}

/// `GET /_cluster/state`.
pub async fn state(
    Extension(coordinator): Extension<Arc<SearchCoordinator>>,
) -> Json<ClusterStateSnapshot> {
    Json(coordinator.cluster_state())
}
