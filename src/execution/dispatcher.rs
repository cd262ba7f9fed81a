//! Shard dispatcher.
//!
//! Fans a plan fragment out to every target shard concurrently, one task
//! per shard plus this joiner. Each subrequest gets the smaller of the
//! per-shard cap and the remaining request budget; one shard timing out or
//! failing never cancels its siblings. Failures are classified and folded
//! into the outcome instead of propagating.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde::Serialize;
use tracing::{debug, warn};

use crate::cluster::ShardId;
use crate::error::{SearchError, ShardErrorKind};
use crate::execution::timeout::Deadline;
use crate::node::{DataNode, NodeRegistry, ShardSearchResponse};
use crate::plan::physical::ShardFragment;
use crate::cluster::routing::RoutingClient;

/// One failed shard subrequest, as reported in the response tallies.
#[derive(Debug, Clone, Serialize)]
pub struct ShardFailureInfo {
    pub shard: ShardId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    pub kind: ShardErrorKind,
    pub reason: String,
}

/// Result of one fan-out: per-shard successes (sorted by shard id) and
/// classified failures.
#[derive(Debug, Default)]
pub struct DispatchOutcome {
    pub successes: Vec<(ShardId, ShardSearchResponse)>,
    pub failures: Vec<ShardFailureInfo>,
}

/// Issues parallel per-shard subrequests.
pub struct ShardDispatcher {
    registry: Arc<NodeRegistry>,
    routing: Arc<RoutingClient>,
    /// Per-shard deadline cap (None = only the request budget applies).
    shard_timeout: Option<Duration>,
}

impl ShardDispatcher {
    pub fn new(
        registry: Arc<NodeRegistry>,
        routing: Arc<RoutingClient>,
        shard_timeout: Option<Duration>,
    ) -> Self {
        ShardDispatcher {
            registry,
            routing,
            shard_timeout,
        }
    }

    /// Fan the fragment out to `targets` (shard, assigned node) pairs.
    ///
    /// The targets come from the same routing snapshot whose version is
    /// baked into the fragment, so every subrequest of one search carries
    /// the same routing version.
    pub async fn dispatch(
        &self,
        fragment: Arc<ShardFragment>,
        targets: Vec<(ShardId, String)>,
        deadline: &Deadline,
    ) -> DispatchOutcome {
        let subrequests = targets.into_iter().map(|(shard, node_id)| {
            let fragment = Arc::clone(&fragment);
            let deadline = deadline.clone();
            async move {
                let result = self
                    .search_one(&fragment, shard, &node_id, &deadline)
                    .await;
                (shard, node_id, result)
            }
        });

        let mut outcome = DispatchOutcome::default();
        for (shard, node_id, result) in join_all(subrequests).await {
            match result {
                Ok(response) => outcome.successes.push((shard, response)),
                Err(err) => {
                    let failure = classify(shard, &node_id, &err);
                    warn!(
                        shard,
                        node = %node_id,
                        kind = %failure.kind,
                        reason = %failure.reason,
                        "shard_subrequest_failed"
                    );
                    outcome.failures.push(failure);
                }
            }
        }

        // Arrival order is arbitrary; fix it here so downstream merging is
        // deterministic.
        outcome.successes.sort_by_key(|(shard, _)| *shard);
        outcome.failures.sort_by_key(|failure| failure.shard);
        outcome
    }

    /// One shard subrequest with budget enforcement and the single routing
    /// refresh retry on a missing route.
    async fn search_one(
        &self,
        fragment: &ShardFragment,
        shard: ShardId,
        node_id: &str,
        deadline: &Deadline,
    ) -> Result<ShardSearchResponse, SearchError> {
        let client = match self.registry.get(node_id) {
            Some(client) => client,
            None => self.reroute(fragment, shard, node_id)?,
        };

        let budget = deadline.derived_budget(self.shard_timeout);
        self.bounded_search(client, fragment, shard, deadline, budget)
            .await
    }

    async fn bounded_search(
        &self,
        client: Arc<dyn DataNode>,
        fragment: &ShardFragment,
        shard: ShardId,
        deadline: &Deadline,
        budget: Option<Duration>,
    ) -> Result<ShardSearchResponse, SearchError> {
        match budget {
            Some(budget) => {
                match tokio::time::timeout(budget, client.search(fragment, shard, deadline)).await
                {
                    Ok(result) => result,
                    Err(_) => Err(SearchError::TimedOut {
                        timeout_ms: budget.as_millis() as u64,
                    }),
                }
            }
            None => client.search(fragment, shard, deadline).await,
        }
    }

    /// Re-read the routing table once and retry the client lookup; a shard
    /// with no live route afterwards is marked failed by the caller.
    fn reroute(
        &self,
        fragment: &ShardFragment,
        shard: ShardId,
        stale_node: &str,
    ) -> Result<Arc<dyn DataNode>, SearchError> {
        debug!(shard, node = stale_node, "routing_refresh_for_missing_client");
        let table = self.routing.refresh();
        table
            .node_for(&fragment.index, shard)
            .and_then(|node_id| self.registry.get(node_id))
            .ok_or_else(|| SearchError::ShardFailure {
                shard,
                node: stale_node.to_string(),
                kind: ShardErrorKind::ClientNotFound,
                message: format!("no live route to shard {shard} after routing refresh"),
            })
    }
}

/// Map an error to its shard failure classification.
fn classify(shard: ShardId, node_id: &str, err: &SearchError) -> ShardFailureInfo {
    let (kind, reason) = match err {
        SearchError::ShardFailure {
            kind, message, ..
        } => (*kind, message.clone()),
        SearchError::TimedOut { timeout_ms } => (
            ShardErrorKind::ConnectionFailed,
            format!("shard deadline of {timeout_ms}ms exceeded"),
        ),
        other => (ShardErrorKind::SearchFailed, other.to_string()),
    };
    ShardFailureInfo {
        shard,
        node: Some(node_id.to_string()),
        kind,
        reason,
    }
}
