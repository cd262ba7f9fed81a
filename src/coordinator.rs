//! Search coordinator.
//!
//! Owns the full request path:
//!
//! ```text
//! body -> Parser -> Pipeline(query) -> Converter -> Plan Cache -> (miss:
//! Optimizer -> Physical Planner) -> Shard Dispatcher -> Result Merger ->
//! Pipeline(result) -> response
//! ```
//!
//! Query-side errors fail before any RPC; execution-side failures are folded
//! into the response tallies, and only a fully failed fan-out becomes
//! ServiceUnavailable.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::cluster::routing::{ControlPlane, RoutingClient};
use crate::cluster::state::{ClusterState, ClusterStateSnapshot};
use crate::cluster::{ClusterHealth, IndexMetadata, PipelineAssociations, ShardId};
use crate::config::Config;
use crate::cost::CostModel;
use crate::dsl;
use crate::error::{Result, SearchError};
use crate::execution::cache::{PhysicalKey, PlanCache};
use crate::execution::dispatcher::ShardDispatcher;
use crate::execution::merge::{self, MergeSpec};
use crate::execution::timeout::Deadline;
use crate::metrics::Metrics;
use crate::node::local::LocalDataNode;
use crate::node::{DataNode, Document, NodeRegistry};
use crate::optimizer::Optimizer;
use crate::pipeline::{Pipeline, PipelineDef, PipelineInfo, PipelineRegistry};
use crate::plan::builder::PlanBuilder;
use crate::plan::physical::PhysicalPlanner;

/// Outcome of a document write.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DocWrite {
    pub index: String,
    pub id: String,
    pub shard: ShardId,
}

/// The coordinator: one per process, shared across requests.
pub struct SearchCoordinator {
    config: Arc<Config>,
    cluster: Arc<ClusterState>,
    routing: Arc<RoutingClient>,
    registry: Arc<NodeRegistry>,
    local_node_id: String,
    cache: Arc<PlanCache>,
    pipelines: Arc<PipelineRegistry>,
    builder: PlanBuilder,
    optimizer: Optimizer,
    physical_planner: PhysicalPlanner,
    cost_model: CostModel,
    dispatcher: ShardDispatcher,
    metrics: Arc<Metrics>,
    shutdown_tx: watch::Sender<bool>,
}

impl SearchCoordinator {
    /// Build a coordinator with its local data node registered in the
    /// cluster. The routing watcher is spawned separately (see
    /// [`Self::spawn_routing_watcher`]); correctness does not depend on it
    /// because physical cache keys carry the routing version.
    pub fn new(config: Config) -> Arc<Self> {
        let config = Arc::new(config);
        let cluster = Arc::new(ClusterState::new());
        let local_node_id = config.cluster.node_name.clone();
        cluster.register_node(&local_node_id, &local_node_id, "local");

        let registry = Arc::new(NodeRegistry::new());
        registry.register(
            &local_node_id,
            Arc::new(LocalDataNode::new(&local_node_id)) as Arc<dyn DataNode>,
        );

        let routing = Arc::new(RoutingClient::new(
            Arc::clone(&cluster) as Arc<dyn ControlPlane>
        ));

        let cost_model = CostModel::default();
        let shard_timeout = duration_from_millis(config.query.shard_timeout_ms);
        let dispatcher = ShardDispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&routing),
            shard_timeout,
        );

        let (shutdown_tx, _) = watch::channel(false);

        Arc::new(SearchCoordinator {
            cache: Arc::new(PlanCache::new(
                config.cache.logical_capacity,
                config.cache.physical_capacity,
            )),
            pipelines: Arc::new(PipelineRegistry::new(
                Duration::from_millis(config.pipeline.default_timeout_ms),
            )),
            builder: PlanBuilder::new(),
            optimizer: Optimizer::new(config.optimizer.visitation_cap),
            physical_planner: PhysicalPlanner::new(cost_model.clone()),
            cost_model,
            dispatcher,
            metrics: Arc::new(Metrics::new()),
            local_node_id,
            cluster,
            routing,
            registry,
            config,
            shutdown_tx,
        })
    }

    /// Watch routing changes in the background, refreshing the snapshot and
    /// evicting stale physical plan entries. Stops on [`Self::shutdown`].
    pub fn spawn_routing_watcher(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let routing = Arc::clone(&self.routing);
        let cache = Arc::clone(&self.cache);
        let shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            routing
                .watch(shutdown_rx, move |table| {
                    for index in table.indices() {
                        cache.evict_physical_for(index);
                    }
                })
                .await;
        })
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn cache(&self) -> &PlanCache {
        &self.cache
    }

    pub fn local_node_id(&self) -> &str {
        &self.local_node_id
    }

    /// The node client serving this process's shards; backs the internal
    /// REST routes.
    pub fn local_node(&self) -> Arc<dyn DataNode> {
        self.registry
            .get(&self.local_node_id)
            .expect("local node registered at construction")
    }

    /// Register a peer data node client (e.g. a RemoteDataNode).
    pub fn register_node(&self, node_id: &str, address: &str, client: Arc<dyn DataNode>) {
        self.cluster.register_node(node_id, node_id, address);
        self.registry.register(node_id, client);
    }

    // Index lifecycle

    pub async fn create_index(
        &self,
        name: &str,
        shards: Option<u32>,
        pipelines: PipelineAssociations,
    ) -> Result<IndexMetadata> {
        validate_index_name(name)?;
        self.validate_associations(&pipelines)?;

        let shards = shards.unwrap_or(self.config.cluster.default_shards);
        let metadata = self.cluster.create_index(name, shards, pipelines)?;
        let table = self.routing.refresh();

        for (shard, node_id) in table.started_shards(name) {
            match self.registry.get(&node_id) {
                Some(client) => client.create_shard(name, shard).await?,
                None => warn!(index = name, shard, node = %node_id, "no_client_for_new_shard"),
            }
        }
        Ok(metadata)
    }

    pub fn get_index(&self, name: &str) -> Result<IndexMetadata> {
        self.cluster
            .get_index(name)
            .ok_or_else(|| SearchError::IndexNotFound {
                index: name.to_string(),
            })
    }

    pub async fn delete_index(&self, name: &str) -> Result<()> {
        // Capture the assignments before the tombstone drops them.
        let targets = self.routing.snapshot().started_shards(name);
        self.cluster.delete_index(name)?;
        self.routing.refresh();
        self.cache.invalidate_index(name);

        for (shard, node_id) in targets {
            if let Some(client) = self.registry.get(&node_id) {
                if let Err(err) = client.delete_shard(name, shard).await {
                    warn!(index = name, shard, error = %err, "shard_cleanup_failed");
                }
            }
        }
        Ok(())
    }

    /// Update the index's default pipeline associations. Invalidates the
    /// index's cached plans.
    pub fn put_settings(
        &self,
        name: &str,
        pipelines: PipelineAssociations,
    ) -> Result<IndexMetadata> {
        self.validate_associations(&pipelines)?;
        let metadata = self.cluster.set_pipelines(name, pipelines)?;
        self.cache.invalidate_index(name);
        Ok(metadata)
    }

    fn validate_associations(&self, pipelines: &PipelineAssociations) -> Result<()> {
        for (slot, name) in [
            ("query", &pipelines.query),
            ("document", &pipelines.document),
            ("result", &pipelines.result),
        ] {
            if let Some(name) = name {
                if self.pipelines.get(name).is_none() {
                    return Err(SearchError::bad_request(
                        format!("pipelines.{slot}"),
                        format!("unknown pipeline '{name}'"),
                    ));
                }
            }
        }
        Ok(())
    }

    // Documents

    /// Upsert one document: document pipeline, then route to the shard
    /// owning `crc32(id) mod shards`.
    pub async fn index_document(
        &self,
        index: &str,
        id: &str,
        source: Document,
    ) -> Result<DocWrite> {
        let metadata = self.get_index(index)?;

        let source = match &metadata.pipelines.document {
            Some(pipeline) => self.run_named_pipeline(pipeline, source),
            None => source,
        };

        let shard = route_document(id, metadata.shards);
        let client = self.client_for(index, shard)?;
        client.index_document(index, shard, id, source).await?;
        self.metrics.documents_indexed.fetch_add(1, Ordering::Relaxed);
        debug!(index, id, shard, "document_indexed");
        Ok(DocWrite {
            index: index.to_string(),
            id: id.to_string(),
            shard,
        })
    }

    pub async fn get_document(&self, index: &str, id: &str) -> Result<Option<Document>> {
        let metadata = self.get_index(index)?;
        let shard = route_document(id, metadata.shards);
        let client = self.client_for(index, shard)?;
        client.get_document(index, shard, id).await
    }

    pub async fn delete_document(&self, index: &str, id: &str) -> Result<bool> {
        let metadata = self.get_index(index)?;
        let shard = route_document(id, metadata.shards);
        let client = self.client_for(index, shard)?;
        client.delete_document(index, shard, id).await
    }

    /// Resolve the client for one shard, refreshing the routing snapshot
    /// once if the current one has no route.
    fn client_for(&self, index: &str, shard: ShardId) -> Result<Arc<dyn DataNode>> {
        let table = self.routing.snapshot();
        let node = match table.node_for(index, shard) {
            Some(node) => Some(node.to_string()),
            None => self
                .routing
                .refresh()
                .node_for(index, shard)
                .map(str::to_string),
        };
        node.and_then(|node_id| self.registry.get(&node_id))
            .ok_or_else(|| SearchError::RoutingUnavailable {
                index: index.to_string(),
            })
    }

    // Search

    /// Execute a search. Returns the response body; the result pipeline, if
    /// associated, has already run over it.
    pub async fn search(&self, index: &str, body: &Value) -> Result<Value> {
        self.metrics.searches_total.fetch_add(1, Ordering::Relaxed);
        let request_id = uuid::Uuid::new_v4();
        debug!(%request_id, index, "search_accepted");
        let result = self.search_inner(index, body).await;
        match &result {
            Ok(response) => {
                if response
                    .get("timed_out")
                    .and_then(Value::as_bool)
                    .unwrap_or(false)
                {
                    self.metrics
                        .searches_timed_out
                        .fetch_add(1, Ordering::Relaxed);
                }
            }
            Err(_) => {
                self.metrics.searches_failed.fetch_add(1, Ordering::Relaxed);
            }
        }
        result
    }

    async fn search_inner(&self, index: &str, body: &Value) -> Result<Value> {
        let deadline = Deadline::from_millis(self.config.query.timeout_ms);
        let metadata = self.get_index(index)?;

        // Query pipeline rewrites the raw request body before parsing.
        let body = match &metadata.pipelines.query {
            Some(pipeline) => {
                let input = body
                    .as_object()
                    .cloned()
                    .ok_or_else(|| {
                        SearchError::bad_request("", "search body must be an object")
                    })?;
                Value::Object(self.run_named_pipeline(pipeline, input))
            }
            None => body.clone(),
        };

        let request = dsl::parse_search_request(&body)?;

        // Planning: sequential, bounded by its own short ceiling.
        let planning_budget =
            deadline.derived_budget(duration_from_millis(self.config.query.planning_timeout_ms));
        let planning_start = Instant::now();

        let logical_key = PlanCache::logical_key(index, &request);
        let logical = self
            .cache
            .get_or_build_logical(logical_key, index, || {
                let plan = self.builder.build(index, &request)?;
                self.optimizer.optimize(plan)
            })
            .map_err(|err| {
                if let SearchError::PlanningFailed { .. } = &err {
                    // Poisoning probe: capture the request for offline
                    // analysis; it never enters the cache.
                    tracing::error!(index, request = %body, error = %err, "planning_failed_probe");
                }
                err
            })?;

        // One routing snapshot per request; every subrequest uses it.
        let table = self.routing.snapshot();
        let mut targets = table.started_shards(index);
        let table = if targets.is_empty() {
            // Possibly stale; the one permitted refresh.
            let fresh = self.routing.refresh();
            targets = fresh.started_shards(index);
            fresh
        } else {
            table
        };
        if targets.is_empty() {
            return Err(SearchError::RoutingUnavailable {
                index: index.to_string(),
            });
        }

        let physical = self.cache.get_or_build_physical(
            PhysicalKey {
                logical_hash: logical_key,
                cost_model_version: self.cost_model.version,
                routing_version: table.version,
            },
            index,
            || self.physical_planner.plan(&logical),
        )?;

        if let Some(budget) = planning_budget {
            if planning_start.elapsed() > budget {
                return Err(SearchError::TimedOut {
                    timeout_ms: budget.as_millis() as u64,
                });
            }
        }

        let fragment = Arc::new(physical.fragment(
            table.version,
            request.from + request.size,
            |size| self.config.aggregation.terms_shard_size(size),
        )?);

        let total_shards = targets.len();
        let outcome = self.dispatcher.dispatch(fragment, targets, &deadline).await;
        for failure in &outcome.failures {
            self.metrics.record_shard_failure(failure.kind);
        }

        if outcome.successes.is_empty() {
            let reasons: Vec<String> = outcome
                .failures
                .iter()
                .map(|f| format!("shard {}: {}", f.shard, f.reason))
                .collect();
            return Err(SearchError::ServiceUnavailable {
                message: format!("all {total_shards} shards failed: {}", reasons.join("; ")),
            });
        }

        let response = merge::merge(
            outcome,
            &MergeSpec {
                from: request.from,
                size: request.size,
                sort: &request.sort,
                aggs: &request.aggs,
                source: &request.source,
                total_shards,
                timed_out: deadline.is_exceeded(),
                took_ms: deadline.elapsed().as_millis() as u64,
            },
        )?;

        let mut body = serde_json::to_value(&response)
            .map_err(|err| SearchError::internal(err.to_string()))?;

        // Result pipeline rewrites the merged response before it returns.
        if let Some(pipeline) = &metadata.pipelines.result {
            if let Value::Object(map) = body {
                body = Value::Object(self.run_named_pipeline(pipeline, map));
            }
        }
        Ok(body)
    }

    /// Run a pipeline by name with pass-through semantics; an unregistered
    /// name degrades the same way a failing stage does.
    fn run_named_pipeline(&self, name: &str, input: Document) -> Document {
        match self.pipelines.get(name) {
            Some(pipeline) => pipeline.run(input, &self.metrics),
            None => {
                warn!(pipeline = name, "associated_pipeline_missing");
                self.metrics
                    .pipeline_failures
                    .fetch_add(1, Ordering::Relaxed);
                input
            }
        }
    }

    // Pipelines

    pub fn put_pipeline(&self, name: &str, def: &PipelineDef) -> Result<PipelineInfo> {
        let pipeline = self.pipelines.register(name, def)?;
        info!(pipeline = name, version = pipeline.version, "pipeline_registered");
        Ok(PipelineInfo::from(pipeline.as_ref()))
    }

    pub fn get_pipeline(&self, name: &str) -> Result<Arc<Pipeline>> {
        self.pipelines
            .get(name)
            .ok_or_else(|| SearchError::PipelineNotFound {
                name: name.to_string(),
            })
    }

    pub fn delete_pipeline(&self, name: &str) -> Result<()> {
        if self.pipelines.remove(name) {
            Ok(())
        } else {
            Err(SearchError::PipelineNotFound {
                name: name.to_string(),
            })
        }
    }

    /// Test-execute a pipeline against an inline document; stage errors
    /// surface instead of degrading.
    pub fn execute_pipeline(&self, name: &str, document: Document) -> Result<Document> {
        self.get_pipeline(name)?.run_strict(document)
    }

    // Diagnostics

    pub fn cluster_health(&self) -> ClusterHealth {
        self.cluster.health()
    }

    pub fn cluster_state(&self) -> ClusterStateSnapshot {
        self.cluster.state_snapshot()
    }
}

/// Shard owning a document id: `crc32(id) mod shards`.
pub fn route_document(id: &str, shards: u32) -> ShardId {
    crc32fast::hash(id.as_bytes()) % shards
}

fn duration_from_millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

fn validate_index_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(SearchError::bad_request("index", "index name is empty"));
    }
    if name.starts_with('_') {
        return Err(SearchError::bad_request(
            "index",
            "index names starting with '_' are reserved",
        ));
    }
    if name.contains('/') || name.contains(' ') {
        return Err(SearchError::bad_request(
            "index",
            "index name must not contain '/' or spaces",
        ));
    }
    Ok(())
}
