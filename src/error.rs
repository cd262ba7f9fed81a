//! Error types for the search coordinator.
//!
//! Query-side errors (`BadRequest`, `NotImplemented`, `PlanningFailed`) fail
//! fast before any shard RPC. Execution-side errors are aggregated into the
//! response's shard tallies; only a fully failed fan-out surfaces as
//! `ServiceUnavailable`.

use serde::{Deserialize, Serialize};

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, SearchError>;

/// Classification of a single failed shard subrequest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardErrorKind {
    /// No live route to the node assigned to the shard.
    ClientNotFound,
    /// The node was routable but the transport failed or timed out.
    ConnectionFailed,
    /// The node executed the subrequest and reported an error.
    SearchFailed,
}

impl std::fmt::Display for ShardErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShardErrorKind::ClientNotFound => write!(f, "client_not_found"),
            ShardErrorKind::ConnectionFailed => write!(f, "connection_failed"),
            ShardErrorKind::SearchFailed => write!(f, "search_failed"),
        }
    }
}

/// Coordinator error type.
#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
pub enum SearchError {
    // Request errors
    /// Malformed DSL, unknown fields, type mismatches. Never retried.
    #[error("bad request at '{path}': {message}")]
    BadRequest { path: String, message: String },

    /// Recognized but unsupported feature. Reported, not retried.
    #[error("not implemented: {feature}")]
    NotImplemented { feature: String },

    // Planning errors
    /// Optimizer cap exceeded or plan invariant violation.
    #[error("planning failed: {message}")]
    PlanningFailed { message: String },

    // Catalog errors
    /// Index not found
    #[error("index not found: {index}")]
    IndexNotFound { index: String },

    /// Index already exists
    #[error("index already exists: {index}")]
    IndexExists { index: String },

    /// Document not found
    #[error("document '{id}' not found in index '{index}'")]
    DocumentNotFound { index: String, id: String },

    /// Pipeline not found
    #[error("pipeline not found: {name}")]
    PipelineNotFound { name: String },

    // Execution errors
    /// Routing table empty or stale for the index, even after one refresh.
    #[error("no routable shards for index '{index}'")]
    RoutingUnavailable { index: String },

    /// A single shard subrequest failed. Raised by node clients; the
    /// dispatcher folds these into shard tallies instead of propagating.
    #[error("shard {shard} on node '{node}' failed ({kind}): {message}")]
    ShardFailure {
        shard: u32,
        node: String,
        kind: ShardErrorKind,
        message: String,
    },

    /// Overall request deadline reached.
    #[error("request timed out after {timeout_ms}ms")]
    TimedOut { timeout_ms: u64 },

    /// Every shard subrequest failed.
    #[error("search unavailable: {message}")]
    ServiceUnavailable { message: String },

    // Pipeline errors
    /// Stage error or pipeline timeout. On search and index paths this is
    /// downgraded to a warning with pass-through semantics.
    #[error("pipeline '{pipeline}' failed at stage '{stage}': {message}")]
    PipelineFailed {
        pipeline: String,
        stage: String,
        message: String,
    },

    /// Unexpected internal error
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl SearchError {
    /// Helper for path-qualified request errors.
    pub fn bad_request(path: impl Into<String>, message: impl Into<String>) -> Self {
        SearchError::BadRequest {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        SearchError::Internal {
            message: message.into(),
        }
    }

    /// True for errors that must fail the request before any RPC is issued.
    pub fn is_query_side(&self) -> bool {
        matches!(
            self,
            SearchError::BadRequest { .. }
                | SearchError::NotImplemented { .. }
                | SearchError::PlanningFailed { .. }
        )
    }
}
