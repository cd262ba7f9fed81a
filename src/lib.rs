//! # Searchd
//!
//! Distributed query coordinator for a sharded full-text search engine.
//! A client submits a search against a named logical index; the coordinator
//! plans it, fans it out to every started primary shard, and merges the
//! per-shard results into a response indistinguishable from a single-node
//! execution over the union of shards.
//!
//! ## Request Pipeline
//!
//! ```text
//! JSON DSL body
//!     ↓
//! [Parser]             → SearchRequest AST
//!     ↓
//! [Query Pipeline]     → rewritten request (optional)
//!     ↓
//! [Converter]          → canonical logical plan
//!     ↓
//! [Plan Cache] ──miss→ [Rule Optimizer] → [Physical Planner] → store
//!     ↓
//! [Shard Dispatcher]   → parallel per-shard subrequests
//!     ↓
//! [Result Merger]      → top-K merge + aggregation reduction
//!     ↓
//! [Result Pipeline]    → rewritten response (optional)
//! ```
//!
//! ## Module Organization
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `dsl` | JSON query DSL → typed AST |
//! | `plan` | Logical plans, expressions, physical lowering |
//! | `optimizer` | Priority-ordered rewrite rules to fixpoint |
//! | `cost` | Selectivity and cardinality estimation |
//! | `execution` | Deadlines, plan cache, dispatcher, merger |
//! | `aggregation` | Partial→final reduction kernels |
//! | `pipeline` | Query/document/result transformation chains |
//! | `cluster` | Control-plane state, routing table, routing client |
//! | `node` | Data-node contract, shard engine, local/remote clients |
//! | `coordinator` | End-to-end orchestration |
//! | `rest` | Client REST surface + internal node routes |

pub mod aggregation;
pub mod cluster;
pub mod config;
pub mod coordinator;
pub mod cost;
pub mod dsl;
pub mod error;
pub mod execution;
pub mod metrics;
pub mod node;
pub mod optimizer;
pub mod pipeline;
pub mod plan;
pub mod rest;

// Re-export the types most callers need
pub use cluster::{IndexMetadata, PipelineAssociations, RoutingTable, ShardId, ShardState};
pub use config::Config;
pub use coordinator::SearchCoordinator;
pub use dsl::{AggSpec, Query, SearchRequest, SortKey, SortOrder, SourceSpec};
pub use error::{Result, SearchError, ShardErrorKind};
pub use execution::{Deadline, PlanCache, SearchResponse};
pub use metrics::Metrics;
pub use node::{DataNode, Document, ShardHit, ShardSearchResponse};
pub use optimizer::Optimizer;
pub use plan::builder::PlanBuilder;
pub use plan::physical::{PhysicalPlan, PhysicalPlanner, ShardFragment};
pub use plan::LogicalPlan;
