//! Logical query plans.
//!
//! A logical plan is a strategy-agnostic tree of typed nodes. The converter
//! produces the canonical shape `Limit(Sort(Project(Aggregate(Filter(Scan)))))`
//! with optional stages omitted; the rule optimizer then rewrites it. Plan
//! nodes are a closed sum type so rewrites, hashing, and fragment
//! serialization all stay match-based and deterministic.

pub mod builder;
pub mod expr;
pub mod physical;

use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::dsl::{AggSpec, SortKey};
use expr::Expr;

/// Logical plan node. Children are boxed; the tree is small and rewritten
/// structurally by the optimizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LogicalPlan {
    /// Leaf: scan the shards of one index. Carries any pushed-down filter,
    /// an advisory row cap, and pushed-down projected fields.
    Scan {
        index: String,
        filter: Expr,
        limit_hint: Option<usize>,
        projected: Option<Vec<String>>,
    },
    Filter {
        predicate: Expr,
        input: Box<LogicalPlan>,
    },
    Project {
        fields: Vec<String>,
        input: Box<LogicalPlan>,
    },
    Aggregate {
        aggs: BTreeMap<String, AggSpec>,
        input: Box<LogicalPlan>,
    },
    Sort {
        keys: Vec<SortKey>,
        input: Box<LogicalPlan>,
    },
    Limit {
        offset: usize,
        size: usize,
        input: Box<LogicalPlan>,
    },
    /// Fused sort-then-limit maintaining a bounded heap of `limit` rows.
    TopN {
        limit: usize,
        keys: Vec<SortKey>,
        input: Box<LogicalPlan>,
    },
}

/// Output schema of a plan node: every source field, or a named subset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schema {
    All,
    Fields(Vec<String>),
}

impl LogicalPlan {
    pub fn is_scan(&self) -> bool {
        matches!(self, LogicalPlan::Scan { .. })
    }

    pub fn is_top_n(&self) -> bool {
        matches!(self, LogicalPlan::TopN { .. })
    }

    /// The node's single input, if it has one.
    pub fn input(&self) -> Option<&LogicalPlan> {
        match self {
            LogicalPlan::Scan { .. } => None,
            LogicalPlan::Filter { input, .. }
            | LogicalPlan::Project { input, .. }
            | LogicalPlan::Aggregate { input, .. }
            | LogicalPlan::Sort { input, .. }
            | LogicalPlan::Limit { input, .. }
            | LogicalPlan::TopN { input, .. } => Some(input),
        }
    }

    /// Name of the index this plan reads. Plans are single-index trees.
    pub fn index(&self) -> &str {
        match self {
            LogicalPlan::Scan { index, .. } => index,
            other => other.input().map(LogicalPlan::index).unwrap_or(""),
        }
    }

    /// Output schema, a pure function of the operator and child schemas.
    pub fn output_schema(&self) -> Schema {
        match self {
            LogicalPlan::Scan { projected, .. } => match projected {
                Some(fields) => Schema::Fields(fields.clone()),
                None => Schema::All,
            },
            LogicalPlan::Project { fields, .. } => Schema::Fields(fields.clone()),
            LogicalPlan::Aggregate { aggs, .. } => {
                Schema::Fields(aggs.keys().cloned().collect())
            }
            LogicalPlan::Filter { input, .. }
            | LogicalPlan::Sort { input, .. }
            | LogicalPlan::Limit { input, .. }
            | LogicalPlan::TopN { input, .. } => input.output_schema(),
        }
    }

    /// Aggregations anywhere in the tree, if any.
    pub fn aggregations(&self) -> Option<&BTreeMap<String, AggSpec>> {
        match self {
            LogicalPlan::Aggregate { aggs, .. } => Some(aggs),
            LogicalPlan::Scan { .. } => None,
            other => other.input().and_then(LogicalPlan::aggregations),
        }
    }

    /// Sort keys anywhere in the tree (Sort or fused TopN).
    pub fn sort_keys(&self) -> Option<&[SortKey]> {
        match self {
            LogicalPlan::Sort { keys, .. } | LogicalPlan::TopN { keys, .. } => Some(keys),
            LogicalPlan::Scan { .. } => None,
            other => other.input().and_then(LogicalPlan::sort_keys),
        }
    }

    /// The scan at the bottom of the tree.
    pub fn scan(&self) -> &LogicalPlan {
        match self {
            LogicalPlan::Scan { .. } => self,
            other => other
                .input()
                .map(LogicalPlan::scan)
                .unwrap_or(self),
        }
    }

    /// Stable in-process hash of the plan structure.
    pub fn fingerprint(&self) -> u64 {
        let canonical =
            serde_json::to_string(self).unwrap_or_else(|_| format!("{self:?}"));
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        canonical.hash(&mut hasher);
        hasher.finish()
    }
}
