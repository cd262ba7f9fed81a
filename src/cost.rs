//! Cost model for plan nodes.
//!
//! Supplies default leaf selectivities, cardinality estimation for logical
//! plans, and a weighted row cost used by the physical planner to pick
//! operator strategies. There is no join ordering; the model only has to
//! rank alternatives for a single pipeline of operators.

use crate::plan::LogicalPlan;

// Default leaf selectivities
pub const SELECTIVITY_TERM: f64 = 0.1;
pub const SELECTIVITY_RANGE: f64 = 0.3;
pub const SELECTIVITY_PREFIX: f64 = 0.2;
pub const SELECTIVITY_MATCH: f64 = 0.15;
pub const SELECTIVITY_EXISTS: f64 = 0.8;
pub const SELECTIVITY_MATCH_ALL: f64 = 1.0;

/// Per-row cost weights for the four resource dimensions.
#[derive(Debug, Clone, Copy)]
pub struct CostWeights {
    pub cpu: f64,
    pub io: f64,
    pub network: f64,
    pub memory: f64,
}

impl Default for CostWeights {
    fn default() -> Self {
        CostWeights {
            cpu: 1.0,
            io: 4.0,
            network: 8.0,
            memory: 2.0,
        }
    }
}

/// Resource usage of one plan node, in rows touched per dimension.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResourceRows {
    pub cpu: f64,
    pub io: f64,
    pub network: f64,
    pub memory: f64,
}

/// Cardinality and cost estimation over logical plans.
#[derive(Debug, Clone)]
pub struct CostModel {
    /// Bumped whenever estimation logic or constants change; part of the
    /// physical plan cache key.
    pub version: u32,
    pub weights: CostWeights,
    /// Assumed index size when no statistics are available.
    pub default_cardinality: u64,
    /// Estimated input rows above which aggregation switches to hashing.
    pub hash_aggregate_threshold: u64,
}

pub const COST_MODEL_VERSION: u32 = 1;

impl Default for CostModel {
    fn default() -> Self {
        CostModel {
            version: COST_MODEL_VERSION,
            weights: CostWeights::default(),
            default_cardinality: 10_000,
            hash_aggregate_threshold: 1_000,
        }
    }
}

impl CostModel {
    /// Estimated output row count of a plan node.
    pub fn estimate_rows(&self, plan: &LogicalPlan) -> u64 {
        match plan {
            LogicalPlan::Scan { filter, limit_hint, .. } => {
                let rows =
                    (self.default_cardinality as f64 * filter.selectivity()).ceil() as u64;
                match limit_hint {
                    Some(hint) => rows.min(*hint as u64),
                    None => rows,
                }
            }
            LogicalPlan::Filter { predicate, input } => {
                (self.estimate_rows(input) as f64 * predicate.selectivity()).ceil() as u64
            }
            LogicalPlan::Project { input, .. } | LogicalPlan::Sort { input, .. } => {
                self.estimate_rows(input)
            }
            // One output row per aggregation; buckets are bounded separately.
            LogicalPlan::Aggregate { aggs, input } => {
                (aggs.len() as u64).min(self.estimate_rows(input)).max(1)
            }
            LogicalPlan::Limit { offset, size, input } => {
                self.estimate_rows(input).min((offset + size) as u64)
            }
            LogicalPlan::TopN { limit, input, .. } => {
                self.estimate_rows(input).min(*limit as u64)
            }
        }
    }

    /// Weighted cost of the whole plan, child-inclusive.
    pub fn cost(&self, plan: &LogicalPlan) -> f64 {
        let rows = self.estimate_rows(plan) as f64;
        let own = match plan {
            LogicalPlan::Scan { .. } => ResourceRows {
                cpu: rows,
                io: rows,
                network: rows,
                memory: 0.0,
            },
            LogicalPlan::Filter { input, .. } => ResourceRows {
                cpu: self.estimate_rows(input) as f64,
                ..ResourceRows::default()
            },
            LogicalPlan::Project { .. } => ResourceRows {
                cpu: rows,
                ..ResourceRows::default()
            },
            LogicalPlan::Aggregate { input, .. } => {
                let input_rows = self.estimate_rows(input) as f64;
                ResourceRows {
                    cpu: input_rows,
                    memory: input_rows,
                    ..ResourceRows::default()
                }
            }
            LogicalPlan::Sort { input, .. } => {
                let input_rows = self.estimate_rows(input) as f64;
                // n log n comparison work, everything resident
                ResourceRows {
                    cpu: input_rows * input_rows.max(2.0).log2(),
                    memory: input_rows,
                    ..ResourceRows::default()
                }
            }
            LogicalPlan::Limit { .. } => ResourceRows::default(),
            LogicalPlan::TopN { limit, input, .. } => {
                let input_rows = self.estimate_rows(input) as f64;
                ResourceRows {
                    cpu: input_rows * (*limit as f64).max(2.0).log2(),
                    memory: *limit as f64,
                    ..ResourceRows::default()
                }
            }
        };

        let own_cost = own.cpu * self.weights.cpu
            + own.io * self.weights.io
            + own.network * self.weights.network
            + own.memory * self.weights.memory;

        own_cost
            + match plan {
                LogicalPlan::Scan { .. } => 0.0,
                LogicalPlan::Filter { input, .. }
                | LogicalPlan::Project { input, .. }
                | LogicalPlan::Aggregate { input, .. }
                | LogicalPlan::Sort { input, .. }
                | LogicalPlan::Limit { input, .. }
                | LogicalPlan::TopN { input, .. } => self.cost(input),
            }
    }
}
