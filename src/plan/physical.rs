//! Physical plans and shard fragments.
//!
//! Lowering is one-to-one: each logical node becomes a physical operator
//! annotated with its execution strategy. The distributed part of the plan
//! is then flattened into a [`ShardFragment`], the serializable unit shipped
//! to every target shard. Fetch depth (`from + size`) is injected at
//! dispatch time so cached plans stay valid across paginations.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::cost::CostModel;
use crate::dsl::{AggSpec, SortKey};
use crate::error::{Result, SearchError};
use crate::plan::expr::Expr;
use crate::plan::LogicalPlan;

/// Physical operator tree. Isomorphic to the logical plan, with strategy
/// choices resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PhysicalPlan {
    ShardScan {
        index: String,
        filter: Expr,
        limit_hint: Option<usize>,
        projected: Option<Vec<String>>,
    },
    FilterExec {
        predicate: Expr,
        input: Box<PhysicalPlan>,
    },
    ProjectExec {
        fields: Vec<String>,
        input: Box<PhysicalPlan>,
    },
    /// Hash-table grouping; chosen above the cardinality threshold.
    HashAggregateExec {
        aggs: BTreeMap<String, AggSpec>,
        input: Box<PhysicalPlan>,
    },
    /// Sort-based grouping for small inputs.
    SortAggregateExec {
        aggs: BTreeMap<String, AggSpec>,
        input: Box<PhysicalPlan>,
    },
    SortExec {
        keys: Vec<SortKey>,
        input: Box<PhysicalPlan>,
    },
    LimitExec {
        offset: usize,
        size: usize,
        input: Box<PhysicalPlan>,
    },
    /// Bounded min-heap of `limit` rows.
    TopNExec {
        limit: usize,
        keys: Vec<SortKey>,
        input: Box<PhysicalPlan>,
    },
}

/// Lowers optimized logical plans into physical plans.
#[derive(Debug, Clone)]
pub struct PhysicalPlanner {
    cost_model: CostModel,
}

impl PhysicalPlanner {
    pub fn new(cost_model: CostModel) -> Self {
        PhysicalPlanner { cost_model }
    }

    pub fn plan(&self, logical: &LogicalPlan) -> Result<PhysicalPlan> {
        Ok(match logical {
            LogicalPlan::Scan {
                index,
                filter,
                limit_hint,
                projected,
            } => PhysicalPlan::ShardScan {
                index: index.clone(),
                filter: filter.clone(),
                limit_hint: *limit_hint,
                projected: projected.clone(),
            },
            LogicalPlan::Filter { predicate, input } => PhysicalPlan::FilterExec {
                predicate: predicate.clone(),
                input: Box::new(self.plan(input)?),
            },
            LogicalPlan::Project { fields, input } => PhysicalPlan::ProjectExec {
                fields: fields.clone(),
                input: Box::new(self.plan(input)?),
            },
            LogicalPlan::Aggregate { aggs, input } => {
                let input_rows = self.cost_model.estimate_rows(input);
                let physical_input = Box::new(self.plan(input)?);
                if input_rows > self.cost_model.hash_aggregate_threshold {
                    PhysicalPlan::HashAggregateExec {
                        aggs: aggs.clone(),
                        input: physical_input,
                    }
                } else {
                    PhysicalPlan::SortAggregateExec {
                        aggs: aggs.clone(),
                        input: physical_input,
                    }
                }
            }
            LogicalPlan::Sort { keys, input } => PhysicalPlan::SortExec {
                keys: keys.clone(),
                input: Box::new(self.plan(input)?),
            },
            LogicalPlan::Limit {
                offset,
                size,
                input,
            } => PhysicalPlan::LimitExec {
                offset: *offset,
                size: *size,
                input: Box::new(self.plan(input)?),
            },
            LogicalPlan::TopN { limit, keys, input } => PhysicalPlan::TopNExec {
                limit: *limit,
                keys: keys.clone(),
                input: Box::new(self.plan(input)?),
            },
        })
    }
}

impl PhysicalPlan {
    pub fn input(&self) -> Option<&PhysicalPlan> {
        match self {
            PhysicalPlan::ShardScan { .. } => None,
            PhysicalPlan::FilterExec { input, .. }
            | PhysicalPlan::ProjectExec { input, .. }
            | PhysicalPlan::HashAggregateExec { input, .. }
            | PhysicalPlan::SortAggregateExec { input, .. }
            | PhysicalPlan::SortExec { input, .. }
            | PhysicalPlan::LimitExec { input, .. }
            | PhysicalPlan::TopNExec { input, .. } => Some(input),
        }
    }

    /// Stable in-process hash of the physical plan structure.
    pub fn fingerprint(&self) -> u64 {
        use std::hash::{Hash, Hasher};
        let canonical =
            serde_json::to_string(self).unwrap_or_else(|_| format!("{self:?}"));
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        canonical.hash(&mut hasher);
        hasher.finish()
    }

    /// Flatten the shard-local part of the plan into a fragment.
    ///
    /// `fetch` is the per-shard hit depth (`from + size` of the request at
    /// hand, not the placeholder baked into the cached plan).
    pub fn fragment(
        &self,
        routing_version: u64,
        fetch: usize,
        terms_shard_size: impl Fn(usize) -> usize,
    ) -> Result<ShardFragment> {
        let mut fragment = ShardFragment {
            index: String::new(),
            routing_version,
            filter: Expr::True,
            sort: Vec::new(),
            fetch,
            aggs: BTreeMap::new(),
            terms_shard_size: 0,
            limit_hint: None,
            projected: None,
        };
        self.collect_into(&mut fragment)?;
        if fragment.index.is_empty() {
            return Err(SearchError::PlanningFailed {
                message: "physical plan has no scan operator".to_string(),
            });
        }

        // Each shard returns extra terms buckets so the merged top-size
        // stays accurate under skew.
        let max_terms_size = fragment
            .aggs
            .values()
            .filter_map(|spec| match spec {
                AggSpec::Terms { size, .. } => Some(*size),
                _ => None,
            })
            .max();
        if let Some(size) = max_terms_size {
            fragment.terms_shard_size = terms_shard_size(size);
        }

        Ok(fragment)
    }

    fn collect_into(&self, fragment: &mut ShardFragment) -> Result<()> {
        match self {
            PhysicalPlan::ShardScan {
                index,
                filter,
                limit_hint,
                projected,
            } => {
                fragment.index = index.clone();
                fragment.filter = filter.clone();
                fragment.limit_hint = *limit_hint;
                fragment.projected = projected.clone();
            }
            PhysicalPlan::FilterExec { predicate, input } => {
                input.collect_into(fragment)?;
                fragment.filter = Expr::and(fragment.filter.clone(), predicate.clone());
            }
            PhysicalPlan::ProjectExec { input, .. } => {
                // Source shaping happens coordinator-side after the merge.
                input.collect_into(fragment)?;
            }
            PhysicalPlan::HashAggregateExec { aggs, input }
            | PhysicalPlan::SortAggregateExec { aggs, input } => {
                input.collect_into(fragment)?;
                fragment.aggs = aggs.clone();
            }
            PhysicalPlan::SortExec { keys, input } => {
                input.collect_into(fragment)?;
                fragment.sort = keys.clone();
            }
            PhysicalPlan::LimitExec { input, .. } => {
                input.collect_into(fragment)?;
            }
            PhysicalPlan::TopNExec { keys, input, .. } => {
                input.collect_into(fragment)?;
                fragment.sort = keys.clone();
            }
        }
        Ok(())
    }
}

/// The shard-local execution request: the serializable plan fragment sent
/// with every per-shard subrequest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardFragment {
    pub index: String,
    /// Routing table version the coordinator planned against. Every shard
    /// subrequest of one search carries the same version.
    pub routing_version: u64,
    pub filter: Expr,
    pub sort: Vec<SortKey>,
    /// Hits each shard returns, pre-sorted: `from + size`.
    pub fetch: usize,
    pub aggs: BTreeMap<String, AggSpec>,
    /// Terms buckets each shard returns (0 when no terms aggregation).
    pub terms_shard_size: usize,
    /// Advisory scan cap pushed down by the optimizer.
    pub limit_hint: Option<usize>,
    /// Fields pushed into the scan, when projection pushdown applies.
    pub projected: Option<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::SortOrder;
    use serde_json::json;

    fn scan(filter: Expr) -> LogicalPlan {
        LogicalPlan::Scan {
            index: "products".to_string(),
            filter,
            limit_hint: None,
            projected: None,
        }
    }

    fn term_filter() -> Expr {
        Expr::Term {
            field: "title".to_string(),
            value: json!("laptop"),
        }
    }

    #[test]
    fn test_small_input_uses_sort_aggregate() {
        // term selectivity 0.1 over 10k default rows = 1000, at the threshold
        let logical = LogicalPlan::Aggregate {
            aggs: BTreeMap::new(),
            input: Box::new(scan(term_filter())),
        };
        let planner = PhysicalPlanner::new(CostModel::default());
        let physical = planner.plan(&logical).expect("plan");
        assert!(matches!(physical, PhysicalPlan::SortAggregateExec { .. }));
    }

    #[test]
    fn test_large_input_uses_hash_aggregate() {
        let logical = LogicalPlan::Aggregate {
            aggs: BTreeMap::new(),
            input: Box::new(scan(Expr::True)),
        };
        let planner = PhysicalPlanner::new(CostModel::default());
        let physical = planner.plan(&logical).expect("plan");
        assert!(matches!(physical, PhysicalPlan::HashAggregateExec { .. }));
    }

    #[test]
    fn test_fragment_collects_scan_sort_and_aggs() {
        let mut aggs = BTreeMap::new();
        aggs.insert(
            "by_cat".to_string(),
            AggSpec::Terms {
                field: "category".to_string(),
                size: 2,
            },
        );
        let logical = LogicalPlan::TopN {
            limit: 10,
            keys: vec![SortKey {
                field: "price".to_string(),
                order: SortOrder::Desc,
            }],
            input: Box::new(LogicalPlan::Aggregate {
                aggs,
                input: Box::new(scan(term_filter())),
            }),
        };
        let planner = PhysicalPlanner::new(CostModel::default());
        let physical = planner.plan(&logical).expect("plan");

        let fragment = physical
            .fragment(7, 10, |size| size * 3 / 2 + 10)
            .expect("fragment");
        assert_eq!(fragment.index, "products");
        assert_eq!(fragment.routing_version, 7);
        assert_eq!(fragment.fetch, 10);
        assert_eq!(fragment.filter, term_filter());
        assert_eq!(fragment.sort.len(), 1);
        assert_eq!(fragment.terms_shard_size, 13);
        assert!(fragment.aggs.contains_key("by_cat"));
    }

    #[test]
    fn test_fragment_roundtrips_through_json() {
        let physical = PhysicalPlan::ShardScan {
            index: "products".to_string(),
            filter: term_filter(),
            limit_hint: Some(10),
            projected: None,
        };
        let fragment = physical.fragment(1, 10, |s| s).expect("fragment");
        let json = serde_json::to_string(&fragment).expect("serialize");
        let back: ShardFragment = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, fragment);
    }
}
