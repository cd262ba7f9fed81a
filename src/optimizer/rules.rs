//! The rewrite rule set.
//!
//! Every rule must be idempotent on its own output: once fired on a shape it
//! either removes that shape or leaves a guard (a scan hint, a fused node)
//! that stops it from matching again. ProjectionPushdown violates this and
//! stays unregistered until it carries a pushed marker; see
//! [`ProjectionPushdown`].

use crate::optimizer::rewrite_topdown;
use crate::plan::expr::Expr;
use crate::plan::LogicalPlan;

/// A single rewrite rule. Higher priority fires first within a pass.
pub trait OptimizerRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn priority(&self) -> u32;
    /// Rewrite the tree anywhere, or None when the rule does not match.
    fn apply(&self, plan: &LogicalPlan) -> Option<LogicalPlan>;
}

/// The registered rule set, in registration order.
pub fn default_rules() -> Vec<Box<dyn OptimizerRule>> {
    vec![
        Box::new(FilterPushdown),
        Box::new(TopNOptimization),
        Box::new(LimitPushdown),
        Box::new(PredicatePushdownForAggregations),
        Box::new(RedundantFilterElimination),
        Box::new(ProjectionMerging),
    ]
}

/// `Filter(pred, Scan)` -> `Scan` with the predicate conjoined into the scan
/// filter. Moves the work shard-side and removes the Filter node.
pub struct FilterPushdown;

impl OptimizerRule for FilterPushdown {
    fn name(&self) -> &'static str {
        "FilterPushdown"
    }

    fn priority(&self) -> u32 {
        95
    }

    fn apply(&self, plan: &LogicalPlan) -> Option<LogicalPlan> {
        rewrite_topdown(plan, &|node| match node {
            LogicalPlan::Filter { predicate, input } if !predicate.is_true() => {
                let LogicalPlan::Scan {
                    index,
                    filter,
                    limit_hint,
                    projected,
                } = input.as_ref()
                else {
                    return None;
                };
                Some(LogicalPlan::Scan {
                    index: index.clone(),
                    filter: Expr::and(filter.clone(), predicate.clone()),
                    limit_hint: *limit_hint,
                    projected: projected.clone(),
                })
            }
            _ => None,
        })
    }
}

/// `Limit(offset, size, Sort(keys, x))` -> `TopN(offset + size, keys, x)`.
///
/// The merged response still slices `[from, from + size)`; the fused node
/// only bounds how many rows each side of the merge has to hold.
pub struct TopNOptimization;

impl OptimizerRule for TopNOptimization {
    fn name(&self) -> &'static str {
        "TopNOptimization"
    }

    fn priority(&self) -> u32 {
        85
    }

    fn apply(&self, plan: &LogicalPlan) -> Option<LogicalPlan> {
        rewrite_topdown(plan, &|node| {
            let LogicalPlan::Limit {
                offset,
                size,
                input,
            } = node
            else {
                return None;
            };
            let LogicalPlan::Sort { keys, input } = input.as_ref() else {
                return None;
            };
            Some(LogicalPlan::TopN {
                limit: offset + size,
                keys: keys.clone(),
                input: input.clone(),
            })
        })
    }
}

/// Push `Limit` into `Scan` as an advisory row cap when nothing between the
/// two reorders or aggregates rows.
pub struct LimitPushdown;

impl OptimizerRule for LimitPushdown {
    fn name(&self) -> &'static str {
        "LimitPushdown"
    }

    fn priority(&self) -> u32 {
        75
    }

    fn apply(&self, plan: &LogicalPlan) -> Option<LogicalPlan> {
        rewrite_topdown(plan, &|node| {
            let LogicalPlan::Limit {
                offset,
                size,
                input,
            } = node
            else {
                return None;
            };
            let cap = offset + size;
            if !hintable(input) {
                return None;
            }
            let hinted = set_scan_hint(input, cap)?;
            Some(LogicalPlan::Limit {
                offset: *offset,
                size: *size,
                input: Box::new(hinted),
            })
        })
    }
}

/// True when the chain down to the scan preserves row order and count
/// semantics (only Filter/Project between Limit and Scan).
fn hintable(plan: &LogicalPlan) -> bool {
    match plan {
        LogicalPlan::Scan { .. } => true,
        LogicalPlan::Filter { input, .. } | LogicalPlan::Project { input, .. } => hintable(input),
        _ => false,
    }
}

/// Set the scan's advisory cap, returning None when it is already set (the
/// guard that keeps the rule idempotent).
fn set_scan_hint(plan: &LogicalPlan, cap: usize) -> Option<LogicalPlan> {
    match plan {
        LogicalPlan::Scan {
            index,
            filter,
            limit_hint,
            projected,
        } => {
            if *limit_hint == Some(cap) {
                return None;
            }
            Some(LogicalPlan::Scan {
                index: index.clone(),
                filter: filter.clone(),
                limit_hint: Some(cap),
                projected: projected.clone(),
            })
        }
        LogicalPlan::Filter { predicate, input } => Some(LogicalPlan::Filter {
            predicate: predicate.clone(),
            input: Box::new(set_scan_hint(input, cap)?),
        }),
        LogicalPlan::Project { fields, input } => Some(LogicalPlan::Project {
            fields: fields.clone(),
            input: Box::new(set_scan_hint(input, cap)?),
        }),
        _ => None,
    }
}

/// `Filter(pred, Aggregate(aggs, x))` -> `Aggregate(aggs, Filter(pred, x))`.
pub struct PredicatePushdownForAggregations;

impl OptimizerRule for PredicatePushdownForAggregations {
    fn name(&self) -> &'static str {
        "PredicatePushdownForAggregations"
    }

    fn priority(&self) -> u32 {
        75
    }

    fn apply(&self, plan: &LogicalPlan) -> Option<LogicalPlan> {
        rewrite_topdown(plan, &|node| {
            let LogicalPlan::Filter { predicate, input } = node else {
                return None;
            };
            let LogicalPlan::Aggregate { aggs, input } = input.as_ref() else {
                return None;
            };
            Some(LogicalPlan::Aggregate {
                aggs: aggs.clone(),
                input: Box::new(LogicalPlan::Filter {
                    predicate: predicate.clone(),
                    input: input.clone(),
                }),
            })
        })
    }
}

/// Drop filters proven tautological.
pub struct RedundantFilterElimination;

impl OptimizerRule for RedundantFilterElimination {
    fn name(&self) -> &'static str {
        "RedundantFilterElimination"
    }

    fn priority(&self) -> u32 {
        70
    }

    fn apply(&self, plan: &LogicalPlan) -> Option<LogicalPlan> {
        rewrite_topdown(plan, &|node| {
            let LogicalPlan::Filter { predicate, input } = node else {
                return None;
            };
            if predicate.is_true() {
                Some(input.as_ref().clone())
            } else {
                None
            }
        })
    }
}

/// Collapse adjacent `Project` layers. The outer layer runs last, so the
/// merged field list is the outer one restricted to fields the inner layer
/// kept.
pub struct ProjectionMerging;

impl OptimizerRule for ProjectionMerging {
    fn name(&self) -> &'static str {
        "ProjectionMerging"
    }

    fn priority(&self) -> u32 {
        60
    }

    fn apply(&self, plan: &LogicalPlan) -> Option<LogicalPlan> {
        rewrite_topdown(plan, &|node| {
            let LogicalPlan::Project {
                fields: outer,
                input,
            } = node
            else {
                return None;
            };
            let LogicalPlan::Project {
                fields: inner,
                input,
            } = input.as_ref()
            else {
                return None;
            };
            let merged: Vec<String> = outer
                .iter()
                .filter(|field| inner.contains(field))
                .cloned()
                .collect();
            Some(LogicalPlan::Project {
                fields: merged,
                input: input.clone(),
            })
        })
    }
}

/// `Project(fields, Scan)` -> `Project(fields, Scan{projected: fields})`.
///
/// NOT REGISTERED: the output still matches the rule's own left-hand side,
/// so it refires forever. Registering it requires a pushed marker on the
/// Project node (or retiring the Project layer into the Scan outright).
/// Kept here so the intended rewrite and its guard condition stay visible.
pub struct ProjectionPushdown;

impl OptimizerRule for ProjectionPushdown {
    fn name(&self) -> &'static str {
        "ProjectionPushdown"
    }

    fn priority(&self) -> u32 {
        65
    }

    fn apply(&self, plan: &LogicalPlan) -> Option<LogicalPlan> {
        rewrite_topdown(plan, &|node| {
            let LogicalPlan::Project { fields, input } = node else {
                return None;
            };
            let LogicalPlan::Scan {
                index,
                filter,
                limit_hint,
                ..
            } = input.as_ref()
            else {
                return None;
            };
            Some(LogicalPlan::Project {
                fields: fields.clone(),
                input: Box::new(LogicalPlan::Scan {
                    index: index.clone(),
                    filter: filter.clone(),
                    limit_hint: *limit_hint,
                    projected: Some(fields.clone()),
                }),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::{SortKey, SortOrder};
    use serde_json::json;

    fn scan() -> LogicalPlan {
        LogicalPlan::Scan {
            index: "products".to_string(),
            filter: Expr::True,
            limit_hint: None,
            projected: None,
        }
    }

    fn term(field: &str) -> Expr {
        Expr::Term {
            field: field.to_string(),
            value: json!("x"),
        }
    }

    #[test]
    fn test_filter_pushdown_conjoins() {
        let plan = LogicalPlan::Filter {
            predicate: term("a"),
            input: Box::new(LogicalPlan::Scan {
                index: "i".to_string(),
                filter: term("b"),
                limit_hint: None,
                projected: None,
            }),
        };
        let rewritten = FilterPushdown.apply(&plan).expect("must fire");
        let LogicalPlan::Scan { filter, .. } = rewritten else {
            panic!("expected scan");
        };
        assert_eq!(filter, Expr::And(vec![term("b"), term("a")]));
    }

    #[test]
    fn test_filter_pushdown_skips_true_filter() {
        let plan = LogicalPlan::Filter {
            predicate: Expr::True,
            input: Box::new(scan()),
        };
        // Constant-true filters belong to RedundantFilterElimination.
        assert!(FilterPushdown.apply(&plan).is_none());
    }

    #[test]
    fn test_topn_fusion_adds_offset() {
        let plan = LogicalPlan::Limit {
            offset: 5,
            size: 10,
            input: Box::new(LogicalPlan::Sort {
                keys: vec![SortKey {
                    field: "price".to_string(),
                    order: SortOrder::Desc,
                }],
                input: Box::new(scan()),
            }),
        };
        let rewritten = TopNOptimization.apply(&plan).expect("must fire");
        assert!(matches!(rewritten, LogicalPlan::TopN { limit: 15, .. }));
    }

    #[test]
    fn test_limit_pushdown_sets_hint_once() {
        let plan = LogicalPlan::Limit {
            offset: 0,
            size: 10,
            input: Box::new(scan()),
        };
        let rewritten = LimitPushdown.apply(&plan).expect("must fire");
        let LogicalPlan::Limit { ref input, .. } = rewritten else {
            panic!("expected limit");
        };
        assert!(matches!(
            **input,
            LogicalPlan::Scan {
                limit_hint: Some(10),
                ..
            }
        ));
        // Idempotent on its own output.
        assert!(LimitPushdown.apply(&rewritten).is_none());
    }

    #[test]
    fn test_limit_pushdown_blocked_by_sort() {
        let plan = LogicalPlan::Limit {
            offset: 0,
            size: 10,
            input: Box::new(LogicalPlan::Sort {
                keys: vec![SortKey::score_desc()],
                input: Box::new(scan()),
            }),
        };
        assert!(LimitPushdown.apply(&plan).is_none());
    }

    #[test]
    fn test_predicate_moves_below_aggregate() {
        let plan = LogicalPlan::Filter {
            predicate: term("a"),
            input: Box::new(LogicalPlan::Aggregate {
                aggs: std::collections::BTreeMap::new(),
                input: Box::new(scan()),
            }),
        };
        let rewritten = PredicatePushdownForAggregations
            .apply(&plan)
            .expect("must fire");
        let LogicalPlan::Aggregate { input, .. } = rewritten else {
            panic!("expected aggregate on top");
        };
        assert!(matches!(*input, LogicalPlan::Filter { .. }));
    }

    #[test]
    fn test_redundant_filter_removed() {
        let plan = LogicalPlan::Filter {
            predicate: Expr::True,
            input: Box::new(scan()),
        };
        let rewritten = RedundantFilterElimination.apply(&plan).expect("must fire");
        assert!(rewritten.is_scan());
    }

    #[test]
    fn test_projection_merging_keeps_outer_order() {
        let plan = LogicalPlan::Project {
            fields: vec!["b".to_string(), "a".to_string(), "z".to_string()],
            input: Box::new(LogicalPlan::Project {
                fields: vec!["a".to_string(), "b".to_string(), "c".to_string()],
                input: Box::new(scan()),
            }),
        };
        let rewritten = ProjectionMerging.apply(&plan).expect("must fire");
        let LogicalPlan::Project { fields, input } = rewritten else {
            panic!("expected project");
        };
        assert_eq!(fields, vec!["b".to_string(), "a".to_string()]);
        assert!(input.is_scan());
    }

    #[test]
    fn test_projection_pushdown_matches_own_output() {
        // Demonstrates why the rule stays unregistered.
        let plan = LogicalPlan::Project {
            fields: vec!["a".to_string()],
            input: Box::new(scan()),
        };
        let once = ProjectionPushdown.apply(&plan).expect("fires");
        let again = ProjectionPushdown.apply(&once).expect("fires on own output");
        assert_eq!(once, again);
    }

    #[test]
    fn test_projection_pushdown_not_registered() {
        let names: Vec<_> = default_rules().iter().map(|r| r.name()).collect();
        assert!(!names.contains(&"ProjectionPushdown"));
    }
}
