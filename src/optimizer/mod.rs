//! # Rule Optimizer
//!
//! Priority-ordered rewrite rules applied to fixpoint over a logical plan:
//!
//! - FilterPushdown (95): fold `Filter` into the adjacent `Scan`
//! - TopNOptimization (85): `Limit ∘ Sort` -> `TopN`
//! - LimitPushdown (75): advisory row cap on `Scan` when nothing reorders
//! - PredicatePushdownForAggregations (75): `Filter` below `Aggregate`
//! - RedundantFilterElimination (70): drop tautological filters
//! - ProjectionMerging (60): collapse adjacent `Project` layers
//!
//! Within a pass the highest-priority matching rule fires first; the pass
//! repeats until no rule applies. A visitation cap bounds total firings:
//! reaching it without a fixpoint fails planning, so a non-idempotent rule
//! cannot spin forever.

pub mod rules;

use crate::error::{Result, SearchError};
use crate::plan::LogicalPlan;
use rules::OptimizerRule;

/// Rule engine with a fixed, priority-sorted rule set.
pub struct Optimizer {
    rules: Vec<Box<dyn OptimizerRule>>,
    visitation_cap: usize,
}

impl Optimizer {
    /// Optimizer with the default rule set and the given firing cap.
    pub fn new(visitation_cap: usize) -> Self {
        Self::with_rules(rules::default_rules(), visitation_cap)
    }

    /// Optimizer over an explicit rule set (sorted here by priority).
    pub fn with_rules(mut rules: Vec<Box<dyn OptimizerRule>>, visitation_cap: usize) -> Self {
        // Stable sort: equal priorities keep registration order, which fixes
        // the firing order among them.
        rules.sort_by_key(|rule| std::cmp::Reverse(rule.priority()));
        Optimizer {
            rules,
            visitation_cap,
        }
    }

    /// Rewrite the plan to fixpoint.
    ///
    /// Returns `PlanningFailed` if the cap is reached before the rule set
    /// stops matching.
    pub fn optimize(&self, plan: LogicalPlan) -> Result<LogicalPlan> {
        let mut current = plan;
        let mut firings = 0usize;

        loop {
            let mut fired = false;
            for rule in &self.rules {
                if let Some(next) = rule.apply(&current) {
                    if next == current {
                        // A rewrite that changes nothing does not count as
                        // progress; skip it so it cannot livelock the pass.
                        continue;
                    }
                    tracing::trace!(rule = rule.name(), "optimizer_rule_fired");
                    current = next;
                    firings += 1;
                    fired = true;
                    break;
                }
            }

            if !fired {
                return Ok(current);
            }
            if firings >= self.visitation_cap {
                return Err(SearchError::PlanningFailed {
                    message: format!(
                        "optimizer did not reach a fixpoint within {} rule firings",
                        self.visitation_cap
                    ),
                });
            }
        }
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|rule| rule.name()).collect()
    }
}

/// Apply `rewrite` at the topmost matching node, recursing into children
/// when the node itself does not match. Returns None when nothing matched.
pub(crate) fn rewrite_topdown<F>(plan: &LogicalPlan, rewrite: &F) -> Option<LogicalPlan>
where
    F: Fn(&LogicalPlan) -> Option<LogicalPlan>,
{
    if let Some(replaced) = rewrite(plan) {
        return Some(replaced);
    }

    macro_rules! descend {
        ($variant:ident { $($field:ident),* }, $input:expr) => {{
            let rewritten = rewrite_topdown($input, rewrite)?;
            Some(LogicalPlan::$variant {
                $($field: $field.clone(),)*
                input: Box::new(rewritten),
            })
        }};
    }

    match plan {
        LogicalPlan::Scan { .. } => None,
        LogicalPlan::Filter { predicate, input } => descend!(Filter { predicate }, input),
        LogicalPlan::Project { fields, input } => descend!(Project { fields }, input),
        LogicalPlan::Aggregate { aggs, input } => descend!(Aggregate { aggs }, input),
        LogicalPlan::Sort { keys, input } => descend!(Sort { keys }, input),
        LogicalPlan::Limit {
            offset,
            size,
            input,
        } => descend!(Limit { offset, size }, input),
        LogicalPlan::TopN { limit, keys, input } => descend!(TopN { limit, keys }, input),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::SortKey;
    use crate::plan::expr::Expr;
    use serde_json::json;

    fn scan() -> LogicalPlan {
        LogicalPlan::Scan {
            index: "products".to_string(),
            filter: Expr::True,
            limit_hint: None,
            projected: None,
        }
    }

    fn price_filter() -> Expr {
        Expr::Range {
            field: "price".to_string(),
            gt: Some(json!(100)),
            gte: None,
            lt: None,
            lte: None,
        }
    }

    #[test]
    fn test_sort_limit_fuses_and_filter_pushes_down() {
        let plan = LogicalPlan::Limit {
            offset: 0,
            size: 10,
            input: Box::new(LogicalPlan::Sort {
                keys: vec![SortKey {
                    field: "price".to_string(),
                    order: crate::dsl::SortOrder::Desc,
                }],
                input: Box::new(LogicalPlan::Filter {
                    predicate: price_filter(),
                    input: Box::new(scan()),
                }),
            }),
        };

        let optimizer = Optimizer::new(64);
        let optimized = optimizer.optimize(plan).expect("optimize");

        let LogicalPlan::TopN { limit: 10, ref keys, ref input } = optimized else {
            panic!("expected TopN at root, got {optimized:?}");
        };
        assert_eq!(keys.len(), 1);
        let LogicalPlan::Scan { ref filter, .. } = **input else {
            panic!("expected scan under TopN");
        };
        assert_eq!(*filter, price_filter());
    }

    #[test]
    fn test_optimize_is_idempotent() {
        let plan = LogicalPlan::Limit {
            offset: 2,
            size: 10,
            input: Box::new(LogicalPlan::Sort {
                keys: vec![SortKey::score_desc()],
                input: Box::new(LogicalPlan::Filter {
                    predicate: price_filter(),
                    input: Box::new(scan()),
                }),
            }),
        };

        let optimizer = Optimizer::new(64);
        let once = optimizer.optimize(plan).expect("first pass");
        let twice = optimizer.optimize(once.clone()).expect("second pass");
        assert_eq!(once, twice);
    }

    #[test]
    fn test_visitation_cap_fails_planning() {
        // A rule that always rewrites to a fresh, different plan never
        // reaches a fixpoint; the cap must turn that into PlanningFailed.
        struct Spinner;
        impl OptimizerRule for Spinner {
            fn name(&self) -> &'static str {
                "spinner"
            }
            fn priority(&self) -> u32 {
                50
            }
            fn apply(&self, plan: &LogicalPlan) -> Option<LogicalPlan> {
                let next_hint = match plan {
                    LogicalPlan::Scan { limit_hint, .. } => limit_hint.map_or(1, |h| h + 1),
                    _ => 1,
                };
                Some(LogicalPlan::Scan {
                    index: "spin".to_string(),
                    filter: Expr::True,
                    limit_hint: Some(next_hint),
                    projected: None,
                })
            }
        }

        let optimizer = Optimizer::with_rules(vec![Box::new(Spinner)], 8);
        let err = optimizer.optimize(scan()).expect_err("must hit the cap");
        assert!(matches!(err, SearchError::PlanningFailed { .. }));
    }

    #[test]
    fn test_rules_ordered_by_priority() {
        let optimizer = Optimizer::new(64);
        let names = optimizer.rule_names();
        assert_eq!(names[0], "FilterPushdown");
        assert_eq!(names[1], "TopNOptimization");
        assert_eq!(*names.last().expect("non-empty"), "ProjectionMerging");
    }
}
