//! Converter: query AST to canonical logical plan.
//!
//! Produces `Limit(Sort(Project(Aggregate(Filter(Scan)))))` with optional
//! stages omitted. The filter expression is a straightforward translation of
//! the query AST; anything recognized-but-unsupported (`nested`) is rejected
//! here with NotImplemented rather than failing mid-execution.

use crate::dsl::{Query, SearchRequest, SourceSpec};
use crate::error::{Result, SearchError};
use crate::plan::expr::Expr;
use crate::plan::LogicalPlan;

/// Builds canonical logical plans from parsed requests.
#[derive(Debug, Default)]
pub struct PlanBuilder;

impl PlanBuilder {
    pub fn new() -> Self {
        PlanBuilder
    }

    /// Lower a request against one index into the canonical plan shape.
    pub fn build(&self, index: &str, request: &SearchRequest) -> Result<LogicalPlan> {
        let predicate = query_to_expr(&request.query)?;

        let mut plan = LogicalPlan::Scan {
            index: index.to_string(),
            filter: Expr::True,
            limit_hint: None,
            projected: None,
        };

        // Filter stage is always emitted; RedundantFilterElimination drops
        // the tautological ones so the rule set sees a uniform shape.
        plan = LogicalPlan::Filter {
            predicate,
            input: Box::new(plan),
        };

        if !request.aggs.is_empty() {
            plan = LogicalPlan::Aggregate {
                aggs: request.aggs.clone(),
                input: Box::new(plan),
            };
        }

        if let SourceSpec::Include(fields) = &request.source {
            plan = LogicalPlan::Project {
                fields: fields.clone(),
                input: Box::new(plan),
            };
        }

        if !request.sort.is_empty() {
            plan = LogicalPlan::Sort {
                keys: request.sort.clone(),
                input: Box::new(plan),
            };
        }

        plan = LogicalPlan::Limit {
            offset: request.from,
            size: request.size,
            input: Box::new(plan),
        };

        Ok(plan)
    }
}

/// Translate a query AST node into a filter predicate.
pub fn query_to_expr(query: &Query) -> Result<Expr> {
    match query {
        Query::MatchAll => Ok(Expr::True),
        Query::Term { field, value } => Ok(Expr::Term {
            field: field.clone(),
            value: value.clone(),
        }),
        Query::Terms { field, values } => Ok(Expr::Terms {
            field: field.clone(),
            values: values.clone(),
        }),
        Query::Range {
            field,
            gt,
            gte,
            lt,
            lte,
        } => Ok(Expr::Range {
            field: field.clone(),
            gt: gt.clone(),
            gte: gte.clone(),
            lt: lt.clone(),
            lte: lte.clone(),
        }),
        Query::Exists { field } => Ok(Expr::Exists {
            field: field.clone(),
        }),
        Query::Prefix { field, value } => Ok(Expr::Prefix {
            field: field.clone(),
            value: value.clone(),
        }),
        Query::Wildcard { field, pattern } => Ok(Expr::Wildcard {
            field: field.clone(),
            pattern: pattern.clone(),
        }),
        Query::Match { field, query } => Ok(Expr::Match {
            field: field.clone(),
            query: query.clone(),
        }),
        Query::MatchPhrase { field, query } => Ok(Expr::MatchPhrase {
            field: field.clone(),
            query: query.clone(),
        }),
        Query::MultiMatch { fields, query } => Ok(Expr::Or(
            fields
                .iter()
                .map(|field| Expr::Match {
                    field: field.clone(),
                    query: query.clone(),
                })
                .collect(),
        )),
        Query::Fuzzy {
            field,
            value,
            fuzziness,
        } => Ok(Expr::Fuzzy {
            field: field.clone(),
            value: value.clone(),
            fuzziness: *fuzziness,
        }),
        Query::QueryString { query } => Ok(Expr::Match {
            field: "_all".to_string(),
            query: query.clone(),
        }),
        Query::Ids { values } => Ok(Expr::Ids {
            values: values.clone(),
        }),
        Query::Bool {
            must,
            should,
            must_not,
            filter,
            minimum_should_match,
        } => bool_to_expr(must, should, must_not, filter, *minimum_should_match),
        Query::Nested { .. } => Err(SearchError::NotImplemented {
            feature: "nested query".to_string(),
        }),
    }
}

/// must/filter AND-ed, should OR-ed under min_should_match, must_not negated.
///
/// When must or filter clauses are present, should-clauses stop filtering
/// and only contribute to scoring, so they are omitted from the predicate.
fn bool_to_expr(
    must: &[Query],
    should: &[Query],
    must_not: &[Query],
    filter: &[Query],
    minimum_should_match: Option<u32>,
) -> Result<Expr> {
    let mut conjuncts: Vec<Expr> = Vec::new();

    for clause in must.iter().chain(filter) {
        conjuncts.push(query_to_expr(clause)?);
    }

    let has_anchor = !conjuncts.is_empty();
    if !should.is_empty() && !has_anchor {
        let clauses = should
            .iter()
            .map(query_to_expr)
            .collect::<Result<Vec<_>>>()?;
        let min = minimum_should_match.unwrap_or(1);
        conjuncts.push(if min <= 1 {
            Expr::Or(clauses)
        } else {
            Expr::MinimumShould { min, clauses }
        });
    }

    for clause in must_not {
        conjuncts.push(Expr::Not(Box::new(query_to_expr(clause)?)));
    }

    Ok(match conjuncts.len() {
        0 => Expr::True,
        1 => conjuncts.pop().expect("one conjunct"),
        _ => Expr::And(conjuncts),
    })
}
