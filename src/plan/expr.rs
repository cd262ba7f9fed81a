//! Filter predicate expressions.
//!
//! Expressions are pure, side-effect free trees derived from the query AST.
//! They travel inside shard plan fragments, so every variant is serializable.
//! Evaluation against documents lives in the shard engine; this module only
//! carries structure and selectivity estimation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cost;

/// Predicate tree. Closed sum type; the shard engine matches on kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// Constant true (selectivity 1.0).
    True,
    Term {
        field: String,
        value: Value,
    },
    Terms {
        field: String,
        values: Vec<Value>,
    },
    Range {
        field: String,
        gt: Option<Value>,
        gte: Option<Value>,
        lt: Option<Value>,
        lte: Option<Value>,
    },
    Exists {
        field: String,
    },
    Prefix {
        field: String,
        value: String,
    },
    Wildcard {
        field: String,
        pattern: String,
    },
    /// Token-overlap match. The pseudo-field `_all` matches any text field.
    Match {
        field: String,
        query: String,
    },
    MatchPhrase {
        field: String,
        query: String,
    },
    Fuzzy {
        field: String,
        value: String,
        fuzziness: u32,
    },
    Ids {
        values: Vec<String>,
    },
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
    /// Disjunction that only matches when at least `min` clauses match.
    MinimumShould {
        min: u32,
        clauses: Vec<Expr>,
    },
}

impl Expr {
    pub fn is_true(&self) -> bool {
        matches!(self, Expr::True)
    }

    /// Conjoin two predicates, eliding constant-true operands.
    pub fn and(a: Expr, b: Expr) -> Expr {
        match (a, b) {
            (Expr::True, b) => b,
            (a, Expr::True) => a,
            (Expr::And(mut clauses), b) => {
                clauses.push(b);
                Expr::And(clauses)
            }
            (a, b) => Expr::And(vec![a, b]),
        }
    }

    /// Estimated fraction of documents matching this predicate.
    ///
    /// Leaf defaults come from the cost model; AND multiplies, OR clamps the
    /// sum at 1.0, NOT inverts.
    pub fn selectivity(&self) -> f64 {
        match self {
            Expr::True => cost::SELECTIVITY_MATCH_ALL,
            Expr::Term { .. } => cost::SELECTIVITY_TERM,
            // Each alternative value behaves like an OR of term predicates.
            Expr::Terms { values, .. } => {
                (cost::SELECTIVITY_TERM * values.len() as f64).min(1.0)
            }
            Expr::Range { .. } => cost::SELECTIVITY_RANGE,
            Expr::Exists { .. } => cost::SELECTIVITY_EXISTS,
            Expr::Prefix { .. } | Expr::Wildcard { .. } => cost::SELECTIVITY_PREFIX,
            Expr::Match { .. } | Expr::MatchPhrase { .. } | Expr::Fuzzy { .. } => {
                cost::SELECTIVITY_MATCH
            }
            Expr::Ids { values } => (cost::SELECTIVITY_TERM * values.len() as f64).min(1.0),
            Expr::And(clauses) => clauses.iter().map(Expr::selectivity).product(),
            Expr::Or(clauses) => clauses.iter().map(Expr::selectivity).sum::<f64>().min(1.0),
            Expr::Not(inner) => 1.0 - inner.selectivity(),
            Expr::MinimumShould { clauses, .. } => clauses
                .iter()
                .map(Expr::selectivity)
                .sum::<f64>()
                .min(1.0),
        }
    }

    /// Fields referenced anywhere in the predicate.
    pub fn referenced_fields(&self) -> Vec<&str> {
        let mut fields = Vec::new();
        self.collect_fields(&mut fields);
        fields
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::True | Expr::Ids { .. } => {}
            Expr::Term { field, .. }
            | Expr::Terms { field, .. }
            | Expr::Range { field, .. }
            | Expr::Exists { field }
            | Expr::Prefix { field, .. }
            | Expr::Wildcard { field, .. }
            | Expr::Match { field, .. }
            | Expr::MatchPhrase { field, .. }
            | Expr::Fuzzy { field, .. } => out.push(field),
            Expr::And(clauses) | Expr::Or(clauses) => {
                for clause in clauses {
                    clause.collect_fields(out);
                }
            }
            Expr::Not(inner) => inner.collect_fields(out),
            Expr::MinimumShould { clauses, .. } => {
                for clause in clauses {
                    clause.collect_fields(out);
                }
            }
        }
    }
}
