//! Search DSL Parser
//!
//! Turns the JSON query DSL into a typed [`SearchRequest`] AST. Parsing is
//! strict: unknown top-level keys and per-variant schema violations are
//! rejected with errors naming the offending path.
//!
//! ```text
//! {"query":{"term":{"title":"laptop"}},"size":10}
//!     -> SearchRequest { query: Term { field: "title", .. }, size: 10, .. }
//! ```
//!
//! Recognized query variants: match_all, term, terms, range, exists, prefix,
//! wildcard, match, match_phrase, multi_match, bool, fuzzy, query_string,
//! ids, nested. `nested` parses but is rejected at planning time.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, SearchError};

/// Parsed, typed search request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: Query,
    /// Aggregations by response name. BTreeMap keeps planning and
    /// fingerprinting deterministic.
    pub aggs: BTreeMap<String, AggSpec>,
    pub sort: Vec<SortKey>,
    pub source: SourceSpec,
    pub from: usize,
    pub size: usize,
}

impl Default for SearchRequest {
    fn default() -> Self {
        SearchRequest {
            query: Query::MatchAll,
            aggs: BTreeMap::new(),
            sort: Vec::new(),
            source: SourceSpec::Enabled(true),
            from: 0,
            size: DEFAULT_SIZE,
        }
    }
}

/// Default page size when the request omits `size`.
pub const DEFAULT_SIZE: usize = 10;

/// Query AST. Closed sum type; see the planner for the lowering rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Query {
    MatchAll,
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
    Match {
        field: String,
        query: String,
    },
    MatchPhrase {
        field: String,
        query: String,
    },
    MultiMatch {
        fields: Vec<String>,
        query: String,
    },
    Bool {
        must: Vec<Query>,
        should: Vec<Query>,
        must_not: Vec<Query>,
        filter: Vec<Query>,
        minimum_should_match: Option<u32>,
    },
    Fuzzy {
        field: String,
        value: String,
        fuzziness: u32,
    },
    /// Free-form query string, matched against all text fields.
    QueryString {
        query: String,
    },
    Ids {
        values: Vec<String>,
    },
    /// Recognized but unsupported; planning reports NotImplemented.
    Nested {
        path: String,
        query: Box<Query>,
    },
}

/// One sort criterion. The pseudo-field `_score` sorts by relevance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub field: String,
    pub order: SortOrder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortKey {
    pub fn score_desc() -> Self {
        SortKey {
            field: "_score".to_string(),
            order: SortOrder::Desc,
        }
    }

    pub fn is_score(&self) -> bool {
        self.field == "_score"
    }
}

/// Which source fields to return with each hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceSpec {
    Enabled(bool),
    Include(Vec<String>),
}

/// Aggregation specification, keyed by response name in the request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AggSpec {
    Terms { field: String, size: usize },
    Stats { field: String },
    ExtendedStats { field: String },
    Sum { field: String },
    Avg { field: String },
    Min { field: String },
    Max { field: String },
    ValueCount { field: String },
    Cardinality { field: String },
    Percentiles { field: String, percents: Vec<f64> },
    Histogram { field: String, interval: f64 },
    DateHistogram { field: String, interval_ms: u64 },
}

impl AggSpec {
    pub fn field(&self) -> &str {
        match self {
            AggSpec::Terms { field, .. }
            | AggSpec::Stats { field }
            | AggSpec::ExtendedStats { field }
            | AggSpec::Sum { field }
            | AggSpec::Avg { field }
            | AggSpec::Min { field }
            | AggSpec::Max { field }
            | AggSpec::ValueCount { field }
            | AggSpec::Cardinality { field }
            | AggSpec::Percentiles { field, .. }
            | AggSpec::Histogram { field, .. }
            | AggSpec::DateHistogram { field, .. } => field,
        }
    }
}

/// Default percentiles when the request omits `percents`.
pub const DEFAULT_PERCENTS: [f64; 7] = [1.0, 5.0, 25.0, 50.0, 75.0, 95.0, 99.0];

/// Default bucket count for a terms aggregation.
pub const DEFAULT_TERMS_SIZE: usize = 10;

/// Parse a search request body.
pub fn parse_search_request(body: &Value) -> Result<SearchRequest> {
    let obj = expect_object(body, "")?;

    let mut request = SearchRequest::default();

    for (key, value) in obj {
        match key.as_str() {
            "query" => request.query = parse_query(value, "query")?,
            "aggs" | "aggregations" => request.aggs = parse_aggs(value, key)?,
            "sort" => request.sort = parse_sort(value)?,
            "_source" => request.source = parse_source(value)?,
            "from" => request.from = expect_usize(value, "from")?,
            "size" => request.size = expect_usize(value, "size")?,
            other => {
                return Err(SearchError::bad_request(
                    other,
                    "unknown top-level key in search request",
                ));
            }
        }
    }

    Ok(request)
}

/// Parse a single query object (exactly one variant key).
pub fn parse_query(value: &Value, path: &str) -> Result<Query> {
    let obj = expect_object(value, path)?;
    if obj.len() != 1 {
        return Err(SearchError::bad_request(
            path,
            format!("expected exactly one query variant, got {}", obj.len()),
        ));
    }
    // len() == 1 checked above
    let (kind, body) = obj.iter().next().expect("non-empty object");
    let path = join_path(path, kind);

    match kind.as_str() {
        "match_all" => {
            expect_empty_object(body, &path)?;
            Ok(Query::MatchAll)
        }
        "term" => {
            let (field, value) = single_field_entry(body, &path)?;
            if value.is_object() || value.is_array() {
                return Err(SearchError::bad_request(
                    join_path(&path, &field),
                    "term value must be a scalar",
                ));
            }
            Ok(Query::Term {
                field,
                value: value.clone(),
            })
        }
        "terms" => {
            let (field, value) = single_field_entry(body, &path)?;
            let values = value
                .as_array()
                .ok_or_else(|| {
                    SearchError::bad_request(join_path(&path, &field), "terms expects an array")
                })?
                .clone();
            Ok(Query::Terms { field, values })
        }
        "range" => {
            let (field, value) = single_field_entry(body, &path)?;
            let bounds_path = join_path(&path, &field);
            let bounds = expect_object(value, &bounds_path)?;
            let mut range = Query::Range {
                field,
                gt: None,
                gte: None,
                lt: None,
                lte: None,
            };
            if let Query::Range {
                gt, gte, lt, lte, ..
            } = &mut range
            {
                for (bound, bound_value) in bounds {
                    let slot = match bound.as_str() {
                        "gt" => &mut *gt,
                        "gte" => &mut *gte,
                        "lt" => &mut *lt,
                        "lte" => &mut *lte,
                        other => {
                            return Err(SearchError::bad_request(
                                join_path(&bounds_path, other),
                                "range bounds are gt, gte, lt, lte",
                            ));
                        }
                    };
                    *slot = Some(bound_value.clone());
                }
            }
            Ok(range)
        }
        "exists" => {
            let obj = expect_object(body, &path)?;
            let field = obj
                .get("field")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    SearchError::bad_request(join_path(&path, "field"), "expected a string")
                })?
                .to_string();
            reject_unknown_keys(obj, &["field"], &path)?;
            Ok(Query::Exists { field })
        }
        "prefix" => {
            let (field, value) = single_field_entry(body, &path)?;
            let value = expect_string(value, &join_path(&path, &field))?;
            Ok(Query::Prefix { field, value })
        }
        "wildcard" => {
            let (field, value) = single_field_entry(body, &path)?;
            let pattern = expect_string(value, &join_path(&path, &field))?;
            Ok(Query::Wildcard { field, pattern })
        }
        "match" => {
            let (field, value) = single_field_entry(body, &path)?;
            let query = expect_string(value, &join_path(&path, &field))?;
            Ok(Query::Match { field, query })
        }
        "match_phrase" => {
            let (field, value) = single_field_entry(body, &path)?;
            let query = expect_string(value, &join_path(&path, &field))?;
            Ok(Query::MatchPhrase { field, query })
        }
        "multi_match" => {
            let obj = expect_object(body, &path)?;
            reject_unknown_keys(obj, &["query", "fields"], &path)?;
            let query = obj
                .get("query")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    SearchError::bad_request(join_path(&path, "query"), "expected a string")
                })?
                .to_string();
            let fields = obj
                .get("fields")
                .and_then(Value::as_array)
                .ok_or_else(|| {
                    SearchError::bad_request(
                        join_path(&path, "fields"),
                        "expected an array of field names",
                    )
                })?
                .iter()
                .map(|f| {
                    f.as_str().map(str::to_string).ok_or_else(|| {
                        SearchError::bad_request(
                            join_path(&path, "fields"),
                            "field names must be strings",
                        )
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            if fields.is_empty() {
                return Err(SearchError::bad_request(
                    join_path(&path, "fields"),
                    "multi_match requires at least one field",
                ));
            }
            Ok(Query::MultiMatch { fields, query })
        }
        "bool" => {
            let obj = expect_object(body, &path)?;
            reject_unknown_keys(
                obj,
                &["must", "should", "must_not", "filter", "minimum_should_match"],
                &path,
            )?;
            let minimum_should_match = match obj.get("minimum_should_match") {
                None => None,
                Some(v) => Some(
                    v.as_u64()
                        .ok_or_else(|| {
                            SearchError::bad_request(
                                join_path(&path, "minimum_should_match"),
                                "expected a non-negative integer",
                            )
                        })
                        .map(|n| n as u32)?,
                ),
            };
            Ok(Query::Bool {
                must: parse_clause_list(obj.get("must"), &join_path(&path, "must"))?,
                should: parse_clause_list(obj.get("should"), &join_path(&path, "should"))?,
                must_not: parse_clause_list(obj.get("must_not"), &join_path(&path, "must_not"))?,
                filter: parse_clause_list(obj.get("filter"), &join_path(&path, "filter"))?,
                minimum_should_match,
            })
        }
        "fuzzy" => {
            let (field, value) = single_field_entry(body, &path)?;
            let field_path = join_path(&path, &field);
            match value {
                Value::String(s) => Ok(Query::Fuzzy {
                    field,
                    value: s.clone(),
                    fuzziness: DEFAULT_FUZZINESS,
                }),
                Value::Object(obj) => {
                    reject_unknown_keys(obj, &["value", "fuzziness"], &field_path)?;
                    let value = obj
                        .get("value")
                        .and_then(Value::as_str)
                        .ok_or_else(|| {
                            SearchError::bad_request(
                                join_path(&field_path, "value"),
                                "expected a string",
                            )
                        })?
                        .to_string();
                    let fuzziness = match obj.get("fuzziness") {
                        None => DEFAULT_FUZZINESS,
                        Some(v) => v.as_u64().map(|n| n as u32).ok_or_else(|| {
                            SearchError::bad_request(
                                join_path(&field_path, "fuzziness"),
                                "expected a non-negative integer",
                            )
                        })?,
                    };
                    Ok(Query::Fuzzy {
                        field,
                        value,
                        fuzziness,
                    })
                }
                _ => Err(SearchError::bad_request(
                    field_path,
                    "fuzzy expects a string or an object with 'value'",
                )),
            }
        }
        "query_string" => {
            let obj = expect_object(body, &path)?;
            reject_unknown_keys(obj, &["query"], &path)?;
            let query = obj
                .get("query")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    SearchError::bad_request(join_path(&path, "query"), "expected a string")
                })?
                .to_string();
            Ok(Query::QueryString { query })
        }
        "ids" => {
            let obj = expect_object(body, &path)?;
            reject_unknown_keys(obj, &["values"], &path)?;
            let values = obj
                .get("values")
                .and_then(Value::as_array)
                .ok_or_else(|| {
                    SearchError::bad_request(
                        join_path(&path, "values"),
                        "expected an array of document ids",
                    )
                })?
                .iter()
                .map(|v| {
                    v.as_str().map(str::to_string).ok_or_else(|| {
                        SearchError::bad_request(join_path(&path, "values"), "ids must be strings")
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(Query::Ids { values })
        }
        "nested" => {
            let obj = expect_object(body, &path)?;
            reject_unknown_keys(obj, &["path", "query"], &path)?;
            let nested_path = obj
                .get("path")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    SearchError::bad_request(join_path(&path, "path"), "expected a string")
                })?
                .to_string();
            let inner = obj.get("query").ok_or_else(|| {
                SearchError::bad_request(join_path(&path, "query"), "nested requires a query")
            })?;
            let query = parse_query(inner, &join_path(&path, "query"))?;
            Ok(Query::Nested {
                path: nested_path,
                query: Box::new(query),
            })
        }
        other => Err(SearchError::bad_request(
            path,
            format!("unknown query variant '{other}'"),
        )),
    }
}

const DEFAULT_FUZZINESS: u32 = 2;

fn parse_clause_list(value: Option<&Value>, path: &str) -> Result<Vec<Query>> {
    match value {
        None => Ok(Vec::new()),
        // A single clause object is accepted as a one-element list.
        Some(clause @ Value::Object(_)) => Ok(vec![parse_query(clause, path)?]),
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(i, item)| parse_query(item, &format!("{path}[{i}]")))
            .collect(),
        Some(_) => Err(SearchError::bad_request(
            path,
            "expected a query object or an array of query objects",
        )),
    }
}

fn parse_aggs(value: &Value, path: &str) -> Result<BTreeMap<String, AggSpec>> {
    let obj = expect_object(value, path)?;
    let mut aggs = BTreeMap::new();
    for (name, spec) in obj {
        let agg_path = join_path(path, name);
        aggs.insert(name.clone(), parse_agg_spec(spec, &agg_path)?);
    }
    Ok(aggs)
}

fn parse_agg_spec(value: &Value, path: &str) -> Result<AggSpec> {
    let obj = expect_object(value, path)?;
    if obj.len() != 1 {
        return Err(SearchError::bad_request(
            path,
            format!("expected exactly one aggregation type, got {}", obj.len()),
        ));
    }
    let (kind, body) = obj.iter().next().expect("non-empty object");
    let path = join_path(path, kind);
    let body_obj = expect_object(body, &path)?;

    let field = |keys: &[&str]| -> Result<String> {
        reject_unknown_keys(body_obj, keys, &path)?;
        body_obj
            .get("field")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| SearchError::bad_request(join_path(&path, "field"), "expected a string"))
    };

    match kind.as_str() {
        "terms" => {
            let field = field(&["field", "size"])?;
            let size = match body_obj.get("size") {
                None => DEFAULT_TERMS_SIZE,
                Some(v) => expect_usize(v, &join_path(&path, "size"))?,
            };
            Ok(AggSpec::Terms { field, size })
        }
        "stats" => Ok(AggSpec::Stats {
            field: field(&["field"])?,
        }),
        "extended_stats" => Ok(AggSpec::ExtendedStats {
            field: field(&["field"])?,
        }),
        "sum" => Ok(AggSpec::Sum {
            field: field(&["field"])?,
        }),
        "avg" => Ok(AggSpec::Avg {
            field: field(&["field"])?,
        }),
        "min" => Ok(AggSpec::Min {
            field: field(&["field"])?,
        }),
        "max" => Ok(AggSpec::Max {
            field: field(&["field"])?,
        }),
        "value_count" => Ok(AggSpec::ValueCount {
            field: field(&["field"])?,
        }),
        "cardinality" => Ok(AggSpec::Cardinality {
            field: field(&["field"])?,
        }),
        "percentiles" => {
            let field = field(&["field", "percents"])?;
            let percents = match body_obj.get("percents") {
                None => DEFAULT_PERCENTS.to_vec(),
                Some(v) => v
                    .as_array()
                    .ok_or_else(|| {
                        SearchError::bad_request(
                            join_path(&path, "percents"),
                            "expected an array of numbers",
                        )
                    })?
                    .iter()
                    .map(|p| {
                        p.as_f64().filter(|p| (0.0..=100.0).contains(p)).ok_or_else(|| {
                            SearchError::bad_request(
                                join_path(&path, "percents"),
                                "percentiles must be numbers in [0, 100]",
                            )
                        })
                    })
                    .collect::<Result<Vec<_>>>()?,
            };
            Ok(AggSpec::Percentiles { field, percents })
        }
        "histogram" => {
            let field = field(&["field", "interval"])?;
            let interval = body_obj
                .get("interval")
                .and_then(Value::as_f64)
                .filter(|i| *i > 0.0)
                .ok_or_else(|| {
                    SearchError::bad_request(
                        join_path(&path, "interval"),
                        "expected a positive number",
                    )
                })?;
            Ok(AggSpec::Histogram { field, interval })
        }
        "date_histogram" => {
            let field = field(&["field", "interval"])?;
            let raw = body_obj
                .get("interval")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    SearchError::bad_request(
                        join_path(&path, "interval"),
                        "expected an interval string such as '5m'",
                    )
                })?;
            let interval_ms = parse_date_interval(raw)
                .ok_or_else(|| {
                    SearchError::bad_request(
                        join_path(&path, "interval"),
                        format!("unrecognized interval '{raw}' (units: ms, s, m, h, d)"),
                    )
                })?;
            Ok(AggSpec::DateHistogram { field, interval_ms })
        }
        other => Err(SearchError::bad_request(
            path,
            format!("unknown aggregation type '{other}'"),
        )),
    }
}

/// Parse a `"5m"` style interval into milliseconds.
pub fn parse_date_interval(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    let (digits, unit) = raw.split_at(raw.find(|c: char| !c.is_ascii_digit())?);
    let amount: u64 = digits.parse().ok()?;
    if amount == 0 {
        return None;
    }
    let unit_ms: u64 = match unit {
        "ms" => 1,
        "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        "d" => 86_400_000,
        _ => return None,
    };
    Some(amount * unit_ms)
}

fn parse_sort(value: &Value) -> Result<Vec<SortKey>> {
    let items = value
        .as_array()
        .ok_or_else(|| SearchError::bad_request("sort", "expected an array"))?;
    let mut keys = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let path = format!("sort[{i}]");
        match item {
            // "price" - ascending by convention, except _score which is descending
            Value::String(field) => {
                let order = if field == "_score" {
                    SortOrder::Desc
                } else {
                    SortOrder::Asc
                };
                keys.push(SortKey {
                    field: field.clone(),
                    order,
                });
            }
            // {"price": "desc"} or {"price": {"order": "desc"}}
            Value::Object(obj) if obj.len() == 1 => {
                let (field, spec) = obj.iter().next().expect("non-empty object");
                let order_str = match spec {
                    Value::String(s) => s.as_str(),
                    Value::Object(inner) => inner
                        .get("order")
                        .and_then(Value::as_str)
                        .unwrap_or("asc"),
                    _ => {
                        return Err(SearchError::bad_request(
                            join_path(&path, field),
                            "expected 'asc', 'desc', or {\"order\": ...}",
                        ));
                    }
                };
                let order = match order_str {
                    "asc" => SortOrder::Asc,
                    "desc" => SortOrder::Desc,
                    other => {
                        return Err(SearchError::bad_request(
                            join_path(&path, field),
                            format!("unknown sort order '{other}'"),
                        ));
                    }
                };
                keys.push(SortKey {
                    field: field.clone(),
                    order,
                });
            }
            _ => {
                return Err(SearchError::bad_request(
                    path,
                    "expected a field name or a single-key object",
                ));
            }
        }
    }
    Ok(keys)
}

fn parse_source(value: &Value) -> Result<SourceSpec> {
    match value {
        Value::Bool(enabled) => Ok(SourceSpec::Enabled(*enabled)),
        Value::Array(fields) => fields
            .iter()
            .map(|f| {
                f.as_str().map(str::to_string).ok_or_else(|| {
                    SearchError::bad_request("_source", "field names must be strings")
                })
            })
            .collect::<Result<Vec<_>>>()
            .map(SourceSpec::Include),
        _ => Err(SearchError::bad_request(
            "_source",
            "expected a boolean or an array of field names",
        )),
    }
}

// Shared helpers

fn join_path(base: &str, key: &str) -> String {
    if base.is_empty() {
        key.to_string()
    } else {
        format!("{base}.{key}")
    }
}

fn expect_object<'a>(value: &'a Value, path: &str) -> Result<&'a serde_json::Map<String, Value>> {
    value.as_object().ok_or_else(|| {
        SearchError::bad_request(
            path,
            format!("expected an object, got {}", type_name(value)),
        )
    })
}

fn expect_empty_object(value: &Value, path: &str) -> Result<()> {
    let obj = expect_object(value, path)?;
    if obj.is_empty() {
        Ok(())
    } else {
        Err(SearchError::bad_request(path, "expected an empty object"))
    }
}

fn expect_string(value: &Value, path: &str) -> Result<String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| {
            SearchError::bad_request(
                path,
                format!("expected a string, got {}", type_name(value)),
            )
        })
}

fn expect_usize(value: &Value, path: &str) -> Result<usize> {
    value
        .as_u64()
        .map(|n| n as usize)
        .ok_or_else(|| SearchError::bad_request(path, "expected a non-negative integer"))
}

/// Extract the single `{field: spec}` entry of a leaf query body.
fn single_field_entry<'a>(value: &'a Value, path: &str) -> Result<(String, &'a Value)> {
    let obj = expect_object(value, path)?;
    if obj.len() != 1 {
        return Err(SearchError::bad_request(
            path,
            format!("expected exactly one field, got {}", obj.len()),
        ));
    }
    let (field, spec) = obj.iter().next().expect("non-empty object");
    Ok((field.clone(), spec))
}

fn reject_unknown_keys(
    obj: &serde_json::Map<String, Value>,
    allowed: &[&str],
    path: &str,
) -> Result<()> {
    for key in obj.keys() {
        if !allowed.contains(&key.as_str()) {
            return Err(SearchError::bad_request(
                join_path(path, key),
                "unknown key",
            ));
        }
    }
    Ok(())
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_term_query() {
        let body = json!({"query": {"term": {"title": "laptop"}}, "size": 10});
        let request = parse_search_request(&body).expect("parse");
        assert_eq!(
            request.query,
            Query::Term {
                field: "title".to_string(),
                value: json!("laptop"),
            }
        );
        assert_eq!(request.size, 10);
        assert_eq!(request.from, 0);
    }

    #[test]
    fn test_unknown_top_level_key_rejected() {
        let body = json!({"query": {"match_all": {}}, "explain": true});
        let err = parse_search_request(&body).expect_err("must reject");
        assert!(err.to_string().contains("explain"));
    }

    #[test]
    fn test_unknown_variant_names_path() {
        let body = json!({"query": {"geo_distance": {"field": "loc"}}});
        let err = parse_search_request(&body).expect_err("must reject");
        assert!(err.to_string().contains("query"), "{err}");
    }

    #[test]
    fn test_range_bounds() {
        let body = json!({"query": {"range": {"price": {"gte": 100, "lt": 500}}}});
        let request = parse_search_request(&body).expect("parse");
        match request.query {
            Query::Range { field, gt, gte, lt, lte } => {
                assert_eq!(field, "price");
                assert_eq!(gte, Some(json!(100)));
                assert_eq!(lt, Some(json!(500)));
                assert_eq!(gt, None);
                assert_eq!(lte, None);
            }
            other => panic!("expected range, got {other:?}"),
        }
    }

    #[test]
    fn test_range_unknown_bound_rejected() {
        let body = json!({"query": {"range": {"price": {"above": 100}}}});
        let err = parse_search_request(&body).expect_err("must reject");
        assert!(err.to_string().contains("query.range.price.above"), "{err}");
    }

    #[test]
    fn test_bool_query_with_minimum_should_match() {
        let body = json!({"query": {"bool": {
            "must": [{"term": {"status": "active"}}],
            "should": [{"term": {"tag": "a"}}, {"term": {"tag": "b"}}],
            "minimum_should_match": 1
        }}});
        let request = parse_search_request(&body).expect("parse");
        match request.query {
            Query::Bool {
                must,
                should,
                minimum_should_match,
                ..
            } => {
                assert_eq!(must.len(), 1);
                assert_eq!(should.len(), 2);
                assert_eq!(minimum_should_match, Some(1));
            }
            other => panic!("expected bool, got {other:?}"),
        }
    }

    #[test]
    fn test_bool_single_clause_object() {
        let body = json!({"query": {"bool": {"must": {"term": {"a": 1}}}}});
        let request = parse_search_request(&body).expect("parse");
        match request.query {
            Query::Bool { must, .. } => assert_eq!(must.len(), 1),
            other => panic!("expected bool, got {other:?}"),
        }
    }

    #[test]
    fn test_sort_forms() {
        let body = json!({"sort": ["name", {"price": "desc"}, {"age": {"order": "asc"}}]});
        let request = parse_search_request(&body).expect("parse");
        assert_eq!(request.sort.len(), 3);
        assert_eq!(request.sort[0].order, SortOrder::Asc);
        assert_eq!(request.sort[1].field, "price");
        assert_eq!(request.sort[1].order, SortOrder::Desc);
        assert_eq!(request.sort[2].order, SortOrder::Asc);
    }

    #[test]
    fn test_score_sort_defaults_descending() {
        let body = json!({"sort": ["_score"]});
        let request = parse_search_request(&body).expect("parse");
        assert_eq!(request.sort[0].order, SortOrder::Desc);
    }

    #[test]
    fn test_terms_agg_with_default_size() {
        let body = json!({"aggs": {"by_category": {"terms": {"field": "category"}}}});
        let request = parse_search_request(&body).expect("parse");
        assert_eq!(
            request.aggs.get("by_category"),
            Some(&AggSpec::Terms {
                field: "category".to_string(),
                size: DEFAULT_TERMS_SIZE,
            })
        );
    }

    #[test]
    fn test_date_histogram_interval_units() {
        assert_eq!(parse_date_interval("500ms"), Some(500));
        assert_eq!(parse_date_interval("5s"), Some(5_000));
        assert_eq!(parse_date_interval("2m"), Some(120_000));
        assert_eq!(parse_date_interval("1h"), Some(3_600_000));
        assert_eq!(parse_date_interval("1d"), Some(86_400_000));
        assert_eq!(parse_date_interval("1w"), None);
        assert_eq!(parse_date_interval("0s"), None);
        assert_eq!(parse_date_interval("m"), None);
    }

    #[test]
    fn test_histogram_requires_positive_interval() {
        let body = json!({"aggs": {"h": {"histogram": {"field": "price", "interval": 0}}}});
        let err = parse_search_request(&body).expect_err("must reject");
        assert!(err.to_string().contains("interval"));
    }

    #[test]
    fn test_nested_query_parses() {
        let body = json!({"query": {"nested": {"path": "comments", "query": {"match_all": {}}}}});
        let request = parse_search_request(&body).expect("parse");
        assert!(matches!(request.query, Query::Nested { .. }));
    }

    #[test]
    fn test_source_spec_forms() {
        let body = json!({"_source": false});
        assert_eq!(
            parse_search_request(&body).expect("parse").source,
            SourceSpec::Enabled(false)
        );

        let body = json!({"_source": ["name", "price"]});
        assert_eq!(
            parse_search_request(&body).expect("parse").source,
            SourceSpec::Include(vec!["name".to_string(), "price".to_string()])
        );
    }

    #[test]
    fn test_fuzzy_shorthand_and_object() {
        let body = json!({"query": {"fuzzy": {"title": "laptap"}}});
        let request = parse_search_request(&body).expect("parse");
        assert!(matches!(request.query, Query::Fuzzy { fuzziness: 2, .. }));

        let body = json!({"query": {"fuzzy": {"title": {"value": "laptap", "fuzziness": 1}}}});
        let request = parse_search_request(&body).expect("parse");
        assert!(matches!(request.query, Query::Fuzzy { fuzziness: 1, .. }));
    }
}
