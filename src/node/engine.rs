//! In-memory shard engine.
//!
//! The per-shard index engine is an external collaborator of the
//! coordinator; this stand-in accepts a plan fragment and returns hits and
//! partial aggregations over an in-memory document store. Documents are
//! kept in a BTreeMap so iteration order, and with it every tie-break, is
//! deterministic.

use std::collections::BTreeMap;
use std::time::Instant;

use parking_lot::RwLock;
use serde_json::Value;

use crate::aggregation::PartialAgg;
use crate::dsl::{SortKey, SortOrder};
use crate::error::{Result, SearchError};
use crate::execution::timeout::Deadline;
use crate::node::{Document, ShardHit, ShardSearchResponse, ShardStats, SortValue};
use crate::plan::expr::Expr;
use crate::plan::physical::ShardFragment;

const DEADLINE_CHECK_EVERY: usize = 1024;

/// One shard's documents plus fragment execution over them.
pub struct ShardEngine {
    docs: RwLock<BTreeMap<String, Document>>,
}

impl ShardEngine {
    pub fn new() -> Self {
        ShardEngine {
            docs: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn index(&self, id: &str, source: Document) {
        self.docs.write().insert(id.to_string(), source);
    }

    pub fn get(&self, id: &str) -> Option<Document> {
        self.docs.read().get(id).cloned()
    }

    pub fn delete(&self, id: &str) -> bool {
        self.docs.write().remove(id).is_some()
    }

    pub fn doc_count(&self) -> u64 {
        self.docs.read().len() as u64
    }

    /// Execute a plan fragment: filter, score, sort, cut to fetch depth,
    /// and fold partial aggregations over all matches.
    pub fn execute(
        &self,
        fragment: &ShardFragment,
        deadline: &Deadline,
    ) -> Result<ShardSearchResponse> {
        let start = Instant::now();
        let docs = self.docs.read();

        let mut partials: BTreeMap<String, PartialAgg> = fragment
            .aggs
            .iter()
            .map(|(name, spec)| (name.clone(), PartialAgg::new(spec)))
            .collect();

        // The advisory cap only applies when nothing downstream needs the
        // full match set.
        let advisory_cap = if fragment.sort.is_empty() && fragment.aggs.is_empty() {
            fragment.limit_hint
        } else {
            None
        };

        let mut matches: Vec<(String, f64)> = Vec::new();
        let mut total_hits = 0u64;
        let mut max_score: Option<f64> = None;

        for (scanned, (id, source)) in docs.iter().enumerate() {
            if scanned % DEADLINE_CHECK_EVERY == 0 {
                deadline.check().map_err(|_| SearchError::TimedOut {
                    timeout_ms: deadline.budget_millis().unwrap_or(0),
                })?;
            }

            let Some(score) = eval(&fragment.filter, id, source) else {
                continue;
            };
            total_hits += 1;
            max_score = Some(max_score.map_or(score, |m| m.max(score)));

            for (name, spec) in &fragment.aggs {
                if let Some(partial) = partials.get_mut(name) {
                    collect_field(partial, source, spec.field());
                }
            }

            matches.push((id.clone(), score));
            if let Some(cap) = advisory_cap {
                if matches.len() >= cap {
                    break;
                }
            }
        }

        // Pre-sort by the requested keys (score descending when none), with
        // the document id as the final shard-local tie-break.
        let sort_keys = effective_sort(&fragment.sort);
        let mut hits: Vec<ShardHit> = matches
            .into_iter()
            .map(|(id, score)| {
                let source = docs.get(&id).cloned().unwrap_or_default();
                let sort_values = sort_keys
                    .iter()
                    .map(|key| sort_value(key, score, &source))
                    .collect();
                ShardHit {
                    id,
                    score,
                    sort_values,
                    source,
                }
            })
            .collect();
        hits.sort_by(|a, b| {
            compare_sort_values(&a.sort_values, &b.sort_values, &sort_keys)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(fragment.fetch);

        if let Some(projected) = &fragment.projected {
            for hit in &mut hits {
                hit.source.retain(|key, _| projected.contains(key));
            }
        }

        for partial in partials.values_mut() {
            partial.seal(fragment.terms_shard_size);
        }

        Ok(ShardSearchResponse {
            hits,
            total_hits,
            max_score,
            partial_aggs: partials,
            stats: ShardStats {
                doc_count: docs.len() as u64,
                took_ms: start.elapsed().as_millis() as u64,
            },
        })
    }
}

impl Default for ShardEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Sort keys with the default relevance order applied when none requested.
pub fn effective_sort(keys: &[SortKey]) -> Vec<SortKey> {
    if keys.is_empty() {
        vec![SortKey::score_desc()]
    } else {
        keys.to_vec()
    }
}

/// Value of one sort key for a hit.
pub fn sort_value(key: &SortKey, score: f64, source: &Document) -> SortValue {
    if key.is_score() {
        SortValue::Num(score)
    } else {
        field_value(source, &key.field).map_or(SortValue::Null, SortValue::from_json)
    }
}

/// Compare two hits' precomputed sort values under the per-key orders.
pub fn compare_sort_values(
    a: &[SortValue],
    b: &[SortValue],
    keys: &[SortKey],
) -> std::cmp::Ordering {
    for (i, key) in keys.iter().enumerate() {
        let (left, right) = match (a.get(i), b.get(i)) {
            (Some(left), Some(right)) => (left, right),
            _ => return std::cmp::Ordering::Equal,
        };
        let ordering = match key.order {
            SortOrder::Asc => left.cmp(right),
            SortOrder::Desc => right.cmp(left),
        };
        if ordering != std::cmp::Ordering::Equal {
            return ordering;
        }
    }
    std::cmp::Ordering::Equal
}

/// Resolve a possibly dotted field path.
pub fn field_value<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = doc.get(first)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Fold a document's field value into a partial aggregation; array fields
/// contribute each element.
fn collect_field(partial: &mut PartialAgg, source: &Document, field: &str) {
    match field_value(source, field) {
        Some(Value::Array(items)) => {
            for item in items {
                if !item.is_null() {
                    partial.collect(item);
                }
            }
        }
        Some(value) if !value.is_null() => partial.collect(value),
        _ => {}
    }
}

/// Evaluate a predicate against one document. `None` means no match;
/// `Some(score)` carries a simple additive relevance score.
pub fn eval(expr: &Expr, id: &str, doc: &Document) -> Option<f64> {
    match expr {
        Expr::True => Some(1.0),
        Expr::Term { field, value } => {
            let actual = field_value(doc, field)?;
            values_equal(actual, value).then_some(1.0)
        }
        Expr::Terms { field, values } => {
            let actual = field_value(doc, field)?;
            values
                .iter()
                .any(|candidate| values_equal(actual, candidate))
                .then_some(1.0)
        }
        Expr::Range {
            field,
            gt,
            gte,
            lt,
            lte,
        } => {
            let actual = SortValue::from_json(field_value(doc, field)?);
            if actual == SortValue::Null {
                return None;
            }
            let within = gt.iter().all(|b| actual > SortValue::from_json(b))
                && gte.iter().all(|b| actual >= SortValue::from_json(b))
                && lt.iter().all(|b| actual < SortValue::from_json(b))
                && lte.iter().all(|b| actual <= SortValue::from_json(b));
            within.then_some(1.0)
        }
        Expr::Exists { field } => field_value(doc, field)
            .filter(|value| !value.is_null())
            .map(|_| 1.0),
        Expr::Prefix { field, value } => {
            let actual = field_value(doc, field)?.as_str()?;
            actual.starts_with(value.as_str()).then_some(1.0)
        }
        Expr::Wildcard { field, pattern } => {
            let actual = field_value(doc, field)?.as_str()?;
            wildcard_match(pattern, actual).then_some(1.0)
        }
        Expr::Match { field, query } => match_score(doc, field, query),
        Expr::MatchPhrase { field, query } => {
            let text = text_for_field(doc, field)?;
            let field_tokens = tokenize(&text);
            let query_tokens = tokenize(query);
            if query_tokens.is_empty() {
                return None;
            }
            field_tokens
                .windows(query_tokens.len())
                .any(|window| window == query_tokens.as_slice())
                .then_some(query_tokens.len() as f64)
        }
        Expr::Fuzzy {
            field,
            value,
            fuzziness,
        } => {
            let text = text_for_field(doc, field)?;
            let target = value.to_lowercase();
            tokenize(&text)
                .iter()
                .any(|token| levenshtein(token, &target) <= *fuzziness as usize)
                .then_some(1.0)
        }
        Expr::Ids { values } => values.iter().any(|v| v == id).then_some(1.0),
        Expr::And(clauses) => {
            let mut score = 0.0;
            for clause in clauses {
                score += eval(clause, id, doc)?;
            }
            Some(score)
        }
        Expr::Or(clauses) => {
            let mut score = 0.0;
            let mut matched = false;
            for clause in clauses {
                if let Some(s) = eval(clause, id, doc) {
                    score += s;
                    matched = true;
                }
            }
            matched.then_some(score)
        }
        Expr::Not(inner) => match eval(inner, id, doc) {
            Some(_) => None,
            None => Some(0.0),
        },
        Expr::MinimumShould { min, clauses } => {
            let mut score = 0.0;
            let mut matched = 0u32;
            for clause in clauses {
                if let Some(s) = eval(clause, id, doc) {
                    score += s;
                    matched += 1;
                }
            }
            (matched >= *min).then_some(score)
        }
    }
}

/// Token-overlap match score: one point per query token present.
fn match_score(doc: &Document, field: &str, query: &str) -> Option<f64> {
    let text = text_for_field(doc, field)?;
    let field_tokens = tokenize(&text);
    let overlap = tokenize(query)
        .iter()
        .filter(|token| field_tokens.contains(token))
        .count();
    (overlap > 0).then_some(overlap as f64)
}

/// Text content of a field; `_all` concatenates every string in the
/// document.
fn text_for_field(doc: &Document, field: &str) -> Option<String> {
    if field == "_all" {
        let mut parts = Vec::new();
        collect_strings(doc.values(), &mut parts);
        if parts.is_empty() {
            return None;
        }
        return Some(parts.join(" "));
    }
    match field_value(doc, field)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn collect_strings<'a>(values: impl Iterator<Item = &'a Value>, out: &mut Vec<String>) {
    for value in values {
        match value {
            Value::String(s) => out.push(s.clone()),
            Value::Array(items) => collect_strings(items.iter(), out),
            Value::Object(obj) => collect_strings(obj.values(), out),
            _ => {}
        }
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Term equality with numeric coercion (1 == 1.0).
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// `*` matches any run, `?` a single character; everything else literal.
fn wildcard_match(pattern: &str, text: &str) -> bool {
    let mut regex = String::with_capacity(pattern.len() + 2);
    regex.push('^');
    for c in pattern.chars() {
        match c {
            '*' => regex.push_str(".*"),
            '?' => regex.push('.'),
            other => regex.push_str(&regex::escape(&other.to_string())),
        }
    }
    regex.push('$');
    regex::Regex::new(&regex).map(|re| re.is_match(text)).unwrap_or(false)
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution
                .min(previous[j + 1] + 1)
                .min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}
