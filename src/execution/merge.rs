//! Result merger.
//!
//! Performs the K-way merge of pre-sorted per-shard hit lists and reduces
//! per-shard partial aggregations into finals. Ties break by the next sort
//! key in order, then by (shard_id, doc_id), so the merged result is
//! byte-identical for any arrival order of the same partials.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap};

use serde::Serialize;
use serde_json::Value;

use crate::aggregation::{AggregationResult, PartialAgg};
use crate::cluster::ShardId;
use crate::dsl::{AggSpec, SortKey, SortOrder, SourceSpec};
use crate::error::Result;
use crate::execution::dispatcher::{DispatchOutcome, ShardFailureInfo};
use crate::node::{Document, ShardHit, SortValue};

/// Final response of one search.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub took_ms: u64,
    pub timed_out: bool,
    #[serde(rename = "_shards")]
    pub shards: ShardTallies,
    pub hits: SearchHits,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregations: Option<BTreeMap<String, AggregationResult>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ShardTallies {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<ShardFailureInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHits {
    pub total: u64,
    pub max_score: Option<f64>,
    pub hits: Vec<Hit>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Hit {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_score")]
    pub score: f64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sort: Vec<Value>,
    #[serde(rename = "_source", skip_serializing_if = "Option::is_none")]
    pub source: Option<Document>,
}

/// Everything the merger needs besides the shard outcomes.
pub struct MergeSpec<'a> {
    pub from: usize,
    pub size: usize,
    /// Requested sort keys; empty means score-descending.
    pub sort: &'a [SortKey],
    pub aggs: &'a BTreeMap<String, AggSpec>,
    pub source: &'a SourceSpec,
    pub total_shards: usize,
    pub timed_out: bool,
    pub took_ms: u64,
}

/// Merge per-shard outcomes into the final response.
pub fn merge(outcome: DispatchOutcome, spec: &MergeSpec<'_>) -> Result<SearchResponse> {
    let sort_keys = crate::node::engine::effective_sort(spec.sort);

    let total: u64 = outcome
        .successes
        .iter()
        .map(|(_, response)| response.total_hits)
        .sum();
    let max_score = outcome
        .successes
        .iter()
        .filter_map(|(_, response)| response.max_score)
        .fold(None, |acc: Option<f64>, score| {
            Some(acc.map_or(score, |m| m.max(score)))
        });

    let merged_hits = k_way_merge(&outcome.successes, &sort_keys, spec.from + spec.size);
    let hits = merged_hits
        .into_iter()
        .skip(spec.from)
        .map(|(_, hit)| to_response_hit(hit, spec.source))
        .collect();

    let aggregations = reduce_aggregations(&outcome.successes, spec.aggs)?;

    Ok(SearchResponse {
        took_ms: spec.took_ms,
        timed_out: spec.timed_out,
        shards: ShardTallies {
            total: spec.total_shards,
            successful: outcome.successes.len(),
            failed: outcome.failures.len(),
            failures: outcome.failures,
        },
        hits: SearchHits {
            total,
            max_score,
            hits,
        },
        aggregations,
    })
}

/// Heap-based K-way merge over the pre-sorted shard hit lists, bounded at
/// `depth` rows.
fn k_way_merge(
    successes: &[(ShardId, crate::node::ShardSearchResponse)],
    sort_keys: &[SortKey],
    depth: usize,
) -> Vec<(ShardId, ShardHit)> {
    struct HeapEntry {
        key: MergeKey,
        queue: usize,
        position: usize,
    }

    impl PartialEq for HeapEntry {
        fn eq(&self, other: &Self) -> bool {
            self.key == other.key
        }
    }
    impl Eq for HeapEntry {}
    impl PartialOrd for HeapEntry {
        fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
            Some(self.cmp(other))
        }
    }
    impl Ord for HeapEntry {
        fn cmp(&self, other: &Self) -> Ordering {
            // BinaryHeap is a max-heap; invert so the smallest key pops.
            other.key.cmp(&self.key)
        }
    }

    let mut heap = BinaryHeap::with_capacity(successes.len());
    for (queue, (shard, response)) in successes.iter().enumerate() {
        if let Some(hit) = response.hits.first() {
            heap.push(HeapEntry {
                key: MergeKey::new(hit, *shard, sort_keys),
                queue,
                position: 0,
            });
        }
    }

    let mut merged = Vec::with_capacity(depth.min(64));
    while merged.len() < depth {
        let Some(entry) = heap.pop() else {
            break;
        };
        let (shard, response) = &successes[entry.queue];
        merged.push((*shard, response.hits[entry.position].clone()));

        let next = entry.position + 1;
        if let Some(hit) = response.hits.get(next) {
            heap.push(HeapEntry {
                key: MergeKey::new(hit, *shard, sort_keys),
                queue: entry.queue,
                position: next,
            });
        }
    }
    merged
}

/// Comparable merge key: the hit's sort values with per-key direction
/// applied, then (shard_id, doc_id) for the deterministic final tie-break.
#[derive(PartialEq, Eq)]
struct MergeKey {
    values: Vec<Directed>,
    shard: ShardId,
    id: String,
}

impl MergeKey {
    fn new(hit: &ShardHit, shard: ShardId, keys: &[SortKey]) -> Self {
        MergeKey {
            values: keys
                .iter()
                .enumerate()
                .map(|(i, key)| {
                    let value = hit.sort_values.get(i).cloned().unwrap_or(SortValue::Null);
                    match key.order {
                        SortOrder::Asc => Directed::Asc(value),
                        SortOrder::Desc => Directed::Desc(value),
                    }
                })
                .collect(),
            shard,
            id: hit.id.clone(),
        }
    }
}

impl PartialOrd for MergeKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MergeKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.values
            .cmp(&other.values)
            .then_with(|| self.shard.cmp(&other.shard))
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// A sort value with its direction baked into the ordering.
#[derive(PartialEq, Eq)]
enum Directed {
    Asc(SortValue),
    Desc(SortValue),
}

impl PartialOrd for Directed {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Directed {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Directed::Asc(a), Directed::Asc(b)) => a.cmp(b),
            (Directed::Desc(a), Directed::Desc(b)) => b.cmp(a),
            // Mixed directions cannot happen for one key position.
            (Directed::Asc(a), Directed::Desc(b)) | (Directed::Desc(b), Directed::Asc(a)) => {
                a.cmp(b)
            }
        }
    }
}

fn to_response_hit(hit: ShardHit, source_spec: &SourceSpec) -> Hit {
    let sort = hit
        .sort_values
        .iter()
        .map(|value| match value {
            SortValue::Null => Value::Null,
            SortValue::Bool(b) => Value::Bool(*b),
            SortValue::Num(n) => serde_json::Number::from_f64(*n)
                .map_or(Value::Null, Value::Number),
            SortValue::Str(s) => Value::String(s.clone()),
        })
        .collect();
    let source = match source_spec {
        SourceSpec::Enabled(false) => None,
        SourceSpec::Enabled(true) => Some(hit.source),
        SourceSpec::Include(fields) => {
            let mut source = hit.source;
            source.retain(|key, _| fields.contains(key));
            Some(source)
        }
    };
    Hit {
        id: hit.id,
        score: hit.score,
        sort,
        source,
    }
}

/// Reduce each aggregation's per-shard partials and finalize. Folding runs
/// in shard-id order (the successes are pre-sorted), though the kernels
/// are order-independent anyway.
fn reduce_aggregations(
    successes: &[(ShardId, crate::node::ShardSearchResponse)],
    specs: &BTreeMap<String, AggSpec>,
) -> Result<Option<BTreeMap<String, AggregationResult>>> {
    if specs.is_empty() {
        return Ok(None);
    }
    let mut results = BTreeMap::new();
    for (name, spec) in specs {
        let mut acc = PartialAgg::new(spec);
        for (_, response) in successes {
            if let Some(partial) = response.partial_aggs.get(name) {
                acc.merge(partial.clone())?;
            }
        }
        results.insert(name.clone(), acc.finalize(spec));
    }
    Ok(Some(results))
}
