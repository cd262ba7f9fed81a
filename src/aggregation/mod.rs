//! Aggregation kernels.
//!
//! Every aggregation type splits into a per-shard partial and a reduction
//! law. Partials are associative and commutative over shards, so the merged
//! result is identical regardless of arrival order; the reduction-law
//! property tests in `tests/` hold the kernels to that.
//!
//! Shard side: `PartialAgg::new` then `collect` per matching document, then
//! `seal` before the partial goes on the wire. Coordinator side: `merge`
//! pairwise, then `finalize` into the response shape.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dsl::AggSpec;
use crate::error::{Result, SearchError};

/// Per-shard intermediate aggregation state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PartialAgg {
    Terms {
        counts: BTreeMap<String, u64>,
        /// Sum over all buckets on the shard, including truncated ones.
        total: u64,
    },
    Stats {
        count: u64,
        sum: f64,
        min: Option<f64>,
        max: Option<f64>,
    },
    ExtendedStats {
        count: u64,
        sum: f64,
        min: Option<f64>,
        max: Option<f64>,
        sum_of_squares: f64,
    },
    Sum {
        value: f64,
    },
    Avg {
        sum: f64,
        count: u64,
    },
    Min {
        value: Option<f64>,
    },
    Max {
        value: Option<f64>,
    },
    ValueCount {
        count: u64,
    },
    /// Exact distinct values, keyed by canonical string form.
    Cardinality {
        values: BTreeSet<String>,
    },
    /// Sorted once sealed; merged by merge-sort then interpolated.
    Percentiles {
        samples: Vec<f64>,
    },
    /// Keyed by bucket index: floor(v / interval).
    Histogram {
        interval: f64,
        counts: BTreeMap<i64, u64>,
    },
    /// Keyed by bucket start in epoch milliseconds.
    DateHistogram {
        interval_ms: u64,
        counts: BTreeMap<i64, u64>,
    },
}

impl PartialAgg {
    /// Empty partial for a spec.
    pub fn new(spec: &AggSpec) -> PartialAgg {
        match spec {
            AggSpec::Terms { .. } => PartialAgg::Terms {
                counts: BTreeMap::new(),
                total: 0,
            },
            AggSpec::Stats { .. } => PartialAgg::Stats {
                count: 0,
                sum: 0.0,
                min: None,
                max: None,
            },
            AggSpec::ExtendedStats { .. } => PartialAgg::ExtendedStats {
                count: 0,
                sum: 0.0,
                min: None,
                max: None,
                sum_of_squares: 0.0,
            },
            AggSpec::Sum { .. } => PartialAgg::Sum { value: 0.0 },
            AggSpec::Avg { .. } => PartialAgg::Avg { sum: 0.0, count: 0 },
            AggSpec::Min { .. } => PartialAgg::Min { value: None },
            AggSpec::Max { .. } => PartialAgg::Max { value: None },
            AggSpec::ValueCount { .. } => PartialAgg::ValueCount { count: 0 },
            AggSpec::Cardinality { .. } => PartialAgg::Cardinality {
                values: BTreeSet::new(),
            },
            AggSpec::Percentiles { .. } => PartialAgg::Percentiles {
                samples: Vec::new(),
            },
            AggSpec::Histogram { interval, .. } => PartialAgg::Histogram {
                interval: *interval,
                counts: BTreeMap::new(),
            },
            AggSpec::DateHistogram { interval_ms, .. } => PartialAgg::DateHistogram {
                interval_ms: *interval_ms,
                counts: BTreeMap::new(),
            },
        }
    }

    /// Fold one document's field value into the partial. Null and missing
    /// values are skipped by the caller; non-coercible values are skipped
    /// here.
    pub fn collect(&mut self, value: &Value) {
        match self {
            PartialAgg::Terms { counts, total } => {
                if let Some(key) = terms_key(value) {
                    *counts.entry(key).or_insert(0) += 1;
                    *total += 1;
                }
            }
            PartialAgg::Stats { count, sum, min, max } => {
                if let Some(v) = numeric(value) {
                    *count += 1;
                    *sum += v;
                    *min = Some(min.map_or(v, |m| m.min(v)));
                    *max = Some(max.map_or(v, |m| m.max(v)));
                }
            }
            PartialAgg::ExtendedStats {
                count,
                sum,
                min,
                max,
                sum_of_squares,
            } => {
                if let Some(v) = numeric(value) {
                    *count += 1;
                    *sum += v;
                    *sum_of_squares += v * v;
                    *min = Some(min.map_or(v, |m| m.min(v)));
                    *max = Some(max.map_or(v, |m| m.max(v)));
                }
            }
            PartialAgg::Sum { value: acc } => {
                if let Some(v) = numeric(value) {
                    *acc += v;
                }
            }
            PartialAgg::Avg { sum, count } => {
                if let Some(v) = numeric(value) {
                    *sum += v;
                    *count += 1;
                }
            }
            PartialAgg::Min { value: acc } => {
                if let Some(v) = numeric(value) {
                    *acc = Some(acc.map_or(v, |m| m.min(v)));
                }
            }
            PartialAgg::Max { value: acc } => {
                if let Some(v) = numeric(value) {
                    *acc = Some(acc.map_or(v, |m| m.max(v)));
                }
            }
            PartialAgg::ValueCount { count } => {
                if !value.is_null() {
                    *count += 1;
                }
            }
            PartialAgg::Cardinality { values } => {
                if let Some(key) = terms_key(value) {
                    values.insert(key);
                }
            }
            PartialAgg::Percentiles { samples } => {
                if let Some(v) = numeric(value) {
                    samples.push(v);
                }
            }
            PartialAgg::Histogram { interval, counts } => {
                if let Some(v) = numeric(value) {
                    let bucket = (v / *interval).floor() as i64;
                    *counts.entry(bucket).or_insert(0) += 1;
                }
            }
            PartialAgg::DateHistogram {
                interval_ms,
                counts,
            } => {
                if let Some(ms) = epoch_millis(value) {
                    let interval = *interval_ms as i64;
                    let bucket = ms.div_euclid(interval) * interval;
                    *counts.entry(bucket).or_insert(0) += 1;
                }
            }
        }
    }

    /// Final shard-side pass before the partial goes on the wire: sort the
    /// percentile samples and truncate terms buckets to the shard size.
    pub fn seal(&mut self, terms_shard_size: usize) {
        match self {
            PartialAgg::Percentiles { samples } => {
                samples.sort_by(f64::total_cmp);
            }
            PartialAgg::Terms { counts, .. } => {
                if counts.len() > terms_shard_size {
                    let mut buckets: Vec<(String, u64)> =
                        counts.iter().map(|(k, v)| (k.clone(), *v)).collect();
                    // count desc, then key asc for determinism
                    buckets.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
                    buckets.truncate(terms_shard_size);
                    *counts = buckets.into_iter().collect();
                }
            }
            _ => {}
        }
    }

    /// Reduce another shard's partial into this one.
    pub fn merge(&mut self, other: PartialAgg) -> Result<()> {
        match (self, other) {
            (
                PartialAgg::Terms { counts, total },
                PartialAgg::Terms {
                    counts: other_counts,
                    total: other_total,
                },
            ) => {
                for (key, count) in other_counts {
                    *counts.entry(key).or_insert(0) += count;
                }
                *total += other_total;
            }
            (
                PartialAgg::Stats { count, sum, min, max },
                PartialAgg::Stats {
                    count: c2,
                    sum: s2,
                    min: min2,
                    max: max2,
                },
            ) => {
                *count += c2;
                *sum += s2;
                *min = merge_min(*min, min2);
                *max = merge_max(*max, max2);
            }
            (
                PartialAgg::ExtendedStats {
                    count,
                    sum,
                    min,
                    max,
                    sum_of_squares,
                },
                PartialAgg::ExtendedStats {
                    count: c2,
                    sum: s2,
                    min: min2,
                    max: max2,
                    sum_of_squares: sq2,
                },
            ) => {
                *count += c2;
                *sum += s2;
                *sum_of_squares += sq2;
                *min = merge_min(*min, min2);
                *max = merge_max(*max, max2);
            }
            (PartialAgg::Sum { value }, PartialAgg::Sum { value: v2 }) => *value += v2,
            (
                PartialAgg::Avg { sum, count },
                PartialAgg::Avg {
                    sum: s2,
                    count: c2,
                },
            ) => {
                *sum += s2;
                *count += c2;
            }
            (PartialAgg::Min { value }, PartialAgg::Min { value: v2 }) => {
                *value = merge_min(*value, v2);
            }
            (PartialAgg::Max { value }, PartialAgg::Max { value: v2 }) => {
                *value = merge_max(*value, v2);
            }
            (PartialAgg::ValueCount { count }, PartialAgg::ValueCount { count: c2 }) => {
                *count += c2;
            }
            (PartialAgg::Cardinality { values }, PartialAgg::Cardinality { values: v2 }) => {
                values.extend(v2);
            }
            (PartialAgg::Percentiles { samples }, PartialAgg::Percentiles { samples: s2 }) => {
                samples.extend(s2);
                samples.sort_by(f64::total_cmp);
            }
            (
                PartialAgg::Histogram { counts, .. },
                PartialAgg::Histogram {
                    counts: other_counts,
                    ..
                },
            ) => {
                for (key, count) in other_counts {
                    *counts.entry(key).or_insert(0) += count;
                }
            }
            (
                PartialAgg::DateHistogram { counts, .. },
                PartialAgg::DateHistogram {
                    counts: other_counts,
                    ..
                },
            ) => {
                for (key, count) in other_counts {
                    *counts.entry(key).or_insert(0) += count;
                }
            }
            (mine, theirs) => {
                return Err(SearchError::internal(format!(
                    "mismatched aggregation partials: {mine:?} vs {theirs:?}"
                )));
            }
        }
        Ok(())
    }

    /// Turn the fully merged partial into the response shape.
    pub fn finalize(self, spec: &AggSpec) -> AggregationResult {
        match (self, spec) {
            (PartialAgg::Terms { counts, total }, spec) => {
                let size = match spec {
                    AggSpec::Terms { size, .. } => *size,
                    _ => crate::dsl::DEFAULT_TERMS_SIZE,
                };
                let mut buckets: Vec<(String, u64)> = counts.into_iter().collect();
                buckets.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
                buckets.truncate(size);
                let returned: u64 = buckets.iter().map(|(_, count)| count).sum();
                AggregationResult::Terms {
                    buckets: buckets
                        .into_iter()
                        .map(|(key, doc_count)| TermsBucket { key, doc_count })
                        .collect(),
                    sum_other_doc_count: total.saturating_sub(returned),
                }
            }
            (PartialAgg::Stats { count, sum, min, max }, _) => AggregationResult::Stats {
                count,
                min,
                max,
                avg: average(sum, count),
                sum,
            },
            (
                PartialAgg::ExtendedStats {
                    count,
                    sum,
                    min,
                    max,
                    sum_of_squares,
                },
                _,
            ) => {
                let avg = average(sum, count);
                // variance = E[X^2] - E[X]^2
                let variance = avg.map(|mean| {
                    (sum_of_squares / count as f64 - mean * mean).max(0.0)
                });
                let std_deviation = variance.map(f64::sqrt);
                let bounds = avg.zip(std_deviation).map(|(mean, std)| {
                    StdDeviationBounds {
                        upper: mean + 2.0 * std,
                        lower: mean - 2.0 * std,
                    }
                });
                AggregationResult::ExtendedStats {
                    count,
                    min,
                    max,
                    avg,
                    sum,
                    sum_of_squares,
                    variance,
                    std_deviation,
                    std_deviation_bounds: bounds,
                }
            }
            (PartialAgg::Sum { value }, _) => AggregationResult::Value { value: Some(value) },
            (PartialAgg::Avg { sum, count }, _) => AggregationResult::Value {
                value: average(sum, count),
            },
            (PartialAgg::Min { value }, _) | (PartialAgg::Max { value }, _) => {
                AggregationResult::Value { value }
            }
            (PartialAgg::ValueCount { count }, _) => AggregationResult::Value {
                value: Some(count as f64),
            },
            (PartialAgg::Cardinality { values }, _) => AggregationResult::Value {
                value: Some(values.len() as f64),
            },
            (PartialAgg::Percentiles { samples }, spec) => {
                let percents = match spec {
                    AggSpec::Percentiles { percents, .. } => percents.clone(),
                    _ => crate::dsl::DEFAULT_PERCENTS.to_vec(),
                };
                let values = percents
                    .iter()
                    .map(|p| (format_percent(*p), percentile(&samples, *p)))
                    .collect();
                AggregationResult::Percentiles { values }
            }
            (PartialAgg::Histogram { interval, counts }, _) => AggregationResult::Histogram {
                buckets: counts
                    .into_iter()
                    .map(|(bucket, doc_count)| HistogramBucket {
                        key: bucket as f64 * interval,
                        doc_count,
                    })
                    .collect(),
            },
            (PartialAgg::DateHistogram { counts, .. }, _) => AggregationResult::DateHistogram {
                buckets: counts
                    .into_iter()
                    .map(|(key, doc_count)| DateHistogramBucket {
                        key,
                        key_as_string: iso_key(key),
                        doc_count,
                    })
                    .collect(),
            },
        }
    }
}

/// Final aggregation result, one variant per response shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AggregationResult {
    Terms {
        buckets: Vec<TermsBucket>,
        sum_other_doc_count: u64,
    },
    ExtendedStats {
        count: u64,
        min: Option<f64>,
        max: Option<f64>,
        avg: Option<f64>,
        sum: f64,
        sum_of_squares: f64,
        variance: Option<f64>,
        std_deviation: Option<f64>,
        std_deviation_bounds: Option<StdDeviationBounds>,
    },
    Stats {
        count: u64,
        min: Option<f64>,
        max: Option<f64>,
        avg: Option<f64>,
        sum: f64,
    },
    Percentiles {
        values: BTreeMap<String, Option<f64>>,
    },
    Histogram {
        buckets: Vec<HistogramBucket>,
    },
    DateHistogram {
        buckets: Vec<DateHistogramBucket>,
    },
    Value {
        value: Option<f64>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TermsBucket {
    pub key: String,
    pub doc_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramBucket {
    pub key: f64,
    pub doc_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DateHistogramBucket {
    pub key: i64,
    pub key_as_string: String,
    pub doc_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StdDeviationBounds {
    pub upper: f64,
    pub lower: f64,
}

fn average(sum: f64, count: u64) -> Option<f64> {
    (count > 0).then(|| sum / count as f64)
}

fn merge_min(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

fn merge_max(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

/// Linear interpolation over sorted samples.
fn percentile(sorted: &[f64], percent: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    if sorted.len() == 1 {
        return Some(sorted[0]);
    }
    let rank = percent / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        return Some(sorted[lower]);
    }
    let weight = rank - lower as f64;
    Some(sorted[lower] * (1.0 - weight) + sorted[upper] * weight)
}

fn format_percent(p: f64) -> String {
    if p.fract() == 0.0 {
        format!("{:.1}", p)
    } else {
        format!("{}", p)
    }
}

/// Canonical string key for terms and cardinality values.
fn terms_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn numeric(value: &Value) -> Option<f64> {
    value.as_f64()
}

/// Coerce a document value to epoch milliseconds: numbers directly,
/// strings via RFC 3339.
fn epoch_millis(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => chrono::DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.timestamp_millis()),
        _ => None,
    }
}

/// ISO-8601 key for a date_histogram bucket start.
fn iso_key(ms: i64) -> String {
    match Utc.timestamp_millis_opt(ms).single() {
        Some(dt) => dt.to_rfc3339_opts(SecondsFormat::Millis, true),
        None => ms.to_string(),
    }
}
