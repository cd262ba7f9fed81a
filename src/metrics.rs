//! Process-wide counters surfaced by the `/metrics` endpoint.
//!
//! All counters are lock-free atomics; nothing here is held across an await.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::Serialize;

use crate::error::ShardErrorKind;

/// Lock-free metric counters shared across all requests.
pub struct Metrics {
    started_at: Instant,

    pub searches_total: AtomicU64,
    pub searches_failed: AtomicU64,
    pub searches_timed_out: AtomicU64,

    pub documents_indexed: AtomicU64,

    pub shard_client_not_found: AtomicU64,
    pub shard_connection_failed: AtomicU64,
    pub shard_search_failed: AtomicU64,

    pub pipeline_executions: AtomicU64,
    pub pipeline_failures: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Metrics {
            started_at: Instant::now(),
            searches_total: AtomicU64::new(0),
            searches_failed: AtomicU64::new(0),
            searches_timed_out: AtomicU64::new(0),
            documents_indexed: AtomicU64::new(0),
            shard_client_not_found: AtomicU64::new(0),
            shard_connection_failed: AtomicU64::new(0),
            shard_search_failed: AtomicU64::new(0),
            pipeline_executions: AtomicU64::new(0),
            pipeline_failures: AtomicU64::new(0),
        }
    }

    pub fn record_shard_failure(&self, kind: ShardErrorKind) {
        let counter = match kind {
            ShardErrorKind::ClientNotFound => &self.shard_client_not_found,
            ShardErrorKind::ConnectionFailed => &self.shard_connection_failed,
            ShardErrorKind::SearchFailed => &self.shard_search_failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.started_at.elapsed().as_secs(),
            searches_total: self.searches_total.load(Ordering::Relaxed),
            searches_failed: self.searches_failed.load(Ordering::Relaxed),
            searches_timed_out: self.searches_timed_out.load(Ordering::Relaxed),
            documents_indexed: self.documents_indexed.load(Ordering::Relaxed),
            shard_failures: ShardFailureCounts {
                client_not_found: self.shard_client_not_found.load(Ordering::Relaxed),
                connection_failed: self.shard_connection_failed.load(Ordering::Relaxed),
                search_failed: self.shard_search_failed.load(Ordering::Relaxed),
            },
            pipeline_executions: self.pipeline_executions.load(Ordering::Relaxed),
            pipeline_failures: self.pipeline_failures.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time counter values for the metrics endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub searches_total: u64,
    pub searches_failed: u64,
    pub searches_timed_out: u64,
    pub documents_indexed: u64,
    pub shard_failures: ShardFailureCounts,
    pub pipeline_executions: u64,
    pub pipeline_failures: u64,
}

/// Shard failure counts by classification.
#[derive(Debug, Clone, Serialize)]
pub struct ShardFailureCounts {
    pub client_not_found: u64,
    pub connection_failed: u64,
    pub search_failed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shard_failure_routing() {
        let metrics = Metrics::new();
        metrics.record_shard_failure(ShardErrorKind::ConnectionFailed);
        metrics.record_shard_failure(ShardErrorKind::ConnectionFailed);
        metrics.record_shard_failure(ShardErrorKind::SearchFailed);

        let snap = metrics.snapshot();
        assert_eq!(snap.shard_failures.connection_failed, 2);
        assert_eq!(snap.shard_failures.search_failed, 1);
        assert_eq!(snap.shard_failures.client_not_found, 0);
    }

    #[test]
    fn test_snapshot_serializes() {
        let metrics = Metrics::new();
        metrics.searches_total.fetch_add(5, Ordering::Relaxed);
        let json = serde_json::to_value(metrics.snapshot()).expect("serialize");
        assert_eq!(json["searches_total"], 5);
    }
}
