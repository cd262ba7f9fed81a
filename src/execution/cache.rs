//! Two-level plan cache.
//!
//! Logical plans are keyed by a canonical fingerprint of the request with
//! pagination (from/size) excluded, so one cached plan serves every page.
//! Physical plans add the cost-model version and the routing-table version
//! to the key. Both levels are LRU; lookups that miss compute under the
//! level's lock, so two concurrent misses on one key produce one
//! computation and hand every caller the same plan instance.
//!
//! Invalidation: a routing version change evicts the index's physical
//! entries; a settings or pipeline-association change evicts its logical
//! entries (and with them, transitively, future physical hits).

use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;

use crate::dsl::SearchRequest;
use crate::error::Result;
use crate::plan::physical::PhysicalPlan;
use crate::plan::LogicalPlan;

/// Key of a physical plan entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PhysicalKey {
    pub logical_hash: u64,
    pub cost_model_version: u32,
    pub routing_version: u64,
}

struct LogicalEntry {
    index: String,
    plan: Arc<LogicalPlan>,
}

struct PhysicalEntry {
    index: String,
    plan: Arc<PhysicalPlan>,
}

/// Thread-safe two-level LRU plan cache.
pub struct PlanCache {
    logical: Mutex<LruCache<u64, LogicalEntry>>,
    physical: Mutex<LruCache<PhysicalKey, PhysicalEntry>>,
    logical_hits: AtomicU64,
    logical_misses: AtomicU64,
    physical_hits: AtomicU64,
    physical_misses: AtomicU64,
}

impl PlanCache {
    pub fn new(logical_capacity: usize, physical_capacity: usize) -> Self {
        PlanCache {
            logical: Mutex::new(LruCache::new(non_zero(logical_capacity))),
            physical: Mutex::new(LruCache::new(non_zero(physical_capacity))),
            logical_hits: AtomicU64::new(0),
            logical_misses: AtomicU64::new(0),
            physical_hits: AtomicU64::new(0),
            physical_misses: AtomicU64::new(0),
        }
    }

    /// Canonical fingerprint of a request against one index, with the
    /// volatile pagination fields excluded.
    pub fn logical_key(index: &str, request: &SearchRequest) -> u64 {
        #[derive(Serialize)]
        struct Fingerprint<'a> {
            index: &'a str,
            query: &'a crate::dsl::Query,
            aggs: &'a std::collections::BTreeMap<String, crate::dsl::AggSpec>,
            sort: &'a [crate::dsl::SortKey],
            source: &'a crate::dsl::SourceSpec,
        }
        let canonical = serde_json::to_string(&Fingerprint {
            index,
            query: &request.query,
            aggs: &request.aggs,
            sort: &request.sort,
            source: &request.source,
        })
        .unwrap_or_default();
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        canonical.hash(&mut hasher);
        hasher.finish()
    }

    /// Look up the optimized logical plan, computing and installing it on a
    /// miss. The level lock is held across `build`, which both serializes
    /// writers per cache and guarantees a single computation per key.
    pub fn get_or_build_logical<F>(
        &self,
        key: u64,
        index: &str,
        build: F,
    ) -> Result<Arc<LogicalPlan>>
    where
        F: FnOnce() -> Result<LogicalPlan>,
    {
        let mut cache = self.logical.lock();
        if let Some(entry) = cache.get(&key) {
            self.logical_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Arc::clone(&entry.plan));
        }
        self.logical_misses.fetch_add(1, Ordering::Relaxed);
        let plan = Arc::new(build()?);
        cache.put(
            key,
            LogicalEntry {
                index: index.to_string(),
                plan: Arc::clone(&plan),
            },
        );
        Ok(plan)
    }

    /// Physical-level counterpart of [`Self::get_or_build_logical`].
    pub fn get_or_build_physical<F>(
        &self,
        key: PhysicalKey,
        index: &str,
        build: F,
    ) -> Result<Arc<PhysicalPlan>>
    where
        F: FnOnce() -> Result<PhysicalPlan>,
    {
        let mut cache = self.physical.lock();
        if let Some(entry) = cache.get(&key) {
            self.physical_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Arc::clone(&entry.plan));
        }
        self.physical_misses.fetch_add(1, Ordering::Relaxed);
        let plan = Arc::new(build()?);
        cache.put(
            key,
            PhysicalEntry {
                index: index.to_string(),
                plan: Arc::clone(&plan),
            },
        );
        Ok(plan)
    }

    /// Drop the physical entries of one index (routing version changed).
    pub fn evict_physical_for(&self, index: &str) {
        let mut cache = self.physical.lock();
        let stale: Vec<PhysicalKey> = cache
            .iter()
            .filter(|(_, entry)| entry.index == index)
            .map(|(key, _)| *key)
            .collect();
        for key in stale {
            cache.pop(&key);
        }
    }

    /// Drop both levels for one index (schema or pipeline association
    /// changed).
    pub fn invalidate_index(&self, index: &str) {
        {
            let mut cache = self.logical.lock();
            let stale: Vec<u64> = cache
                .iter()
                .filter(|(_, entry)| entry.index == index)
                .map(|(key, _)| *key)
                .collect();
            for key in stale {
                cache.pop(&key);
            }
        }
        self.evict_physical_for(index);
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            logical_entries: self.logical.lock().len(),
            physical_entries: self.physical.lock().len(),
            logical_hits: self.logical_hits.load(Ordering::Relaxed),
            logical_misses: self.logical_misses.load(Ordering::Relaxed),
            physical_hits: self.physical_hits.load(Ordering::Relaxed),
            physical_misses: self.physical_misses.load(Ordering::Relaxed),
        }
    }
}

fn non_zero(capacity: usize) -> NonZeroUsize {
    NonZeroUsize::new(capacity.max(1)).expect("capacity clamped to at least 1")
}

/// Point-in-time cache statistics.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub logical_entries: usize,
    pub physical_entries: usize,
    pub logical_hits: u64,
    pub logical_misses: u64,
    pub physical_hits: u64,
    pub physical_misses: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::parse_search_request;
    use crate::plan::expr::Expr;
    use serde_json::json;

    fn scan(index: &str) -> LogicalPlan {
        LogicalPlan::Scan {
            index: index.to_string(),
            filter: Expr::True,
            limit_hint: None,
            projected: None,
        }
    }

    #[test]
    fn test_logical_key_ignores_pagination() {
        let page1 =
            parse_search_request(&json!({"query": {"term": {"a": 1}}, "from": 0, "size": 10}))
                .expect("parse");
        let page2 =
            parse_search_request(&json!({"query": {"term": {"a": 1}}, "from": 20, "size": 10}))
                .expect("parse");
        assert_eq!(
            PlanCache::logical_key("products", &page1),
            PlanCache::logical_key("products", &page2)
        );
    }

    #[test]
    fn test_logical_key_varies_with_query_and_index() {
        let a = parse_search_request(&json!({"query": {"term": {"a": 1}}})).expect("parse");
        let b = parse_search_request(&json!({"query": {"term": {"a": 2}}})).expect("parse");
        assert_ne!(
            PlanCache::logical_key("products", &a),
            PlanCache::logical_key("products", &b)
        );
        assert_ne!(
            PlanCache::logical_key("products", &a),
            PlanCache::logical_key("users", &a)
        );
    }

    #[test]
    fn test_miss_then_hit_returns_same_instance() {
        let cache = PlanCache::new(8, 8);
        let first = cache
            .get_or_build_logical(42, "products", || Ok(scan("products")))
            .expect("build");
        let second = cache
            .get_or_build_logical(42, "products", || {
                panic!("must not rebuild on hit")
            })
            .expect("hit");
        assert!(Arc::ptr_eq(&first, &second));

        let stats = cache.stats();
        assert_eq!(stats.logical_hits, 1);
        assert_eq!(stats.logical_misses, 1);
    }

    #[test]
    fn test_concurrent_misses_single_computation() {
        use std::sync::atomic::AtomicUsize;

        let cache = Arc::new(PlanCache::new(8, 8));
        let builds = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let builds = Arc::clone(&builds);
                std::thread::spawn(move || {
                    cache
                        .get_or_build_logical(7, "products", || {
                            builds.fetch_add(1, Ordering::SeqCst);
                            Ok(scan("products"))
                        })
                        .expect("build")
                })
            })
            .collect();

        let plans: Vec<Arc<LogicalPlan>> =
            handles.into_iter().map(|h| h.join().expect("join")).collect();

        assert_eq!(builds.load(Ordering::SeqCst), 1);
        for plan in &plans[1..] {
            assert!(Arc::ptr_eq(&plans[0], plan));
        }
    }

    #[test]
    fn test_lru_evicts_oldest() {
        let cache = PlanCache::new(2, 2);
        for key in 0..3u64 {
            cache
                .get_or_build_logical(key, "products", || Ok(scan("products")))
                .expect("build");
        }
        // Key 0 was evicted; rebuilding it counts as a fresh miss.
        let mut rebuilt = false;
        cache
            .get_or_build_logical(0, "products", || {
                rebuilt = true;
                Ok(scan("products"))
            })
            .expect("build");
        assert!(rebuilt);
    }

    #[test]
    fn test_physical_eviction_is_index_scoped() {
        let cache = PlanCache::new(8, 8);
        let key_a = PhysicalKey {
            logical_hash: 1,
            cost_model_version: 1,
            routing_version: 1,
        };
        let key_b = PhysicalKey {
            logical_hash: 2,
            cost_model_version: 1,
            routing_version: 1,
        };
        let physical = |index: &str| {
            let index = index.to_string();
            move || {
                Ok(PhysicalPlan::ShardScan {
                    index,
                    filter: Expr::True,
                    limit_hint: None,
                    projected: None,
                })
            }
        };
        cache
            .get_or_build_physical(key_a, "products", physical("products"))
            .expect("build");
        cache
            .get_or_build_physical(key_b, "users", physical("users"))
            .expect("build");

        cache.evict_physical_for("products");

        let stats = cache.stats();
        assert_eq!(stats.physical_entries, 1);
    }

    #[test]
    fn test_build_failure_is_not_cached() {
        let cache = PlanCache::new(8, 8);
        let err = cache.get_or_build_logical(9, "products", || {
            Err(crate::error::SearchError::PlanningFailed {
                message: "boom".to_string(),
            })
        });
        assert!(err.is_err());

        let mut rebuilt = false;
        cache
            .get_or_build_logical(9, "products", || {
                rebuilt = true;
                Ok(scan("products"))
            })
            .expect("build");
        assert!(rebuilt);
    }
}
