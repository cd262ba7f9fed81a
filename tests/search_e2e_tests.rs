//! End-to-end search scenarios through the coordinator.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use searchd::cluster::{PipelineAssociations, ShardId};
use searchd::config::Config;
use searchd::execution::timeout::Deadline;
use searchd::node::{DataNode, Document, ShardSearchResponse, ShardStats};
use searchd::pipeline::{FailurePolicy, PipelineDef, PipelineKind};
use searchd::plan::physical::ShardFragment;
use searchd::{SearchCoordinator, SearchError, ShardErrorKind};

fn doc(value: Value) -> Document {
    value.as_object().expect("object").clone()
}

/// Index `products` with 2 shards. Documents route by crc32(id) mod 2;
/// the scenarios below only rely on both shards being queried, not on a
/// particular document→shard split.
async fn products_coordinator() -> Arc<SearchCoordinator> {
    let coordinator = SearchCoordinator::new(Config::default());
    coordinator
        .create_index("products", Some(2), PipelineAssociations::default())
        .await
        .expect("create index");
    for (id, title, price) in [
        ("a", "laptop", 1000),
        ("b", "laptop", 500),
        ("c", "phone", 200),
    ] {
        coordinator
            .index_document("products", id, doc(json!({"title": title, "price": price})))
            .await
            .expect("index doc");
    }
    coordinator
}

#[tokio::test]
async fn test_simple_term_search_two_shards() {
    let coordinator = products_coordinator().await;
    let response = coordinator
        .search(
            "products",
            &json!({"query": {"term": {"title": "laptop"}}, "size": 10}),
        )
        .await
        .expect("search");

    assert_eq!(response["hits"]["total"], 2);
    assert_eq!(response["_shards"]["total"], 2);
    assert_eq!(response["_shards"]["successful"], 2);
    assert_eq!(response["_shards"]["failed"], 0);
    assert_eq!(response["timed_out"], false);

    let mut ids: Vec<&str> = response["hits"]["hits"]
        .as_array()
        .expect("hits array")
        .iter()
        .map(|hit| hit["_id"].as_str().expect("id"))
        .collect();
    ids.sort_unstable();
    assert_eq!(ids, vec!["a", "b"]);
}

#[tokio::test]
async fn test_top_n_across_shards() {
    let coordinator = products_coordinator().await;
    let response = coordinator
        .search(
            "products",
            &json!({
                "query": {"match_all": {}},
                "sort": [{"price": "desc"}],
                "size": 2
            }),
        )
        .await
        .expect("search");

    let ids: Vec<&str> = response["hits"]["hits"]
        .as_array()
        .expect("hits array")
        .iter()
        .map(|hit| hit["_id"].as_str().expect("id"))
        .collect();
    assert_eq!(ids, vec!["a", "b"]);
    assert_eq!(response["hits"]["total"], 3);
}

#[tokio::test]
async fn test_pagination_from_offset() {
    let coordinator = products_coordinator().await;
    let response = coordinator
        .search(
            "products",
            &json!({
                "query": {"match_all": {}},
                "sort": [{"price": "desc"}],
                "from": 1,
                "size": 2
            }),
        )
        .await
        .expect("search");

    let ids: Vec<&str> = response["hits"]["hits"]
        .as_array()
        .expect("hits array")
        .iter()
        .map(|hit| hit["_id"].as_str().expect("id"))
        .collect();
    assert_eq!(ids, vec!["b", "c"]);
}

#[tokio::test]
async fn test_terms_aggregation_merges_across_shards() {
    let coordinator = SearchCoordinator::new(Config::default());
    coordinator
        .create_index("sales", Some(2), PipelineAssociations::default())
        .await
        .expect("create index");
    // Spread categories over both shards; the merged counts must not
    // depend on the document→shard split.
    let categories = [
        ("electronics", 9),
        ("books", 6),
        ("toys", 2),
        ("food", 1),
    ];
    let mut serial = 0;
    for (category, count) in categories {
        for _ in 0..count {
            serial += 1;
            coordinator
                .index_document("sales", &format!("doc-{serial}"), doc(json!({"category": category})))
                .await
                .expect("index doc");
        }
    }

    let response = coordinator
        .search(
            "sales",
            &json!({
                "query": {"match_all": {}},
                "size": 0,
                "aggs": {"by_category": {"terms": {"field": "category", "size": 2}}}
            }),
        )
        .await
        .expect("search");

    assert!(response["hits"]["hits"].as_array().expect("hits").is_empty());
    let agg = &response["aggregations"]["by_category"];
    let buckets = agg["buckets"].as_array().expect("buckets");
    assert_eq!(buckets.len(), 2);
    assert_eq!(buckets[0]["key"], "electronics");
    assert_eq!(buckets[0]["doc_count"], 9);
    assert_eq!(buckets[1]["key"], "books");
    assert_eq!(buckets[1]["doc_count"], 6);
    assert_eq!(agg["sum_other_doc_count"], 3);
}

#[tokio::test]
async fn test_stats_aggregation_equals_single_node() {
    let coordinator = products_coordinator().await;
    let response = coordinator
        .search(
            "products",
            &json!({
                "query": {"match_all": {}},
                "size": 0,
                "aggs": {"price_stats": {"stats": {"field": "price"}}}
            }),
        )
        .await
        .expect("search");

    let stats = &response["aggregations"]["price_stats"];
    assert_eq!(stats["count"], 3);
    assert_eq!(stats["min"], 200.0);
    assert_eq!(stats["max"], 1000.0);
    assert_eq!(stats["sum"], 1700.0);
}

/// A data node whose search always reports a connection-level failure.
struct BrokenNode;

#[async_trait]
impl DataNode for BrokenNode {
    async fn search(
        &self,
        _fragment: &ShardFragment,
        shard: ShardId,
        _deadline: &Deadline,
    ) -> searchd::Result<ShardSearchResponse> {
        Err(SearchError::ShardFailure {
            shard,
            node: "node-z".to_string(),
            kind: ShardErrorKind::ConnectionFailed,
            message: "connection refused".to_string(),
        })
    }

    async fn index_document(
        &self,
        _index: &str,
        _shard: ShardId,
        _id: &str,
        _source: Document,
    ) -> searchd::Result<()> {
        Ok(())
    }

    async fn get_document(
        &self,
        _index: &str,
        _shard: ShardId,
        _id: &str,
    ) -> searchd::Result<Option<Document>> {
        Ok(None)
    }

    async fn delete_document(
        &self,
        _index: &str,
        _shard: ShardId,
        _id: &str,
    ) -> searchd::Result<bool> {
        Ok(false)
    }

    async fn create_shard(&self, _index: &str, _shard: ShardId) -> searchd::Result<()> {
        Ok(())
    }

    async fn delete_shard(&self, _index: &str, _shard: ShardId) -> searchd::Result<()> {
        Ok(())
    }

    async fn shard_stats(&self, _index: &str, _shard: ShardId) -> searchd::Result<ShardStats> {
        Ok(ShardStats::default())
    }
}

#[tokio::test]
async fn test_partial_failure_merges_surviving_shards() {
    let coordinator = SearchCoordinator::new(Config::default());
    // Round-robin assignment alternates between the healthy local node
    // ("node-1") and the broken one, so one shard of two lands on each.
    coordinator.register_node("node-z", "remote", Arc::new(BrokenNode));
    coordinator
        .create_index("mixed", Some(2), PipelineAssociations::default())
        .await
        .expect("create index");

    for serial in 0..8 {
        // Writes to the broken node's shard succeed as no-ops.
        coordinator
            .index_document("mixed", &format!("doc-{serial}"), doc(json!({"v": serial})))
            .await
            .expect("index doc");
    }

    let response = coordinator
        .search("mixed", &json!({"query": {"match_all": {}}}))
        .await
        .expect("search");

    assert_eq!(response["_shards"]["total"], 2);
    assert_eq!(response["_shards"]["successful"], 1);
    assert_eq!(response["_shards"]["failed"], 1);
    assert_eq!(
        response["_shards"]["failures"][0]["kind"],
        "connection_failed"
    );
    // Overall deadline was not hit, only one shard failed.
    assert_eq!(response["timed_out"], false);
    assert!(response["hits"]["total"].as_u64().expect("total") > 0);
}

#[tokio::test]
async fn test_all_shards_failing_is_service_unavailable() {
    let mut config = Config::default();
    // Make the broken node the only data node.
    config.cluster.node_name = "unused-local".to_string();
    let coordinator = SearchCoordinator::new(config);
    coordinator.register_node("node-z", "remote", Arc::new(BrokenNode));

    // Assignments round-robin over both registered nodes; with one shard
    // the cursor can land on either, so retry until it lands on node-z.
    let mut created = false;
    for attempt in 0..4 {
        let name = format!("doomed-{attempt}");
        coordinator
            .create_index(&name, Some(1), PipelineAssociations::default())
            .await
            .expect("create index");
        let result = coordinator
            .search(&name, &json!({"query": {"match_all": {}}}))
            .await;
        match result {
            Err(SearchError::ServiceUnavailable { .. }) => {
                created = true;
                break;
            }
            _ => continue,
        }
    }
    assert!(created, "expected a fully failed fan-out");
}

#[tokio::test]
async fn test_document_pipeline_redaction() {
    let coordinator = SearchCoordinator::new(Config::default());
    coordinator
        .put_pipeline(
            "pii-filter",
            &PipelineDef {
                kind: PipelineKind::Document,
                stages: vec![json!({"remove": {"field": "ssn"}})],
                on_failure: FailurePolicy::Continue,
                timeout_ms: None,
            },
        )
        .expect("register pipeline");
    coordinator
        .create_index(
            "users",
            Some(1),
            PipelineAssociations {
                document: Some("pii-filter".to_string()),
                ..PipelineAssociations::default()
            },
        )
        .await
        .expect("create index");

    coordinator
        .index_document("users", "u1", doc(json!({"name": "x", "ssn": "123"})))
        .await
        .expect("index doc");

    let stored = coordinator
        .get_document("users", "u1")
        .await
        .expect("get")
        .expect("present");
    assert_eq!(stored.get("name"), Some(&json!("x")));
    assert!(!stored.contains_key("ssn"));
}

#[tokio::test]
async fn test_failing_document_pipeline_stores_unchanged() {
    let coordinator = SearchCoordinator::new(Config::default());
    coordinator
        .put_pipeline(
            "broken",
            &PipelineDef {
                kind: PipelineKind::Document,
                stages: vec![json!({"fail": {"message": "boom"}})],
                on_failure: FailurePolicy::Continue,
                timeout_ms: None,
            },
        )
        .expect("register pipeline");
    coordinator
        .create_index(
            "users",
            Some(1),
            PipelineAssociations {
                document: Some("broken".to_string()),
                ..PipelineAssociations::default()
            },
        )
        .await
        .expect("create index");

    let before = coordinator.metrics().snapshot().pipeline_failures;
    coordinator
        .index_document("users", "u1", doc(json!({"name": "x", "ssn": "123"})))
        .await
        .expect("index doc despite pipeline failure");

    let stored = coordinator
        .get_document("users", "u1")
        .await
        .expect("get")
        .expect("present");
    assert_eq!(stored.get("ssn"), Some(&json!("123")));
    assert_eq!(
        coordinator.metrics().snapshot().pipeline_failures,
        before + 1
    );
}

#[tokio::test]
async fn test_query_pipeline_rewrites_request() {
    let coordinator = SearchCoordinator::new(Config::default());
    // Rewrites any request into a match-all with size 1.
    coordinator
        .put_pipeline(
            "force-match-all",
            &PipelineDef {
                kind: PipelineKind::Query,
                stages: vec![
                    json!({"set": {"field": "query", "value": {"match_all": {}}}}),
                    json!({"set": {"field": "size", "value": 1}}),
                ],
                on_failure: FailurePolicy::Continue,
                timeout_ms: None,
            },
        )
        .expect("register pipeline");
    coordinator
        .create_index(
            "notes",
            Some(1),
            PipelineAssociations {
                query: Some("force-match-all".to_string()),
                ..PipelineAssociations::default()
            },
        )
        .await
        .expect("create index");
    for id in ["n1", "n2", "n3"] {
        coordinator
            .index_document("notes", id, doc(json!({"body": "text"})))
            .await
            .expect("index doc");
    }

    let response = coordinator
        .search("notes", &json!({"query": {"term": {"body": "nothing"}}}))
        .await
        .expect("search");
    assert_eq!(response["hits"]["total"], 3);
    assert_eq!(
        response["hits"]["hits"].as_array().expect("hits").len(),
        1
    );
}

#[tokio::test]
async fn test_nested_query_is_not_implemented() {
    let coordinator = products_coordinator().await;
    let err = coordinator
        .search(
            "products",
            &json!({"query": {"nested": {"path": "p", "query": {"match_all": {}}}}}),
        )
        .await
        .expect_err("nested unsupported");
    assert!(matches!(err, SearchError::NotImplemented { .. }));
}

#[tokio::test]
async fn test_unknown_dsl_key_fails_before_rpc() {
    let coordinator = products_coordinator().await;
    let err = coordinator
        .search("products", &json!({"query": {"match_all": {}}, "bogus": 1}))
        .await
        .expect_err("bad request");
    assert!(matches!(err, SearchError::BadRequest { .. }));
    assert!(err.is_query_side());
}
