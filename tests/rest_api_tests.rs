//! REST API tests driven through the router with oneshot requests.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use searchd::config::{Config, HttpConfig};
use searchd::rest::create_router;
use searchd::SearchCoordinator;

fn make_app() -> (Router, Arc<SearchCoordinator>) {
    let coordinator = SearchCoordinator::new(Config::default());
    let app = create_router(Arc::clone(&coordinator), &HttpConfig::default());
    (app, coordinator)
}

fn request(method: Method, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder().method(method).uri(uri);
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request"),
        None => builder.body(Body::empty()).expect("request"),
    }
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(&bytes).expect("json body")
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.expect("response");
    let status = response.status();
    (status, body_json(response).await)
}

#[tokio::test]
async fn test_index_document_search_flow() {
    let (app, _coordinator) = make_app();

    let (status, body) = send(
        &app,
        request(Method::PUT, "/products", Some(json!({"shards": 2}))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["acknowledged"], true);
    assert_eq!(body["index"]["shards"], 2);

    for (id, title, price) in [("a", "laptop", 1000), ("b", "phone", 200)] {
        let (status, _) = send(
            &app,
            request(
                Method::PUT,
                &format!("/products/_doc/{id}"),
                Some(json!({"title": title, "price": price})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = send(&app, request(Method::GET, "/products/_doc/a", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["found"], true);
    assert_eq!(body["_source"]["title"], "laptop");

    let (status, body) = send(
        &app,
        request(
            Method::POST,
            "/products/_search",
            Some(json!({"query": {"term": {"title": "laptop"}}})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["hits"]["total"], 1);
    assert_eq!(body["_shards"]["total"], 2);
}

#[tokio::test]
async fn test_create_duplicate_index_is_400() {
    let (app, _coordinator) = make_app();
    let (status, _) = send(&app, request(Method::PUT, "/products", None)).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = send(&app, request(Method::PUT, "/products", None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_malformed_query_is_400_with_path() {
    let (app, _coordinator) = make_app();
    send(&app, request(Method::PUT, "/products", None)).await;

    let (status, body) = send(
        &app,
        request(
            Method::POST,
            "/products/_search",
            Some(json!({"query": {"range": {"price": {"above": 5}}}})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]["message"]
        .as_str()
        .expect("message")
        .contains("query.range.price.above"));
}

#[tokio::test]
async fn test_nested_query_is_501() {
    let (app, _coordinator) = make_app();
    send(&app, request(Method::PUT, "/products", None)).await;

    let (status, _) = send(
        &app,
        request(
            Method::POST,
            "/products/_search",
            Some(json!({"query": {"nested": {"path": "p", "query": {"match_all": {}}}}})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
}

#[tokio::test]
async fn test_missing_document_reports_not_found() {
    let (app, _coordinator) = make_app();
    send(&app, request(Method::PUT, "/products", None)).await;

    let (status, body) = send(&app, request(Method::GET, "/products/_doc/nope", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["found"], false);
}

#[tokio::test]
async fn test_pipeline_crud_and_execute() {
    let (app, _coordinator) = make_app();

    let (status, body) = send(
        &app,
        request(
            Method::POST,
            "/_pipelines/pii-filter",
            Some(json!({
                "kind": "document",
                "stages": [{"remove": {"field": "ssn"}}]
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["version"], 1);

    let (status, body) = send(&app, request(Method::GET, "/_pipelines/pii-filter", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["kind"], "document");
    assert_eq!(body["stages"][0], "remove");

    let (status, body) = send(
        &app,
        request(
            Method::POST,
            "/_pipelines/pii-filter/_execute",
            Some(json!({"document": {"name": "x", "ssn": "123"}})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["document"], json!({"name": "x"}));

    let (status, _) = send(
        &app,
        request(Method::DELETE, "/_pipelines/pii-filter", None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&app, request(Method::GET, "/_pipelines/pii-filter", None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_pipeline_execute_surfaces_stage_error() {
    let (app, _coordinator) = make_app();
    send(
        &app,
        request(
            Method::POST,
            "/_pipelines/broken",
            Some(json!({"kind": "document", "stages": [{"fail": {"message": "boom"}}]})),
        ),
    )
    .await;

    let (status, body) = send(
        &app,
        request(
            Method::POST,
            "/_pipelines/broken/_execute",
            Some(json!({"document": {}})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["code"], "PIPELINE_FAILED");
}

#[tokio::test]
async fn test_settings_update_pipeline_association() {
    let (app, _coordinator) = make_app();
    send(
        &app,
        request(
            Method::POST,
            "/_pipelines/noop",
            Some(json!({"kind": "query", "stages": []})),
        ),
    )
    .await;
    send(&app, request(Method::PUT, "/products", None)).await;

    let (status, body) = send(
        &app,
        request(
            Method::PUT,
            "/products/_settings",
            Some(json!({"pipelines": {"query": "noop"}})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["index"]["pipelines"]["query"], "noop");

    // Unknown pipeline names are rejected with the offending path.
    let (status, body) = send(
        &app,
        request(
            Method::PUT,
            "/products/_settings",
            Some(json!({"pipelines": {"result": "ghost"}})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]["message"]
        .as_str()
        .expect("message")
        .contains("pipelines.result"));
}

#[tokio::test]
async fn test_cluster_endpoints() {
    let (app, _coordinator) = make_app();
    send(
        &app,
        request(Method::PUT, "/products", Some(json!({"shards": 3}))),
    )
    .await;

    let (status, body) = send(&app, request(Method::GET, "/_cluster/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "green");
    assert_eq!(body["shards_started"], 3);

    let (status, body) = send(&app, request(Method::GET, "/_cluster/state", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["routing_version"], 1);
    assert_eq!(body["indices"][0]["name"], "products");
    assert_eq!(body["nodes"][0]["id"], "node-1");
}

#[tokio::test]
async fn test_internal_shard_routes() {
    let (app, _coordinator) = make_app();

    let (status, _) = send(&app, request(Method::PUT, "/_internal/probe/0", None)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
        &app,
        request(
            Method::PUT,
            "/_internal/probe/0/_doc/x",
            Some(json!({"v": 1})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(
        &app,
        request(Method::GET, "/_internal/probe/0/_doc/x", None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["v"], 1);

    let (status, body) = send(
        &app,
        request(Method::GET, "/_internal/probe/0/_stats", None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["doc_count"], 1);

    let (status, body) = send(
        &app,
        request(
            Method::POST,
            "/_internal/probe/0/_search",
            Some(json!({
                "fragment": {
                    "index": "probe",
                    "routing_version": 1,
                    "filter": "True",
                    "sort": [],
                    "fetch": 10,
                    "aggs": {},
                    "terms_shard_size": 0,
                    "limit_hint": null,
                    "projected": null
                },
                "deadline_ms": 0
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_hits"], 1);
}

#[tokio::test]
async fn test_metrics_track_searches() {
    let (app, coordinator) = make_app();
    send(&app, request(Method::PUT, "/products", None)).await;
    send(
        &app,
        request(
            Method::POST,
            "/products/_search",
            Some(json!({"query": {"match_all": {}}})),
        ),
    )
    .await;

    let (status, body) = send(&app, request(Method::GET, "/metrics", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["searches_total"], 1);
    assert_eq!(coordinator.metrics().snapshot().searches_total, 1);
}
