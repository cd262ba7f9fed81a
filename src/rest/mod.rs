//! HTTP API Module
//!
//! The client REST surface (index/document/search/pipeline/cluster
//! endpoints) plus the `/_internal` node routes peers use for shard RPC.

pub mod dto;
pub mod error;
pub mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    routing::{get, post, put},
    Extension, Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{info, warn};

use crate::config::HttpConfig;
use crate::coordinator::SearchCoordinator;

use self::handlers::{admin, cluster, document, index, internal, pipeline, search};

/// Creates the Axum router
pub fn create_router(coordinator: Arc<SearchCoordinator>, config: &HttpConfig) -> Router {
    // Build CORS layer
    let cors = if !config.cors_origins.is_empty() {
        // Explicit origins configured: restrict to those
        let origins: Vec<_> = config
            .cors_origins
            .iter()
            .filter_map(|s| {
                let parsed = s.parse();
                if parsed.is_err() {
                    warn!(origin = %s, "Invalid CORS origin ignored");
                }
                parsed.ok()
            })
            .collect();
        Some(
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any),
        )
    } else if config.cors_allow_all {
        // Explicit dev mode opt-in: allow all origins
        Some(CorsLayer::permissive())
    } else {
        // Default: same-origin only
        None
    };

    let mut app = Router::new()
        // Admin
        .route("/health", get(admin::health))
        .route("/metrics", get(admin::metrics))
        // Cluster diagnostics
        .route("/_cluster/health", get(cluster::health))
        .route("/_cluster/state", get(cluster::state))
        // Pipelines
        .route(
            "/_pipelines/:name",
            post(pipeline::put_pipeline)
                .get(pipeline::get_pipeline)
                .delete(pipeline::delete_pipeline),
        )
        .route("/_pipelines/:name/_execute", post(pipeline::execute_pipeline))
        // Internal node routes (shard RPC surface)
        .route(
            "/_internal/:index/:shard",
            put(internal::shard_create).delete(internal::shard_delete),
        )
        .route("/_internal/:index/:shard/_search", post(internal::shard_search))
        .route("/_internal/:index/:shard/_stats", get(internal::shard_stats))
        .route(
            "/_internal/:index/:shard/_doc/:id",
            put(internal::shard_put_document)
                .get(internal::shard_get_document)
                .delete(internal::shard_delete_document),
        )
        // Indexes and documents (static segments above win over :index)
        .route(
            "/:index",
            put(index::create_index)
                .get(index::get_index)
                .delete(index::delete_index),
        )
        .route("/:index/_settings", put(index::put_settings))
        .route("/:index/_search", post(search::search))
        .route(
            "/:index/_doc/:id",
            put(document::put_document)
                .get(document::get_document)
                .delete(document::delete_document),
        );

    app = app.layer(Extension(coordinator));

    if let Some(cors) = cors {
        app = app.layer(cors);
    }

    app.layer(RequestBodyLimitLayer::new(config.max_body_bytes))
}

/// Starts the HTTP server with graceful shutdown support.
///
/// Listens for SIGINT (ctrl-c) and SIGTERM. On shutdown the routing
/// watcher is stopped through the coordinator.
pub async fn start_http_server(
    coordinator: Arc<SearchCoordinator>,
    config: &HttpConfig,
) -> anyhow::Result<()> {
    let app = create_router(Arc::clone(&coordinator), config);

    coordinator.spawn_routing_watcher();

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!(%addr, "http_server_listening");

    let socket = tokio::net::TcpSocket::new_v4()?;
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    let listener = socket.listen(1024)?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    coordinator.shutdown();
    Ok(())
}

/// Wait for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => { info!("Received SIGINT, shutting down..."); }
            _ = sigterm.recv() => { info!("Received SIGTERM, shutting down..."); }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.expect("failed to listen for ctrl-c");
        info!("Received SIGINT, shutting down...");
    }
}
