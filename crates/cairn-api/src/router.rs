// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Cairn Authors

//! API router configuration.

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post, put};
use axum::{middleware as axum_middleware, Router};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::cluster::Cluster;
use crate::handlers::{bucket, cluster, object, xaction, AppState};
use crate::middleware::metrics_layer;

/// Create the API router.
///
/// # Arguments
/// * `cluster` - The cluster to serve
/// * `max_body_size` - Maximum request body size in bytes (0 for unlimited)
/// * `log_requests` - Whether to log HTTP requests
pub fn create_router(cluster: Arc<Cluster>, max_body_size: u64, log_requests: bool) -> Router {
    let state = AppState { cluster };

    let router = Router::new()
        .route("/health", get(|| async { "OK" }))
        // Buckets
        .route("/v1/buckets", get(bucket::list_buckets))
        .route(
            "/v1/buckets/{bucket}",
            get(bucket::list_objects)
                .put(bucket::create_bucket)
                .delete(bucket::destroy_bucket)
                .head(bucket::head_bucket),
        )
        .route("/v1/buckets/{bucket}/evict", post(bucket::evict_bucket))
        .route("/v1/buckets/{bucket}/copy", post(bucket::copy_bucket))
        // Objects
        .route(
            "/v1/objects/{bucket}/{*object}",
            get(object::get_object).put(object::put_object).delete(object::delete_object),
        )
        // Xactions
        .route("/v1/xactions", get(xaction::list_xactions))
        .route("/v1/xactions/{id}", get(xaction::xaction_status))
        .route("/v1/xactions/{id}/wait", post(xaction::wait_xaction))
        .route("/v1/xactions/{id}/abort", post(xaction::abort_xaction))
        // Cluster
        .route("/v1/cluster", get(cluster::get_cluster_info))
        .route("/v1/cluster/nodes", post(cluster::join_node))
        .route("/v1/cluster/nodes/{id}", delete(cluster::leave_node))
        .route("/v1/cluster/nodes/{id}/heartbeat", post(cluster::heartbeat))
        .route("/v1/cluster/primary/{id}", put(cluster::designate_primary))
        .route("/v1/cluster/sync", post(cluster::sync_cluster_map))
        .with_state(state);

    let router = router.layer(axum_middleware::from_fn(metrics_layer));

    let router = if log_requests {
        let trace_layer = TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO));
        router.layer(trace_layer)
    } else {
        router
    };

    if max_body_size > 0 {
        router.layer(DefaultBodyLimit::max(max_body_size as usize))
    } else {
        router.layer(DefaultBodyLimit::disable())
    }
}
