// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Cairn Authors

//! Cluster membership handlers.
//!
//! Nodes outside this process join and heartbeat through these endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use cairn_cluster::{ClusterMap, Node, NodeRole};
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::error::ApiError;

/// Request to join the cluster.
#[derive(Debug, Serialize, Deserialize)]
pub struct JoinRequest {
    /// Unique node id.
    pub id: String,
    /// Node role.
    pub role: NodeRole,
    /// Public URL of the node.
    pub url: String,
}

/// `GET /v1/cluster` - Current cluster map.
pub async fn get_cluster_info(State(state): State<AppState>) -> Json<ClusterMap> {
    Json(state.cluster.get_cluster_info().as_ref().clone())
}

/// `POST /v1/cluster/nodes` - Join a node.
pub async fn join_node(
    State(state): State<AppState>,
    Json(request): Json<JoinRequest>,
) -> Result<Json<ClusterMap>, ApiError> {
    let node = Node::new(request.id, request.role, request.url);
    Ok(Json(state.cluster.join_node(node)?.as_ref().clone()))
}

/// `DELETE /v1/cluster/nodes/{id}` - Remove a node.
pub async fn leave_node(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ClusterMap>, ApiError> {
    Ok(Json(state.cluster.leave_node(&id)?.as_ref().clone()))
}

/// `POST /v1/cluster/nodes/{id}/heartbeat` - Node heartbeat.
pub async fn heartbeat(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.cluster.heartbeat(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `PUT /v1/cluster/primary/{id}` - Designate the primary proxy.
pub async fn designate_primary(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ClusterMap>, ApiError> {
    Ok(Json(state.cluster.designate_primary(&id)?.as_ref().clone()))
}

/// `POST /v1/cluster/sync` - Offer a newer cluster map.
pub async fn sync_cluster_map(
    State(state): State<AppState>,
    Json(offered): Json<ClusterMap>,
) -> Result<Json<ClusterMap>, ApiError> {
    Ok(Json(state.cluster.sync_cluster_map(offered)?.as_ref().clone()))
}
