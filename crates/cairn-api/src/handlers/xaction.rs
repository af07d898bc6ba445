// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Cairn Authors

//! Xaction handlers.

use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::Json;
use cairn_cluster::{XactionKind, XactionSnapshot};
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::error::ApiError;

/// Query parameters of xaction listing.
#[derive(Debug, Deserialize, Default)]
pub struct ListXactionsQuery {
    /// Only list xactions of this kind.
    pub kind: Option<XactionKind>,
    /// Only list xactions that are not terminal.
    #[serde(default)]
    pub running: bool,
}

/// Query parameters of a blocking wait.
#[derive(Debug, Deserialize, Default)]
pub struct WaitQuery {
    /// Wait deadline in milliseconds. The coordinator default applies if absent.
    pub timeout_ms: Option<u64>,
}

/// Abort outcome.
#[derive(Debug, Serialize, Deserialize)]
pub struct AbortResponse {
    /// False if the xaction had already reached a terminal state.
    pub aborted: bool,
}

/// `GET /v1/xactions` - List xactions.
pub async fn list_xactions(
    State(state): State<AppState>,
    Query(query): Query<ListXactionsQuery>,
) -> Json<Vec<XactionSnapshot>> {
    Json(state.cluster.list_xactions(query.kind, query.running))
}

/// `GET /v1/xactions/{id}` - Xaction status.
pub async fn xaction_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<XactionSnapshot>, ApiError> {
    Ok(Json(state.cluster.xaction_status(&id)?))
}

/// `POST /v1/xactions/{id}/wait` - Block until the xaction is terminal.
pub async fn wait_xaction(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<WaitQuery>,
) -> Result<Json<XactionSnapshot>, ApiError> {
    let timeout = query.timeout_ms.map(Duration::from_millis);
    Ok(Json(state.cluster.wait_for_xaction_finished(&id, timeout).await?))
}

/// `POST /v1/xactions/{id}/abort` - Abort an xaction.
pub async fn abort_xaction(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AbortResponse>, ApiError> {
    Ok(Json(AbortResponse { aborted: state.cluster.abort_xaction(&id)? }))
}
