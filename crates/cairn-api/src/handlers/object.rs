// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Cairn Authors

//! Object operation handlers.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use bytes::Bytes;
use cairn_core::Bck;

use super::bucket::BucketQuery;
use super::AppState;
use crate::error::ApiError;

/// `PUT /v1/objects/{bucket}/{*object}` - Write object.
pub async fn put_object(
    State(state): State<AppState>,
    Path((bucket, object)): Path<(String, String)>,
    Query(query): Query<BucketQuery>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    state.cluster.put_object(&Bck::new(bucket, query.provider), &object, body).await?;
    Ok(StatusCode::OK)
}

/// `GET /v1/objects/{bucket}/{*object}` - Read object.
pub async fn get_object(
    State(state): State<AppState>,
    Path((bucket, object)): Path<(String, String)>,
    Query(query): Query<BucketQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let data = state.cluster.get_object(&Bck::new(bucket, query.provider), &object).await?;
    Ok((StatusCode::OK, [("Content-Type", "application/octet-stream")], data))
}

/// `DELETE /v1/objects/{bucket}/{*object}` - Delete object.
pub async fn delete_object(
    State(state): State<AppState>,
    Path((bucket, object)): Path<(String, String)>,
    Query(query): Query<BucketQuery>,
) -> Result<StatusCode, ApiError> {
    state.cluster.delete_object(&Bck::new(bucket, query.provider), &object).await?;
    Ok(StatusCode::NO_CONTENT)
}
