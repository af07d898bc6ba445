// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Cairn Authors

//! Bucket operation handlers.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use cairn_cluster::{XactionKind, XactionParams, XactionSnapshot};
use cairn_core::{Bck, BucketInfo, Provider};
use cairn_storage::{ListProps, ObjectEntry};
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::error::ApiError;

/// Query parameters of bucket listing.
#[derive(Debug, Deserialize, Default)]
pub struct ListBucketsQuery {
    /// Only list buckets of this provider.
    pub provider: Option<Provider>,
}

/// Query parameters of bucket-level requests.
#[derive(Debug, Deserialize, Default)]
pub struct BucketQuery {
    /// Bucket provider. Native if absent.
    #[serde(default)]
    pub provider: Provider,
    /// Comma-separated list properties.
    pub props: Option<String>,
    /// Object name prefix filter.
    pub prefix: Option<String>,
}

impl BucketQuery {
    fn bck(&self, bucket: String) -> Bck {
        Bck::new(bucket, self.provider)
    }
}

/// Body of a copy request.
#[derive(Debug, Serialize, Deserialize)]
pub struct CopyBucketRequest {
    /// Destination bucket, `provider://name` or a bare native name.
    pub dst: String,
    /// Only copy objects with this prefix.
    #[serde(default)]
    pub prefix: Option<String>,
    /// Client idempotency key.
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

/// Response carrying a new xaction id.
#[derive(Debug, Serialize, Deserialize)]
pub struct XactionIdResponse {
    /// The xaction id.
    pub xaction_id: String,
}

/// `GET /v1/buckets` - List buckets.
pub async fn list_buckets(
    State(state): State<AppState>,
    Query(query): Query<ListBucketsQuery>,
) -> Json<Vec<Bck>> {
    Json(state.cluster.list_buckets(query.provider))
}

/// `PUT /v1/buckets/{bucket}` - Create bucket.
pub async fn create_bucket(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    Query(query): Query<BucketQuery>,
) -> Result<impl IntoResponse, ApiError> {
    state.cluster.create_bucket(&query.bck(bucket.clone()))?;
    Ok((StatusCode::OK, [("Location", format!("/v1/buckets/{bucket}"))]))
}

/// `DELETE /v1/buckets/{bucket}` - Destroy bucket.
pub async fn destroy_bucket(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    Query(query): Query<BucketQuery>,
) -> Result<StatusCode, ApiError> {
    state.cluster.destroy_bucket(&query.bck(bucket)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `HEAD /v1/buckets/{bucket}` - Check bucket exists.
pub async fn head_bucket(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    Query(query): Query<BucketQuery>,
) -> Result<Json<BucketInfo>, ApiError> {
    Ok(Json(state.cluster.head_bucket(&query.bck(bucket)).await?))
}

/// `GET /v1/buckets/{bucket}` - List objects.
pub async fn list_objects(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    Query(query): Query<BucketQuery>,
) -> Result<Json<Vec<ObjectEntry>>, ApiError> {
    let props: ListProps = query.props.as_deref().unwrap_or("").parse()?;
    let entries = state
        .cluster
        .list_objects(&bucket, query.provider, props, query.prefix.as_deref())
        .await?;
    Ok(Json(entries.collect()))
}

/// `POST /v1/buckets/{bucket}/evict` - Evict a cloud-backed bucket.
pub async fn evict_bucket(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    Query(query): Query<BucketQuery>,
) -> Result<Json<XactionSnapshot>, ApiError> {
    Ok(Json(state.cluster.evict_bucket(&bucket, query.provider).await?))
}

/// `POST /v1/buckets/{bucket}/copy` - Start a bucket copy.
pub async fn copy_bucket(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    Query(query): Query<BucketQuery>,
    Json(request): Json<CopyBucketRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let dst: Bck = request.dst.parse()?;
    let mut params = XactionParams::copy(query.bck(bucket), dst);
    if let Some(prefix) = request.prefix {
        params = params.with_prefix(prefix);
    }
    if let Some(key) = request.idempotency_key {
        params = params.with_idempotency_key(key);
    }
    let xaction_id = state.cluster.submit(XactionKind::CopyBucket, params).await?;
    Ok((StatusCode::ACCEPTED, Json(XactionIdResponse { xaction_id })))
}
