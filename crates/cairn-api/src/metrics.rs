// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Cairn Authors

//! API metrics definitions.

use std::time::Duration;

use axum::http::Method;
use metrics::{counter, describe_counter, describe_histogram, histogram};

/// API operation, used as a metric label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiOperation {
    /// List buckets.
    ListBuckets,
    /// Create a bucket.
    CreateBucket,
    /// Destroy a bucket.
    DestroyBucket,
    /// Check a bucket.
    HeadBucket,
    /// List the objects of a bucket.
    ListObjects,
    /// Evict a cloud-backed bucket.
    EvictBucket,
    /// Copy a bucket.
    CopyBucket,
    /// Write an object.
    PutObject,
    /// Read an object.
    GetObject,
    /// Delete an object.
    DeleteObject,
    /// Query xactions.
    XactionStatus,
    /// Wait for an xaction.
    XactionWait,
    /// Abort an xaction.
    XactionAbort,
    /// Cluster membership and map operations.
    Cluster,
}

impl ApiOperation {
    /// Returns the operation name as a string for metric labels.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ListBuckets => "ListBuckets",
            Self::CreateBucket => "CreateBucket",
            Self::DestroyBucket => "DestroyBucket",
            Self::HeadBucket => "HeadBucket",
            Self::ListObjects => "ListObjects",
            Self::EvictBucket => "EvictBucket",
            Self::CopyBucket => "CopyBucket",
            Self::PutObject => "PutObject",
            Self::GetObject => "GetObject",
            Self::DeleteObject => "DeleteObject",
            Self::XactionStatus => "XactionStatus",
            Self::XactionWait => "XactionWait",
            Self::XactionAbort => "XactionAbort",
            Self::Cluster => "Cluster",
        }
    }
}

/// Initialize metric descriptions (call once at startup).
pub fn init_metrics() {
    describe_counter!("cairn_api_requests_total", "Total number of API requests");
    describe_histogram!("cairn_api_request_duration_seconds", "Request duration in seconds");
    describe_counter!("cairn_api_request_bytes_total", "Total bytes received in requests");
}

/// Record a completed request.
pub fn record_request(
    operation: ApiOperation,
    status_code: u16,
    duration: Duration,
    request_bytes: u64,
) {
    let op = operation.as_str();
    let status = status_class(status_code);

    counter!("cairn_api_requests_total", "operation" => op, "status" => status).increment(1);
    histogram!("cairn_api_request_duration_seconds", "operation" => op, "status" => status)
        .record(duration.as_secs_f64());

    if request_bytes > 0 {
        counter!("cairn_api_request_bytes_total", "operation" => op).increment(request_bytes);
    }
}

fn status_class(status_code: u16) -> &'static str {
    match status_code {
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        500..=599 => "5xx",
        _ => "other",
    }
}

/// Determine the API operation from the HTTP method and path.
#[must_use]
pub fn determine_operation(method: &Method, path: &str) -> Option<ApiOperation> {
    let parts: Vec<&str> = path.trim_matches('/').split('/').collect();
    match (parts.as_slice(), method) {
        (["v1", "buckets"], &Method::GET) => Some(ApiOperation::ListBuckets),
        (["v1", "buckets", _], &Method::PUT) => Some(ApiOperation::CreateBucket),
        (["v1", "buckets", _], &Method::DELETE) => Some(ApiOperation::DestroyBucket),
        (["v1", "buckets", _], &Method::HEAD) => Some(ApiOperation::HeadBucket),
        (["v1", "buckets", _], &Method::GET) => Some(ApiOperation::ListObjects),
        (["v1", "buckets", _, "evict"], &Method::POST) => Some(ApiOperation::EvictBucket),
        (["v1", "buckets", _, "copy"], &Method::POST) => Some(ApiOperation::CopyBucket),
        (["v1", "objects", _, _, ..], &Method::PUT) => Some(ApiOperation::PutObject),
        (["v1", "objects", _, _, ..], &Method::GET) => Some(ApiOperation::GetObject),
        (["v1", "objects", _, _, ..], &Method::DELETE) => Some(ApiOperation::DeleteObject),
        (["v1", "xactions", _, "wait"], _) => Some(ApiOperation::XactionWait),
        (["v1", "xactions", _, "abort"], _) => Some(ApiOperation::XactionAbort),
        (["v1", "xactions", ..], &Method::GET) => Some(ApiOperation::XactionStatus),
        (["v1", "cluster", ..], _) => Some(ApiOperation::Cluster),
        _ => None,
    }
}
