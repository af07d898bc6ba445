// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Cairn Authors

//! Axum middleware for metrics and request logging.

use std::time::Instant;

use axum::extract::Request;
use axum::http::header::CONTENT_LENGTH;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use tracing::{info_span, Instrument};
use uuid::Uuid;

use crate::metrics::{determine_operation, record_request};

/// Response header carrying the request id.
pub const REQUEST_ID_HEADER: &str = "x-cairn-request-id";

/// Metrics and logging middleware.
///
/// Generates a request id, runs the request in a span tagged with it and the
/// detected operation, and records request metrics once the response is ready.
pub async fn metrics_layer(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let request_id = Uuid::new_v4().to_string();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let request_bytes = request
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);

    let operation = determine_operation(&method, &path);

    let span = info_span!(
        "http_request",
        request_id = %request_id,
        method = %method,
        path = %path,
        operation = operation.map(|o| o.as_str()).unwrap_or("unknown"),
    );

    let mut response = next.run(request).instrument(span).await;

    if let Some(op) = operation {
        record_request(op, response.status().as_u16(), start.elapsed(), request_bytes);
    }
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}
