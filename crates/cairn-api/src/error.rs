// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Cairn Authors

//! API error types and JSON error response formatting.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use cairn_core::{Error as CoreError, ErrorCode};
use serde::{Deserialize, Serialize};

/// API-level error that can be converted to an HTTP response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    /// Cluster error code, e.g. `ErrBckNotFound`.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Resource that caused the error (bucket, object, node or xaction).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    /// Per-target failure details of a failed xaction.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
    #[serde(skip)]
    status: u16,
}

impl ApiError {
    /// Create a new API error.
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.as_str().to_string(),
            message: message.into(),
            resource: None,
            details: Vec::new(),
            status: code.http_status(),
        }
    }

    /// Add resource information to the error.
    #[must_use]
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    /// Get the HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(self)).into_response()
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        let code = err.code();
        let message = err.to_string();
        match err {
            CoreError::BucketNotFound { bucket }
            | CoreError::BucketAlreadyExists { bucket }
            | CoreError::NotRemoteBucket { bucket } => {
                ApiError::new(code, message).with_resource(bucket)
            }
            CoreError::ObjectNotFound { bucket, object } => {
                ApiError::new(code, message).with_resource(format!("{bucket}/{object}"))
            }
            CoreError::NodeConflict { node_id, .. } | CoreError::NodeNotFound(node_id) => {
                ApiError::new(code, message).with_resource(node_id)
            }
            CoreError::XactionNotFound(id) | CoreError::Timeout { xaction_id: id, .. } => {
                ApiError::new(code, message).with_resource(id)
            }
            CoreError::TransactionFailed { xaction_id, details } => {
                let mut api_err = ApiError::new(code, message).with_resource(xaction_id);
                api_err.details = details;
                api_err
            }
            _ => ApiError::new(code, message),
        }
    }
}
