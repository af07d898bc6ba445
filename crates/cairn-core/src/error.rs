// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Cairn Authors

//! Error types for Cairn with cluster-wide error codes.

use std::time::Duration;

use thiserror::Error;

/// A specialized `Result` type for Cairn operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error codes shared by every node of the cluster.
///
/// The string form is what callers see on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// The bucket does not exist.
    BucketNotFound,
    /// The bucket already exists.
    BucketAlreadyExists,
    /// Eviction was requested on a bucket that is not backed by a remote store.
    NotRemoteBucket,
    /// A node id is already registered with a different role.
    NodeConflict,
    /// The node is not a cluster member.
    NodeNotFound,
    /// The object does not exist.
    ObjectNotFound,
    /// The xaction is unknown (never existed or already garbage-collected).
    XactionNotFound,
    /// The xaction reached the `failed` state.
    TransactionFailed,
    /// A wait deadline passed before the xaction terminated.
    Timeout,
    /// An offered cluster map is older than the current one.
    StaleClusterMap,
    /// An offered cluster map belongs to a different cluster.
    ClusterUuidMismatch,
    /// The request is malformed or not applicable.
    InvalidRequest,
    /// Internal error.
    InternalError,
}

impl ErrorCode {
    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        match self {
            Self::BucketNotFound
            | Self::NodeNotFound
            | Self::ObjectNotFound
            | Self::XactionNotFound => 404,
            Self::BucketAlreadyExists
            | Self::NodeConflict
            | Self::StaleClusterMap
            | Self::ClusterUuidMismatch => 409,
            Self::NotRemoteBucket | Self::InvalidRequest => 400,
            Self::Timeout => 408,
            Self::TransactionFailed | Self::InternalError => 500,
        }
    }

    /// Returns the error code string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::BucketNotFound => "ErrBckNotFound",
            Self::BucketAlreadyExists => "ErrBckAlreadyExists",
            Self::NotRemoteBucket => "ErrNotRemoteBucket",
            Self::NodeConflict => "ErrNodeConflict",
            Self::NodeNotFound => "ErrNodeNotFound",
            Self::ObjectNotFound => "ErrObjNotFound",
            Self::XactionNotFound => "ErrXactionNotFound",
            Self::TransactionFailed => "ErrTransactionFailed",
            Self::Timeout => "ErrTimeout",
            Self::StaleClusterMap => "ErrStaleClusterMap",
            Self::ClusterUuidMismatch => "ErrClusterUuidMismatch",
            Self::InvalidRequest => "ErrInvalidRequest",
            Self::InternalError => "ErrInternal",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors that can occur during Cairn operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The bucket is absent from the current bucket metadata.
    #[error("bucket {bucket} does not exist")]
    BucketNotFound {
        /// Bucket in `provider://name` form.
        bucket: String,
    },

    /// The bucket already exists.
    #[error("bucket {bucket} already exists")]
    BucketAlreadyExists {
        /// Bucket in `provider://name` form.
        bucket: String,
    },

    /// Eviction requested on a native bucket.
    #[error("bucket {bucket} is not a remote bucket")]
    NotRemoteBucket {
        /// Bucket in `provider://name` form.
        bucket: String,
    },

    /// Registry identity clash.
    #[error("node {node_id} is already registered as {existing}, cannot register as {requested}")]
    NodeConflict {
        /// The clashing node id.
        node_id: String,
        /// Role currently registered.
        existing: String,
        /// Role requested by the new registration.
        requested: String,
    },

    /// Unknown node.
    #[error("node {0} is not a cluster member")]
    NodeNotFound(String),

    /// Unknown object.
    #[error("object {bucket}/{object} does not exist")]
    ObjectNotFound {
        /// Bucket in `provider://name` form.
        bucket: String,
        /// Object name.
        object: String,
    },

    /// Unknown xaction.
    #[error("xaction {0} not found")]
    XactionNotFound(String),

    /// Terminal xaction failure with per-target detail.
    #[error("xaction {xaction_id} failed: {}", details.join("; "))]
    TransactionFailed {
        /// The failed xaction.
        xaction_id: String,
        /// One entry per failed target, `target: reason`.
        details: Vec<String>,
    },

    /// Wait deadline exceeded. The xaction itself keeps running.
    #[error("timed out after {waited:?} waiting for xaction {xaction_id}")]
    Timeout {
        /// The awaited xaction.
        xaction_id: String,
        /// How long the caller waited.
        waited: Duration,
    },

    /// An offered cluster map is not newer than the current one.
    #[error("stale cluster map: offered v{offered}, current v{current}")]
    StaleClusterMap {
        /// Version currently published.
        current: u64,
        /// Version offered by the peer.
        offered: u64,
    },

    /// An offered cluster map belongs to a different cluster instance.
    #[error("cluster uuid mismatch: local {local}, offered {offered}")]
    ClusterUuidMismatch {
        /// Local cluster uuid.
        local: String,
        /// Offered cluster uuid.
        offered: String,
    },

    /// Invalid request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// (De)serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error, typically a backend failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Creates a bucket-not-found error.
    #[must_use]
    pub fn bucket_not_found(bucket: impl std::fmt::Display) -> Self {
        Self::BucketNotFound { bucket: bucket.to_string() }
    }

    /// Creates an object-not-found error.
    #[must_use]
    pub fn object_not_found(bucket: impl std::fmt::Display, object: impl Into<String>) -> Self {
        Self::ObjectNotFound { bucket: bucket.to_string(), object: object.into() }
    }

    /// Returns the cluster error code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::BucketNotFound { .. } => ErrorCode::BucketNotFound,
            Self::BucketAlreadyExists { .. } => ErrorCode::BucketAlreadyExists,
            Self::NotRemoteBucket { .. } => ErrorCode::NotRemoteBucket,
            Self::NodeConflict { .. } => ErrorCode::NodeConflict,
            Self::NodeNotFound(_) => ErrorCode::NodeNotFound,
            Self::ObjectNotFound { .. } => ErrorCode::ObjectNotFound,
            Self::XactionNotFound(_) => ErrorCode::XactionNotFound,
            Self::TransactionFailed { .. } => ErrorCode::TransactionFailed,
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::StaleClusterMap { .. } => ErrorCode::StaleClusterMap,
            Self::ClusterUuidMismatch { .. } => ErrorCode::ClusterUuidMismatch,
            Self::InvalidRequest(_) | Self::Config(_) => ErrorCode::InvalidRequest,
            Self::Io(_) | Self::Serialization(_) | Self::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        self.code().http_status()
    }

    /// Returns true if this error reports a missing bucket.
    #[must_use]
    pub const fn is_bucket_not_found(&self) -> bool {
        matches!(self, Self::BucketNotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_maps_to_404() {
        assert_eq!(Error::bucket_not_found("ais://b").http_status(), 404);
        assert_eq!(Error::object_not_found("ais://b", "o").http_status(), 404);
        assert_eq!(Error::XactionNotFound("x".into()).http_status(), 404);
    }

    #[test]
    fn test_code_strings() {
        assert_eq!(Error::bucket_not_found("ais://b").code().as_str(), "ErrBckNotFound");
        assert_eq!(
            Error::NotRemoteBucket { bucket: "ais://b".into() }.code().to_string(),
            "ErrNotRemoteBucket"
        );
    }

    #[test]
    fn test_transaction_failed_message_lists_targets() {
        let err = Error::TransactionFailed {
            xaction_id: "x1".into(),
            details: vec!["t1: unreachable".into(), "t2: disk full".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("t1: unreachable"));
        assert!(msg.contains("t2: disk full"));
        assert_eq!(err.code(), ErrorCode::TransactionFailed);
    }

    #[test]
    fn test_timeout_is_not_a_failure_code() {
        let err = Error::Timeout { xaction_id: "x".into(), waited: Duration::from_secs(1) };
        assert_eq!(err.code(), ErrorCode::Timeout);
        assert_ne!(err.code(), ErrorCode::TransactionFailed);
    }
}
