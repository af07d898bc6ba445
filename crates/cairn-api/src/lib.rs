// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Cairn Authors

//! Caller-facing API for Cairn.
//!
//! This crate provides:
//! - The in-process [`Cluster`] facade over membership, buckets and xactions
//! - A JSON HTTP router under `/v1`
//! - Error mapping from cluster error codes to HTTP statuses

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cluster;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod router;

pub use cluster::Cluster;
pub use error::ApiError;
pub use handlers::AppState;
pub use metrics::init_metrics;
pub use router::create_router;
