// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Cairn Authors

//! Core types and utilities for the Cairn storage cluster.
//!
//! This crate provides the fundamental building blocks used across all Cairn components:
//! - Configuration management
//! - Error types with cluster-wide error codes
//! - Bucket and provider types

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod types;

pub use config::{
    ClusterConfig, Config, LogFormat, LoggingConfig, MetricsConfig, NodeConfig, ServerConfig,
    StorageConfig, XactionConfig,
};
pub use error::{Error, ErrorCode, Result};
pub use types::{Bck, BucketInfo, BucketProps, Provider};
