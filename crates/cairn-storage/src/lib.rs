// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Cairn Authors

//! Bucket and object state for Cairn.
//!
//! This crate provides:
//! - Bucket metadata (BMD) published as immutable, versioned snapshots
//! - HRW placement of objects on targets
//! - Per-target local stores (in memory or on the filesystem)
//! - Remote backends for cloud-backed buckets
//! - The [`BucketTracker`], which answers bucket and object queries and runs
//!   eviction and copy work units for the xaction coordinator

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod bmd;
pub mod hrw;
pub mod local;
pub mod metrics;
pub mod object;
pub mod tracker;

pub use backend::{Backends, InMemoryBackend, RemoteBackend, RemoteObject};
pub use bmd::{BmdOwner, BucketMd};
pub use hrw::{hrw_target, is_owner};
pub use local::{EvictOutcome, FsStore, LocalObject, LocalStore, MemoryStore};
pub use object::{ListProps, ObjectEntry, ObjectList, ObjectStatus};
pub use tracker::{BucketTracker, StorageUsage, StoreFactory};
