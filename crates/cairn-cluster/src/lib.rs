// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Cairn Authors

//! Cluster membership and bulk operations for Cairn.
//!
//! This crate provides:
//! - Node registry with heartbeat-based liveness
//! - Versioned cluster map (smap) published as immutable snapshots
//! - Cluster map owner that applies membership changes and elects the primary
//! - Xaction coordinator for long-running bucket operations
//!
//! # Architecture
//!
//! 1. Nodes register with the [`NodeRegistry`] and heartbeat periodically
//! 2. The registry emits [`MembershipEvent`]s on joins, departures and liveness changes
//! 3. The [`ClusterMapOwner`] turns each event into a new [`ClusterMap`] version
//! 4. The [`XactionCoordinator`] distributes work units across the targets of the
//!    current map and tracks them to a terminal state
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use cairn_cluster::{ClusterMapOwner, Node, NodeRegistry, RegistryConfig};
//!
//! let registry = Arc::new(NodeRegistry::new(RegistryConfig::default()));
//! let owner = Arc::new(ClusterMapOwner::new("cluster-uuid"));
//! Arc::clone(&owner).follow(Arc::clone(&registry));
//!
//! registry.register(Node::proxy("p1", "http://10.0.0.1:51080"))?;
//! registry.register(Node::target("t1", "http://10.0.0.2:51081"))?;
//! registry.start();
//!
//! let smap = owner.current();
//! println!("smap v{} primary {:?}", smap.version(), smap.primary());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod node;
pub mod owner;
pub mod registry;
pub mod smap;
pub mod xaction;

// Re-export main types
pub use node::{Node, NodeHealth, NodeRole};
pub use owner::{ClusterMapOwner, MAX_SYNC_VERSION_GAP};
pub use registry::{MembershipEvent, NodeRegistry, RegistryConfig};
pub use smap::{ClusterMap, Staleness};
pub use xaction::{
    BucketResolver, CoordinatorConfig, NoOpBucketResolver, NoOpTargetWorker, TargetProgress,
    TargetWorker, UnitState, UnitStats, WaitOutcome, WorkUnit, XactionCoordinator, XactionEvent,
    XactionKind, XactionParams, XactionSnapshot, XactionState,
};
