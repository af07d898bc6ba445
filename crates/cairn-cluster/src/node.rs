// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Cairn Authors

//! Cluster node identity.

use serde::{Deserialize, Serialize};

/// Role of a node in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Coordinates client requests and owns the authoritative cluster map.
    Proxy,
    /// Stores object data.
    Target,
}

impl NodeRole {
    /// Returns the role name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Proxy => "proxy",
            Self::Target => "target",
        }
    }
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Liveness of a node as seen by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NodeHealth {
    /// Heartbeats arrive within the configured threshold.
    #[default]
    Alive,
    /// Too many consecutive heartbeats were missed.
    Unreachable,
}

/// A cluster member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Unique node id.
    pub id: String,
    /// Node role.
    pub role: NodeRole,
    /// Public URL of the node.
    pub url: String,
    /// Current liveness.
    #[serde(default)]
    pub health: NodeHealth,
}

impl Node {
    /// Creates an alive node.
    pub fn new(id: impl Into<String>, role: NodeRole, url: impl Into<String>) -> Self {
        Self { id: id.into(), role, url: url.into(), health: NodeHealth::Alive }
    }

    /// Creates an alive proxy.
    pub fn proxy(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self::new(id, NodeRole::Proxy, url)
    }

    /// Creates an alive target.
    pub fn target(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self::new(id, NodeRole::Target, url)
    }

    /// Returns true if the node is alive.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.health == NodeHealth::Alive
    }
}

impl std::fmt::Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{}]", self.role, self.id)
    }
}
