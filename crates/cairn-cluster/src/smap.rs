// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Cairn Authors

//! Versioned cluster map (smap).
//!
//! A [`ClusterMap`] is an immutable snapshot of cluster membership. Snapshots are
//! only ever produced by the [`ClusterMapOwner`](crate::owner::ClusterMapOwner);
//! holders of an older snapshot keep a consistent view for as long as they hold it.

use std::collections::BTreeMap;
use std::path::Path;

use cairn_core::Error;
use serde::{Deserialize, Serialize};

use crate::node::{Node, NodeHealth, NodeRole};

/// How one cluster map relates to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Staleness {
    /// Same cluster, same version.
    Same,
    /// Same cluster, the other map is newer.
    Newer,
    /// Same cluster, the other map is older.
    Older,
    /// The maps belong to different cluster instances.
    Conflict,
}

/// Immutable snapshot of cluster membership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterMap {
    version: u64,
    uuid: String,
    proxy_si: Option<Node>,
    pmap: BTreeMap<String, Node>,
    tmap: BTreeMap<String, Node>,
    #[serde(default)]
    degraded: bool,
}

impl ClusterMap {
    /// Creates the initial, empty map of a cluster instance.
    #[must_use]
    pub fn empty(uuid: impl Into<String>) -> Self {
        Self {
            version: 0,
            uuid: uuid.into(),
            proxy_si: None,
            pmap: BTreeMap::new(),
            tmap: BTreeMap::new(),
            degraded: false,
        }
    }

    pub(crate) fn from_parts(
        version: u64,
        uuid: String,
        proxy_si: Option<Node>,
        pmap: BTreeMap<String, Node>,
        tmap: BTreeMap<String, Node>,
        degraded: bool,
    ) -> Self {
        Self { version, uuid, proxy_si, pmap, tmap, degraded }
    }

    pub(crate) fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    /// Monotonic map version.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Cluster instance uuid.
    #[must_use]
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// The primary proxy.
    #[must_use]
    pub const fn primary(&self) -> Option<&Node> {
        self.proxy_si.as_ref()
    }

    /// Proxies by id.
    #[must_use]
    pub const fn pmap(&self) -> &BTreeMap<String, Node> {
        &self.pmap
    }

    /// Targets by id.
    #[must_use]
    pub const fn tmap(&self) -> &BTreeMap<String, Node> {
        &self.tmap
    }

    /// True when no proxy is alive and the primary is the last known one.
    #[must_use]
    pub const fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// True once the map has a primary and at least one target.
    #[must_use]
    pub fn is_operational(&self) -> bool {
        self.proxy_si.is_some() && !self.pmap.is_empty() && !self.tmap.is_empty()
    }

    /// Looks up a node of either role.
    #[must_use]
    pub fn get_node(&self, node_id: &str) -> Option<&Node> {
        self.pmap.get(node_id).or_else(|| self.tmap.get(node_id))
    }

    /// Targets currently considered alive, in id order.
    pub fn alive_targets(&self) -> impl Iterator<Item = &Node> {
        self.tmap.values().filter(|n| n.health == NodeHealth::Alive)
    }

    /// Proxies currently considered alive, in id order.
    pub fn alive_proxies(&self) -> impl Iterator<Item = &Node> {
        self.pmap.values().filter(|n| n.health == NodeHealth::Alive)
    }

    /// Returns true if the target is present and alive.
    #[must_use]
    pub fn is_target_alive(&self, target_id: &str) -> bool {
        self.tmap.get(target_id).is_some_and(Node::is_alive)
    }

    /// Counts nodes of a role.
    #[must_use]
    pub fn count(&self, role: NodeRole) -> usize {
        match role {
            NodeRole::Proxy => self.pmap.len(),
            NodeRole::Target => self.tmap.len(),
        }
    }

    /// Compares `other` against this map.
    #[must_use]
    pub fn staleness(&self, other: &Self) -> Staleness {
        if self.uuid != other.uuid {
            return Staleness::Conflict;
        }
        match other.version.cmp(&self.version) {
            std::cmp::Ordering::Equal => Staleness::Same,
            std::cmp::Ordering::Greater => Staleness::Newer,
            std::cmp::Ordering::Less => Staleness::Older,
        }
    }

    /// True if membership and primary are equal, ignoring the version.
    pub(crate) fn same_content(&self, other: &Self) -> bool {
        self.proxy_si == other.proxy_si
            && self.pmap == other.pmap
            && self.tmap == other.tmap
            && self.degraded == other.degraded
    }

    /// Checks that the map is one the owner could have published: version
    /// headroom left, every node filed under its own id and role, and a primary
    /// that is an alive member unless the map is degraded.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` describing the first violation found.
    pub fn validate(&self) -> cairn_core::Result<()> {
        let invalid = |msg: String| -> cairn_core::Result<()> {
            Err(Error::InvalidRequest(format!("cluster map v{}: {msg}", self.version)))
        };
        if self.version == u64::MAX {
            return invalid("version exhausted".to_string());
        }
        for (map, role) in [(&self.pmap, NodeRole::Proxy), (&self.tmap, NodeRole::Target)] {
            for (id, node) in map {
                if *id != node.id || node.role != role {
                    return invalid(format!("entry {id} holds {node}"));
                }
            }
        }
        if let Some(id) = self.pmap.keys().find(|id| self.tmap.contains_key(*id)) {
            return invalid(format!("node {id} is both proxy and target"));
        }

        if self.degraded {
            if let Some(alive) = self.alive_proxies().next() {
                return invalid(format!("degraded with alive proxy {}", alive.id));
            }
            return Ok(());
        }
        match &self.proxy_si {
            Some(primary) => match self.pmap.get(&primary.id) {
                Some(node) if node.is_alive() => Ok(()),
                Some(_) => invalid(format!("primary {} is unreachable", primary.id)),
                None => invalid(format!("primary {} is not a proxy of the map", primary.id)),
            },
            None if self.pmap.is_empty() => Ok(()),
            None => invalid("proxies present but no primary".to_string()),
        }
    }

    /// Writes the map as JSON, replacing the file atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: &Path) -> cairn_core::Result<()> {
        let data = serde_json::to_vec_pretty(self)?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Reads a map previously written by [`ClusterMap::save`].
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if the map
    /// fails [`ClusterMap::validate`].
    pub fn load(path: &Path) -> cairn_core::Result<Self> {
        let data = std::fs::read(path)?;
        let smap: Self = serde_json::from_slice(&data)?;
        smap.validate()?;
        Ok(smap)
    }
}
