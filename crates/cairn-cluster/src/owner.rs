// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Cairn Authors

//! Cluster map manager.
//!
//! The owner is the single writer of the cluster map. Writers are serialized by a
//! mutex; readers get the latest published snapshot from a `watch` channel without
//! touching that mutex, so [`ClusterMapOwner::current`] never waits on a writer.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use cairn_core::{Error, Result};
use metrics::{counter, gauge};
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::node::{Node, NodeHealth, NodeRole};
use crate::registry::{MembershipEvent, NodeRegistry};
use crate::smap::{ClusterMap, Staleness};

/// Furthest an offered map may be ahead of the current one.
pub const MAX_SYNC_VERSION_GAP: u64 = 1 << 20;

#[derive(Debug, Default)]
struct WriterState {
    /// Proxy explicitly designated primary, if any.
    explicit_primary: Option<String>,
}

/// Owns and publishes the cluster map.
pub struct ClusterMapOwner {
    tx: watch::Sender<Arc<ClusterMap>>,
    writer: Mutex<WriterState>,
    persist_path: Option<PathBuf>,
}

impl ClusterMapOwner {
    /// Creates an owner for a new cluster instance, starting from an empty map.
    pub fn new(uuid: impl Into<String>) -> Self {
        Self::from_map(ClusterMap::empty(uuid))
    }

    /// Creates an owner that continues from a previously persisted map.
    pub fn from_map(smap: ClusterMap) -> Self {
        let explicit_primary = smap.primary().map(|p| p.id.clone());
        let (tx, _) = watch::channel(Arc::new(smap));
        Self {
            tx,
            writer: Mutex::new(WriterState { explicit_primary }),
            persist_path: None,
        }
    }

    /// Persists every published map to `path`.
    #[must_use]
    pub fn with_persistence(mut self, path: impl Into<PathBuf>) -> Self {
        self.persist_path = Some(path.into());
        self
    }

    /// Returns the latest published map.
    pub fn current(&self) -> Arc<ClusterMap> {
        Arc::clone(&self.tx.borrow())
    }

    /// Subscribes to published maps.
    pub fn subscribe(&self) -> watch::Receiver<Arc<ClusterMap>> {
        self.tx.subscribe()
    }

    /// Applies a membership event.
    ///
    /// Returns the new map, or `None` if the event did not change membership.
    pub fn on_membership_change(&self, event: &MembershipEvent) -> Option<Arc<ClusterMap>> {
        self.on_membership_changes(std::slice::from_ref(event))
    }

    /// Applies a batch of membership events as a single version bump.
    pub fn on_membership_changes(&self, events: &[MembershipEvent]) -> Option<Arc<ClusterMap>> {
        let mut writer = self.writer.lock();
        let current = self.current();
        let mut pmap = current.pmap().clone();
        let mut tmap = current.tmap().clone();

        for event in events {
            apply_event(&mut writer, &mut pmap, &mut tmap, event);
        }
        self.publish_or_log(&writer, &current, pmap, tmap)
    }

    /// Rebuilds membership from a full node listing.
    ///
    /// Used to resynchronize after missed registry events.
    pub fn reconcile(&self, nodes: Vec<Node>) -> Option<Arc<ClusterMap>> {
        let writer = self.writer.lock();
        let current = self.current();
        let mut pmap = BTreeMap::new();
        let mut tmap = BTreeMap::new();
        for node in nodes {
            match node.role {
                NodeRole::Proxy => pmap.insert(node.id.clone(), node),
                NodeRole::Target => tmap.insert(node.id.clone(), node),
            };
        }
        self.publish_or_log(&writer, &current, pmap, tmap)
    }

    /// Designates a proxy as primary.
    ///
    /// # Errors
    ///
    /// Returns `NodeNotFound` if the id is not a proxy in the current map and
    /// `Internal` if the map version cannot advance.
    pub fn designate_primary(&self, proxy_id: &str) -> Result<Arc<ClusterMap>> {
        let mut writer = self.writer.lock();
        let current = self.current();
        if !current.pmap().contains_key(proxy_id) {
            return Err(Error::NodeNotFound(proxy_id.to_string()));
        }
        let previous = writer.explicit_primary.replace(proxy_id.to_string());
        match self.publish_locked(&writer, &current, current.pmap().clone(), current.tmap().clone())
        {
            Ok(published) => Ok(published.unwrap_or(current)),
            Err(e) => {
                writer.explicit_primary = previous;
                Err(e)
            }
        }
    }

    /// Adopts a map offered by a peer.
    ///
    /// # Errors
    ///
    /// Returns `ClusterUuidMismatch` if the map belongs to another cluster,
    /// `StaleClusterMap` if it is not strictly newer than the current one, and
    /// `InvalidRequest` if it fails [`ClusterMap::validate`] or is more than
    /// [`MAX_SYNC_VERSION_GAP`] versions ahead.
    pub fn sync_from(&self, offered: ClusterMap) -> Result<Arc<ClusterMap>> {
        if let Err(e) = offered.validate() {
            counter!("cairn_cluster_smap_rejected_total", "reason" => "invalid").increment(1);
            return Err(e);
        }
        let mut writer = self.writer.lock();
        let current = self.current();
        match current.staleness(&offered) {
            Staleness::Conflict => {
                counter!("cairn_cluster_smap_rejected_total", "reason" => "uuid").increment(1);
                Err(Error::ClusterUuidMismatch {
                    local: current.uuid().to_string(),
                    offered: offered.uuid().to_string(),
                })
            }
            Staleness::Same | Staleness::Older => {
                counter!("cairn_cluster_smap_rejected_total", "reason" => "stale").increment(1);
                Err(Error::StaleClusterMap {
                    current: current.version(),
                    offered: offered.version(),
                })
            }
            Staleness::Newer if offered.version() - current.version() > MAX_SYNC_VERSION_GAP => {
                counter!("cairn_cluster_smap_rejected_total", "reason" => "gap").increment(1);
                Err(Error::InvalidRequest(format!(
                    "cluster map v{} is too far ahead of v{}",
                    offered.version(),
                    current.version()
                )))
            }
            Staleness::Newer => {
                writer.explicit_primary = offered
                    .primary()
                    .filter(|p| offered.pmap().contains_key(&p.id))
                    .map(|p| p.id.clone());
                let smap = Arc::new(offered);
                info!(
                    from_version = current.version(),
                    version = smap.version(),
                    "Adopted newer cluster map"
                );
                self.commit(Arc::clone(&smap));
                Ok(smap)
            }
        }
    }

    /// Applies registry events to the map until the registry's channel closes.
    ///
    /// On lagging behind the event stream the map is rebuilt from a registry
    /// snapshot.
    pub fn follow(self: Arc<Self>, registry: Arc<NodeRegistry>) -> JoinHandle<()> {
        let mut events = registry.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        self.on_membership_change(&event);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Missed membership events, reconciling from registry");
                        self.reconcile(registry.snapshot());
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("Registry event stream closed");
                        break;
                    }
                }
            }
        })
    }

    /// Publishes from the membership paths, which have no caller to report to.
    fn publish_or_log(
        &self,
        writer: &WriterState,
        current: &ClusterMap,
        pmap: BTreeMap<String, Node>,
        tmap: BTreeMap<String, Node>,
    ) -> Option<Arc<ClusterMap>> {
        match self.publish_locked(writer, current, pmap, tmap) {
            Ok(published) => published,
            Err(e) => {
                error!(version = current.version(), error = %e, "Cluster map not published");
                None
            }
        }
    }

    fn publish_locked(
        &self,
        writer: &WriterState,
        current: &ClusterMap,
        pmap: BTreeMap<String, Node>,
        tmap: BTreeMap<String, Node>,
    ) -> Result<Option<Arc<ClusterMap>>> {
        let (proxy_si, degraded) = elect_primary(writer, current, &pmap);
        let candidate = ClusterMap::from_parts(
            current.version(),
            current.uuid().to_string(),
            proxy_si,
            pmap,
            tmap,
            degraded,
        );
        if candidate.same_content(current) {
            return Ok(None);
        }
        // u64::MAX is never published so that every stored map can still advance.
        let version = current
            .version()
            .checked_add(1)
            .filter(|v| *v < u64::MAX)
            .ok_or_else(|| {
                Error::Internal(format!("cluster map v{} exhausted", current.version()))
            })?;
        let candidate = candidate.with_version(version);

        if degraded && !current.is_degraded() {
            warn!(version = candidate.version(), "No alive proxy, cluster map degraded");
        }
        info!(
            version = candidate.version(),
            primary = candidate.primary().map_or("-", |p| p.id.as_str()),
            proxies = candidate.pmap().len(),
            targets = candidate.tmap().len(),
            "Published cluster map"
        );
        let smap = Arc::new(candidate);
        self.commit(Arc::clone(&smap));
        Ok(Some(smap))
    }

    fn commit(&self, smap: Arc<ClusterMap>) {
        if let Some(path) = &self.persist_path {
            if let Err(e) = smap.save(path) {
                warn!(path = %path.display(), error = %e, "Failed to persist cluster map");
            }
        }
        gauge!("cairn_cluster_smap_version").set(smap.version() as f64);
        counter!("cairn_cluster_smap_published_total").increment(1);
        self.tx.send_replace(smap);
    }
}

fn apply_event(
    writer: &mut WriterState,
    pmap: &mut BTreeMap<String, Node>,
    tmap: &mut BTreeMap<String, Node>,
    event: &MembershipEvent,
) {
    match event {
        MembershipEvent::Joined(node) | MembershipEvent::Updated(node) => {
            let map: &mut BTreeMap<String, Node> = match node.role {
                NodeRole::Proxy => pmap,
                NodeRole::Target => tmap,
            };
            map.insert(node.id.clone(), node.clone());
        }
        MembershipEvent::Left { node_id } => {
            pmap.remove(node_id);
            tmap.remove(node_id);
            if writer.explicit_primary.as_deref() == Some(node_id.as_str()) {
                writer.explicit_primary = None;
            }
        }
        MembershipEvent::Unreachable { node_id } => {
            set_health(pmap, tmap, node_id, NodeHealth::Unreachable);
        }
        MembershipEvent::Recovered { node_id } => {
            set_health(pmap, tmap, node_id, NodeHealth::Alive);
        }
        MembershipEvent::PrimaryDesignated { node_id } => {
            if pmap.contains_key(node_id) {
                writer.explicit_primary = Some(node_id.clone());
            }
        }
    }
}

fn set_health(
    pmap: &mut BTreeMap<String, Node>,
    tmap: &mut BTreeMap<String, Node>,
    node_id: &str,
    health: NodeHealth,
) {
    if let Some(node) = pmap.get_mut(node_id).or_else(|| tmap.get_mut(node_id)) {
        node.health = health;
    }
}

/// Explicit primary if it is alive, else the lowest-id alive proxy. With no alive
/// proxy the last known primary is kept and the map is degraded.
fn elect_primary(
    writer: &WriterState,
    current: &ClusterMap,
    pmap: &BTreeMap<String, Node>,
) -> (Option<Node>, bool) {
    let explicit = writer
        .explicit_primary
        .as_deref()
        .and_then(|id| pmap.get(id))
        .filter(|n| n.is_alive());
    if let Some(primary) = explicit.or_else(|| pmap.values().find(|n| n.is_alive())) {
        return (Some(primary.clone()), false);
    }
    if pmap.is_empty() && current.primary().is_none() {
        return (None, false);
    }
    let last_known =
        current.primary().map(|p| pmap.get(&p.id).cloned().unwrap_or_else(|| p.clone()));
    (last_known, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn joined(node: Node) -> MembershipEvent {
        MembershipEvent::Joined(node)
    }

    fn owner_with_cluster() -> ClusterMapOwner {
        let owner = ClusterMapOwner::new("c1");
        owner.on_membership_changes(&[
            joined(Node::proxy("p2", "http://p2")),
            joined(Node::proxy("p1", "http://p1")),
            joined(Node::target("t1", "http://t1")),
            joined(Node::target("t2", "http://t2")),
        ]);
        owner
    }

    #[test]
    fn test_versions_strictly_increase() {
        let owner = ClusterMapOwner::new("c1");
        let mut last = owner.current().version();
        for i in 0..5 {
            let smap = owner
                .on_membership_change(&joined(Node::target(format!("t{i}"), "http://t")))
                .unwrap();
            assert!(smap.version() > last);
            assert_eq!(owner.current().version(), smap.version());
            last = smap.version();
        }
    }

    #[test]
    fn test_noop_event_does_not_bump_version() {
        let owner = owner_with_cluster();
        let version = owner.current().version();
        assert!(owner.on_membership_change(&joined(Node::target("t1", "http://t1"))).is_none());
        assert!(owner
            .on_membership_change(&MembershipEvent::Recovered { node_id: "t1".into() })
            .is_none());
        assert_eq!(owner.current().version(), version);
    }

    #[test]
    fn test_lowest_id_alive_proxy_is_primary() {
        let owner = owner_with_cluster();
        assert_eq!(owner.current().primary().unwrap().id, "p1");

        owner.on_membership_change(&MembershipEvent::Unreachable { node_id: "p1".into() });
        assert_eq!(owner.current().primary().unwrap().id, "p2");

        owner.on_membership_change(&MembershipEvent::Recovered { node_id: "p1".into() });
        assert_eq!(owner.current().primary().unwrap().id, "p1");
    }

    #[test]
    fn test_explicit_primary_wins() {
        let owner = owner_with_cluster();
        let smap = owner.designate_primary("p2").unwrap();
        assert_eq!(smap.primary().unwrap().id, "p2");

        owner.on_membership_change(&joined(Node::proxy("p0", "http://p0")));
        assert_eq!(owner.current().primary().unwrap().id, "p2");

        // Falls back to election when the designated primary leaves.
        owner.on_membership_change(&MembershipEvent::Left { node_id: "p2".into() });
        assert_eq!(owner.current().primary().unwrap().id, "p0");
    }

    #[test]
    fn test_designate_unknown_proxy() {
        let owner = owner_with_cluster();
        assert!(matches!(owner.designate_primary("t1"), Err(Error::NodeNotFound(_))));
    }

    #[test]
    fn test_degraded_when_no_proxy_alive() {
        let owner = owner_with_cluster();
        owner.on_membership_changes(&[
            MembershipEvent::Unreachable { node_id: "p1".into() },
            MembershipEvent::Unreachable { node_id: "p2".into() },
        ]);
        let smap = owner.current();
        assert!(smap.is_degraded());
        assert!(smap.primary().is_some());
        assert!(!smap.pmap().is_empty());

        owner.on_membership_change(&MembershipEvent::Recovered { node_id: "p2".into() });
        assert!(!owner.current().is_degraded());
        assert_eq!(owner.current().primary().unwrap().id, "p2");
    }

    #[test]
    fn test_old_snapshot_stays_valid() {
        let owner = owner_with_cluster();
        let before = owner.current();
        owner.on_membership_change(&MembershipEvent::Left { node_id: "t2".into() });
        assert_eq!(before.tmap().len(), 2);
        assert_eq!(owner.current().tmap().len(), 1);
    }

    #[test]
    fn test_sync_from() {
        let owner = owner_with_cluster();
        let current = owner.current();

        let stale = (*current).clone();
        assert!(matches!(owner.sync_from(stale), Err(Error::StaleClusterMap { .. })));

        let foreign = ClusterMap::empty("other");
        assert!(matches!(owner.sync_from(foreign), Err(Error::ClusterUuidMismatch { .. })));

        let newer = owner_with_cluster();
        newer.on_membership_change(&MembershipEvent::Left { node_id: "t2".into() });
        newer.on_membership_change(&MembershipEvent::Left { node_id: "t1".into() });
        let offered = (*newer.current()).clone();
        let adopted = owner.sync_from(offered).unwrap();
        assert_eq!(adopted.version(), current.version() + 2);
        assert!(owner.current().tmap().is_empty());
    }

    fn map_at(version: u64) -> ClusterMap {
        let p1 = Node::proxy("p1", "http://p1");
        ClusterMap::from_parts(
            version,
            "c1".into(),
            Some(p1.clone()),
            BTreeMap::from([(p1.id.clone(), p1)]),
            BTreeMap::new(),
            false,
        )
    }

    #[test]
    fn test_sync_rejects_exhausted_version() {
        let owner = owner_with_cluster();
        let version = owner.current().version();
        assert!(matches!(owner.sync_from(map_at(u64::MAX)), Err(Error::InvalidRequest(_))));
        assert_eq!(owner.current().version(), version);

        // Membership keeps advancing normally afterwards.
        let smap = owner.on_membership_change(&joined(Node::target("t3", "http://t3"))).unwrap();
        assert_eq!(smap.version(), version + 1);
    }

    #[test]
    fn test_sync_rejects_far_ahead_map() {
        let owner = owner_with_cluster();
        let version = owner.current().version();
        let ahead = map_at(version + MAX_SYNC_VERSION_GAP + 1);
        assert!(matches!(owner.sync_from(ahead), Err(Error::InvalidRequest(_))));

        let adopted = owner.sync_from(map_at(version + MAX_SYNC_VERSION_GAP)).unwrap();
        assert_eq!(adopted.version(), version + MAX_SYNC_VERSION_GAP);
    }

    #[test]
    fn test_sync_rejects_primary_outside_pmap() {
        let owner = owner_with_cluster();
        let ghost = ClusterMap::from_parts(
            10,
            "c1".into(),
            Some(Node::proxy("ghost", "http://ghost")),
            BTreeMap::new(),
            BTreeMap::new(),
            false,
        );
        assert!(matches!(owner.sync_from(ghost), Err(Error::InvalidRequest(_))));
        assert_eq!(owner.current().primary().unwrap().id, "p1");

        // The explicit primary was not taken from the rejected map.
        owner.on_membership_change(&joined(Node::proxy("p0", "http://p0")));
        assert_eq!(owner.current().primary().unwrap().id, "p0");
    }

    #[test]
    fn test_exhausted_version_is_not_published() {
        let owner = ClusterMapOwner::from_map(map_at(u64::MAX - 1));
        assert!(owner.on_membership_change(&joined(Node::target("t1", "http://t1"))).is_none());
        assert_eq!(owner.current().version(), u64::MAX - 1);
        assert!(owner.current().tmap().is_empty());

        let p1 = Node::proxy("p1", "http://p1");
        let p2 = Node::proxy("p2", "http://p2");
        let two_proxies = ClusterMap::from_parts(
            u64::MAX - 1,
            "c1".into(),
            Some(p1.clone()),
            BTreeMap::from([(p1.id.clone(), p1), (p2.id.clone(), p2)]),
            BTreeMap::new(),
            false,
        );
        let owner = ClusterMapOwner::from_map(two_proxies);
        assert!(matches!(owner.designate_primary("p2"), Err(Error::Internal(_))));
        assert_eq!(owner.current().primary().unwrap().id, "p1");
    }

    #[test]
    fn test_reconcile() {
        let owner = owner_with_cluster();
        let smap = owner
            .reconcile(vec![Node::proxy("p1", "http://p1"), Node::target("t9", "http://t9")])
            .unwrap();
        assert_eq!(smap.pmap().len(), 1);
        assert!(smap.tmap().contains_key("t9"));
    }

    #[test]
    fn test_persists_published_maps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("smap.json");
        let owner = owner_with_cluster().with_persistence(&path);
        owner.on_membership_change(&joined(Node::target("t3", "http://t3")));

        let loaded = ClusterMap::load(&path).unwrap();
        assert_eq!(loaded.version(), owner.current().version());

        let restored = ClusterMapOwner::from_map(loaded);
        assert_eq!(restored.current().tmap().len(), 3);
    }

    #[tokio::test]
    async fn test_subscribers_see_new_versions() {
        let owner = owner_with_cluster();
        let mut rx = owner.subscribe();
        let seen = rx.borrow_and_update().version();
        owner.on_membership_change(&joined(Node::target("t3", "http://t3")));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().version(), seen + 1);
    }

    #[tokio::test]
    async fn test_follow_registry() {
        use crate::registry::RegistryConfig;

        let registry = Arc::new(NodeRegistry::new(RegistryConfig::default()));
        let owner = Arc::new(ClusterMapOwner::new("c1"));
        let mut rx = owner.subscribe();
        let handle = Arc::clone(&owner).follow(Arc::clone(&registry));

        registry.register(Node::proxy("p1", "http://p1")).unwrap();
        registry.register(Node::target("t1", "http://t1")).unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(2), async {
            loop {
                rx.changed().await.unwrap();
                if rx.borrow().is_operational() {
                    break;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(owner.current().primary().unwrap().id, "p1");
        handle.abort();
    }
}
