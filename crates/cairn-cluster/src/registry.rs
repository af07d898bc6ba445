// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Cairn Authors

//! Node registry: identity and liveness of proxies and targets.
//!
//! The registry:
//! - Tracks every registered node and the time of its last heartbeat
//! - Marks a node unreachable after `missed_heartbeats` consecutive intervals
//!   without a heartbeat, and alive again on the next heartbeat
//! - Emits a [`MembershipEvent`] for every transition, both as the return value
//!   of the mutating call and on a broadcast channel

use std::sync::Arc;
use std::time::{Duration, Instant};

use cairn_core::{Error, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use metrics::{counter, gauge};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, trace, warn};

use crate::node::{Node, NodeHealth, NodeRole};

/// Membership transitions reported to the cluster map owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipEvent {
    /// A node joined the cluster.
    Joined(Node),
    /// A registered node re-registered with a new address.
    Updated(Node),
    /// A node left the cluster.
    Left {
        /// The node ID.
        node_id: String,
    },
    /// A node missed too many heartbeats.
    Unreachable {
        /// The node ID.
        node_id: String,
    },
    /// An unreachable node is heartbeating again.
    Recovered {
        /// The node ID.
        node_id: String,
    },
    /// A proxy was explicitly designated primary.
    PrimaryDesignated {
        /// The proxy ID.
        node_id: String,
    },
}

impl MembershipEvent {
    /// Returns the node the event is about.
    #[must_use]
    pub fn node_id(&self) -> &str {
        match self {
            Self::Joined(node) | Self::Updated(node) => &node.id,
            Self::Left { node_id }
            | Self::Unreachable { node_id }
            | Self::Recovered { node_id }
            | Self::PrimaryDesignated { node_id } => node_id,
        }
    }
}

/// Configuration for the node registry.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Expected interval between heartbeats from each node.
    pub heartbeat_interval: Duration,
    /// Consecutive missed heartbeats before a node is unreachable.
    pub missed_heartbeats: u32,
    /// Interval between liveness checks.
    pub check_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(1),
            missed_heartbeats: 3,
            check_interval: Duration::from_millis(500),
        }
    }
}

impl RegistryConfig {
    /// How long a node may stay silent before it is unreachable.
    #[must_use]
    pub fn unreachable_after(&self) -> Duration {
        self.heartbeat_interval * self.missed_heartbeats.max(1)
    }
}

impl From<&cairn_core::ClusterConfig> for RegistryConfig {
    fn from(config: &cairn_core::ClusterConfig) -> Self {
        let heartbeat_interval = config.heartbeat_interval();
        Self {
            heartbeat_interval,
            missed_heartbeats: config.missed_heartbeats,
            check_interval: heartbeat_interval / 2,
        }
    }
}

#[derive(Debug, Clone)]
struct TrackedNode {
    node: Node,
    last_heartbeat: Instant,
}

/// Registry of cluster nodes.
pub struct NodeRegistry {
    config: RegistryConfig,
    nodes: Arc<DashMap<String, TrackedNode>>,
    event_tx: broadcast::Sender<MembershipEvent>,
    shutdown_tx: Mutex<Option<mpsc::Sender<()>>>,
}

impl NodeRegistry {
    /// Creates an empty registry.
    pub fn new(config: RegistryConfig) -> Self {
        let (event_tx, _) = broadcast::channel(1024);
        Self {
            config,
            nodes: Arc::new(DashMap::new()),
            event_tx,
            shutdown_tx: Mutex::new(None),
        }
    }

    /// Subscribes to membership events.
    pub fn subscribe(&self) -> broadcast::Receiver<MembershipEvent> {
        self.event_tx.subscribe()
    }

    /// Registers a node.
    ///
    /// Registering an id that is already known with the same role refreshes its
    /// address and liveness.
    ///
    /// # Errors
    ///
    /// Returns `NodeConflict` if the id is registered with a different role.
    pub fn register(&self, node: Node) -> Result<Option<MembershipEvent>> {
        let event = match self.nodes.entry(node.id.clone()) {
            Entry::Occupied(mut entry) => {
                let tracked = entry.get_mut();
                if tracked.node.role != node.role {
                    return Err(Error::NodeConflict {
                        node_id: node.id,
                        existing: tracked.node.role.to_string(),
                        requested: node.role.to_string(),
                    });
                }
                tracked.last_heartbeat = Instant::now();
                if tracked.node.health == NodeHealth::Unreachable {
                    tracked.node.health = NodeHealth::Alive;
                    tracked.node.url = node.url;
                    Some(MembershipEvent::Recovered { node_id: tracked.node.id.clone() })
                } else if tracked.node.url != node.url {
                    tracked.node.url = node.url;
                    Some(MembershipEvent::Updated(tracked.node.clone()))
                } else {
                    None
                }
            }
            Entry::Vacant(entry) => {
                let node = Node { health: NodeHealth::Alive, ..node };
                entry.insert(TrackedNode { node: node.clone(), last_heartbeat: Instant::now() });
                Some(MembershipEvent::Joined(node))
            }
        };

        if let Some(event) = &event {
            info!(node_id = %event.node_id(), event = ?event, "Node registered");
            self.publish(event.clone());
            self.record_gauges();
        }
        Ok(event)
    }

    /// Records a heartbeat from a node.
    ///
    /// # Errors
    ///
    /// Returns `NodeNotFound` if the node is not registered.
    pub fn heartbeat(&self, node_id: &str) -> Result<Option<MembershipEvent>> {
        let mut tracked =
            self.nodes.get_mut(node_id).ok_or_else(|| Error::NodeNotFound(node_id.to_string()))?;
        tracked.last_heartbeat = Instant::now();
        counter!("cairn_cluster_heartbeats_received").increment(1);
        trace!(node_id = %node_id, "Processed heartbeat");

        if tracked.node.health == NodeHealth::Alive {
            return Ok(None);
        }
        tracked.node.health = NodeHealth::Alive;
        drop(tracked);

        let event = MembershipEvent::Recovered { node_id: node_id.to_string() };
        info!(node_id = %node_id, "Node recovered");
        self.publish(event.clone());
        self.record_gauges();
        Ok(Some(event))
    }

    /// Removes a node after confirmed departure.
    ///
    /// # Errors
    ///
    /// Returns `NodeNotFound` if the node is not registered.
    pub fn deregister(&self, node_id: &str) -> Result<MembershipEvent> {
        self.nodes.remove(node_id).ok_or_else(|| Error::NodeNotFound(node_id.to_string()))?;
        let event = MembershipEvent::Left { node_id: node_id.to_string() };
        info!(node_id = %node_id, "Node deregistered");
        self.publish(event.clone());
        self.record_gauges();
        Ok(event)
    }

    /// Returns all registered nodes, sorted by id.
    pub fn snapshot(&self) -> Vec<Node> {
        let mut nodes: Vec<Node> = self.nodes.iter().map(|e| e.value().node.clone()).collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes
    }

    /// Returns a single node.
    pub fn get(&self, node_id: &str) -> Option<Node> {
        self.nodes.get(node_id).map(|e| e.node.clone())
    }

    /// Returns the number of registered nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if no node is registered.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Marks nodes that missed too many heartbeats as unreachable.
    pub fn check_liveness(&self) -> Vec<MembershipEvent> {
        Self::check_liveness_at(&self.config, &self.nodes, &self.event_tx, Instant::now())
    }

    fn check_liveness_at(
        config: &RegistryConfig,
        nodes: &DashMap<String, TrackedNode>,
        event_tx: &broadcast::Sender<MembershipEvent>,
        now: Instant,
    ) -> Vec<MembershipEvent> {
        let deadline = config.unreachable_after();
        let mut events = Vec::new();

        for mut entry in nodes.iter_mut() {
            let tracked = entry.value_mut();
            if tracked.node.health == NodeHealth::Alive
                && now.saturating_duration_since(tracked.last_heartbeat) > deadline
            {
                tracked.node.health = NodeHealth::Unreachable;
                warn!(
                    node_id = %tracked.node.id,
                    role = %tracked.node.role,
                    silent_ms = now.saturating_duration_since(tracked.last_heartbeat).as_millis(),
                    "Node missed heartbeats, marking unreachable"
                );
                counter!("cairn_cluster_nodes_unreachable_total").increment(1);
                events.push(MembershipEvent::Unreachable { node_id: tracked.node.id.clone() });
            }
        }

        for event in &events {
            let _ = event_tx.send(event.clone());
        }
        events
    }

    /// Starts the periodic liveness check.
    pub fn start(&self) {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        *self.shutdown_tx.lock() = Some(shutdown_tx);

        let config = self.config.clone();
        let nodes = Arc::clone(&self.nodes);
        let event_tx = self.event_tx.clone();

        tokio::spawn(async move {
            let period = config.check_interval.max(Duration::from_millis(1));
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let events =
                            Self::check_liveness_at(&config, &nodes, &event_tx, Instant::now());
                        if !events.is_empty() {
                            debug!(transitions = events.len(), "Liveness check completed");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Node registry shutting down");
                        break;
                    }
                }
            }
        });

        info!(
            interval_ms = self.config.heartbeat_interval.as_millis(),
            missed_heartbeats = self.config.missed_heartbeats,
            "Node registry liveness checks started"
        );
    }

    /// Stops the liveness check.
    pub async fn stop(&self) {
        let shutdown_tx = self.shutdown_tx.lock().take();
        if let Some(tx) = shutdown_tx {
            let _ = tx.send(()).await;
        }
    }

    fn publish(&self, event: MembershipEvent) {
        // No subscribers is fine, callers also get the event back.
        let _ = self.event_tx.send(event);
    }

    fn record_gauges(&self) {
        let (mut proxies, mut targets) = (0usize, 0usize);
        for entry in self.nodes.iter() {
            match entry.node.role {
                NodeRole::Proxy => proxies += 1,
                NodeRole::Target => targets += 1,
            }
        }
        gauge!("cairn_cluster_nodes", "role" => "proxy").set(proxies as f64);
        gauge!("cairn_cluster_nodes", "role" => "target").set(targets as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> NodeRegistry {
        NodeRegistry::new(RegistryConfig {
            heartbeat_interval: Duration::from_millis(100),
            missed_heartbeats: 3,
            check_interval: Duration::from_millis(50),
        })
    }

    #[test]
    fn test_register_emits_joined() {
        let registry = registry();
        let event = registry.register(Node::proxy("p1", "http://p1")).unwrap();
        assert!(matches!(event, Some(MembershipEvent::Joined(ref n)) if n.id == "p1"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_register_same_role_is_idempotent() {
        let registry = registry();
        registry.register(Node::target("t1", "http://t1")).unwrap();
        assert_eq!(registry.register(Node::target("t1", "http://t1")).unwrap(), None);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_register_new_url_emits_updated() {
        let registry = registry();
        registry.register(Node::target("t1", "http://old")).unwrap();
        let event = registry.register(Node::target("t1", "http://new")).unwrap();
        assert!(matches!(event, Some(MembershipEvent::Updated(ref n)) if n.url == "http://new"));
    }

    #[test]
    fn test_register_conflicting_role() {
        let registry = registry();
        registry.register(Node::proxy("n1", "http://n1")).unwrap();
        let err = registry.register(Node::target("n1", "http://n1")).unwrap_err();
        assert!(matches!(err, Error::NodeConflict { ref existing, .. } if existing == "proxy"));
        assert_eq!(registry.get("n1").unwrap().role, NodeRole::Proxy);
    }

    #[test]
    fn test_heartbeat_unknown_node() {
        let registry = registry();
        assert!(matches!(registry.heartbeat("ghost"), Err(Error::NodeNotFound(_))));
    }

    #[test]
    fn test_deregister() {
        let registry = registry();
        registry.register(Node::target("t1", "http://t1")).unwrap();
        let event = registry.deregister("t1").unwrap();
        assert_eq!(event, MembershipEvent::Left { node_id: "t1".into() });
        assert!(registry.is_empty());
        assert!(registry.deregister("t1").is_err());
    }

    #[test]
    fn test_missed_heartbeats_mark_unreachable() {
        let registry = registry();
        registry.register(Node::target("t1", "http://t1")).unwrap();
        registry.register(Node::target("t2", "http://t2")).unwrap();

        let later = Instant::now() + Duration::from_millis(500);
        registry.heartbeat("t2").unwrap();
        let events = NodeRegistry::check_liveness_at(
            &registry.config,
            &registry.nodes,
            &registry.event_tx,
            later,
        );
        // t2 heartbeated "now", which is still older than `later` by 500ms > 300ms.
        assert_eq!(events.len(), 2);
        assert_eq!(registry.get("t1").unwrap().health, NodeHealth::Unreachable);

        // Only alive nodes transition.
        let again = NodeRegistry::check_liveness_at(
            &registry.config,
            &registry.nodes,
            &registry.event_tx,
            later,
        );
        assert!(again.is_empty());
    }

    #[test]
    fn test_within_threshold_stays_alive() {
        let registry = registry();
        registry.register(Node::target("t1", "http://t1")).unwrap();
        let soon = Instant::now() + Duration::from_millis(150);
        let events = NodeRegistry::check_liveness_at(
            &registry.config,
            &registry.nodes,
            &registry.event_tx,
            soon,
        );
        assert!(events.is_empty());
        assert!(registry.get("t1").unwrap().is_alive());
    }

    #[test]
    fn test_heartbeat_recovers_unreachable() {
        let registry = registry();
        registry.register(Node::target("t1", "http://t1")).unwrap();
        NodeRegistry::check_liveness_at(
            &registry.config,
            &registry.nodes,
            &registry.event_tx,
            Instant::now() + Duration::from_secs(1),
        );
        let event = registry.heartbeat("t1").unwrap();
        assert_eq!(event, Some(MembershipEvent::Recovered { node_id: "t1".into() }));
        assert!(registry.get("t1").unwrap().is_alive());
    }

    #[tokio::test]
    async fn test_event_subscription() {
        let registry = registry();
        let mut rx = registry.subscribe();
        registry.register(Node::proxy("p1", "http://p1")).unwrap();
        match rx.try_recv().unwrap() {
            MembershipEvent::Joined(node) => assert_eq!(node.id, "p1"),
            other => panic!("Expected Joined event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_background_liveness_loop() {
        let registry = NodeRegistry::new(RegistryConfig {
            heartbeat_interval: Duration::from_millis(10),
            missed_heartbeats: 2,
            check_interval: Duration::from_millis(5),
        });
        let mut rx = registry.subscribe();
        registry.register(Node::target("t1", "http://t1")).unwrap();
        registry.start();

        let event = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Ok(MembershipEvent::Unreachable { node_id }) = rx.recv().await {
                    break node_id;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(event, "t1");
        registry.stop().await;
    }
}
