// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Cairn Authors

//! Integration tests for cluster membership and xactions.

use std::sync::Arc;
use std::time::Duration;

use cairn_cluster::{
    ClusterMapOwner, CoordinatorConfig, NoOpBucketResolver, NoOpTargetWorker, Node,
    NodeRegistry, RegistryConfig, XactionCoordinator, XactionKind, XactionParams, XactionState,
};
use cairn_core::Bck;

async fn wait_operational(owner: &ClusterMapOwner, targets: usize) {
    let mut rx = owner.subscribe();
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            {
                let smap = rx.borrow_and_update();
                if smap.is_operational() && smap.tmap().len() == targets {
                    return;
                }
            }
            rx.changed().await.unwrap();
        }
    })
    .await
    .unwrap();
}

#[test]
fn test_registry_defaults() {
    let config = RegistryConfig::default();
    assert_eq!(config.missed_heartbeats, 3);
    assert_eq!(config.unreachable_after(), Duration::from_secs(3));
}

#[tokio::test]
async fn test_versions_seen_by_one_caller_increase() {
    let registry = Arc::new(NodeRegistry::new(RegistryConfig::default()));
    let owner = Arc::new(ClusterMapOwner::new("c1"));
    let _follower = Arc::clone(&owner).follow(Arc::clone(&registry));

    registry.register(Node::proxy("p1", "http://p1")).unwrap();
    for i in 0..5 {
        registry.register(Node::target(format!("t{i}"), "http://t")).unwrap();
    }
    wait_operational(&owner, 5).await;

    let mut rx = owner.subscribe();
    let mut last = rx.borrow_and_update().version();
    for id in ["t0", "t1"] {
        registry.deregister(id).unwrap();
        tokio::time::timeout(Duration::from_secs(2), rx.changed()).await.unwrap().unwrap();
        let smap = rx.borrow_and_update().clone();
        assert!(smap.version() > last);
        assert!(!smap.pmap().is_empty() || !smap.tmap().is_empty());
        last = smap.version();
    }
}

#[tokio::test]
async fn test_unreachable_target_reaches_smap() {
    let registry = Arc::new(NodeRegistry::new(RegistryConfig {
        heartbeat_interval: Duration::from_millis(20),
        missed_heartbeats: 2,
        check_interval: Duration::from_millis(10),
    }));
    let owner = Arc::new(ClusterMapOwner::new("c1"));
    let _follower = Arc::clone(&owner).follow(Arc::clone(&registry));

    registry.register(Node::proxy("p1", "http://p1")).unwrap();
    registry.register(Node::target("t1", "http://t1")).unwrap();
    wait_operational(&owner, 1).await;
    registry.start();

    let mut rx = owner.subscribe();
    tokio::time::timeout(Duration::from_secs(2), async {
        while owner.current().is_target_alive("t1") {
            rx.changed().await.unwrap();
        }
    })
    .await
    .unwrap();
    registry.stop().await;
}

#[tokio::test]
async fn test_copy_over_registered_cluster() {
    let registry = Arc::new(NodeRegistry::new(RegistryConfig::default()));
    let owner = Arc::new(ClusterMapOwner::new("c1"));
    let _follower = Arc::clone(&owner).follow(Arc::clone(&registry));
    registry.register(Node::proxy("p1", "http://p1")).unwrap();
    registry.register(Node::target("t1", "http://t1")).unwrap();
    registry.register(Node::target("t2", "http://t2")).unwrap();
    wait_operational(&owner, 2).await;

    let coordinator = XactionCoordinator::new(
        CoordinatorConfig::default(),
        Arc::clone(&owner),
        Arc::new(NoOpBucketResolver),
        Arc::new(NoOpTargetWorker),
    );
    let id = coordinator
        .submit(XactionKind::CopyBucket, XactionParams::copy(Bck::ais("afrom"), Bck::ais("ato")))
        .await
        .unwrap();
    assert!(!id.is_empty());

    let outcome = coordinator.wait(&id, Duration::from_secs(5)).await.unwrap();
    assert_eq!(outcome.snapshot().state, XactionState::Finished);
    assert_eq!(outcome.snapshot().targets.len(), 2);
}
