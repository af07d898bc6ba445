// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Cairn Authors

//! Eviction and bucket copy driven through the xaction coordinator.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use cairn_cluster::{
    ClusterMapOwner, CoordinatorConfig, MembershipEvent, Node, XactionCoordinator, XactionKind,
    XactionParams, XactionState,
};
use cairn_core::{Bck, Error, Provider};
use cairn_storage::{Backends, BmdOwner, BucketTracker, InMemoryBackend, ListProps};

struct Cluster {
    tracker: Arc<BucketTracker>,
    coordinator: XactionCoordinator,
    aws: Arc<InMemoryBackend>,
}

fn cluster(targets: usize) -> Cluster {
    let smap = Arc::new(ClusterMapOwner::new("c1"));
    let mut events = vec![MembershipEvent::Joined(Node::proxy("p1", "http://p1"))];
    for i in 1..=targets {
        events.push(MembershipEvent::Joined(Node::target(format!("t{i}"), "http://t")));
    }
    smap.on_membership_changes(&events);

    let aws = Arc::new(InMemoryBackend::new(Provider::Aws));
    let tracker = Arc::new(BucketTracker::new(
        Arc::clone(&smap),
        Arc::new(BmdOwner::new("c1")),
        Backends::new().with(aws.clone()),
    ));
    let coordinator =
        XactionCoordinator::new(CoordinatorConfig::default(), smap, tracker.clone(), tracker.clone());
    Cluster { tracker, coordinator, aws }
}

async fn run(c: &Cluster, kind: XactionKind, params: XactionParams) -> XactionState {
    let id = c.coordinator.submit(kind, params).await.unwrap();
    let outcome = c.coordinator.wait(&id, Duration::from_secs(5)).await.unwrap();
    assert!(!outcome.is_timed_out());
    outcome.snapshot().state
}

async fn cached(c: &Cluster, bck: &Bck) -> usize {
    let props: ListProps = "name,cached".parse().unwrap();
    c.tracker.list_objects(bck, None, props).await.unwrap().filter(|e| e.is_cached()).count()
}

#[tokio::test]
async fn test_evict_remote_bucket() {
    let c = cluster(3);
    for i in 0..20 {
        c.aws.insert("photos", format!("img-{i}"), Bytes::from_static(b"data"));
    }
    let bck = Bck::new("photos", Provider::Aws);
    for i in 0..20 {
        c.tracker.get_object(&bck, &format!("img-{i}")).await.unwrap();
    }
    assert_eq!(cached(&c, &bck).await, 20);

    let state = run(&c, XactionKind::EvictRemoteBucket, XactionParams::evict(bck.clone())).await;
    assert_eq!(state, XactionState::Finished);
    assert_eq!(cached(&c, &bck).await, 0);

    // Objects stay readable through a cold GET.
    assert_eq!(c.tracker.get_object(&bck, "img-3").await.unwrap(), "data");

    // Evicting an already-evicted bucket still finishes.
    c.tracker.list_objects(&bck, None, ListProps::default()).await.unwrap();
    let state = run(&c, XactionKind::EvictRemoteBucket, XactionParams::evict(bck.clone())).await;
    assert_eq!(state, XactionState::Finished);
}

#[tokio::test]
async fn test_evict_with_prefix() {
    let c = cluster(2);
    let bck = Bck::new("logs", Provider::Aws);
    for name in ["2024/a", "2024/b", "2025/a"] {
        c.aws.insert("logs", name, Bytes::from_static(b"x"));
        c.tracker.get_object(&bck, name).await.unwrap();
    }
    let params = XactionParams::evict(bck.clone()).with_prefix("2024/");
    assert_eq!(run(&c, XactionKind::EvictRemoteBucket, params).await, XactionState::Finished);
    assert_eq!(cached(&c, &bck).await, 1);
}

#[tokio::test]
async fn test_evict_native_bucket_rejected() {
    let c = cluster(1);
    let bck = Bck::ais("local");
    c.tracker.create_bucket(&bck).unwrap();
    let err = c
        .coordinator
        .submit(XactionKind::EvictRemoteBucket, XactionParams::evict(bck))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotRemoteBucket { .. }));
}

#[tokio::test]
async fn test_copy_native_bucket() {
    let c = cluster(3);
    let (afrom, ato) = (Bck::ais("afrom"), Bck::ais("ato"));
    c.tracker.create_bucket(&afrom).unwrap();
    c.tracker.create_bucket(&ato).unwrap();
    for i in 0..10 {
        let data = Bytes::from(format!("payload-{i}"));
        c.tracker.put_object(&afrom, &format!("obj-{i}"), data).await.unwrap();
    }

    let id = c
        .coordinator
        .submit(XactionKind::CopyBucket, XactionParams::copy(afrom.clone(), ato.clone()))
        .await
        .unwrap();
    let outcome = c.coordinator.wait(&id, Duration::from_secs(5)).await.unwrap();
    let snap = outcome.snapshot();
    assert_eq!(snap.state, XactionState::Finished);
    assert_eq!(snap.objects, 10);

    let copied = c.tracker.list_objects(&ato, None, ListProps::name_only()).await.unwrap();
    assert_eq!(copied.len(), 10);
    assert_eq!(c.tracker.get_object(&ato, "obj-7").await.unwrap(), "payload-7");
}

#[tokio::test]
async fn test_copy_remote_to_native() {
    let c = cluster(2);
    for i in 0..6 {
        c.aws.insert("src", format!("o{i}"), Bytes::from_static(b"r"));
    }
    let (src, dst) = (Bck::new("src", Provider::Aws), Bck::ais("dst"));
    c.tracker.create_bucket(&dst).unwrap();

    let state = run(&c, XactionKind::CopyBucket, XactionParams::copy(src, dst.clone())).await;
    assert_eq!(state, XactionState::Finished);
    assert_eq!(c.tracker.list_objects(&dst, None, ListProps::name_only()).await.unwrap().len(), 6);
}

#[tokio::test]
async fn test_copy_into_missing_bucket_rejected() {
    let c = cluster(1);
    let src = Bck::ais("src");
    c.tracker.create_bucket(&src).unwrap();
    let err = c
        .coordinator
        .submit(XactionKind::CopyBucket, XactionParams::copy(src, Bck::ais("nope")))
        .await
        .unwrap_err();
    assert!(err.is_bucket_not_found());
}
