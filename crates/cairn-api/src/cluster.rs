// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Cairn Authors

//! In-process cluster facade.
//!
//! [`Cluster`] wires the node registry, cluster map owner, bucket tracker and
//! xaction coordinator together and exposes the caller-facing operations. The
//! HTTP router is a thin layer over it.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use cairn_cluster::{
    ClusterMap, ClusterMapOwner, CoordinatorConfig, Node, NodeRegistry, RegistryConfig,
    XactionCoordinator, XactionKind, XactionParams, XactionSnapshot, XactionState,
};
use cairn_core::{Bck, BucketInfo, Config, Error, Provider, Result};
use cairn_storage::{
    Backends, BmdOwner, BucketTracker, FsStore, ListProps, LocalStore, ObjectList,
};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// A running cluster instance.
pub struct Cluster {
    registry: Arc<NodeRegistry>,
    smap: Arc<ClusterMapOwner>,
    tracker: Arc<BucketTracker>,
    xactions: Arc<XactionCoordinator>,
    heartbeat_interval: Duration,
    /// Nodes hosted by this process, heartbeated locally.
    local_nodes: Vec<String>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Cluster {
    /// Boots a cluster from configuration with in-memory remote backends.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, if a persisted cluster
    /// map cannot be loaded or belongs to another cluster, or if the configured
    /// nodes conflict.
    pub fn new(config: &Config) -> Result<Self> {
        Self::with_backends(config, Backends::in_memory())
    }

    /// Boots a cluster from configuration with the given remote backends.
    ///
    /// # Errors
    ///
    /// See [`Cluster::new`].
    pub fn with_backends(config: &Config, backends: Backends) -> Result<Self> {
        config.validate()?;
        let cluster = &config.cluster;
        let smap = Arc::new(load_cluster_map(config)?);
        let uuid = smap.current().uuid().to_string();
        let registry = Arc::new(NodeRegistry::new(RegistryConfig::from(cluster)));

        let mut local_nodes = Vec::new();
        let configured = cluster
            .proxies
            .iter()
            .map(|n| Node::proxy(&n.id, &n.url))
            .chain(cluster.targets.iter().map(|n| Node::target(&n.id, &n.url)));
        for node in configured {
            local_nodes.push(node.id.clone());
            registry.register(node)?;
        }
        smap.reconcile(registry.snapshot());
        if let Some(primary) = &cluster.primary {
            smap.designate_primary(primary)?;
        }

        let mut tracker =
            BucketTracker::new(Arc::clone(&smap), Arc::new(BmdOwner::new(&uuid)), backends);
        if let Some(dir) = config.storage.data_dir.clone() {
            tracker = tracker.with_store_factory(Arc::new(move |node: &Node| {
                Arc::new(FsStore::new(dir.join(&node.id))) as Arc<dyn LocalStore>
            }));
        }
        let tracker = Arc::new(tracker);
        let xactions = Arc::new(XactionCoordinator::new(
            CoordinatorConfig::from(&config.xaction),
            Arc::clone(&smap),
            tracker.clone(),
            tracker.clone(),
        ));

        let current = smap.current();
        info!(
            uuid = %uuid,
            version = current.version(),
            proxies = current.pmap().len(),
            targets = current.tmap().len(),
            "Cluster initialized"
        );

        Ok(Self {
            registry,
            smap,
            tracker,
            xactions,
            heartbeat_interval: cluster.heartbeat_interval(),
            local_nodes,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Starts liveness checks, map following, local heartbeats and xaction GC.
    pub fn start(&self) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            return;
        }
        tasks.push(Arc::clone(&self.smap).follow(Arc::clone(&self.registry)));

        let registry = Arc::clone(&self.registry);
        let local_nodes = self.local_nodes.clone();
        let period = self.heartbeat_interval;
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                for id in &local_nodes {
                    if let Err(e) = registry.heartbeat(id) {
                        warn!(node_id = %id, error = %e, "Local heartbeat failed");
                    }
                }
            }
        }));

        self.registry.start();
        self.xactions.start();
        info!(local_nodes = self.local_nodes.len(), "Cluster started");
    }

    /// Stops all background tasks.
    pub async fn stop(&self) {
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            task.abort();
        }
        self.registry.stop().await;
        self.xactions.stop().await;
        info!("Cluster stopped");
    }

    /// The bucket tracker.
    pub fn tracker(&self) -> &Arc<BucketTracker> {
        &self.tracker
    }

    /// The xaction coordinator.
    pub fn xactions(&self) -> &Arc<XactionCoordinator> {
        &self.xactions
    }

    // Membership

    /// Returns the current cluster map.
    pub fn get_cluster_info(&self) -> Arc<ClusterMap> {
        self.smap.current()
    }

    /// Registers a node and returns the resulting map.
    ///
    /// # Errors
    ///
    /// Returns `NodeConflict` if the id is registered with another role.
    pub fn join_node(&self, node: Node) -> Result<Arc<ClusterMap>> {
        if let Some(event) = self.registry.register(node)? {
            self.smap.on_membership_change(&event);
        }
        Ok(self.smap.current())
    }

    /// Removes a node and returns the resulting map.
    ///
    /// # Errors
    ///
    /// Returns `NodeNotFound` if the node is not registered.
    pub fn leave_node(&self, node_id: &str) -> Result<Arc<ClusterMap>> {
        let event = self.registry.deregister(node_id)?;
        self.smap.on_membership_change(&event);
        Ok(self.smap.current())
    }

    /// Records a heartbeat from a node.
    ///
    /// # Errors
    ///
    /// Returns `NodeNotFound` if the node is not registered.
    pub fn heartbeat(&self, node_id: &str) -> Result<()> {
        if let Some(event) = self.registry.heartbeat(node_id)? {
            self.smap.on_membership_change(&event);
        }
        Ok(())
    }

    /// Designates the primary proxy.
    ///
    /// # Errors
    ///
    /// Returns `NodeNotFound` if the proxy is not in the map.
    pub fn designate_primary(&self, proxy_id: &str) -> Result<Arc<ClusterMap>> {
        self.smap.designate_primary(proxy_id)
    }

    /// Accepts a newer cluster map offered by a peer.
    ///
    /// # Errors
    ///
    /// Returns `StaleClusterMap`, `ClusterUuidMismatch`, or `InvalidRequest` for
    /// maps that are inconsistent or too far ahead.
    pub fn sync_cluster_map(&self, offered: ClusterMap) -> Result<Arc<ClusterMap>> {
        self.smap.sync_from(offered)
    }

    // Buckets

    /// Lists buckets, optionally restricted to one provider.
    pub fn list_buckets(&self, provider: Option<Provider>) -> Vec<Bck> {
        self.tracker.list_buckets(provider)
    }

    /// Creates a native bucket.
    ///
    /// # Errors
    ///
    /// Returns `BucketAlreadyExists` or `InvalidRequest`.
    pub fn create_bucket(&self, bck: &Bck) -> Result<()> {
        self.tracker.create_bucket(bck)
    }

    /// Destroys a native bucket.
    ///
    /// # Errors
    ///
    /// Returns `BucketNotFound` if absent.
    pub async fn destroy_bucket(&self, bck: &Bck) -> Result<()> {
        self.tracker.destroy_bucket(bck).await
    }

    /// Returns bucket information.
    ///
    /// # Errors
    ///
    /// Returns `BucketNotFound` if absent.
    pub async fn head_bucket(&self, bck: &Bck) -> Result<BucketInfo> {
        self.tracker.head_bucket(bck).await
    }

    // Objects

    /// Writes an object.
    ///
    /// # Errors
    ///
    /// Returns `BucketNotFound` if the bucket is absent.
    pub async fn put_object(&self, bck: &Bck, name: &str, data: Bytes) -> Result<()> {
        self.tracker.put_object(bck, name, data).await
    }

    /// Reads an object.
    ///
    /// # Errors
    ///
    /// Returns `BucketNotFound` or `ObjectNotFound`.
    pub async fn get_object(&self, bck: &Bck, name: &str) -> Result<Bytes> {
        self.tracker.get_object(bck, name).await
    }

    /// Deletes an object.
    ///
    /// # Errors
    ///
    /// Returns `BucketNotFound` or `ObjectNotFound`.
    pub async fn delete_object(&self, bck: &Bck, name: &str) -> Result<()> {
        self.tracker.delete_object(bck, name).await
    }

    /// Lists the objects of a bucket.
    ///
    /// # Errors
    ///
    /// Returns `BucketNotFound` if absent.
    pub async fn list_objects(
        &self,
        bucket: &str,
        provider: Provider,
        props: ListProps,
        prefix: Option<&str>,
    ) -> Result<ObjectList> {
        self.tracker.list_objects(&Bck::new(bucket, provider), prefix, props).await
    }

    // Xactions

    /// Evicts the cached contents of a cloud-backed bucket and waits for the
    /// eviction to finish.
    ///
    /// # Errors
    ///
    /// Returns `NotRemoteBucket` for native buckets, `BucketNotFound`, and the
    /// errors of [`Cluster::wait_for_xaction_finished`].
    pub async fn evict_bucket(&self, name: &str, provider: Provider) -> Result<XactionSnapshot> {
        let params = XactionParams::evict(Bck::new(name, provider));
        let id = self.xactions.submit(XactionKind::EvictRemoteBucket, params).await?;
        self.wait_for_xaction_finished(&id, None).await
    }

    /// Starts copying `src` into `dst` and returns the xaction id.
    ///
    /// # Errors
    ///
    /// Returns `BucketNotFound` if either bucket is absent.
    pub async fn copy_bucket(&self, src: &Bck, dst: &Bck) -> Result<String> {
        self.submit(XactionKind::CopyBucket, XactionParams::copy(src.clone(), dst.clone())).await
    }

    /// Submits an xaction with explicit parameters.
    ///
    /// # Errors
    ///
    /// Validation errors are returned before any id is allocated.
    pub async fn submit(&self, kind: XactionKind, params: XactionParams) -> Result<String> {
        self.xactions.submit(kind, params).await
    }

    /// Returns the current state of an xaction.
    ///
    /// # Errors
    ///
    /// Returns `XactionNotFound` for unknown or collected ids.
    pub fn xaction_status(&self, id: &str) -> Result<XactionSnapshot> {
        self.xactions.status(id)
    }

    /// Lists xactions.
    pub fn list_xactions(&self, kind: Option<XactionKind>, only_running: bool) -> Vec<XactionSnapshot> {
        self.xactions.list(kind, only_running)
    }

    /// Aborts an xaction. Returns false if it was already terminal.
    ///
    /// # Errors
    ///
    /// Returns `XactionNotFound` for unknown ids.
    pub fn abort_xaction(&self, id: &str) -> Result<bool> {
        self.xactions.abort(id)
    }

    /// Waits for an xaction to reach a terminal state. Without a timeout the
    /// coordinator default applies.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` if the deadline passes first, `TransactionFailed` with
    /// per-target details if the xaction failed, and `XactionNotFound`.
    pub async fn wait_for_xaction_finished(
        &self,
        id: &str,
        timeout: Option<Duration>,
    ) -> Result<XactionSnapshot> {
        let waited = timeout.unwrap_or(self.xactions.config().default_wait_timeout);
        let outcome = self.xactions.wait(id, waited).await?;
        if outcome.is_timed_out() {
            return Err(Error::Timeout { xaction_id: id.to_string(), waited });
        }
        let snap = outcome.snapshot().clone();
        if snap.state == XactionState::Failed {
            return Err(Error::TransactionFailed {
                xaction_id: id.to_string(),
                details: snap.failure_details(),
            });
        }
        Ok(snap)
    }
}

fn load_cluster_map(config: &Config) -> Result<ClusterMapOwner> {
    let cluster = &config.cluster;
    let Some(path) = &cluster.smap_path else {
        return Ok(ClusterMapOwner::new(cluster_uuid(config)));
    };
    if !path.exists() {
        return Ok(ClusterMapOwner::new(cluster_uuid(config)).with_persistence(path));
    }

    let smap = ClusterMap::load(path)?;
    if let Some(uuid) = &cluster.uuid {
        if uuid != smap.uuid() {
            return Err(Error::ClusterUuidMismatch {
                local: uuid.clone(),
                offered: smap.uuid().to_string(),
            });
        }
    }
    info!(path = %path.display(), version = smap.version(), "Loaded persisted cluster map");
    Ok(ClusterMapOwner::from_map(smap).with_persistence(path))
}

fn cluster_uuid(config: &Config) -> String {
    config
        .cluster
        .uuid
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string())
}

#[cfg(test)]
mod tests {
    use cairn_core::NodeConfig;
    use cairn_storage::InMemoryBackend;

    use super::*;

    fn config(targets: usize) -> Config {
        let mut config = Config::default();
        config.cluster.uuid = Some("c1".into());
        config.cluster.targets = (1..=targets)
            .map(|i| NodeConfig { id: format!("t{i}"), url: format!("http://t{i}") })
            .collect();
        config
    }

    #[test]
    fn test_zero_heartbeat_interval_fails_boot() {
        let mut config = config(1);
        config.cluster.heartbeat_interval_ms = 0;
        assert!(matches!(Cluster::new(&config), Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_boot_is_operational() {
        let cluster = Cluster::new(&config(3)).unwrap();
        let smap = cluster.get_cluster_info();
        assert!(smap.is_operational());
        assert_eq!(smap.uuid(), "c1");
        assert_eq!(smap.primary().unwrap().id, "p1");
        assert_eq!(smap.tmap().len(), 3);
    }

    #[tokio::test]
    async fn test_bucket_count_tracks_creates_and_destroys() {
        let cluster = Cluster::new(&config(2)).unwrap();
        let before = cluster.list_buckets(None).len();
        let bck = Bck::ais("xk7qzavwnr");

        cluster.create_bucket(&bck).unwrap();
        assert_eq!(cluster.list_buckets(None).len(), before + 1);
        cluster.destroy_bucket(&bck).await.unwrap();
        assert_eq!(cluster.list_buckets(None).len(), before);

        let err = cluster.head_bucket(&bck).await.unwrap_err();
        assert_eq!(err.http_status(), 404);
        cluster.create_bucket(&bck).unwrap();
    }

    #[tokio::test]
    async fn test_copy_bucket_finishes() {
        let cluster = Cluster::new(&config(2)).unwrap();
        let (afrom, ato) = (Bck::ais("afrom"), Bck::ais("ato"));
        cluster.create_bucket(&afrom).unwrap();
        cluster.create_bucket(&ato).unwrap();
        cluster.put_object(&afrom, "o", Bytes::from_static(b"v")).await.unwrap();

        let xid = cluster.copy_bucket(&afrom, &ato).await.unwrap();
        assert!(!xid.is_empty());
        let snap = cluster.wait_for_xaction_finished(&xid, None).await.unwrap();
        assert_eq!(snap.state, XactionState::Finished);
        assert_eq!(cluster.get_object(&ato, "o").await.unwrap(), "v");
    }

    #[tokio::test]
    async fn test_copy_from_missing_source_allocates_nothing() {
        let cluster = Cluster::new(&config(1)).unwrap();
        cluster.create_bucket(&Bck::ais("ato")).unwrap();
        let err = cluster.copy_bucket(&Bck::ais("nope"), &Bck::ais("ato")).await.unwrap_err();
        assert!(err.is_bucket_not_found());
        assert!(cluster.list_xactions(None, false).is_empty());
    }

    #[tokio::test]
    async fn test_evict_bucket_keeps_listing() {
        let aws = Arc::new(InMemoryBackend::new(Provider::Aws));
        aws.insert("photos", "a.jpg", Bytes::from_static(b"jpeg"));
        let cluster =
            Cluster::with_backends(&config(2), Backends::new().with(aws.clone())).unwrap();
        let bck = Bck::new("photos", Provider::Aws);
        cluster.get_object(&bck, "a.jpg").await.unwrap();

        let props: ListProps = "name,cached,status".parse().unwrap();
        for _ in 0..2 {
            let snap = cluster.evict_bucket("photos", Provider::Aws).await.unwrap();
            assert_eq!(snap.state, XactionState::Finished);
            let entries: Vec<_> =
                cluster.list_objects("photos", Provider::Aws, props, None).await.unwrap().collect();
            assert_eq!(entries.len(), 1);
            assert!(entries[0].is_ok());
            assert!(!entries[0].is_cached());
        }
    }

    #[tokio::test]
    async fn test_evict_native_bucket_rejected() {
        let cluster = Cluster::new(&config(1)).unwrap();
        cluster.create_bucket(&Bck::ais("local")).unwrap();
        let err = cluster.evict_bucket("local", Provider::Ais).await.unwrap_err();
        assert!(matches!(err, Error::NotRemoteBucket { .. }));
    }

    #[tokio::test]
    async fn test_join_and_leave() {
        let cluster = Cluster::new(&config(1)).unwrap();
        let v0 = cluster.get_cluster_info().version();
        let smap = cluster.join_node(Node::target("t9", "http://t9")).unwrap();
        assert!(smap.version() > v0);
        assert!(smap.tmap().contains_key("t9"));

        let err = cluster.join_node(Node::proxy("t9", "http://t9")).unwrap_err();
        assert!(matches!(err, Error::NodeConflict { .. }));

        let smap = cluster.leave_node("t9").unwrap();
        assert!(!smap.tmap().contains_key("t9"));
        assert!(cluster.heartbeat("t9").is_err());
    }

    #[tokio::test]
    async fn test_persisted_map_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(2);
        config.cluster.smap_path = Some(dir.path().join("smap.json"));

        let version = {
            let cluster = Cluster::new(&config).unwrap();
            cluster.join_node(Node::target("t3", "http://t3")).unwrap().version()
        };
        let cluster = Cluster::new(&config).unwrap();
        assert!(cluster.get_cluster_info().version() >= version);

        config.cluster.uuid = Some("other".into());
        assert!(matches!(Cluster::new(&config), Err(Error::ClusterUuidMismatch { .. })));
    }

    #[tokio::test]
    async fn test_fs_stores_under_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(1);
        config.storage.data_dir = Some(dir.path().to_path_buf());
        let cluster = Cluster::new(&config).unwrap();
        let bck = Bck::ais("b");
        cluster.create_bucket(&bck).unwrap();
        cluster.put_object(&bck, "obj", Bytes::from_static(b"disk")).await.unwrap();
        assert!(dir.path().join("t1").exists());
        assert_eq!(cluster.get_object(&bck, "obj").await.unwrap(), "disk");
    }
}
