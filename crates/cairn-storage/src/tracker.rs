// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Cairn Authors

//! Bucket and cache state tracker.
//!
//! The tracker answers bucket and object questions from the current bucket
//! metadata and cluster map:
//! - Buckets exist iff they are in the current BMD. Cloud-backed buckets enter the
//!   BMD the first time they are accessed and found remotely.
//! - Objects are placed on targets by HRW. Native objects live only in target
//!   stores; objects of cloud-backed buckets live remotely and may be cached.
//! - Eviction and bucket copy run as xaction work units, one per target.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use cairn_cluster::{BucketResolver, ClusterMapOwner, Node, TargetWorker, UnitStats, WorkUnit,
    XactionKind};
use cairn_core::{Bck, BucketInfo, Error, Provider, Result};
use dashmap::DashMap;
use metrics::counter;
use tracing::{debug, info, warn};

use crate::backend::Backends;
use crate::bmd::{store_key, BmdOwner};
use crate::hrw::{hrw_target, is_owner};
use crate::local::{validate_object_name, EvictOutcome, LocalStore, MemoryStore};
use crate::object::{ListProps, ObjectFacts, ObjectList, ObjectStatus};

/// Builds the local store of a target the first time it is used.
pub type StoreFactory = Arc<dyn Fn(&Node) -> Arc<dyn LocalStore> + Send + Sync>;

/// Aggregate local storage usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageUsage {
    /// Buckets in the current BMD.
    pub buckets: usize,
    /// Objects held in target stores.
    pub objects: u64,
    /// Bytes held in target stores.
    pub bytes: u64,
}

/// Tracks buckets, objects and their cached state.
pub struct BucketTracker {
    smap: Arc<ClusterMapOwner>,
    bmd: Arc<BmdOwner>,
    backends: Backends,
    stores: DashMap<String, Arc<dyn LocalStore>>,
    store_factory: StoreFactory,
}

impl BucketTracker {
    /// Creates a tracker with in-memory target stores.
    pub fn new(smap: Arc<ClusterMapOwner>, bmd: Arc<BmdOwner>, backends: Backends) -> Self {
        Self {
            smap,
            bmd,
            backends,
            stores: DashMap::new(),
            store_factory: Arc::new(|_: &Node| Arc::new(MemoryStore::new()) as Arc<dyn LocalStore>),
        }
    }

    /// Uses `factory` to create target stores.
    #[must_use]
    pub fn with_store_factory(mut self, factory: StoreFactory) -> Self {
        self.store_factory = factory;
        self
    }

    /// Attaches an explicit store to a target.
    pub fn attach_store(&self, target_id: impl Into<String>, store: Arc<dyn LocalStore>) {
        self.stores.insert(target_id.into(), store);
    }

    /// The bucket metadata owner.
    pub fn bmd(&self) -> &Arc<BmdOwner> {
        &self.bmd
    }

    fn store(&self, target: &Node) -> Arc<dyn LocalStore> {
        let entry = self
            .stores
            .entry(target.id.clone())
            .or_insert_with(|| (self.store_factory)(target));
        Arc::clone(entry.value())
    }

    /// Stores of every target in the current map.
    fn target_stores(&self) -> Vec<(String, Arc<dyn LocalStore>)> {
        self.smap.current().tmap().values().map(|t| (t.id.clone(), self.store(t))).collect()
    }

    /// The alive target owning an object.
    fn owner(&self, bck: &Bck, name: &str) -> Result<Node> {
        let smap = self.smap.current();
        let target = hrw_target(&smap, bck, name)
            .ok_or_else(|| Error::InvalidRequest("cluster has no targets".to_string()))?;
        if !target.is_alive() {
            return Err(Error::Internal(format!("target {} owning {bck}/{name} is unreachable", target.id)));
        }
        Ok(target.clone())
    }

    /// Store key of the bucket's current incarnation.
    fn store_key(&self, bck: &Bck) -> Result<Bck> {
        self.bmd.current().store_key(bck).ok_or_else(|| Error::bucket_not_found(bck))
    }

    async fn resolve_store_key(&self, bck: &Bck) -> Result<Bck> {
        self.resolve_bucket(bck).await?;
        self.store_key(bck)
    }

    // Buckets

    /// Lists buckets, optionally restricted to one provider.
    pub fn list_buckets(&self, provider: Option<Provider>) -> Vec<Bck> {
        self.bmd.current().buckets(provider).cloned().collect()
    }

    /// Creates a native bucket.
    ///
    /// # Errors
    ///
    /// Returns `BucketAlreadyExists` if present and `InvalidRequest` for remote
    /// providers, whose buckets are added on first access.
    pub fn create_bucket(&self, bck: &Bck) -> Result<()> {
        bck.validate()?;
        if bck.is_remote() {
            return Err(Error::InvalidRequest(format!(
                "cannot create {bck}: remote buckets are added on first access"
            )));
        }
        self.bmd.add(bck)?;
        counter!("cairn_storage_buckets_created_total").increment(1);
        info!(bucket = %bck, "Bucket created");
        Ok(())
    }

    /// Destroys a native bucket and its objects.
    ///
    /// The bucket is gone once it leaves the BMD. Its objects are purged
    /// afterwards under the destroyed incarnation's store key, so a bucket
    /// re-created meanwhile is unaffected and a failed purge only leaves
    /// unreachable data behind.
    ///
    /// # Errors
    ///
    /// Returns `BucketNotFound` if absent and `InvalidRequest` for remote buckets.
    pub async fn destroy_bucket(&self, bck: &Bck) -> Result<()> {
        bck.validate()?;
        if bck.is_remote() {
            return Err(Error::InvalidRequest(format!(
                "cannot destroy remote bucket {bck}, evict it instead"
            )));
        }
        let (_, props) = self.bmd.remove(bck)?;
        counter!("cairn_storage_buckets_destroyed_total").increment(1);

        let key = store_key(bck, &props);
        let stores: Vec<(String, Arc<dyn LocalStore>)> =
            self.stores.iter().map(|e| (e.key().clone(), Arc::clone(e.value()))).collect();
        let mut purged = 0;
        for (target_id, store) in stores {
            match store.purge(&key).await {
                Ok(n) => purged += n,
                Err(e) => {
                    counter!("cairn_storage_purge_failures_total").increment(1);
                    warn!(
                        bucket = %bck,
                        target_id = %target_id,
                        error = %e,
                        "Failed to purge destroyed bucket"
                    );
                }
            }
        }
        info!(bucket = %bck, objects = purged, "Bucket destroyed");
        Ok(())
    }

    /// Succeeds if the bucket exists, adding cloud-backed buckets found
    /// remotely to the BMD.
    ///
    /// # Errors
    ///
    /// Returns `BucketNotFound` if the bucket exists neither in the BMD nor
    /// remotely.
    pub async fn resolve_bucket(&self, bck: &Bck) -> Result<()> {
        bck.validate()?;
        if self.bmd.current().contains(bck) {
            return Ok(());
        }
        if !bck.is_remote() {
            return Err(Error::bucket_not_found(bck));
        }
        let backend = self.backends.get(bck.provider)?;
        if !backend.head_bucket(&bck.name).await? {
            return Err(Error::bucket_not_found(bck));
        }
        let (bmd, added) = self.bmd.add_if_absent(bck);
        if added {
            info!(bucket = %bck, bmd_version = bmd.version(), "Added remote bucket");
        }
        Ok(())
    }

    /// Returns bucket information.
    ///
    /// # Errors
    ///
    /// Returns `BucketNotFound` if absent.
    pub async fn head_bucket(&self, bck: &Bck) -> Result<BucketInfo> {
        self.resolve_bucket(bck).await?;
        let bmd = self.bmd.current();
        let props = bmd.get(bck).ok_or_else(|| Error::bucket_not_found(bck))?;
        Ok(BucketInfo { bck: bck.clone(), is_remote: bck.is_remote(), props: props.clone() })
    }

    // Objects

    /// Writes an object. Cloud-backed writes go to the remote store and are
    /// cached on the owning target.
    ///
    /// # Errors
    ///
    /// Returns `BucketNotFound` if the bucket is absent.
    pub async fn put_object(&self, bck: &Bck, name: &str, data: Bytes) -> Result<()> {
        let key = self.resolve_store_key(bck).await?;
        validate_object_name(name)?;
        let target = self.owner(bck, name)?;
        let size = data.len();

        if bck.is_remote() {
            self.backends.get(bck.provider)?.put_object(&bck.name, name, data.clone()).await?;
        }
        self.store(&target).store(&key, name, data).await?;

        counter!("cairn_storage_objects_put_total").increment(1);
        debug!(bucket = %bck, object = %name, target_id = %target.id, size, "Object stored");
        Ok(())
    }

    /// Reads an object. A cloud-backed object that is not cached is fetched from
    /// the remote store and cached on the owning target.
    ///
    /// # Errors
    ///
    /// Returns `BucketNotFound` or `ObjectNotFound`.
    pub async fn get_object(&self, bck: &Bck, name: &str) -> Result<Bytes> {
        let key = self.resolve_store_key(bck).await?;
        validate_object_name(name)?;
        let target = self.owner(bck, name)?;

        if let Some(data) = self.store(&target).retrieve(&key, name).await? {
            return Ok(data);
        }

        if !bck.is_remote() {
            // Placed before the last membership change.
            for (target_id, store) in self.target_stores() {
                if target_id == target.id {
                    continue;
                }
                if let Some(data) = store.retrieve(&key, name).await? {
                    return Ok(data);
                }
            }
            return Err(Error::object_not_found(bck, name));
        }

        let data = self.backends.get(bck.provider)?.get_object(&bck.name, name).await?;
        self.store(&target).store(&key, name, data.clone()).await?;
        counter!("cairn_storage_cold_gets_total").increment(1);
        debug!(bucket = %bck, object = %name, target_id = %target.id, "Cold GET");
        Ok(data)
    }

    /// Deletes an object and every local copy of it.
    ///
    /// # Errors
    ///
    /// Returns `BucketNotFound` or `ObjectNotFound`.
    pub async fn delete_object(&self, bck: &Bck, name: &str) -> Result<()> {
        let key = self.resolve_store_key(bck).await?;
        validate_object_name(name)?;

        if bck.is_remote() {
            self.backends.get(bck.provider)?.delete_object(&bck.name, name).await?;
        }
        let mut removed = false;
        for (_, store) in self.target_stores() {
            removed |= matches!(store.evict(&key, name).await?, EvictOutcome::Evicted { .. });
        }
        if !bck.is_remote() && !removed {
            return Err(Error::object_not_found(bck, name));
        }
        counter!("cairn_storage_objects_deleted_total").increment(1);
        debug!(bucket = %bck, object = %name, "Object deleted");
        Ok(())
    }

    /// Lists the objects of a bucket.
    ///
    /// # Errors
    ///
    /// Returns `BucketNotFound` if absent.
    pub async fn list_objects(
        &self,
        bck: &Bck,
        prefix: Option<&str>,
        props: ListProps,
    ) -> Result<ObjectList> {
        let key = self.resolve_store_key(bck).await?;
        let matches = |name: &str| prefix.map_or(true, |p| name.starts_with(p));

        // name -> (size, target, atime) of local copies
        let mut local = BTreeMap::new();
        for (target_id, store) in self.target_stores() {
            for obj in store.list(&key).await?.into_iter().filter(|o| matches(&o.name)) {
                local.entry(obj.name).or_insert((obj.size, target_id.clone(), obj.atime));
            }
        }

        let facts = if bck.is_remote() {
            let remote = self.backends.get(bck.provider)?.list_objects(&bck.name, prefix).await?;
            let mut facts = Vec::with_capacity(remote.len());
            for obj in remote {
                let cached = local.remove(&obj.name).map(|(_, target, atime)| (target, atime));
                facts.push(ObjectFacts {
                    name: obj.name,
                    size: obj.size,
                    status: ObjectStatus::Ok,
                    local: cached,
                });
            }
            facts.extend(local.into_iter().map(|(name, (size, target, atime))| ObjectFacts {
                name,
                size,
                status: ObjectStatus::Orphaned,
                local: Some((target, atime)),
            }));
            facts
        } else {
            local
                .into_iter()
                .map(|(name, (size, target, atime))| ObjectFacts {
                    name,
                    size,
                    status: ObjectStatus::Ok,
                    local: Some((target, atime)),
                })
                .collect()
        };
        Ok(ObjectList::new(facts, props))
    }

    /// Local storage usage across all target stores.
    ///
    /// # Errors
    ///
    /// Returns an error if a store cannot be listed.
    pub async fn usage(&self) -> Result<StorageUsage> {
        let bmd = self.bmd.current();
        let mut usage = StorageUsage { buckets: bmd.len(), ..StorageUsage::default() };
        let stores: Vec<Arc<dyn LocalStore>> =
            self.stores.iter().map(|e| Arc::clone(e.value())).collect();
        for key in bmd.buckets(None).filter_map(|bck| bmd.store_key(bck)) {
            for store in &stores {
                for obj in store.list(&key).await? {
                    usage.objects += 1;
                    usage.bytes += obj.size;
                }
            }
        }
        Ok(usage)
    }

    // Work units

    /// Releases the cached copies held by the unit's target.
    ///
    /// # Errors
    ///
    /// Returns the failure detail if a store operation fails or the unit is aborted.
    pub async fn evict_on_target(&self, unit: &WorkUnit) -> std::result::Result<UnitStats, String> {
        let key = self.store_key(&unit.src).map_err(|e| e.to_string())?;
        let store = self.store(&unit.target);
        let objects = store.list(&key).await.map_err(|e| e.to_string())?;
        let mut stats = UnitStats::default();

        for obj in objects.iter().filter(|o| unit.matches(&o.name)) {
            if unit.is_aborted() {
                return Err("aborted".to_string());
            }
            match store.evict(&key, &obj.name).await.map_err(|e| e.to_string())? {
                EvictOutcome::Evicted { bytes } => {
                    stats.objects += 1;
                    stats.bytes += bytes;
                }
                EvictOutcome::NotPresent => {}
            }
        }
        counter!("cairn_storage_evicted_objects_total").increment(stats.objects);
        debug!(
            xaction_id = %unit.xaction_id,
            target_id = %unit.target.id,
            bucket = %unit.src,
            objects = stats.objects,
            "Evicted cached objects"
        );
        Ok(stats)
    }

    /// Copies the source objects held or owned by the unit's target into the
    /// destination bucket.
    ///
    /// # Errors
    ///
    /// Returns the failure detail if reading or writing an object fails or the
    /// unit is aborted.
    pub async fn copy_on_target(&self, unit: &WorkUnit) -> std::result::Result<UnitStats, String> {
        let dst = unit.dst.as_ref().ok_or_else(|| "copy without destination".to_string())?;
        let key = self.store_key(&unit.src).map_err(|e| e.to_string())?;
        let store = self.store(&unit.target);
        let names: Vec<String> = if unit.src.is_remote() {
            let backend = self.backends.get(unit.src.provider).map_err(|e| e.to_string())?;
            backend
                .list_objects(&unit.src.name, unit.prefix.as_deref())
                .await
                .map_err(|e| e.to_string())?
                .into_iter()
                .filter(|o| is_owner(&unit.smap, &unit.target.id, &unit.src, &o.name))
                .map(|o| o.name)
                .collect()
        } else {
            store
                .list(&key)
                .await
                .map_err(|e| e.to_string())?
                .into_iter()
                .filter(|o| unit.matches(&o.name))
                .map(|o| o.name)
                .collect()
        };

        let mut stats = UnitStats::default();
        for name in names {
            if unit.is_aborted() {
                return Err("aborted".to_string());
            }
            let data = match store.retrieve(&key, &name).await.map_err(|e| e.to_string())? {
                Some(data) => data,
                None if unit.src.is_remote() => self
                    .backends
                    .get(unit.src.provider)
                    .map_err(|e| e.to_string())?
                    .get_object(&unit.src.name, &name)
                    .await
                    .map_err(|e| e.to_string())?,
                // Deleted since listing.
                None => continue,
            };
            stats.bytes += data.len() as u64;
            self.put_object(dst, &name, data).await.map_err(|e| format!("{name}: {e}"))?;
            stats.objects += 1;
        }
        counter!("cairn_storage_copied_objects_total").increment(stats.objects);
        debug!(
            xaction_id = %unit.xaction_id,
            target_id = %unit.target.id,
            src = %unit.src,
            dst = %dst,
            objects = stats.objects,
            "Copied objects"
        );
        Ok(stats)
    }
}

#[async_trait]
impl BucketResolver for BucketTracker {
    async fn resolve(&self, bck: &Bck) -> Result<()> {
        self.resolve_bucket(bck).await
    }
}

#[async_trait]
impl TargetWorker for BucketTracker {
    async fn run_unit(&self, unit: &WorkUnit) -> std::result::Result<UnitStats, String> {
        match unit.kind {
            XactionKind::CopyBucket => self.copy_on_target(unit).await,
            XactionKind::EvictRemoteBucket => self.evict_on_target(unit).await,
        }
    }
}
