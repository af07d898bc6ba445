// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Cairn Authors

//! Bucket metadata (BMD).
//!
//! The BMD is the cluster-wide list of buckets. Like the cluster map it is an
//! immutable, versioned snapshot: every create, destroy or remote-bucket addition
//! publishes a new version, and readers only ever see whole snapshots.

use std::collections::BTreeMap;
use std::sync::Arc;

use cairn_core::{Bck, BucketProps, Error, Provider, Result};
use chrono::Utc;
use metrics::gauge;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::info;

/// Immutable snapshot of bucket metadata.
#[derive(Debug, Clone)]
pub struct BucketMd {
    version: u64,
    uuid: String,
    buckets: BTreeMap<Bck, BucketProps>,
}

impl BucketMd {
    /// Creates an empty BMD.
    #[must_use]
    pub fn empty(uuid: impl Into<String>) -> Self {
        Self { version: 0, uuid: uuid.into(), buckets: BTreeMap::new() }
    }

    /// Monotonic BMD version.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Cluster uuid the BMD belongs to.
    #[must_use]
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// Looks up a bucket.
    #[must_use]
    pub fn get(&self, bck: &Bck) -> Option<&BucketProps> {
        self.buckets.get(bck)
    }

    /// Store key of the bucket's current incarnation. `None` if absent.
    #[must_use]
    pub fn store_key(&self, bck: &Bck) -> Option<Bck> {
        self.buckets.get(bck).map(|props| store_key(bck, props))
    }

    /// Returns true if the bucket exists.
    #[must_use]
    pub fn contains(&self, bck: &Bck) -> bool {
        self.buckets.contains_key(bck)
    }

    /// Buckets, optionally restricted to one provider, in `(provider, name)` order.
    pub fn buckets(&self, provider: Option<Provider>) -> impl Iterator<Item = &Bck> {
        self.buckets.keys().filter(move |b| provider.map_or(true, |p| b.provider == p))
    }

    /// Number of buckets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Returns true if there are no buckets.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

/// Key under which target stores hold the objects of one incarnation of a
/// bucket. Every (re)creation gets a distinct key, so objects of a destroyed
/// bucket are never visible through a bucket of the same name created later.
#[must_use]
pub fn store_key(bck: &Bck, props: &BucketProps) -> Bck {
    Bck::new(format!("{}@{}", bck.name, props.bmd_version), bck.provider)
}

/// Single writer of the bucket metadata.
pub struct BmdOwner {
    tx: watch::Sender<Arc<BucketMd>>,
    writer: Mutex<()>,
}

impl BmdOwner {
    /// Creates an owner with an empty BMD.
    pub fn new(uuid: impl Into<String>) -> Self {
        let (tx, _) = watch::channel(Arc::new(BucketMd::empty(uuid)));
        Self { tx, writer: Mutex::new(()) }
    }

    /// Returns the latest BMD.
    pub fn current(&self) -> Arc<BucketMd> {
        Arc::clone(&self.tx.borrow())
    }

    /// Subscribes to BMD updates.
    pub fn subscribe(&self) -> watch::Receiver<Arc<BucketMd>> {
        self.tx.subscribe()
    }

    /// Adds a bucket.
    ///
    /// # Errors
    ///
    /// Returns `BucketAlreadyExists` if the bucket is present.
    pub fn add(&self, bck: &Bck) -> Result<Arc<BucketMd>> {
        let _guard = self.writer.lock();
        let current = self.current();
        if current.contains(bck) {
            return Err(Error::BucketAlreadyExists { bucket: bck.to_string() });
        }
        Ok(self.publish(&current, |buckets, version| {
            let props = BucketProps { created_at: Utc::now(), bmd_version: version };
            buckets.insert(bck.clone(), props);
        }))
    }

    /// Adds a bucket unless present. Returns the BMD and whether it was added.
    pub fn add_if_absent(&self, bck: &Bck) -> (Arc<BucketMd>, bool) {
        match self.add(bck) {
            Ok(bmd) => (bmd, true),
            Err(_) => (self.current(), false),
        }
    }

    /// Removes a bucket. Returns the new BMD and the properties the bucket had.
    ///
    /// # Errors
    ///
    /// Returns `BucketNotFound` if the bucket is absent.
    pub fn remove(&self, bck: &Bck) -> Result<(Arc<BucketMd>, BucketProps)> {
        let _guard = self.writer.lock();
        let current = self.current();
        let props = current.get(bck).cloned().ok_or_else(|| Error::bucket_not_found(bck))?;
        let bmd = self.publish(&current, |buckets, _| {
            buckets.remove(bck);
        });
        Ok((bmd, props))
    }

    fn publish(
        &self,
        current: &BucketMd,
        mutate: impl FnOnce(&mut BTreeMap<Bck, BucketProps>, u64),
    ) -> Arc<BucketMd> {
        let version = current.version + 1;
        let mut buckets = current.buckets.clone();
        mutate(&mut buckets, version);
        let bmd = Arc::new(BucketMd { version, uuid: current.uuid.clone(), buckets });

        gauge!("cairn_storage_buckets").set(bmd.len() as f64);
        gauge!("cairn_storage_bmd_version").set(version as f64);
        info!(version, buckets = bmd.len(), "Published bucket metadata");
        self.tx.send_replace(Arc::clone(&bmd));
        bmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_remove() {
        let owner = BmdOwner::new("c1");
        let bck = Bck::ais("b1");

        let bmd = owner.add(&bck).unwrap();
        assert_eq!(bmd.version(), 1);
        assert_eq!(bmd.get(&bck).unwrap().bmd_version, 1);
        assert!(matches!(owner.add(&bck), Err(Error::BucketAlreadyExists { .. })));

        let (bmd, removed) = owner.remove(&bck).unwrap();
        assert_eq!(bmd.version(), 2);
        assert_eq!(removed.bmd_version, 1);
        assert!(!bmd.contains(&bck));
        assert!(owner.remove(&bck).unwrap_err().is_bucket_not_found());

        // Re-creating a destroyed bucket is never blocked.
        assert!(owner.add(&bck).is_ok());
    }

    #[test]
    fn test_recreated_bucket_gets_new_store_key() {
        let owner = BmdOwner::new("c1");
        let bck = Bck::ais("b");
        owner.add(&bck).unwrap();
        let first = owner.current().store_key(&bck).unwrap();
        let (bmd, props) = owner.remove(&bck).unwrap();
        assert!(bmd.store_key(&bck).is_none());
        assert_eq!(store_key(&bck, &props), first);

        owner.add(&bck).unwrap();
        let second = owner.current().store_key(&bck).unwrap();
        assert_ne!(first, second);
        assert_eq!(second.provider, bck.provider);
    }

    #[test]
    fn test_add_if_absent() {
        let owner = BmdOwner::new("c1");
        let bck = Bck::new("photos", Provider::Aws);
        assert!(owner.add_if_absent(&bck).1);
        let (bmd, added) = owner.add_if_absent(&bck);
        assert!(!added);
        assert_eq!(bmd.version(), 1);
    }

    #[test]
    fn test_snapshots_are_immutable() {
        let owner = BmdOwner::new("c1");
        let before = owner.current();
        owner.add(&Bck::ais("b1")).unwrap();
        assert!(before.is_empty());
        assert_eq!(owner.current().len(), 1);
    }

    #[test]
    fn test_filter_by_provider() {
        let owner = BmdOwner::new("c1");
        owner.add(&Bck::ais("a")).unwrap();
        owner.add(&Bck::new("b", Provider::Gcp)).unwrap();
        let bmd = owner.current();
        assert_eq!(bmd.buckets(None).count(), 2);
        assert_eq!(bmd.buckets(Some(Provider::Gcp)).next().unwrap().name, "b");
    }
}
