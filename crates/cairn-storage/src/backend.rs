// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Cairn Authors

//! Remote backends for cloud-backed buckets.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use cairn_core::{Bck, Error, Provider, Result};
use dashmap::DashMap;

/// An object as listed by a remote store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    /// Object name.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
}

/// Access to the authoritative store behind cloud-backed buckets.
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// The provider this backend serves.
    fn provider(&self) -> Provider;

    /// Returns true if the bucket exists remotely.
    async fn head_bucket(&self, bucket: &str) -> Result<bool>;

    /// Lists objects, sorted by name.
    async fn list_objects(&self, bucket: &str, prefix: Option<&str>) -> Result<Vec<RemoteObject>>;

    /// Reads an object.
    async fn get_object(&self, bucket: &str, object: &str) -> Result<Bytes>;

    /// Writes an object.
    async fn put_object(&self, bucket: &str, object: &str, data: Bytes) -> Result<()>;

    /// Deletes an object.
    async fn delete_object(&self, bucket: &str, object: &str) -> Result<()>;
}

/// Remote backend held in memory.
pub struct InMemoryBackend {
    provider: Provider,
    buckets: DashMap<String, BTreeMap<String, Bytes>>,
}

impl InMemoryBackend {
    /// Creates an empty backend for `provider`.
    #[must_use]
    pub fn new(provider: Provider) -> Self {
        Self { provider, buckets: DashMap::new() }
    }

    /// Creates a remote bucket.
    pub fn create_bucket(&self, bucket: impl Into<String>) {
        self.buckets.entry(bucket.into()).or_default();
    }

    /// Writes an object directly, bypassing the cluster.
    pub fn insert(&self, bucket: impl Into<String>, object: impl Into<String>, data: Bytes) {
        self.buckets.entry(bucket.into()).or_default().insert(object.into(), data);
    }

    fn bck(&self, bucket: &str) -> Bck {
        Bck::new(bucket, self.provider)
    }

    fn missing(&self, bucket: &str) -> Error {
        Error::bucket_not_found(self.bck(bucket))
    }
}

#[async_trait]
impl RemoteBackend for InMemoryBackend {
    fn provider(&self) -> Provider {
        self.provider
    }

    async fn head_bucket(&self, bucket: &str) -> Result<bool> {
        Ok(self.buckets.contains_key(bucket))
    }

    async fn list_objects(&self, bucket: &str, prefix: Option<&str>) -> Result<Vec<RemoteObject>> {
        let objects = self.buckets.get(bucket).ok_or_else(|| self.missing(bucket))?;
        Ok(objects
            .iter()
            .filter(|(name, _)| prefix.map_or(true, |p| name.starts_with(p)))
            .map(|(name, data)| RemoteObject { name: name.clone(), size: data.len() as u64 })
            .collect())
    }

    async fn get_object(&self, bucket: &str, object: &str) -> Result<Bytes> {
        let objects = self.buckets.get(bucket).ok_or_else(|| self.missing(bucket))?;
        objects
            .get(object)
            .cloned()
            .ok_or_else(|| Error::object_not_found(self.bck(bucket), object))
    }

    async fn put_object(&self, bucket: &str, object: &str, data: Bytes) -> Result<()> {
        let mut objects = self.buckets.get_mut(bucket).ok_or_else(|| self.missing(bucket))?;
        objects.insert(object.to_string(), data);
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, object: &str) -> Result<()> {
        let mut objects = self.buckets.get_mut(bucket).ok_or_else(|| self.missing(bucket))?;
        objects
            .remove(object)
            .map(|_| ())
            .ok_or_else(|| Error::object_not_found(self.bck(bucket), object))
    }
}

/// Remote backends by provider.
#[derive(Clone, Default)]
pub struct Backends {
    by_provider: HashMap<Provider, Arc<dyn RemoteBackend>>,
}

impl Backends {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a set with an in-memory backend for every remote provider.
    #[must_use]
    pub fn in_memory() -> Self {
        Provider::ALL
            .into_iter()
            .filter(Provider::is_remote)
            .fold(Self::new(), |set, p| set.with(Arc::new(InMemoryBackend::new(p))))
    }

    /// Registers a backend for its provider.
    #[must_use]
    pub fn with(mut self, backend: Arc<dyn RemoteBackend>) -> Self {
        self.by_provider.insert(backend.provider(), backend);
        self
    }

    /// Returns the backend of a provider.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` for the native provider or a provider without a
    /// configured backend.
    pub fn get(&self, provider: Provider) -> Result<Arc<dyn RemoteBackend>> {
        if !provider.is_remote() {
            return Err(Error::InvalidRequest(format!("provider {provider} has no remote backend")));
        }
        self.by_provider.get(&provider).cloned().ok_or_else(|| {
            Error::InvalidRequest(format!("no backend configured for provider {provider}"))
        })
    }

    /// Providers with a configured backend.
    pub fn providers(&self) -> impl Iterator<Item = Provider> + '_ {
        self.by_provider.keys().copied()
    }
}
