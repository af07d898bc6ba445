// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Cairn Authors

//! Per-target local object storage.
//!
//! Every target owns one [`LocalStore`]. Object bytes for native buckets live only
//! here; for cloud-backed buckets the store holds the cached copies.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use cairn_core::{Bck, Error, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::fs;
use tracing::trace;
use uuid::Uuid;

/// An object held by a local store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalObject {
    /// Object name.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
    /// Last access time.
    pub atime: DateTime<Utc>,
}

/// Result of evicting a single object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictOutcome {
    /// The local copy was released.
    Evicted {
        /// Bytes released.
        bytes: u64,
    },
    /// Nothing was stored locally.
    NotPresent,
}

/// Byte-level storage on a single target.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Stores an object, replacing any previous copy.
    async fn store(&self, bck: &Bck, name: &str, data: Bytes) -> Result<()>;

    /// Reads an object and refreshes its access time. `None` if not stored.
    async fn retrieve(&self, bck: &Bck, name: &str) -> Result<Option<Bytes>>;

    /// Releases the local copy of an object.
    async fn evict(&self, bck: &Bck, name: &str) -> Result<EvictOutcome>;

    /// Lists the objects of a bucket, sorted by name.
    async fn list(&self, bck: &Bck) -> Result<Vec<LocalObject>>;

    /// Removes every object of a bucket. Returns the number removed.
    async fn purge(&self, bck: &Bck) -> Result<usize>;
}

/// Rejects names that would escape the bucket directory.
///
/// # Errors
///
/// Returns `InvalidRequest` for empty, absolute or `..`-containing names.
pub fn validate_object_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidRequest("object name must not be empty".to_string()));
    }
    let escapes = Path::new(name)
        .components()
        .any(|c| !matches!(c, Component::Normal(_)));
    if escapes || name.ends_with('/') {
        return Err(Error::InvalidRequest(format!("invalid object name {name:?}")));
    }
    Ok(())
}

#[derive(Debug, Clone)]
struct MemoryObject {
    data: Bytes,
    atime: DateTime<Utc>,
}

/// In-memory local store.
#[derive(Default)]
pub struct MemoryStore {
    buckets: DashMap<Bck, BTreeMap<String, MemoryObject>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LocalStore for MemoryStore {
    async fn store(&self, bck: &Bck, name: &str, data: Bytes) -> Result<()> {
        self.buckets
            .entry(bck.clone())
            .or_default()
            .insert(name.to_string(), MemoryObject { data, atime: Utc::now() });
        Ok(())
    }

    async fn retrieve(&self, bck: &Bck, name: &str) -> Result<Option<Bytes>> {
        let Some(mut objects) = self.buckets.get_mut(bck) else {
            return Ok(None);
        };
        Ok(objects.get_mut(name).map(|obj| {
            obj.atime = Utc::now();
            obj.data.clone()
        }))
    }

    async fn evict(&self, bck: &Bck, name: &str) -> Result<EvictOutcome> {
        let removed = self.buckets.get_mut(bck).and_then(|mut objects| objects.remove(name));
        Ok(match removed {
            Some(obj) => EvictOutcome::Evicted { bytes: obj.data.len() as u64 },
            None => EvictOutcome::NotPresent,
        })
    }

    async fn list(&self, bck: &Bck) -> Result<Vec<LocalObject>> {
        Ok(self
            .buckets
            .get(bck)
            .map(|objects| {
                objects
                    .iter()
                    .map(|(name, obj)| LocalObject {
                        name: name.clone(),
                        size: obj.data.len() as u64,
                        atime: obj.atime,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn purge(&self, bck: &Bck) -> Result<usize> {
        Ok(self.buckets.remove(bck).map_or(0, |(_, objects)| objects.len()))
    }
}

/// Filesystem local store.
///
/// Objects live at `<root>/data/<provider>/<bucket>/<object name>`, where the
/// bucket is the store key handed in by the tracker. Writes go to a temporary
/// file first and are renamed into place.
pub struct FsStore {
    data_dir: PathBuf,
    temp_dir: PathBuf,
}

impl FsStore {
    /// Creates a store rooted at `root`. Directories are created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self { data_dir: root.join("data"), temp_dir: root.join("tmp") }
    }

    fn bucket_path(&self, bck: &Bck) -> PathBuf {
        self.data_dir.join(bck.provider.as_str()).join(&bck.name)
    }

    fn object_path(&self, bck: &Bck, name: &str) -> Result<PathBuf> {
        validate_object_name(name)?;
        Ok(self.bucket_path(bck).join(name))
    }
}

#[async_trait]
impl LocalStore for FsStore {
    async fn store(&self, bck: &Bck, name: &str, data: Bytes) -> Result<()> {
        let path = self.object_path(bck, name)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::create_dir_all(&self.temp_dir).await?;

        let temp_path = self.temp_dir.join(format!("{}.tmp", Uuid::new_v4()));
        fs::write(&temp_path, &data).await?;
        if let Err(e) = fs::rename(&temp_path, &path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        trace!(bucket = %bck, object = %name, size = data.len(), "Stored object");
        Ok(())
    }

    async fn retrieve(&self, bck: &Bck, name: &str) -> Result<Option<Bytes>> {
        let path = self.object_path(bck, name)?;
        match fs::read(&path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn evict(&self, bck: &Bck, name: &str) -> Result<EvictOutcome> {
        let path = self.object_path(bck, name)?;
        let size = match fs::metadata(&path).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(EvictOutcome::NotPresent)
            }
            Err(e) => return Err(e.into()),
        };
        match fs::remove_file(&path).await {
            Ok(()) => Ok(EvictOutcome::Evicted { bytes: size }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(EvictOutcome::NotPresent),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, bck: &Bck) -> Result<Vec<LocalObject>> {
        let root = self.bucket_path(bck);
        let mut objects = Vec::new();
        let mut dirs = vec![root.clone()];

        while let Some(dir) = dirs.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let meta = entry.metadata().await?;
                let path = entry.path();
                if meta.is_dir() {
                    dirs.push(path);
                    continue;
                }
                let Ok(relative) = path.strip_prefix(&root) else {
                    continue;
                };
                let name = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                let atime = meta.accessed().or_else(|_| meta.modified()).map_or_else(
                    |_| Utc::now(),
                    DateTime::<Utc>::from,
                );
                objects.push(LocalObject { name, size: meta.len(), atime });
            }
        }
        objects.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(objects)
    }

    async fn purge(&self, bck: &Bck) -> Result<usize> {
        let count = self.list(bck).await?.len();
        match fs::remove_dir_all(self.bucket_path(bck)).await {
            Ok(()) => Ok(count),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    async fn exercise(store: &dyn LocalStore) {
        let bck = Bck::ais("b1");
        store.store(&bck, "a/one", Bytes::from_static(b"hello")).await.unwrap();
        store.store(&bck, "two", Bytes::from_static(b"world!")).await.unwrap();

        assert_eq!(store.retrieve(&bck, "a/one").await.unwrap().unwrap(), "hello");
        assert!(store.retrieve(&bck, "missing").await.unwrap().is_none());

        let listed = store.list(&bck).await.unwrap();
        let names: Vec<_> = listed.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["a/one", "two"]);
        assert_eq!(listed[1].size, 6);

        assert_eq!(store.evict(&bck, "two").await.unwrap(), EvictOutcome::Evicted { bytes: 6 });
        assert_eq!(store.evict(&bck, "two").await.unwrap(), EvictOutcome::NotPresent);

        assert_eq!(store.purge(&bck).await.unwrap(), 1);
        assert!(store.list(&bck).await.unwrap().is_empty());
        assert_eq!(store.purge(&bck).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_memory_store() {
        exercise(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_fs_store() {
        let dir = TempDir::new().unwrap();
        exercise(&FsStore::new(dir.path())).await;
    }

    #[tokio::test]
    async fn test_buckets_are_isolated() {
        let store = MemoryStore::new();
        let native = Bck::ais("b1");
        let cloud = Bck::new("b1", cairn_core::Provider::Aws);
        store.store(&native, "x", Bytes::from_static(b"1")).await.unwrap();
        assert!(store.retrieve(&cloud, "x").await.unwrap().is_none());
    }

    #[test]
    fn test_validate_object_name() {
        assert!(validate_object_name("a/b/c.txt").is_ok());
        assert!(validate_object_name("").is_err());
        assert!(validate_object_name("../escape").is_err());
        assert!(validate_object_name("/abs").is_err());
        assert!(validate_object_name("dir/").is_err());
    }

    #[tokio::test]
    async fn test_fs_store_rejects_escaping_names() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::new(dir.path());
        let err = store.store(&Bck::ais("b"), "../x", Bytes::new()).await.unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }
}
