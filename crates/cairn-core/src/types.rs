// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Cairn Authors

//! Common types used throughout Cairn.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Where a bucket's authoritative content lives.
///
/// `Ais` buckets are native to the cluster. Every other variant is backed by a
/// remote store and the cluster only holds a cached subset of its objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Native cluster bucket.
    #[default]
    Ais,
    /// Amazon S3.
    Aws,
    /// Google Cloud Storage.
    Gcp,
    /// Azure Blob Storage.
    Azure,
    /// Plain HTTP(S) origin.
    Ht,
}

impl Provider {
    /// All providers, native first.
    pub const ALL: [Provider; 5] =
        [Provider::Ais, Provider::Aws, Provider::Gcp, Provider::Azure, Provider::Ht];

    /// Returns the provider tag.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ais => "ais",
            Self::Aws => "aws",
            Self::Gcp => "gcp",
            Self::Azure => "azure",
            Self::Ht => "ht",
        }
    }

    /// Returns true if buckets of this provider are backed by a remote store.
    #[must_use]
    pub const fn is_remote(&self) -> bool {
        !matches!(self, Self::Ais)
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "" | "ais" => Ok(Self::Ais),
            "aws" | "s3" => Ok(Self::Aws),
            "gcp" | "gs" => Ok(Self::Gcp),
            "azure" | "az" => Ok(Self::Azure),
            "ht" | "http" | "https" => Ok(Self::Ht),
            other => Err(Error::InvalidRequest(format!("unknown provider {other:?}"))),
        }
    }
}

/// A bucket reference: name plus provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Bck {
    /// Bucket name.
    pub name: String,
    /// Bucket provider.
    #[serde(default)]
    pub provider: Provider,
}

impl Bck {
    /// Creates a bucket reference.
    #[must_use]
    pub fn new(name: impl Into<String>, provider: Provider) -> Self {
        Self { name: name.into(), provider }
    }

    /// Creates a native bucket reference.
    #[must_use]
    pub fn ais(name: impl Into<String>) -> Self {
        Self::new(name, Provider::Ais)
    }

    /// Returns true if the bucket is backed by a remote store.
    #[must_use]
    pub const fn is_remote(&self) -> bool {
        self.provider.is_remote()
    }

    /// Validates the bucket name.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` for empty names or names with path separators.
    pub fn validate(&self) -> crate::Result<()> {
        if self.name.is_empty() {
            return Err(Error::InvalidRequest("bucket name must not be empty".to_string()));
        }
        if self.name.contains('/') || self.name.contains("..") {
            return Err(Error::InvalidRequest(format!("invalid bucket name {:?}", self.name)));
        }
        Ok(())
    }
}

impl std::fmt::Display for Bck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}", self.provider, self.name)
    }
}

impl FromStr for Bck {
    type Err = Error;

    /// Parses `provider://name` or a bare native bucket name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bck = match s.split_once("://") {
            Some((provider, name)) => Self::new(name, provider.parse()?),
            None => Self::ais(s),
        };
        bck.validate()?;
        Ok(bck)
    }
}

/// Bucket properties recorded in the bucket metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketProps {
    /// When the bucket entered the bucket metadata.
    pub created_at: DateTime<Utc>,
    /// Bucket metadata version that added the bucket.
    pub bmd_version: u64,
}

/// Result of a bucket HEAD.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketInfo {
    /// The bucket.
    pub bck: Bck,
    /// Whether the bucket is backed by a remote store.
    pub is_remote: bool,
    /// Recorded properties.
    pub props: BucketProps,
}
