// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Cairn Authors

//! Object listing entries and property selection.

use std::str::FromStr;

use cairn_core::Error;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health of a listed object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectStatus {
    /// The object is present in its authoritative store.
    Ok,
    /// A cached copy exists but the remote object is gone.
    Orphaned,
}

/// Which properties a listing returns. The name is always returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListProps {
    /// Object size.
    pub size: bool,
    /// Whether a local copy exists.
    pub cached: bool,
    /// Object status.
    pub status: bool,
    /// Last access time of the local copy.
    pub atime: bool,
    /// Target holding the local copy.
    pub location: bool,
}

impl ListProps {
    /// Every supported property name.
    pub const NAMES: [&'static str; 6] = ["name", "size", "cached", "status", "atime", "location"];

    /// Only the name.
    #[must_use]
    pub const fn name_only() -> Self {
        Self { size: false, cached: false, status: false, atime: false, location: false }
    }

    /// Every property.
    #[must_use]
    pub const fn all() -> Self {
        Self { size: true, cached: true, status: true, atime: true, location: true }
    }
}

impl Default for ListProps {
    /// `name,size,cached,status`.
    fn default() -> Self {
        Self { size: true, cached: true, status: true, atime: false, location: false }
    }
}

impl FromStr for ListProps {
    type Err = Error;

    /// Parses a comma-separated property list. An empty list selects the defaults.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut props = Self::name_only();
        let mut any = false;
        for prop in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            any = true;
            match prop {
                "name" => {}
                "size" => props.size = true,
                "cached" => props.cached = true,
                "status" => props.status = true,
                "atime" => props.atime = true,
                "location" => props.location = true,
                other => {
                    return Err(Error::InvalidRequest(format!(
                        "unknown list property {other:?}, expected one of {}",
                        Self::NAMES.join(",")
                    )))
                }
            }
        }
        Ok(if any { props } else { Self::default() })
    }
}

impl std::fmt::Display for ListProps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let selected = [
            ("size", self.size),
            ("cached", self.cached),
            ("status", self.status),
            ("atime", self.atime),
            ("location", self.location),
        ];
        f.write_str("name")?;
        for (name, _) in selected.iter().filter(|(_, on)| *on) {
            write!(f, ",{name}")?;
        }
        Ok(())
    }
}

/// One entry of an object listing. Unselected properties are `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectEntry {
    /// Object name.
    pub name: String,
    /// Size in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Whether a local copy exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached: Option<bool>,
    /// Object status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ObjectStatus>,
    /// Last access time of the local copy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub atime: Option<DateTime<Utc>>,
    /// Target holding the local copy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl ObjectEntry {
    /// True if the listing selected `cached` and a local copy exists.
    #[must_use]
    pub fn is_cached(&self) -> bool {
        self.cached == Some(true)
    }

    /// True if the listing selected `status` and the object is healthy.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == Some(ObjectStatus::Ok)
    }
}

/// Everything known about an object before property selection.
#[derive(Debug, Clone)]
pub(crate) struct ObjectFacts {
    pub(crate) name: String,
    pub(crate) size: u64,
    pub(crate) status: ObjectStatus,
    /// Target and access time of the local copy, if any.
    pub(crate) local: Option<(String, DateTime<Utc>)>,
}

impl ObjectFacts {
    fn project(self, props: ListProps) -> ObjectEntry {
        let cached = self.local.is_some();
        let (location, atime) = match self.local {
            Some((target, atime)) => (Some(target), Some(atime)),
            None => (None, None),
        };
        ObjectEntry {
            name: self.name,
            size: props.size.then_some(self.size),
            cached: props.cached.then_some(cached),
            status: props.status.then_some(self.status),
            atime: if props.atime { atime } else { None },
            location: if props.location { location } else { None },
        }
    }
}

/// A finite, single-pass listing. Entries are built as they are consumed.
#[derive(Debug)]
pub struct ObjectList {
    facts: std::vec::IntoIter<ObjectFacts>,
    props: ListProps,
}

impl ObjectList {
    pub(crate) fn new(mut facts: Vec<ObjectFacts>, props: ListProps) -> Self {
        facts.sort_by(|a, b| a.name.cmp(&b.name));
        Self { facts: facts.into_iter(), props }
    }

    /// The properties selected for this listing.
    #[must_use]
    pub const fn props(&self) -> ListProps {
        self.props
    }
}

impl Iterator for ObjectList {
    type Item = ObjectEntry;

    fn next(&mut self) -> Option<Self::Item> {
        self.facts.next().map(|f| f.project(self.props))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.facts.size_hint()
    }
}

impl ExactSizeIterator for ObjectList {}
