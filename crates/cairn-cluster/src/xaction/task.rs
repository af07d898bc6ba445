// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Cairn Authors

//! Xaction records, states and work units.

use std::collections::BTreeMap;
use std::sync::Arc;

use cairn_core::Bck;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::node::Node;
use crate::smap::ClusterMap;

/// Kind of bulk bucket operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum XactionKind {
    /// Copy every object of one bucket into another.
    #[serde(rename = "copy-bck")]
    CopyBucket,
    /// Drop the cached copies of a cloud-backed bucket.
    #[serde(rename = "evict-remote-bck")]
    EvictRemoteBucket,
}

impl XactionKind {
    /// Returns the kind tag.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::CopyBucket => "copy-bck",
            Self::EvictRemoteBucket => "evict-remote-bck",
        }
    }
}

impl std::fmt::Display for XactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters of a submitted xaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct XactionParams {
    /// Source bucket.
    pub src: Bck,
    /// Destination bucket, for copies.
    pub dst: Option<Bck>,
    /// Restrict the operation to object names with this prefix.
    pub prefix: Option<String>,
    /// Client idempotency key. Resubmissions with the same key return the same id.
    pub idempotency_key: Option<String>,
}

impl XactionParams {
    /// Parameters for copying `src` into `dst`.
    #[must_use]
    pub fn copy(src: Bck, dst: Bck) -> Self {
        Self { src, dst: Some(dst), prefix: None, idempotency_key: None }
    }

    /// Parameters for evicting `bck`.
    #[must_use]
    pub fn evict(bck: Bck) -> Self {
        Self { src: bck, dst: None, prefix: None, idempotency_key: None }
    }

    /// Sets the object name prefix.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Sets the idempotency key.
    #[must_use]
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// Lifecycle state of an xaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum XactionState {
    /// Accepted, units not yet started.
    Submitted,
    /// Units are executing.
    Running,
    /// Every unit completed.
    Finished,
    /// Stopped on request.
    Aborted,
    /// At least one unit failed.
    Failed,
}

impl XactionState {
    /// Returns true for finished, aborted and failed.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Aborted | Self::Failed)
    }

    /// Returns the state name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Aborted => "aborted",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for XactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of one target's work unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitState {
    /// Waiting for a concurrency slot.
    Pending,
    /// Executing on the target.
    Running,
    /// Completed.
    Done,
    /// Failed or cancelled.
    Failed,
}

/// Progress of a single target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetProgress {
    /// Target id.
    pub target_id: String,
    /// Unit state.
    pub state: UnitState,
    /// Objects processed.
    pub objects: u64,
    /// Bytes processed.
    pub bytes: u64,
    /// Failure detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TargetProgress {
    pub(crate) fn pending(target_id: impl Into<String>) -> Self {
        Self {
            target_id: target_id.into(),
            state: UnitState::Pending,
            objects: 0,
            bytes: 0,
            error: None,
        }
    }
}

/// Point-in-time view of an xaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct XactionSnapshot {
    /// Xaction id.
    pub id: String,
    /// Kind.
    pub kind: XactionKind,
    /// Source bucket.
    pub src: Bck,
    /// Destination bucket.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dst: Option<Bck>,
    /// Current state.
    pub state: XactionState,
    /// Submission time.
    pub created_at: DateTime<Utc>,
    /// When units started executing.
    pub started_at: Option<DateTime<Utc>>,
    /// When the xaction reached a terminal state.
    pub ended_at: Option<DateTime<Utc>>,
    /// Cluster map version the work was distributed against.
    pub smap_version: u64,
    /// Per-target progress.
    pub targets: BTreeMap<String, TargetProgress>,
    /// Total objects processed.
    pub objects: u64,
    /// Total bytes processed.
    pub bytes: u64,
    /// Overall failure or abort detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl XactionSnapshot {
    /// Returns true once the xaction reached a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Per-target failure details, formatted as `target: error`.
    #[must_use]
    pub fn failure_details(&self) -> Vec<String> {
        let details: Vec<String> = self
            .targets
            .values()
            .filter_map(|p| p.error.as_ref().map(|e| format!("{}: {e}", p.target_id)))
            .collect();
        if details.is_empty() {
            self.error.iter().cloned().collect()
        } else {
            details
        }
    }
}

/// Result of a bounded wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The xaction reached a terminal state.
    Terminal(XactionSnapshot),
    /// The deadline passed first. Carries the latest state.
    TimedOut(XactionSnapshot),
}

impl WaitOutcome {
    /// The snapshot carried by either outcome.
    #[must_use]
    pub fn snapshot(&self) -> &XactionSnapshot {
        match self {
            Self::Terminal(s) | Self::TimedOut(s) => s,
        }
    }

    /// Returns true if the deadline passed.
    #[must_use]
    pub const fn is_timed_out(&self) -> bool {
        matches!(self, Self::TimedOut(_))
    }
}

/// Work assigned to one target.
#[derive(Debug, Clone)]
pub struct WorkUnit {
    /// Owning xaction.
    pub xaction_id: String,
    /// Kind.
    pub kind: XactionKind,
    /// Source bucket.
    pub src: Bck,
    /// Destination bucket.
    pub dst: Option<Bck>,
    /// Object name prefix.
    pub prefix: Option<String>,
    /// Target executing the unit.
    pub target: Node,
    /// Map the work was distributed against.
    pub smap: Arc<ClusterMap>,
    pub(crate) abort: watch::Receiver<bool>,
}

impl WorkUnit {
    /// Returns true once the xaction was aborted. Workers check this between objects.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        *self.abort.borrow()
    }

    /// Returns true if `name` matches the unit's prefix.
    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        self.prefix.as_deref().map_or(true, |p| name.starts_with(p))
    }
}

/// Counters reported by a completed unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnitStats {
    /// Objects processed.
    pub objects: u64,
    /// Bytes processed.
    pub bytes: u64,
}
