// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Cairn Authors

//! Events emitted by the xaction coordinator.

use super::task::XactionKind;

/// Xaction lifecycle events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XactionEvent {
    /// An xaction was accepted.
    Submitted {
        /// Xaction id.
        xaction_id: String,
        /// Kind.
        kind: XactionKind,
    },
    /// Work units were distributed.
    Started {
        /// Xaction id.
        xaction_id: String,
        /// Number of targets involved.
        targets: usize,
    },
    /// A target finished its unit.
    UnitCompleted {
        /// Xaction id.
        xaction_id: String,
        /// Target id.
        target_id: String,
        /// Objects processed by the unit.
        objects: u64,
    },
    /// A target's unit failed.
    UnitFailed {
        /// Xaction id.
        xaction_id: String,
        /// Target id.
        target_id: String,
        /// Failure detail.
        error: String,
    },
    /// All units completed.
    Finished {
        /// Xaction id.
        xaction_id: String,
    },
    /// The xaction failed.
    Failed {
        /// Xaction id.
        xaction_id: String,
        /// Per-target details.
        details: Vec<String>,
    },
    /// The xaction was aborted.
    Aborted {
        /// Xaction id.
        xaction_id: String,
    },
    /// A terminal record passed its retention window and was removed.
    Collected {
        /// Xaction id.
        xaction_id: String,
    },
}

impl XactionEvent {
    /// The xaction the event is about.
    #[must_use]
    pub fn xaction_id(&self) -> &str {
        match self {
            Self::Submitted { xaction_id, .. }
            | Self::Started { xaction_id, .. }
            | Self::UnitCompleted { xaction_id, .. }
            | Self::UnitFailed { xaction_id, .. }
            | Self::Finished { xaction_id }
            | Self::Failed { xaction_id, .. }
            | Self::Aborted { xaction_id }
            | Self::Collected { xaction_id } => xaction_id,
        }
    }
}
