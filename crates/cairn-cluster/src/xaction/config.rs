// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Cairn Authors

//! Configuration for the xaction coordinator.

use std::time::Duration;

/// Configuration for the xaction coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Maximum per-target work units running at once within one xaction.
    pub max_concurrent_units: usize,

    /// How long terminal xactions stay queryable before collection.
    pub retention: Duration,

    /// Interval between garbage-collection sweeps.
    pub gc_interval: Duration,

    /// Timeout applied by callers that wait without an explicit deadline.
    pub default_wait_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self::from(&cairn_core::XactionConfig::default())
    }
}

impl From<&cairn_core::XactionConfig> for CoordinatorConfig {
    fn from(config: &cairn_core::XactionConfig) -> Self {
        Self {
            max_concurrent_units: config.max_concurrent_units.max(1),
            retention: Duration::from_secs(config.retention_secs),
            gc_interval: Duration::from_secs(config.gc_interval_secs.max(1)),
            default_wait_timeout: Duration::from_secs(config.default_wait_timeout_secs),
        }
    }
}
