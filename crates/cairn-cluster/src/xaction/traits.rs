// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Cairn Authors

//! Traits the coordinator uses to validate buckets and execute work units.

use async_trait::async_trait;
use cairn_core::Bck;

use super::task::{UnitStats, WorkUnit};

/// Resolves bucket references against bucket metadata.
#[async_trait]
pub trait BucketResolver: Send + Sync {
    /// Succeeds if the bucket exists.
    ///
    /// Cloud-backed buckets may be added to the bucket metadata on first
    /// resolution.
    async fn resolve(&self, bck: &Bck) -> cairn_core::Result<()>;
}

/// Executes work units on targets.
#[async_trait]
pub trait TargetWorker: Send + Sync {
    /// Runs a unit to completion.
    ///
    /// Implementations check [`WorkUnit::is_aborted`] between objects and return
    /// early once it is set.
    async fn run_unit(&self, unit: &WorkUnit) -> Result<UnitStats, String>;
}

/// A resolver that accepts every bucket, for testing.
pub struct NoOpBucketResolver;

#[async_trait]
impl BucketResolver for NoOpBucketResolver {
    async fn resolve(&self, _bck: &Bck) -> cairn_core::Result<()> {
        Ok(())
    }
}

/// A worker that completes every unit immediately, for testing.
pub struct NoOpTargetWorker;

#[async_trait]
impl TargetWorker for NoOpTargetWorker {
    async fn run_unit(&self, _unit: &WorkUnit) -> Result<UnitStats, String> {
        Ok(UnitStats::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_no_op_resolver() {
        assert!(NoOpBucketResolver.resolve(&Bck::ais("anything")).await.is_ok());
    }
}
