// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Cairn Authors

//! Storage metrics collection.
//!
//! Gauges for bucket and local-copy usage, refreshed periodically from the
//! tracker, plus descriptions of the counters the tracker emits.

use std::sync::Arc;
use std::time::Duration;

use metrics::{describe_counter, describe_gauge, gauge};
use tokio::time::interval;

use crate::tracker::BucketTracker;

/// Initialize storage metric descriptions (call once at startup).
pub fn init_storage_metrics() {
    describe_gauge!("cairn_storage_buckets", "Buckets in the current bucket metadata");
    describe_gauge!("cairn_storage_bmd_version", "Version of the current bucket metadata");
    describe_gauge!("cairn_storage_local_objects", "Objects held in target stores");
    describe_gauge!("cairn_storage_local_bytes", "Bytes held in target stores");
    describe_counter!("cairn_storage_cold_gets_total", "Reads served from a remote backend");
    describe_counter!("cairn_storage_evicted_objects_total", "Cached objects released");
    describe_counter!("cairn_storage_copied_objects_total", "Objects written by bucket copies");
}

/// Start a background task that refreshes the usage gauges every `period`.
pub fn start_storage_metrics_collector(
    tracker: Arc<BucketTracker>,
    period: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        loop {
            ticker.tick().await;
            collect_storage_metrics(&tracker).await;
        }
    })
}

async fn collect_storage_metrics(tracker: &BucketTracker) {
    match tracker.usage().await {
        Ok(usage) => {
            gauge!("cairn_storage_buckets").set(usage.buckets as f64);
            gauge!("cairn_storage_local_objects").set(usage.objects as f64);
            gauge!("cairn_storage_local_bytes").set(usage.bytes as f64);
            tracing::debug!(
                buckets = usage.buckets,
                objects = usage.objects,
                bytes = usage.bytes,
                "Storage metrics collected"
            );
        }
        Err(e) => tracing::warn!(error = %e, "Failed to collect storage metrics"),
    }
}
