// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Cairn Authors

//! Xaction coordinator: long-running bulk bucket operations.
//!
//! An xaction moves through `submitted -> running -> {finished, aborted, failed}`:
//! - **Submission** validates the request against bucket metadata and the current
//!   cluster map. Invalid requests fail synchronously and leave no record.
//! - **Execution** assigns one work unit per target of the map, runs the units
//!   concurrently (bounded by `max_concurrent_units`) and aggregates their results.
//! - **Completion** is observed through [`XactionCoordinator::status`] or the
//!   bounded [`XactionCoordinator::wait`]. Terminal records are collected after
//!   the retention window.
//!
//! Each record carries its own `watch` channel, so waiting on one xaction never
//! contends with updates to another.
//!
//! # Example
//!
//! ```ignore
//! let coordinator = XactionCoordinator::new(config, smap_owner, resolver, worker);
//! let id = coordinator
//!     .submit(XactionKind::CopyBucket, XactionParams::copy(src, dst))
//!     .await?;
//! let outcome = coordinator.wait(&id, Duration::from_secs(60)).await?;
//! ```

mod config;
mod events;
mod task;
mod traits;

use std::sync::Arc;
use std::time::{Duration, Instant};

use cairn_core::{Error, Result};
use chrono::Utc;
pub use config::CoordinatorConfig;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
pub use events::XactionEvent;
use metrics::{counter, gauge, histogram};
use parking_lot::Mutex;
pub use task::{
    TargetProgress, UnitState, UnitStats, WaitOutcome, WorkUnit, XactionKind, XactionParams,
    XactionSnapshot, XactionState,
};
use tokio::sync::{broadcast, mpsc, watch, Semaphore};
use tracing::{debug, error, info, warn};
pub use traits::{BucketResolver, NoOpBucketResolver, NoOpTargetWorker, TargetWorker};

use crate::node::Node;
use crate::owner::ClusterMapOwner;
use crate::smap::ClusterMap;

struct XactionRecord {
    state: watch::Sender<XactionSnapshot>,
    abort: watch::Sender<bool>,
}

impl XactionRecord {
    fn snapshot(&self) -> XactionSnapshot {
        self.state.borrow().clone()
    }
}

struct Shared {
    config: CoordinatorConfig,
    smap: Arc<ClusterMapOwner>,
    resolver: Arc<dyn BucketResolver>,
    worker: Arc<dyn TargetWorker>,
    records: DashMap<String, Arc<XactionRecord>>,
    /// Idempotency key to xaction id.
    idempotency: DashMap<String, String>,
    event_tx: broadcast::Sender<XactionEvent>,
}

/// Accepts, drives and tracks xactions.
pub struct XactionCoordinator {
    shared: Arc<Shared>,
    shutdown_tx: Mutex<Option<mpsc::Sender<()>>>,
}

impl XactionCoordinator {
    /// Creates a coordinator.
    pub fn new(
        config: CoordinatorConfig,
        smap: Arc<ClusterMapOwner>,
        resolver: Arc<dyn BucketResolver>,
        worker: Arc<dyn TargetWorker>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(1024);
        Self {
            shared: Arc::new(Shared {
                config,
                smap,
                resolver,
                worker,
                records: DashMap::new(),
                idempotency: DashMap::new(),
                event_tx,
            }),
            shutdown_tx: Mutex::new(None),
        }
    }

    /// Returns the coordinator configuration.
    pub fn config(&self) -> &CoordinatorConfig {
        &self.shared.config
    }

    /// Subscribes to xaction events.
    pub fn subscribe(&self) -> broadcast::Receiver<XactionEvent> {
        self.shared.event_tx.subscribe()
    }

    /// Submits an xaction and returns its id.
    ///
    /// # Errors
    ///
    /// Validation failures are returned before any id is allocated:
    /// `BucketNotFound` for missing buckets, `NotRemoteBucket` for evicting a
    /// native bucket, `InvalidRequest` for malformed parameters or a cluster
    /// without targets.
    pub async fn submit(&self, kind: XactionKind, params: XactionParams) -> Result<String> {
        if let Some(id) = params.idempotency_key.as_deref().and_then(|k| self.live_id_for_key(k)) {
            debug!(xaction_id = %id, "Duplicate submission, returning existing xaction");
            return Ok(id);
        }

        self.validate(kind, &params).await?;

        let smap = self.shared.smap.current();
        if smap.tmap().is_empty() {
            return Err(Error::InvalidRequest("cluster has no targets".to_string()));
        }

        let id = uuid::Uuid::new_v4().simple().to_string();
        let snapshot = XactionSnapshot {
            id: id.clone(),
            kind,
            src: params.src.clone(),
            dst: params.dst.clone(),
            state: XactionState::Submitted,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            smap_version: smap.version(),
            targets: smap
                .tmap()
                .keys()
                .map(|t| (t.clone(), TargetProgress::pending(t.clone())))
                .collect(),
            objects: 0,
            bytes: 0,
            error: None,
        };
        let (state, _) = watch::channel(snapshot);
        let (abort, _) = watch::channel(false);
        let record = Arc::new(XactionRecord { state, abort });

        // The record is inserted under the key's entry so that a concurrent
        // duplicate either sees no key or a key with its record.
        match &params.idempotency_key {
            Some(key) => match self.shared.idempotency.entry(key.clone()) {
                Entry::Occupied(entry) if self.shared.records.contains_key(entry.get()) => {
                    return Ok(entry.get().clone());
                }
                Entry::Occupied(mut entry) => {
                    self.shared.records.insert(id.clone(), Arc::clone(&record));
                    entry.insert(id.clone());
                }
                Entry::Vacant(entry) => {
                    self.shared.records.insert(id.clone(), Arc::clone(&record));
                    entry.insert(id.clone());
                }
            },
            None => {
                self.shared.records.insert(id.clone(), Arc::clone(&record));
            }
        }

        counter!("cairn_xaction_submitted_total", "kind" => kind.as_str()).increment(1);
        gauge!("cairn_xaction_records").set(self.shared.records.len() as f64);
        let _ = self.shared.event_tx.send(XactionEvent::Submitted { xaction_id: id.clone(), kind });
        info!(
            xaction_id = %id,
            kind = %kind,
            src = %params.src,
            dst = ?params.dst.as_ref().map(ToString::to_string),
            smap_version = smap.version(),
            "Xaction submitted"
        );

        tokio::spawn(run_xaction(Arc::clone(&self.shared), record, params, smap));
        Ok(id)
    }

    /// Returns the current state of an xaction without blocking.
    ///
    /// # Errors
    ///
    /// Returns `XactionNotFound` for unknown or collected ids.
    pub fn status(&self, id: &str) -> Result<XactionSnapshot> {
        self.record(id).map(|r| r.snapshot())
    }

    /// Waits until the xaction is terminal or `timeout` elapses.
    ///
    /// A timeout is reported as [`WaitOutcome::TimedOut`], not an error, and
    /// leaves the xaction running.
    ///
    /// # Errors
    ///
    /// Returns `XactionNotFound` for unknown or collected ids.
    pub async fn wait(&self, id: &str, timeout: Duration) -> Result<WaitOutcome> {
        let record = self.record(id)?;
        let mut rx = record.state.subscribe();
        let started = Instant::now();

        let outcome = match tokio::time::timeout(timeout, rx.wait_for(XactionSnapshot::is_terminal))
            .await
        {
            Ok(Ok(snapshot)) => WaitOutcome::Terminal(snapshot.clone()),
            Ok(Err(_)) => return Err(Error::XactionNotFound(id.to_string())),
            Err(_) => WaitOutcome::TimedOut(record.snapshot()),
        };
        histogram!("cairn_xaction_wait_seconds").record(started.elapsed().as_secs_f64());
        if outcome.is_timed_out() {
            debug!(xaction_id = %id, timeout_ms = timeout.as_millis(), "Wait timed out");
        }
        Ok(outcome)
    }

    /// Requests an abort.
    ///
    /// Returns false if the xaction was already terminal. The xaction ends
    /// `aborted` only if a work unit stopped because of the request; one that
    /// arrives after every unit completed leaves the outcome unchanged.
    ///
    /// # Errors
    ///
    /// Returns `XactionNotFound` for unknown or collected ids.
    pub fn abort(&self, id: &str) -> Result<bool> {
        let record = self.record(id)?;
        if record.state.borrow().is_terminal() {
            return Ok(false);
        }
        let requested = record.abort.send_if_modified(|aborted| !std::mem::replace(aborted, true));
        if requested {
            info!(xaction_id = %id, "Xaction abort requested");
        }
        Ok(true)
    }

    /// Lists xactions, oldest first.
    pub fn list(&self, kind: Option<XactionKind>, only_running: bool) -> Vec<XactionSnapshot> {
        let mut snapshots: Vec<XactionSnapshot> = self
            .shared
            .records
            .iter()
            .map(|r| r.value().snapshot())
            .filter(|s| kind.map_or(true, |k| s.kind == k))
            .filter(|s| !only_running || !s.is_terminal())
            .collect();
        snapshots.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        snapshots
    }

    /// Removes terminal records older than the retention window.
    ///
    /// Returns the number of collected records.
    pub fn gc_expired(&self) -> usize {
        gc_expired(&self.shared)
    }

    /// Starts periodic garbage collection.
    pub fn start(&self) {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        *self.shutdown_tx.lock() = Some(shutdown_tx);

        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(shared.config.gc_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        gc_expired(&shared);
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Xaction coordinator shutting down");
                        break;
                    }
                }
            }
        });

        info!(
            retention_secs = self.shared.config.retention.as_secs(),
            gc_interval_secs = self.shared.config.gc_interval.as_secs(),
            "Xaction garbage collection started"
        );
    }

    /// Stops garbage collection. Running xactions are not affected.
    pub async fn stop(&self) {
        let shutdown_tx = self.shutdown_tx.lock().take();
        if let Some(tx) = shutdown_tx {
            let _ = tx.send(()).await;
        }
    }

    fn record(&self, id: &str) -> Result<Arc<XactionRecord>> {
        self.shared
            .records
            .get(id)
            .map(|r| Arc::clone(r.value()))
            .ok_or_else(|| Error::XactionNotFound(id.to_string()))
    }

    fn live_id_for_key(&self, key: &str) -> Option<String> {
        let id = self.shared.idempotency.get(key)?.value().clone();
        self.shared.records.contains_key(&id).then_some(id)
    }

    async fn validate(&self, kind: XactionKind, params: &XactionParams) -> Result<()> {
        params.src.validate()?;
        match kind {
            XactionKind::CopyBucket => {
                let dst = params.dst.as_ref().ok_or_else(|| {
                    Error::InvalidRequest("copy requires a destination bucket".to_string())
                })?;
                dst.validate()?;
                if *dst == params.src {
                    return Err(Error::InvalidRequest(format!(
                        "cannot copy bucket {dst} onto itself"
                    )));
                }
                self.shared.resolver.resolve(&params.src).await?;
                self.shared.resolver.resolve(dst).await?;
            }
            XactionKind::EvictRemoteBucket => {
                if !params.src.is_remote() {
                    return Err(Error::NotRemoteBucket { bucket: params.src.to_string() });
                }
                self.shared.resolver.resolve(&params.src).await?;
            }
        }
        Ok(())
    }
}

fn gc_expired(shared: &Shared) -> usize {
    let now = Utc::now();
    let retention = shared.config.retention;
    let expired: Vec<String> = shared
        .records
        .iter()
        .filter(|r| {
            let state = r.value().state.borrow();
            state.is_terminal()
                && state
                    .ended_at
                    .and_then(|ended| (now - ended).to_std().ok())
                    .is_some_and(|age| age >= retention)
        })
        .map(|r| r.key().clone())
        .collect();

    for id in &expired {
        shared.records.remove(id);
        let _ = shared.event_tx.send(XactionEvent::Collected { xaction_id: id.clone() });
    }
    if !expired.is_empty() {
        shared.idempotency.retain(|_, id| shared.records.contains_key(id));
        counter!("cairn_xaction_collected_total").increment(expired.len() as u64);
        gauge!("cairn_xaction_records").set(shared.records.len() as f64);
        debug!(collected = expired.len(), "Collected expired xactions");
    }
    expired.len()
}

async fn run_xaction(
    shared: Arc<Shared>,
    record: Arc<XactionRecord>,
    params: XactionParams,
    smap: Arc<ClusterMap>,
) {
    let (id, kind) = {
        let snap = record.state.borrow();
        (snap.id.clone(), snap.kind)
    };
    let started = Instant::now();
    record.state.send_modify(|s| {
        s.state = XactionState::Running;
        s.started_at = Some(Utc::now());
    });
    let targets: Vec<Node> = smap.tmap().values().cloned().collect();
    let _ = shared
        .event_tx
        .send(XactionEvent::Started { xaction_id: id.clone(), targets: targets.len() });
    gauge!("cairn_xaction_running", "kind" => kind.as_str()).increment(1.0);
    info!(xaction_id = %id, kind = %kind, targets = targets.len(), "Xaction started");

    let semaphore = Arc::new(Semaphore::new(shared.config.max_concurrent_units));
    let mut handles = Vec::with_capacity(targets.len());
    for target in targets {
        let unit = WorkUnit {
            xaction_id: id.clone(),
            kind,
            src: params.src.clone(),
            dst: params.dst.clone(),
            prefix: params.prefix.clone(),
            target,
            smap: Arc::clone(&smap),
            abort: record.abort.subscribe(),
        };
        let target_id = unit.target.id.clone();
        let handle = tokio::spawn(run_unit(
            Arc::clone(&shared),
            Arc::clone(&record),
            Arc::clone(&semaphore),
            unit,
        ));
        handles.push((target_id, handle));
    }

    let mut objects = 0u64;
    let mut bytes = 0u64;
    let mut failed = false;
    let mut aborted = false;
    for (target_id, handle) in handles {
        match handle.await {
            Ok(Ok(stats)) => {
                objects += stats.objects;
                bytes += stats.bytes;
            }
            Ok(Err(UnitFailure::Aborted)) => aborted = true,
            Ok(Err(UnitFailure::Failed)) => failed = true,
            Err(e) => {
                error!(xaction_id = %id, target_id = %target_id, error = %e, "Work unit panicked");
                record_unit_failure(&record, &target_id, format!("work unit panicked: {e}"));
                failed = true;
            }
        }
    }

    let state = if aborted {
        XactionState::Aborted
    } else if failed {
        XactionState::Failed
    } else {
        XactionState::Finished
    };
    record.state.send_modify(|s| {
        s.state = state;
        s.ended_at = Some(Utc::now());
        s.objects = objects;
        s.bytes = bytes;
        if aborted {
            s.error = Some("aborted".to_string());
        } else if failed {
            s.error = Some(s.failure_details().join("; "));
        }
    });

    gauge!("cairn_xaction_running", "kind" => kind.as_str()).decrement(1.0);
    counter!("cairn_xaction_completed_total", "kind" => kind.as_str(), "state" => state.as_str())
        .increment(1);
    histogram!("cairn_xaction_duration_seconds", "kind" => kind.as_str())
        .record(started.elapsed().as_secs_f64());

    let event = match state {
        XactionState::Aborted => {
            warn!(xaction_id = %id, "Xaction aborted");
            XactionEvent::Aborted { xaction_id: id }
        }
        XactionState::Failed => {
            let details = record.state.borrow().failure_details();
            warn!(xaction_id = %id, details = ?details, "Xaction failed");
            XactionEvent::Failed { xaction_id: id, details }
        }
        _ => {
            info!(
                xaction_id = %id,
                objects,
                bytes,
                duration_ms = started.elapsed().as_millis(),
                "Xaction finished"
            );
            XactionEvent::Finished { xaction_id: id }
        }
    };
    let _ = shared.event_tx.send(event);
}

/// Why a work unit did not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnitFailure {
    /// Stopped by an abort request.
    Aborted,
    /// Failed on its own.
    Failed,
}

/// Runs one target's unit. Failures are recorded on the xaction before returning.
async fn run_unit(
    shared: Arc<Shared>,
    record: Arc<XactionRecord>,
    semaphore: Arc<Semaphore>,
    unit: WorkUnit,
) -> std::result::Result<UnitStats, UnitFailure> {
    let target_id = unit.target.id.clone();

    if !shared.smap.current().is_target_alive(&target_id) {
        record_unit_failure(&record, &target_id, "target unreachable".to_string());
        return Err(UnitFailure::Failed);
    }
    let Ok(_permit) = semaphore.acquire_owned().await else {
        record_unit_failure(&record, &target_id, "coordinator shutting down".to_string());
        return Err(UnitFailure::Failed);
    };

    record.state.send_modify(|s| {
        if let Some(progress) = s.targets.get_mut(&target_id) {
            progress.state = UnitState::Running;
        }
    });

    let result = tokio::select! {
        result = shared.worker.run_unit(&unit) => result,
        () = target_lost(shared.smap.subscribe(), target_id.clone()) => {
            Err("target became unreachable".to_string())
        }
        () = aborted(unit.abort.clone()) => Err("aborted".to_string()),
    };

    match result {
        Ok(stats) => {
            record.state.send_modify(|s| {
                if let Some(progress) = s.targets.get_mut(&target_id) {
                    progress.state = UnitState::Done;
                    progress.objects = stats.objects;
                    progress.bytes = stats.bytes;
                }
            });
            let _ = shared.event_tx.send(XactionEvent::UnitCompleted {
                xaction_id: unit.xaction_id.clone(),
                target_id,
                objects: stats.objects,
            });
            Ok(stats)
        }
        Err(error) if unit.is_aborted() => {
            debug!(xaction_id = %unit.xaction_id, target_id = %target_id, "Work unit aborted");
            record_unit_failure(&record, &target_id, error);
            Err(UnitFailure::Aborted)
        }
        Err(error) => {
            warn!(
                xaction_id = %unit.xaction_id,
                target_id = %target_id,
                error = %error,
                "Work unit failed"
            );
            record_unit_failure(&record, &target_id, error.clone());
            let _ = shared.event_tx.send(XactionEvent::UnitFailed {
                xaction_id: unit.xaction_id.clone(),
                target_id,
                error,
            });
            Err(UnitFailure::Failed)
        }
    }
}

fn record_unit_failure(record: &XactionRecord, target_id: &str, error: String) {
    record.state.send_modify(|s| {
        if let Some(progress) = s.targets.get_mut(target_id) {
            progress.state = UnitState::Failed;
            progress.error = Some(error);
        }
    });
}

/// Resolves once the target is absent from the map or unreachable.
async fn target_lost(mut smap: watch::Receiver<Arc<ClusterMap>>, target_id: String) {
    if smap.wait_for(|m| !m.is_target_alive(&target_id)).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Resolves once an abort is requested.
async fn aborted(mut abort: watch::Receiver<bool>) {
    if abort.wait_for(|a| *a).await.is_err() {
        std::future::pending::<()>().await;
    }
}
