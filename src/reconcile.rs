// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Program-set reconciliation.
//!
//! Makes every destination's program set and content identical to the
//! source's. Each destination is diffed against the source; extra programs
//! are deleted, then every source program is copied over (overwriting
//! same-id programs, since content may have changed).
//!
//! # Phases
//!
//! ```text
//! resolve ─► lock ─► reload all ─► settle ─► plan
//!                                             │
//!        ┌────────────────────────────────────┘
//!        ▼
//!   delete phase: destinations concurrently, keys one at a time
//!        │
//!   ═════╪═════ barrier: every deletion done
//!        ▼
//!   copy phase: source ids one at a time
//!        │        fetch from source, then push to all destinations concurrently
//!        ▼
//!   unlock, then a detached best-effort reload of destinations
//! ```
//!
//! Ids are processed one at a time to bound load on the source; pushes for
//! one id fan out across destinations. Any exhausted device call aborts the
//! whole operation. Nothing is rolled back: a destination may be left with
//! a partially applied diff.

use crate::device::{BinaryKind, DeviceHandle, ProgramId};
use crate::error::{FleetError, Result};
use crate::metrics;
use crate::notify::notify_reload;
use crate::registry::{DeviceLocks, DeviceRegistry};
use crate::resilience::RetryExecutor;
use crate::settle::SettleStrategy;
use futures::future::try_join_all;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn, Instrument};

/// Per-call reconciliation plan. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOperation {
    pub source_id: String,
    /// Source program ids in reported order, duplicates dropped.
    pub source_keys: Vec<ProgramId>,
    /// Keys to delete, per destination, in destination order.
    pub removals: Vec<(String, Vec<ProgramId>)>,
}

impl SyncOperation {
    /// Diff each destination's program ids against the source's.
    pub fn plan<I>(source_id: &str, source_keys: Vec<ProgramId>, destinations: I) -> Self
    where
        I: IntoIterator<Item = (String, Vec<ProgramId>)>,
    {
        let mut seen = HashSet::new();
        let source_keys: Vec<ProgramId> = source_keys.into_iter().filter(|k| seen.insert(k.clone())).collect();

        let removals = destinations
            .into_iter()
            .map(|(id, dest_keys)| {
                let remove = keys_to_remove(&dest_keys, &source_keys);
                (id, remove)
            })
            .collect();

        Self {
            source_id: source_id.to_string(),
            source_keys,
            removals,
        }
    }

    pub fn destination_ids(&self) -> impl Iterator<Item = &str> {
        self.removals.iter().map(|(id, _)| id.as_str())
    }

    /// Deletions across all destinations.
    pub fn total_removals(&self) -> usize {
        self.removals.iter().map(|(_, keys)| keys.len()).sum()
    }

    /// Writes the copy phase will issue.
    pub fn total_pushes(&self) -> usize {
        self.source_keys.len() * self.removals.len()
    }
}

/// `dest` minus `source`, by exact id equality, in `dest` order.
pub fn keys_to_remove(dest: &[ProgramId], source: &[ProgramId]) -> Vec<ProgramId> {
    let source: HashSet<&ProgramId> = source.iter().collect();
    dest.iter().filter(|k| !source.contains(k)).cloned().collect()
}

/// Drop duplicate destination ids; the first occurrence wins.
pub fn normalize_destinations<S: AsRef<str>>(ids: &[S]) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.iter()
        .map(|id| id.as_ref())
        .filter(|id| seen.insert(*id))
        .map(str::to_string)
        .collect()
}

/// Outcome of a successful reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub source_id: String,
    /// Destinations that were reconciled.
    pub destinations: Vec<String>,
    /// Destination ids with no live handle.
    pub skipped: Vec<String>,
    pub keys_deleted: usize,
    /// Source programs copied (each to every destination).
    pub programs_copied: usize,
    pub pushes: usize,
    /// Trailing reloads issued. They run detached; failures are only logged.
    pub reloads_issued: usize,
}

struct Destination {
    id: String,
    handle: Arc<dyn DeviceHandle>,
}

/// Synchronizes destination program sets to a source device.
pub struct ReconciliationEngine {
    registry: Arc<DeviceRegistry>,
    retry: RetryExecutor,
    settle: Arc<dyn SettleStrategy>,
    locks: Arc<DeviceLocks>,
}

impl ReconciliationEngine {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        retry: RetryExecutor,
        settle: Arc<dyn SettleStrategy>,
        locks: Arc<DeviceLocks>,
    ) -> Self {
        Self {
            registry,
            retry,
            settle,
            locks,
        }
    }

    /// Reconcile every destination to the source.
    ///
    /// Fails with [`FleetError::InvalidRequest`] on an empty source id or
    /// destination list, [`FleetError::SourceNotFound`] if the source has no
    /// live handle, and [`FleetError::DeviceOperationFailed`] as soon as any
    /// device call exhausts its retries. Unresolvable destinations are skipped.
    #[instrument(skip_all, fields(source_id = %source_id, destinations = destination_ids.len()))]
    pub async fn reconcile<S: AsRef<str>>(&self, source_id: &str, destination_ids: &[S]) -> Result<ReconcileReport> {
        let start = Instant::now();
        let result = self.run(source_id, destination_ids).await;

        match &result {
            Ok(report) => {
                info!(
                    destinations = report.destinations.len(),
                    skipped = report.skipped.len(),
                    keys_deleted = report.keys_deleted,
                    programs_copied = report.programs_copied,
                    duration_ms = start.elapsed().as_millis(),
                    "Reconciliation complete"
                );
                metrics::record_reconcile("success", report.destinations.len(), start.elapsed());
            }
            Err(e) => {
                error!(error = %e, duration_ms = start.elapsed().as_millis(), "Reconciliation failed");
                metrics::record_reconcile("failure", 0, start.elapsed());
                metrics::record_error("reconcile", e.kind());
            }
        }
        result
    }

    async fn run<S: AsRef<str>>(&self, source_id: &str, destination_ids: &[S]) -> Result<ReconcileReport> {
        if source_id.is_empty() {
            return Err(FleetError::InvalidRequest("missing source id".into()));
        }
        let destination_ids = normalize_destinations(destination_ids);
        if destination_ids.is_empty() {
            return Err(FleetError::InvalidRequest("missing destination ids".into()));
        }

        let source = self.registry.resolve(source_id).ok_or_else(|| FleetError::SourceNotFound {
            device_id: source_id.to_string(),
        })?;

        let mut destinations = Vec::with_capacity(destination_ids.len());
        let mut skipped = Vec::new();
        for id in destination_ids {
            match self.registry.resolve(&id) {
                Some(handle) => destinations.push(Destination { id, handle }),
                None => {
                    debug!(device_id = %id, "Destination unresolvable, skipping");
                    skipped.push(id);
                }
            }
        }

        if destinations.is_empty() {
            warn!(skipped = skipped.len(), "No resolvable destinations, nothing to reconcile");
            return Ok(ReconcileReport {
                source_id: source_id.to_string(),
                skipped,
                ..Default::default()
            });
        }

        let guards = self
            .locks
            .lock_all(std::iter::once(source_id).chain(destinations.iter().map(|d| d.id.as_str())))
            .await;

        // Refresh everything so the diff is not computed on a stale list.
        let refresh = std::iter::once((source_id, &source)).chain(destinations.iter().map(|d| (d.id.as_str(), &d.handle)));
        try_join_all(refresh.map(|(id, handle)| self.retry.call("reload", id, move || handle.reload()))).await?;

        let mut settle_set: Vec<Arc<dyn DeviceHandle>> = Vec::with_capacity(destinations.len() + 1);
        settle_set.push(Arc::clone(&source));
        settle_set.extend(destinations.iter().map(|d| Arc::clone(&d.handle)));
        self.settle.settle(&settle_set).await;

        let plan = SyncOperation::plan(
            source_id,
            source.props().program_ids(),
            destinations.iter().map(|d| (d.id.clone(), d.handle.props().program_ids())),
        );
        debug!(
            source_keys = plan.source_keys.len(),
            removals = plan.total_removals(),
            pushes = plan.total_pushes(),
            "Reconciliation planned"
        );

        // Delete phase. try_join_all returning is the barrier before copying.
        let deleted = try_join_all(
            destinations
                .iter()
                .zip(plan.removals.iter())
                .map(|(dest, (_, keys))| self.delete_extra(dest, keys)),
        )
        .await?;
        let keys_deleted: usize = deleted.into_iter().sum();

        // Copy phase.
        for key in &plan.source_keys {
            let data = self
                .retry
                .call("getProgramBinary", source_id, || {
                    source.get_program_binary(key.as_str(), BinaryKind::Program)
                })
                .await?;

            let payload: &[u8] = &data;
            try_join_all(destinations.iter().map(|dest| {
                self.retry.call("putProgramBinary", &dest.id, move || {
                    dest.handle.put_program_binary(key.as_str(), payload)
                })
            }))
            .await?;

            debug!(program_id = %key, bytes = data.len(), destinations = destinations.len(), "Program copied");
            metrics::record_programs_pushed(destinations.len());
        }

        drop(guards);

        let reload_targets: Vec<(String, Arc<dyn DeviceHandle>)> = destinations
            .iter()
            .map(|d| (d.id.clone(), Arc::clone(&d.handle)))
            .collect();
        let reloads_issued = reload_targets.len();
        tokio::spawn(
            async move {
                notify_reload(&reload_targets).await;
            }
            .in_current_span(),
        );

        Ok(ReconcileReport {
            source_id: source_id.to_string(),
            destinations: destinations.into_iter().map(|d| d.id).collect(),
            skipped,
            keys_deleted,
            programs_copied: plan.source_keys.len(),
            pushes: plan.total_pushes(),
            reloads_issued,
        })
    }

    /// Delete `keys` from one destination, one at a time.
    async fn delete_extra(&self, dest: &Destination, keys: &[ProgramId]) -> Result<usize> {
        for key in keys {
            self.retry
                .call("deleteProgram", &dest.id, || dest.handle.delete_program(key.as_str()))
                .await?;
            debug!(device_id = %dest.id, program_id = %key, "Extra program deleted");
        }
        metrics::record_programs_deleted(keys.len());
        Ok(keys.len())
    }
}
