// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Live command fan-out.
//!
//! Sends one command to many devices. Commands that select a program
//! (`programName` present) are augmented per target with the target's
//! [`WicketMetadata`](crate::metadata::WicketMetadata), looked up by the
//! device's reported name.
//!
//! Unlike reconciliation, nothing here aborts on a device: unresolvable ids
//! are skipped and metadata misses send the command unaugmented. Each send
//! runs in its own task, so [`CommandDispatcher::dispatch`] returns once
//! every send is issued; a stalled controller never holds the caller. Send
//! failures are logged and counted from the task. Commands are sent once;
//! a retried live command could land after a newer one.

use crate::device::{Command, DeviceHandle};
use crate::error::{FleetError, Result};
use crate::metadata::{augment_command, wants_metadata, WicketTable};
use crate::metrics;
use crate::registry::DeviceRegistry;
use crate::resilience::{Bulkhead, RetryExecutor, RetryPolicy};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn, Instrument};

/// Outcome of a dispatch. Always returned on a valid request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    /// Ids a send was issued to, in request order.
    pub dispatched: Vec<String>,
    /// Ids with no live handle.
    pub skipped: Vec<String>,
    /// Targets that received an augmented command.
    pub augmented: usize,
    /// Targets that wanted metadata but had no table entry.
    pub metadata_misses: Vec<String>,
}

struct Target {
    id: String,
    handle: Arc<dyn DeviceHandle>,
    command: Command,
}

/// Bounded, failure-tolerant command fan-out.
pub struct CommandDispatcher {
    registry: Arc<DeviceRegistry>,
    metadata: Arc<WicketTable>,
    bulkhead: Bulkhead,
    sender: RetryExecutor,
}

impl CommandDispatcher {
    /// `max_concurrent` bounds commands in flight at once.
    pub fn new(registry: Arc<DeviceRegistry>, metadata: Arc<WicketTable>, max_concurrent: usize) -> Self {
        Self {
            registry,
            metadata,
            bulkhead: Bulkhead::new(max_concurrent),
            sender: RetryExecutor::new(RetryPolicy::none()),
        }
    }

    /// Share a rate limiter with the other orchestrators.
    pub fn with_sender(mut self, sender: RetryExecutor) -> Self {
        self.sender = sender;
        self
    }

    /// Send `command` to every resolvable id.
    ///
    /// Fails only with [`FleetError::InvalidRequest`] when `ids` or
    /// `command` is empty.
    #[instrument(skip_all, fields(targets = ids.len()))]
    pub async fn dispatch<S: AsRef<str>>(&self, ids: &[S], command: &Command) -> Result<DispatchReport> {
        if ids.is_empty() {
            return Err(FleetError::InvalidRequest("missing ids".into()));
        }
        if command.is_empty() {
            return Err(FleetError::InvalidRequest("missing command".into()));
        }

        let mut report = DispatchReport::default();
        let augment = wants_metadata(command);
        let mut targets = Vec::with_capacity(ids.len());

        for id in ids {
            let id = id.as_ref();
            let Some(handle) = self.registry.resolve(id) else {
                debug!(device_id = %id, "Target unresolvable, skipping");
                report.skipped.push(id.to_string());
                continue;
            };

            let command = if augment {
                self.command_for(id, &*handle, command, &mut report)
            } else {
                command.clone()
            };
            targets.push(Target {
                id: id.to_string(),
                handle,
                command,
            });
        }

        for target in targets {
            report.dispatched.push(target.id.clone());
            tokio::spawn(self.send(target).in_current_span());
        }

        info!(
            dispatched = report.dispatched.len(),
            skipped = report.skipped.len(),
            augmented = report.augmented,
            "Command dispatched"
        );
        metrics::record_dispatch(report.dispatched.len(), report.skipped.len(), report.augmented);
        Ok(report)
    }

    fn command_for(&self, id: &str, handle: &dyn DeviceHandle, command: &Command, report: &mut DispatchReport) -> Command {
        let props = handle.props();
        let name = props.display_name().unwrap_or_default();

        match self.metadata.require(name) {
            Ok(meta) => {
                report.augmented += 1;
                let augmented = augment_command(command, meta);
                debug!(device_id = %id, device_name = %name, loc = meta.loc, "Command augmented with wicket metadata");
                augmented
            }
            Err(e) => {
                warn!(device_id = %id, error = %e, "Sending command unaugmented");
                metrics::record_metadata_miss(miss_reason(name));
                report.metadata_misses.push(id.to_string());
                command.clone()
            }
        }
    }

    /// Detached send of one target's command, holding a bulkhead slot.
    fn send(&self, target: Target) -> impl std::future::Future<Output = ()> + Send + 'static {
        let bulkhead = self.bulkhead.clone();
        let sender = self.sender.clone();

        async move {
            let Some(_slot) = bulkhead.acquire().await else {
                warn!(device_id = %target.id, "Dispatch bulkhead closed");
                metrics::record_dispatch_failure();
                return;
            };

            let Target { id, handle, command } = target;
            let result = sender
                .call("setCommand", &id, || handle.set_command(command.clone()))
                .await;

            if let Err(e) = result {
                warn!(device_id = %id, error = %e, "Command send failed, not retrying");
                metrics::record_dispatch_failure();
            }
        }
    }
}

/// Metric label for a metadata miss. Never the device name itself.
fn miss_reason(name: &str) -> &'static str {
    if name.is_empty() {
        "unnamed"
    } else {
        "unknown_name"
    }
}
