// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Fleet coordinator.
//!
//! The entry point that ties together:
//! - The injected [`DeviceRegistry`]
//! - Program reconciliation via [`ReconciliationEngine`]
//! - Bulk export via [`ExportPipeline`]
//! - Command fan-out via [`CommandDispatcher`]
//!
//! # Wiring
//!
//! ```text
//!                     FleetConfig
//!                          │
//!            ┌─────────────┼──────────────┐
//!            ▼             ▼              ▼
//!      RetryExecutor   SettleStrategy  DeviceLocks
//!       (+ limiter)        │              │
//!            │             │              │
//!     ┌──────┴──────┬──────┴──────┬───────┘
//!     ▼             ▼             ▼
//! Reconciliation  Export      Dispatcher ◄── WicketTable
//!     │             │             │
//!     └─────────────┴──────┬──────┘
//!                          ▼
//!                   DeviceRegistry (read only)
//! ```
//!
//! The HTTP layer that calls into this facade is out of scope; every
//! method returns a report or a [`FleetError`](crate::FleetError) whose
//! [`is_client_error()`](crate::FleetError::is_client_error) picks the status class.

mod types;

pub use types::{DeviceHealth, FleetHealth};

use crate::config::FleetConfig;
use crate::device::Command;
use crate::dispatch::{CommandDispatcher, DispatchReport};
use crate::error::Result;
use crate::export::{ExportArchive, ExportPipeline};
use crate::metadata::WicketTable;
use crate::notify::{notify_reload, ReloadReport};
use crate::reconcile::{ReconcileReport, ReconciliationEngine};
use crate::registry::{DeviceLocks, DeviceRegistry, DeviceSummary};
use crate::resilience::{RateLimiter, RetryExecutor, RetryPolicy};
use crate::settle::{self, SettleStrategy};
use std::sync::Arc;
use tracing::{debug, info};

/// Owns the orchestrators and exposes the fleet API.
pub struct FleetCoordinator {
    config: FleetConfig,

    /// Populated by discovery; read only here.
    registry: Arc<DeviceRegistry>,

    metadata: Arc<WicketTable>,

    reconciler: ReconciliationEngine,
    exporter: ExportPipeline,
    dispatcher: CommandDispatcher,
}

impl FleetCoordinator {
    /// Coordinator over the reference wicket table and the configured settle strategy.
    pub fn new(config: FleetConfig, registry: Arc<DeviceRegistry>) -> Result<Self> {
        let settle = settle::from_config(&config.settle);
        Self::with_components(config, registry, WicketTable::reference(), settle)
    }

    /// Coordinator with an explicit metadata table and settle strategy.
    ///
    /// Fails with [`FleetError::Config`](crate::FleetError::Config) if the config is invalid.
    pub fn with_components(
        config: FleetConfig,
        registry: Arc<DeviceRegistry>,
        metadata: WicketTable,
        settle: Arc<dyn SettleStrategy>,
    ) -> Result<Self> {
        config.validate()?;

        let limiter = config
            .rate_limit
            .rate_limit_config()
            .map(|limit| Arc::new(RateLimiter::new(limit)));

        let mut retry = RetryExecutor::new(config.retry.policy());
        let mut sender = RetryExecutor::new(RetryPolicy::none());
        if let Some(limiter) = &limiter {
            retry = retry.with_rate_limiter(Arc::clone(limiter));
            sender = sender.with_rate_limiter(Arc::clone(limiter));
        }

        let locks = Arc::new(if config.exclusive_device_access {
            DeviceLocks::new()
        } else {
            DeviceLocks::disabled()
        });
        let metadata = Arc::new(metadata);

        debug!(
            retry = ?retry.policy(),
            settle = settle.name(),
            rate_limited = limiter.is_some(),
            exclusive_device_access = locks.is_enabled(),
            wicket_entries = metadata.len(),
            "Fleet coordinator configured"
        );

        let reconciler = ReconciliationEngine::new(
            Arc::clone(&registry),
            retry.clone(),
            Arc::clone(&settle),
            Arc::clone(&locks),
        );
        let exporter = ExportPipeline::new(
            Arc::clone(&registry),
            retry,
            settle,
            locks,
            config.export.clone(),
        );
        let dispatcher = CommandDispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&metadata),
            config.dispatch.max_concurrent,
        )
        .with_sender(sender);

        Ok(Self {
            config,
            registry,
            metadata,
            reconciler,
            exporter,
            dispatcher,
        })
    }

    pub fn config(&self) -> &FleetConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    pub fn metadata(&self) -> &WicketTable {
        &self.metadata
    }

    /// Registry snapshot with device-reported properties.
    pub fn list_devices(&self) -> Vec<DeviceSummary> {
        self.registry.snapshot()
    }

    /// Send a live command to `ids`. See [`CommandDispatcher::dispatch`].
    pub async fn dispatch_command<S: AsRef<str>>(&self, ids: &[S], command: &Command) -> Result<DispatchReport> {
        self.dispatcher.dispatch(ids, command).await
    }

    /// Ask every live device to reload its program list. Never fails.
    pub async fn reload_all(&self) -> ReloadReport {
        let devices = self.registry.live_handles();
        let report = notify_reload(&devices).await;
        info!(issued = report.issued, failed = report.failed.len(), "Fleet reload requested");
        report
    }

    /// Make every destination's programs match the source's.
    /// See [`ReconciliationEngine::reconcile`].
    pub async fn reconcile<S: AsRef<str>>(&self, source_id: &str, destination_ids: &[S]) -> Result<ReconcileReport> {
        self.reconciler.reconcile(source_id, destination_ids).await
    }

    /// Export every program of a device. See [`ExportPipeline::export_all`].
    pub async fn export_all(&self, source_id: &str) -> Result<ExportArchive> {
        self.exporter.export_all(source_id).await
    }

    /// Health snapshot for monitoring endpoints.
    ///
    /// Performs no device I/O.
    pub fn health_check(&self) -> FleetHealth {
        let devices = self
            .registry
            .all()
            .into_iter()
            .map(|entry| {
                let name = entry
                    .handle()
                    .and_then(|h| h.props().display_name().map(str::to_string));
                let has_metadata = name.as_deref().is_some_and(|n| self.metadata.lookup(n).is_some());
                DeviceHealth {
                    live: entry.is_live(),
                    id: entry.id,
                    address: entry.address,
                    last_seen: entry.last_seen,
                    name,
                    has_metadata,
                }
            })
            .collect();

        FleetHealth::from_devices(devices, self.metadata.len(), self.config.exclusive_device_access)
    }
}
