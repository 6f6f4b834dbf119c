//! # Pattern Sync
//!
//! Orchestration for a fleet of networked lighting controllers: keeping
//! program (pattern) sets in sync, exporting them, and fanning out live
//! commands.
//!
//! ## Architecture
//!
//! Device discovery and the per-device wire protocol live outside this
//! crate. Discovery fills a [`DeviceRegistry`] with one [`DeviceHandle`]
//! per controller; everything here reads it:
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────────┐
//! │                             FleetCoordinator                              │
//! │                                                                           │
//! │  ┌──────────────────────┐  ┌────────────────┐  ┌───────────────────────┐  │
//! │  │ ReconciliationEngine │  │ ExportPipeline │  │ CommandDispatcher     │  │
//! │  │ (diff, delete, copy) │  │ (sequential)   │  │ (+ WicketMetadata)    │  │
//! │  └──────────┬───────────┘  └───────┬────────┘  └───────────┬───────────┘  │
//! │             │                      │                       │              │
//! │             ▼                      ▼                       ▼              │
//! │  ┌──────────────────────────────────────────┐   ┌───────────────────────┐ │
//! │  │ RetryExecutor (5 retries, 50ms / 100ms)  │   │ Bulkhead (single try) │ │
//! │  └─────────────────────┬────────────────────┘   └───────────┬───────────┘ │
//! │                        ▼                                    ▼             │
//! │                 ┌──────────────────────────────────────────────┐          │
//! │                 │ DeviceRegistry → Arc<dyn DeviceHandle>       │          │
//! │                 └──────────────────────────────────────────────┘          │
//! └───────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Failure Policy
//!
//! 1. **Reconciliation / export**: any device call that exhausts its retries
//!    aborts the whole operation. Nothing is rolled back.
//! 2. **Dispatch**: per-target problems (unknown id, missing metadata, send
//!    failure) are logged and reported, never escalated.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use pattern_sync::{DeviceEntry, DeviceRegistry, FleetConfig, FleetCoordinator, NoOpDevice};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> pattern_sync::Result<()> {
//!     let registry = Arc::new(DeviceRegistry::new());
//!     registry.upsert(DeviceEntry::new("6619856", "192.168.1.40", Arc::new(NoOpDevice::named("Croquetia1"))));
//!     registry.upsert(DeviceEntry::new("6619857", "192.168.1.41", Arc::new(NoOpDevice::named("Croquetia2"))));
//!
//!     let fleet = FleetCoordinator::new(FleetConfig::default(), registry)?;
//!     let report = fleet.reconcile("6619856", &["6619857"]).await?;
//!     println!("copied {} programs", report.programs_copied);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod coordinator;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod export;
pub mod metadata;
pub mod metrics;
pub mod notify;
pub mod reconcile;
pub mod registry;
pub mod resilience;
pub mod settle;

// Re-exports for convenience
pub use config::{DispatchConfig, ExportConfig, FleetConfig, RetrySettings, SettleConfig, SettleKind};
pub use coordinator::{DeviceHealth, FleetCoordinator, FleetHealth};
pub use device::{BinaryKind, Command, DeviceError, DeviceHandle, DeviceProps, NoOpDevice, ProgramEntry, ProgramId};
pub use dispatch::{CommandDispatcher, DispatchReport};
pub use error::{FleetError, Result};
pub use export::{ExportArchive, ExportEntry, ExportPipeline};
pub use metadata::{WicketMetadata, WicketTable};
pub use notify::{notify_reload, ReloadReport};
pub use reconcile::{ReconcileReport, ReconciliationEngine, SyncOperation};
pub use registry::{DeviceEntry, DeviceLocks, DeviceRegistry, DeviceSummary};
pub use resilience::{RetryExecutor, RetryPolicy};
pub use settle::{FixedDelay, PollUntilStable, SettleStrategy};
