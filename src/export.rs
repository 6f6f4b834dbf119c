// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Bulk export of a device's programs.
//!
//! Produces an ordered list of named blobs for an external archive writer:
//!
//! ```text
//! Croquetia5.zip
//! ├── p1        primary binary, always present
//! ├── p1.c      controls binary, only if non-empty
//! ├── p2
//! └── ...
//! ```
//!
//! Every fetch is issued one at a time against the single source device.
//! Any exhausted fetch aborts the export; no partial archive is returned.

use crate::config::ExportConfig;
use crate::device::BinaryKind;
use crate::error::{FleetError, Result};
use crate::metrics;
use crate::registry::{DeviceLocks, DeviceRegistry};
use crate::resilience::RetryExecutor;
use crate::settle::SettleStrategy;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument};

/// One named blob of an export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportEntry {
    pub name: String,
    pub data: Vec<u8>,
}

/// Everything needed to package one device's programs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportArchive {
    pub source_id: String,
    /// Archive name without extension.
    pub archive_name: String,
    /// Entries in program-list order.
    pub entries: Vec<ExportEntry>,
}

impl ExportArchive {
    /// Download file name, e.g. `Croquetia5.zip`.
    pub fn file_name(&self) -> String {
        format!("{}.zip", self.archive_name)
    }

    pub fn total_bytes(&self) -> usize {
        self.entries.iter().map(|e| e.data.len()).sum()
    }

    pub fn entry_names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Sequential export of a single source device.
pub struct ExportPipeline {
    registry: Arc<DeviceRegistry>,
    retry: RetryExecutor,
    settle: Arc<dyn SettleStrategy>,
    locks: Arc<DeviceLocks>,
    config: ExportConfig,
}

impl ExportPipeline {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        retry: RetryExecutor,
        settle: Arc<dyn SettleStrategy>,
        locks: Arc<DeviceLocks>,
        config: ExportConfig,
    ) -> Self {
        Self {
            registry,
            retry,
            settle,
            locks,
            config,
        }
    }

    /// Export every program of `source_id`.
    #[instrument(skip(self), fields(source_id = %source_id))]
    pub async fn export_all(&self, source_id: &str) -> Result<ExportArchive> {
        let start = Instant::now();
        let result = self.run(source_id).await;

        match &result {
            Ok(archive) => {
                info!(
                    archive = %archive.file_name(),
                    entries = archive.len(),
                    bytes = archive.total_bytes(),
                    duration_ms = start.elapsed().as_millis(),
                    "Export complete"
                );
                metrics::record_export("success", archive.len(), archive.total_bytes(), start.elapsed());
            }
            Err(e) => {
                error!(error = %e, "Export failed");
                metrics::record_export("failure", 0, 0, start.elapsed());
                metrics::record_error("export", e.kind());
            }
        }
        result
    }

    async fn run(&self, source_id: &str) -> Result<ExportArchive> {
        if source_id.is_empty() {
            return Err(FleetError::InvalidRequest("missing source id".into()));
        }
        let source = self.registry.resolve(source_id).ok_or_else(|| FleetError::SourceNotFound {
            device_id: source_id.to_string(),
        })?;

        let _guard = self.locks.lock_all([source_id]).await;

        self.retry.call("reload", source_id, || source.reload()).await?;
        self.settle.settle(std::slice::from_ref(&source)).await;

        let props = source.props();
        let archive_name = match props.display_name() {
            Some(name) => name.to_string(),
            None => format!("{}{}", self.config.archive_prefix, source_id),
        };

        let mut entries = Vec::with_capacity(props.program_list.len());
        for key in props.program_ids() {
            let data = self
                .retry
                .call("getProgramBinary", source_id, || {
                    source.get_program_binary(key.as_str(), BinaryKind::Program)
                })
                .await?;
            entries.push(ExportEntry {
                name: key.to_string(),
                data,
            });

            let controls = self
                .retry
                .call("getProgramBinary", source_id, || {
                    source.get_program_binary(key.as_str(), BinaryKind::Controls)
                })
                .await?;
            if controls.is_empty() {
                debug!(program_id = %key, "No controls data");
            } else {
                entries.push(ExportEntry {
                    name: format!("{}{}", key, self.config.controls_suffix),
                    data: controls,
                });
            }
        }

        Ok(ExportArchive {
            source_id: source_id.to_string(),
            archive_name,
            entries,
        })
    }
}
