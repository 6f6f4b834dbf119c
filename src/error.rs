// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for fleet orchestration.
//!
//! Errors are categorized by how the owning operation reacts to them.
//! Transient device failures never show up here directly: they are masked
//! by [`RetryExecutor`](crate::resilience::RetryExecutor) and only surface as
//! [`FleetError::DeviceOperationFailed`] once the retry budget is spent.
//!
//! # Error Categories
//!
//! | Error Type | Fatal | Client | Description |
//! |------------|-------|--------|-------------|
//! | `InvalidRequest` | Yes | Yes | Missing or malformed request fields |
//! | `SourceNotFound` | Yes | Yes | Source device has no live handle |
//! | `TargetUnresolvable` | No | No | Destination/target skipped |
//! | `DeviceOperationFailed` | Yes | No | Device call exhausted its retries |
//! | `MetadataLookupFailed` | No | No | Command proceeds unaugmented |
//! | `Config` | Yes | Yes | Configuration invalid |
//! | `Internal` | Yes | No | Unexpected internal error |
//!
//! # Fatal vs. Target-Local
//!
//! Use [`FleetError::is_fatal()`] to decide whether an error aborts the
//! enclosing reconciliation/export. Non-fatal errors are logged where they
//! occur and the operation continues with the remaining targets.

use crate::device::DeviceError;
use thiserror::Error;

/// Result type alias for fleet operations.
pub type Result<T> = std::result::Result<T, FleetError>;

/// Errors that can occur while orchestrating devices.
#[derive(Error, Debug)]
pub enum FleetError {
    /// Required request fields are missing or malformed.
    ///
    /// Reported immediately, never retried.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The source device of a reconciliation/export has no live handle.
    #[error("Source device not found: {device_id}")]
    SourceNotFound { device_id: String },

    /// A destination or dispatch target has no live handle.
    ///
    /// Skipped silently wherever per-target tolerance applies.
    #[error("Target device unresolvable: {device_id}")]
    TargetUnresolvable { device_id: String },

    /// A device call failed on every attempt.
    ///
    /// Carries the error from the *last* attempt.
    #[error("Device operation failed ({device_id}, {operation}) after {attempts} attempts: {source}")]
    DeviceOperationFailed {
        device_id: String,
        operation: String,
        attempts: usize,
        #[source]
        source: DeviceError,
    },

    /// No positional metadata is registered for a device name.
    #[error("No wicket metadata for device name {device_name:?}")]
    MetadataLookupFailed { device_name: String },

    /// Invalid or unreadable configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl FleetError {
    /// Create a device failure for an operation on a device.
    pub fn device(
        device_id: impl Into<String>,
        operation: impl Into<String>,
        attempts: usize,
        source: DeviceError,
    ) -> Self {
        Self::DeviceOperationFailed {
            device_id: device_id.into(),
            operation: operation.into(),
            attempts,
            source,
        }
    }

    /// Check if this error aborts the enclosing operation.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::InvalidRequest(_) => true,
            Self::SourceNotFound { .. } => true,
            Self::TargetUnresolvable { .. } => false, // skipped per target
            Self::DeviceOperationFailed { .. } => true,
            Self::MetadataLookupFailed { .. } => false, // command goes out unaugmented
            Self::Config(_) => true,
            Self::Internal(_) => true,
        }
    }

    /// Check if the caller is at fault (maps to a 4xx response).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidRequest(_) | Self::SourceNotFound { .. } | Self::Config(_)
        )
    }

    /// Short label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::SourceNotFound { .. } => "source_not_found",
            Self::TargetUnresolvable { .. } => "target_unresolvable",
            Self::DeviceOperationFailed { .. } => "device_operation_failed",
            Self::MetadataLookupFailed { .. } => "metadata_lookup_failed",
            Self::Config(_) => "config",
            Self::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_request_is_fatal_client_error() {
        let err = FleetError::InvalidRequest("missing ids or command".to_string());
        assert!(err.is_fatal());
        assert!(err.is_client_error());
        assert!(err.to_string().contains("missing ids or command"));
    }

    #[test]
    fn test_source_not_found() {
        let err = FleetError::SourceNotFound {
            device_id: "6619856".to_string(),
        };
        assert!(err.is_fatal());
        assert!(err.is_client_error());
        assert!(err.to_string().contains("6619856"));
    }

    #[test]
    fn test_target_unresolvable_not_fatal() {
        let err = FleetError::TargetUnresolvable {
            device_id: "42".to_string(),
        };
        assert!(!err.is_fatal());
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_metadata_lookup_not_fatal() {
        let err = FleetError::MetadataLookupFailed {
            device_name: "Croquetia99".to_string(),
        };
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("Croquetia99"));
    }

    #[test]
    fn test_device_operation_failed_formatting() {
        let err = FleetError::device("dev-1", "deleteProgram", 6, DeviceError::new("socket closed"));
        assert!(err.is_fatal());
        assert!(!err.is_client_error());
        let msg = err.to_string();
        assert!(msg.contains("dev-1"));
        assert!(msg.contains("deleteProgram"));
        assert!(msg.contains("6 attempts"));
        assert!(msg.contains("socket closed"));
    }

    #[test]
    fn test_device_operation_failed_source() {
        use std::error::Error;
        let err = FleetError::device("dev-1", "getProgramBinary", 1, DeviceError::new("timeout"));
        let source = err.source().map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(FleetError::Config("x".into()).kind(), "config");
        assert_eq!(FleetError::Internal("x".into()).kind(), "internal");
        assert_eq!(
            FleetError::SourceNotFound { device_id: "a".into() }.kind(),
            "source_not_found"
        );
    }
}
