// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Device handle seam.
//!
//! Defines the capability set the orchestrators need from a single
//! lighting controller. The wire protocol lives behind this trait; the
//! discovery layer registers one handle per device in the
//! [`DeviceRegistry`](crate::registry::DeviceRegistry).
//!
//! # Example
//!
//! ```rust,no_run
//! use pattern_sync::device::{BinaryKind, BoxFuture, Command, DeviceHandle, DeviceProps};
//!
//! struct MyController { /* ... */ }
//!
//! impl DeviceHandle for MyController {
//!     fn props(&self) -> DeviceProps {
//!         DeviceProps::default()
//!     }
//!
//!     fn reload(&self) -> BoxFuture<'_, ()> {
//!         Box::pin(async move { Ok(()) })
//!     }
//!
//!     fn get_program_binary<'a>(&'a self, _id: &'a str, _kind: BinaryKind) -> BoxFuture<'a, Vec<u8>> {
//!         Box::pin(async move { Ok(Vec::new()) })
//!     }
//!
//!     fn put_program_binary<'a>(&'a self, _id: &'a str, _data: &'a [u8]) -> BoxFuture<'a, ()> {
//!         Box::pin(async move { Ok(()) })
//!     }
//!
//!     fn delete_program<'a>(&'a self, _id: &'a str) -> BoxFuture<'a, ()> {
//!         Box::pin(async move { Ok(()) })
//!     }
//!
//!     fn set_command(&self, _command: Command) -> BoxFuture<'_, ()> {
//!         Box::pin(async move { Ok(()) })
//!     }
//! }
//! ```

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::future::Future;
use std::pin::Pin;

/// Result type for device calls.
pub type DeviceResult<T> = std::result::Result<T, DeviceError>;

/// Type alias for boxed async device calls (keeps the trait object safe).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = DeviceResult<T>> + Send + 'a>>;

/// A live command: option name to value.
pub type Command = Map<String, Value>;

/// Simplified error for device calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceError(pub String);

impl DeviceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl std::fmt::Display for DeviceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for DeviceError {}

/// Opaque program identifier.
///
/// Controllers report ids as strings, but numeric ids are accepted when
/// deserializing and stored in their decimal form. Equality is exact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ProgramId(String);

impl ProgramId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProgramId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProgramId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ProgramId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl<'de> Deserialize<'de> for ProgramId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::String(s) => Ok(Self(s)),
            Value::Number(n) => Ok(Self(n.to_string())),
            other => Err(serde::de::Error::custom(format!(
                "program id must be a string or number, got {}",
                other
            ))),
        }
    }
}

/// One entry of a device's program list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramEntry {
    pub id: ProgramId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ProgramEntry {
    pub fn new(id: impl Into<ProgramId>) -> Self {
        Self { id: id.into(), name: None }
    }

    pub fn named(id: impl Into<ProgramId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: Some(name.into()),
        }
    }
}

/// Read-only snapshot of what a device reports about itself.
///
/// Unknown properties are kept in `extra` so device listings can pass them
/// through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceProps {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(rename = "programList", default)]
    pub program_list: Vec<ProgramEntry>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DeviceProps {
    /// Program ids in reported order.
    pub fn program_ids(&self) -> Vec<ProgramId> {
        self.program_list.iter().map(|p| p.id.clone()).collect()
    }

    /// Display name, treating an empty name as absent.
    pub fn display_name(&self) -> Option<&str> {
        self.name.as_deref().filter(|n| !n.is_empty())
    }
}

/// Which binary blob of a program to address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryKind {
    /// The compiled pattern itself.
    Program,
    /// The secondary "controls" blob (saved UI control values).
    Controls,
}

impl BinaryKind {
    /// Subtype extension understood by the controller.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Program => "",
            Self::Controls => ".c",
        }
    }
}

/// Capability set of a single lighting controller.
///
/// All calls may fail transiently; callers wrap them in
/// [`RetryExecutor`](crate::resilience::RetryExecutor).
pub trait DeviceHandle: Send + Sync + 'static {
    /// Snapshot of the most recently reported properties.
    fn props(&self) -> DeviceProps;

    /// Ask the device to refresh its reported program list.
    ///
    /// Completion of the refresh itself is not signalled.
    fn reload(&self) -> BoxFuture<'_, ()>;

    /// Fetch a program blob. Returns an empty blob if absent.
    fn get_program_binary<'a>(&'a self, id: &'a str, kind: BinaryKind) -> BoxFuture<'a, Vec<u8>>;

    /// Write or overwrite a program's binary content.
    fn put_program_binary<'a>(&'a self, id: &'a str, data: &'a [u8]) -> BoxFuture<'a, ()>;

    /// Remove a program from the device.
    fn delete_program<'a>(&'a self, id: &'a str) -> BoxFuture<'a, ()>;

    /// Issue a live command / state change.
    fn set_command(&self, command: Command) -> BoxFuture<'_, ()>;
}

/// A no-op device for standalone wiring.
///
/// Logs operations, stores nothing, reports an empty program list.
#[derive(Debug, Clone, Default)]
pub struct NoOpDevice {
    props: DeviceProps,
}

impl NoOpDevice {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            props: DeviceProps {
                name: Some(name.into()),
                ..Default::default()
            },
        }
    }
}

impl DeviceHandle for NoOpDevice {
    fn props(&self) -> DeviceProps {
        self.props.clone()
    }

    fn reload(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            tracing::debug!(name = ?self.props.name, "NoOp: would reload program list");
            Ok(())
        })
    }

    fn get_program_binary<'a>(&'a self, id: &'a str, kind: BinaryKind) -> BoxFuture<'a, Vec<u8>> {
        Box::pin(async move {
            tracing::trace!(program_id = %id, ext = kind.extension(), "NoOp: get program binary");
            Ok(Vec::new())
        })
    }

    fn put_program_binary<'a>(&'a self, id: &'a str, data: &'a [u8]) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            tracing::debug!(program_id = %id, len = data.len(), "NoOp: would put program binary");
            Ok(())
        })
    }

    fn delete_program<'a>(&'a self, id: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            tracing::debug!(program_id = %id, "NoOp: would delete program");
            Ok(())
        })
    }

    fn set_command(&self, command: Command) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            tracing::debug!(keys = command.len(), "NoOp: would set command");
            Ok(())
        })
    }
}
