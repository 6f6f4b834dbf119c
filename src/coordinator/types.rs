//! Fleet health types.
//!
//! Returned by [`FleetCoordinator::health_check()`](super::FleetCoordinator::health_check)
//! for monitoring endpoints. Built from cached registry state only; no
//! device is contacted.

use serde::Serialize;

/// Health of one registered device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceHealth {
    pub id: String,
    pub address: String,

    /// Has a connected handle.
    pub live: bool,

    /// Epoch milliseconds of the last discovery beacon.
    pub last_seen: u64,

    /// Reported display name, if any.
    pub name: Option<String>,

    /// A wicket metadata entry exists for `name`.
    ///
    /// Devices without one receive program commands unaugmented.
    pub has_metadata: bool,
}

/// Fleet-wide health snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FleetHealth {
    pub devices_total: usize,
    pub devices_live: usize,

    /// Live devices whose name is missing from the wicket table.
    pub devices_without_metadata: usize,

    pub wicket_entries: usize,
    pub exclusive_device_access: bool,
    pub devices: Vec<DeviceHealth>,

    /// At least one device can be operated on.
    pub ready: bool,
}

impl FleetHealth {
    /// Build from per-device entries.
    pub fn from_devices(devices: Vec<DeviceHealth>, wicket_entries: usize, exclusive_device_access: bool) -> Self {
        let devices_live = devices.iter().filter(|d| d.live).count();
        let devices_without_metadata = devices.iter().filter(|d| d.live && !d.has_metadata).count();
        Self {
            devices_total: devices.len(),
            devices_live,
            devices_without_metadata,
            wicket_entries,
            exclusive_device_access,
            devices,
            ready: devices_live > 0,
        }
    }
}
