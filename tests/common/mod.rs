//! Shared test utilities for integration, property and chaos tests.
//!
//! This module provides:
//! - A recording in-memory DeviceHandle
//! - Registry / coordinator setup helpers

pub mod mock_device;

pub use mock_device::*;

use pattern_sync::{DeviceEntry, DeviceRegistry, FleetConfig, FleetCoordinator};
use std::sync::Arc;

/// Register `devices` as live handles under their ids.
#[allow(dead_code)]
pub fn registry_with(devices: &[(&str, &Arc<MockDevice>)]) -> Arc<DeviceRegistry> {
    let registry = Arc::new(DeviceRegistry::new());
    for (id, device) in devices {
        let handle: Arc<MockDevice> = Arc::clone(device);
        registry.upsert(DeviceEntry::new(*id, format!("10.0.0.{}", registry.len() + 1), handle));
    }
    registry
}

/// Coordinator with millisecond delays over `devices`.
#[allow(dead_code)]
pub fn coordinator_with(devices: &[(&str, &Arc<MockDevice>)]) -> FleetCoordinator {
    FleetCoordinator::new(FleetConfig::for_testing(), registry_with(devices)).unwrap()
}

/// Let detached sends and reloads finish before asserting on device state.
#[allow(dead_code)]
pub async fn drain_background() {
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
}
