//! Device registry and per-device operation locks.
//!
//! The registry maps a device id to its last known address, last-seen
//! timestamp and live [`DeviceHandle`]. Discovery owns the mutators
//! ([`upsert`](DeviceRegistry::upsert), [`mark_seen`](DeviceRegistry::mark_seen),
//! [`remove`](DeviceRegistry::remove)); orchestrators only read.
//!
//! The registry is an ordinary owned value injected into each orchestrator,
//! so tests build their own with fake handles.
//!
//! # Example
//!
//! ```rust
//! use pattern_sync::device::NoOpDevice;
//! use pattern_sync::registry::{DeviceEntry, DeviceRegistry};
//! use std::sync::Arc;
//!
//! let registry = DeviceRegistry::new();
//! registry.upsert(DeviceEntry::new("6619856", "192.168.1.40", Arc::new(NoOpDevice::named("Croquetia1"))));
//!
//! assert!(registry.resolve("6619856").is_some());
//! assert!(registry.resolve("missing").is_none());
//! ```

use crate::device::{DeviceHandle, DeviceProps};
use crate::metrics;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

/// One registered device.
#[derive(Clone)]
pub struct DeviceEntry {
    pub id: String,
    pub address: String,
    /// Epoch milliseconds of the last discovery beacon.
    pub last_seen: u64,
    handle: Option<Arc<dyn DeviceHandle>>,
}

impl std::fmt::Debug for DeviceEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceEntry")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("last_seen", &self.last_seen)
            .field("live", &self.handle.is_some())
            .finish()
    }
}

impl DeviceEntry {
    /// A device seen now with a live handle.
    pub fn new(id: impl Into<String>, address: impl Into<String>, handle: Arc<dyn DeviceHandle>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            last_seen: epoch_millis(),
            handle: Some(handle),
        }
    }

    /// A device seen now whose handle is not connected yet.
    pub fn without_handle(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            last_seen: epoch_millis(),
            handle: None,
        }
    }

    pub fn handle(&self) -> Option<&Arc<dyn DeviceHandle>> {
        self.handle.as_ref()
    }

    pub fn is_live(&self) -> bool {
        self.handle.is_some()
    }
}

/// Listing entry: registry data plus everything the device reports.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceSummary {
    pub id: String,
    pub address: String,
    #[serde(rename = "lastSeen")]
    pub last_seen: u64,
    #[serde(flatten)]
    pub props: Option<DeviceProps>,
}

/// Concurrent device-id → entry map.
#[derive(Default)]
pub struct DeviceRegistry {
    devices: DashMap<String, DeviceEntry>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an entry.
    pub fn upsert(&self, entry: DeviceEntry) {
        debug!(device_id = %entry.id, address = %entry.address, live = entry.is_live(), "Registering device");
        self.devices.insert(entry.id.clone(), entry);
        metrics::set_registered_devices(self.devices.len());
    }

    /// Refresh address and last-seen time of a known device.
    ///
    /// Returns `false` if the device is not registered.
    pub fn mark_seen(&self, id: &str, address: &str) -> bool {
        match self.devices.get_mut(id) {
            Some(mut entry) => {
                entry.address = address.to_string();
                entry.last_seen = epoch_millis();
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, id: &str) -> Option<DeviceEntry> {
        let removed = self.devices.remove(id).map(|(_, entry)| entry);
        metrics::set_registered_devices(self.devices.len());
        removed
    }

    pub fn get(&self, id: &str) -> Option<DeviceEntry> {
        self.devices.get(id).map(|r| r.value().clone())
    }

    /// Live handle for a device, if registered and connected.
    pub fn resolve(&self, id: &str) -> Option<Arc<dyn DeviceHandle>> {
        self.devices.get(id).and_then(|r| r.value().handle.clone())
    }

    /// All entries, ordered by id.
    pub fn all(&self) -> Vec<DeviceEntry> {
        let mut entries: Vec<DeviceEntry> = self.devices.iter().map(|r| r.value().clone()).collect();
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        entries
    }

    /// Every live handle with its device id, ordered by id.
    pub fn live_handles(&self) -> Vec<(String, Arc<dyn DeviceHandle>)> {
        self.all()
            .into_iter()
            .filter_map(|entry| entry.handle.map(|handle| (entry.id, handle)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Listing snapshot for the device overview.
    pub fn snapshot(&self) -> Vec<DeviceSummary> {
        self.all()
            .into_iter()
            .map(|entry| DeviceSummary {
                props: entry.handle.as_ref().map(|h| h.props()),
                id: entry.id,
                address: entry.address,
                last_seen: entry.last_seen,
            })
            .collect()
    }
}

// =============================================================================
// Per-device locks
// =============================================================================

/// Hands out one async mutex per device id.
///
/// [`lock_all`](Self::lock_all) acquires in sorted id order, so two
/// operations over overlapping device sets cannot deadlock. Entries nobody
/// holds or waits on are pruned on the next `lock_all`, so the map tracks
/// only ids currently in use.
pub struct DeviceLocks {
    enabled: bool,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl Default for DeviceLocks {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceLocks {
    pub fn new() -> Self {
        Self {
            enabled: true,
            locks: DashMap::new(),
        }
    }

    /// Locks that never block; operations on one device may interleave.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            locks: DashMap::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Ids with a lock entry.
    pub fn tracked(&self) -> usize {
        self.locks.len()
    }

    /// Lock every listed device (duplicates collapse).
    pub async fn lock_all<I, S>(&self, ids: I) -> DeviceGuards
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if !self.enabled {
            return DeviceGuards { guards: Vec::new() };
        }

        let mut ids: Vec<String> = ids.into_iter().map(|id| id.as_ref().to_string()).collect();
        ids.sort();
        ids.dedup();

        // Holders and waiters own a clone; a lone map reference is idle.
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);

        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            // Clone the Arc out so no map shard is held across the await.
            let lock = self.locks.entry(id).or_default().value().clone();
            guards.push(lock.lock_owned().await);
        }
        DeviceGuards { guards }
    }
}

/// Held device locks; released on drop.
pub struct DeviceGuards {
    guards: Vec<OwnedMutexGuard<()>>,
}

impl DeviceGuards {
    pub fn len(&self) -> usize {
        self.guards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }
}

fn epoch_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
