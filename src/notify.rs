//! Best-effort notifications.
//!
//! Some device calls are issued after an operation's outcome is already
//! decided: the trailing reload after a reconciliation, and a fleet-wide
//! reload. Failures there are logged and counted, never returned. Callers
//! that need a guarantee must use [`RetryExecutor`](crate::resilience::RetryExecutor)
//! instead.

use crate::device::DeviceHandle;
use crate::metrics;
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Outcome of a best-effort reload round.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReloadReport {
    /// Reload requests sent.
    pub issued: usize,
    /// Ids whose reload request failed.
    pub failed: Vec<String>,
}

impl ReloadReport {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Ask every device to reload, concurrently, without retry.
pub async fn notify_reload(devices: &[(String, Arc<dyn DeviceHandle>)]) -> ReloadReport {
    let results = join_all(devices.iter().map(|(id, handle)| async move {
        let result = handle.reload().await;
        (id, result)
    }))
    .await;

    let mut failed = Vec::new();
    for (id, result) in results {
        if let Err(e) = result {
            warn!(device_id = %id, error = %e, "Best-effort reload failed, ignoring");
            failed.push(id.clone());
        }
    }

    debug!(issued = devices.len(), failed = failed.len(), "Reload notifications issued");
    metrics::record_notification("reload", devices.len(), failed.len());

    ReloadReport {
        issued: devices.len(),
        failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{BinaryKind, BoxFuture, Command, DeviceError, DeviceProps, NoOpDevice};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct BrokenDevice {
        reloads: AtomicUsize,
    }

    impl DeviceHandle for BrokenDevice {
        fn props(&self) -> DeviceProps {
            DeviceProps::default()
        }

        fn reload(&self) -> BoxFuture<'_, ()> {
            self.reloads.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Err(DeviceError::new("socket closed")) })
        }

        fn get_program_binary<'a>(&'a self, _id: &'a str, _kind: BinaryKind) -> BoxFuture<'a, Vec<u8>> {
            Box::pin(async { Err(DeviceError::new("socket closed")) })
        }

        fn put_program_binary<'a>(&'a self, _id: &'a str, _data: &'a [u8]) -> BoxFuture<'a, ()> {
            Box::pin(async { Err(DeviceError::new("socket closed")) })
        }

        fn delete_program<'a>(&'a self, _id: &'a str) -> BoxFuture<'a, ()> {
            Box::pin(async { Err(DeviceError::new("socket closed")) })
        }

        fn set_command(&self, _command: Command) -> BoxFuture<'_, ()> {
            Box::pin(async { Err(DeviceError::new("socket closed")) })
        }
    }

    #[tokio::test]
    async fn test_notify_reload_swallows_failures() {
        let broken = Arc::new(BrokenDevice {
            reloads: AtomicUsize::new(0),
        });
        let devices: Vec<(String, Arc<dyn DeviceHandle>)> = vec![
            ("ok".to_string(), Arc::new(NoOpDevice::named("ok"))),
            ("broken".to_string(), broken.clone()),
        ];

        let report = notify_reload(&devices).await;

        assert_eq!(report.issued, 2);
        assert_eq!(report.failed, vec!["broken".to_string()]);
        assert!(!report.all_succeeded());
        assert_eq!(broken.reloads.load(Ordering::SeqCst), 1, "no retry");
    }

    #[tokio::test]
    async fn test_notify_reload_empty() {
        let report = notify_reload(&[]).await;
        assert_eq!(report, ReloadReport::default());
        assert!(report.all_succeeded());
    }
}
