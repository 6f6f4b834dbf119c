//! Metrics for observability.
//!
//! Exports Prometheus-compatible metrics for:
//! - Device call outcomes and retries
//! - Reconciliation, export and dispatch operations
//! - Registry size
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `pattern_sync_` and follow Prometheus conventions:
//! - Counters end in `_total`
//! - Gauges represent current state
//! - Histograms track distributions (duration, size)
//!
//! The embedding process installs the recorder; without one these calls are no-ops.

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record the final outcome of a (possibly retried) device call.
pub fn record_device_call(operation: &str, outcome: &str) {
    counter!(
        "pattern_sync_device_calls_total",
        "operation" => operation.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record a failed attempt that will be retried.
pub fn record_device_retry(operation: &str) {
    counter!("pattern_sync_device_retries_total", "operation" => operation.to_string()).increment(1);
}

/// Record a completed or aborted reconciliation.
pub fn record_reconcile(outcome: &str, destinations: usize, duration: Duration) {
    counter!("pattern_sync_reconciles_total", "outcome" => outcome.to_string()).increment(1);
    histogram!("pattern_sync_reconcile_duration_seconds").record(duration.as_secs_f64());
    histogram!("pattern_sync_reconcile_destinations").record(destinations as f64);
}

/// Record programs removed from destinations.
pub fn record_programs_deleted(count: usize) {
    counter!("pattern_sync_programs_deleted_total").increment(count as u64);
}

/// Record programs pushed to destinations (one per destination write).
pub fn record_programs_pushed(count: usize) {
    counter!("pattern_sync_programs_pushed_total").increment(count as u64);
}

/// Record a completed or aborted export.
pub fn record_export(outcome: &str, entries: usize, bytes: usize, duration: Duration) {
    counter!("pattern_sync_exports_total", "outcome" => outcome.to_string()).increment(1);
    if entries > 0 {
        counter!("pattern_sync_export_entries_total").increment(entries as u64);
        counter!("pattern_sync_export_bytes_total").increment(bytes as u64);
    }
    histogram!("pattern_sync_export_duration_seconds").record(duration.as_secs_f64());
}

/// Record a dispatch fan-out.
pub fn record_dispatch(dispatched: usize, skipped: usize, augmented: usize) {
    counter!("pattern_sync_dispatches_total").increment(1);
    counter!("pattern_sync_dispatch_targets_total", "result" => "dispatched").increment(dispatched as u64);
    if skipped > 0 {
        counter!("pattern_sync_dispatch_targets_total", "result" => "skipped").increment(skipped as u64);
    }
    if augmented > 0 {
        counter!("pattern_sync_dispatch_augmented_total").increment(augmented as u64);
    }
}

/// Record a detached command send that failed.
pub fn record_dispatch_failure() {
    counter!("pattern_sync_dispatch_failures_total").increment(1);
}

/// Record a target with no positional metadata.
///
/// `reason` is `unnamed` (device reports no name) or `unknown_name`.
pub fn record_metadata_miss(reason: &'static str) {
    counter!("pattern_sync_metadata_misses_total", "reason" => reason).increment(1);
}

/// Record a best-effort notification round.
pub fn record_notification(kind: &str, issued: usize, failed: usize) {
    counter!("pattern_sync_notifications_total", "kind" => kind.to_string()).increment(issued as u64);
    if failed > 0 {
        counter!("pattern_sync_notification_failures_total", "kind" => kind.to_string()).increment(failed as u64);
    }
}

/// Record how long a settle strategy waited.
pub fn record_settle(strategy: &str, waited: Duration, timed_out: bool) {
    histogram!("pattern_sync_settle_duration_seconds", "strategy" => strategy.to_string())
        .record(waited.as_secs_f64());
    if timed_out {
        counter!("pattern_sync_settle_timeouts_total", "strategy" => strategy.to_string()).increment(1);
    }
}

/// Gauge for number of registered devices.
pub fn set_registered_devices(count: usize) {
    gauge!("pattern_sync_registered_devices").set(count as f64);
}

/// Record errors by kind.
pub fn record_error(operation: &str, kind: &str) {
    counter!(
        "pattern_sync_errors_total",
        "operation" => operation.to_string(),
        "kind" => kind.to_string()
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    // Without an installed recorder every call must be a silent no-op.
    #[test]
    fn test_metrics_without_recorder_do_not_panic() {
        record_device_call("getProgramBinary", "success");
        record_device_retry("putProgramBinary");
        record_reconcile("success", 3, Duration::from_millis(120));
        record_programs_deleted(2);
        record_programs_pushed(9);
        record_export("success", 4, 2048, Duration::from_millis(80));
        record_export("failure", 0, 0, Duration::from_millis(5));
        record_dispatch(3, 1, 2);
        record_dispatch_failure();
        record_metadata_miss("unknown_name");
        record_notification("reload", 3, 1);
        record_settle("fixed", Duration::from_millis(250), false);
        set_registered_devices(11);
        record_error("reconcile", "source_not_found");
    }
}
