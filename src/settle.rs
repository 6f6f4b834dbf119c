//! Wait-for-consistency after asking devices to reload.
//!
//! A controller refreshes its program list asynchronously and never signals
//! completion, so every orchestrator that calls `reload` must wait before
//! reading `programList`. Two strategies are available:
//!
//! | Strategy | Behavior |
//! |----------|----------|
//! | [`FixedDelay`] | Sleep a configured duration (default 250ms) |
//! | [`PollUntilStable`] | Sleep `min_wait`, then poll program lists until two consecutive reads agree or `timeout` elapses |
//!
//! Both are heuristics. A slow device can still be read mid-refresh; a
//! timeout is logged and the operation proceeds with the latest snapshot.

use crate::config::{SettleConfig, SettleKind};
use crate::device::{DeviceHandle, ProgramId};
use crate::metrics;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// What a settle round observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettleOutcome {
    pub waited: Duration,
    pub polls: usize,
    pub timed_out: bool,
}

/// Boxed settle future.
pub type SettleFuture<'a> = Pin<Box<dyn Future<Output = SettleOutcome> + Send + 'a>>;

/// Decides when freshly reloaded devices may be read.
pub trait SettleStrategy: Send + Sync {
    /// Short label for logs and metrics.
    fn name(&self) -> &'static str;

    /// Wait until `devices` are considered consistent. Never fails.
    fn settle<'a>(&'a self, devices: &'a [Arc<dyn DeviceHandle>]) -> SettleFuture<'a>;
}

/// Build the configured strategy.
pub fn from_config(config: &SettleConfig) -> Arc<dyn SettleStrategy> {
    match config.strategy {
        SettleKind::Fixed => Arc::new(FixedDelay::new(config.delay_duration())),
        SettleKind::Poll => Arc::new(PollUntilStable::new(
            config.delay_duration(),
            config.poll_interval_duration(),
            config.timeout_duration(),
        )),
    }
}

/// Sleep for a fixed duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedDelay {
    pub delay: Duration,
}

impl FixedDelay {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Default for FixedDelay {
    fn default() -> Self {
        Self::new(Duration::from_millis(250))
    }
}

impl SettleStrategy for FixedDelay {
    fn name(&self) -> &'static str {
        "fixed"
    }

    fn settle<'a>(&'a self, _devices: &'a [Arc<dyn DeviceHandle>]) -> SettleFuture<'a> {
        Box::pin(async move {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            metrics::record_settle(self.name(), self.delay, false);
            SettleOutcome {
                waited: self.delay,
                polls: 0,
                timed_out: false,
            }
        })
    }
}

/// Shortest gap between two polls.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Poll reported program lists until they stop changing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollUntilStable {
    min_wait: Duration,
    interval: Duration,
    timeout: Duration,
}

impl PollUntilStable {
    /// `min_wait` is slept unconditionally before the first read; `timeout`
    /// bounds polling after it. `interval` is raised to [`MIN_POLL_INTERVAL`].
    pub fn new(min_wait: Duration, interval: Duration, timeout: Duration) -> Self {
        Self {
            min_wait,
            interval: interval.max(MIN_POLL_INTERVAL),
            timeout,
        }
    }

    pub fn min_wait(&self) -> Duration {
        self.min_wait
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl SettleStrategy for PollUntilStable {
    fn name(&self) -> &'static str {
        "poll"
    }

    fn settle<'a>(&'a self, devices: &'a [Arc<dyn DeviceHandle>]) -> SettleFuture<'a> {
        Box::pin(async move {
            let start = Instant::now();
            if !self.min_wait.is_zero() {
                tokio::time::sleep(self.min_wait).await;
            }

            let poll_start = Instant::now();
            let mut previous = program_lists(devices);
            let mut polls = 0usize;
            let mut timed_out = false;

            loop {
                if poll_start.elapsed() >= self.timeout {
                    timed_out = true;
                    break;
                }
                tokio::time::sleep(self.interval).await;
                polls += 1;

                let current = program_lists(devices);
                if current == previous {
                    break;
                }
                previous = current;
            }

            let waited = start.elapsed();
            if timed_out {
                warn!(
                    devices = devices.len(),
                    polls,
                    waited_ms = waited.as_millis(),
                    "Program lists still changing at settle timeout, proceeding with latest snapshot"
                );
            } else {
                debug!(devices = devices.len(), polls, waited_ms = waited.as_millis(), "Program lists settled");
            }
            metrics::record_settle(self.name(), waited, timed_out);

            SettleOutcome {
                waited,
                polls,
                timed_out,
            }
        })
    }
}

fn program_lists(devices: &[Arc<dyn DeviceHandle>]) -> Vec<Vec<ProgramId>> {
    devices.iter().map(|d| d.props().program_ids()).collect()
}
