//! Resilience utilities: bounded retry, rate limiting, bulkheads.
//!
//! This module provides patterns to protect rate-fragile controllers:
//!
//! - [`RetryExecutor`]: Bounded retry with fixed delays for every device call
//! - [`RateLimiter`]: Optional token bucket applied to each call attempt
//! - [`Bulkhead`]: Semaphore bounding concurrent command fan-out
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), String> {
//! use pattern_sync::resilience::{RetryExecutor, RetryPolicy};
//!
//! let retry = RetryExecutor::new(RetryPolicy::device_default());
//! let value = retry
//!     .execute("getProgramBinary", "dev-1", || async { Ok::<_, String>(vec![1u8, 2, 3]) })
//!     .await?;
//! # let _ = value;
//! # Ok(())
//! # }
//! ```

use crate::device::DeviceResult;
use crate::error::FleetError;
use crate::metrics;
use governor::{
    clock::DefaultClock,
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovLimiter,
};
use std::future::Future;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, warn};

/// Retry budget for a single device call.
///
/// Every attempt is preceded by `initial_delay`. A failed attempt is
/// followed by `retry_delay` when attempts remain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt. Total attempts = `1 + max_retries`.
    pub max_retries: usize,

    /// Delay before each attempt, including the first.
    pub initial_delay: Duration,

    /// Additional delay after a failed attempt.
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::device_default()
    }
}

impl RetryPolicy {
    /// Budget used for every controller call: 5 retries, 50ms / 100ms.
    ///
    /// # Schedule (permanent failure)
    ///
    /// ```text
    /// Attempt  Wait before        Cumulative
    /// -------  -----------        ----------
    /// 1        50ms               50ms
    /// 2        100ms + 50ms       200ms
    /// 3        100ms + 50ms       350ms
    /// ...
    /// 6        100ms + 50ms       800ms, then fail
    /// ```
    pub fn device_default() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_millis(50),
            retry_delay: Duration::from_millis(100),
        }
    }

    /// Single attempt, no delays.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::ZERO,
            retry_delay: Duration::ZERO,
        }
    }

    /// Fast retry for tests.
    pub fn testing() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(1),
            retry_delay: Duration::from_millis(2),
        }
    }

    /// Total number of attempts this policy allows.
    pub fn total_attempts(&self) -> usize {
        self.max_retries.saturating_add(1)
    }

    /// Worst-case time spent waiting when every attempt fails.
    pub fn worst_case_delay(&self) -> Duration {
        let attempts = u32::try_from(self.total_attempts()).unwrap_or(u32::MAX);
        let retries = u32::try_from(self.max_retries).unwrap_or(u32::MAX);
        self.initial_delay
            .saturating_mul(attempts)
            .saturating_add(self.retry_delay.saturating_mul(retries))
    }
}

/// Runs fallible device calls under a [`RetryPolicy`].
///
/// Synchronous per call: attempts never overlap. On exhaustion the error
/// from the **last** attempt is returned; earlier errors are only logged.
/// The operation must be safe to re-issue.
#[derive(Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    limiter: Option<Arc<RateLimiter>>,
}

impl std::fmt::Debug for RetryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("policy", &self.policy)
            .field("rate_limited", &self.limiter.is_some())
            .finish()
    }
}

impl RetryExecutor {
    /// Create an executor without rate limiting.
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy, limiter: None }
    }

    /// Acquire a permit from `limiter` before every attempt.
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Execute `f` with bounded retry.
    ///
    /// `operation` and `device_id` only label logs and metrics.
    pub async fn execute<F, Fut, T, E>(&self, operation: &str, device_id: &str, mut f: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let max_attempts = self.policy.total_attempts();
        let mut attempt = 0usize;

        loop {
            attempt += 1;

            if !self.policy.initial_delay.is_zero() {
                tokio::time::sleep(self.policy.initial_delay).await;
            }
            if let Some(limiter) = &self.limiter {
                limiter.acquire().await;
            }

            match f().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(
                            operation,
                            device_id,
                            attempt,
                            "Device call succeeded after retry"
                        );
                    }
                    metrics::record_device_call(operation, "success");
                    return Ok(value);
                }
                Err(e) if attempt < max_attempts => {
                    warn!(
                        operation,
                        device_id,
                        attempt,
                        max_attempts,
                        delay_ms = self.policy.retry_delay.as_millis(),
                        error = %e,
                        "Device call failed, retrying"
                    );
                    metrics::record_device_retry(operation);
                    if !self.policy.retry_delay.is_zero() {
                        tokio::time::sleep(self.policy.retry_delay).await;
                    }
                }
                Err(e) => {
                    error!(
                        operation,
                        device_id,
                        attempts = attempt,
                        error = %e,
                        "Device call failed, retry budget exhausted"
                    );
                    metrics::record_device_call(operation, "exhausted");
                    return Err(e);
                }
            }
        }
    }

    /// Execute a device call; an exhausted budget becomes
    /// [`FleetError::DeviceOperationFailed`] carrying the last device error.
    pub async fn call<F, Fut, T>(&self, operation: &str, device_id: &str, f: F) -> crate::error::Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DeviceResult<T>>,
    {
        self.execute(operation, device_id, f)
            .await
            .map_err(|e| FleetError::device(device_id, operation, self.policy.total_attempts(), e))
    }
}

// =============================================================================
// Fleet call rate limit
// =============================================================================

/// Token bucket applied to every device call attempt, fleet-wide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Sustained attempts per second.
    pub per_sec: u32,
    /// Attempts allowed back to back after an idle period.
    pub burst: u32,
}

/// Shared limiter handed to every [`RetryExecutor`] of a coordinator.
pub struct RateLimiter {
    bucket: GovLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>,
    config: RateLimitConfig,
}

impl RateLimiter {
    /// Zero rates are clamped to one.
    pub fn new(config: RateLimitConfig) -> Self {
        let per_sec = NonZeroU32::new(config.per_sec).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(config.burst).unwrap_or(NonZeroU32::MIN);
        Self {
            bucket: GovLimiter::direct(Quota::per_second(per_sec).allow_burst(burst)),
            config,
        }
    }

    /// Wait for a token. Cancel-safe.
    pub async fn acquire(&self) {
        self.bucket.until_ready().await;
    }

    /// Take a token if one is available now.
    pub fn try_acquire(&self) -> bool {
        self.bucket.check().is_ok()
    }

    pub fn config(&self) -> RateLimitConfig {
        self.config
    }
}

// =============================================================================
// Dispatch bulkhead
// =============================================================================

/// Caps how many live commands are in flight at once.
///
/// Clones share the same slots.
#[derive(Debug, Clone)]
pub struct Bulkhead {
    slots: Arc<Semaphore>,
    capacity: usize,
}

impl Bulkhead {
    /// At least one slot, whatever `capacity` says.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait for a free slot; it is released when the permit drops.
    ///
    /// `None` only if the bulkhead was closed, which never happens while it
    /// is alive.
    pub async fn acquire(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.slots).acquire_owned().await.ok()
    }

    /// Commands currently holding a slot.
    pub fn in_flight(&self) -> usize {
        self.capacity - self.slots.available_permits()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
