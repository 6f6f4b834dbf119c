//! Configuration for fleet orchestration.
//!
//! Configuration is passed to [`FleetCoordinator::new()`](crate::FleetCoordinator::new)
//! and can be constructed programmatically or deserialized from JSON.
//!
//! # Quick Start
//!
//! ```rust
//! use pattern_sync::config::{FleetConfig, SettleKind};
//!
//! let mut config = FleetConfig::default();
//! config.settle.strategy = SettleKind::Poll;
//! config.dispatch.max_concurrent = 4;
//! ```
//!
//! # Configuration Structure
//!
//! ```text
//! FleetConfig
//! ├── retry: RetrySettings          # Budget for every device call
//! ├── settle: SettleConfig          # Wait after asking devices to reload
//! ├── dispatch: DispatchConfig      # Command fan-out concurrency
//! ├── export: ExportConfig          # Archive entry/archive naming
//! ├── rate_limit: RateLimitSettings # Optional token bucket per orchestrator
//! └── exclusive_device_access: bool # Per-device operation lock
//! ```
//!
//! # JSON Example
//!
//! ```json
//! {
//!   "retry": { "max_retries": 5, "initial_delay": "50ms", "retry_delay": "100ms" },
//!   "settle": { "strategy": "fixed", "delay": "250ms" },
//!   "dispatch": { "max_concurrent": 16 },
//!   "export": { "controls_suffix": ".c", "archive_prefix": "Pixelblaze_" }
//! }
//! ```

use crate::error::{FleetError, Result};
use crate::resilience::{RateLimitConfig, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// ═══════════════════════════════════════════════════════════════════════════════
// Top-level config
// ═══════════════════════════════════════════════════════════════════════════════

/// The top-level config object passed to `FleetCoordinator::new()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub settle: SettleConfig,

    #[serde(default)]
    pub dispatch: DispatchConfig,

    #[serde(default)]
    pub export: ExportConfig,

    #[serde(default)]
    pub rate_limit: RateLimitSettings,

    /// Serialize reconciliation/export on the devices they touch.
    /// When `false`, concurrent operations on one device may interleave.
    #[serde(default = "default_true")]
    pub exclusive_device_access: bool,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            retry: RetrySettings::default(),
            settle: SettleConfig::default(),
            dispatch: DispatchConfig::default(),
            export: ExportConfig::default(),
            rate_limit: RateLimitSettings::default(),
            exclusive_device_access: true,
        }
    }
}

impl FleetConfig {
    /// Millisecond delays for tests.
    pub fn for_testing() -> Self {
        Self {
            retry: RetrySettings {
                max_retries: 3,
                initial_delay: "1ms".to_string(),
                retry_delay: "2ms".to_string(),
            },
            settle: SettleConfig {
                delay: "1ms".to_string(),
                poll_interval: "1ms".to_string(),
                timeout: "50ms".to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| FleetError::Config(format!("invalid JSON config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON config file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| FleetError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_json_str(&raw)
    }

    /// Reject values the accessors would otherwise silently replace.
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("retry.initial_delay", &self.retry.initial_delay),
            ("retry.retry_delay", &self.retry.retry_delay),
            ("settle.delay", &self.settle.delay),
            ("settle.poll_interval", &self.settle.poll_interval),
            ("settle.timeout", &self.settle.timeout),
        ] {
            humantime::parse_duration(value)
                .map_err(|e| FleetError::Config(format!("{}: {:?} is not a duration: {}", field, value, e)))?;
        }

        if self.dispatch.max_concurrent == 0 {
            return Err(FleetError::Config("dispatch.max_concurrent must be at least 1".into()));
        }
        if self.export.controls_suffix.is_empty() {
            return Err(FleetError::Config("export.controls_suffix must not be empty".into()));
        }
        if self.settle.strategy == SettleKind::Poll && self.settle.poll_interval_duration().is_zero() {
            return Err(FleetError::Config("settle.poll_interval must be non-zero".into()));
        }
        if self.rate_limit.enabled && (self.rate_limit.per_sec == 0 || self.rate_limit.burst == 0) {
            return Err(FleetError::Config("rate_limit.per_sec and rate_limit.burst must be non-zero".into()));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RetrySettings
// ═══════════════════════════════════════════════════════════════════════════════

/// Retry budget for device calls, as configured.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Delay before every attempt, e.g. "50ms".
    #[serde(default = "default_initial_delay")]
    pub initial_delay: String,

    /// Extra delay after a failed attempt, e.g. "100ms".
    #[serde(default = "default_retry_delay")]
    pub retry_delay: String,
}

fn default_max_retries() -> usize {
    5
}

fn default_initial_delay() -> String {
    "50ms".to_string()
}

fn default_retry_delay() -> String {
    "100ms".to_string()
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay: "50ms".to_string(),
            retry_delay: "100ms".to_string(),
        }
    }
}

impl RetrySettings {
    /// Build the policy, falling back to the device defaults on unparsable durations.
    pub fn policy(&self) -> RetryPolicy {
        let defaults = RetryPolicy::device_default();
        RetryPolicy {
            max_retries: self.max_retries,
            initial_delay: parse_duration_or(&self.initial_delay, defaults.initial_delay),
            retry_delay: parse_duration_or(&self.retry_delay, defaults.retry_delay),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SettleConfig
// ═══════════════════════════════════════════════════════════════════════════════

/// Which wait-for-consistency strategy to use after a reload request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettleKind {
    /// Sleep for `delay`.
    Fixed,
    /// Wait `delay`, then poll program lists until stable or `timeout`.
    Poll,
}

/// Settle behavior after asking devices to refresh their program lists.
///
/// Device refresh is asynchronous with no completion signal, so any
/// setting here is a heuristic. Slow devices may need a longer delay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettleConfig {
    #[serde(default = "default_settle_kind")]
    pub strategy: SettleKind,

    /// Fixed wait (or minimum wait when polling).
    #[serde(default = "default_settle_delay")]
    pub delay: String,

    #[serde(default = "default_poll_interval")]
    pub poll_interval: String,

    /// Upper bound on polling.
    #[serde(default = "default_settle_timeout")]
    pub timeout: String,
}

fn default_settle_kind() -> SettleKind {
    SettleKind::Fixed
}

fn default_settle_delay() -> String {
    "250ms".to_string()
}

fn default_poll_interval() -> String {
    "50ms".to_string()
}

fn default_settle_timeout() -> String {
    "2s".to_string()
}

impl Default for SettleConfig {
    fn default() -> Self {
        Self {
            strategy: SettleKind::Fixed,
            delay: "250ms".to_string(),
            poll_interval: "50ms".to_string(),
            timeout: "2s".to_string(),
        }
    }
}

impl SettleConfig {
    pub fn delay_duration(&self) -> Duration {
        parse_duration_or(&self.delay, Duration::from_millis(250))
    }

    pub fn poll_interval_duration(&self) -> Duration {
        parse_duration_or(&self.poll_interval, Duration::from_millis(50))
    }

    pub fn timeout_duration(&self) -> Duration {
        parse_duration_or(&self.timeout, Duration::from_secs(2))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DispatchConfig / ExportConfig / RateLimitSettings
// ═══════════════════════════════════════════════════════════════════════════════

/// Command fan-out settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Maximum commands in flight at once.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

fn default_max_concurrent() -> usize {
    16
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self { max_concurrent: 16 }
    }
}

/// Export naming settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Appended to a program id to name its controls entry.
    #[serde(default = "default_controls_suffix")]
    pub controls_suffix: String,

    /// Archive name prefix for devices without a display name.
    #[serde(default = "default_archive_prefix")]
    pub archive_prefix: String,
}

fn default_controls_suffix() -> String {
    ".c".to_string()
}

fn default_archive_prefix() -> String {
    "Pixelblaze_".to_string()
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            controls_suffix: ".c".to_string(),
            archive_prefix: "Pixelblaze_".to_string(),
        }
    }
}

/// Optional rate limit on device call attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    #[serde(default = "default_false")]
    pub enabled: bool,

    /// Sustained calls per second.
    #[serde(default = "default_rate_limit_per_sec")]
    pub per_sec: u32,

    #[serde(default = "default_rate_limit_burst")]
    pub burst: u32,
}

fn default_rate_limit_per_sec() -> u32 {
    20
}

fn default_rate_limit_burst() -> u32 {
    10
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            per_sec: 20,
            burst: 10,
        }
    }
}

impl RateLimitSettings {
    /// Returns `None` if rate limiting is disabled.
    pub fn rate_limit_config(&self) -> Option<RateLimitConfig> {
        if self.enabled {
            Some(RateLimitConfig {
                per_sec: self.per_sec,
                burst: self.burst,
            })
        } else {
            None
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_false() -> bool {
    false
}

fn parse_duration_or(value: &str, fallback: Duration) -> Duration {
    humantime::parse_duration(value).unwrap_or(fallback)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = FleetConfig::default();
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.settle.strategy, SettleKind::Fixed);
        assert_eq!(config.settle.delay_duration(), Duration::from_millis(250));
        assert_eq!(config.dispatch.max_concurrent, 16);
        assert_eq!(config.export.controls_suffix, ".c");
        assert_eq!(config.export.archive_prefix, "Pixelblaze_");
        assert!(!config.rate_limit.enabled);
        assert!(config.exclusive_device_access);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_retry_policy_from_settings() {
        let policy = RetrySettings::default().policy();
        assert_eq!(policy, RetryPolicy::device_default());
    }

    #[test]
    fn test_retry_policy_invalid_duration_fallback() {
        let settings = RetrySettings {
            max_retries: 2,
            initial_delay: "soon".to_string(),
            retry_delay: "1s".to_string(),
        };
        let policy = settings.policy();
        assert_eq!(policy.max_retries, 2);
        assert_eq!(policy.initial_delay, Duration::from_millis(50));
        assert_eq!(policy.retry_delay, Duration::from_secs(1));
    }

    #[test]
    fn test_settle_durations_various_formats() {
        let test_cases = [
            ("250ms", Duration::from_millis(250)),
            ("1s", Duration::from_secs(1)),
            ("2min", Duration::from_secs(120)),
        ];

        for (input, expected) in test_cases {
            let config = SettleConfig {
                delay: input.to_string(),
                ..Default::default()
            };
            assert_eq!(config.delay_duration(), expected, "Failed for input: {}", input);
        }
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = FleetConfig::from_json_str(r#"{"settle": {"strategy": "poll"}}"#).unwrap();
        assert_eq!(config.settle.strategy, SettleKind::Poll);
        assert_eq!(config.settle.delay, "250ms");
        assert_eq!(config.retry.max_retries, 5);
        assert!(config.exclusive_device_access);
    }

    #[test]
    fn test_empty_json_object() {
        let config = FleetConfig::from_json_str("{}").unwrap();
        assert_eq!(config.dispatch.max_concurrent, 16);
    }

    #[test]
    fn test_invalid_json_is_config_error() {
        let err = FleetConfig::from_json_str("{not json").unwrap_err();
        assert!(matches!(err, FleetError::Config(_)));
    }

    #[test]
    fn test_validate_rejects_bad_duration() {
        let err = FleetConfig::from_json_str(r#"{"retry": {"retry_delay": "later"}}"#).unwrap_err();
        assert!(err.to_string().contains("retry.retry_delay"));
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let mut config = FleetConfig::default();
        config.dispatch.max_concurrent = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_controls_suffix() {
        let mut config = FleetConfig::default();
        config.export.controls_suffix.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_rate_limit() {
        let mut config = FleetConfig::default();
        config.rate_limit.enabled = true;
        config.rate_limit.per_sec = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rate_limit_config() {
        let mut settings = RateLimitSettings::default();
        assert!(settings.rate_limit_config().is_none());

        settings.enabled = true;
        settings.per_sec = 5;
        settings.burst = 2;
        let limit = settings.rate_limit_config().unwrap();
        assert_eq!(limit.per_sec, 5);
        assert_eq!(limit.burst, 2);
    }

    #[test]
    fn test_for_testing_config() {
        let config = FleetConfig::for_testing();
        assert_eq!(config.retry.policy().initial_delay, Duration::from_millis(1));
        assert_eq!(config.settle.delay_duration(), Duration::from_millis(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"dispatch": {{"max_concurrent": 3}}, "exclusive_device_access": false}}"#).unwrap();

        let config = FleetConfig::from_path(file.path()).unwrap();
        assert_eq!(config.dispatch.max_concurrent, 3);
        assert!(!config.exclusive_device_access);
    }

    #[test]
    fn test_from_missing_path() {
        let dir = tempfile::tempdir().unwrap();
        let err = FleetConfig::from_path(dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, FleetError::Config(_)));
    }

    #[test]
    fn test_config_json_roundtrip() {
        let mut config = FleetConfig::default();
        config.settle.strategy = SettleKind::Poll;
        config.export.archive_prefix = "Wicket_".to_string();

        let json = serde_json::to_string(&config).unwrap();
        let parsed = FleetConfig::from_json_str(&json).unwrap();
        assert_eq!(parsed.settle.strategy, SettleKind::Poll);
        assert_eq!(parsed.export.archive_prefix, "Wicket_");
    }
}
