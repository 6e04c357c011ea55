//! Relay configuration.
//!
//! Defaults and environment overrides for every knob a relay fixes at
//! construction.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default values
pub mod defaults {
    /// Resend interval for an unacknowledged message, in milliseconds
    pub const RESEND_INTERVAL_MS: u64 = 1000;
    /// Max wait to place a message on the device bus, in milliseconds
    pub const HANDOFF_TIMEOUT_MS: u64 = 500;
    /// Max wait to place a report on the internal bus, in milliseconds
    pub const FORWARD_TIMEOUT_MS: u64 = 500;
    pub const DEDUP_CAPACITY: usize = 100;
    pub const OUTBOUND_CAPACITY: usize = 100;
    pub const INBOUND_CAPACITY: usize = 100;
    /// Depth of the relay actor's command queue
    pub const COMMAND_CAPACITY: usize = 64;
}

/// Environment variable names
pub mod env_vars {
    pub const RESEND_INTERVAL_MS: &str = "ITEMLINK_RESEND_INTERVAL_MS";
    pub const HANDOFF_TIMEOUT_MS: &str = "ITEMLINK_HANDOFF_TIMEOUT_MS";
    pub const FORWARD_TIMEOUT_MS: &str = "ITEMLINK_FORWARD_TIMEOUT_MS";
    pub const DEDUP_CAPACITY: &str = "ITEMLINK_DEDUP_CAPACITY";
    pub const OUTBOUND_CAPACITY: &str = "ITEMLINK_OUTBOUND_CAPACITY";
    pub const INBOUND_CAPACITY: &str = "ITEMLINK_INBOUND_CAPACITY";
    /// Emit JSON logs from the CLI
    pub const LOG_JSON: &str = "ITEMLINK_LOG_JSON";
}

/// Per-relay configuration, fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Minimum period between delivery attempts of the same message (ms)
    pub resend_interval_ms: u64,
    /// Bound on a single device bus handoff (ms)
    pub handoff_timeout_ms: u64,
    /// Bound on forwarding one report to the internal bus (ms)
    pub forward_timeout_ms: u64,
    /// Duplicate detector capacity
    pub dedup_capacity: usize,
    /// Outbound queue capacity
    pub outbound_capacity: usize,
    /// Inbound queue capacity
    pub inbound_capacity: usize,
    /// Actor command queue capacity
    pub command_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            resend_interval_ms: defaults::RESEND_INTERVAL_MS,
            handoff_timeout_ms: defaults::HANDOFF_TIMEOUT_MS,
            forward_timeout_ms: defaults::FORWARD_TIMEOUT_MS,
            dedup_capacity: defaults::DEDUP_CAPACITY,
            outbound_capacity: defaults::OUTBOUND_CAPACITY,
            inbound_capacity: defaults::INBOUND_CAPACITY,
            command_capacity: defaults::COMMAND_CAPACITY,
        }
    }
}

impl RelayConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overlaid with any `ITEMLINK_*` environment variables.
    ///
    /// Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(v) = env_value(env_vars::RESEND_INTERVAL_MS) {
            config.resend_interval_ms = v;
        }
        if let Some(v) = env_value(env_vars::HANDOFF_TIMEOUT_MS) {
            config.handoff_timeout_ms = v;
        }
        if let Some(v) = env_value(env_vars::FORWARD_TIMEOUT_MS) {
            config.forward_timeout_ms = v;
        }
        if let Some(v) = env_value(env_vars::DEDUP_CAPACITY) {
            config.dedup_capacity = v;
        }
        if let Some(v) = env_value(env_vars::OUTBOUND_CAPACITY) {
            config.outbound_capacity = v;
        }
        if let Some(v) = env_value(env_vars::INBOUND_CAPACITY) {
            config.inbound_capacity = v;
        }
        config
    }

    /// Durations are kept in whole milliseconds: anything below 1ms becomes
    /// zero (rejected by [`RelayConfig::validate`]) and values too large for
    /// a `u64` saturate.
    pub fn with_resend_interval(mut self, interval: Duration) -> Self {
        self.resend_interval_ms = whole_millis(interval);
        self
    }

    pub fn with_handoff_timeout(mut self, timeout: Duration) -> Self {
        self.handoff_timeout_ms = whole_millis(timeout);
        self
    }

    pub fn with_forward_timeout(mut self, timeout: Duration) -> Self {
        self.forward_timeout_ms = whole_millis(timeout);
        self
    }

    pub fn with_dedup_capacity(mut self, capacity: usize) -> Self {
        self.dedup_capacity = capacity;
        self
    }

    pub fn with_outbound_capacity(mut self, capacity: usize) -> Self {
        self.outbound_capacity = capacity;
        self
    }

    pub fn with_inbound_capacity(mut self, capacity: usize) -> Self {
        self.inbound_capacity = capacity;
        self
    }

    /// Get the resend interval as Duration
    pub fn resend_interval(&self) -> Duration {
        Duration::from_millis(self.resend_interval_ms)
    }

    /// Get the handoff timeout as Duration
    pub fn handoff_timeout(&self) -> Duration {
        Duration::from_millis(self.handoff_timeout_ms)
    }

    /// Get the forward timeout as Duration
    pub fn forward_timeout(&self) -> Duration {
        Duration::from_millis(self.forward_timeout_ms)
    }

    /// Reject zero durations and zero capacities.
    pub fn validate(&self) -> Result<()> {
        let durations = [
            ("resend_interval_ms", self.resend_interval_ms),
            ("handoff_timeout_ms", self.handoff_timeout_ms),
            ("forward_timeout_ms", self.forward_timeout_ms),
        ];
        for (name, value) in durations {
            if value == 0 {
                return Err(Error::InvalidConfiguration(format!("{} must be > 0", name)));
            }
        }

        let capacities = [
            ("dedup_capacity", self.dedup_capacity),
            ("outbound_capacity", self.outbound_capacity),
            ("inbound_capacity", self.inbound_capacity),
            ("command_capacity", self.command_capacity),
        ];
        for (name, value) in capacities {
            if value == 0 {
                return Err(Error::InvalidConfiguration(format!("{} must be > 0", name)));
            }
        }
        Ok(())
    }
}

fn whole_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn env_value<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring {}={:?}: not a valid number", name, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RelayConfig::default();
        assert_eq!(config.resend_interval(), Duration::from_millis(1000));
        assert_eq!(config.handoff_timeout(), Duration::from_millis(500));
        assert_eq!(config.outbound_capacity, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero() {
        let config = RelayConfig::default().with_dedup_capacity(0);
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidConfiguration(msg)) if msg.contains("dedup_capacity")
        ));

        let config = RelayConfig::default().with_resend_interval(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duration_setters_use_whole_millis() {
        let config = RelayConfig::default()
            .with_resend_interval(Duration::from_micros(1500))
            .with_handoff_timeout(Duration::MAX)
            .with_forward_timeout(Duration::from_micros(999));

        assert_eq!(config.resend_interval_ms, 1);
        assert_eq!(config.handoff_timeout_ms, u64::MAX);
        assert_eq!(config.forward_timeout_ms, 0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json() {
        let config: RelayConfig =
            serde_json::from_str(r#"{"resend_interval_ms": 250, "dedup_capacity": 8}"#).unwrap();
        assert_eq!(config.resend_interval_ms, 250);
        assert_eq!(config.dedup_capacity, 8);
        assert_eq!(config.handoff_timeout_ms, defaults::HANDOFF_TIMEOUT_MS);
    }

    #[test]
    fn test_from_env() {
        std::env::set_var(env_vars::DEDUP_CAPACITY, "7");
        std::env::set_var(env_vars::HANDOFF_TIMEOUT_MS, "not-a-number");
        let config = RelayConfig::from_env();
        std::env::remove_var(env_vars::DEDUP_CAPACITY);
        std::env::remove_var(env_vars::HANDOFF_TIMEOUT_MS);

        assert_eq!(config.dedup_capacity, 7);
        assert_eq!(config.handoff_timeout_ms, defaults::HANDOFF_TIMEOUT_MS);
    }
}
