//! Runtime configuration for the sync client.
//!
//! `SyncConfig` is plain data: front ends build it from defaults, a JSON file
//! or their own settings store, then hand it to [`crate::SyncClient`].

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const DEFAULT_BASE_DELAY_MS: u64 = 1_000;
const DEFAULT_MAX_DELAY_MS: u64 = 30_000;
const DEFAULT_MAX_RETRIES: u32 = 5;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_DRAIN_INTERVAL_MS: u64 = 30_000;
const DEFAULT_DEBOUNCE_MS: u64 = 50;
const DEFAULT_CACHE_QUOTA_BYTES: usize = 5 * 1024 * 1024;

/// Tunables for draining, retrying, caching and status delivery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    /// First retry delay after a failed drain
    pub base_delay_ms: u64,
    /// Upper bound for any retry delay
    pub max_delay_ms: u64,
    /// Consecutive failed drains before auto-retry stops
    pub max_retries: u32,
    /// Bound on each remote call
    pub request_timeout_ms: u64,
    /// Period of the background drain while work is queued
    pub drain_interval_ms: u64,
    /// Window in which status changes are coalesced into one emission
    pub debounce_ms: u64,
    /// Byte budget for the offline cache
    pub cache_quota_bytes: usize,
    /// Start a background drain right after an enqueue while online
    pub drain_on_enqueue: bool,
    pub quality: QualityThresholds,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            drain_interval_ms: DEFAULT_DRAIN_INTERVAL_MS,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            cache_quota_bytes: DEFAULT_CACHE_QUOTA_BYTES,
            drain_on_enqueue: true,
            quality: QualityThresholds::default(),
        }
    }
}

/// Boundaries between link quality classes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct QualityThresholds {
    pub excellent_rtt_ms: u64,
    pub good_rtt_ms: u64,
    pub excellent_downlink_mbps: f64,
    pub good_downlink_mbps: f64,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            excellent_rtt_ms: 100,
            good_rtt_ms: 300,
            excellent_downlink_mbps: 10.0,
            good_downlink_mbps: 1.5,
        }
    }
}

impl SyncConfig {
    pub const fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub const fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub const fn drain_interval(&self) -> Duration {
        Duration::from_millis(self.drain_interval_ms)
    }

    pub const fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Reject combinations that would disable timeouts or make backoff meaningless.
    pub fn validate(&self) -> Result<()> {
        if self.request_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "request_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.base_delay_ms == 0 {
            return Err(Error::InvalidConfig(
                "base_delay_ms must be greater than zero".to_string(),
            ));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(Error::InvalidConfig(format!(
                "max_delay_ms ({}) must not be below base_delay_ms ({})",
                self.max_delay_ms, self.base_delay_ms
            )));
        }
        if self.drain_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "drain_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.quality.good_rtt_ms < self.quality.excellent_rtt_ms {
            return Err(Error::InvalidConfig(
                "quality.good_rtt_ms must not be below quality.excellent_rtt_ms".to_string(),
            ));
        }
        Ok(())
    }

    /// Parse and validate a JSON payload.
    pub fn from_json(payload: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(payload)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file; a missing file yields the defaults.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = SyncConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.debounce(), Duration::from_millis(50));
    }

    #[test]
    fn from_json_fills_missing_fields_with_defaults() {
        let config = SyncConfig::from_json(r#"{"max_retries": 3, "base_delay_ms": 250}"#).unwrap();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.base_delay(), Duration::from_millis(250));
        assert_eq!(config.max_delay_ms, DEFAULT_MAX_DELAY_MS);
        assert!(config.drain_on_enqueue);
    }

    #[test]
    fn from_json_rejects_unknown_fields() {
        let error = SyncConfig::from_json(r#"{"max_retry": 3}"#).unwrap_err();
        assert!(error.to_string().contains("unknown field"));
    }

    #[test]
    fn validate_rejects_zero_timeout() {
        let config = SyncConfig {
            request_timeout_ms: 0,
            ..SyncConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn validate_rejects_inverted_delays() {
        let config = SyncConfig {
            base_delay_ms: 5_000,
            max_delay_ms: 1_000,
            ..SyncConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_from_missing_path_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = SyncConfig::load_from_path(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, SyncConfig::default());
    }
}
