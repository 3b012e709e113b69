//! Network status model

use serde::{Deserialize, Serialize};

/// Coarse link quality; a UI and retry-aggressiveness hint only
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkQuality {
    Excellent,
    #[default]
    Good,
    Poor,
}

/// Last known connectivity state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkStatus {
    pub is_online: bool,
    pub quality: NetworkQuality,
    /// Measured round-trip time, if any
    pub rtt_ms: Option<u64>,
    /// Reported downlink speed, if any
    pub downlink_mbps: Option<f64>,
    /// When this state was sampled (Unix ms)
    pub checked_at: i64,
}

impl NetworkStatus {
    /// Assumed state when the platform exposes no connectivity API
    pub fn optimistic() -> Self {
        Self {
            is_online: true,
            quality: NetworkQuality::Good,
            rtt_ms: None,
            downlink_mbps: None,
            checked_at: crate::util::unix_millis_now(),
        }
    }

    /// Whether a listener should hear about the move from `previous` to `self`
    pub fn differs_observably(&self, previous: &Self) -> bool {
        self.is_online != previous.is_online || self.quality != previous.quality
    }
}

impl Default for NetworkStatus {
    fn default() -> Self {
        Self::optimistic()
    }
}
