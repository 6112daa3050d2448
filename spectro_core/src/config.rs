//! Runtime configuration for the session and acquisition engine.
//!
//! These are separate from the TOML-deserialized structs in `spectro_config`;
//! see `conversions` for the mapping.

use std::time::Duration;

use crate::eeprom::EepromProtocol;
use crate::laser::TransportCompatibilityMode;
use crate::params::{AcquisitionMode, LenientMode};

/// Packet-loop retry bound and backoff schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Acquisition fails once this many consecutive packet failures occur.
    pub max_retries: u32,
    /// Backoff is `backoff_base_ms ^ retries` from the second retry on.
    pub backoff_base_ms: u64,
    /// First retry waits `integration_time_ms × throwaway_multiplier` so a
    /// powered-down sensor can flush throwaway frames.
    pub throwaway_multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff_base_ms: 5,
            throwaway_multiplier: 9,
        }
    }
}

impl RetryPolicy {
    /// Wait before retry number `retries` (1-based).
    pub fn backoff_ms(&self, retries: u32, integration_time_ms: u32) -> u64 {
        if retries <= 1 {
            u64::from(integration_time_ms).saturating_mul(u64::from(self.throwaway_multiplier))
        } else {
            self.backoff_base_ms.saturating_pow(retries)
        }
    }
}

/// Per-call and gate-acquire budgets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeouts {
    /// Per transport call (ms).
    pub transport_ms: u64,
    /// Max wait for the transaction gate (ms).
    pub gate_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            transport_ms: 100,
            gate_ms: 150,
        }
    }
}

impl Timeouts {
    #[inline]
    pub fn transport(&self) -> Duration {
        Duration::from_millis(self.transport_ms)
    }

    #[inline]
    pub fn gate(&self) -> Duration {
        Duration::from_millis(self.gate_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquisitionCfg {
    /// Extra wait the firmware inserts before auto-mode firing (s).
    pub warning_delay_sec: u32,
    /// Mode a fresh session starts in.
    pub default_mode: AcquisitionMode,
}

impl Default for AcquisitionCfg {
    fn default() -> Self {
        Self {
            warning_delay_sec: 0,
            default_mode: AcquisitionMode::Standard,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaserCfg {
    /// Floor used for readout time in watchdog computation (ms).
    pub min_readout_ms: u32,
    pub compatibility: TransportCompatibilityMode,
}

impl Default for LaserCfg {
    fn default() -> Self {
        Self {
            min_readout_ms: crate::laser::MIN_READOUT_MS,
            compatibility: TransportCompatibilityMode::Native,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncCfg {
    /// Push each setter immediately instead of waiting for the next sync.
    pub auto_sync: bool,
    pub lenient: LenientMode,
}

impl Default for SyncCfg {
    fn default() -> Self {
        Self {
            auto_sync: true,
            lenient: LenientMode::Strict,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceCfg {
    pub eeprom_protocol: EepromProtocol,
}

/// Everything the acquisition engine is parameterized by.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EngineConfig {
    pub acquisition: AcquisitionCfg,
    pub laser: LaserCfg,
    pub sync: SyncCfg,
    pub retry: RetryPolicy,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_retry_waits_for_throwaway_frames() {
        let p = RetryPolicy::default();
        assert_eq!(p.backoff_ms(1, 100), 900);
        assert_eq!(p.backoff_ms(2, 100), 25);
        assert_eq!(p.backoff_ms(3, 100), 125);
        assert_eq!(p.backoff_ms(4, 100), 625);
    }

    #[test]
    fn backoff_saturates() {
        let p = RetryPolicy {
            backoff_base_ms: u64::MAX,
            ..RetryPolicy::default()
        };
        assert_eq!(p.backoff_ms(3, 1), u64::MAX);
    }
}
