//! `From` implementations bridging `spectro_config` types to `spectro_core` types.

use crate::config::{AcquisitionCfg, DeviceCfg, EngineConfig, LaserCfg, RetryPolicy, SyncCfg, Timeouts};
use crate::eeprom::EepromProtocol;
use crate::laser::TransportCompatibilityMode;
use crate::params::{AcquisitionMode, LenientMode};

// ── Enums ────────────────────────────────────────────────────────────────────

impl From<spectro_config::EepromProtocol> for EepromProtocol {
    fn from(p: spectro_config::EepromProtocol) -> Self {
        match p {
            spectro_config::EepromProtocol::Usb => Self::Usb,
            spectro_config::EepromProtocol::Ble => Self::Ble,
            spectro_config::EepromProtocol::Generic => Self::Generic,
        }
    }
}

impl From<spectro_config::Compatibility> for TransportCompatibilityMode {
    fn from(c: spectro_config::Compatibility) -> Self {
        match c {
            spectro_config::Compatibility::Native => Self::Native,
            spectro_config::Compatibility::SoftwareRaman => Self::SoftwareRaman,
        }
    }
}

impl From<spectro_config::AcquisitionModeCfg> for AcquisitionMode {
    fn from(m: spectro_config::AcquisitionModeCfg) -> Self {
        match m {
            spectro_config::AcquisitionModeCfg::Standard => Self::Standard,
            spectro_config::AcquisitionModeCfg::AutoDark => Self::AutoDark,
            spectro_config::AcquisitionModeCfg::AutoRaman => Self::AutoRaman,
        }
    }
}

// ── Sections ─────────────────────────────────────────────────────────────────

impl From<&spectro_config::DeviceSection> for DeviceCfg {
    fn from(c: &spectro_config::DeviceSection) -> Self {
        Self {
            eeprom_protocol: c.eeprom_protocol.into(),
        }
    }
}

impl From<&spectro_config::AcquisitionSection> for AcquisitionCfg {
    fn from(c: &spectro_config::AcquisitionSection) -> Self {
        Self {
            warning_delay_sec: c.warning_delay_sec,
            default_mode: c.mode.into(),
        }
    }
}

impl From<&spectro_config::RetrySection> for RetryPolicy {
    fn from(c: &spectro_config::RetrySection) -> Self {
        Self {
            max_retries: c.max_retries,
            backoff_base_ms: c.backoff_base_ms,
            throwaway_multiplier: c.throwaway_multiplier,
        }
    }
}

impl From<&spectro_config::Timeouts> for Timeouts {
    fn from(c: &spectro_config::Timeouts) -> Self {
        Self {
            transport_ms: c.transport_ms,
            gate_ms: c.gate_ms,
        }
    }
}

impl From<&spectro_config::SyncSection> for SyncCfg {
    fn from(c: &spectro_config::SyncSection) -> Self {
        Self {
            auto_sync: c.auto_sync,
            lenient: if c.lenient_gain {
                LenientMode::TolerateGainWriteFailure
            } else {
                LenientMode::Strict
            },
        }
    }
}

// ── Whole config ─────────────────────────────────────────────────────────────

impl From<&spectro_config::Config> for EngineConfig {
    fn from(c: &spectro_config::Config) -> Self {
        Self {
            acquisition: (&c.acquisition).into(),
            laser: LaserCfg {
                min_readout_ms: c.acquisition.min_readout_ms,
                compatibility: c.device.compatibility.into(),
            },
            sync: (&c.sync).into(),
            retry: (&c.retry).into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_runtime_defaults() {
        let cfg = spectro_config::Config::default();
        assert_eq!(EngineConfig::from(&cfg), EngineConfig::default());
        assert_eq!(Timeouts::from(&cfg.timeouts), Timeouts::default());
        assert_eq!(DeviceCfg::from(&cfg.device), DeviceCfg::default());
    }

    #[test]
    fn lenient_gain_maps_to_tolerant_mode() {
        let sync = spectro_config::SyncSection {
            auto_sync: false,
            lenient_gain: true,
        };
        let got = SyncCfg::from(&sync);
        assert!(!got.auto_sync);
        assert_eq!(got.lenient, LenientMode::TolerateGainWriteFailure);
    }

    #[test]
    fn compatibility_feeds_laser_config() {
        let mut cfg = spectro_config::Config::default();
        cfg.device.compatibility = spectro_config::Compatibility::SoftwareRaman;
        cfg.acquisition.min_readout_ms = 250;
        let engine = EngineConfig::from(&cfg);
        assert_eq!(engine.laser.compatibility, TransportCompatibilityMode::SoftwareRaman);
        assert_eq!(engine.laser.min_readout_ms, 250);
    }
}
