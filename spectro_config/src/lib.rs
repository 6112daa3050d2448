#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schema for the spectrometer harness.
//!
//! `Config` and its sections are deserialized from TOML and validated. Every
//! section is optional; missing keys fall back to the same defaults the core
//! uses when built without a config file.
use serde::Deserialize;

/// How the descriptor EEPROM is read from the device.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EepromProtocol {
    /// Dedicated read channel carrying a page index.
    #[default]
    Usb,
    /// Dedicated read channel with a page+subpage selector.
    Ble,
    /// 16-byte chunks over the generic channel.
    Generic,
}

/// Laser framing supported by the device firmware.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Compatibility {
    #[default]
    Native,
    /// Older firmware without on-device auto-Raman; the host sequences it.
    SoftwareRaman,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum AcquisitionModeCfg {
    #[default]
    Standard,
    AutoDark,
    AutoRaman,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct DeviceSection {
    pub eeprom_protocol: EepromProtocol,
    pub compatibility: Compatibility,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AcquisitionSection {
    /// Firmware pause before auto-mode firing (s)
    pub warning_delay_sec: u32,
    /// Readout floor used when sizing the laser watchdog (ms)
    pub min_readout_ms: u32,
    pub mode: AcquisitionModeCfg,
}

impl Default for AcquisitionSection {
    fn default() -> Self {
        Self {
            warning_delay_sec: 0,
            min_readout_ms: 100,
            mode: AcquisitionModeCfg::Standard,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    /// First-retry wait in multiples of the integration time
    pub throwaway_multiplier: u32,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff_base_ms: 5,
            throwaway_multiplier: 9,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    /// Per transport call (ms). Also accepts alias "io_ms".
    #[serde(alias = "io_ms")]
    pub transport_ms: u64,
    /// Max wait for the transaction gate (ms)
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

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SyncSection {
    /// Push parameter changes as soon as they are set
    pub auto_sync: bool,
    /// Keep going when the device refuses a gain write
    pub lenient_gain: bool,
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            auto_sync: true,
            lenient_gain: false,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub device: DeviceSection,
    pub acquisition: AcquisitionSection,
    pub retry: RetrySection,
    pub timeouts: Timeouts,
    pub sync: SyncSection,
    pub logging: Logging,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Acquisition
        if self.acquisition.min_readout_ms == 0 {
            eyre::bail!("acquisition.min_readout_ms must be >= 1");
        }
        if self.acquisition.min_readout_ms > 60 * 1000 {
            eyre::bail!("acquisition.min_readout_ms is unreasonably large (>60s)");
        }
        if self.acquisition.warning_delay_sec > 60 * 60 {
            eyre::bail!("acquisition.warning_delay_sec is unreasonably large (>1h)");
        }

        // Retry
        if self.retry.max_retries == 0 {
            eyre::bail!("retry.max_retries must be >= 1");
        }
        if self.retry.backoff_base_ms == 0 {
            eyre::bail!("retry.backoff_base_ms must be >= 1");
        }
        if self.retry.throwaway_multiplier > 100 {
            eyre::bail!("retry.throwaway_multiplier must be <= 100");
        }

        // Timeouts
        if self.timeouts.transport_ms == 0 {
            eyre::bail!("timeouts.transport_ms must be >= 1");
        }
        if self.timeouts.gate_ms == 0 {
            eyre::bail!("timeouts.gate_ms must be >= 1");
        }

        // Logging
        if let Some(rotation) = self.logging.rotation.as_deref()
            && !matches!(rotation, "never" | "daily" | "hourly")
        {
            eyre::bail!("logging.rotation must be one of never, daily, hourly (got {rotation:?})");
        }

        // Device: serde restricts enums to known names

        Ok(())
    }
}
