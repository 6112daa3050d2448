//! Logical channel keys shared by the host core and device implementations.
//!
//! On BLE each key is a characteristic; on USB it selects a control opcode or
//! bulk endpoint. Adapters translate the key, the core never sees handles.

pub const INTEGRATION_TIME_MS: &str = "integrationTimeMS";
pub const GAIN_DB: &str = "gainDb";
pub const LASER_STATE: &str = "laserState";
pub const ACQUIRE_SPECTRUM: &str = "acquireSpectrum";
pub const SPECTRUM_REQUEST: &str = "spectrumRequest";
pub const READ_SPECTRUM: &str = "readSpectrum";
pub const EEPROM_CMD: &str = "eepromCmd";
pub const EEPROM_DATA: &str = "eepromData";
pub const BATTERY_STATUS: &str = "batteryStatus";
/// Multiplexed command channel; every write carries a sequence byte.
pub const GENERIC: &str = "generic";

/// Two-byte command-group codes carried on the generic channel.
pub mod opcodes {
    pub const EEPROM_READ: [u8; 2] = [0xFF, 0x01];
    pub const SET_ROI_START: [u8; 2] = [0xFF, 0x21];
    pub const SET_ROI_STOP: [u8; 2] = [0xFF, 0x23];
    pub const SET_SCANS_TO_AVERAGE: [u8; 2] = [0xFF, 0x62];
    pub const AUTO_RAMAN_PARAMS: [u8; 2] = [0xFF, 0xFD];
}
