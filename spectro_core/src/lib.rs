#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Spectrometer device-communication core (transport-agnostic).
//!
//! Every byte to and from the device goes through `spectro_traits::Transport`;
//! the core never touches a BLE characteristic or USB endpoint directly.
//!
//! ## Architecture
//!
//! - **Codec**: fixed-point gain, CRC-16 and endian helpers (`codec`)
//! - **Descriptor**: EEPROM pages → immutable `DeviceDescriptor` (`descriptor`, `eeprom`)
//! - **Gate**: one logical transaction on the wire at a time (`gate`, `link`)
//! - **Parameters**: desired vs. confirmed device state (`params`)
//! - **Laser**: state frames, auto modes and watchdog sizing (`laser`)
//! - **Acquisition**: packet loop, retries, averaging (`acquisition`)
//! - **Session**: connect, reconnect and battery poll (`session`)
//!
//! ## Threading
//!
//! `DeviceLink` is `Clone + Send + Sync`. An acquisition and a background
//! poll may share it; the gate makes the poll skip instead of interleaving.

pub mod acquisition;
pub mod battery;
pub mod codec;
pub mod config;
pub mod conversions;
pub mod descriptor;
pub mod eeprom;
pub mod error;
pub mod gate;
pub mod generic;
pub mod hw_error;
pub mod laser;
pub mod link;
pub mod params;
pub mod postprocess;
pub mod session;
pub mod status;
pub mod util;

pub use spectro_traits::channels;

pub use acquisition::{AcquisitionEngine, CancelCheck, Measurement};
pub use battery::BatteryStatus;
pub use config::{AcquisitionCfg, DeviceCfg, EngineConfig, LaserCfg, RetryPolicy, SyncCfg, Timeouts};
pub use descriptor::{DeviceDescriptor, FeatureMask, Page};
pub use eeprom::EepromProtocol;
pub use error::{BuildError, DeviceError, ParseError, Report, Result};
pub use gate::{GateGuard, TransactionGate};
pub use laser::{LaserController, LaserMode, LaserState, TransportCompatibilityMode};
pub use link::DeviceLink;
pub use params::{AcquisitionMode, AutoRamanParams, DeviceState, LenientMode, ParameterSync, SyncOutcome};
pub use postprocess::PostProcessor;
pub use session::{DeviceSession, SessionBuilder};
pub use status::{AcquisitionEvent, AcquisitionState};
