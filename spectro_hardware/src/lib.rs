//! Device-side implementations of `spectro_traits::Transport`.
//!
//! Platform BLE/USB adapters live in the application; this crate carries the
//! shared hardware error type and a protocol-faithful simulator.

pub mod error;
pub mod sim;

pub use error::HwError;
pub use sim::{PacketFault, SimConfig, SimulatedSpectrometer};
