//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::OnceLock;

/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "spectro", version, about = "Spectrometer CLI")]
pub struct Cli {
    /// Path to config TOML (typed); built-in defaults when omitted
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log and print results as JSON lines instead of text
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace)
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "warn")]
    pub log_level: String,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

/// Acquisition flavour requested on the command line.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum ModeArg {
    /// Single exposure per scan, laser under manual control
    Standard,
    /// Dark frame only; the laser stays off
    AutoDark,
    /// Device sequences dark and laser frames
    AutoRaman,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Take one averaged spectrum
    Acquire {
        /// Integration time in ms (clamped to 1..=5000)
        #[arg(long, value_name = "MS")]
        integration_ms: Option<u32>,
        /// Detector gain in dB (0..=72)
        #[arg(long, value_name = "DB")]
        gain_db: Option<f32>,
        /// Exposures averaged into the result
        #[arg(long, value_name = "N")]
        scans: Option<u8>,
        /// Vertical region of interest (sensor rows)
        #[arg(long, num_args = 2, value_names = ["START", "STOP"])]
        roi: Option<Vec<u16>>,
        /// Acquisition mode; overrides acquisition.mode from the config
        #[arg(long, value_enum, value_name = "MODE")]
        mode: Option<ModeArg>,
        /// Fire the laser for a standard acquisition
        #[arg(long, action = ArgAction::SetTrue)]
        laser: bool,
        /// Include every pixel in the output
        #[arg(long, action = ArgAction::SetTrue)]
        full: bool,
    },
    /// Read and print the device descriptor
    Eeprom,
    /// Quick health check (connect, battery, laser report)
    SelfCheck,
}
