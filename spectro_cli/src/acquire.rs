//! Session assembly over the simulator, and the `acquire` command.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::json;
use spectro_core::error::Result as CoreResult;
use spectro_core::{AcquisitionMode, DeviceCfg, DeviceDescriptor, DeviceSession, EngineConfig, Measurement, Timeouts};
use spectro_hardware::sim::PAGE_SIZE;
use spectro_hardware::{PacketFault, SimConfig, SimulatedSpectrometer};

use crate::cli::ModeArg;

/// Fault injected into the simulator at startup (used by the CLI tests).
pub const SIM_FAULT_ENV: &str = "SPECTRO_SIM_FAULT";

/// Enough queued packet faults to exhaust any sane retry budget.
const FAULT_BURST: usize = 64;

pub fn open_simulator() -> CoreResult<Arc<SimulatedSpectrometer>> {
    let descriptor = DeviceDescriptor::default();
    let sim = SimulatedSpectrometer::new(
        SimConfig {
            pixel_count: descriptor.pixel_count as usize,
            ..SimConfig::default()
        },
        descriptor.to_pages(),
    );
    if let Ok(fault) = std::env::var(SIM_FAULT_ENV) {
        apply_sim_fault(&sim, &fault)?;
    }
    Ok(Arc::new(sim))
}

fn apply_sim_fault(sim: &SimulatedSpectrometer, fault: &str) -> CoreResult<()> {
    match fault {
        "odd-length" => {
            for _ in 0..FAULT_BURST {
                sim.inject(PacketFault::OddLength);
            }
        }
        "timeout" => {
            for _ in 0..FAULT_BURST {
                sim.inject(PacketFault::Timeout);
            }
        }
        "device-error" => sim.inject(PacketFault::DeviceError(0x42)),
        "blank-eeprom" => sim.set_pages(vec![[0xFF; PAGE_SIZE]; 8]),
        "disconnected" => sim.set_connected(false),
        other => eyre::bail!("unknown {SIM_FAULT_ENV} value {other:?}"),
    }
    tracing::warn!(fault, "simulator fault injected");
    Ok(())
}

/// Connect to the simulator with config-derived settings. `shutdown` is
/// polled as the cancel check, so Ctrl-C aborts an acquisition cleanly.
pub fn open_session(cfg: &spectro_config::Config, shutdown: Arc<AtomicBool>) -> CoreResult<DeviceSession> {
    let sim = open_simulator()?;
    let engine: EngineConfig = cfg.into();
    let timeouts: Timeouts = (&cfg.timeouts).into();
    let device: DeviceCfg = (&cfg.device).into();
    DeviceSession::builder()
        .with_transport(sim)
        .with_engine_config(engine)
        .with_timeouts(timeouts)
        .with_device_config(device)
        .with_cancel_check(move || shutdown.load(Ordering::Relaxed))
        .connect()
}

#[derive(Debug, Clone, Default)]
pub struct AcquireOpts {
    pub integration_ms: Option<u32>,
    pub gain_db: Option<f32>,
    pub scans: Option<u8>,
    pub roi: Option<(u16, u16)>,
    pub mode: Option<ModeArg>,
    pub laser: bool,
}

impl From<ModeArg> for AcquisitionMode {
    fn from(m: ModeArg) -> Self {
        match m {
            ModeArg::Standard => AcquisitionMode::Standard,
            ModeArg::AutoDark => AcquisitionMode::AutoDark,
            ModeArg::AutoRaman => AcquisitionMode::AutoRaman,
        }
    }
}

pub fn mode_name(mode: AcquisitionMode) -> &'static str {
    match mode {
        AcquisitionMode::Standard => "standard",
        AcquisitionMode::AutoDark => "auto-dark",
        AcquisitionMode::AutoRaman => "auto-raman",
    }
}

/// Apply the requested settings and take one measurement. A laser switched
/// on for this run is switched off again whatever the outcome.
pub fn run_acquire(session: &mut DeviceSession, opts: &AcquireOpts) -> CoreResult<Measurement> {
    let mode = opts
        .mode
        .map(AcquisitionMode::from)
        .unwrap_or(session.engine().config().acquisition.default_mode);
    if opts.laser && mode.is_auto() {
        eyre::bail!("--laser only applies to standard acquisitions (mode is {})", mode_name(mode));
    }
    match mode {
        AcquisitionMode::Standard => {}
        AcquisitionMode::AutoDark => session.set_auto_dark(true)?,
        AcquisitionMode::AutoRaman => session.set_auto_raman(true)?,
    }
    if let Some(ms) = opts.integration_ms {
        session.set_integration_time_ms(ms)?;
    }
    if let Some(db) = opts.gain_db {
        session.set_gain_db(db)?;
    }
    if let Some(n) = opts.scans {
        session.set_scans_to_average(n)?;
    }
    if let Some((start, stop)) = opts.roi {
        session.set_vertical_roi(start, stop)?;
    }

    if opts.laser {
        session.set_laser_enabled(true)?;
    }
    let result = session.acquire();
    if opts.laser
        && let Err(e) = session.set_laser_enabled(false)
    {
        tracing::warn!(error = %e, "failed to switch laser off after acquisition");
    }
    result
}

/// Brightest pixel as `(index, counts)`.
fn peak(pixels: &[f64]) -> Option<(usize, f64)> {
    pixels
        .iter()
        .copied()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(&b.1))
}

pub fn print_measurement(m: &Measurement, descriptor: &DeviceDescriptor, json_out: bool, full: bool) {
    let wavelengths = descriptor.wavelengths();
    let mean = if m.pixels.is_empty() {
        0.0
    } else {
        m.pixels.iter().sum::<f64>() / m.pixels.len() as f64
    };
    let peak = peak(&m.pixels);
    if json_out {
        let mut obj = json!({
            "pixels": m.pixels.len(),
            "integration_time_ms": m.integration_time_ms,
            "gain_db": m.gain_db,
            "exposures": m.exposures,
            "scans_to_average": m.scans_to_average,
            "mode": mode_name(m.mode),
            "laser_enabled": m.laser_enabled,
            "elapsed_ms": m.elapsed_ms,
            "mean": mean,
            "peak": peak.map(|(i, counts)| json!({
                "pixel": i,
                "wavelength_nm": wavelengths.get(i),
                "counts": counts,
            })),
        });
        if full {
            obj["spectrum"] = json!(m.pixels);
            obj["wavelengths_nm"] = json!(wavelengths);
        }
        println!("{obj}");
        return;
    }

    println!(
        "Acquired {} pixels in {} ms ({} mode, {} ms, {:.1} dB, {} exposure(s))",
        m.pixels.len(),
        m.elapsed_ms,
        mode_name(m.mode),
        m.integration_time_ms,
        m.gain_db,
        m.exposures
    );
    println!("Mean: {mean:.1} counts");
    if let Some((i, counts)) = peak {
        match wavelengths.get(i) {
            Some(nm) => println!("Peak: pixel {i} ({nm:.2} nm) = {counts:.1} counts"),
            None => println!("Peak: pixel {i} = {counts:.1} counts"),
        }
    }
    if full {
        for (i, px) in m.pixels.iter().enumerate() {
            println!("{i}\t{px:.1}");
        }
    }
}
