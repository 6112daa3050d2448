#![allow(dead_code)]

use std::sync::Arc;

use spectro_core::{DeviceDescriptor, DeviceSession, EngineConfig};
use spectro_hardware::{SimConfig, SimulatedSpectrometer};
use spectro_traits::ManualClock;

pub const PIXELS: usize = 10;
pub const PACKET_PIXELS: usize = 4;

pub struct Rig {
    pub sim: Arc<SimulatedSpectrometer>,
    pub clock: ManualClock,
    pub session: DeviceSession,
}

pub fn small_descriptor() -> DeviceDescriptor {
    DeviceDescriptor {
        pixel_count: PIXELS as u32,
        roi_horiz_end: (PIXELS - 1) as u16,
        ..DeviceDescriptor::default()
    }
}

pub fn small_sim(descriptor: &DeviceDescriptor) -> Arc<SimulatedSpectrometer> {
    Arc::new(SimulatedSpectrometer::new(
        SimConfig {
            pixel_count: descriptor.pixel_count as usize,
            packet_pixels: PACKET_PIXELS,
            ..SimConfig::default()
        },
        descriptor.to_pages(),
    ))
}

pub fn rig_with(descriptor: DeviceDescriptor, engine: EngineConfig) -> Rig {
    let sim = small_sim(&descriptor);
    let clock = ManualClock::new();
    let session = DeviceSession::builder()
        .with_transport(sim.clone())
        .with_clock(Arc::new(clock.clone()))
        .with_engine_config(engine)
        .connect()
        .expect("connect to simulator");
    Rig {
        sim,
        clock,
        session,
    }
}

pub fn rig() -> Rig {
    rig_with(small_descriptor(), EngineConfig::default())
}

/// `[0, 10, 20, ...]`
pub fn ramp() -> Vec<u16> {
    (0..PIXELS as u16).map(|i| i * 10).collect()
}
