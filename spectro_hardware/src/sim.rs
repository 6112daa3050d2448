//! In-memory spectrometer speaking the device side of the wire protocol.
//!
//! Used by the CLI when no physical adapter is present and by integration
//! tests that need a device with injectable packet faults.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use spectro_traits::channels::{self, opcodes};
use spectro_traits::{StatusCode, Transport, TransportError};
use tracing::{debug, trace};

use crate::error::HwError;

pub const PAGE_SIZE: usize = 64;
const BLE_SUBPAGE_SIZE: usize = 16;

/// One-shot fault applied to the next `readSpectrum` response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketFault {
    /// Valid packet with its last byte chopped off.
    OddLength,
    /// Repeat the previous response verbatim.
    Duplicate,
    /// `[0, 0, 0]`: data not ready yet.
    NotReady,
    /// `[0, 0, code]`: device-reported error.
    DeviceError(u8),
    /// The read times out.
    Timeout,
    /// Header pixel index does not match the request.
    WrongOffset,
}

/// Static characteristics of the simulated unit.
#[derive(Debug, Clone)]
pub struct SimConfig {
    pub pixel_count: usize,
    /// Pixels returned per `readSpectrum` packet.
    pub packet_pixels: usize,
    pub dark_level: u16,
    pub interlock_closed: bool,
    pub laser_delay_ms: u16,
    pub laser_type: u8,
    /// Number of laser modes the firmware accepts (2 on legacy units).
    pub laser_modes: u8,
    pub battery_percent: u8,
    pub charging: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            pixel_count: 1952,
            packet_pixels: 60,
            dark_level: 800,
            interlock_closed: true,
            laser_delay_ms: 500,
            laser_type: 0,
            laser_modes: 3,
            battery_percent: 87,
            charging: false,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct SimLaser {
    mode: u8,
    enabled: bool,
    watchdog_sec: u8,
}

#[derive(Debug)]
struct SimState {
    cfg: SimConfig,
    pages: Vec<[u8; PAGE_SIZE]>,
    eeprom_request: Option<(u8, Option<u8>)>,
    generic_responses: VecDeque<Vec<u8>>,
    integration_time_ms: u32,
    gain_raw: u16,
    roi: (u16, u16),
    scans_to_average: u8,
    laser: SimLaser,
    spectrum: Option<Vec<u16>>,
    spectrum_override: Option<Vec<u16>>,
    next_start: u16,
    last_packet: Option<Vec<u8>>,
    faults: VecDeque<Option<PacketFault>>,
    write_failures: VecDeque<(String, StatusCode)>,
    writes: Vec<(String, Vec<u8>)>,
    acquisitions: usize,
    connected: bool,
}

/// Simulated spectrometer implementing [`Transport`].
#[derive(Debug)]
pub struct SimulatedSpectrometer {
    state: Mutex<SimState>,
}

impl SimulatedSpectrometer {
    pub fn new(cfg: SimConfig, pages: Vec<[u8; PAGE_SIZE]>) -> Self {
        Self {
            state: Mutex::new(SimState {
                cfg,
                pages,
                eeprom_request: None,
                generic_responses: VecDeque::new(),
                integration_time_ms: 100,
                gain_raw: 8 << 8,
                roi: (0, 0),
                scans_to_average: 1,
                laser: SimLaser::default(),
                spectrum: None,
                spectrum_override: None,
                next_start: 0,
                last_packet: None,
                faults: VecDeque::new(),
                write_failures: VecDeque::new(),
                writes: Vec::new(),
                acquisitions: 0,
                connected: true,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        // A poisoned lock only means a test thread panicked mid-call; the
        // state itself is still usable.
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Queue a fault for an upcoming `readSpectrum` response.
    pub fn inject(&self, fault: PacketFault) {
        self.lock().faults.push_back(Some(fault));
    }

    /// Queue a fault after `clean` unmodified `readSpectrum` responses.
    pub fn inject_after(&self, clean: usize, fault: PacketFault) {
        let mut st = self.lock();
        st.faults.extend(std::iter::repeat_n(None, clean));
        st.faults.push_back(Some(fault));
    }

    /// Make the next write to `channel` complete with `status`.
    pub fn fail_next_write(&self, channel: &str, status: StatusCode) {
        self.lock()
            .write_failures
            .push_back((channel.to_string(), status));
    }

    /// Fix the pixel values returned by every subsequent acquisition.
    pub fn set_spectrum(&self, pixels: Vec<u16>) {
        self.lock().spectrum_override = Some(pixels);
    }

    pub fn set_interlock_closed(&self, closed: bool) {
        self.lock().cfg.interlock_closed = closed;
    }

    pub fn set_connected(&self, connected: bool) {
        self.lock().connected = connected;
    }

    /// Replace the EEPROM image (e.g. to simulate reflashing between sessions).
    pub fn set_pages(&self, pages: Vec<[u8; PAGE_SIZE]>) {
        self.lock().pages = pages;
    }

    /// Every accepted write, in order, as `(channel, bytes)`.
    pub fn writes(&self) -> Vec<(String, Vec<u8>)> {
        self.lock().writes.clone()
    }

    /// Writes addressed to `channel`.
    pub fn writes_to(&self, channel: &str) -> Vec<Vec<u8>> {
        self.lock()
            .writes
            .iter()
            .filter(|(c, _)| c == channel)
            .map(|(_, b)| b.clone())
            .collect()
    }

    pub fn acquisitions(&self) -> usize {
        self.lock().acquisitions
    }

    pub fn laser_enabled(&self) -> bool {
        self.lock().laser.enabled
    }

    pub fn integration_time_ms(&self) -> u32 {
        self.lock().integration_time_ms
    }

    pub fn roi(&self) -> (u16, u16) {
        self.lock().roi
    }

    pub fn scans_to_average(&self) -> u8 {
        self.lock().scans_to_average
    }

    pub fn gain_raw(&self) -> u16 {
        self.lock().gain_raw
    }
}

impl SimState {
    fn laser_active(&self) -> bool {
        self.laser.enabled && self.cfg.interlock_closed
    }

    fn synthesize(&self) -> Vec<u16> {
        if let Some(px) = &self.spectrum_override {
            return px.clone();
        }
        let n = self.cfg.pixel_count;
        let exposure = self.integration_time_ms as f64 / 100.0;
        let gain = f64::from(self.gain_raw >> 8).max(1.0) / 8.0;
        let raman = self.laser_active();
        (0..n)
            .map(|i| {
                let x = i as f64 / n.max(1) as f64;
                let fluor = 400.0 * (-(x - 0.45).powi(2) / 0.08).exp();
                let peak = if raman {
                    6000.0 * (-(x - 0.62).powi(2) / 0.0002).exp()
                } else {
                    0.0
                };
                let counts = f64::from(self.cfg.dark_level) + (fluor + peak) * exposure * gain;
                counts.clamp(0.0, f64::from(u16::MAX)) as u16
            })
            .collect()
    }

    fn packet_from(&self, start: u16) -> Vec<u8> {
        let Some(spectrum) = &self.spectrum else {
            return vec![0, 0, 0];
        };
        let start_idx = usize::from(start).min(spectrum.len());
        let end = (start_idx + self.cfg.packet_pixels).min(spectrum.len());
        let mut out = Vec::with_capacity(2 + 2 * (end - start_idx));
        out.extend_from_slice(&(start as i16).to_be_bytes());
        for px in &spectrum[start_idx..end] {
            out.extend_from_slice(&px.to_le_bytes());
        }
        out
    }

    fn handle_generic(&mut self, bytes: &[u8]) -> StatusCode {
        if bytes.len() < 3 {
            return StatusCode::ProtocolError(0x01);
        }
        let seq = bytes[0];
        let group = [bytes[1], bytes[2]];
        let payload = &bytes[3..];
        match group {
            opcodes::EEPROM_READ => {
                // {0x00, page, offset}
                let (Some(&page), Some(&offset)) = (payload.get(1), payload.get(2)) else {
                    return StatusCode::ProtocolError(0x02);
                };
                let Some(p) = self.pages.get(usize::from(page)) else {
                    return StatusCode::ProtocolError(0x03);
                };
                let off = usize::from(offset).min(PAGE_SIZE - BLE_SUBPAGE_SIZE);
                let mut resp = vec![seq, group[0], group[1]];
                resp.extend_from_slice(&p[off..off + BLE_SUBPAGE_SIZE]);
                self.generic_responses.push_back(resp);
            }
            opcodes::SET_ROI_START | opcodes::SET_ROI_STOP => {
                let [hi, lo] = payload else {
                    return StatusCode::ProtocolError(0x04);
                };
                let v = u16::from_be_bytes([*hi, *lo]);
                if group == opcodes::SET_ROI_START {
                    self.roi.0 = v;
                } else {
                    self.roi.1 = v;
                }
            }
            opcodes::SET_SCANS_TO_AVERAGE => {
                let [n] = payload else {
                    return StatusCode::ProtocolError(0x05);
                };
                self.scans_to_average = *n;
            }
            opcodes::AUTO_RAMAN_PARAMS => {
                self.generic_responses.push_back(vec![seq, group[0], group[1], 0]);
            }
            _ => return StatusCode::ProtocolError(0x7F),
        }
        StatusCode::Success
    }
}

impl Transport for SimulatedSpectrometer {
    fn write(
        &self,
        channel: &str,
        bytes: &[u8],
        _timeout: Duration,
    ) -> Result<StatusCode, TransportError> {
        let mut st = self.lock();
        if !st.connected {
            return Err(Box::new(HwError::Disconnected));
        }
        if st
            .write_failures
            .front()
            .is_some_and(|(c, _)| c == channel)
            && let Some((_, status)) = st.write_failures.pop_front()
        {
            trace!(channel, ?status, "sim: injected write failure");
            return Ok(status);
        }
        trace!(channel, len = bytes.len(), "sim: write");
        let status = match channel {
            channels::INTEGRATION_TIME_MS => match <[u8; 4]>::try_from(bytes) {
                Ok(b) => {
                    st.integration_time_ms = u32::from_be_bytes(b);
                    StatusCode::Success
                }
                Err(_) => StatusCode::ProtocolError(0x10),
            },
            channels::GAIN_DB => match <[u8; 2]>::try_from(bytes) {
                Ok(b) => {
                    st.gain_raw = u16::from_be_bytes(b);
                    StatusCode::Success
                }
                Err(_) => StatusCode::ProtocolError(0x11),
            },
            channels::LASER_STATE => match bytes {
                [mode, _ty, enabled, watchdog] if *mode < st.cfg.laser_modes && *enabled <= 1 => {
                    st.laser = SimLaser {
                        mode: *mode,
                        enabled: *enabled == 1,
                        watchdog_sec: *watchdog,
                    };
                    StatusCode::Success
                }
                _ => StatusCode::ProtocolError(0x12),
            },
            channels::ACQUIRE_SPECTRUM => {
                st.spectrum = Some(st.synthesize());
                st.next_start = 0;
                st.last_packet = None;
                st.acquisitions += 1;
                debug!(acquisitions = st.acquisitions, "sim: spectrum acquired");
                StatusCode::Success
            }
            channels::SPECTRUM_REQUEST => match <[u8; 2]>::try_from(bytes) {
                Ok(b) => {
                    st.next_start = u16::from_le_bytes(b);
                    StatusCode::Success
                }
                Err(_) => StatusCode::ProtocolError(0x13),
            },
            channels::EEPROM_CMD => match bytes {
                [page] => {
                    st.eeprom_request = Some((*page, None));
                    StatusCode::Success
                }
                [page, subpage] => {
                    st.eeprom_request = Some((*page, Some(*subpage)));
                    StatusCode::Success
                }
                _ => StatusCode::ProtocolError(0x14),
            },
            channels::GENERIC => st.handle_generic(bytes),
            other => return Err(Box::new(HwError::UnknownChannel(other.to_string()))),
        };
        if status.is_success() {
            st.writes.push((channel.to_string(), bytes.to_vec()));
        }
        Ok(status)
    }

    fn read(&self, channel: &str, _timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let mut st = self.lock();
        if !st.connected {
            return Err(Box::new(HwError::Disconnected));
        }
        match channel {
            channels::READ_SPECTRUM => {
                let fault = st.faults.pop_front().flatten();
                let start = st.next_start;
                let resp = match fault {
                    Some(PacketFault::Timeout) => {
                        return Err(Box::new(HwError::Timeout(channel.to_string())));
                    }
                    Some(PacketFault::NotReady) => vec![0, 0, 0],
                    Some(PacketFault::DeviceError(code)) => vec![0, 0, code],
                    Some(PacketFault::Duplicate) => st
                        .last_packet
                        .clone()
                        .unwrap_or_else(|| st.packet_from(start)),
                    Some(PacketFault::OddLength) => {
                        let mut p = st.packet_from(start);
                        p.pop();
                        p
                    }
                    Some(PacketFault::WrongOffset) => st.packet_from(start.wrapping_add(1)),
                    None => st.packet_from(start),
                };
                if fault.is_none() && resp.len() > 3 {
                    st.last_packet = Some(resp.clone());
                }
                Ok(resp)
            }
            channels::EEPROM_DATA => {
                let Some((page, subpage)) = st.eeprom_request.take() else {
                    return Err(Box::new(HwError::Timeout(channel.to_string())));
                };
                let Some(p) = st.pages.get(usize::from(page)) else {
                    return Ok(Vec::new());
                };
                Ok(match subpage {
                    None => p.to_vec(),
                    Some(sp) => {
                        let off = (usize::from(sp) * BLE_SUBPAGE_SIZE).min(PAGE_SIZE - BLE_SUBPAGE_SIZE);
                        p[off..off + BLE_SUBPAGE_SIZE].to_vec()
                    }
                })
            }
            channels::GENERIC => st
                .generic_responses
                .pop_front()
                .ok_or_else(|| -> TransportError { Box::new(HwError::Timeout(channel.to_string())) }),
            channels::LASER_STATE => {
                let delay = st.cfg.laser_delay_ms.to_be_bytes();
                let status = u8::from(st.cfg.interlock_closed) | (u8::from(st.laser_active()) << 1);
                Ok(vec![
                    st.laser.mode,
                    st.cfg.laser_type,
                    u8::from(st.laser.enabled),
                    st.laser.watchdog_sec,
                    delay[0],
                    delay[1],
                    status,
                ])
            }
            channels::BATTERY_STATUS => Ok(vec![st.cfg.battery_percent, u8::from(st.cfg.charging)]),
            other => Err(Box::new(HwError::UnknownChannel(other.to_string()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank_pages() -> Vec<[u8; PAGE_SIZE]> {
        (0..8u8).map(|i| [i; PAGE_SIZE]).collect()
    }

    fn small() -> SimulatedSpectrometer {
        SimulatedSpectrometer::new(
            SimConfig {
                pixel_count: 10,
                packet_pixels: 4,
                ..SimConfig::default()
            },
            blank_pages(),
        )
    }

    const T: Duration = Duration::from_millis(100);

    #[test]
    fn packets_carry_big_endian_header_and_le_pixels() {
        let sim = small();
        sim.set_spectrum((0..10).map(|v| v * 100).collect());
        sim.write(channels::ACQUIRE_SPECTRUM, &[0], T).unwrap();
        sim.write(channels::SPECTRUM_REQUEST, &8u16.to_le_bytes(), T)
            .unwrap();
        let p = sim.read(channels::READ_SPECTRUM, T).unwrap();
        assert_eq!(&p[..2], &[0, 8]);
        assert_eq!(u16::from_le_bytes([p[2], p[3]]), 800);
        assert_eq!(p.len(), 2 + 2 * 2);
    }

    #[test]
    fn not_ready_before_acquire() {
        let sim = small();
        let p = sim.read(channels::READ_SPECTRUM, T).unwrap();
        assert_eq!(p, vec![0, 0, 0]);
    }

    #[test]
    fn laser_frame_reports_interlock_and_activity() {
        let sim = small();
        sim.write(channels::LASER_STATE, &[0, 0, 1, 10], T).unwrap();
        let f = sim.read(channels::LASER_STATE, T).unwrap();
        assert_eq!(f.len(), 7);
        assert_eq!(f[6], 0b11);
        sim.set_interlock_closed(false);
        let f = sim.read(channels::LASER_STATE, T).unwrap();
        assert_eq!(f[6], 0b00);
    }

    #[test]
    fn rejects_laser_mode_beyond_firmware_support() {
        let sim = SimulatedSpectrometer::new(
            SimConfig {
                laser_modes: 2,
                ..SimConfig::default()
            },
            blank_pages(),
        );
        let st = sim.write(channels::LASER_STATE, &[2, 0, 0, 10], T).unwrap();
        assert_eq!(st, StatusCode::ProtocolError(0x12));
    }

    #[test]
    fn generic_eeprom_read_echoes_sequence_and_group() {
        let sim = small();
        sim.write(channels::GENERIC, &[41, 0xFF, 0x01, 0, 3, 16], T)
            .unwrap();
        let r = sim.read(channels::GENERIC, T).unwrap();
        assert_eq!(&r[..3], &[41, 0xFF, 0x01]);
        assert_eq!(&r[3..], &[3u8; 16]);
    }

    #[test]
    fn disconnected_sim_errors() {
        let sim = small();
        sim.set_connected(false);
        let err = sim.read(channels::BATTERY_STATUS, T).unwrap_err();
        assert!(err.to_string().contains("disconnected"));
    }
}
