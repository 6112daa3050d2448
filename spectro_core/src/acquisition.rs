//! The acquisition state machine (`AcquisitionEngine`).
//!
//! Drives one averaged measurement: parameter sync, optional host-driven
//! laser ignition, per-exposure trigger and packet loop with CRC and retry
//! handling, averaging, and post-processing. Every wait goes through the
//! injected `Clock`.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel as xch;
use spectro_traits::channels;
use spectro_traits::clock::Clock;
use tracing::{debug, info, warn};

use crate::codec::{self, Endian};
use crate::config::EngineConfig;
use crate::descriptor::DeviceDescriptor;
use crate::error::{DeviceError, Report, Result as CoreResult};
use crate::laser::{LaserController, LaserMode, TransportCompatibilityMode, safe_watchdog_sec};
use crate::link::DeviceLink;
use crate::params::{AcquisitionMode, ParameterSync};
use crate::postprocess::{self, PostProcessor};
use crate::status::{AcquisitionEvent, AcquisitionState};
use crate::util::secs_to_ms;

/// Polled between packets and exposures; `true` aborts the measurement.
pub type CancelCheck = Box<dyn Fn() -> bool + Send + Sync>;

/// Header preceding the pixel payload in each packet.
pub const PACKET_HEADER_LEN: usize = 2;
/// Length of a status-only response.
pub const STATUS_FRAME_LEN: usize = 3;

/// One averaged, post-processed spectrum.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub pixels: Vec<f64>,
    pub integration_time_ms: u32,
    pub gain_db: f32,
    /// Exposures summed on the host (1 when firmware averaged).
    pub exposures: u8,
    pub scans_to_average: u8,
    pub mode: AcquisitionMode,
    pub laser_enabled: bool,
    pub elapsed_ms: u64,
}

/// A validated spectrum packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub crc: u16,
    pub pixels: Vec<u16>,
}

/// Validate one `readSpectrum` response requested at `start`.
///
/// Order: status frame, length, duplicate CRC, header offset. Only a
/// device-reported error code is non-retryable.
pub fn decode_packet(resp: &[u8], start: u16, last_crc: Option<u16>) -> Result<Packet, DeviceError> {
    if resp.len() == STATUS_FRAME_LEN {
        return match resp[2] {
            0 => Err(DeviceError::ProtocolViolation("spectrum not ready".into())),
            code => Err(DeviceError::DeviceRejected(code)),
        };
    }
    if resp.len() < PACKET_HEADER_LEN || resp.len() % 2 != 0 {
        return Err(DeviceError::ProtocolViolation(format!(
            "packet length {} is odd or short",
            resp.len()
        )));
    }
    let crc = codec::crc16(resp);
    if last_crc == Some(crc) {
        return Err(DeviceError::DuplicateFrame(crc));
    }
    let header = codec::i16_at(resp, 0, Endian::Big)
        .ok_or_else(|| DeviceError::ProtocolViolation("missing packet header".into()))?;
    if header != start as i16 {
        return Err(DeviceError::ProtocolViolation(format!(
            "packet starts at pixel {header}, requested {start}"
        )));
    }
    let pixels = resp[PACKET_HEADER_LEN..]
        .chunks_exact(2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .collect();
    Ok(Packet { crc, pixels })
}

pub struct AcquisitionEngine {
    link: DeviceLink,
    descriptor: Arc<DeviceDescriptor>,
    params: ParameterSync,
    laser: LaserController,
    clock: Arc<dyn Clock + Send + Sync>,
    cfg: EngineConfig,
    state: AcquisitionState,
    events: Option<xch::Sender<AcquisitionEvent>>,
    cancel: Option<CancelCheck>,
    post: Option<Box<dyn PostProcessor>>,
}

impl std::fmt::Debug for AcquisitionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcquisitionEngine")
            .field("state", &self.state)
            .field("serial", &self.descriptor.serial_number)
            .field("params", self.params.state())
            .field("laser", self.laser.state())
            .finish_non_exhaustive()
    }
}

impl AcquisitionEngine {
    pub fn new(
        link: DeviceLink,
        descriptor: Arc<DeviceDescriptor>,
        clock: Arc<dyn Clock + Send + Sync>,
        cfg: EngineConfig,
    ) -> Self {
        let params = ParameterSync::new(
            link.clone(),
            &descriptor,
            cfg.acquisition.default_mode,
            cfg.sync.clone(),
        );
        let laser = LaserController::new(link.clone(), cfg.laser.compatibility, descriptor.has_laser);
        Self {
            link,
            descriptor,
            params,
            laser,
            clock,
            cfg,
            state: AcquisitionState::Idle,
            events: None,
            cancel: None,
            post: None,
        }
    }

    pub fn state(&self) -> AcquisitionState {
        self.state
    }

    pub fn descriptor(&self) -> &Arc<DeviceDescriptor> {
        &self.descriptor
    }

    pub fn params(&self) -> &ParameterSync {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut ParameterSync {
        &mut self.params
    }

    pub fn laser(&self) -> &LaserController {
        &self.laser
    }

    pub fn laser_mut(&mut self) -> &mut LaserController {
        &mut self.laser
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    pub fn set_event_sink(&mut self, tx: xch::Sender<AcquisitionEvent>) {
        self.events = Some(tx);
    }

    pub fn set_cancel_check(&mut self, check: CancelCheck) {
        self.cancel = Some(check);
    }

    pub fn set_post_processor(&mut self, hook: Box<dyn PostProcessor>) {
        self.post = Some(hook);
    }

    /// Swap in a freshly parsed descriptor; all confirmed state is dropped.
    pub fn replace_descriptor(&mut self, descriptor: Arc<DeviceDescriptor>) {
        self.params.reset(&descriptor);
        self.laser.reset(descriptor.has_laser);
        self.descriptor = descriptor;
        self.transition(AcquisitionState::Idle);
    }

    /// Enter or leave auto-dark; the acquisition mode follows the laser mode.
    pub fn set_auto_dark(&mut self, on: bool) -> Result<(), DeviceError> {
        self.laser.set_auto_dark(on)?;
        self.follow_laser_mode();
        Ok(())
    }

    pub fn set_auto_raman(&mut self, on: bool) -> Result<(), DeviceError> {
        self.laser.set_auto_raman(on)?;
        self.follow_laser_mode();
        Ok(())
    }

    fn follow_laser_mode(&mut self) {
        let mode = match self.laser.state().mode {
            LaserMode::Manual => AcquisitionMode::Standard,
            LaserMode::AutoDark => AcquisitionMode::AutoDark,
            LaserMode::AutoRaman => AcquisitionMode::AutoRaman,
        };
        self.params.set_acquisition_mode(mode);
    }

    fn emit(&self, ev: AcquisitionEvent) {
        if let Some(tx) = &self.events
            && tx.try_send(ev).is_err()
        {
            tracing::trace!("event sink full or closed; dropping event");
        }
    }

    fn transition(&mut self, to: AcquisitionState) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        debug!(?from, ?to, "acquisition state");
        self.emit(AcquisitionEvent::StateChanged { from, to });
    }

    fn cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|c| c())
    }

    fn software_raman(&self) -> bool {
        self.laser.compat() == TransportCompatibilityMode::SoftwareRaman
    }

    /// Firmware handles dark/laser cycling and averaging itself.
    fn firmware_auto(&self) -> bool {
        !self.software_raman() && self.params.state().acquisition_mode.is_auto()
    }

    fn fail(&mut self, err: DeviceError, context: &'static str) -> Report {
        if matches!(err, DeviceError::Cancelled) || (self.software_raman() && self.laser.state().enabled) {
            self.laser.disable_best_effort();
        }
        warn!(error = %err, context, "acquisition failed");
        self.transition(AcquisitionState::Failed);
        Report::new(err).wrap_err(context)
    }

    /// Run one complete measurement. The buffer is discarded on any failure,
    /// so callers never see a partial spectrum.
    pub fn acquire(&mut self) -> CoreResult<Measurement> {
        let started = self.clock.now();
        if self.state.is_terminal() {
            self.transition(AcquisitionState::Idle);
        }

        self.transition(AcquisitionState::PreparingParams);
        if let Err(e) = self.params.sync_all() {
            return Err(self.fail(e, "preparing acquisition parameters"));
        }

        if self.software_raman() && self.laser.state().mode == LaserMode::AutoDark {
            self.transition(AcquisitionState::LaserWarmup);
            if let Err(e) = self.warm_up() {
                return Err(self.fail(e, "laser warmup"));
            }
        }

        self.transition(AcquisitionState::Acquiring);
        let scans = self.params.state().scans_to_average.desired();
        let exposures = if self.firmware_auto() { 1 } else { scans.max(1) };
        let n = self.descriptor.pixel_count as usize;
        let mut sum = vec![0.0_f64; n];
        for exposure in 1..=exposures {
            if self.cancelled() {
                return Err(self.fail(DeviceError::Cancelled, "acquisition cancelled"));
            }
            let spectrum = match self.read_exposure(exposure) {
                Ok(s) => s,
                Err(e) => return Err(self.fail(e, "reading spectrum")),
            };
            if spectrum.len() != n {
                let e = DeviceError::ProtocolViolation(format!(
                    "exposure {exposure} has {} pixels, expected {n}",
                    spectrum.len()
                ));
                return Err(self.fail(e, "averaging exposures"));
            }
            for (acc, px) in sum.iter_mut().zip(spectrum) {
                *acc += f64::from(px);
            }
        }

        let laser_enabled = self.laser.state().enabled;
        if self.software_raman() && laser_enabled {
            self.laser.disable_best_effort();
        }

        self.transition(AcquisitionState::PostProcessing);
        let divisor = f64::from(exposures);
        sum.iter_mut().for_each(|v| *v /= divisor);
        postprocess::apply(&mut sum, &self.descriptor);

        let st = self.params.state();
        let mut measurement = Measurement {
            pixels: sum,
            integration_time_ms: st.integration_time_ms.desired(),
            gain_db: st.gain_db.desired(),
            exposures,
            scans_to_average: scans,
            mode: st.acquisition_mode,
            laser_enabled,
            elapsed_ms: 0,
        };
        let hooked = match self.post.as_mut() {
            Some(hook) => hook.process(&mut measurement),
            None => Ok(()),
        };
        if let Err(e) = hooked {
            warn!(error = %e, "post-processing hook failed");
            self.transition(AcquisitionState::Failed);
            return Err(e.wrap_err("post-processing hook"));
        }
        measurement.elapsed_ms = self.clock.ms_since(started);
        self.transition(AcquisitionState::Complete);
        info!(
            exposures,
            pixels = measurement.pixels.len(),
            elapsed_ms = measurement.elapsed_ms,
            "acquisition complete"
        );
        Ok(measurement)
    }

    /// Fire with a watchdog sized to the exposure, then wait out the start-up delay.
    fn warm_up(&mut self) -> Result<(), DeviceError> {
        let st = self.params.state();
        let watchdog = safe_watchdog_sec(
            st.integration_time_ms.desired(),
            st.scans_to_average.desired(),
            self.cfg.laser.min_readout_ms,
        );
        let resume_sync = self.laser.stage_ignition(watchdog)?;
        let delay_ms = match self.laser.refresh() {
            Ok(s) => {
                if !s.laser_active {
                    warn!(interlock_closed = s.interlock_closed, "laser not active after ignition");
                }
                s.laser_delay_ms
            }
            Err(e) => {
                warn!(error = %e, "laser state unreadable after ignition; using last known delay");
                self.laser.state().laser_delay_ms
            }
        };
        debug!(watchdog, delay_ms, "laser warmup");
        self.clock.sleep(Duration::from_millis(u64::from(delay_ms)));
        self.laser.set_auto_sync(resume_sync);
        Ok(())
    }

    /// Post-trigger wait before the first packet request.
    fn exposure_wait_ms(&self) -> u64 {
        let st = self.params.state();
        let integ = u64::from(st.integration_time_ms.desired());
        if self.firmware_auto() {
            let scans = u64::from(st.scans_to_average.desired());
            2 * integ * scans
                + secs_to_ms(self.cfg.acquisition.warning_delay_sec)
                + secs_to_ms(u32::from(self.descriptor.laser_warmup_sec))
        } else {
            integ
        }
    }

    fn wire_acquisition_mode(&self) -> u8 {
        if self.software_raman() {
            AcquisitionMode::Standard.wire_byte()
        } else {
            self.params.state().acquisition_mode.wire_byte()
        }
    }

    fn read_exposure(&self, exposure: u8) -> Result<Vec<u16>, DeviceError> {
        {
            let _gate = self.link.lock("acquire command")?;
            self.link
                .write(channels::ACQUIRE_SPECTRUM, &[self.wire_acquisition_mode()])?;
        }
        self.clock.sleep(Duration::from_millis(self.exposure_wait_ms()));

        let n = self.descriptor.pixel_count as usize;
        let integ = self.params.state().integration_time_ms.desired();
        let policy = &self.cfg.retry;
        let mut buf = vec![0u16; n];
        let mut read = 0usize;
        let mut retries = 0u32;
        let mut last_crc = None;

        while read < n {
            if self.cancelled() {
                return Err(DeviceError::Cancelled);
            }
            let start = read as u16;
            let result = self.request_packet(start, last_crc).and_then(|p| {
                if p.pixels.is_empty() {
                    Err(DeviceError::ProtocolViolation(format!("empty packet at pixel {start}")))
                } else {
                    Ok(p)
                }
            });
            match result {
                Ok(packet) => {
                    let take = packet.pixels.len().min(n - read);
                    buf[read..read + take].copy_from_slice(&packet.pixels[..take]);
                    read += take;
                    last_crc = Some(packet.crc);
                    retries = 0;
                    self.emit(AcquisitionEvent::Progress {
                        exposure,
                        pixels_read: read,
                        pixels_expected: n,
                    });
                }
                Err(e) if e.is_retryable() => {
                    retries += 1;
                    if retries >= policy.max_retries {
                        warn!(start, retries, error = %e, "packet retries exhausted");
                        return Err(e);
                    }
                    let wait = policy.backoff_ms(retries, integ);
                    debug!(start, retries, wait_ms = wait, error = %e, "packet retry");
                    self.clock.sleep(Duration::from_millis(wait));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(buf)
    }

    /// One gate-held request/read pair.
    fn request_packet(&self, start: u16, last_crc: Option<u16>) -> Result<Packet, DeviceError> {
        let resp = {
            let _gate = self.link.lock("spectrum packet")?;
            self.link.write(
                channels::SPECTRUM_REQUEST,
                &codec::u16_bytes(start, Endian::Little),
            )?;
            self.link.read(channels::READ_SPECTRUM)?
        };
        decode_packet(&resp, start, last_crc)
    }
}
