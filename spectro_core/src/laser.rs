//! Laser safety state machine.
//!
//! Local state is only replaced by a fully valid device frame; a frame
//! failing any field check is dropped whole. Entering an auto mode always
//! passes through `enabled = false` so a mode change can never fire the beam.

use spectro_traits::channels;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::DeviceError;
use crate::link::DeviceLink;
use crate::params::SyncOutcome;

/// Readout floor used in watchdog sizing (ms).
pub const MIN_READOUT_MS: u32 = 100;
pub const WATCHDOG_MIN_SEC: u8 = 1;
/// 0xFF is reserved on the wire.
pub const WATCHDOG_MAX_SEC: u8 = 254;
pub const DEFAULT_WATCHDOG_SEC: u8 = 10;
pub const OUTBOUND_FRAME_LEN: usize = 4;
pub const INBOUND_FRAME_LEN: usize = 7;

const STATUS_INTERLOCK_CLOSED: u8 = 1 << 0;
const STATUS_LASER_ACTIVE: u8 = 1 << 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LaserMode {
    #[default]
    Manual,
    AutoDark,
    AutoRaman,
}

impl LaserMode {
    pub fn wire_byte(self) -> u8 {
        match self {
            Self::Manual => 0,
            Self::AutoDark => 1,
            Self::AutoRaman => 2,
        }
    }

    /// Decode, honouring how many modes the firmware supports.
    pub fn from_wire(byte: u8, max_modes: u8) -> Option<Self> {
        if byte >= max_modes {
            return None;
        }
        match byte {
            0 => Some(Self::Manual),
            1 => Some(Self::AutoDark),
            2 => Some(Self::AutoRaman),
            _ => None,
        }
    }

    pub fn is_auto(self) -> bool {
        !matches!(self, Self::Manual)
    }
}

/// Firmware generation the host is talking to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportCompatibilityMode {
    /// Firmware implements auto-dark and auto-Raman itself.
    #[default]
    Native,
    /// Legacy firmware without a Raman mode; the host pulses the laser
    /// around each exposure and reports auto modes as Manual on the wire.
    SoftwareRaman,
}

impl TransportCompatibilityMode {
    pub fn max_modes(self) -> u8 {
        match self {
            Self::Native => 3,
            Self::SoftwareRaman => 2,
        }
    }
}

impl std::str::FromStr for TransportCompatibilityMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "native" => Ok(Self::Native),
            "softwareraman" => Ok(Self::SoftwareRaman),
            other => Err(format!("unknown compatibility mode '{other}'")),
        }
    }
}

/// Why an inbound laser frame was dropped.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LaserFrameError {
    #[error("laser frame is {0} bytes, expected {INBOUND_FRAME_LEN}")]
    Length(usize),
    #[error("laser mode {mode} not below firmware limit {max}")]
    Mode { mode: u8, max: u8 },
    #[error("laser enabled byte {0} is not 0 or 1")]
    Enabled(u8),
    #[error("laser watchdog 0xFF is reserved")]
    Watchdog,
}

impl From<LaserFrameError> for DeviceError {
    fn from(e: LaserFrameError) -> Self {
        DeviceError::ProtocolViolation(e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaserState {
    pub mode: LaserMode,
    pub laser_type: u8,
    pub enabled: bool,
    pub watchdog_sec: u8,
    pub laser_delay_ms: u16,
    pub interlock_closed: bool,
    pub laser_active: bool,
}

impl Default for LaserState {
    fn default() -> Self {
        Self {
            mode: LaserMode::Manual,
            laser_type: 0,
            enabled: false,
            watchdog_sec: DEFAULT_WATCHDOG_SEC,
            laser_delay_ms: 0,
            interlock_closed: false,
            laser_active: false,
        }
    }
}

impl LaserState {
    /// `{mode, type, enabled, watchdog_sec}`.
    pub fn to_frame(&self, compat: TransportCompatibilityMode) -> [u8; OUTBOUND_FRAME_LEN] {
        let mode = match compat {
            TransportCompatibilityMode::SoftwareRaman => LaserMode::Manual,
            TransportCompatibilityMode::Native => self.mode,
        };
        [
            mode.wire_byte(),
            self.laser_type,
            u8::from(self.enabled),
            self.watchdog_sec,
        ]
    }

    /// State after applying a device report, or why the report was dropped.
    /// `self` is never modified.
    pub fn with_frame(
        &self,
        frame: &[u8],
        compat: TransportCompatibilityMode,
    ) -> Result<Self, LaserFrameError> {
        let &[mode, laser_type, enabled, watchdog, delay_hi, delay_lo, status] = frame else {
            return Err(LaserFrameError::Length(frame.len()));
        };
        let max = compat.max_modes();
        let reported = LaserMode::from_wire(mode, max).ok_or(LaserFrameError::Mode { mode, max })?;
        let enabled = match enabled {
            0 => false,
            1 => true,
            other => return Err(LaserFrameError::Enabled(other)),
        };
        if watchdog == 0xFF {
            return Err(LaserFrameError::Watchdog);
        }
        let laser_active = status & STATUS_LASER_ACTIVE != 0;
        // Legacy firmware reports Manual while the host runs an auto mode.
        let mode = if compat == TransportCompatibilityMode::SoftwareRaman
            && reported == LaserMode::Manual
            && self.mode.is_auto()
        {
            self.mode
        } else {
            reported
        };
        Ok(Self {
            mode,
            laser_type,
            enabled: enabled && laser_active,
            watchdog_sec: watchdog,
            laser_delay_ms: u16::from_be_bytes([delay_hi, delay_lo]),
            interlock_closed: status & STATUS_INTERLOCK_CLOSED != 0,
            laser_active,
        })
    }
}

/// Watchdog (s) long enough to cover `scans + 1` exposures plus readout,
/// doubled, clamped to `[1, 254]`.
pub fn safe_watchdog_sec(integration_ms: u32, scans: u8, min_readout_ms: u32) -> u8 {
    let per_run = u64::from(scans)
        .saturating_add(1)
        .saturating_mul(u64::from(integration_ms))
        .saturating_add(u64::from(min_readout_ms));
    let budget_ms = per_run.max(u64::from(min_readout_ms)).saturating_mul(2);
    let secs = budget_ms.div_ceil(1000);
    secs.clamp(u64::from(WATCHDOG_MIN_SEC), u64::from(WATCHDOG_MAX_SEC)) as u8
}

/// Owns the host view of the laser and pushes it over a [`DeviceLink`].
#[derive(Debug)]
pub struct LaserController {
    link: DeviceLink,
    state: LaserState,
    compat: TransportCompatibilityMode,
    auto_sync: bool,
    has_laser: bool,
    want_auto_dark: bool,
    want_auto_raman: bool,
}

impl LaserController {
    pub fn new(link: DeviceLink, compat: TransportCompatibilityMode, has_laser: bool) -> Self {
        Self {
            link,
            state: LaserState::default(),
            compat,
            auto_sync: true,
            has_laser,
            want_auto_dark: false,
            want_auto_raman: false,
        }
    }

    pub fn state(&self) -> &LaserState {
        &self.state
    }

    pub fn compat(&self) -> TransportCompatibilityMode {
        self.compat
    }

    pub fn auto_sync(&self) -> bool {
        self.auto_sync
    }

    pub fn set_auto_sync(&mut self, on: bool) {
        self.auto_sync = on;
    }

    fn maybe_push(&mut self) -> Result<(), DeviceError> {
        if !self.auto_sync {
            return Ok(());
        }
        if self.push()? == SyncOutcome::Busy {
            info!("gate busy; laser frame left pending");
        }
        Ok(())
    }

    pub fn set_enabled(&mut self, on: bool) -> Result<(), DeviceError> {
        if on && !self.has_laser {
            return Err(DeviceError::State("device has no laser".into()));
        }
        self.state.enabled = on;
        self.maybe_push()
    }

    /// Clamped to `[1, 254]`.
    pub fn set_watchdog_sec(&mut self, secs: u8) -> Result<(), DeviceError> {
        self.state.watchdog_sec = secs.clamp(WATCHDOG_MIN_SEC, WATCHDOG_MAX_SEC);
        self.maybe_push()
    }

    pub fn set_auto_dark(&mut self, on: bool) -> Result<(), DeviceError> {
        self.want_auto_dark = on;
        self.switch_mode(on, LaserMode::AutoDark, self.want_auto_raman, LaserMode::AutoRaman)
    }

    pub fn set_auto_raman(&mut self, on: bool) -> Result<(), DeviceError> {
        self.want_auto_raman = on;
        self.switch_mode(on, LaserMode::AutoRaman, self.want_auto_dark, LaserMode::AutoDark)
    }

    fn switch_mode(
        &mut self,
        on: bool,
        target: LaserMode,
        other_wanted: bool,
        other: LaserMode,
    ) -> Result<(), DeviceError> {
        let next = match (on, other_wanted) {
            (true, _) => target,
            (false, true) => other,
            (false, false) => LaserMode::Manual,
        };
        if next.is_auto() {
            self.state.enabled = false;
        }
        self.state.mode = next;
        debug!(mode = ?next, "laser mode change");
        // Mode changes are asserted even with auto-sync off.
        match self.push()? {
            SyncOutcome::Busy => Err(DeviceError::GateBusy("laser mode change")),
            _ => Ok(()),
        }
    }

    /// Write the current frame under the gate.
    pub fn push(&mut self) -> Result<SyncOutcome, DeviceError> {
        let Some(_gate) = self.link.try_lock() else {
            return Ok(SyncOutcome::Busy);
        };
        let frame = self.state.to_frame(self.compat);
        self.link.write(channels::LASER_STATE, &frame)?;
        debug!(?frame, "laser frame written");
        Ok(SyncOutcome::Written)
    }

    /// Read the device report and adopt it if valid. An invalid frame leaves
    /// the held state untouched and is reported as a protocol violation.
    pub fn refresh(&mut self) -> Result<LaserState, DeviceError> {
        let frame = {
            let _gate = self.link.lock("laser state read")?;
            self.link.read(channels::LASER_STATE)?
        };
        match self.state.with_frame(&frame, self.compat) {
            Ok(next) => {
                if self.state.enabled && !next.enabled {
                    info!(interlock_closed = next.interlock_closed, "device reports laser inactive");
                }
                self.state = next;
                Ok(next)
            }
            Err(e) => {
                warn!(error = %e, ?frame, "laser frame rejected; keeping previous state");
                Err(e.into())
            }
        }
    }

    /// Arm the watchdog and fire with a single write. Auto-sync is left off
    /// on success; the previous flag is returned for the caller to restore
    /// once the laser has settled.
    pub fn stage_ignition(&mut self, watchdog_sec: u8) -> Result<bool, DeviceError> {
        let was = self.auto_sync;
        self.auto_sync = false;
        if let Err(e) = self.stage(watchdog_sec) {
            self.auto_sync = was;
            return Err(e);
        }
        Ok(was)
    }

    fn stage(&mut self, watchdog_sec: u8) -> Result<(), DeviceError> {
        self.set_watchdog_sec(watchdog_sec)?;
        self.set_enabled(true)?;
        match self.push()? {
            SyncOutcome::Busy => Err(DeviceError::GateBusy("laser ignition")),
            _ => Ok(()),
        }
    }

    /// Turn the beam off, logging rather than propagating failures.
    pub fn disable_best_effort(&mut self) {
        self.state.enabled = false;
        match self.push() {
            Ok(SyncOutcome::Written) => debug!("laser disabled"),
            Ok(other) => warn!(outcome = ?other, "laser disable not written"),
            Err(e) => warn!(error = %e, "laser disable failed"),
        }
    }

    /// Forget device-reported state after reconnect.
    pub fn reset(&mut self, has_laser: bool) {
        self.state = LaserState::default();
        self.has_laser = has_laser;
        self.want_auto_dark = false;
        self.want_auto_raman = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const NATIVE: TransportCompatibilityMode = TransportCompatibilityMode::Native;
    const SOFT: TransportCompatibilityMode = TransportCompatibilityMode::SoftwareRaman;

    #[rstest]
    #[case(&[0, 0, 1, 10, 0, 0], LaserFrameError::Length(6))]
    #[case(&[3, 0, 1, 10, 0, 0, 3], LaserFrameError::Mode { mode: 3, max: 3 })]
    #[case(&[0, 0, 2, 10, 0, 0, 3], LaserFrameError::Enabled(2))]
    #[case(&[0, 0, 1, 0xFF, 0, 0, 3], LaserFrameError::Watchdog)]
    fn invalid_frames_are_rejected_whole(#[case] frame: &[u8], #[case] want: LaserFrameError) {
        let prior = LaserState {
            watchdog_sec: 30,
            ..LaserState::default()
        };
        assert_eq!(prior.with_frame(frame, NATIVE), Err(want));
        assert_eq!(prior.watchdog_sec, 30);
    }

    #[test]
    fn legacy_firmware_rejects_mode_two() {
        let err = LaserState::default()
            .with_frame(&[2, 0, 0, 10, 0, 0, 1], SOFT)
            .unwrap_err();
        assert_eq!(err, LaserFrameError::Mode { mode: 2, max: 2 });
    }

    #[test]
    fn inactive_laser_forces_disabled() {
        let s = LaserState::default()
            .with_frame(&[0, 0, 1, 10, 0x01, 0xF4, 0b01], NATIVE)
            .unwrap();
        assert!(!s.enabled);
        assert!(s.interlock_closed);
        assert_eq!(s.laser_delay_ms, 500);
        let s = s.with_frame(&[0, 0, 1, 10, 0, 0, 0b11], NATIVE).unwrap();
        assert!(s.enabled && s.laser_active);
    }

    #[test]
    fn software_raman_keeps_local_auto_mode() {
        let local = LaserState {
            mode: LaserMode::AutoDark,
            ..LaserState::default()
        };
        let s = local.with_frame(&[0, 0, 0, 10, 0, 0, 1], SOFT).unwrap();
        assert_eq!(s.mode, LaserMode::AutoDark);
        let s = local.with_frame(&[0, 0, 0, 10, 0, 0, 1], NATIVE).unwrap();
        assert_eq!(s.mode, LaserMode::Manual);
    }

    #[test]
    fn software_raman_sends_auto_modes_as_manual() {
        let s = LaserState {
            mode: LaserMode::AutoRaman,
            enabled: true,
            watchdog_sec: 9,
            ..LaserState::default()
        };
        assert_eq!(s.to_frame(SOFT), [0, 0, 1, 9]);
        assert_eq!(s.to_frame(NATIVE), [2, 0, 1, 9]);
    }

    #[rstest]
    #[case(100, 1, MIN_READOUT_MS, 1)]
    #[case(1000, 1, MIN_READOUT_MS, 5)]
    #[case(5000, 9, MIN_READOUT_MS, 101)]
    #[case(5000, 255, MIN_READOUT_MS, 254)]
    #[case(0, 0, 0, 1)]
    fn watchdog_sizing(#[case] integ: u32, #[case] scans: u8, #[case] readout: u32, #[case] want: u8) {
        assert_eq!(safe_watchdog_sec(integ, scans, readout), want);
    }
}
