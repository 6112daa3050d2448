//! Desired-vs-confirmed tracking of device parameters and their wire pushes.
//!
//! A setter records the desired value at once. A push writes it only when it
//! differs from the last value the device acknowledged, so repeated syncs
//! cost no transport traffic.

use spectro_traits::channels::{self, opcodes};
use tracing::{debug, info, warn};

use crate::codec::{self, Endian};
use crate::config::SyncCfg;
use crate::descriptor::{DeviceDescriptor, GAIN_DB_RANGE};
use crate::error::DeviceError;
use crate::link::DeviceLink;

pub const MIN_INTEGRATION_MS: u32 = 1;
pub const MAX_INTEGRATION_MS: u32 = 5000;

/// Acquisition flavour sent with each acquire command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AcquisitionMode {
    #[default]
    Standard,
    AutoDark,
    AutoRaman,
}

impl AcquisitionMode {
    pub fn wire_byte(self) -> u8 {
        match self {
            Self::Standard => 0,
            Self::AutoDark => 1,
            Self::AutoRaman => 2,
        }
    }

    /// Whether firmware runs the laser and dark cycle itself.
    pub fn is_auto(self) -> bool {
        !matches!(self, Self::Standard)
    }
}

impl std::str::FromStr for AcquisitionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "standard" => Ok(Self::Standard),
            "autodark" => Ok(Self::AutoDark),
            "autoraman" => Ok(Self::AutoRaman),
            other => Err(format!("unknown acquisition mode '{other}'")),
        }
    }
}

/// How a failed gain write is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LenientMode {
    /// Surface the failure; the value stays unconfirmed.
    #[default]
    Strict,
    /// Some firmware NAKs gain writes it applied anyway; log and confirm.
    TolerateGainWriteFailure,
}

/// Result of one push attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Desired already confirmed; no I/O.
    Unchanged,
    Written,
    /// Gate not acquired in time; value stays pending.
    Busy,
}

/// A parameter's requested value and the last value the device accepted.
#[derive(Debug, Clone, PartialEq)]
pub struct Tracked<T> {
    desired: T,
    confirmed: Option<T>,
}

impl<T: Copy + PartialEq> Tracked<T> {
    pub fn new(desired: T) -> Self {
        Self {
            desired,
            confirmed: None,
        }
    }

    pub fn confirmed_as(value: T) -> Self {
        Self {
            desired: value,
            confirmed: Some(value),
        }
    }

    pub fn desired(&self) -> T {
        self.desired
    }

    pub fn confirmed(&self) -> Option<T> {
        self.confirmed
    }

    pub fn is_synced(&self) -> bool {
        self.confirmed == Some(self.desired)
    }

    pub fn set(&mut self, value: T) {
        self.desired = value;
    }

    fn confirm(&mut self) {
        self.confirmed = Some(self.desired);
    }

    fn invalidate(&mut self) {
        self.confirmed = None;
    }
}

/// Every host-tunable acquisition parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceState {
    pub integration_time_ms: Tracked<u32>,
    pub gain_db: Tracked<f32>,
    pub vertical_roi: Tracked<(u16, u16)>,
    pub scans_to_average: Tracked<u8>,
    pub acquisition_mode: AcquisitionMode,
}

impl DeviceState {
    /// Initial state for a freshly connected device.
    ///
    /// The sensor boots with the EEPROM's first vertical ROI applied, so that
    /// value starts confirmed; everything else is written on first sync.
    pub fn from_descriptor(d: &DeviceDescriptor, mode: AcquisitionMode) -> Self {
        let integration = u32::from(d.startup_integration_time_ms)
            .clamp(MIN_INTEGRATION_MS, MAX_INTEGRATION_MS);
        Self {
            integration_time_ms: Tracked::new(integration),
            gain_db: Tracked::new(d.detector_gain),
            vertical_roi: Tracked::confirmed_as(d.roi_vert[0]),
            scans_to_average: Tracked::new(1),
            acquisition_mode: mode,
        }
    }

    fn invalidate(&mut self) {
        self.integration_time_ms.invalidate();
        self.gain_db.invalidate();
        self.vertical_roi.invalidate();
        self.scans_to_average.invalidate();
    }
}

/// Firmware auto-Raman tuning block pushed under group `0xFF 0xFD`.
#[derive(Debug, Clone, PartialEq)]
pub struct AutoRamanParams {
    pub max_ms: u16,
    pub start_integration_ms: u16,
    pub start_gain_db: u8,
    pub max_integration_ms: u16,
    pub min_integration_ms: u16,
    pub max_gain_db: u8,
    pub min_gain_db: u8,
    pub target_counts: u16,
    pub max_counts: u16,
    pub min_counts: u16,
    pub max_factor: u8,
    pub drop_factor: f32,
    pub saturation_counts: u16,
    pub max_averaging: u8,
}

impl Default for AutoRamanParams {
    fn default() -> Self {
        Self {
            max_ms: 10_000,
            start_integration_ms: 200,
            start_gain_db: 8,
            max_integration_ms: 2000,
            min_integration_ms: 10,
            max_gain_db: 32,
            min_gain_db: 0,
            target_counts: 40_000,
            max_counts: 50_000,
            min_counts: 30_000,
            max_factor: 5,
            drop_factor: 0.5,
            saturation_counts: 65_000,
            max_averaging: 100,
        }
    }
}

impl AutoRamanParams {
    pub fn encode(&self) -> Vec<u8> {
        let be = |v: u16| codec::u16_bytes(v, Endian::Big);
        let mut out = Vec::with_capacity(24);
        out.extend_from_slice(&be(self.max_ms));
        out.extend_from_slice(&be(self.start_integration_ms));
        out.push(self.start_gain_db);
        out.extend_from_slice(&be(self.max_integration_ms));
        out.extend_from_slice(&be(self.min_integration_ms));
        out.push(self.max_gain_db);
        out.push(self.min_gain_db);
        out.extend_from_slice(&be(self.target_counts));
        out.extend_from_slice(&be(self.max_counts));
        out.extend_from_slice(&be(self.min_counts));
        out.push(self.max_factor);
        out.extend_from_slice(&be(codec::encode_fixed_gain(self.drop_factor)));
        out.extend_from_slice(&be(self.saturation_counts));
        out.push(self.max_averaging);
        out
    }
}

/// Owns [`DeviceState`] and pushes it over a [`DeviceLink`].
#[derive(Debug)]
pub struct ParameterSync {
    link: DeviceLink,
    state: DeviceState,
    cfg: SyncCfg,
    vertical_pixels: u16,
}

impl ParameterSync {
    pub fn new(link: DeviceLink, descriptor: &DeviceDescriptor, mode: AcquisitionMode, cfg: SyncCfg) -> Self {
        Self {
            link,
            state: DeviceState::from_descriptor(descriptor, mode),
            cfg,
            vertical_pixels: descriptor.vertical_pixels,
        }
    }

    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    pub fn auto_sync(&self) -> bool {
        self.cfg.auto_sync
    }

    pub fn set_auto_sync(&mut self, on: bool) {
        self.cfg.auto_sync = on;
    }

    /// Adopt a new descriptor after reconnect; every value becomes unconfirmed.
    pub fn reset(&mut self, descriptor: &DeviceDescriptor) {
        let mode = self.state.acquisition_mode;
        self.state = DeviceState::from_descriptor(descriptor, mode);
        self.state.invalidate();
        self.vertical_pixels = descriptor.vertical_pixels;
    }

    fn after_set(&self, name: &'static str, outcome: Result<SyncOutcome, DeviceError>) -> Result<(), DeviceError> {
        match outcome? {
            SyncOutcome::Busy => {
                info!(param = name, "gate busy; value left pending for next sync");
            }
            o => debug!(param = name, outcome = ?o, "auto-sync"),
        }
        Ok(())
    }

    /// Clamped to `[1, 5000]` ms.
    pub fn set_integration_time_ms(&mut self, ms: u32) -> Result<(), DeviceError> {
        let clamped = ms.clamp(MIN_INTEGRATION_MS, MAX_INTEGRATION_MS);
        if clamped != ms {
            warn!(requested = ms, applied = clamped, "integration time clamped");
        }
        self.state.integration_time_ms.set(clamped);
        if self.cfg.auto_sync {
            let o = self.push_integration_time();
            return self.after_set("integration_time_ms", o);
        }
        Ok(())
    }

    /// Rejected outside `[0, 72]` dB; the desired value is left untouched.
    pub fn set_gain_db(&mut self, db: f32) -> Result<(), DeviceError> {
        if !GAIN_DB_RANGE.contains(&db) {
            return Err(DeviceError::ParameterOutOfRange(format!(
                "gain {db} dB outside [{}, {}]",
                GAIN_DB_RANGE.start(),
                GAIN_DB_RANGE.end()
            )));
        }
        self.state.gain_db.set(db);
        if self.cfg.auto_sync {
            let o = self.push_gain();
            return self.after_set("gain_db", o);
        }
        Ok(())
    }

    /// Bounds are swapped when given in reverse; each must lie below the
    /// sensor's vertical pixel count.
    pub fn set_vertical_roi(&mut self, start: u16, stop: u16) -> Result<(), DeviceError> {
        let (start, stop) = if stop < start { (stop, start) } else { (start, stop) };
        if stop >= self.vertical_pixels {
            return Err(DeviceError::ParameterOutOfRange(format!(
                "vertical ROI ({start}, {stop}) exceeds {} sensor rows",
                self.vertical_pixels
            )));
        }
        self.state.vertical_roi.set((start, stop));
        if self.cfg.auto_sync {
            let o = self.push_roi();
            return self.after_set("vertical_roi", o);
        }
        Ok(())
    }

    pub fn set_scans_to_average(&mut self, scans: u8) -> Result<(), DeviceError> {
        if scans == 0 {
            return Err(DeviceError::ParameterOutOfRange(
                "scans to average must be at least 1".into(),
            ));
        }
        self.state.scans_to_average.set(scans);
        if self.cfg.auto_sync {
            let o = self.push_scans_to_average();
            return self.after_set("scans_to_average", o);
        }
        Ok(())
    }

    /// Local only; travels with each acquire command.
    pub fn set_acquisition_mode(&mut self, mode: AcquisitionMode) {
        self.state.acquisition_mode = mode;
    }

    pub fn push_integration_time(&mut self) -> Result<SyncOutcome, DeviceError> {
        let t = &self.state.integration_time_ms;
        if t.is_synced() {
            return Ok(SyncOutcome::Unchanged);
        }
        let Some(_gate) = self.link.try_lock() else {
            return Ok(SyncOutcome::Busy);
        };
        let bytes = codec::u32_bytes(t.desired(), Endian::Big);
        self.link.write(channels::INTEGRATION_TIME_MS, &bytes)?;
        self.state.integration_time_ms.confirm();
        debug!(ms = self.state.integration_time_ms.desired(), "integration time confirmed");
        Ok(SyncOutcome::Written)
    }

    pub fn push_gain(&mut self) -> Result<SyncOutcome, DeviceError> {
        let g = &self.state.gain_db;
        if g.is_synced() {
            return Ok(SyncOutcome::Unchanged);
        }
        let Some(_gate) = self.link.try_lock() else {
            return Ok(SyncOutcome::Busy);
        };
        let raw = codec::encode_fixed_gain(g.desired());
        let bytes = codec::u16_bytes(raw, Endian::Big);
        match self.link.write(channels::GAIN_DB, &bytes) {
            Ok(()) => {}
            Err(e) if self.cfg.lenient == LenientMode::TolerateGainWriteFailure => {
                warn!(error = %e, "gain write failed; treating as applied");
            }
            Err(e) => return Err(e),
        }
        self.state.gain_db.confirm();
        debug!(db = self.state.gain_db.desired(), raw, "gain confirmed");
        Ok(SyncOutcome::Written)
    }

    /// Start and stop go out under one gate hold.
    pub fn push_roi(&mut self) -> Result<SyncOutcome, DeviceError> {
        let r = &self.state.vertical_roi;
        if r.is_synced() {
            return Ok(SyncOutcome::Unchanged);
        }
        let (start, stop) = r.desired();
        let Some(_gate) = self.link.try_lock() else {
            return Ok(SyncOutcome::Busy);
        };
        self.link
            .generic_send(opcodes::SET_ROI_START, &codec::u16_bytes(start, Endian::Big))?;
        self.link
            .generic_send(opcodes::SET_ROI_STOP, &codec::u16_bytes(stop, Endian::Big))?;
        self.state.vertical_roi.confirm();
        debug!(start, stop, "vertical ROI confirmed");
        Ok(SyncOutcome::Written)
    }

    pub fn push_scans_to_average(&mut self) -> Result<SyncOutcome, DeviceError> {
        let s = &self.state.scans_to_average;
        if s.is_synced() {
            return Ok(SyncOutcome::Unchanged);
        }
        let scans = s.desired();
        let Some(_gate) = self.link.try_lock() else {
            return Ok(SyncOutcome::Busy);
        };
        self.link.generic_send(opcodes::SET_SCANS_TO_AVERAGE, &[scans])?;
        self.state.scans_to_average.confirm();
        debug!(scans, "scans to average confirmed");
        Ok(SyncOutcome::Written)
    }

    /// Push every pending parameter. Any busy gate aborts with `GateBusy`.
    pub fn sync_all(&mut self) -> Result<(), DeviceError> {
        let steps: [(&'static str, fn(&mut Self) -> Result<SyncOutcome, DeviceError>); 4] = [
            ("integration time sync", Self::push_integration_time),
            ("gain sync", Self::push_gain),
            ("vertical ROI sync", Self::push_roi),
            ("scans-to-average sync", Self::push_scans_to_average),
        ];
        for (op, push) in steps {
            if push(self)? == SyncOutcome::Busy {
                return Err(DeviceError::GateBusy(op));
            }
        }
        Ok(())
    }

    /// Send the auto-Raman tuning block and wait for the device ack.
    pub fn push_auto_raman_params(&self, params: &AutoRamanParams) -> Result<SyncOutcome, DeviceError> {
        let Some(_gate) = self.link.try_lock() else {
            return Ok(SyncOutcome::Busy);
        };
        let ack = self
            .link
            .generic_request(opcodes::AUTO_RAMAN_PARAMS, &params.encode())?;
        match ack.first() {
            Some(&code) if code != 0 => Err(DeviceError::DeviceRejected(code)),
            _ => Ok(SyncOutcome::Written),
        }
    }
}
