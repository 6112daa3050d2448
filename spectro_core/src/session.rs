//! Owned device handle and its type-state builder.
//!
//! `DeviceSession::builder()` only offers `connect()` once a transport has
//! been supplied; `try_connect()` is available in any state for dynamic
//! callers. Connecting reads and parses the EEPROM, so a session always
//! carries a complete descriptor.

use std::marker::PhantomData;
use std::sync::Arc;

use crossbeam_channel as xch;
use eyre::WrapErr;
use spectro_traits::Transport;
use spectro_traits::clock::{Clock, MonotonicClock};
use tracing::info;

use crate::acquisition::{AcquisitionEngine, CancelCheck, Measurement};
use crate::battery::{self, BatteryStatus};
use crate::config::{DeviceCfg, EngineConfig, Timeouts};
use crate::descriptor::DeviceDescriptor;
use crate::eeprom;
use crate::error::{BuildError, DeviceError, Report, Result};
use crate::link::DeviceLink;
use crate::params::{AutoRamanParams, SyncOutcome};
use crate::postprocess::PostProcessor;
use crate::status::AcquisitionEvent;

/// A connected spectrometer.
pub struct DeviceSession {
    link: DeviceLink,
    engine: AcquisitionEngine,
    device: DeviceCfg,
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("engine", &self.engine)
            .field("device", &self.device)
            .finish_non_exhaustive()
    }
}

fn typed(e: DeviceError) -> Report {
    Report::new(e)
}

fn load_descriptor(link: &DeviceLink, device: &DeviceCfg) -> Result<DeviceDescriptor> {
    let pages = eeprom::read_pages(link, device.eeprom_protocol)
        .map_err(typed)
        .wrap_err("reading EEPROM")?;
    let descriptor = DeviceDescriptor::parse(&pages)
        .map_err(|e| typed(DeviceError::CalibrationCorrupt(e)))
        .wrap_err("parsing EEPROM")?;
    info!(
        model = %descriptor.model,
        serial = %descriptor.serial_number,
        pixels = descriptor.pixel_count,
        format = descriptor.format_version,
        "device descriptor loaded"
    );
    Ok(descriptor)
}

impl DeviceSession {
    /// Start building a session.
    pub fn builder() -> SessionBuilder<Missing> {
        SessionBuilder::default()
    }

    pub fn descriptor(&self) -> &Arc<DeviceDescriptor> {
        self.engine.descriptor()
    }

    /// Shared link, e.g. for a battery poll on another thread.
    pub fn link(&self) -> &DeviceLink {
        &self.link
    }

    pub fn engine(&self) -> &AcquisitionEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut AcquisitionEngine {
        &mut self.engine
    }

    pub fn acquire(&mut self) -> Result<Measurement> {
        self.engine.acquire()
    }

    /// `Ok(None)` when another transaction holds the gate.
    pub fn poll_battery(&self) -> Result<Option<BatteryStatus>> {
        battery::poll(&self.link)
            .map_err(typed)
            .wrap_err("polling battery")
    }

    /// Re-read the EEPROM and replace the descriptor wholesale. Confirmed
    /// parameter and laser state is discarded, so the next acquisition
    /// rewrites every parameter.
    pub fn reconnect(&mut self) -> Result<()> {
        let descriptor = load_descriptor(&self.link, &self.device).wrap_err("reconnecting")?;
        self.engine.replace_descriptor(Arc::new(descriptor));
        Ok(())
    }

    pub fn set_integration_time_ms(&mut self, ms: u32) -> Result<()> {
        self.engine
            .params_mut()
            .set_integration_time_ms(ms)
            .map_err(typed)
            .wrap_err("setting integration time")
    }

    pub fn set_gain_db(&mut self, db: f32) -> Result<()> {
        self.engine
            .params_mut()
            .set_gain_db(db)
            .map_err(typed)
            .wrap_err("setting gain")
    }

    pub fn set_vertical_roi(&mut self, start: u16, stop: u16) -> Result<()> {
        self.engine
            .params_mut()
            .set_vertical_roi(start, stop)
            .map_err(typed)
            .wrap_err("setting vertical ROI")
    }

    pub fn set_scans_to_average(&mut self, scans: u8) -> Result<()> {
        self.engine
            .params_mut()
            .set_scans_to_average(scans)
            .map_err(typed)
            .wrap_err("setting scans to average")
    }

    pub fn set_auto_dark(&mut self, on: bool) -> Result<()> {
        self.engine
            .set_auto_dark(on)
            .map_err(typed)
            .wrap_err("switching auto-dark")
    }

    pub fn set_auto_raman(&mut self, on: bool) -> Result<()> {
        self.engine
            .set_auto_raman(on)
            .map_err(typed)
            .wrap_err("switching auto-Raman")
    }

    pub fn set_laser_enabled(&mut self, on: bool) -> Result<()> {
        self.engine
            .laser_mut()
            .set_enabled(on)
            .map_err(typed)
            .wrap_err("switching laser")
    }

    pub fn push_auto_raman_params(&self, params: &AutoRamanParams) -> Result<SyncOutcome> {
        self.engine
            .params()
            .push_auto_raman_params(params)
            .map_err(typed)
            .wrap_err("pushing auto-Raman parameters")
    }
}

// ── Type-state markers ───────────────────────────────────────────────────────

pub struct Missing;
pub struct Set;

/// Builder for `DeviceSession`.
pub struct SessionBuilder<T> {
    transport: Option<Arc<dyn Transport>>,
    clock: Option<Arc<dyn Clock + Send + Sync>>,
    engine: Option<EngineConfig>,
    device: Option<DeviceCfg>,
    timeouts: Option<Timeouts>,
    cancel: Option<CancelCheck>,
    events: Option<xch::Sender<AcquisitionEvent>>,
    post: Option<Box<dyn PostProcessor>>,
    _t: PhantomData<T>,
}

impl Default for SessionBuilder<Missing> {
    fn default() -> Self {
        Self {
            transport: None,
            clock: None,
            engine: None,
            device: None,
            timeouts: None,
            cancel: None,
            events: None,
            post: None,
            _t: PhantomData,
        }
    }
}

fn validate(engine: &EngineConfig, timeouts: &Timeouts) -> std::result::Result<(), BuildError> {
    if timeouts.transport_ms == 0 {
        return Err(BuildError::InvalidConfig("transport_ms must be >= 1"));
    }
    if timeouts.gate_ms == 0 {
        return Err(BuildError::InvalidConfig("gate_ms must be >= 1"));
    }
    if engine.retry.max_retries == 0 {
        return Err(BuildError::InvalidConfig("max_retries must be >= 1"));
    }
    if engine.retry.backoff_base_ms == 0 {
        return Err(BuildError::InvalidConfig("backoff_base_ms must be >= 1"));
    }
    Ok(())
}

impl<T> SessionBuilder<T> {
    /// Fallible connect available in any type-state.
    pub fn try_connect(self) -> Result<DeviceSession> {
        let transport = self
            .transport
            .ok_or_else(|| Report::new(BuildError::MissingTransport))?;
        let engine_cfg = self.engine.unwrap_or_default();
        let timeouts = self.timeouts.unwrap_or_default();
        let device = self.device.unwrap_or_default();
        validate(&engine_cfg, &timeouts).map_err(Report::new)?;

        let clock: Arc<dyn Clock + Send + Sync> = match self.clock {
            Some(c) => c,
            None => Arc::new(MonotonicClock::new()),
        };

        let link = DeviceLink::new(transport, timeouts);
        let descriptor = load_descriptor(&link, &device).wrap_err("connecting")?;
        let mut engine = AcquisitionEngine::new(link.clone(), Arc::new(descriptor), clock, engine_cfg);
        if let Some(c) = self.cancel {
            engine.set_cancel_check(c);
        }
        if let Some(tx) = self.events {
            engine.set_event_sink(tx);
        }
        if let Some(p) = self.post {
            engine.set_post_processor(p);
        }
        Ok(DeviceSession {
            link,
            engine,
            device,
        })
    }

    /// Move every field into a builder of another type-state.
    fn retype<U>(self) -> SessionBuilder<U> {
        SessionBuilder {
            transport: self.transport,
            clock: self.clock,
            engine: self.engine,
            device: self.device,
            timeouts: self.timeouts,
            cancel: self.cancel,
            events: self.events,
            post: self.post,
            _t: PhantomData,
        }
    }
}

/// Chainable setters that do not affect type-state.
impl<T> SessionBuilder<T> {
    pub fn with_engine_config(mut self, cfg: EngineConfig) -> Self {
        self.engine = Some(cfg);
        self
    }
    pub fn with_device_config(mut self, cfg: DeviceCfg) -> Self {
        self.device = Some(cfg);
        self
    }
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = Some(timeouts);
        self
    }
    /// Provide a custom clock; defaults to `MonotonicClock`.
    pub fn with_clock(mut self, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        self.clock = Some(clock);
        self
    }
    pub fn with_cancel_check<F>(mut self, f: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.cancel = Some(Box::new(f));
        self
    }
    pub fn with_event_sink(mut self, tx: xch::Sender<AcquisitionEvent>) -> Self {
        self.events = Some(tx);
        self
    }
    pub fn with_post_processor(mut self, hook: impl PostProcessor + 'static) -> Self {
        self.post = Some(Box::new(hook));
        self
    }
}

impl SessionBuilder<Missing> {
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> SessionBuilder<Set> {
        self.transport = Some(transport);
        self.retype()
    }
}

impl SessionBuilder<Set> {
    /// Read the EEPROM and build the engine.
    pub fn connect(self) -> Result<DeviceSession> {
        self.try_connect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_transport_is_a_build_error() {
        let err = DeviceSession::builder().try_connect().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BuildError>(),
            Some(BuildError::MissingTransport)
        ));
    }

    #[test]
    fn zero_timeouts_rejected() {
        let t = Timeouts {
            transport_ms: 0,
            ..Timeouts::default()
        };
        assert!(validate(&EngineConfig::default(), &t).is_err());
        let mut e = EngineConfig::default();
        e.retry.max_retries = 0;
        assert!(validate(&e, &Timeouts::default()).is_err());
    }
}
