//! Shared handle to a device: transport, transaction gate, generic channel.
//!
//! Cloning a `DeviceLink` shares all three, so a background poll and the
//! acquisition worker serialize on the same gate and sequence counter.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use spectro_traits::{StatusCode, Transport};

use crate::config::Timeouts;
use crate::error::DeviceError;
use crate::gate::{GateGuard, TransactionGate};
use crate::generic::{GenericChannel, GroupCode};
use crate::hw_error::{map_transport_error, map_write_status};

#[derive(Clone)]
pub struct DeviceLink {
    transport: Arc<dyn Transport>,
    gate: TransactionGate,
    generic: Arc<Mutex<GenericChannel>>,
    timeouts: Timeouts,
}

impl std::fmt::Debug for DeviceLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceLink")
            .field("gate_available", &self.gate.is_available())
            .field("timeouts", &self.timeouts)
            .finish_non_exhaustive()
    }
}

impl DeviceLink {
    pub fn new(transport: Arc<dyn Transport>, timeouts: Timeouts) -> Self {
        Self {
            transport,
            gate: TransactionGate::new(),
            generic: Arc::new(Mutex::new(GenericChannel::new())),
            timeouts,
        }
    }

    pub fn gate(&self) -> &TransactionGate {
        &self.gate
    }

    pub fn timeouts(&self) -> &Timeouts {
        &self.timeouts
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    /// Bounded wait for the gate; `None` when busy.
    pub fn try_lock(&self) -> Option<GateGuard> {
        self.gate.try_acquire(self.timeouts.gate())
    }

    /// As [`try_lock`](Self::try_lock) but busy becomes `GateBusy(op)`.
    pub fn lock(&self, op: &'static str) -> Result<GateGuard, DeviceError> {
        self.try_lock().ok_or(DeviceError::GateBusy(op))
    }

    /// Raw write returning the device status. The caller holds the gate.
    pub fn write_status(&self, channel: &str, bytes: &[u8]) -> Result<StatusCode, DeviceError> {
        self.transport
            .write(channel, bytes, self.timeouts.transport())
            .map_err(|e| map_transport_error(e.as_ref()))
    }

    /// Write that must complete with `Success`. The caller holds the gate.
    pub fn write(&self, channel: &str, bytes: &[u8]) -> Result<(), DeviceError> {
        let status = self.write_status(channel, bytes)?;
        map_write_status(channel, status)
    }

    /// Read one response. The caller holds the gate.
    pub fn read(&self, channel: &str) -> Result<Vec<u8>, DeviceError> {
        self.transport
            .read(channel, self.timeouts.transport())
            .map_err(|e| map_transport_error(e.as_ref()))
    }

    fn generic(&self) -> MutexGuard<'_, GenericChannel> {
        self.generic.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sequenced write on the generic channel. The caller holds the gate.
    pub fn generic_send(&self, group: GroupCode, payload: &[u8]) -> Result<(), DeviceError> {
        self.generic()
            .send(self.transport(), group, payload, self.timeouts.transport())
    }

    /// Sequenced request/response on the generic channel. The caller holds the gate.
    pub fn generic_request(&self, group: GroupCode, payload: &[u8]) -> Result<Vec<u8>, DeviceError> {
        self.generic()
            .request(self.transport(), group, payload, self.timeouts.transport())
    }
}
