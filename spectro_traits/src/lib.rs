pub mod channels;
pub mod clock;

pub use clock::{Clock, ManualClock, MonotonicClock};

use std::time::Duration;

/// Boxed error crossing the transport boundary.
pub type TransportError = Box<dyn std::error::Error + Send + Sync>;

/// Completion status reported by the transport for a write.
///
/// Mirrors what BLE GATT and USB control transfers report: the write either
/// landed or the peer refused it with a reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Success,
    Unreachable,
    ProtocolError(u8),
    AccessDenied,
}

impl StatusCode {
    #[inline]
    pub fn is_success(self) -> bool {
        matches!(self, StatusCode::Success)
    }
}

/// Physical request/response primitive (BLE characteristic or USB endpoint).
///
/// Logical channels are addressed by string key, e.g. `"integrationTimeMS"`
/// or `"readSpectrum"`. Methods take `&self` so the same transport can be
/// shared between an acquisition and a background poll; callers serialize
/// logical transactions through the core's transaction gate.
pub trait Transport: Send + Sync {
    fn write(
        &self,
        channel: &str,
        bytes: &[u8],
        timeout: Duration,
    ) -> Result<StatusCode, TransportError>;

    fn read(&self, channel: &str, timeout: Duration) -> Result<Vec<u8>, TransportError>;
}

impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    fn write(
        &self,
        channel: &str,
        bytes: &[u8],
        timeout: Duration,
    ) -> Result<StatusCode, TransportError> {
        (**self).write(channel, bytes, timeout)
    }

    fn read(&self, channel: &str, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        (**self).read(channel, timeout)
    }
}
