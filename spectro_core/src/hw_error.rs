//! Maps `Box<dyn Error>` from the transport boundary to typed `DeviceError`.
//!
//! `spectro_traits::Transport` returns boxed errors so adapters stay free of
//! core types; this module converts them, with an optional feature-gated path
//! for `spectro_hardware::HwError` downcasting.

use spectro_traits::StatusCode;

use crate::error::DeviceError;

/// Map a transport-boundary error to a typed `DeviceError`.
///
/// Attempts to downcast known hardware error types first, then falls back
/// to string-based heuristics.
pub fn map_transport_error(e: &(dyn std::error::Error + 'static)) -> DeviceError {
    #[cfg(feature = "hardware-errors")]
    {
        if let Some(hw) = e.downcast_ref::<spectro_hardware::HwError>() {
            return match hw {
                spectro_hardware::HwError::Timeout(ch) => DeviceError::TransportTimeout(ch.clone()),
                other => DeviceError::Transport(other.to_string()),
            };
        }
    }

    let s = e.to_string();
    if s.to_lowercase().contains("timeout") || s.to_lowercase().contains("timed out") {
        DeviceError::TransportTimeout(s)
    } else {
        DeviceError::Transport(s)
    }
}

/// Map a non-success write status to a typed error.
pub fn map_write_status(channel: &str, status: StatusCode) -> Result<(), DeviceError> {
    match status {
        StatusCode::Success => Ok(()),
        StatusCode::ProtocolError(code) => Err(DeviceError::DeviceRejected(code)),
        StatusCode::AccessDenied => Err(DeviceError::Transport(format!(
            "write to {channel} denied"
        ))),
        StatusCode::Unreachable => Err(DeviceError::Transport(format!(
            "{channel} unreachable"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_timeouts_are_classified() {
        let e = std::io::Error::new(std::io::ErrorKind::TimedOut, "read timed out");
        assert!(matches!(
            map_transport_error(&e),
            DeviceError::TransportTimeout(_)
        ));
        let e = std::io::Error::other("link lost");
        assert!(matches!(map_transport_error(&e), DeviceError::Transport(_)));
    }

    #[cfg(feature = "hardware-errors")]
    #[test]
    fn hw_errors_downcast() {
        let e = spectro_hardware::HwError::Timeout("readSpectrum".into());
        assert_eq!(
            map_transport_error(&e),
            DeviceError::TransportTimeout("readSpectrum".into())
        );
        let e = spectro_hardware::HwError::Disconnected;
        assert!(matches!(map_transport_error(&e), DeviceError::Transport(_)));
    }

    #[test]
    fn write_status_mapping() {
        assert!(map_write_status("gainDb", StatusCode::Success).is_ok());
        assert_eq!(
            map_write_status("gainDb", StatusCode::ProtocolError(3)),
            Err(DeviceError::DeviceRejected(3))
        );
    }
}
