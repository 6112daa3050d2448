//! Battery state report.

use spectro_traits::channels;
use tracing::trace;

use crate::error::DeviceError;
use crate::link::DeviceLink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatteryStatus {
    pub percent: u8,
    pub charging: bool,
}

impl BatteryStatus {
    /// `{percent, charging}`; percent above 100 or a charging byte other
    /// than 0/1 is a protocol violation.
    pub fn parse(bytes: &[u8]) -> Result<Self, DeviceError> {
        let &[percent, charging, ..] = bytes else {
            return Err(DeviceError::ProtocolViolation(format!(
                "battery report of {} bytes",
                bytes.len()
            )));
        };
        if percent > 100 {
            return Err(DeviceError::ProtocolViolation(format!(
                "battery percent {percent} above 100"
            )));
        }
        let charging = match charging {
            0 => false,
            1 => true,
            other => {
                return Err(DeviceError::ProtocolViolation(format!(
                    "battery charging flag {other}"
                )));
            }
        };
        Ok(Self { percent, charging })
    }
}

/// One gate-held read. `Ok(None)` when the gate is busy.
pub fn poll(link: &DeviceLink) -> Result<Option<BatteryStatus>, DeviceError> {
    let Some(_gate) = link.try_lock() else {
        trace!("battery poll skipped; gate busy");
        return Ok(None);
    };
    let bytes = link.read(channels::BATTERY_STATUS)?;
    BatteryStatus::parse(&bytes).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(&[87, 0], Some((87, false)))]
    #[case(&[100, 1], Some((100, true)))]
    #[case(&[101, 0], None)]
    #[case(&[50, 2], None)]
    #[case(&[50], None)]
    fn battery_reports(#[case] raw: &[u8], #[case] want: Option<(u8, bool)>) {
        let got = BatteryStatus::parse(raw).ok().map(|b| (b.percent, b.charging));
        assert_eq!(got, want);
    }
}
