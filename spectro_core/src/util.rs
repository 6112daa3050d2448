//! Common time helpers for spectro_core.

use std::time::Duration;

/// Number of milliseconds in one second.
pub const MILLIS_PER_SEC: u64 = 1_000;

/// Whole seconds as milliseconds.
#[inline]
pub fn secs_to_ms(secs: u32) -> u64 {
    u64::from(secs).saturating_mul(MILLIS_PER_SEC)
}

#[inline]
pub fn ms(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seconds_convert() {
        assert_eq!(secs_to_ms(0), 0);
        assert_eq!(secs_to_ms(3), 3000);
        assert_eq!(secs_to_ms(u32::MAX), u64::from(u32::MAX) * 1000);
    }
}
