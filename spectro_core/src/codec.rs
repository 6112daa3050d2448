//! Byte-level encodings shared by every channel.
//!
//! The protocol mixes byte orders: pixel payloads are little-endian, packet
//! headers and parameter writes big-endian. Every helper here takes the order
//! explicitly so call sites document which one the wire uses.

use crc::{CRC_16_ARC, Crc};

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_ARC);

/// Upper bound (exclusive) representable by the 8.8 gain format.
pub const FIXED_GAIN_MAX: f32 = 256.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

/// Encode a value in `[0, 256)` as unsigned 8.8 fixed point.
///
/// The integer part becomes the high byte. The fraction is expanded greedily,
/// MSB first, over `2^-1 .. 2^-8`: a bit is set whenever the remaining
/// fraction covers that place value. Out-of-range and non-finite input is
/// logged and encodes as 0.
pub fn encode_fixed_gain(value: f32) -> u16 {
    if !(0.0..FIXED_GAIN_MAX).contains(&value) {
        tracing::warn!(value, "gain outside 8.8 fixed-point range; encoding 0");
        return 0;
    }
    let msb = value.trunc() as u8;
    let mut frac = value - value.trunc();
    let mut lsb = 0u8;
    let mut place = 0.5_f32;
    for bit in (0..8).rev() {
        if frac >= place {
            lsb |= 1 << bit;
            frac -= place;
        }
        place /= 2.0;
    }
    u16::from_be_bytes([msb, lsb])
}

/// Inverse of [`encode_fixed_gain`].
pub fn decode_fixed_gain(raw: u16) -> f32 {
    let [msb, lsb] = raw.to_be_bytes();
    let mut value = f32::from(msb);
    let mut place = 0.5_f32;
    for bit in (0..8).rev() {
        if lsb & (1 << bit) != 0 {
            value += place;
        }
        place /= 2.0;
    }
    value
}

/// CRC-16/ARC over a complete response payload.
#[inline]
pub fn crc16(bytes: &[u8]) -> u16 {
    CRC16.checksum(bytes)
}

#[inline]
pub fn u16_at(bytes: &[u8], offset: usize, endian: Endian) -> Option<u16> {
    let b: [u8; 2] = bytes.get(offset..offset.checked_add(2)?)?.try_into().ok()?;
    Some(match endian {
        Endian::Little => u16::from_le_bytes(b),
        Endian::Big => u16::from_be_bytes(b),
    })
}

#[inline]
pub fn i16_at(bytes: &[u8], offset: usize, endian: Endian) -> Option<i16> {
    u16_at(bytes, offset, endian).map(|v| v as i16)
}

#[inline]
pub fn u32_at(bytes: &[u8], offset: usize, endian: Endian) -> Option<u32> {
    let b: [u8; 4] = bytes.get(offset..offset.checked_add(4)?)?.try_into().ok()?;
    Some(match endian {
        Endian::Little => u32::from_le_bytes(b),
        Endian::Big => u32::from_be_bytes(b),
    })
}

/// IEEE-754 single, always little-endian on this device family.
#[inline]
pub fn f32_le_at(bytes: &[u8], offset: usize) -> Option<f32> {
    u32_at(bytes, offset, Endian::Little).map(f32::from_bits)
}

#[inline]
pub fn u16_bytes(value: u16, endian: Endian) -> [u8; 2] {
    match endian {
        Endian::Little => value.to_le_bytes(),
        Endian::Big => value.to_be_bytes(),
    }
}

#[inline]
pub fn u32_bytes(value: u32, endian: Endian) -> [u8; 4] {
    match endian {
        Endian::Little => value.to_le_bytes(),
        Endian::Big => value.to_be_bytes(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_gain_known_values() {
        assert_eq!(encode_fixed_gain(8.0), 0x0800);
        assert_eq!(encode_fixed_gain(8.5), 0x0880);
        assert_eq!(encode_fixed_gain(1.75), 0x01C0);
        assert_eq!(encode_fixed_gain(255.99609375), 0xFFFF);
        assert_eq!(decode_fixed_gain(0x0880), 8.5);
        assert_eq!(decode_fixed_gain(0x0001), 1.0 / 256.0);
    }

    #[test]
    fn fixed_gain_rejects_out_of_range() {
        assert_eq!(encode_fixed_gain(-0.001), 0);
        assert_eq!(encode_fixed_gain(256.0), 0);
        assert_eq!(encode_fixed_gain(f32::NAN), 0);
        assert_eq!(encode_fixed_gain(f32::INFINITY), 0);
    }

    #[test]
    fn mixed_endian_reads() {
        let b = [0x12, 0x34, 0x56, 0x78];
        assert_eq!(u16_at(&b, 0, Endian::Big), Some(0x1234));
        assert_eq!(u16_at(&b, 0, Endian::Little), Some(0x3412));
        assert_eq!(u32_at(&b, 0, Endian::Big), Some(0x1234_5678));
        assert_eq!(i16_at(&[0xFF, 0xFE], 0, Endian::Big), Some(-2));
        assert_eq!(u16_at(&b, 3, Endian::Big), None);
        assert_eq!(u32_at(&b, usize::MAX, Endian::Big), None);
    }

    #[test]
    fn crc_distinguishes_payloads() {
        assert_eq!(crc16(b"123456789"), 0xBB3D);
        assert_ne!(crc16(&[0, 0, 1, 0]), crc16(&[0, 0, 0, 1]));
    }
}
