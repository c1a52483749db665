// src/byte_codec.rs
//! Big-endian fixed-width integer and fixed-point float codecs used by every
//! on-disk record in the bundle format.

/// Denominator for the 32-bit fixed-point format used by anchor coordinates.
pub const FIXED_POINT_N: f64 = 16384.0;

pub fn write_u32_be(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_be_bytes());
}

pub fn write_u64_be(buf: &mut Vec<u8>, value: u64) {
    buf.extend_from_slice(&value.to_be_bytes());
}

/// Encodes `value` as a 32-bit big-endian fixed-point number with a
/// denominator of 16384, matching the wire format used for anchor
/// coordinates.
pub fn write_fixed_point(buf: &mut Vec<u8>, value: f64) {
    let fixed = (value * FIXED_POINT_N).round() as i32;
    write_u32_be(buf, fixed as u32);
}

pub fn read_u32_be(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

pub fn read_u64_be(bytes: &[u8]) -> u64 {
    u64::from_be_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ])
}

pub fn read_fixed_point(bytes: &[u8]) -> f64 {
    let fixed = read_u32_be(bytes) as i32;
    fixed as f64 / FIXED_POINT_N
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_u32() {
        let mut buf = Vec::new();
        write_u32_be(&mut buf, 0xdead_beef);
        assert_eq!(read_u32_be(&buf), 0xdead_beef);
    }

    #[test]
    fn round_trips_u64() {
        let mut buf = Vec::new();
        write_u64_be(&mut buf, 0x0102_0304_0506_0708);
        assert_eq!(read_u64_be(&buf), 0x0102_0304_0506_0708);
    }

    #[test]
    fn round_trips_fixed_point() {
        let mut buf = Vec::new();
        write_fixed_point(&mut buf, 0.5);
        assert!((read_fixed_point(&buf) - 0.5).abs() < 1e-6);

        let mut buf2 = Vec::new();
        write_fixed_point(&mut buf2, 1.0);
        assert!((read_fixed_point(&buf2) - 1.0).abs() < 1e-6);

        let mut buf3 = Vec::new();
        write_fixed_point(&mut buf3, 0.0);
        assert!((read_fixed_point(&buf3) - 0.0).abs() < 1e-6);
    }
}
