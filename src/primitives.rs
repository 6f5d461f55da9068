//! Fixed-width scalar helpers and the numeric sentinels used throughout the
//! on-disk layout (spec §6.2). The C library ties these to `si4`/`si8`/`ui4`
//! etc; in Rust the native integer types already carry that information, so
//! this module is mostly the sentinel constants plus little-endian
//! byte-slice readers used by the `*raw` structs, in the same style as the
//! teacher's `read_le16`/`read_le32` free functions.

use byteorder::{ByteOrder, LittleEndian};

/// `UUTC_NO_ENTRY_m13`
pub const UUTC_NO_ENTRY: i64 = i64::MIN;
/// `SAMPLE_NUMBER_NO_ENTRY_m13`
pub const SAMPLE_NUMBER_NO_ENTRY: i64 = UUTC_NO_ENTRY;
/// `RATE_NO_ENTRY_m13`
pub const RATE_NO_ENTRY: f64 = -1.0;
/// `RATE_VARIABLE_m13`
pub const RATE_VARIABLE: f64 = -2.0;
/// `SEGMENT_NUMBER_NO_ENTRY_m13`; segments are numbered from 1.
pub const SEGMENT_NUMBER_NO_ENTRY: i32 = 0;
/// `BEGINNING_OF_TIME_m13`
pub const BEGINNING_OF_TIME: i64 = 0;
/// `END_OF_TIME_m13`
pub const END_OF_TIME: i64 = i64::MAX;
/// `CRC_NO_ENTRY_m13`
pub const CRC_NO_ENTRY: u32 = 0;
/// `CRC_POLYNOMIAL_m13`
pub const CRC_POLYNOMIAL: u32 = 0xEDB8_8320;

/// `CHANNEL_NUMBER_NO_ENTRY_m13`
pub const CHANNEL_NUMBER_NO_ENTRY: i32 = -1;
/// `CHANNEL_NUMBER_ALL_CHANNELS_m13`
pub const CHANNEL_NUMBER_ALL_CHANNELS: i32 = -2;

pub const UNIVERSAL_HEADER_BYTES: usize = 1024;
pub const METADATA_FILE_BYTES: usize = 16384;
pub const METADATA_BODY_BYTES: usize = METADATA_FILE_BYTES - UNIVERSAL_HEADER_BYTES;
pub const TSI_BYTES: usize = 24;
pub const VI_BYTES: usize = 24;
pub const RI_BYTES: usize = 24;
pub const RECORD_HEADER_BYTES: usize = 24;
pub const CMP_FIXED_BH_BYTES: usize = 56;

pub const BLOCK_START_UID: u64 = 0x0123_4567_89AB_CDEF;

pub fn read_le16(buf: &[u8]) -> u16 {
    LittleEndian::read_u16(buf)
}

pub fn read_le32(buf: &[u8]) -> u32 {
    LittleEndian::read_u32(buf)
}

pub fn read_le64(buf: &[u8]) -> u64 {
    LittleEndian::read_u64(buf)
}

pub fn read_lei32(buf: &[u8]) -> i32 {
    LittleEndian::read_i32(buf)
}

pub fn read_lei64(buf: &[u8]) -> i64 {
    LittleEndian::read_i64(buf)
}

pub fn read_lef64(buf: &[u8]) -> f64 {
    LittleEndian::read_f64(buf)
}

pub fn write_le16(buf: &mut [u8], v: u16) {
    LittleEndian::write_u16(buf, v)
}

pub fn write_le32(buf: &mut [u8], v: u32) {
    LittleEndian::write_u32(buf, v)
}

pub fn write_le64(buf: &mut [u8], v: u64) {
    LittleEndian::write_u64(buf, v)
}

pub fn write_lei32(buf: &mut [u8], v: i32) {
    LittleEndian::write_i32(buf, v)
}

pub fn write_lei64(buf: &mut [u8], v: i64) {
    LittleEndian::write_i64(buf, v)
}

pub fn write_lef64(buf: &mut [u8], v: f64) {
    LittleEndian::write_f64(buf, v)
}

/// Rounds `n` up to the next multiple of 16, the encryption unit size.
pub fn pad16(n: usize) -> usize {
    (n + 15) & !15
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pad16_rounds_up() {
        assert_eq!(0, pad16(0));
        assert_eq!(16, pad16(1));
        assert_eq!(16, pad16(16));
        assert_eq!(32, pad16(17));
    }

    #[test]
    fn roundtrip_le() {
        let mut buf = [0u8; 8];
        write_le64(&mut buf, 0x0123_4567_89AB_CDEF);
        assert_eq!(0x0123_4567_89AB_CDEF, read_le64(&buf));
    }
}
