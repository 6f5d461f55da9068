//! MBE, Minimal Bit Encoding (spec §4.4): stores `value - min` in exactly
//! `bits_per_sample = ceil(log2(max - min + 1))` bits per sample, packed
//! MSB-first into a byte stream. The simplest of the four codecs and the
//! encoder's fallback partner alongside RED2 when
//! `CPS_DF_FALL_THROUGH_TO_BEST_ENCODING` is set (spec §4.4 edge cases).

use anyhow::{ensure, Error};

/// Number of bits needed to represent every integer in `[0, spread]`
/// inclusive.
pub fn bits_per_sample(spread: u64) -> u32 {
    if spread == 0 {
        1
    } else {
        64 - spread.leading_zeros()
    }
}

pub struct Encoded {
    pub min: i32,
    pub bits_per_sample: u32,
    pub sample_count: usize,
    pub bitstream: Vec<u8>,
}

pub fn encode(samples: &[i32]) -> Encoded {
    let min = *samples.iter().min().unwrap_or(&0);
    let max = *samples.iter().max().unwrap_or(&0);
    let spread = (max as i64 - min as i64) as u64;
    let bps = bits_per_sample(spread);

    let mut writer = BitWriter::new();
    for &s in samples {
        writer.write_bits((s as i64 - min as i64) as u64, bps);
    }

    Encoded {
        min,
        bits_per_sample: bps,
        sample_count: samples.len(),
        bitstream: writer.finish(),
    }
}

pub fn decode(encoded: &Encoded) -> Result<Vec<i32>, Error> {
    ensure!(
        encoded.bits_per_sample <= 32,
        crate::error::compression_error("MBE bits_per_sample exceeds 32")
    );
    let mut reader = BitReader::new(&encoded.bitstream);
    let mut out = Vec::with_capacity(encoded.sample_count);
    for _ in 0..encoded.sample_count {
        let v = reader.read_bits(encoded.bits_per_sample)?;
        out.push(encoded.min + v as i32);
    }
    Ok(out)
}

struct BitWriter {
    bytes: Vec<u8>,
    cur: u8,
    filled: u32,
}

impl BitWriter {
    fn new() -> Self {
        BitWriter {
            bytes: Vec::new(),
            cur: 0,
            filled: 0,
        }
    }

    fn write_bits(&mut self, value: u64, n: u32) {
        for i in (0..n).rev() {
            let bit = ((value >> i) & 1) as u8;
            self.cur = (self.cur << 1) | bit;
            self.filled += 1;
            if self.filled == 8 {
                self.bytes.push(self.cur);
                self.cur = 0;
                self.filled = 0;
            }
        }
    }

    fn finish(mut self) -> Vec<u8> {
        if self.filled > 0 {
            self.cur <<= 8 - self.filled;
            self.bytes.push(self.cur);
        }
        self.bytes
    }
}

struct BitReader<'a> {
    bytes: &'a [u8],
    byte_pos: usize,
    bit_pos: u32,
}

impl<'a> BitReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        BitReader {
            bytes,
            byte_pos: 0,
            bit_pos: 0,
        }
    }

    fn read_bits(&mut self, n: u32) -> Result<u64, Error> {
        let mut v = 0u64;
        for _ in 0..n {
            ensure!(
                self.byte_pos < self.bytes.len(),
                crate::error::compression_error("MBE bitstream exhausted")
            );
            let bit = (self.bytes[self.byte_pos] >> (7 - self.bit_pos)) & 1;
            v = (v << 1) | bit as u64;
            self.bit_pos += 1;
            if self.bit_pos == 8 {
                self.bit_pos = 0;
                self.byte_pos += 1;
            }
        }
        Ok(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips() {
        let samples = vec![100, 103, 98, 150, 99, 99, 100];
        let encoded = encode(&samples);
        let decoded = decode(&encoded).unwrap();
        assert_eq!(samples, decoded);
    }

    #[test]
    fn constant_signal_uses_minimum_bits() {
        let samples = vec![7; 20];
        let encoded = encode(&samples);
        assert_eq!(1, encoded.bits_per_sample);
        assert_eq!(samples, decode(&encoded).unwrap());
    }

    #[test]
    fn bits_per_sample_matches_spread() {
        assert_eq!(1, bits_per_sample(0));
        assert_eq!(1, bits_per_sample(1));
        assert_eq!(8, bits_per_sample(255));
        assert_eq!(9, bits_per_sample(256));
    }
}
