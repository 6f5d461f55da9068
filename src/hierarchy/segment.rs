//! Segment level (spec §4.6): the innermost hierarchy node, owning one
//! `.tdat`/`.tidx` (or `.vdat`/`.vidx`) file pair and the decoded Time-Series
//! Index array used for block lookup and contiguon discovery.

use anyhow::{ensure, Error};

use crate::primitives::{read_le32, read_lei64, write_le32, write_lei64, TSI_BYTES};

/// Time-Series Index Entry (spec §3.1): 24 bytes, strictly increasing in
/// `(|file_offset|, start_time, start_sample_number)`. A negative
/// `file_offset` marks the block it points at as discontinuous from its
/// predecessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TsiEntry {
    pub file_offset: i64,
    pub start_time: i64,
    pub start_sample_number: i64,
}

impl TsiEntry {
    pub fn is_discontinuous(&self) -> bool {
        self.file_offset < 0
    }

    pub fn absolute_offset(&self) -> u64 {
        self.file_offset.unsigned_abs()
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, Error> {
        ensure!(
            buf.len() >= TSI_BYTES,
            crate::error::record_error("TSI entry too short")
        );
        Ok(TsiEntry {
            file_offset: read_lei64(&buf[0..]),
            start_time: read_lei64(&buf[8..]),
            start_sample_number: read_lei64(&buf[16..]),
        })
    }

    pub fn write_to(&self, buf: &mut [u8]) {
        assert!(buf.len() >= TSI_BYTES);
        write_lei64(&mut buf[0..], self.file_offset);
        write_lei64(&mut buf[8..], self.start_time);
        write_lei64(&mut buf[16..], self.start_sample_number);
    }
}

/// Video Index Entry (spec §3.1): mirrors [`TsiEntry`] but keys on frame
/// number instead of sample number, plus a video-file number for sessions
/// whose video channel spans more than one physical file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViEntry {
    pub file_offset: i64,
    pub start_time: i64,
    pub start_frame: i64,
    pub video_file_number: u32,
}

impl ViEntry {
    pub fn from_bytes(buf: &[u8]) -> Result<Self, Error> {
        ensure!(
            buf.len() >= 24,
            crate::error::record_error("VI entry too short")
        );
        Ok(ViEntry {
            file_offset: read_lei64(&buf[0..]),
            start_time: read_lei64(&buf[8..]),
            start_frame: read_lei64(&buf[16..]),
            video_file_number: read_le32(&buf[20..]) & 0xFFFF, // low bits; top reserved
        })
    }

    pub fn write_to(&self, buf: &mut [u8]) {
        assert!(buf.len() >= 24);
        write_lei64(&mut buf[0..], self.file_offset);
        write_lei64(&mut buf[8..], self.start_time);
        write_lei64(&mut buf[16..], self.start_frame);
        write_le32(&mut buf[20..], self.video_file_number);
    }
}

/// One segment: its index array plus the metadata counters callers most
/// often ask about (total sample count, sampling rate).
#[derive(Debug, Clone)]
pub struct Segment {
    pub segment_number: i32,
    pub sampling_frequency: f64,
    pub indices: Vec<TsiEntry>,
    pub total_number_of_samples: i64,
}

impl Segment {
    pub fn new(segment_number: i32, sampling_frequency: f64) -> Self {
        Segment {
            segment_number,
            sampling_frequency,
            indices: Vec::new(),
            total_number_of_samples: 0,
        }
    }

    pub fn start_time(&self) -> Option<i64> {
        self.indices.first().map(|e| e.start_time)
    }

    pub fn end_time(&self) -> Option<i64> {
        self.indices.last().map(|e| e.start_time)
    }

    pub fn start_sample_number(&self) -> Option<i64> {
        self.indices.first().map(|e| e.start_sample_number)
    }

    /// Validates the index invariants from spec §6.2 testable properties
    /// 1 and 2: monotone non-decreasing start_time, and sample numbers that
    /// never gap even across a discontinuity.
    pub fn validate(&self) -> Result<(), Error> {
        for w in self.indices.windows(2) {
            ensure!(
                w[1].start_time >= w[0].start_time,
                crate::error::record_error("TSI start_time is not monotone")
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tsi_roundtrips() {
        let entry = TsiEntry {
            file_offset: -4096,
            start_time: 10_000,
            start_sample_number: 256,
        };
        let mut buf = [0u8; TSI_BYTES];
        entry.write_to(&mut buf);
        let parsed = TsiEntry::from_bytes(&buf).unwrap();
        assert_eq!(entry, parsed);
        assert!(parsed.is_discontinuous());
        assert_eq!(4096, parsed.absolute_offset());
    }

    #[test]
    fn segment_validate_rejects_nonmonotone_time() {
        let mut seg = Segment::new(1, 256.0);
        seg.indices.push(TsiEntry {
            file_offset: 0,
            start_time: 100,
            start_sample_number: 0,
        });
        seg.indices.push(TsiEntry {
            file_offset: 64,
            start_time: 50,
            start_sample_number: 256,
        });
        assert!(seg.validate().is_err());
    }
}
