//! Records Subsystem (spec §4.5): paired `.ridx`/`.rdat` files holding a
//! time-sorted stream of typed annotation records. Record type bodies are
//! ported field-for-field from the original type definitions; unknown
//! types are preserved as opaque bytes with their CRC intact.

use anyhow::{ensure, Error};

use crate::primitives::{
    read_le32, read_le64, read_lef64, read_lei32, read_lei64, write_le32, write_le64, write_lef64,
    write_lei32, write_lei64, RECORD_HEADER_BYTES, RI_BYTES,
};

/// Record Index Entry (spec §3.1): 24 bytes, `file_offset >= 0`.
#[derive(Debug, Clone, Copy)]
pub struct RecordIndexEntry {
    pub file_offset: i64,
    pub start_time: i64,
    pub type_code: u32,
    pub version_major: u8,
    pub version_minor: u8,
    pub encryption_level: u8,
}

mod ri_offset {
    pub const FILE_OFFSET: usize = 0;
    pub const START_TIME: usize = 8;
    pub const TYPE_CODE: usize = 16;
    pub const VERSION_MAJOR: usize = 20;
    pub const VERSION_MINOR: usize = 21;
    pub const ENCRYPTION_LEVEL: usize = 22;
}

pub const TERM_TYPE_CODE: u32 = 0x6d72_6554; // "Term", little-endian ui4
pub const SGMT_TYPE_CODE: u32 = 0x746d_6753; // "Sgmt"
pub const STAT_TYPE_CODE: u32 = 0x7461_7453; // "Stat"
pub const EDFA_TYPE_CODE: u32 = 0x4146_4445; // "EDFA"
pub const NOTE_TYPE_CODE: u32 = 0x6574_6f4e; // "Note"
pub const SEIZ_TYPE_CODE: u32 = 0x7a69_6553; // "Seiz"
pub const SYLG_TYPE_CODE: u32 = 0x674c_7953; // "SyLg"
pub const NLXP_TYPE_CODE: u32 = 0x5078_6c4e; // "NlxP"

impl RecordIndexEntry {
    pub fn from_bytes(buf: &[u8]) -> Result<Self, Error> {
        ensure!(
            buf.len() >= RI_BYTES,
            crate::error::record_error("record index entry too short")
        );
        Ok(RecordIndexEntry {
            file_offset: read_lei64(&buf[ri_offset::FILE_OFFSET..]),
            start_time: read_lei64(&buf[ri_offset::START_TIME..]),
            type_code: read_le32(&buf[ri_offset::TYPE_CODE..]),
            version_major: buf[ri_offset::VERSION_MAJOR],
            version_minor: buf[ri_offset::VERSION_MINOR],
            encryption_level: buf[ri_offset::ENCRYPTION_LEVEL],
        })
    }

    pub fn write_to(&self, buf: &mut [u8]) {
        assert!(buf.len() >= RI_BYTES);
        write_lei64(&mut buf[ri_offset::FILE_OFFSET..], self.file_offset);
        write_lei64(&mut buf[ri_offset::START_TIME..], self.start_time);
        write_le32(&mut buf[ri_offset::TYPE_CODE..], self.type_code);
        buf[ri_offset::VERSION_MAJOR] = self.version_major;
        buf[ri_offset::VERSION_MINOR] = self.version_minor;
        buf[ri_offset::ENCRYPTION_LEVEL] = self.encryption_level;
    }

    /// The terminal RI entry marking end-of-data (spec §4.5): no
    /// corresponding record body exists for it.
    pub fn terminal(rdat_length: i64) -> Self {
        RecordIndexEntry {
            file_offset: rdat_length,
            start_time: crate::primitives::UUTC_NO_ENTRY,
            type_code: TERM_TYPE_CODE,
            version_major: 0xFF,
            version_minor: 0xFF,
            encryption_level: 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.type_code == TERM_TYPE_CODE
    }
}

/// Record Header (spec §3.1): 24 bytes preceding every record body.
#[derive(Debug, Clone, Copy)]
pub struct RecordHeader {
    pub record_crc: u32,
    pub total_record_bytes: u32,
    pub start_time: i64,
    pub type_code: u32,
    pub version_major: u8,
    pub version_minor: u8,
    pub encryption_level: u8,
}

mod rh_offset {
    pub const RECORD_CRC: usize = 0;
    pub const TOTAL_RECORD_BYTES: usize = 4;
    pub const START_TIME: usize = 8;
    pub const TYPE_CODE: usize = 16;
    pub const VERSION_MAJOR: usize = 20;
    pub const VERSION_MINOR: usize = 21;
    pub const ENCRYPTION_LEVEL: usize = 22;
}

impl RecordHeader {
    pub fn from_bytes(buf: &[u8]) -> Result<Self, Error> {
        ensure!(
            buf.len() >= RECORD_HEADER_BYTES,
            crate::error::record_error("record header too short")
        );
        Ok(RecordHeader {
            record_crc: read_le32(&buf[rh_offset::RECORD_CRC..]),
            total_record_bytes: read_le32(&buf[rh_offset::TOTAL_RECORD_BYTES..]),
            start_time: read_lei64(&buf[rh_offset::START_TIME..]),
            type_code: read_le32(&buf[rh_offset::TYPE_CODE..]),
            version_major: buf[rh_offset::VERSION_MAJOR],
            version_minor: buf[rh_offset::VERSION_MINOR],
            encryption_level: buf[rh_offset::ENCRYPTION_LEVEL],
        })
    }

    pub fn write_to(&self, buf: &mut [u8]) {
        assert!(buf.len() >= RECORD_HEADER_BYTES);
        write_le32(&mut buf[rh_offset::RECORD_CRC..], self.record_crc);
        write_le32(
            &mut buf[rh_offset::TOTAL_RECORD_BYTES..],
            self.total_record_bytes,
        );
        write_lei64(&mut buf[rh_offset::START_TIME..], self.start_time);
        write_le32(&mut buf[rh_offset::TYPE_CODE..], self.type_code);
        buf[rh_offset::VERSION_MAJOR] = self.version_major;
        buf[rh_offset::VERSION_MINOR] = self.version_minor;
        buf[rh_offset::ENCRYPTION_LEVEL] = self.encryption_level;
    }
}

/// Sgmt: segment-boundary record (spec §4.5), both on-disk versions.
/// `v1.1` (32 bytes + description) is the default written format; `v1.0`
/// (48 bytes + description, carrying `seg_UID`/`acq_chan_num`/`rate` as
/// `sf8`) is read for backward compatibility.
#[derive(Debug, Clone)]
pub enum Sgmt {
    V10 {
        end_time: i64,
        start_idx: i64,
        end_idx: i64,
        segment_uid: u64,
        segment_number: i32,
        acquisition_channel_number: i32,
        sampling_rate: f64,
        description: String,
    },
    V11 {
        end_time: i64,
        start_idx: i64,
        end_idx: i64,
        segment_number: i32,
        sampling_rate: f32,
        description: String,
    },
}

impl Sgmt {
    pub fn end_time(&self) -> i64 {
        match self {
            Sgmt::V10 { end_time, .. } | Sgmt::V11 { end_time, .. } => *end_time,
        }
    }

    pub fn segment_number(&self) -> i32 {
        match self {
            Sgmt::V10 { segment_number, .. } | Sgmt::V11 { segment_number, .. } => *segment_number,
        }
    }

    pub fn sampling_rate(&self) -> f64 {
        match self {
            Sgmt::V10 { sampling_rate, .. } => *sampling_rate,
            Sgmt::V11 { sampling_rate, .. } => *sampling_rate as f64,
        }
    }

    pub fn from_bytes(body: &[u8], version_major: u8) -> Result<Self, Error> {
        match version_major {
            1 if body.len() >= 48 => Ok(Sgmt::V10 {
                end_time: read_lei64(&body[0..]),
                start_idx: read_lei64(&body[8..]),
                end_idx: read_lei64(&body[16..]),
                segment_uid: read_le64(&body[24..]),
                segment_number: read_lei32(&body[32..]),
                acquisition_channel_number: read_lei32(&body[36..]),
                sampling_rate: read_lef64(&body[40..]),
                description: read_cstring(&body[48..]),
            }),
            _ if body.len() >= 32 => Ok(Sgmt::V11 {
                end_time: read_lei64(&body[0..]),
                start_idx: read_lei64(&body[8..]),
                end_idx: read_lei64(&body[16..]),
                segment_number: read_lei32(&body[24..]),
                sampling_rate: f32::from_bits(read_le32(&body[28..])),
                description: read_cstring(&body[32..]),
            }),
            _ => Err(crate::error::record_error("Sgmt record body too short").into()),
        }
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        match self {
            Sgmt::V10 {
                end_time,
                start_idx,
                end_idx,
                segment_uid,
                segment_number,
                acquisition_channel_number,
                sampling_rate,
                description,
            } => {
                let mut fixed = [0u8; 48];
                write_lei64(&mut fixed[0..], *end_time);
                write_lei64(&mut fixed[8..], *start_idx);
                write_lei64(&mut fixed[16..], *end_idx);
                write_le64(&mut fixed[24..], *segment_uid);
                write_lei32(&mut fixed[32..], *segment_number);
                write_lei32(&mut fixed[36..], *acquisition_channel_number);
                write_lef64(&mut fixed[40..], *sampling_rate);
                out.extend_from_slice(&fixed);
                out.extend_from_slice(description.as_bytes());
                out.push(0);
            }
            Sgmt::V11 {
                end_time,
                start_idx,
                end_idx,
                segment_number,
                sampling_rate,
                description,
            } => {
                let mut fixed = [0u8; 32];
                write_lei64(&mut fixed[0..], *end_time);
                write_lei64(&mut fixed[8..], *start_idx);
                write_lei64(&mut fixed[16..], *end_idx);
                write_lei32(&mut fixed[24..], *segment_number);
                write_le32(&mut fixed[28..], sampling_rate.to_bits());
                out.extend_from_slice(&fixed);
                out.extend_from_slice(description.as_bytes());
                out.push(0);
            }
        }
        while out.len() % 8 != 0 {
            out.push(0);
        }
    }
}

/// Stat v1.0 (spec §4.5 supplement): 32 bytes, `si4` order statistics plus
/// `sf4` moments. `NAN_SI4` sentinel for integer fields is
/// [`crate::primitives::SAMPLE_NUMBER_NO_ENTRY`]'s 32-bit analogue
/// (`i32::MIN`); moment fields use IEEE NaN directly.
pub const NAN_SI4: i32 = i32::MIN;

#[derive(Debug, Clone, Copy)]
pub struct Stat {
    pub minimum: i32,
    pub maximum: i32,
    pub mean: i32,
    pub median: i32,
    pub mode: i32,
    pub variance: f32,
    pub skewness: f32,
    pub kurtosis: f32,
}

impl Stat {
    pub fn from_bytes(body: &[u8]) -> Result<Self, Error> {
        ensure!(
            body.len() >= 32,
            crate::error::record_error("Stat record body too short")
        );
        Ok(Stat {
            minimum: read_lei32(&body[0..]),
            maximum: read_lei32(&body[4..]),
            mean: read_lei32(&body[8..]),
            median: read_lei32(&body[12..]),
            mode: read_lei32(&body[16..]),
            variance: f32::from_bits(read_le32(&body[20..])),
            skewness: f32::from_bits(read_le32(&body[24..])),
            kurtosis: f32::from_bits(read_le32(&body[28..])),
        })
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        let mut fixed = [0u8; 32];
        write_lei32(&mut fixed[0..], self.minimum);
        write_lei32(&mut fixed[4..], self.maximum);
        write_lei32(&mut fixed[8..], self.mean);
        write_lei32(&mut fixed[12..], self.median);
        write_lei32(&mut fixed[16..], self.mode);
        write_le32(&mut fixed[20..], self.variance.to_bits());
        write_le32(&mut fixed[24..], self.skewness.to_bits());
        write_le32(&mut fixed[28..], self.kurtosis.to_bits());
        out.extend_from_slice(&fixed);
    }
}

/// EDFA v1.0: an EDF+ annotation, `duration` (μs) plus free-text.
#[derive(Debug, Clone)]
pub struct Edfa {
    pub duration: i64,
    pub annotation: String,
}

impl Edfa {
    pub fn from_bytes(body: &[u8]) -> Result<Self, Error> {
        ensure!(
            body.len() >= 8,
            crate::error::record_error("EDFA record body too short")
        );
        Ok(Edfa {
            duration: read_lei64(&body[0..]),
            annotation: read_cstring(&body[8..]),
        })
    }
}

/// Note: free-text annotation. `v1.0` has no fixed header (just text);
/// `v1.1` adds an `end_time` field ahead of the text.
#[derive(Debug, Clone)]
pub enum Note {
    V10 { text: String },
    V11 { end_time: i64, text: String },
}

impl Note {
    pub fn from_bytes(body: &[u8], version_major: u8, version_minor: u8) -> Self {
        if version_major == 1 && version_minor >= 1 && body.len() >= 8 {
            Note::V11 {
                end_time: read_lei64(&body[0..]),
                text: read_cstring(&body[8..]),
            }
        } else {
            Note::V10 {
                text: read_cstring(body),
            }
        }
    }
}

/// SyLg: a system-log line, stored identically to `Note` v1.0 (raw text).
#[derive(Debug, Clone)]
pub struct SyLg {
    pub text: String,
}

impl SyLg {
    pub fn from_bytes(body: &[u8]) -> Self {
        SyLg {
            text: read_cstring(body),
        }
    }
}

/// NlxP v1.0: a Neuralynx digital-port event.
#[derive(Debug, Clone, Copy)]
pub struct NlxP {
    pub raw_port_value: u32,
    pub value: u32,
    pub subport: u8,
    pub number_of_subports: u8,
    pub trigger_mode: u8,
}

impl NlxP {
    pub fn from_bytes(body: &[u8]) -> Result<Self, Error> {
        ensure!(
            body.len() >= 16,
            crate::error::record_error("NlxP record body too short")
        );
        Ok(NlxP {
            raw_port_value: read_le32(&body[0..]),
            value: read_le32(&body[4..]),
            subport: body[8],
            number_of_subports: body[9],
            trigger_mode: body[10],
        })
    }
}

fn read_cstring(buf: &[u8]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

/// A decoded record body. Types not named by the format (`Curs`, `Epoc`,
/// `ESti`, `CSti`, `HFOc`) are recognized by type code and dispatched to
/// [`Body::Opaque`] rather than fully typed, per spec §4.5.
#[derive(Debug, Clone)]
pub enum Body {
    Sgmt(Sgmt),
    Stat(Stat),
    Edfa(Edfa),
    Note(Note),
    SyLg(SyLg),
    NlxP(NlxP),
    Opaque { type_code: u32, bytes: Vec<u8> },
}

pub fn decode_body(header: &RecordHeader, body: &[u8]) -> Result<Body, Error> {
    Ok(match header.type_code {
        SGMT_TYPE_CODE => Body::Sgmt(Sgmt::from_bytes(body, header.version_major)?),
        STAT_TYPE_CODE => Body::Stat(Stat::from_bytes(body)?),
        EDFA_TYPE_CODE => Body::Edfa(Edfa::from_bytes(body)?),
        NOTE_TYPE_CODE => Body::Note(Note::from_bytes(
            body,
            header.version_major,
            header.version_minor,
        )),
        SYLG_TYPE_CODE => Body::SyLg(SyLg::from_bytes(body)),
        NLXP_TYPE_CODE => Body::NlxP(NlxP::from_bytes(body)?),
        other => Body::Opaque {
            type_code: other,
            bytes: body.to_vec(),
        },
    })
}

/// A type-code filter (spec §4.5): a vector of signed codes, positive
/// entries include, negative exclude. All-negative lists mean "exclude
/// these and allow everything else"; any positive entry switches to
/// "include only these". Filtering never requires decrypting bodies.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    codes: Vec<i64>,
}

impl RecordFilter {
    pub fn new(codes: Vec<i64>) -> Self {
        RecordFilter { codes }
    }

    pub fn matches(&self, type_code: u32) -> bool {
        if self.codes.is_empty() {
            return true;
        }
        let positives: Vec<i64> = self.codes.iter().copied().filter(|&c| c > 0).collect();
        if !positives.is_empty() {
            positives.contains(&(type_code as i64))
        } else {
            !self.codes.contains(&-(type_code as i64))
        }
    }
}

/// One decoded (index, header, body) triple for iteration by
/// [`show_records`].
pub struct Record {
    pub index: RecordIndexEntry,
    pub header: RecordHeader,
    pub body: Body,
}

/// `show_records` (spec §4.5): iterates RI entries in `ridx`, reads
/// matching bodies from `rdat`, decrypts if a key is available, and
/// dispatches each to [`decode_body`]. Records whose encryption level
/// exceeds the supplied access are skipped rather than erroring, mirroring
/// the original "filter is applied by type code alone, without decrypting
/// bodies" contract: an unreadable body never blocks iteration of the
/// rest of the stream.
pub fn show_records(
    index_entries: &[RecordIndexEntry],
    rdat: &[u8],
    filter: &RecordFilter,
    password_data: &crate::crypto::PasswordData,
) -> Result<Vec<Record>, Error> {
    let mut out = Vec::new();

    for (i, entry) in index_entries.iter().enumerate() {
        if entry.is_terminal() {
            break;
        }
        if !filter.matches(entry.type_code) {
            continue;
        }

        let next_offset = index_entries
            .get(i + 1)
            .map(|e| e.file_offset)
            .unwrap_or(rdat.len() as i64);
        let start = entry.file_offset as usize;
        let end = next_offset as usize;
        ensure!(
            end <= rdat.len() && start <= end,
            crate::error::record_error("record body out of file bounds")
        );

        let mut raw = rdat[start..end].to_vec();
        let header_bytes;
        let body_bytes;

        if entry.encryption_level > 0 {
            let level = match entry.encryption_level {
                1 => crate::crypto::AccessLevel::Level1,
                _ => crate::crypto::AccessLevel::Level2,
            };
            match password_data.key_for(level) {
                Some(key) => {
                    crate::crypto::decrypt_region(key, &mut raw)?;
                    header_bytes = RecordHeader::from_bytes(&raw)?;
                    body_bytes = raw[RECORD_HEADER_BYTES..].to_vec();
                }
                None => continue,
            }
        } else {
            header_bytes = RecordHeader::from_bytes(&raw)?;
            body_bytes = raw[RECORD_HEADER_BYTES..].to_vec();
        }

        let body = decode_body(&header_bytes, &body_bytes)?;
        out.push(Record {
            index: *entry,
            header: header_bytes,
            body,
        });
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sgmt_v11_roundtrips() {
        let rec = Sgmt::V11 {
            end_time: 5_000_000,
            start_idx: 0,
            end_idx: 1023,
            segment_number: 1,
            sampling_rate: 256.0,
            description: "seg one".to_string(),
        };
        let mut buf = Vec::new();
        rec.write_to(&mut buf);

        let parsed = Sgmt::from_bytes(&buf, 1).unwrap();
        match parsed {
            Sgmt::V11 {
                end_time,
                segment_number,
                sampling_rate,
                description,
                ..
            } => {
                assert_eq!(5_000_000, end_time);
                assert_eq!(1, segment_number);
                assert_eq!(256.0, sampling_rate);
                assert_eq!("seg one", description);
            }
            _ => panic!("expected V11"),
        }
    }

    #[test]
    fn stat_roundtrips() {
        let stat = Stat {
            minimum: -100,
            maximum: 100,
            mean: 0,
            median: 1,
            mode: 2,
            variance: 12.5,
            skewness: 0.1,
            kurtosis: 3.0,
        };
        let mut buf = Vec::new();
        stat.write_to(&mut buf);
        let parsed = Stat::from_bytes(&buf).unwrap();
        assert_eq!(-100, parsed.minimum);
        assert_eq!(12.5, parsed.variance);
    }

    #[test]
    fn filter_positive_list_includes_only_named() {
        let filter = RecordFilter::new(vec![SGMT_TYPE_CODE as i64]);
        assert!(filter.matches(SGMT_TYPE_CODE));
        assert!(!filter.matches(NOTE_TYPE_CODE));
    }

    #[test]
    fn filter_negative_list_excludes_named() {
        let filter = RecordFilter::new(vec![-(NOTE_TYPE_CODE as i64)]);
        assert!(filter.matches(SGMT_TYPE_CODE));
        assert!(!filter.matches(NOTE_TYPE_CODE));
    }

    #[test]
    fn empty_filter_matches_everything() {
        let filter = RecordFilter::default();
        assert!(filter.matches(SGMT_TYPE_CODE));
    }

    #[test]
    fn unknown_type_is_opaque() {
        let header = RecordHeader {
            record_crc: 0,
            total_record_bytes: 28,
            start_time: 0,
            type_code: 0xDEAD_BEEF,
            version_major: 1,
            version_minor: 0,
            encryption_level: 0,
        };
        let body = decode_body(&header, &[1, 2, 3, 4]).unwrap();
        match body {
            Body::Opaque { type_code, bytes } => {
                assert_eq!(0xDEAD_BEEF, type_code);
                assert_eq!(vec![1, 2, 3, 4], bytes);
            }
            _ => panic!("expected Opaque"),
        }
    }

    #[test]
    fn terminal_entry_ends_iteration() {
        let term = RecordIndexEntry::terminal(100);
        assert!(term.is_terminal());
        assert_eq!(100, term.file_offset);
    }
}
