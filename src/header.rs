//! Universal Header (spec §3.1, §4.1): the 1024-byte leading block in every
//! MED file. Parsed into a plain struct with named fields and a
//! `from_bytes` constructor that reads explicit byte offsets, never a
//! `#[repr(C)]` transmute (spec §9: "read raw bytes into a buffer and
//! construct the typed view by explicit parsing, not by pointer casting").

use anyhow::{ensure, Error};

use crate::crc::crc32;
use crate::primitives::{
    read_le16, read_le32, read_le64, read_lei32, read_lei64, write_le16, write_le32, write_le64,
    write_lei32, write_lei64, UNIVERSAL_HEADER_BYTES,
};

pub const HEADER_CRC_START: usize = 4;
pub const BODY_CRC_START: usize = UNIVERSAL_HEADER_BYTES;

pub const MED_VERSION_MAJOR: u8 = 1;
pub const MED_VERSION_MINOR: u8 = 3;

/// Byte order codes stored in the header; the library only supports
/// little-endian hosts (spec §4.1).
pub const BYTE_ORDER_LITTLE_ENDIAN: u8 = 0;
pub const BYTE_ORDER_BIG_ENDIAN: u8 = 1;

/// Recognized `type_code` values (spec §6.1), stored little-endian as 4
/// ASCII bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    TimeSeriesMetadata,
    TimeSeriesData,
    TimeSeriesIndices,
    VideoMetadata,
    VideoData,
    VideoIndices,
    RecordData,
    RecordIndices,
}

impl FileType {
    pub fn code(self) -> [u8; 4] {
        match self {
            FileType::TimeSeriesMetadata => *b"tmet",
            FileType::TimeSeriesData => *b"tdat",
            FileType::TimeSeriesIndices => *b"tidx",
            FileType::VideoMetadata => *b"vmet",
            FileType::VideoData => *b"vdat",
            FileType::VideoIndices => *b"vidx",
            FileType::RecordData => *b"rdat",
            FileType::RecordIndices => *b"ridx",
        }
    }

    pub fn from_code(code: &[u8; 4]) -> Option<FileType> {
        Some(match code {
            b"tmet" => FileType::TimeSeriesMetadata,
            b"tdat" => FileType::TimeSeriesData,
            b"tidx" => FileType::TimeSeriesIndices,
            b"vmet" => FileType::VideoMetadata,
            b"vdat" => FileType::VideoData,
            b"vidx" => FileType::VideoIndices,
            b"rdat" => FileType::RecordData,
            b"ridx" => FileType::RecordIndices,
            _ => return None,
        })
    }

    pub fn extension(self) -> &'static str {
        match self {
            FileType::TimeSeriesMetadata => "tmet",
            FileType::TimeSeriesData => "tdat",
            FileType::TimeSeriesIndices => "tidx",
            FileType::VideoMetadata => "vmet",
            FileType::VideoData => "vdat",
            FileType::VideoIndices => "vidx",
            FileType::RecordData => "rdat",
            FileType::RecordIndices => "ridx",
        }
    }
}

bitflags::bitflags! {
    /// Universal-header flags (spec §3.1).
    pub struct HeaderFlags: u32 {
        const LIVE               = 0b0001;
        const ORDERED            = 0b0010;
        const EXPANDED_PASSWORDS = 0b0100;
    }
}

/// Per-section encryption parameters for metadata sections 2 and 3 (spec
/// §3.1, §4.3): which access level, if any, a section is encrypted under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionEncryption {
    pub level: u8, // 0 = not encrypted, 1/2 = access level
}

impl SectionEncryption {
    pub fn is_encrypted(self) -> bool {
        self.level != 0
    }
}

/// The 1024-byte Universal Header, parsed into owned fields.
#[derive(Debug, Clone)]
pub struct UniversalHeader {
    pub header_crc: u32,
    pub body_crc: u32,
    pub file_type: [u8; 4],
    pub med_version_major: u8,
    pub med_version_minor: u8,
    pub byte_order_code: u8,
    pub session_uid: u64,
    pub channel_uid: u64,
    pub segment_uid: u64,
    pub provenance_uid: u64,
    pub segment_number: i32,
    pub file_start_time: i64,
    pub file_end_time: i64,
    pub level1_password_validation: [u8; 16],
    pub level2_password_validation: [u8; 16],
    pub level3_password_validation: [u8; 32],
    pub flags: HeaderFlags,
    pub metadata_section2_encryption: SectionEncryption,
    pub metadata_section3_encryption: SectionEncryption,
}

// Layout offsets within the 1024-byte block. The first four bytes are the
// header CRC itself (spec §3.3: "header_CRC over the UH minus its own first
// four bytes").
pub(crate) mod offset {
    pub const HEADER_CRC: usize = 0x000;
    pub const BODY_CRC: usize = 0x004;
    pub const FILE_TYPE: usize = 0x008;
    pub const MED_VERSION_MAJOR: usize = 0x00c;
    pub const MED_VERSION_MINOR: usize = 0x00d;
    pub const BYTE_ORDER_CODE: usize = 0x00e;
    pub const FLAGS: usize = 0x010;
    pub const SESSION_UID: usize = 0x018;
    pub const CHANNEL_UID: usize = 0x020;
    pub const SEGMENT_UID: usize = 0x028;
    pub const PROVENANCE_UID: usize = 0x030;
    pub const SEGMENT_NUMBER: usize = 0x038;
    pub const FILE_START_TIME: usize = 0x040;
    pub const FILE_END_TIME: usize = 0x048;
    pub const L1_VALIDATION: usize = 0x050;
    pub const L2_VALIDATION: usize = 0x060;
    pub const L3_VALIDATION: usize = 0x070;
    pub const META2_ENCRYPTION: usize = 0x090;
    pub const META3_ENCRYPTION: usize = 0x091;
}

impl UniversalHeader {
    /// `init_universal_header` (spec §4.1): fixed defaults, all UIDs zero
    /// until assigned by the caller.
    pub fn new(file_type: FileType, generate_uid: impl FnOnce() -> u64) -> Self {
        let uid = generate_uid();
        UniversalHeader {
            header_crc: 0,
            body_crc: 0,
            file_type: file_type.code(),
            med_version_major: MED_VERSION_MAJOR,
            med_version_minor: MED_VERSION_MINOR,
            byte_order_code: BYTE_ORDER_LITTLE_ENDIAN,
            session_uid: uid,
            channel_uid: 0,
            segment_uid: 0,
            provenance_uid: 0,
            segment_number: crate::primitives::SEGMENT_NUMBER_NO_ENTRY,
            file_start_time: crate::primitives::UUTC_NO_ENTRY,
            file_end_time: crate::primitives::UUTC_NO_ENTRY,
            level1_password_validation: [0; 16],
            level2_password_validation: [0; 16],
            level3_password_validation: [0; 32],
            flags: HeaderFlags::EXPANDED_PASSWORDS,
            metadata_section2_encryption: SectionEncryption { level: 0 },
            metadata_section3_encryption: SectionEncryption { level: 0 },
        }
    }

    /// [`UniversalHeader::new`] for callers with no UID source of their own:
    /// draws the session UID from the OS RNG rather than a caller closure.
    pub fn new_with_random_uid(file_type: FileType) -> Self {
        Self::new(file_type, rand::random)
    }

    /// Parses a 1024-byte buffer, validating byte order / type / major
    /// version per spec §4.1. `verify_crc` controls whether `header_CRC` is
    /// checked (it can legitimately be skipped while streaming a partially
    /// written file).
    pub fn from_bytes(buf: &[u8], verify_crc: bool) -> Result<Self, Error> {
        ensure!(
            buf.len() >= UNIVERSAL_HEADER_BYTES,
            crate::error::not_med(format!(
                "universal header too short: {} bytes",
                buf.len()
            ))
        );

        let byte_order_code = buf[offset::BYTE_ORDER_CODE];
        ensure!(
            byte_order_code == BYTE_ORDER_LITTLE_ENDIAN,
            crate::error::not_med("big-endian MED files are not supported by this library")
        );

        let mut file_type = [0u8; 4];
        file_type.copy_from_slice(&buf[offset::FILE_TYPE..offset::FILE_TYPE + 4]);
        ensure!(
            FileType::from_code(&file_type).is_some(),
            crate::error::not_med(format!(
                "unrecognized file type code: {:?}",
                String::from_utf8_lossy(&file_type)
            ))
        );

        let med_version_major = buf[offset::MED_VERSION_MAJOR];
        ensure!(
            med_version_major == MED_VERSION_MAJOR,
            crate::error::not_med(format!(
                "unsupported MED major version {}",
                med_version_major
            ))
        );

        let header_crc = read_le32(&buf[offset::HEADER_CRC..]);
        if verify_crc {
            let computed = crc32(&buf[HEADER_CRC_START..UNIVERSAL_HEADER_BYTES]);
            ensure!(
                computed == header_crc,
                crate::error::crc_mismatch(format!(
                    "universal header CRC mismatch: on-disk {:08x}, computed {:08x}",
                    header_crc, computed
                ))
            );
        }

        let mut l1v = [0u8; 16];
        l1v.copy_from_slice(&buf[offset::L1_VALIDATION..offset::L1_VALIDATION + 16]);
        let mut l2v = [0u8; 16];
        l2v.copy_from_slice(&buf[offset::L2_VALIDATION..offset::L2_VALIDATION + 16]);
        let mut l3v = [0u8; 32];
        l3v.copy_from_slice(&buf[offset::L3_VALIDATION..offset::L3_VALIDATION + 32]);

        Ok(UniversalHeader {
            header_crc,
            body_crc: read_le32(&buf[offset::BODY_CRC..]),
            file_type,
            med_version_major,
            med_version_minor: buf[offset::MED_VERSION_MINOR],
            byte_order_code,
            session_uid: read_le64(&buf[offset::SESSION_UID..]),
            channel_uid: read_le64(&buf[offset::CHANNEL_UID..]),
            segment_uid: read_le64(&buf[offset::SEGMENT_UID..]),
            provenance_uid: read_le64(&buf[offset::PROVENANCE_UID..]),
            segment_number: read_lei32(&buf[offset::SEGMENT_NUMBER..]),
            file_start_time: read_lei64(&buf[offset::FILE_START_TIME..]),
            file_end_time: read_lei64(&buf[offset::FILE_END_TIME..]),
            level1_password_validation: l1v,
            level2_password_validation: l2v,
            level3_password_validation: l3v,
            flags: HeaderFlags::from_bits_truncate(read_le32(&buf[offset::FLAGS..])),
            metadata_section2_encryption: SectionEncryption {
                level: buf[offset::META2_ENCRYPTION],
            },
            metadata_section3_encryption: SectionEncryption {
                level: buf[offset::META3_ENCRYPTION],
            },
        })
    }

    /// Serializes the header into `out[0..1024]`, recomputing both CRCs:
    /// `body_crc` over `[UH_BYTES..EOF]` of the whole file (the caller
    /// supplies the already-written body bytes) and `header_crc` over the
    /// header minus its own first four bytes (spec §3.3).
    pub fn write_to(&self, out: &mut [u8], body: &[u8]) {
        assert!(out.len() >= UNIVERSAL_HEADER_BYTES);

        write_le32(&mut out[offset::BODY_CRC..], crc32(body));
        out[offset::FILE_TYPE..offset::FILE_TYPE + 4].copy_from_slice(&self.file_type);
        out[offset::MED_VERSION_MAJOR] = self.med_version_major;
        out[offset::MED_VERSION_MINOR] = self.med_version_minor;
        out[offset::BYTE_ORDER_CODE] = self.byte_order_code;
        write_le32(&mut out[offset::FLAGS..], self.flags.bits());
        write_le64(&mut out[offset::SESSION_UID..], self.session_uid);
        write_le64(&mut out[offset::CHANNEL_UID..], self.channel_uid);
        write_le64(&mut out[offset::SEGMENT_UID..], self.segment_uid);
        write_le64(&mut out[offset::PROVENANCE_UID..], self.provenance_uid);
        write_lei32(&mut out[offset::SEGMENT_NUMBER..], self.segment_number);
        write_lei64(&mut out[offset::FILE_START_TIME..], self.file_start_time);
        write_lei64(&mut out[offset::FILE_END_TIME..], self.file_end_time);
        out[offset::L1_VALIDATION..offset::L1_VALIDATION + 16]
            .copy_from_slice(&self.level1_password_validation);
        out[offset::L2_VALIDATION..offset::L2_VALIDATION + 16]
            .copy_from_slice(&self.level2_password_validation);
        out[offset::L3_VALIDATION..offset::L3_VALIDATION + 32]
            .copy_from_slice(&self.level3_password_validation);
        out[offset::META2_ENCRYPTION] = self.metadata_section2_encryption.level;
        out[offset::META3_ENCRYPTION] = self.metadata_section3_encryption.level;

        // pad any bytes between the fixed fields and EOF that we don't own
        // explicitly are left as whatever `out` already contained (zeroed by
        // the caller on file creation).

        let crc = crc32(&out[HEADER_CRC_START..UNIVERSAL_HEADER_BYTES]);
        write_le32(&mut out[offset::HEADER_CRC..], crc);
    }

    /// `merge_universal_headers` (spec §4.1): keeps fields that agree
    /// between `a` and `b`, NO_ENTRY-marking (UID zero / NO_ENTRY sentinel)
    /// any that conflict. Used to build ephemeral channel/session
    /// prototypes.
    pub fn merge(a: &UniversalHeader, b: &UniversalHeader) -> UniversalHeader {
        let mut out = a.clone();
        if a.channel_uid != b.channel_uid {
            out.channel_uid = 0;
        }
        if a.segment_uid != b.segment_uid {
            out.segment_uid = 0;
        }
        if a.segment_number != b.segment_number {
            out.segment_number = crate::primitives::SEGMENT_NUMBER_NO_ENTRY;
        }
        out.file_start_time = a.file_start_time.min(b.file_start_time);
        out.file_end_time = a.file_end_time.max(b.file_end_time);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> (Vec<u8>, UniversalHeader) {
        let mut uh = UniversalHeader::new(FileType::TimeSeriesData, || 42);
        uh.channel_uid = 7;
        uh.segment_uid = 99;
        uh.segment_number = 1;
        uh.file_start_time = 1000;
        uh.file_end_time = 2000;

        let body = vec![0xABu8; 256];
        let mut buf = vec![0u8; UNIVERSAL_HEADER_BYTES];
        uh.write_to(&mut buf, &body);
        (buf, uh)
    }

    #[test]
    fn write_then_read_roundtrips() {
        let (buf, original) = sample_header();
        let parsed = UniversalHeader::from_bytes(&buf, true).expect("parses");

        assert_eq!(original.session_uid, parsed.session_uid);
        assert_eq!(original.channel_uid, parsed.channel_uid);
        assert_eq!(original.segment_uid, parsed.segment_uid);
        assert_eq!(original.file_start_time, parsed.file_start_time);
        assert_eq!(original.file_end_time, parsed.file_end_time);
        assert_eq!(FileType::TimeSeriesData.code(), parsed.file_type);
    }

    #[test]
    fn corrupted_header_crc_is_rejected() {
        let (mut buf, _) = sample_header();
        buf[500] ^= 0xFF; // flip a byte inside the header region
        let err = UniversalHeader::from_bytes(&buf, true).unwrap_err();
        assert!(err.to_string().contains("CRYP"));
    }

    #[test]
    fn big_endian_is_rejected() {
        let (mut buf, _) = sample_header();
        buf[offset::BYTE_ORDER_CODE] = BYTE_ORDER_BIG_ENDIAN;
        assert!(UniversalHeader::from_bytes(&buf, false).is_err());
    }

    #[test]
    fn merge_zeros_conflicting_uids() {
        let (_, mut a) = sample_header();
        let mut b = a.clone();
        b.channel_uid = 999;

        let merged = UniversalHeader::merge(&a, &b);
        assert_eq!(0, merged.channel_uid);

        a.channel_uid = b.channel_uid;
        let merged2 = UniversalHeader::merge(&a, &b);
        assert_eq!(999, merged2.channel_uid);
    }
}
