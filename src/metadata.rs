//! Metadata (spec §3.1): the 15 360-byte body that follows the universal
//! header in every `tmet`/`vmet` file, split into three fixed-size
//! sections. Sections 2 and 3 may be independently encrypted (spec §4.3);
//! each is read and decrypted the way [`crate::crypto::decrypt_region`]
//! operates on any other protected region, never by aliasing the buffer
//! through a union as the original C layout does (spec §9: "read raw bytes
//! into a buffer and construct the typed view by explicit parsing").

use anyhow::{ensure, Error};

use crate::primitives::{
    read_le32, read_le64, read_lef64, read_lei32, read_lei64, write_le32, write_le64,
    write_lef64, write_lei32, write_lei64, METADATA_BODY_BYTES,
};

pub const SECTION_1_BYTES: usize = 1024;
pub const SECTION_2_BYTES: usize = 4096;
pub const SECTION_3_BYTES: usize = METADATA_BODY_BYTES - SECTION_1_BYTES - SECTION_2_BYTES;

pub(crate) mod section1_offset {
    pub const LEVEL1_PASSWORD_HINT: usize = 0;
    pub const LEVEL1_PASSWORD_HINT_BYTES: usize = 128;
    pub const LEVEL2_PASSWORD_HINT: usize = LEVEL1_PASSWORD_HINT + LEVEL1_PASSWORD_HINT_BYTES;
    pub const LEVEL2_PASSWORD_HINT_BYTES: usize = 128;
    pub const SUBJECT_NAME: usize = LEVEL2_PASSWORD_HINT + LEVEL2_PASSWORD_HINT_BYTES;
    pub const SUBJECT_NAME_BYTES: usize = 256;
    pub const SUBJECT_ID: usize = SUBJECT_NAME + SUBJECT_NAME_BYTES;
    pub const SUBJECT_ID_BYTES: usize = 256;
}

pub(crate) mod section2_offset {
    pub const CHANNEL_DESCRIPTION: usize = 0;
    pub const CHANNEL_DESCRIPTION_BYTES: usize = 256;
    pub const SESSION_DESCRIPTION: usize = CHANNEL_DESCRIPTION + CHANNEL_DESCRIPTION_BYTES;
    pub const SESSION_DESCRIPTION_BYTES: usize = 256;
    pub const ACQUISITION_CHANNEL_NUMBER: usize = SESSION_DESCRIPTION + SESSION_DESCRIPTION_BYTES;
    pub const SAMPLING_FREQUENCY: usize = ACQUISITION_CHANNEL_NUMBER + 4;
    pub const LOW_FREQUENCY_FILTER_SETTING: usize = SAMPLING_FREQUENCY + 8;
    pub const HIGH_FREQUENCY_FILTER_SETTING: usize = LOW_FREQUENCY_FILTER_SETTING + 8;
    pub const NOTCH_FILTER_FREQUENCY_SETTING: usize = HIGH_FREQUENCY_FILTER_SETTING + 8;
    pub const AC_COUPLING: usize = NOTCH_FILTER_FREQUENCY_SETTING + 8;
    pub const UNITS_CONVERSION_FACTOR: usize = AC_COUPLING + 8;
    pub const UNITS_DESCRIPTION: usize = UNITS_CONVERSION_FACTOR + 8;
    pub const UNITS_DESCRIPTION_BYTES: usize = 32;
    pub const NUMBER_OF_SAMPLES: usize = UNITS_DESCRIPTION + UNITS_DESCRIPTION_BYTES;
    pub const MAXIMUM_BLOCK_SAMPLES: usize = NUMBER_OF_SAMPLES + 8;
    pub const MAXIMUM_BLOCK_DURATION: usize = MAXIMUM_BLOCK_SAMPLES + 4;
}

pub(crate) mod section3_offset {
    pub const RECORDING_TIME_OFFSET: usize = 0;
    pub const DST_START_TIME: usize = RECORDING_TIME_OFFSET + 8;
    pub const DST_END_TIME: usize = DST_START_TIME + 8;
    pub const STANDARD_UTC_OFFSET: usize = DST_END_TIME + 8;
    pub const STANDARD_TIMEZONE_ACRONYM: usize = STANDARD_UTC_OFFSET + 8;
    pub const STANDARD_TIMEZONE_ACRONYM_BYTES: usize = 8;
    pub const DAYLIGHT_TIMEZONE_ACRONYM: usize =
        STANDARD_TIMEZONE_ACRONYM + STANDARD_TIMEZONE_ACRONYM_BYTES;
    pub const DAYLIGHT_TIMEZONE_ACRONYM_BYTES: usize = 8;
    pub const LOCALITY_DESCRIPTION: usize =
        DAYLIGHT_TIMEZONE_ACRONYM + DAYLIGHT_TIMEZONE_ACRONYM_BYTES;
    pub const LOCALITY_DESCRIPTION_BYTES: usize = 256;
}

fn read_fixed_string(buf: &[u8], offset: usize, len: usize) -> String {
    let raw = &buf[offset..offset + len];
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

fn write_fixed_string(buf: &mut [u8], offset: usize, len: usize, value: &str) {
    let region = &mut buf[offset..offset + len];
    for b in region.iter_mut() {
        *b = 0;
    }
    let bytes = value.as_bytes();
    let n = bytes.len().min(len);
    region[..n].copy_from_slice(&bytes[..n]);
}

/// Metadata Section 1: password hints and subject identity (spec §3.1).
/// Never encrypted.
#[derive(Debug, Clone, Default)]
pub struct Section1 {
    pub level1_password_hint: String,
    pub level2_password_hint: String,
    pub subject_name: String,
    pub subject_id: String,
}

impl Section1 {
    pub fn from_bytes(buf: &[u8; SECTION_1_BYTES]) -> Self {
        use section1_offset::*;
        Section1 {
            level1_password_hint: read_fixed_string(
                buf,
                LEVEL1_PASSWORD_HINT,
                LEVEL1_PASSWORD_HINT_BYTES,
            ),
            level2_password_hint: read_fixed_string(
                buf,
                LEVEL2_PASSWORD_HINT,
                LEVEL2_PASSWORD_HINT_BYTES,
            ),
            subject_name: read_fixed_string(buf, SUBJECT_NAME, SUBJECT_NAME_BYTES),
            subject_id: read_fixed_string(buf, SUBJECT_ID, SUBJECT_ID_BYTES),
        }
    }

    pub fn write_to(&self, buf: &mut [u8; SECTION_1_BYTES]) {
        use section1_offset::*;
        write_fixed_string(
            buf,
            LEVEL1_PASSWORD_HINT,
            LEVEL1_PASSWORD_HINT_BYTES,
            &self.level1_password_hint,
        );
        write_fixed_string(
            buf,
            LEVEL2_PASSWORD_HINT,
            LEVEL2_PASSWORD_HINT_BYTES,
            &self.level2_password_hint,
        );
        write_fixed_string(buf, SUBJECT_NAME, SUBJECT_NAME_BYTES, &self.subject_name);
        write_fixed_string(buf, SUBJECT_ID, SUBJECT_ID_BYTES, &self.subject_id);
    }
}

/// Metadata Section 2: type-specific acquisition parameters (spec §3.1).
/// Encryptable at L1 by default.
#[derive(Debug, Clone)]
pub struct Section2 {
    pub channel_description: String,
    pub session_description: String,
    pub acquisition_channel_number: i32,
    pub sampling_frequency: f64,
    pub low_frequency_filter_setting: f64,
    pub high_frequency_filter_setting: f64,
    pub notch_filter_frequency_setting: f64,
    pub ac_coupling: f64,
    pub units_conversion_factor: f64,
    pub units_description: String,
    pub number_of_samples: i64,
    pub maximum_block_samples: i32,
    pub maximum_block_duration: u32,
}

impl Default for Section2 {
    fn default() -> Self {
        Section2 {
            channel_description: String::new(),
            session_description: String::new(),
            acquisition_channel_number: crate::primitives::CHANNEL_NUMBER_NO_ENTRY,
            sampling_frequency: crate::primitives::RATE_NO_ENTRY,
            low_frequency_filter_setting: 0.0,
            high_frequency_filter_setting: 0.0,
            notch_filter_frequency_setting: 0.0,
            ac_coupling: 0.0,
            units_conversion_factor: 1.0,
            units_description: String::new(),
            number_of_samples: 0,
            maximum_block_samples: 0,
            maximum_block_duration: 0,
        }
    }
}

impl Section2 {
    pub fn from_bytes(buf: &[u8; SECTION_2_BYTES]) -> Self {
        use section2_offset::*;
        Section2 {
            channel_description: read_fixed_string(
                buf,
                CHANNEL_DESCRIPTION,
                CHANNEL_DESCRIPTION_BYTES,
            ),
            session_description: read_fixed_string(
                buf,
                SESSION_DESCRIPTION,
                SESSION_DESCRIPTION_BYTES,
            ),
            acquisition_channel_number: read_lei32(&buf[ACQUISITION_CHANNEL_NUMBER..]),
            sampling_frequency: read_lef64(&buf[SAMPLING_FREQUENCY..]),
            low_frequency_filter_setting: read_lef64(&buf[LOW_FREQUENCY_FILTER_SETTING..]),
            high_frequency_filter_setting: read_lef64(&buf[HIGH_FREQUENCY_FILTER_SETTING..]),
            notch_filter_frequency_setting: read_lef64(&buf[NOTCH_FILTER_FREQUENCY_SETTING..]),
            ac_coupling: read_lef64(&buf[AC_COUPLING..]),
            units_conversion_factor: read_lef64(&buf[UNITS_CONVERSION_FACTOR..]),
            units_description: read_fixed_string(buf, UNITS_DESCRIPTION, UNITS_DESCRIPTION_BYTES),
            number_of_samples: read_lei64(&buf[NUMBER_OF_SAMPLES..]),
            maximum_block_samples: read_lei32(&buf[MAXIMUM_BLOCK_SAMPLES..]),
            maximum_block_duration: read_le32(&buf[MAXIMUM_BLOCK_DURATION..]),
        }
    }

    pub fn write_to(&self, buf: &mut [u8; SECTION_2_BYTES]) {
        use section2_offset::*;
        write_fixed_string(
            buf,
            CHANNEL_DESCRIPTION,
            CHANNEL_DESCRIPTION_BYTES,
            &self.channel_description,
        );
        write_fixed_string(
            buf,
            SESSION_DESCRIPTION,
            SESSION_DESCRIPTION_BYTES,
            &self.session_description,
        );
        write_lei32(
            &mut buf[ACQUISITION_CHANNEL_NUMBER..],
            self.acquisition_channel_number,
        );
        write_lef64(&mut buf[SAMPLING_FREQUENCY..], self.sampling_frequency);
        write_lef64(
            &mut buf[LOW_FREQUENCY_FILTER_SETTING..],
            self.low_frequency_filter_setting,
        );
        write_lef64(
            &mut buf[HIGH_FREQUENCY_FILTER_SETTING..],
            self.high_frequency_filter_setting,
        );
        write_lef64(
            &mut buf[NOTCH_FILTER_FREQUENCY_SETTING..],
            self.notch_filter_frequency_setting,
        );
        write_lef64(&mut buf[AC_COUPLING..], self.ac_coupling);
        write_lef64(
            &mut buf[UNITS_CONVERSION_FACTOR..],
            self.units_conversion_factor,
        );
        write_fixed_string(
            buf,
            UNITS_DESCRIPTION,
            UNITS_DESCRIPTION_BYTES,
            &self.units_description,
        );
        write_lei64(&mut buf[NUMBER_OF_SAMPLES..], self.number_of_samples);
        write_lei32(
            &mut buf[MAXIMUM_BLOCK_SAMPLES..],
            self.maximum_block_samples,
        );
        write_le32(
            &mut buf[MAXIMUM_BLOCK_DURATION..],
            self.maximum_block_duration,
        );
    }
}

/// Metadata Section 3: timing and locale (spec §3.1). Encryptable at L2 by
/// default.
#[derive(Debug, Clone, Default)]
pub struct Section3 {
    pub recording_time_offset: i64,
    pub daylight_savings_start_time: i64,
    pub daylight_savings_end_time: i64,
    pub standard_utc_offset: i64,
    pub standard_timezone_acronym: String,
    pub daylight_timezone_acronym: String,
    pub locality_description: String,
}

impl Section3 {
    pub fn from_bytes(buf: &[u8; SECTION_3_BYTES]) -> Self {
        use section3_offset::*;
        Section3 {
            recording_time_offset: read_le64(&buf[RECORDING_TIME_OFFSET..]) as i64,
            daylight_savings_start_time: read_le64(&buf[DST_START_TIME..]) as i64,
            daylight_savings_end_time: read_le64(&buf[DST_END_TIME..]) as i64,
            standard_utc_offset: read_le64(&buf[STANDARD_UTC_OFFSET..]) as i64,
            standard_timezone_acronym: read_fixed_string(
                buf,
                STANDARD_TIMEZONE_ACRONYM,
                STANDARD_TIMEZONE_ACRONYM_BYTES,
            ),
            daylight_timezone_acronym: read_fixed_string(
                buf,
                DAYLIGHT_TIMEZONE_ACRONYM,
                DAYLIGHT_TIMEZONE_ACRONYM_BYTES,
            ),
            locality_description: read_fixed_string(
                buf,
                LOCALITY_DESCRIPTION,
                LOCALITY_DESCRIPTION_BYTES,
            ),
        }
    }

    pub fn write_to(&self, buf: &mut [u8; SECTION_3_BYTES]) {
        use section3_offset::*;
        write_le64(
            &mut buf[RECORDING_TIME_OFFSET..],
            self.recording_time_offset as u64,
        );
        write_le64(
            &mut buf[DST_START_TIME..],
            self.daylight_savings_start_time as u64,
        );
        write_le64(
            &mut buf[DST_END_TIME..],
            self.daylight_savings_end_time as u64,
        );
        write_le64(
            &mut buf[STANDARD_UTC_OFFSET..],
            self.standard_utc_offset as u64,
        );
        write_fixed_string(
            buf,
            STANDARD_TIMEZONE_ACRONYM,
            STANDARD_TIMEZONE_ACRONYM_BYTES,
            &self.standard_timezone_acronym,
        );
        write_fixed_string(
            buf,
            DAYLIGHT_TIMEZONE_ACRONYM,
            DAYLIGHT_TIMEZONE_ACRONYM_BYTES,
            &self.daylight_timezone_acronym,
        );
        write_fixed_string(
            buf,
            LOCALITY_DESCRIPTION,
            LOCALITY_DESCRIPTION_BYTES,
            &self.locality_description,
        );
    }
}

fn decrypt_section(
    region: &mut [u8],
    encryption: crate::header::SectionEncryption,
    password_data: &crate::crypto::PasswordData,
) -> Result<(), Error> {
    if !encryption.is_encrypted() {
        return Ok(());
    }
    let level = match encryption.level {
        1 => crate::crypto::AccessLevel::Level1,
        _ => crate::crypto::AccessLevel::Level2,
    };
    let key = password_data.key_for(level).ok_or_else(|| {
        crate::error::access_denied("metadata section is encrypted and no matching password key is available")
    })?;
    crate::crypto::decrypt_region(key, region)
}

/// The full 15 360-byte metadata body. Sections 2/3 are stored decrypted
/// here; [`Metadata::from_encrypted_bytes`] handles the on-disk encrypted
/// form using the caller's [`crate::crypto::PasswordData`].
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    pub section1: Section1,
    pub section2: Section2,
    pub section3: Section3,
}

impl Metadata {
    /// Parses a plaintext 15 360-byte body (sections already decrypted by
    /// the caller, if needed).
    pub fn from_plain_bytes(buf: &[u8]) -> Result<Self, Error> {
        ensure!(
            buf.len() == METADATA_BODY_BYTES,
            crate::error::not_med(format!(
                "metadata body must be {} bytes, got {}",
                METADATA_BODY_BYTES,
                buf.len()
            ))
        );

        let mut s1 = [0u8; SECTION_1_BYTES];
        s1.copy_from_slice(&buf[..SECTION_1_BYTES]);
        let mut s2 = [0u8; SECTION_2_BYTES];
        s2.copy_from_slice(&buf[SECTION_1_BYTES..SECTION_1_BYTES + SECTION_2_BYTES]);
        let mut s3 = [0u8; SECTION_3_BYTES];
        s3.copy_from_slice(&buf[SECTION_1_BYTES + SECTION_2_BYTES..]);

        Ok(Metadata {
            section1: Section1::from_bytes(&s1),
            section2: Section2::from_bytes(&s2),
            section3: Section3::from_bytes(&s3),
        })
    }

    /// Parses an on-disk 15 360-byte body, decrypting sections 2 and 3
    /// first if the universal header marks them as encrypted (spec §4.3).
    /// A section encrypted under a level absent from `password_data` fails
    /// with an access-denied error rather than parsing garbage.
    pub fn from_encrypted_bytes(
        buf: &[u8],
        header: &crate::header::UniversalHeader,
        password_data: &crate::crypto::PasswordData,
    ) -> Result<Self, Error> {
        ensure!(
            buf.len() == METADATA_BODY_BYTES,
            crate::error::not_med(format!(
                "metadata body must be {} bytes, got {}",
                METADATA_BODY_BYTES,
                buf.len()
            ))
        );

        let mut body = buf.to_vec();
        decrypt_section(
            &mut body[SECTION_1_BYTES..SECTION_1_BYTES + SECTION_2_BYTES],
            header.metadata_section2_encryption,
            password_data,
        )?;
        decrypt_section(
            &mut body[SECTION_1_BYTES + SECTION_2_BYTES..],
            header.metadata_section3_encryption,
            password_data,
        )?;
        Self::from_plain_bytes(&body)
    }

    pub fn write_to(&self, buf: &mut [u8]) {
        assert_eq!(METADATA_BODY_BYTES, buf.len());
        let mut s1 = [0u8; SECTION_1_BYTES];
        self.section1.write_to(&mut s1);
        buf[..SECTION_1_BYTES].copy_from_slice(&s1);

        let mut s2 = [0u8; SECTION_2_BYTES];
        self.section2.write_to(&mut s2);
        buf[SECTION_1_BYTES..SECTION_1_BYTES + SECTION_2_BYTES].copy_from_slice(&s2);

        let mut s3 = [0u8; SECTION_3_BYTES];
        self.section3.write_to(&mut s3);
        buf[SECTION_1_BYTES + SECTION_2_BYTES..].copy_from_slice(&s3);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn section_sizes_sum_to_body() {
        assert_eq!(
            METADATA_BODY_BYTES,
            SECTION_1_BYTES + SECTION_2_BYTES + SECTION_3_BYTES
        );
    }

    #[test]
    fn roundtrips_through_plain_bytes() {
        let mut md = Metadata::default();
        md.section1.subject_name = "Jane Doe".to_string();
        md.section2.sampling_frequency = 256.0;
        md.section2.channel_description = "left hippocampus".to_string();
        md.section3.locality_description = "Pacific/Auckland".to_string();

        let mut buf = vec![0u8; METADATA_BODY_BYTES];
        md.write_to(&mut buf);

        let parsed = Metadata::from_plain_bytes(&buf).unwrap();
        assert_eq!("Jane Doe", parsed.section1.subject_name);
        assert_eq!(256.0, parsed.section2.sampling_frequency);
        assert_eq!("left hippocampus", parsed.section2.channel_description);
        assert_eq!("Pacific/Auckland", parsed.section3.locality_description);
    }

    #[test]
    fn rejects_wrong_length() {
        let buf = vec![0u8; 10];
        assert!(Metadata::from_plain_bytes(&buf).is_err());
    }

    #[test]
    fn from_encrypted_bytes_fails_without_matching_key() {
        let key = crate::crypto::derive_key("hunter2", true);

        let mut md = Metadata::default();
        md.section2.channel_description = "left hippocampus".to_string();
        let mut buf = vec![0u8; METADATA_BODY_BYTES];
        md.write_to(&mut buf);

        let mut section2 = buf[SECTION_1_BYTES..SECTION_1_BYTES + SECTION_2_BYTES].to_vec();
        crate::aes::Aes128Key::expand(&key).encrypt(&mut section2);
        buf[SECTION_1_BYTES..SECTION_1_BYTES + SECTION_2_BYTES].copy_from_slice(&section2);

        let mut header = crate::header::UniversalHeader::new(crate::header::FileType::TimeSeriesMetadata, || 0);
        header.metadata_section2_encryption = crate::header::SectionEncryption { level: 1 };

        let empty_password_data = crate::crypto::PasswordData::default();
        assert!(Metadata::from_encrypted_bytes(&buf, &header, &empty_password_data).is_err());

        let mut password_data = crate::crypto::PasswordData::default();
        password_data.level1_key = Some(key);
        let parsed = Metadata::from_encrypted_bytes(&buf, &header, &password_data).unwrap();
        assert_eq!("left hippocampus", parsed.section2.channel_description);
    }
}
