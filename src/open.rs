//! Session open/extract surface (spec §4.1/§4.2/§4.6, §6.1): walks a
//! `.medd` session directory by channel-directory and segment-directory
//! name, building the in-memory [`hierarchy::Session`] from each segment's
//! `tmet`/`tidx` pair, and extracting decoded samples for a resolved
//! [`Slice`] by reading compressed blocks out of each segment's `tdat`
//! straight through [`crate::codec`].

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{ensure, Error};

use crate::block::BlockHeader;
use crate::codec::{self, wire, Cps, Mode};
use crate::crypto::PasswordData;
use crate::fps::Fps;
use crate::header::UniversalHeader;
use crate::hierarchy::channel::ChannelKind;
use crate::hierarchy::contigua::Contiguon;
use crate::hierarchy::segment::TsiEntry;
use crate::hierarchy::slice::{find_index, FindIndexMode, Numbering, SearchMode};
use crate::hierarchy::{Channel, Segment, Session, Slice};
use crate::metadata::Metadata;
use crate::options::Options;
use crate::primitives::{RI_BYTES, TSI_BYTES, UNIVERSAL_HEADER_BYTES};
use crate::records::{self, Sgmt};

pub struct MedSession {
    pub session: Session,
    pub root: PathBuf,
    pub options: Options,
    /// The access level `options.default_password` unlocked against the
    /// index channel's validation fields, for callers that want to know
    /// what they're allowed to read without re-deriving it themselves.
    pub password_data: PasswordData,
}

fn entries_with_suffix(dir: &Path, suffix: &str) -> Result<Vec<PathBuf>, Error> {
    let mut out = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| crate::error::not_found(format!("{}: {}", dir.display(), e)))? {
        let entry = entry.map_err(|e| crate::error::generic(e.to_string()))?;
        let path = entry.path();
        if path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.ends_with(suffix))
            .unwrap_or(false)
        {
            out.push(path);
        }
    }
    out.sort();
    Ok(out)
}

fn single_file_with_extension(dir: &Path, ext: &str) -> Result<Option<PathBuf>, Error> {
    let mut found = None;
    for entry in fs::read_dir(dir).map_err(|e| crate::error::not_found(format!("{}: {}", dir.display(), e)))? {
        let entry = entry.map_err(|e| crate::error::generic(e.to_string()))?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some(ext) {
            found = Some(path);
        }
    }
    Ok(found)
}

/// Reads a `tmet` file's universal header + metadata body (spec §6.1: a
/// 16 384-byte file, 1024-byte UH + 15 360-byte body), decrypting sections
/// 2/3 against whatever password the header itself validates (spec §4.3).
fn read_metadata_file(path: &Path, options: &Options) -> Result<(UniversalHeader, Metadata), Error> {
    let mut fps = Fps::open(path, "r")?;
    let buf = fps.read_full()?;
    ensure!(
        buf.len() >= UNIVERSAL_HEADER_BYTES,
        crate::error::not_med(format!("{} is shorter than the universal header", path.display()))
    );
    let header = UniversalHeader::from_bytes(&buf[..UNIVERSAL_HEADER_BYTES], true)?;
    let password_data = password_data_for_header(&header, options);
    let metadata = Metadata::from_encrypted_bytes(&buf[UNIVERSAL_HEADER_BYTES..], &header, &password_data)?;
    Ok((header, metadata))
}

/// Derives whatever `PasswordData` the supplied password unlocks against
/// one file's own validation fields (spec §4.3). Every file in a session
/// carries the same validation fields, so this can be recomputed per file
/// rather than threaded through as shared session state.
fn password_data_for_header(header: &UniversalHeader, options: &Options) -> PasswordData {
    let mut password_data = PasswordData::default();

    let Some(password) = options.default_password.as_deref() else {
        return password_data;
    };

    if let Some(key) = crate::crypto::validate_password(
        &header.level1_password_validation,
        password,
        options.expanded_passwords,
    ) {
        password_data.level1_key = Some(key);
    }
    if let Some(key) = crate::crypto::validate_password(
        &header.level2_password_validation,
        password,
        options.expanded_passwords,
    ) {
        password_data.level2_key = Some(key);
    }
    if let Some((l1, l2)) = crate::crypto::recover_l1_l2(
        &header.level3_password_validation,
        &header.level1_password_validation,
        &header.level2_password_validation,
        password,
        options.expanded_passwords,
    ) {
        password_data.level1_key.get_or_insert(l1);
        password_data.level2_key.get_or_insert(l2);
        password_data.level3_key = Some(crate::crypto::derive_key(password, options.expanded_passwords));
    }

    password_data
}

/// Reads a segment directory's `ridx`/`rdat` pair, if present, and returns
/// its Sgmt records (spec §4.5) for caching on the session.
fn read_segment_sgmt_records(dir: &Path, password_data: &PasswordData) -> Result<Vec<Sgmt>, Error> {
    let (ridx_path, rdat_path) = match (
        single_file_with_extension(dir, "ridx")?,
        single_file_with_extension(dir, "rdat")?,
    ) {
        (Some(r), Some(d)) => (r, d),
        _ => return Ok(Vec::new()),
    };

    let mut ridx_fps = Fps::open(&ridx_path, "r")?;
    let ridx_buf = ridx_fps.read_full()?;
    ensure!(
        ridx_buf.len() >= UNIVERSAL_HEADER_BYTES,
        crate::error::not_med(format!("{} is shorter than the universal header", ridx_path.display()))
    );
    let ridx_body = &ridx_buf[UNIVERSAL_HEADER_BYTES..];
    ensure!(
        ridx_body.len() % RI_BYTES == 0,
        crate::error::record_error("ridx body is not a multiple of the RI entry size")
    );
    let index_entries: Vec<records::RecordIndexEntry> = ridx_body
        .chunks(RI_BYTES)
        .map(records::RecordIndexEntry::from_bytes)
        .collect::<Result<_, _>>()?;

    let mut rdat_fps = Fps::open(&rdat_path, "r")?;
    let rdat_buf = rdat_fps.read_full()?;
    ensure!(
        rdat_buf.len() >= UNIVERSAL_HEADER_BYTES,
        crate::error::not_med(format!("{} is shorter than the universal header", rdat_path.display()))
    );
    let rdat_body = &rdat_buf[UNIVERSAL_HEADER_BYTES..];

    let filter = records::RecordFilter::new(vec![records::SGMT_TYPE_CODE as i64]);
    let recs = records::show_records(&index_entries, rdat_body, &filter, password_data)?;

    Ok(recs
        .into_iter()
        .filter_map(|r| match r.body {
            records::Body::Sgmt(sgmt) => Some(sgmt),
            _ => None,
        })
        .collect())
}

fn read_tsi_file(path: &Path) -> Result<Vec<TsiEntry>, Error> {
    let mut fps = Fps::open(path, "r")?;
    let buf = fps.read_full()?;
    ensure!(
        buf.len() >= UNIVERSAL_HEADER_BYTES,
        crate::error::not_med(format!("{} is shorter than the universal header", path.display()))
    );
    let body = &buf[UNIVERSAL_HEADER_BYTES..];
    ensure!(
        body.len() % TSI_BYTES == 0,
        crate::error::record_error("tidx body is not a multiple of the TSI entry size")
    );
    body.chunks(TSI_BYTES).map(TsiEntry::from_bytes).collect()
}

struct SegmentDir {
    tmet: PathBuf,
    tdat: PathBuf,
    tidx: PathBuf,
}

fn find_segment_files(dir: &Path) -> Result<SegmentDir, Error> {
    let tmet = single_file_with_extension(dir, "tmet")?
        .ok_or_else(|| crate::error::not_found(format!("{} has no tmet file", dir.display())))?;
    let tdat = single_file_with_extension(dir, "tdat")?
        .ok_or_else(|| crate::error::not_found(format!("{} has no tdat file", dir.display())))?;
    let tidx = single_file_with_extension(dir, "tidx")?
        .ok_or_else(|| crate::error::not_found(format!("{} has no tidx file", dir.display())))?;
    Ok(SegmentDir { tmet, tdat, tidx })
}

fn load_segment(
    dir: &Path,
    options: &Options,
) -> Result<(Segment, UniversalHeader, i32, PathBuf, Vec<Sgmt>), Error> {
    let files = find_segment_files(dir)?;
    let (header, metadata) = read_metadata_file(&files.tmet, options)?;
    let indices = read_tsi_file(&files.tidx)?;

    let mut segment = Segment::new(header.segment_number, metadata.section2.sampling_frequency);
    segment.total_number_of_samples = metadata.section2.number_of_samples;
    segment.indices = indices;
    segment.validate()?;

    let password_data = password_data_for_header(&header, options);
    let sgmt_records = read_segment_sgmt_records(dir, &password_data)?;

    Ok((
        segment,
        header,
        metadata.section2.acquisition_channel_number,
        files.tdat,
        sgmt_records,
    ))
}

fn load_channel(dir: &Path, kind: ChannelKind, options: &Options) -> Result<(Channel, Vec<Sgmt>), Error> {
    let suffix = match kind {
        ChannelKind::TimeSeries => ".tisd",
        ChannelKind::Video => ".visd",
    };
    let name = dir
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("channel")
        .trim_end_matches(".ticd")
        .trim_end_matches(".vicd")
        .to_string();

    let mut channel = Channel::new(name, kind);
    let mut segment_headers = Vec::new();
    let mut sgmt_records = Vec::new();

    for seg_dir in entries_with_suffix(dir, suffix)? {
        let (segment, header, acquisition_channel_number, _tdat_path, records) =
            load_segment(&seg_dir, options)?;
        channel.acquisition_channel_number = acquisition_channel_number;
        segment_headers.push(header);
        channel.segments.push(segment);
        sgmt_records.extend(records);
    }
    channel.segments.sort_by_key(|s| s.segment_number);

    if !segment_headers.is_empty() {
        channel.build_ephemeral_header(&segment_headers)?;
    }

    Ok((channel, sgmt_records))
}

impl MedSession {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        Self::open_with_options(path, &Options::default())
    }

    /// Walks the session directory (spec §6.1 directory layout): every
    /// `.ticd`/`.vicd` entry is a channel, every `.tisd`/`.visd` entry
    /// inside it a segment.
    pub fn open_with_options(path: impl AsRef<Path>, options: &Options) -> Result<Self, Error> {
        crate::alignment::check_all();

        let root = path.as_ref().to_path_buf();
        ensure!(
            root.is_dir(),
            crate::error::not_found(format!("{} is not a directory", root.display()))
        );

        let mut session = Session::new();
        let mut password_data = PasswordData::default();

        for dir in entries_with_suffix(&root, ".ticd")? {
            let (channel, sgmt_records) = load_channel(&dir, ChannelKind::TimeSeries, options)?;
            session.cache_sgmt_records(sgmt_records)?;
            session.time_series_channels.push(channel);
        }
        for dir in entries_with_suffix(&root, ".vicd")? {
            let (channel, sgmt_records) = load_channel(&dir, ChannelKind::Video, options)?;
            session.cache_sgmt_records(sgmt_records)?;
            session.video_channels.push(channel);
        }

        ensure!(
            !session.time_series_channels.is_empty() || !session.video_channels.is_empty(),
            crate::error::not_med(format!("{} has no channel directories", root.display()))
        );

        if !session.time_series_channels.is_empty() {
            session.set_index_channel(0)?;
            if let Some(header) = session.index_channel().and_then(|c| c.ephemeral_header.as_ref()) {
                password_data = password_data_for_header(header, options);
            }
        }

        Ok(MedSession {
            session,
            root,
            options: options.clone(),
            password_data,
        })
    }

    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.session
            .time_series_channels
            .iter()
            .chain(self.session.video_channels.iter())
    }

    pub fn channel(&self, name: &str) -> Option<&Channel> {
        self.session.channel(name)
    }

    fn tdat_path_for(&self, channel_name: &str, segment_number: i32) -> Result<PathBuf, Error> {
        let channel_dir = entries_with_suffix(&self.root, ".ticd")?
            .into_iter()
            .find(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.trim_end_matches(".ticd") == channel_name)
                    .unwrap_or(false)
            })
            .ok_or_else(|| crate::error::not_found(format!("no channel directory for {}", channel_name)))?;

        for seg_dir in entries_with_suffix(&channel_dir, ".tisd")? {
            let tmet_path = single_file_with_extension(&seg_dir, "tmet")?
                .ok_or_else(|| crate::error::not_found(format!("{} has no tmet file", seg_dir.display())))?;
            let (header, _) = read_metadata_file(&tmet_path, &self.options)?;
            if header.segment_number == segment_number {
                return single_file_with_extension(&seg_dir, "tdat")?.ok_or_else(|| {
                    crate::error::not_found(format!("{} has no tdat file", seg_dir.display()))
                });
            }
        }
        Err(crate::error::not_found(format!(
            "no segment {} under channel {}",
            segment_number, channel_name
        ))
        .into())
    }

    /// Extracts decoded samples for `slice` on `channel_name` (spec §4.6,
    /// the MED2RAW collaborator's core job): conditions the slice against
    /// this session, then reads and decodes every time-series block that
    /// overlaps the resolved range, clipping the first and last decoded
    /// blocks down to exactly the requested sample/time bounds.
    pub fn extract(&self, channel_name: &str, slice: &mut Slice) -> Result<Vec<i32>, Error> {
        self.session.condition_slice(slice)?;
        log::trace!("extracting channel {} for slice {:?}", channel_name, slice);

        let channel = self
            .channel(channel_name)
            .ok_or_else(|| crate::error::not_found(format!("no channel named {}", channel_name)))?;

        let mut out = Vec::new();
        let mut cps = Cps::new(Mode::Decompression, self.options.cps_cache_enabled);

        let index_bounds = match slice.mode {
            SearchMode::Index => Some((
                slice.start_index.unwrap_or(0),
                slice.end_index.unwrap_or_else(|| channel.total_samples() - 1),
            )),
            SearchMode::Time => None,
        };

        for segment in &channel.segments {
            if let (Some(start), Some(end)) = (slice.start_segment_number, slice.end_segment_number) {
                if segment.segment_number < start || segment.segment_number > end {
                    continue;
                }
            }

            let (first_entry, last_entry) = match index_bounds {
                Some((start_index, end_index)) => {
                    let sample_numbers: Vec<i64> =
                        segment.indices.iter().map(|e| e.start_sample_number).collect();
                    let first = find_index(
                        &sample_numbers,
                        start_index,
                        FindIndexMode::LastOnOrBefore,
                        Numbering::Absolute,
                        0,
                        true,
                    );
                    let last = find_index(
                        &sample_numbers,
                        end_index,
                        FindIndexMode::LastOnOrBefore,
                        Numbering::Absolute,
                        0,
                        true,
                    );
                    match (first, last) {
                        (Some(f), Some(l)) if f <= l => (f, l),
                        _ => continue,
                    }
                }
                None => {
                    let start_times: Vec<i64> = segment.indices.iter().map(|e| e.start_time).collect();
                    let first = find_index(
                        &start_times,
                        slice.start_time,
                        FindIndexMode::LastOnOrBefore,
                        Numbering::Absolute,
                        0,
                        true,
                    );
                    let last = find_index(
                        &start_times,
                        slice.end_time,
                        FindIndexMode::LastOnOrBefore,
                        Numbering::Absolute,
                        0,
                        true,
                    );
                    match (first, last) {
                        (Some(f), Some(l)) if f <= l => (f, l),
                        _ => continue,
                    }
                }
            };

            let tdat_path = self.tdat_path_for(channel_name, segment.segment_number)?;
            let mut fps = Fps::open(&tdat_path, "r")?;
            let file_len = fps.len()?;

            for i in first_entry..=last_entry {
                let entry = &segment.indices[i];
                let offset = entry.absolute_offset();
                let next_offset = segment
                    .indices
                    .get(i + 1)
                    .map(|e| e.absolute_offset())
                    .unwrap_or(file_len);
                ensure!(
                    next_offset >= offset,
                    crate::error::compression_error("TSI entries out of order")
                );

                let block_bytes = fps.read_to_vec(offset as i64, (next_offset - offset) as usize)?;
                let samples = decode_one_block(&block_bytes, &mut cps)?;

                match index_bounds {
                    Some((start_index, end_index)) => {
                        for (k, &sample) in samples.iter().enumerate() {
                            let absolute = entry.start_sample_number + k as i64;
                            if absolute >= start_index && absolute <= end_index {
                                out.push(sample);
                            }
                        }
                    }
                    None => out.extend(samples),
                }
            }
        }

        Ok(out)
    }

    /// Maximal contiguous sample ranges across `channel_name`'s segments
    /// (spec §4.6 "Contiguon").
    pub fn channel_contigua(&self, channel_name: &str) -> Result<Vec<Contiguon>, Error> {
        let channel = self
            .channel(channel_name)
            .ok_or_else(|| crate::error::not_found(format!("no channel named {}", channel_name)))?;
        Ok(channel.contigua())
    }

    /// Session-wide contigua (spec §4.6): every time-series channel's own
    /// contigua intersected together.
    pub fn contigua(&self) -> Vec<Contiguon> {
        self.session.contigua()
    }
}

fn decode_one_block(block: &[u8], cps: &mut Cps) -> Result<Vec<i32>, Error> {
    BlockHeader::verify_crc(block)?;
    let header = BlockHeader::from_bytes(block)?;
    ensure!(
        !header.is_encrypted(),
        crate::error::access_denied("encrypted blocks require a password, none supplied")
    );

    let algorithm = header
        .block_flags
        .algorithm()
        .ok_or_else(|| crate::error::compression_error("block has no algorithm flag set"))?;

    let header_end = header.total_header_bytes as usize;
    let discretionary_start = header_end - header.discretionary_region_bytes as usize;
    let derivative_level = *block
        .get(discretionary_start)
        .ok_or_else(|| crate::error::compression_error("block missing derivative-level byte"))?;

    let param_start = discretionary_start
        - header.parameter_region_bytes as usize
        - header.protected_region_bytes as usize;
    let param_bytes = &block[param_start..param_start + header.parameter_region_bytes as usize];
    let params = wire::read_parameters(param_bytes, header.parameter_flags)?;

    let model_bytes = &block[header_end..header.total_block_bytes as usize];
    let payload = wire::read_payload(model_bytes, algorithm)?;

    cps.decode(0, &payload, &params, derivative_level)
}

/// Writes one compressed block to `out` at its current length and returns
/// the byte offset it was written at (for populating a `tidx` entry).
/// Exercises the inverse of [`decode_one_block`] and is used by the crate's
/// own round-trip tests; nothing in the read-only extraction path calls it.
pub fn write_one_block(
    out: &mut Vec<u8>,
    start_time: i64,
    acquisition_channel_number: i32,
    samples: &[i32],
    opts: &codec::EncodeOptions,
) -> Result<u64, Error> {
    use crate::block::{BlockFlags, BlockHeader};

    let (payload, params, level) = codec::encode_block(samples, opts)
        .ok_or_else(|| crate::error::compression_error("refusing to write an empty block"))?;

    let param_bytes = wire::write_parameters(&params);
    let model_bytes = wire::write_payload(&payload);

    let fixed_header_bytes = crate::primitives::CMP_FIXED_BH_BYTES;
    // One discretionary byte carries the derivative level applied before
    // entropy coding, so a standalone block decodes without consulting any
    // state outside itself.
    let discretionary_region_bytes = 1usize;
    let total_header_bytes = fixed_header_bytes + param_bytes.len() + discretionary_region_bytes;
    let total_block_bytes = total_header_bytes + model_bytes.len();

    let offset = out.len() as u64;
    let mut block = vec![0u8; total_block_bytes];

    let header = BlockHeader {
        block_crc: 0,
        block_flags: BlockFlags::for_algorithm(payload.algorithm()),
        start_time,
        acquisition_channel_number,
        total_block_bytes: total_block_bytes as u32,
        number_of_samples: samples.len() as u32,
        parameter_flags: params.flags(),
        record_region_bytes: 0,
        parameter_region_bytes: param_bytes.len() as u16,
        protected_region_bytes: 0,
        discretionary_region_bytes: discretionary_region_bytes as u16,
        total_header_bytes: total_header_bytes as u32,
    };
    header.write_to(&mut block);
    let param_start = fixed_header_bytes;
    let discretionary_start = param_start + param_bytes.len();
    block[param_start..discretionary_start].copy_from_slice(&param_bytes);
    block[discretionary_start] = level;
    block[total_header_bytes..].copy_from_slice(&model_bytes);
    BlockHeader::finish_crc(&mut block);

    out.extend_from_slice(&block);
    Ok(offset)
}

/// A terminal RI entry's on-disk presence in a `ridx` file, used when a
/// caller wants to validate a records stream without a full [`MedSession`]
/// (spec §4.5: "a terminal RI entry ... marks end-of-data").
pub fn ridx_entry_count(ridx_path: &Path) -> Result<usize, Error> {
    let mut fps = Fps::open(ridx_path, "r")?;
    let buf = fps.read_full()?;
    ensure!(
        buf.len() >= UNIVERSAL_HEADER_BYTES,
        crate::error::not_med("ridx file shorter than universal header")
    );
    let body = &buf[UNIVERSAL_HEADER_BYTES..];
    ensure!(
        body.len() % RI_BYTES == 0,
        crate::error::record_error("ridx body is not a multiple of the RI entry size")
    );
    Ok(body.len() / RI_BYTES)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Algorithm;
    use crate::codec::EncodeOptions;

    #[test]
    fn block_write_then_decode_roundtrips() {
        let samples: Vec<i32> = (0..100).map(|i| 100 + (i % 7)).collect();
        let opts = EncodeOptions {
            algorithm: Algorithm::Red2,
            detrend: true,
            fall_through_to_best_encoding: false,
            ..Default::default()
        };

        let mut buf = Vec::new();
        write_one_block(&mut buf, 0, 1, &samples, &opts).unwrap();

        let mut cps = Cps::new(Mode::Decompression, false);
        let decoded = decode_one_block(&buf, &mut cps).unwrap();
        assert_eq!(samples, decoded);
    }

    #[test]
    fn multiple_blocks_concatenate_with_correct_offsets() {
        let opts = EncodeOptions {
            algorithm: Algorithm::Mbe,
            detrend: false,
            fall_through_to_best_encoding: false,
            ..Default::default()
        };
        let mut buf = Vec::new();
        let off1 = write_one_block(&mut buf, 0, 1, &[1, 2, 3], &opts).unwrap();
        let off2 = write_one_block(&mut buf, 1000, 1, &[4, 5, 6], &opts).unwrap();
        assert_eq!(0, off1);
        assert!(off2 > off1);

        let mut cps = Cps::new(Mode::Decompression, false);
        let first = decode_one_block(&buf[off1 as usize..off2 as usize], &mut cps).unwrap();
        let second = decode_one_block(&buf[off2 as usize..], &mut cps).unwrap();
        assert_eq!(vec![1, 2, 3], first);
        assert_eq!(vec![4, 5, 6], second);
    }
}
