//! End-to-end test: synthesizes a minimal `.medd` session directory on disk
//! (one time-series channel, two segments) and drives it through
//! [`medformat::MedSession`] the way a real caller would, rather than
//! exercising `codec`/`open` internals directly (those have their own
//! colocated unit tests).

use std::fs;
use std::path::Path;

use medformat::header::{FileType, UniversalHeader};
use medformat::metadata::Metadata;
use medformat::open::write_one_block;
use medformat::primitives::{METADATA_BODY_BYTES, UNIVERSAL_HEADER_BYTES};
use medformat::{codec, MedSession, SearchMode, Slice};

fn write_tmet(path: &Path, segment_number: i32, sampling_frequency: f64, number_of_samples: i64) {
    let mut metadata = Metadata::default();
    metadata.section2.acquisition_channel_number = 1;
    metadata.section2.sampling_frequency = sampling_frequency;
    metadata.section2.number_of_samples = number_of_samples;

    let mut body = vec![0u8; METADATA_BODY_BYTES];
    metadata.write_to(&mut body);

    let mut header = UniversalHeader::new(FileType::TimeSeriesMetadata, || 7);
    header.segment_number = segment_number;

    let mut head_buf = vec![0u8; UNIVERSAL_HEADER_BYTES];
    header.write_to(&mut head_buf, &body);

    let mut file = head_buf;
    file.extend_from_slice(&body);
    fs::write(path, file).unwrap();
}

fn write_tidx(path: &Path, segment_number: i32, entries: &[(i64, i64, i64)]) {
    let mut header = UniversalHeader::new(FileType::TimeSeriesIndices, || 7);
    header.segment_number = segment_number;

    let mut body = Vec::new();
    for &(file_offset, start_time, start_sample_number) in entries {
        let entry = medformat::hierarchy::segment::TsiEntry {
            file_offset,
            start_time,
            start_sample_number,
        };
        let mut buf = [0u8; 24];
        entry.write_to(&mut buf);
        body.extend_from_slice(&buf);
    }

    let mut head_buf = vec![0u8; UNIVERSAL_HEADER_BYTES];
    header.write_to(&mut head_buf, &body);

    let mut file = head_buf;
    file.extend_from_slice(&body);
    fs::write(path, file).unwrap();
}

/// Builds one segment's `.tisd` directory: a `tdat` file holding `blocks`
/// (each a separate compressed block written back to back, right after a
/// universal header) plus matching `tmet`/`tidx` siblings.
fn write_segment(
    dir: &Path,
    segment_number: i32,
    sampling_frequency: f64,
    blocks: &[(i64, i64, Vec<i32>)],
) {
    fs::create_dir_all(dir).unwrap();

    let opts = codec::EncodeOptions {
        algorithm: medformat::block::Algorithm::Red2,
        detrend: true,
        fall_through_to_best_encoding: false,
        ..Default::default()
    };

    let mut tdat_header = UniversalHeader::new(FileType::TimeSeriesData, || 7);
    tdat_header.segment_number = segment_number;
    let mut tdat_body = Vec::new();
    let mut entries = Vec::new();
    let mut total_samples = 0i64;

    for &(start_time, start_sample_number, ref samples) in blocks {
        let offset_in_body = write_one_block(&mut tdat_body, start_time, 1, samples, &opts).unwrap();
        entries.push((
            UNIVERSAL_HEADER_BYTES as i64 + offset_in_body as i64,
            start_time,
            start_sample_number,
        ));
        total_samples += samples.len() as i64;
    }

    let mut tdat_head_buf = vec![0u8; UNIVERSAL_HEADER_BYTES];
    tdat_header.write_to(&mut tdat_head_buf, &tdat_body);
    let mut tdat_file = tdat_head_buf;
    tdat_file.extend_from_slice(&tdat_body);
    fs::write(dir.join("seg.tdat"), tdat_file).unwrap();

    write_tmet(&dir.join("seg.tmet"), segment_number, sampling_frequency, total_samples);
    write_tidx(&dir.join("seg.tidx"), segment_number, &entries);
}

#[test]
fn extract_returns_samples_in_segment_order() {
    let root = tempfile::tempdir().unwrap();
    let channel_dir = root.path().join("eeg1.ticd");

    write_segment(
        &channel_dir.join("segment_000001.tisd"),
        1,
        256.0,
        &[(0, 0, (0..256).collect())],
    );
    write_segment(
        &channel_dir.join("segment_000002.tisd"),
        2,
        256.0,
        &[(1_000_000, 256, (0..256).map(|i| 1000 + i).collect())],
    );

    let session = MedSession::open(root.path()).unwrap();
    let channel = session.channel("eeg1").expect("channel present");
    assert_eq!(2, channel.segments.len());

    let mut slice = Slice::default();
    let samples = session.extract("eeg1", &mut slice).unwrap();

    assert_eq!(512, samples.len());
    assert_eq!(0, samples[0]);
    assert_eq!(1000, samples[256]);
}

#[test]
fn extract_honors_index_bounded_slice() {
    let root = tempfile::tempdir().unwrap();
    let channel_dir = root.path().join("eeg1.ticd");

    write_segment(
        &channel_dir.join("segment_000001.tisd"),
        1,
        256.0,
        &[(0, 0, (0..256).collect())],
    );

    let session = MedSession::open(root.path()).unwrap();

    let mut slice = Slice {
        start_index: Some(10),
        end_index: Some(20),
        mode: SearchMode::Index,
        ..Slice::default()
    };
    let samples = session.extract("eeg1", &mut slice).unwrap();
    assert_eq!(11, samples.len());
    assert_eq!((10..=20).collect::<Vec<i32>>(), samples);
}

#[test]
fn extract_clips_to_exact_sample_count_across_blocks() {
    let root = tempfile::tempdir().unwrap();
    let channel_dir = root.path().join("eeg1.ticd");

    // Four 1000-sample blocks in one segment, numbered 0..4000. A slice
    // over [500, 2000] must yield exactly 1501 samples, not every sample
    // in every block the range merely touches.
    let blocks: Vec<(i64, i64, Vec<i32>)> = (0..4)
        .map(|b| {
            let start_sample = b * 1000;
            (
                b * 1_000_000,
                start_sample,
                (0..1000).map(|i| (start_sample + i) as i32).collect(),
            )
        })
        .collect();
    write_segment(&channel_dir.join("segment_000001.tisd"), 1, 256.0, &blocks);

    let session = MedSession::open(root.path()).unwrap();

    let mut slice = Slice {
        start_index: Some(500),
        end_index: Some(2000),
        mode: SearchMode::Index,
        ..Slice::default()
    };
    let samples = session.extract("eeg1", &mut slice).unwrap();
    assert_eq!(1501, samples.len());
    assert_eq!(500, samples[0]);
    assert_eq!(2000, samples[samples.len() - 1]);
}

#[test]
fn session_contigua_is_reachable_from_med_session() {
    let root = tempfile::tempdir().unwrap();
    let seg_dir = root.path().join("eeg1.ticd").join("segment_000001.tisd");
    fs::create_dir_all(&seg_dir).unwrap();

    write_tmet(&seg_dir.join("seg.tmet"), 1, 256.0, 1024);
    write_tidx(
        &seg_dir.join("seg.tidx"),
        1,
        &[
            (0, 0, 0),
            (64, 1_000, 256),
            (-128, 11_000, 512), // discontinuity: negative file_offset
            (192, 12_000, 768),
        ],
    );

    let dummy_header = UniversalHeader::new(FileType::TimeSeriesData, || 7);
    let mut dummy_tdat = vec![0u8; UNIVERSAL_HEADER_BYTES];
    dummy_header.write_to(&mut dummy_tdat, &[]);
    fs::write(seg_dir.join("seg.tdat"), dummy_tdat).unwrap();

    let session = MedSession::open(root.path()).unwrap();
    let contigua = session.contigua();
    assert_eq!(2, contigua.len());

    let channel_contigua = session.channel_contigua("eeg1").unwrap();
    assert_eq!(2, channel_contigua.len());
}

#[test]
fn open_rejects_a_directory_with_no_channels() {
    let root = tempfile::tempdir().unwrap();
    assert!(MedSession::open(root.path()).is_err());
}
