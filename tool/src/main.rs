extern crate anyhow;
extern crate medformat;

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Error};
use medformat::{MedSession, Options, SearchMode, Slice};

const COMMAND_FORMAT: &str = "\
med2raw <MED_directory> [<output_directory>] [<start_time>] [<end_time>] \
[<start_index>] [<end_index>] [<password>] [<index_channel>]

  <start_time>/<end_time>    microsecond UTC, or the sentinels \"start\"/\"end\"
  <start_index>/<end_index>  sample numbers, or the sentinels \"start\"/\"end\"
  <password>                 session password, if the metadata is encrypted
  <index_channel>             channel whose index resolves the slice when the
                              session's channels run at different rates; the
                              first time-series channel found is used if omitted
";

/// Best-effort file-descriptor-limit bump. A session with many segments can
/// open a lot of files at once; raising the limit is advisory, never
/// required for correct extraction, so a platform without a raisable limit
/// just logs and moves on.
fn raise_open_file_limit() {
    log::debug!("open-file-limit bump not attempted on this platform");
}

/// Best-effort scheduling-priority bump, same rationale as
/// [`raise_open_file_limit`].
fn raise_process_priority() {
    log::debug!("process priority bump not attempted on this platform");
}

fn parse_time_or_index(raw: &str, start_sentinel: i64, end_sentinel: i64) -> Result<i64, Error> {
    match raw {
        "start" => Ok(start_sentinel),
        "end" => Ok(end_sentinel),
        other => other
            .parse::<i64>()
            .with_context(|| format!("'{}' is neither a number nor start/end", other)),
    }
}

struct Args {
    med_directory: PathBuf,
    output_directory: PathBuf,
    slice: Slice,
    password: Option<String>,
    index_channel: Option<String>,
}

fn parse_args(raw: &[String]) -> Result<Args, Error> {
    anyhow::ensure!(!raw.is_empty(), "missing required argument <MED_directory>");

    let med_directory = PathBuf::from(&raw[0]);
    let output_directory = raw
        .get(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));

    let mut slice = Slice::default();
    if let Some(v) = raw.get(2) {
        slice.start_time = parse_time_or_index(v, medformat::primitives::BEGINNING_OF_TIME, medformat::primitives::END_OF_TIME)?;
    }
    if let Some(v) = raw.get(3) {
        slice.end_time = parse_time_or_index(v, medformat::primitives::BEGINNING_OF_TIME, medformat::primitives::END_OF_TIME)?;
    }
    if let Some(v) = raw.get(4) {
        slice.start_index = Some(parse_time_or_index(v, 0, i64::MAX)?);
        slice.mode = SearchMode::Index;
    }
    if let Some(v) = raw.get(5) {
        slice.end_index = Some(parse_time_or_index(v, 0, i64::MAX)?);
        slice.mode = SearchMode::Index;
    }
    let password = raw.get(6).cloned();
    let index_channel = raw.get(7).cloned();

    Ok(Args {
        med_directory,
        output_directory,
        slice,
        password,
        index_channel,
    })
}

fn extract_channel(session: &MedSession, name: &str, slice: &Slice, out_dir: &Path) -> Result<(), Error> {
    let mut slice = slice.clone();
    let samples = session
        .extract(name, &mut slice)
        .with_context(|| format!("extracting channel '{}'", name))?;

    let out_path = out_dir.join(format!("{}.raw", name));
    let mut file = fs::File::create(&out_path)
        .with_context(|| format!("creating '{}'", out_path.display()))?;
    for sample in &samples {
        file.write_all(&sample.to_le_bytes())?;
    }
    log::info!("{}: {} samples -> {}", name, samples.len(), out_path.display());
    Ok(())
}

fn run(raw_args: &[String]) -> Result<(), Error> {
    if raw_args.iter().any(|a| a == "-command_format") {
        print!("{}", COMMAND_FORMAT);
        return Ok(());
    }

    raise_open_file_limit();
    raise_process_priority();

    let args = parse_args(raw_args)?;
    fs::create_dir_all(&args.output_directory)
        .with_context(|| format!("creating '{}'", args.output_directory.display()))?;

    let options = Options {
        default_password: args.password.clone(),
        ..Options::default()
    };
    let session = MedSession::open_with_options(&args.med_directory, &options)
        .with_context(|| format!("opening '{}'", args.med_directory.display()))?;

    let names: Vec<String> = match &args.index_channel {
        Some(name) => vec![name.clone()],
        None => session.channels().map(|c| c.name.clone()).collect(),
    };
    anyhow::ensure!(!names.is_empty(), "session has no channels to extract");

    for name in &names {
        extract_channel(&session, name, &args.slice, &args.output_directory)?;
    }

    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    let raw_args: Vec<String> = std::env::args().skip(1).collect();
    match run(&raw_args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("med2raw: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
