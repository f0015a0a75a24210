use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use keysnap::extract::{scanner_from_path, ExtractionConfig, KeyframeScanner};
use keysnap::{
    extract_from_path, parse_mp4, DiscardSink, Error, ExtractionMode, KeyframeInfo, ProbeDecoder,
};

#[derive(Debug, Serialize)]
struct Keyframe {
    index: usize,
    file_offset: u64,
    size: u32,
    pts_seconds: f64,
    dts_seconds: f64,
    idr_nal: bool,
}

impl Keyframe {
    fn from_info(info: KeyframeInfo, timescale: u32) -> Self {
        let scale = f64::from(timescale.max(1));
        Keyframe {
            index: info.index,
            file_offset: info.file_offset,
            size: info.size,
            pts_seconds: info.pts as f64 / scale,
            dts_seconds: info.dts as f64 / scale,
            idr_nal: info.idr_nal,
        }
    }
}

fn keyframe_csv_header() -> &'static str {
    "index,file_offset,size,pts_seconds,dts_seconds,idr_nal"
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ReportFormat {
    Json,
    Csv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    Unfiltered,
    Ordered,
    Distributed,
}

impl From<Mode> for ExtractionMode {
    fn from(m: Mode) -> Self {
        match m {
            Mode::Unfiltered => ExtractionMode::Unfiltered,
            Mode::Ordered => ExtractionMode::Ordered,
            Mode::Distributed => ExtractionMode::Distributed,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "keysnap")]
#[command(about = "Inspect and select MP4 keyframes for thumbnail extraction", long_about = None)]
struct Cli {
    /// Input MP4 file
    #[arg(value_name = "INPUT.mp4")]
    input: PathBuf,

    /// Number of keyframes to select
    #[arg(short = 'n', long = "pictures", default_value_t = 3)]
    pictures: usize,

    /// Keyframe selection policy
    #[arg(short = 'm', long = "mode", value_enum, default_value_t = Mode::Distributed)]
    mode: Mode,

    /// Report file path (use '-' for stdout)
    #[arg(short = 'o', long = "output", value_name = "FILE")]
    output: Option<PathBuf>,

    /// Report format
    #[arg(long = "format", value_enum, default_value_t = ReportFormat::Json, conflicts_with_all = ["csv", "json"])]
    format: ReportFormat,

    /// Alias for `--format csv`
    #[arg(long, conflicts_with_all = ["json", "format"], action = clap::ArgAction::SetTrue)]
    csv: bool,

    /// Alias for `--format json`
    #[arg(long, conflicts_with_all = ["csv", "format"], action = clap::ArgAction::SetTrue)]
    json: bool,

    /// Run the NAL dispatcher over the selection and report the outcome
    #[arg(long, action = clap::ArgAction::SetTrue)]
    verify: bool,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn resolve_format(cli: &Cli) -> ReportFormat {
    if cli.csv {
        ReportFormat::Csv
    } else if cli.json {
        ReportFormat::Json
    } else {
        cli.format
    }
}

fn should_write_to_stdout(output: &Option<PathBuf>) -> bool {
    match output {
        None => true,
        Some(p) => p.as_os_str() == "-",
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn report_keyframes(cli: &Cli, format: ReportFormat, out: &mut dyn Write) -> Result<(), Error> {
    let config = ExtractionConfig {
        picture_number: cli.pictures,
        mode: cli.mode.into(),
    };
    let mut scanner = scanner_from_path(&cli.input, config)?;
    let timescale = KeyframeScanner::map(&scanner).timescale;

    if format == ReportFormat::Csv {
        writeln!(out, "{}", keyframe_csv_header())?;
    }

    let mut rows: Vec<Keyframe> = Vec::new();
    for info in &mut scanner {
        let row = Keyframe::from_info(info?, timescale);
        match format {
            ReportFormat::Json => rows.push(row),
            ReportFormat::Csv => {
                // Write rows as we go (lower memory, easy to stream).
                writeln!(
                    out,
                    "{},{},{},{:.6},{:.6},{}",
                    row.index,
                    row.file_offset,
                    row.size,
                    row.pts_seconds,
                    row.dts_seconds,
                    row.idr_nal
                )?;
            }
        }
    }

    if format == ReportFormat::Json {
        let json = serde_json::to_string_pretty(&rows).expect("report rows serialize");
        writeln!(out, "{json}")?;
    }

    Ok(())
}

fn verify(cli: &Cli, out: &mut dyn Write) -> Result<(), Error> {
    let mut file = File::open(&cli.input)?;
    let mp4 = parse_mp4(&mut file)?;
    for track in mp4.video_tracks() {
        let duration_s = if track.timescale > 0 {
            track.duration as f64 / f64::from(track.timescale)
        } else {
            0.0
        };
        writeln!(
            out,
            "track {}: codec={} {}x{} duration={:.2}s samples={} bitrate={}kbps",
            track.track_id,
            track.codec.fourcc(),
            track.width,
            track.height,
            duration_s,
            track.sample_count(),
            track.bitrate() / 1000
        )?;
    }
    drop(file);

    let config = ExtractionConfig {
        picture_number: cli.pictures,
        mode: cli.mode.into(),
    };
    let mut decoder = ProbeDecoder;
    let mut sink = DiscardSink::default();
    let summary = extract_from_path(&cli.input, config, &mut decoder, &mut sink)?;

    writeln!(
        out,
        "verify: requested={} decoded={} frames={} track={}",
        summary.requested,
        summary.counters.idr_count,
        summary.counters.frame_count,
        summary.track_id
    )?;
    Ok(())
}

fn run(cli: &Cli) -> Result<(), Error> {
    let format = resolve_format(cli);

    if should_write_to_stdout(&cli.output) {
        let stdout = io::stdout();
        let mut out = BufWriter::new(stdout.lock());
        report_keyframes(cli, format, &mut out)?;
        if cli.verify {
            verify(cli, &mut out)?;
        }
        out.flush()?;
    } else {
        let path = cli.output.as_ref().unwrap();
        let file = File::create(path)?;
        let mut out = BufWriter::new(file);
        report_keyframes(cli, format, &mut out)?;
        if cli.verify {
            verify(cli, &mut out)?;
        }
        out.flush()?;
    }

    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("keysnap: {e}");
            ExitCode::FAILURE
        }
    }
}
