//! Command line front end: list devices, record a file, inspect a file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use tracing::{info, warn};

use recorder_encoder::{probe, StreamKind};
use recorder_engine::{
    default_platform, Device, DeviceKind, DeviceSelection, EngineConfig, Platform, Recorder,
    RecorderSettings, RecorderState, VirtualPlatform,
};

#[derive(Parser)]
#[command(name = "recorder")]
#[command(version)]
#[command(about = "Record speaker, microphone and screen into an AVI file", long_about = None)]
struct Cli {
    /// Use simulated devices instead of the system's
    #[arg(long = "virtual", global = true)]
    virtual_devices: bool,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List capture devices
    #[command(alias = "ls")]
    Devices {
        /// Only list this kind
        #[arg(short, long)]
        kind: Option<KindArg>,
    },

    /// Record for a fixed time
    Record(RecordArgs),

    /// Summarize a recorded file
    Probe {
        path: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Camera,
    Speaker,
    Mic,
}

impl From<KindArg> for DeviceKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Camera => DeviceKind::Camera,
            KindArg::Speaker => DeviceKind::Speaker,
            KindArg::Mic => DeviceKind::Mic,
        }
    }
}

#[derive(clap::Args)]
struct RecordArgs {
    /// Output file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Quality, 0 - 100
    #[arg(short, long)]
    qb: Option<u32>,

    /// Frame rate, 10 - 30
    #[arg(short, long)]
    fps: Option<u32>,

    /// Speaker id for loopback capture
    #[arg(long)]
    speaker: Option<String>,

    /// Microphone id
    #[arg(long)]
    mic: Option<String>,

    /// Video device id; the default one is used when omitted
    #[arg(long, conflicts_with = "no_video")]
    camera: Option<String>,

    /// Record audio only
    #[arg(long)]
    no_video: bool,

    /// Recording length in seconds of session time
    #[arg(short, long, default_value_t = 5.0)]
    seconds: f64,

    /// Pause window as START:LENGTH, in seconds
    #[arg(long, value_parser = parse_pause)]
    pause: Option<(f64, f64)>,

    /// JSON file with `settings` and `engine` sections
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn parse_pause(value: &str) -> std::result::Result<(f64, f64), String> {
    let (start, length) = value
        .split_once(':')
        .ok_or_else(|| "expected START:LENGTH".to_string())?;
    let start: f64 = start.parse().map_err(|e| format!("start: {e}"))?;
    let length: f64 = length.parse().map_err(|e| format!("length: {e}"))?;
    if start < 0.0 || length < 0.0 {
        return Err("pause times must not be negative".into());
    }
    Ok((start, length))
}

/// Contents of the `--config` file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    settings: RecorderSettings,
    engine: EngineConfig,
}

impl FileConfig {
    fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "recorder=info,recorder_engine=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    let platform: Arc<dyn Platform> = if cli.virtual_devices {
        Arc::new(VirtualPlatform::with_default_devices())
    } else {
        default_platform()
    };
    info!(platform = platform.name(), "Recorder CLI starting");

    match cli.command {
        Commands::Devices { kind } => list_devices(platform.as_ref(), kind, cli.json),
        Commands::Record(args) => record(platform, args, cli.json),
        Commands::Probe { path } => probe_file(&path, cli.json),
    }
}

fn list_devices(platform: &dyn Platform, kind: Option<KindArg>, json: bool) -> Result<()> {
    let kinds: Vec<DeviceKind> = match kind {
        Some(kind) => vec![kind.into()],
        None => DeviceKind::ALL.to_vec(),
    };

    let mut all: Vec<Device> = Vec::new();
    for kind in kinds {
        match platform.list_devices(kind) {
            Ok(devices) => all.extend(devices),
            Err(e) => warn!(kind = kind.name(), error = %e, "Enumeration failed"),
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&all)?);
        return Ok(());
    }
    for device in &all {
        let marker = if device.is_default { "*" } else { " " };
        println!(
            "{marker} {:<8} {:<40} {}",
            device.kind.name(),
            device.name,
            device.id
        );
    }
    Ok(())
}

fn session_ms(seconds: f64) -> u64 {
    (seconds * 1000.0).round() as u64
}

fn record(platform: Arc<dyn Platform>, args: RecordArgs, json: bool) -> Result<()> {
    let file = match &args.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };

    let mut settings = file.settings;
    if let Some(output) = args.output {
        settings.output = output;
    }
    if let Some(qb) = args.qb {
        settings.qb = qb;
    }
    if let Some(fps) = args.fps {
        settings.fps = fps;
    }
    if let Some(id) = args.speaker {
        settings.speaker = DeviceSelection::by_id(id);
    }
    if let Some(id) = args.mic {
        settings.mic = DeviceSelection::by_id(id);
    }
    if let Some(id) = args.camera {
        settings.camera = Some(DeviceSelection::by_id(id));
    }
    if args.no_video {
        settings.camera = Some(DeviceSelection::default());
    }
    let output = settings.output.clone();

    let recorder = Recorder::with_platform(platform, file.engine)?;
    recorder.set_duration_callback(|ms| info!(ms, "Recording"));
    recorder.set_device_change_callback(|kind| info!(kind = kind.name(), "Devices changed"));
    recorder.set_error_callback(|code| warn!(code, "Recorder error"));

    let controller = recorder.controller();
    controller
        .init_with_settings(settings)
        .context("initializing the session")?;
    controller.start().context("starting the recording")?;

    let end_ms = session_ms(args.seconds);
    if let Some((start, length)) = args.pause {
        let pause_ms = session_ms(start).min(end_ms);
        recorder.wait(pause_ms);
        if controller.state() == RecorderState::Recording {
            controller.pause()?;
            thread::sleep(Duration::from_secs_f64(length));
            controller.resume()?;
        }
    }
    recorder.wait(end_ms);

    if let RecorderState::Error { code } = controller.state() {
        recorder.release();
        bail!("recording failed: {}", code.description());
    }
    controller.stop().context("stopping the recording")?;
    let stats = controller.stats();
    recorder.release();

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        println!(
            "{}: {} frames written, {} held, {} dropped, {} ms silence, {} bytes",
            output.display(),
            stats.frames_written,
            stats.frames_held,
            stats.frames_dropped,
            stats.silence_inserted_ms,
            stats.bytes_written
        );
    }
    Ok(())
}

fn probe_file(path: &Path, json: bool) -> Result<()> {
    let summary = probe(path).with_context(|| format!("probing {}", path.display()))?;

    if json {
        let streams: Vec<_> = summary
            .streams
            .iter()
            .map(|s| {
                serde_json::json!({
                    "kind": format!("{:?}", s.kind),
                    "codec": s.codec,
                    "chunks": s.chunks,
                    "bytes": s.bytes,
                    "duration_ms": s.duration.as_millis() as u64,
                })
            })
            .collect();
        let value = serde_json::json!({
            "file_size": summary.file_size,
            "has_index": summary.has_index,
            "truncated": summary.truncated,
            "duration_ms": summary.duration().as_millis() as u64,
            "streams": streams,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!(
        "{}: {} bytes, {:.3} s{}{}",
        path.display(),
        summary.file_size,
        summary.duration().as_secs_f64(),
        if summary.has_index { "" } else { ", no index" },
        if summary.truncated { ", truncated" } else { "" },
    );
    for stream in &summary.streams {
        match stream.kind {
            StreamKind::Video => println!(
                "  video {} {}x{}: {} frames, {:.3} s",
                stream.codec,
                stream.width,
                stream.height,
                stream.chunks,
                stream.duration.as_secs_f64()
            ),
            StreamKind::Audio => println!(
                "  audio {} {} Hz x{}: {} bytes, {:.3} s",
                stream.codec,
                stream.sample_rate,
                stream.channels,
                stream.bytes,
                stream.duration.as_secs_f64()
            ),
            StreamKind::Other => println!("  other {}: {} chunks", stream.codec, stream.chunks),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pause_window_parses() {
        assert_eq!(parse_pause("1.5:2").unwrap(), (1.5, 2.0));
        assert!(parse_pause("3").is_err());
        assert!(parse_pause("-1:2").is_err());
    }

    #[test]
    fn config_file_sections_are_optional() {
        let file: FileConfig =
            serde_json::from_str(r#"{ "settings": { "qb": 90, "mic": { "id": "m" } } }"#).unwrap();
        assert_eq!(file.settings.qb, 90);
        assert_eq!(file.settings.fps, RecorderSettings::default().fps);
        assert_eq!(file.settings.mic.id, "m");
        assert_eq!(file.engine, EngineConfig::default());
    }

    #[test]
    fn cli_parses_record_flags() {
        let cli = Cli::parse_from([
            "recorder", "--virtual", "record", "-o", "out.avi", "--fps", "15", "--no-video",
            "--pause", "1:1",
        ]);
        assert!(cli.virtual_devices);
        let Commands::Record(args) = cli.command else {
            panic!("expected record");
        };
        assert_eq!(args.fps, Some(15));
        assert!(args.no_video);
        assert_eq!(args.pause, Some((1.0, 1.0)));
    }
}
