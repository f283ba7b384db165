use std::{
  path::PathBuf,
  process::ExitCode,
  sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
  },
  thread,
  time::Duration,
};

use anyhow::Context;
use capture_sidecar::{
  config::{CaptureConfig, OutputTarget},
  devices::{Backend, DeviceCatalog, DeviceKind, FfmpegDeviceCatalog},
  event::CaptureEvent,
  presets::{builtin_presets, find_preset, load_presets},
  supervisor::{CaptureSession, Phase, SupervisorOptions},
  version::ffmpeg_version_with_path,
};
use clap::{Parser, ValueEnum};

/// Record the screen and microphone with FFmpeg, as described by a TOML file.
#[derive(Debug, Parser)]
#[command(name = "capture-sidecar", version, long_about = None)]
struct CliArgs {
  /// Capture configuration (TOML).
  #[arg(long, value_name = "PATH", default_value = "capture.toml")]
  config: PathBuf,

  /// Merge a named preset into the configuration.
  #[arg(long, value_name = "NAME")]
  preset: Option<String>,

  /// Extra preset definitions (TOML with a `[[preset]]` array).
  #[arg(long, value_name = "PATH")]
  presets_file: Option<PathBuf>,

  /// Replace the configured outputs with this path.
  #[arg(long, short, value_name = "PATH")]
  output: Option<String>,

  /// FFmpeg executable to run.
  #[arg(long, value_name = "PATH")]
  ffmpeg: Option<PathBuf>,

  /// Print the command and exit.
  #[arg(long)]
  dry_run: bool,

  /// List capture devices and exit.
  #[arg(long)]
  list_devices: bool,

  /// List the built-in presets and exit.
  #[arg(long)]
  list_presets: bool,

  /// How often to poll for progress, in milliseconds.
  #[arg(long, value_name = "MS", default_value_t = 500)]
  poll_ms: u64,

  /// Logging level. Falls back to `CAPTURE_SIDECAR_LOG`, then `info`.
  #[arg(long, value_enum, value_name = "LEVEL")]
  log_level: Option<LogLevel>,
}

#[derive(Debug, Copy, Clone, ValueEnum)]
enum LogLevel {
  Error,
  Warn,
  Info,
  Debug,
  Trace,
}

impl From<LogLevel> for log::LevelFilter {
  fn from(level: LogLevel) -> Self {
    match level {
      LogLevel::Error => log::LevelFilter::Error,
      LogLevel::Warn => log::LevelFilter::Warn,
      LogLevel::Info => log::LevelFilter::Info,
      LogLevel::Debug => log::LevelFilter::Debug,
      LogLevel::Trace => log::LevelFilter::Trace,
    }
  }
}

fn init_logging(level: Option<LogLevel>) {
  let filter = level.map(log::LevelFilter::from).unwrap_or_else(|| {
    std::env::var("CAPTURE_SIDECAR_LOG")
      .ok()
      .and_then(|value| value.parse().ok())
      .unwrap_or(log::LevelFilter::Info)
  });
  simple_logging::log_to_stderr(filter);
}

fn main() -> ExitCode {
  let args = CliArgs::parse();
  init_logging(args.log_level);
  match run(args) {
    Ok(()) => ExitCode::SUCCESS,
    Err(e) => {
      log::error!("{e:#}");
      ExitCode::FAILURE
    }
  }
}

fn run(args: CliArgs) -> anyhow::Result<()> {
  let mut options = SupervisorOptions::default();
  if let Some(ffmpeg) = &args.ffmpeg {
    options.executable = ffmpeg.clone();
  }

  if args.list_presets {
    for preset in builtin_presets() {
      println!("{:<10} {}", preset.name, preset.description);
    }
    return Ok(());
  }

  if args.list_devices {
    let catalog = FfmpegDeviceCatalog::new(&options.executable, Backend::native());
    for kind in [DeviceKind::Video, DeviceKind::Audio] {
      println!("{kind:?} devices:");
      for device in catalog.list_devices(kind)? {
        println!("  {:<24} {}", device.id, device.name);
      }
    }
    return Ok(());
  }

  let mut config = CaptureConfig::load(&args.config)?;
  if let Some(name) = &args.preset {
    let custom = match &args.presets_file {
      Some(path) => load_presets(path)?
        .into_iter()
        .find(|p| p.name.eq_ignore_ascii_case(name)),
      None => None,
    };
    let preset = custom
      .or_else(|| find_preset(name))
      .with_context(|| format!("unknown preset `{name}`"))?;
    config.apply_preset(&preset);
  }
  if let Some(output) = &args.output {
    config.outputs = vec![OutputTarget::new(output)];
  }
  if config.outputs.is_empty() {
    anyhow::bail!("no outputs configured in {:?}", args.config);
  }

  let mut session = CaptureSession::with_options(config, options);
  if args.dry_run {
    println!("{}", session.to_command());
    return Ok(());
  }

  match ffmpeg_version_with_path(&session.options().executable) {
    Ok(version) => log::info!("using ffmpeg {version}"),
    Err(e) => log::warn!("could not determine ffmpeg version: {e}"),
  }

  let stop = Arc::new(AtomicBool::new(false));
  let stop_handler = Arc::clone(&stop);
  ctrlc::set_handler(move || stop_handler.store(true, Ordering::Release))
    .context("installing Ctrl-C handler")?;

  session.start()?;
  let interval = Duration::from_millis(args.poll_ms.max(10));
  loop {
    if stop.load(Ordering::Acquire) && session.is_running() {
      session.stop()?;
    }
    for event in session.update() {
      match event {
        CaptureEvent::Started { pid } => log::info!("recording (pid {pid}), press Ctrl-C to stop"),
        CaptureEvent::Progress(status) => log::info!(
          "frame={} fps={:.1} size={}kB time={:.2}s bitrate={:.1}kbits/s speed={:.2}x",
          status.frame,
          status.fps,
          status.size_bytes / 1024,
          status.duration_secs,
          status.bitrate_kbps,
          status.speed
        ),
        CaptureEvent::Error(message) => log::warn!("{message}"),
        CaptureEvent::Stopped(reason) => log::info!("capture ended: {reason}"),
      }
    }
    if !session.is_running() {
      break;
    }
    thread::sleep(interval);
  }

  if session.phase() == Phase::Errored {
    let status = session.get_status();
    anyhow::bail!(
      "capture failed: {}",
      status.last_error.as_deref().unwrap_or("unknown error")
    );
  }
  Ok(())
}
