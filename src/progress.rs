//! Parsing FFmpeg's diagnostic output into progress updates and error lines.
//!
//! FFmpeg prints one full progress line per update, e.g.
//!
//! ```text
//! [info] frame=  123 fps= 30 q=28.0 size=    1024kB time=00:00:05.00 bitrate=1677.7kbits/s speed=1.00x
//! ```
//!
//! Every field may be missing or hold `N/A`. Fields are extracted
//! independently: one that fails to parse never prevents the others.

use std::io;

use crate::{diagnostics::DiagnosticLog, status::StatusSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
  Info,
  Warning,
  Error,
  Fatal,
  Unknown,
}

/// The fields found on one progress line. `None` means absent or unparseable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressUpdate {
  pub frame: Option<u64>,
  pub fps: Option<f64>,
  pub size_bytes: Option<u64>,
  pub bitrate_kbps: Option<f64>,
  pub duration_secs: Option<f64>,
  pub speed: Option<f64>,

  /// The line that this progress was parsed from
  pub raw_log_message: String,
}

impl ProgressUpdate {
  pub fn is_empty(&self) -> bool {
    self.frame.is_none()
      && self.fps.is_none()
      && self.size_bytes.is_none()
      && self.bitrate_kbps.is_none()
      && self.duration_secs.is_none()
      && self.speed.is_none()
  }
}

/// Classify a line by the `[level]` prefix that `-loglevel level+info` adds.
///
/// ```rust
/// use capture_sidecar::progress::{try_parse_log_level, LogLevel};
/// assert_eq!(try_parse_log_level("[fatal] Device or resource busy"), LogLevel::Fatal);
/// assert_eq!(try_parse_log_level("[x11grab @ 0x55] [error] Cannot open display"), LogLevel::Error);
/// assert_eq!(try_parse_log_level("plain text"), LogLevel::Unknown);
/// ```
pub fn try_parse_log_level(line: &str) -> LogLevel {
  if line.contains("[fatal]") {
    LogLevel::Fatal
  } else if line.contains("[error]") {
    LogLevel::Error
  } else if line.contains("[warning]") {
    LogLevel::Warning
  } else if line.contains("[info]") {
    LogLevel::Info
  } else {
    LogLevel::Unknown
  }
}

/// The message with its component and level prefixes removed.
fn strip_log_prefixes(line: &str) -> &str {
  let mut rest = line.trim();
  while rest.starts_with('[') {
    match rest.find("] ") {
      Some(end) => rest = rest[end + 2..].trim_start(),
      None => break,
    }
  }
  rest
}

/// Find the value of `key=` in a progress line, skipping padding after `=`.
///
/// The key must start a token; `size` also matches FFmpeg's final `Lsize=`.
fn field_value<'a>(line: &'a str, key: &str) -> Option<&'a str> {
  for (index, _) in line.match_indices(key) {
    let starts_token = line[..index]
      .chars()
      .next_back()
      .map_or(true, |c| c.is_whitespace() || (key == "size" && c == 'L'));
    let rest = &line[index + key.len()..];
    if !starts_token || !rest.starts_with('=') {
      continue;
    }
    return rest[1..].split_whitespace().next();
  }
  None
}

/// Parse an encoded size with its unit suffix into bytes. Kilo- and
/// megabytes are 1024-based, as FFmpeg prints them.
///
/// ```rust
/// use capture_sidecar::progress::parse_size;
/// assert_eq!(parse_size("1024kB"), Some(1_048_576));
/// assert_eq!(parse_size("10KiB"), Some(10_240));
/// assert_eq!(parse_size("2MiB"), Some(2_097_152));
/// assert_eq!(parse_size("512B"), Some(512));
/// assert_eq!(parse_size("N/A"), None);
/// ```
pub fn parse_size(value: &str) -> Option<u64> {
  let split = value
    .find(|c: char| !(c.is_ascii_digit() || c == '.'))
    .unwrap_or(value.len());
  let (number, unit) = value.split_at(split);
  let number = number.parse::<f64>().ok()?;
  let multiplier = match unit {
    "" | "B" | "b" => 1.0,
    "kB" | "KB" | "KiB" | "kiB" | "k" => 1024.0,
    "mB" | "MB" | "MiB" | "M" => 1024.0 * 1024.0,
    "gB" | "GB" | "GiB" | "G" => 1024.0 * 1024.0 * 1024.0,
    _ => return None,
  };
  Some((number * multiplier).round() as u64)
}

/// Parse a bitrate such as `1677.7kbits/s` into kilobits per second.
///
/// ```rust
/// use capture_sidecar::progress::parse_bitrate;
/// assert_eq!(parse_bitrate("1677.7kbits/s"), Some(1677.7));
/// assert_eq!(parse_bitrate("N/A"), None);
/// ```
pub fn parse_bitrate(value: &str) -> Option<f64> {
  value
    .strip_suffix("kbits/s")
    .unwrap_or(value)
    .parse::<f64>()
    .ok()
    .filter(|kbps| kbps.is_finite() && *kbps >= 0.0)
}

/// Parse a time string in the format `HOURS:MM:SS.MILLISECONDS` into a number of seconds.
///
/// <https://trac.ffmpeg.org/wiki/Seeking#Timeunitsyntax>
///
/// ## Examples
///
/// ```rust
/// use capture_sidecar::progress::parse_time_str;
/// assert!(parse_time_str("00:00:00.00") == Some(0.0));
/// assert!(parse_time_str("5") == Some(5.0));
/// assert!(parse_time_str("0.123") == Some(0.123));
/// assert!(parse_time_str("1:00.0") == Some(60.0));
/// assert!(parse_time_str("1:01.0") == Some(61.0));
/// assert!(parse_time_str("1:01:01.123") == Some(3661.123));
/// assert!(parse_time_str("N/A") == None);
/// ```
pub fn parse_time_str(str: &str) -> Option<f64> {
  let mut seconds = 0.0;

  let mut smh = str.split(':').rev();
  if let Some(sec) = smh.next() {
    seconds += sec.parse::<f64>().ok()?;
  }

  if let Some(min) = smh.next() {
    seconds += min.parse::<f64>().ok()? * 60.0;
  }

  if let Some(hrs) = smh.next() {
    seconds += hrs.parse::<f64>().ok()? * 60.0 * 60.0;
  }

  Some(seconds)
}

/// Parse a progress update line from ffmpeg.
///
/// A line qualifies when it carries a `frame=` or a `time=` token. Each field
/// is then extracted on its own; missing or malformed values are `None`.
///
/// ## Example
/// ```rust
/// use capture_sidecar::progress::try_parse_progress;
/// let line = "frame=  123 fps= 30 q=28.0 size=    1024kB time=00:00:05.00 bitrate=1677.7kbits/s speed=1.00x\n";
/// let progress = try_parse_progress(line).unwrap();
/// assert_eq!(progress.frame, Some(123));
/// assert_eq!(progress.fps, Some(30.0));
/// assert_eq!(progress.size_bytes, Some(1_048_576));
/// assert_eq!(progress.duration_secs, Some(5.0));
/// assert_eq!(progress.bitrate_kbps, Some(1677.7));
/// assert_eq!(progress.speed, Some(1.0));
/// ```
pub fn try_parse_progress(line: &str) -> Option<ProgressUpdate> {
  let raw_log_message = line.trim().to_string();
  let line = strip_log_prefixes(line);

  let frame_token = field_value(line, "frame");
  let time_token = field_value(line, "time");
  if frame_token.is_none() && time_token.is_none() && !has_key(line, "frame") && !has_key(line, "time")
  {
    return None;
  }

  Some(ProgressUpdate {
    frame: frame_token.and_then(|s| s.parse::<u64>().ok()),
    fps: field_value(line, "fps")
      .and_then(|s| s.parse::<f64>().ok())
      .filter(|fps| fps.is_finite() && *fps >= 0.0),
    size_bytes: field_value(line, "size").and_then(parse_size),
    bitrate_kbps: field_value(line, "bitrate").and_then(parse_bitrate),
    duration_secs: time_token
      .and_then(parse_time_str)
      .filter(|secs| secs.is_finite() && *secs >= 0.0),
    speed: field_value(line, "speed")
      .and_then(|s| s.strip_suffix('x'))
      .and_then(|s| s.parse::<f64>().ok()),
    raw_log_message,
  })
}

/// Whether `key=` appears as a token, even with an empty value at line end.
fn has_key(line: &str, key: &str) -> bool {
  line
    .split_whitespace()
    .any(|token| token.strip_prefix(key) == Some("="))
}

/// The outcome of scanning one chunk of diagnostic output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkScan {
  /// The last progress line of the chunk; earlier ones are superseded.
  pub progress: Option<ProgressUpdate>,

  /// Every `[error]` and `[fatal]` line, in order, without prefixes.
  pub errors: Vec<(LogLevel, String)>,
}

/// Split a chunk on `\r` and `\n` and pick out progress and error lines.
///
/// ```rust
/// use capture_sidecar::progress::scan_chunk;
/// let scan = scan_chunk("[info] frame=1 time=00:00:00.03\r[info] frame=2 time=00:00:00.06\r");
/// assert_eq!(scan.progress.unwrap().frame, Some(2));
/// assert!(scan.errors.is_empty());
/// ```
pub fn scan_chunk(chunk: &str) -> ChunkScan {
  let mut scan = ChunkScan::default();
  for line in chunk.split(['\r', '\n']) {
    let line = line.trim();
    if line.is_empty() {
      continue;
    }
    match try_parse_log_level(line) {
      level @ (LogLevel::Error | LogLevel::Fatal) => {
        scan
          .errors
          .push((level, strip_log_prefixes(line).to_string()));
        continue;
      }
      _ => {}
    }
    if let Some(progress) = try_parse_progress(line) {
      scan.progress = Some(progress);
    }
  }
  scan
}

/// What one poll of the diagnostic stream produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollOutcome {
  /// Whether the snapshot received at least one new field value.
  pub progressed: bool,
  pub errors: Vec<(LogLevel, String)>,
}

/// Fold a scanned chunk into `status`.
///
/// Error lines set `last_error`; the winning progress line is applied field
/// by field.
pub fn apply_chunk(chunk: &str, status: &mut StatusSnapshot) -> PollOutcome {
  let scan = scan_chunk(chunk);
  if let Some((_, message)) = scan.errors.last() {
    status.last_error = Some(message.clone());
  }
  let progressed = scan
    .progress
    .as_ref()
    .map_or(false, |progress| status.apply(progress));
  PollOutcome {
    progressed,
    errors: scan.errors,
  }
}

/// Incremental parser over a [`DiagnosticLog`].
///
/// Each poll consumes only the bytes appended since the previous one.
#[derive(Debug)]
pub struct ProgressTracker {
  log: DiagnosticLog,
}

impl ProgressTracker {
  pub fn new(log: DiagnosticLog) -> Self {
    Self { log }
  }

  /// Parse newly completed lines into `status`.
  pub fn poll(&mut self, status: &mut StatusSnapshot) -> io::Result<PollOutcome> {
    let chunk = self.log.read_available()?;
    Ok(Self::consume(chunk, status))
  }

  /// Parse everything left, including an unterminated last line. Used once
  /// the process has exited and nothing more will be appended.
  pub fn finish(&mut self, status: &mut StatusSnapshot) -> io::Result<PollOutcome> {
    let chunk = self.log.read_remaining()?;
    Ok(Self::consume(chunk, status))
  }

  fn consume(chunk: Option<String>, status: &mut StatusSnapshot) -> PollOutcome {
    match chunk {
      Some(chunk) => {
        log::trace!("parsing {} bytes of diagnostic output", chunk.len());
        apply_chunk(&chunk, status)
      }
      None => PollOutcome::default(),
    }
  }

  pub fn log(&self) -> &DiagnosticLog {
    &self.log
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  const SCENARIO_B: &str = "frame=  123 fps= 30 q=28.0 size=    1024kB time=00:00:05.00 bitrate=1677.7kbits/s speed=1.00x\n";

  #[test]
  fn test_parse_scenario_line() {
    let mut status = StatusSnapshot::default();
    let outcome = apply_chunk(SCENARIO_B, &mut status);
    assert!(outcome.progressed);
    assert_eq!(status.frame, 123);
    assert_eq!(status.fps, 30.0);
    assert_eq!(status.size_bytes, 1_048_576);
    assert_eq!(status.duration_secs, 5.0);
    assert_eq!(status.bitrate_kbps, 1677.7);
  }

  /// FFmpeg 7.0 and later print `KiB` and a final `Lsize=`.
  #[test]
  fn test_parse_progress_v7() {
    let line = "[info] frame=    5 fps=0.0 q=-1.0 Lsize=      10KiB time=00:00:03.00 bitrate=  27.2kbits/s speed= 283x\n";
    let progress = try_parse_progress(line).unwrap();
    assert_eq!(progress.frame, Some(5));
    assert_eq!(progress.fps, Some(0.0));
    assert_eq!(progress.size_bytes, Some(10_240));
    assert_eq!(progress.duration_secs, Some(3.0));
    assert_eq!(progress.bitrate_kbps, Some(27.2));
    assert_eq!(progress.speed, Some(283.0));
  }

  /// First progress message of a run, with `bitrate=N/A` and `speed=N/A`.
  #[test]
  fn test_parse_progress_not_available() {
    let line =
      "[info] frame=    0 fps=0.0 q=-0.0 size=       0kB time=00:00:00.00 bitrate=N/A speed=N/A\n";
    let progress = try_parse_progress(line).unwrap();
    assert_eq!(progress.frame, Some(0));
    assert_eq!(progress.size_bytes, Some(0));
    assert_eq!(progress.duration_secs, Some(0.0));
    assert_eq!(progress.bitrate_kbps, None);
    assert_eq!(progress.speed, None);
  }

  #[test]
  fn test_negative_time_is_ignored() {
    let line = "[info] frame=    0 fps=0.0 q=0.0 size=       0kB time=-577014:32:22.77 bitrate=  -0.0kbits/s speed=N/A";
    let progress = try_parse_progress(line).unwrap();
    assert_eq!(progress.frame, Some(0));
    assert_eq!(progress.duration_secs, None);
  }

  #[test]
  fn test_field_independence() {
    let mut status = StatusSnapshot {
      fps: 25.0,
      size_bytes: 4096,
      bitrate_kbps: 800.0,
      duration_secs: 2.0,
      ..Default::default()
    };
    let outcome = apply_chunk("frame=100\n", &mut status);
    assert!(outcome.progressed);
    assert_eq!(status.frame, 100);
    assert_eq!(status.fps, 25.0);
    assert_eq!(status.size_bytes, 4096);
    assert_eq!(status.bitrate_kbps, 800.0);
    assert_eq!(status.duration_secs, 2.0);
  }

  #[test]
  fn test_malformed_field_does_not_abort_line() {
    let progress = try_parse_progress("frame=abc fps=29.97 size=12qB time=00:01:00.50").unwrap();
    assert_eq!(progress.frame, None);
    assert_eq!(progress.fps, Some(29.97));
    assert_eq!(progress.size_bytes, None);
    assert_eq!(progress.duration_secs, Some(60.5));
  }

  #[test]
  fn test_audio_only_progress() {
    let progress =
      try_parse_progress("size=     512kB time=00:00:30.00 bitrate= 139.8kbits/s speed=1.00x")
        .unwrap();
    assert_eq!(progress.frame, None);
    assert_eq!(progress.size_bytes, Some(524_288));
    assert_eq!(progress.duration_secs, Some(30.0));
  }

  #[test]
  fn test_non_progress_lines_are_ignored() {
    for line in [
      "[info] Input #0, x11grab, from ':0.0':",
      "[info]   Duration: N/A, start: 1681234.123, bitrate: N/A",
      "[info]   Stream #0:0: Video: rawvideo (BGR[0] / 0x524742), bgr0, 1920x1080, 60 fps",
      "[warning] Past duration 0.999992 too large",
      "[info] Press [q] to stop, [?] for help",
    ] {
      assert_eq!(try_parse_progress(line), None, "{line}");
    }
    let mut status = StatusSnapshot::default();
    let outcome = apply_chunk("[info] Stream mapping:\n[info] Press [q] to stop\n", &mut status);
    assert!(!outcome.progressed);
    assert_eq!(status, StatusSnapshot::default());
  }

  #[test]
  fn test_last_progress_line_wins() {
    let chunk = "[info] frame=  10 fps=30 time=00:00:00.33\r\
                 [warning] something odd\n\
                 [info] frame=  20 fps=31 time=00:00:00.66\r";
    let scan = scan_chunk(chunk);
    let progress = scan.progress.unwrap();
    assert_eq!(progress.frame, Some(20));
    assert_eq!(progress.fps, Some(31.0));
  }

  #[test]
  fn test_error_lines_set_last_error() {
    let mut status = StatusSnapshot::default();
    let outcome = apply_chunk(
      "[x11grab @ 0x5581] [error] Cannot open display :9.0, error 1.\n[fatal] :9.0: Input/output error\n",
      &mut status,
    );
    assert_eq!(
      outcome.errors,
      vec![
        (
          LogLevel::Error,
          "Cannot open display :9.0, error 1.".to_string()
        ),
        (LogLevel::Fatal, ":9.0: Input/output error".to_string()),
      ]
    );
    assert_eq!(status.last_error.as_deref(), Some(":9.0: Input/output error"));
    assert!(!outcome.progressed);
  }

  #[test]
  fn test_split_reads_match_single_read() {
    let first = "[info] frame=  10 fps=30 size=  64kB time=00:00:00.33 bitrate=1588.4kbits/s\r";
    let second = "[info] frame=  20 fps=30 time=00:00:00.66 bitrate=1590.0kbits/s\r";

    let mut split = StatusSnapshot::default();
    apply_chunk(first, &mut split);
    apply_chunk(second, &mut split);

    let mut whole = StatusSnapshot::default();
    apply_chunk(&format!("{first}{second}"), &mut whole);

    // the second line lacks size=, so the joined read keeps the default while
    // the split reads keep the first line's size
    assert_eq!(split.frame, whole.frame);
    assert_eq!(split.duration_secs, whole.duration_secs);
    assert_eq!(split.bitrate_kbps, whole.bitrate_kbps);
  }

  #[test]
  fn test_split_complete_lines_give_identical_status() {
    let log = concat!(
      "[info] frame=  10 fps=30 size=  64kB time=00:00:00.33 bitrate=1588.4kbits/s speed=1.01x\r",
      "[info] frame=  20 fps=30 size= 128kB time=00:00:00.66 bitrate=1590.0kbits/s speed=0.99x\r",
      "[info] frame=  30 fps=30 size= 192kB time=00:00:01.00 bitrate=1572.9kbits/s speed=1.00x\n",
    );

    let mut whole = StatusSnapshot::default();
    apply_chunk(log, &mut whole);

    for cut in [1, 40, 87, 88, 120, log.len() - 1] {
      let dir = tempfile::tempdir().unwrap();
      let (diagnostics, mut writer) = DiagnosticLog::create(dir.path().join("stderr.log")).unwrap();
      let mut tracker = ProgressTracker::new(diagnostics);
      let mut split = StatusSnapshot::default();

      writer.write_all(log[..cut].as_bytes()).unwrap();
      tracker.poll(&mut split).unwrap();
      writer.write_all(log[cut..].as_bytes()).unwrap();
      tracker.poll(&mut split).unwrap();

      assert_eq!(split, whole, "cut at byte {cut}");
    }
    assert_eq!(whole.frame, 30);
    assert_eq!(whole.size_bytes, 192 * 1024);
  }

  #[test]
  fn test_tracker_consumes_each_byte_once() {
    let dir = tempfile::tempdir().unwrap();
    let (log, mut writer) = DiagnosticLog::create(dir.path().join("stderr.log")).unwrap();
    let mut tracker = ProgressTracker::new(log);
    let mut status = StatusSnapshot::default();

    writer.write_all(b"[info] frame=  10 fps=30 time=00:00:00.33\r").unwrap();
    assert!(tracker.poll(&mut status).unwrap().progressed);
    assert_eq!(status.frame, 10);

    // nothing new: no-op
    assert!(!tracker.poll(&mut status).unwrap().progressed);

    // a line split across two writes is matched once complete
    writer.write_all(b"[info] frame=  2").unwrap();
    assert!(!tracker.poll(&mut status).unwrap().progressed);
    assert_eq!(status.frame, 10);
    writer.write_all(b"0 fps=30 time=00:00:00.66\r").unwrap();
    assert!(tracker.poll(&mut status).unwrap().progressed);
    assert_eq!(status.frame, 20);

    writer.write_all(b"[info] frame=  30 time=00:00:01.00").unwrap();
    assert!(tracker.finish(&mut status).unwrap().progressed);
    assert_eq!(status.frame, 30);
    assert_eq!(tracker.log().watermark(), tracker.log().contents().unwrap().len() as u64);
  }
}
