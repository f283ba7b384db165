//! Capture device discovery.
//!
//! FFmpeg has no uniform listing interface: each input device prints its own
//! format, usually as log lines on stderr. The parsers here are pure and the
//! [`FfmpegDeviceCatalog`] only runs the probe commands.

use std::{
  ffi::OsStr,
  path::PathBuf,
  process::{Command, Stdio},
};

use anyhow::Context;

use crate::paths::ffmpeg_path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
  Video,
  Audio,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
  pub name: String,
  /// The value to pass as an input source.
  pub id: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceCapabilities {
  /// Pixel formats or codecs the device can deliver.
  pub formats: Vec<String>,
  pub resolutions: Vec<(u32, u32)>,
  pub framerates: Vec<f64>,
}

/// Lookup of capture devices and what they support.
pub trait DeviceCatalog {
  fn list_devices(&self, kind: DeviceKind) -> anyhow::Result<Vec<Device>>;

  fn get_device_capabilities(&self, kind: DeviceKind, id: &str)
    -> anyhow::Result<DeviceCapabilities>;
}

/// The FFmpeg input device family used for discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
  /// `v4l2` cameras and `pulse` audio sources.
  Linux,
  AvFoundation,
  DirectShow,
}

impl Backend {
  pub fn native() -> Self {
    if cfg!(target_os = "macos") {
      Backend::AvFoundation
    } else if cfg!(windows) {
      Backend::DirectShow
    } else {
      Backend::Linux
    }
  }

  /// The `-f` value for capturing from devices of `kind`.
  pub fn input_device(&self, kind: DeviceKind) -> &'static str {
    match (self, kind) {
      (Backend::Linux, DeviceKind::Video) => "v4l2",
      (Backend::Linux, DeviceKind::Audio) => "pulse",
      (Backend::AvFoundation, _) => "avfoundation",
      (Backend::DirectShow, _) => "dshow",
    }
  }
}

/// Discovers devices by running FFmpeg's listing commands.
#[derive(Debug, Clone)]
pub struct FfmpegDeviceCatalog {
  executable: PathBuf,
  backend: Backend,
}

impl Default for FfmpegDeviceCatalog {
  fn default() -> Self {
    Self::new(ffmpeg_path(), Backend::native())
  }
}

impl FfmpegDeviceCatalog {
  pub fn new<P: Into<PathBuf>>(executable: P, backend: Backend) -> Self {
    Self {
      executable: executable.into(),
      backend,
    }
  }

  pub fn backend(&self) -> Backend {
    self.backend
  }

  /// Run FFmpeg and return stdout followed by stderr. Listing commands
  /// usually exit with an error, so the status is ignored.
  fn probe<I, S>(&self, args: I) -> anyhow::Result<String>
  where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
  {
    let output = Command::new(&self.executable)
      .arg("-hide_banner")
      .args(args)
      .stdin(Stdio::null())
      .output()
      .with_context(|| format!("running {:?}", self.executable))?;
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    Ok(text)
  }
}

impl DeviceCatalog for FfmpegDeviceCatalog {
  fn list_devices(&self, kind: DeviceKind) -> anyhow::Result<Vec<Device>> {
    let device = self.backend.input_device(kind);
    let devices = match self.backend {
      Backend::Linux => parse_sources(&self.probe(["-sources", device])?),
      Backend::AvFoundation => parse_avfoundation_devices(
        &self.probe(["-f", device, "-list_devices", "true", "-i", ""])?,
        kind,
      ),
      Backend::DirectShow => parse_dshow_devices(
        &self.probe(["-f", device, "-list_devices", "true", "-i", "dummy"])?,
        kind,
      ),
    };
    log::debug!("found {} {device} devices", devices.len());
    Ok(devices)
  }

  fn get_device_capabilities(
    &self,
    kind: DeviceKind,
    id: &str,
  ) -> anyhow::Result<DeviceCapabilities> {
    let device = self.backend.input_device(kind);
    let capabilities = match (self.backend, kind) {
      (Backend::Linux, DeviceKind::Video) => {
        parse_v4l2_formats(&self.probe(["-f", device, "-list_formats", "all", "-i", id])?)
      }
      (Backend::Linux, DeviceKind::Audio) => DeviceCapabilities::default(),
      // an impossible framerate makes the device print its supported modes
      (Backend::AvFoundation, DeviceKind::Video) => {
        let source = format!("{id}:none");
        parse_avfoundation_modes(&self.probe([
          "-f",
          device,
          "-framerate",
          "0.1",
          "-i",
          source.as_str(),
        ])?)
      }
      (Backend::AvFoundation, DeviceKind::Audio) => DeviceCapabilities::default(),
      (Backend::DirectShow, _) => {
        let selector = match kind {
          DeviceKind::Video => format!("video={id}"),
          DeviceKind::Audio => format!("audio={id}"),
        };
        parse_dshow_options(&self.probe([
          "-f",
          device,
          "-list_options",
          "true",
          "-i",
          selector.as_str(),
        ])?)
      }
    };
    Ok(capabilities)
  }
}

/// Remove leading `[component @ 0x...]` and `[level]` tags from a log line.
fn strip_tags(line: &str) -> &str {
  let mut rest = line.trim_start();
  while rest.starts_with('[') {
    match rest.find("] ") {
      // keep avfoundation's `[0] Camera` index tags
      Some(end) if !rest[1..end].chars().all(|c| c.is_ascii_digit()) => {
        rest = rest[end + 2..].trim_start()
      }
      _ => break,
    }
  }
  rest
}

/// Parse the output of `ffmpeg -sources <device>`.
///
/// ```rust
/// use capture_sidecar::devices::parse_sources;
/// let out = "Auto-detected sources for video4linux2,v4l2:\n* /dev/video0 [Integrated Camera] (none)\n  /dev/video2 [USB Camera] (none)\n";
/// let devices = parse_sources(out);
/// assert_eq!(devices.len(), 2);
/// assert_eq!(devices[0].id, "/dev/video0");
/// assert_eq!(devices[0].name, "Integrated Camera");
/// ```
pub fn parse_sources(output: &str) -> Vec<Device> {
  output
    .lines()
    .filter(|line| line.starts_with(' ') || line.starts_with('*'))
    .filter_map(|line| {
      let line = line.trim_start_matches('*').trim();
      let (id, rest) = line.split_once(" [")?;
      let name = rest.rsplit_once(']').map_or(rest, |(name, _)| name);
      Some(Device {
        name: name.to_string(),
        id: id.trim().to_string(),
      })
    })
    .collect()
}

/// Parse `-f avfoundation -list_devices true` output.
pub fn parse_avfoundation_devices(output: &str, kind: DeviceKind) -> Vec<Device> {
  let mut section = None;
  let mut devices = Vec::new();
  for line in output.lines() {
    let line = strip_tags(line);
    if line.contains("AVFoundation video devices") {
      section = Some(DeviceKind::Video);
      continue;
    }
    if line.contains("AVFoundation audio devices") {
      section = Some(DeviceKind::Audio);
      continue;
    }
    if section != Some(kind) {
      continue;
    }
    let Some(rest) = line.strip_prefix('[') else {
      continue;
    };
    if let Some((index, name)) = rest.split_once("] ") {
      if index.parse::<u32>().is_ok() {
        devices.push(Device {
          name: name.trim().to_string(),
          id: index.to_string(),
        });
      }
    }
  }
  devices
}

/// Parse `-f dshow -list_devices true` output, in both the sectioned layout
/// and the newer one that tags each device with `(video)` or `(audio)`.
pub fn parse_dshow_devices(output: &str, kind: DeviceKind) -> Vec<Device> {
  let mut section = None;
  let mut devices = Vec::new();
  for line in output.lines() {
    let line = strip_tags(line);
    if line.starts_with("DirectShow video devices") {
      section = Some(DeviceKind::Video);
      continue;
    }
    if line.starts_with("DirectShow audio devices") {
      section = Some(DeviceKind::Audio);
      continue;
    }
    if line.starts_with("Alternative name") {
      continue;
    }
    let Some(rest) = line.strip_prefix('"') else {
      continue;
    };
    let Some((name, tail)) = rest.split_once('"') else {
      continue;
    };
    let tagged = if tail.contains("(video)") {
      Some(DeviceKind::Video)
    } else if tail.contains("(audio)") {
      Some(DeviceKind::Audio)
    } else if tail.contains("(none)") {
      None
    } else {
      section
    };
    if tagged == Some(kind) {
      devices.push(Device {
        name: name.to_string(),
        id: name.to_string(),
      });
    }
  }
  devices
}

fn parse_resolution(token: &str) -> Option<(u32, u32)> {
  let (w, h) = token.split_once('x')?;
  Some((w.parse().ok()?, h.parse().ok()?))
}

fn push_unique<T: PartialEq>(list: &mut Vec<T>, value: T) {
  if !list.contains(&value) {
    list.push(value);
  }
}

/// Parse `-f v4l2 -list_formats all` output.
///
/// ```rust
/// use capture_sidecar::devices::parse_v4l2_formats;
/// let out = "[video4linux2,v4l2 @ 0x55] Raw       :     yuyv422 :           YUYV 4:2:2 : 640x480 1280x720\n\
///            [video4linux2,v4l2 @ 0x55] Compressed:       mjpeg :          Motion-JPEG : 640x480 1920x1080\n";
/// let caps = parse_v4l2_formats(out);
/// assert_eq!(caps.formats, vec!["yuyv422", "mjpeg"]);
/// assert_eq!(caps.resolutions, vec![(640, 480), (1280, 720), (1920, 1080)]);
/// ```
pub fn parse_v4l2_formats(output: &str) -> DeviceCapabilities {
  let mut caps = DeviceCapabilities::default();
  for line in output.lines() {
    let line = strip_tags(line);
    let Some((kind, rest)) = line.split_once(':') else {
      continue;
    };
    if !matches!(kind.trim(), "Raw" | "Compressed" | "Emulated") {
      continue;
    }
    let mut fields = rest.split(" : ");
    if let Some(format) = fields.next().map(str::trim).filter(|f| !f.is_empty()) {
      push_unique(&mut caps.formats, format.to_string());
    }
    if let Some(sizes) = fields.nth(1) {
      for size in sizes.split_whitespace().filter_map(parse_resolution) {
        push_unique(&mut caps.resolutions, size);
      }
    }
  }
  caps
}

/// Parse avfoundation's "Supported modes" listing, e.g. `640x480@[15.000000 30.000000]fps`.
pub fn parse_avfoundation_modes(output: &str) -> DeviceCapabilities {
  let mut caps = DeviceCapabilities::default();
  for line in output.lines() {
    let line = strip_tags(line);
    let Some((size, rates)) = line.split_once("@[") else {
      continue;
    };
    if let Some(size) = parse_resolution(size.trim()) {
      push_unique(&mut caps.resolutions, size);
    }
    let rates = rates.split(']').next().unwrap_or_default();
    for rate in rates.split_whitespace().filter_map(|r| r.parse::<f64>().ok()) {
      push_unique(&mut caps.framerates, rate);
    }
  }
  caps
}

/// Parse `-f dshow -list_options true` output.
///
/// ```rust
/// use capture_sidecar::devices::parse_dshow_options;
/// let out = "[dshow @ 0000] DirectShow video device options (from video devices)\n\
///            [dshow @ 0000]  Pin \"Capture\" (alternative pin name \"0\")\n\
///            [dshow @ 0000]   vcodec=mjpeg  min s=1280x720 fps=30 max s=1280x720 fps=30\n\
///            [dshow @ 0000]   pixel_format=yuyv422  min s=640x480 fps=15 max s=640x480 fps=30\n";
/// let caps = parse_dshow_options(out);
/// assert_eq!(caps.formats, vec!["mjpeg", "yuyv422"]);
/// assert_eq!(caps.resolutions, vec![(1280, 720), (640, 480)]);
/// assert_eq!(caps.framerates, vec![30.0, 15.0]);
/// ```
pub fn parse_dshow_options(output: &str) -> DeviceCapabilities {
  let mut caps = DeviceCapabilities::default();
  for line in output.lines() {
    let line = strip_tags(line);
    let Some(format) = line
      .strip_prefix("vcodec=")
      .or_else(|| line.strip_prefix("pixel_format="))
      .and_then(|rest| rest.split_whitespace().next())
    else {
      continue;
    };
    push_unique(&mut caps.formats, format.to_string());
    for token in line.split_whitespace() {
      if let Some(size) = token.strip_prefix("s=").and_then(parse_resolution) {
        push_unique(&mut caps.resolutions, size);
      } else if let Some(fps) = token.strip_prefix("fps=").and_then(|f| f.parse::<f64>().ok()) {
        push_unique(&mut caps.framerates, fps);
      }
    }
  }
  caps
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_pulse_sources() {
    let output = "Auto-detected sources for pulse:\n\
      * alsa_input.pci-0000_00_1f.3.analog-stereo [Built-in Audio Analog Stereo] (none)\n  \
      alsa_output.pci-0000_00_1f.3.analog-stereo.monitor [Monitor of Built-in Audio Analog Stereo] (none)\n";
    let devices = parse_sources(output);
    assert_eq!(
      devices,
      vec![
        Device {
          name: "Built-in Audio Analog Stereo".to_string(),
          id: "alsa_input.pci-0000_00_1f.3.analog-stereo".to_string(),
        },
        Device {
          name: "Monitor of Built-in Audio Analog Stereo".to_string(),
          id: "alsa_output.pci-0000_00_1f.3.analog-stereo.monitor".to_string(),
        },
      ]
    );
  }

  #[test]
  fn test_parse_sources_ignores_errors() {
    assert!(parse_sources("Cannot list sources: Function not implemented\n").is_empty());
  }

  #[test]
  fn test_parse_avfoundation_devices() {
    let output = "[AVFoundation indev @ 0x7f8] AVFoundation video devices:\n\
      [AVFoundation indev @ 0x7f8] [0] FaceTime HD Camera\n\
      [AVFoundation indev @ 0x7f8] [1] Capture screen 0\n\
      [AVFoundation indev @ 0x7f8] AVFoundation audio devices:\n\
      [AVFoundation indev @ 0x7f8] [0] MacBook Pro Microphone\n\
      [in#0 @ 0x600] Error opening input: Input/output error\n";

    let video = parse_avfoundation_devices(output, DeviceKind::Video);
    assert_eq!(video.len(), 2);
    assert_eq!(video[1].name, "Capture screen 0");
    assert_eq!(video[1].id, "1");

    let audio = parse_avfoundation_devices(output, DeviceKind::Audio);
    assert_eq!(audio.len(), 1);
    assert_eq!(audio[0].name, "MacBook Pro Microphone");
    assert_eq!(audio[0].id, "0");
  }

  #[test]
  fn test_parse_dshow_devices_tagged() {
    let output = "[dshow @ 000001] \"Integrated Camera\" (video)\n\
      [dshow @ 000001]   Alternative name \"@device_pnp_\\\\?\\usb#vid_04f2\"\n\
      [dshow @ 000001] \"OBS Virtual Camera\" (none)\n\
      [dshow @ 000001] \"Microphone Array (Realtek(R) Audio)\" (audio)\n";

    let video = parse_dshow_devices(output, DeviceKind::Video);
    assert_eq!(video.len(), 1);
    assert_eq!(video[0].name, "Integrated Camera");

    let audio = parse_dshow_devices(output, DeviceKind::Audio);
    assert_eq!(audio[0].name, "Microphone Array (Realtek(R) Audio)");
  }

  #[test]
  fn test_parse_dshow_devices_sectioned() {
    let output = "[dshow @ 02] DirectShow video devices (some may be both video and audio devices)\n\
      [dshow @ 02]  \"USB2.0 HD UVC WebCam\"\n\
      [dshow @ 02]     Alternative name \"@device_pnp_abc\"\n\
      [dshow @ 02] DirectShow audio devices\n\
      [dshow @ 02]  \"Microphone (High Definition Audio Device)\"\n";

    let video = parse_dshow_devices(output, DeviceKind::Video);
    assert_eq!(video.len(), 1);
    assert_eq!(video[0].id, "USB2.0 HD UVC WebCam");
    assert_eq!(parse_dshow_devices(output, DeviceKind::Audio).len(), 1);
  }

  #[test]
  fn test_parse_v4l2_skips_stepwise_sizes() {
    let output = "[video4linux2,v4l2 @ 0x1] Raw       :     yuv420p :     Planar YUV 4:2:0 : {32-4096, 2}x{16-2304, 2}\n";
    let caps = parse_v4l2_formats(output);
    assert_eq!(caps.formats, vec!["yuv420p"]);
    assert!(caps.resolutions.is_empty());
  }

  #[test]
  fn test_parse_avfoundation_modes() {
    let output = "[avfoundation @ 0x7f] Selected framerate (0.100000) is not supported by the device.\n\
      [avfoundation @ 0x7f] Supported modes:\n\
      [avfoundation @ 0x7f]   1280x720@[1.000000 30.000000]fps\n\
      [avfoundation @ 0x7f]   640x480@[1.000000 30.000000]fps\n";
    let caps = parse_avfoundation_modes(output);
    assert_eq!(caps.resolutions, vec![(1280, 720), (640, 480)]);
    assert_eq!(caps.framerates, vec![1.0, 30.0]);
    assert!(caps.formats.is_empty());
  }

  #[test]
  fn test_backend_input_devices() {
    assert_eq!(Backend::Linux.input_device(DeviceKind::Video), "v4l2");
    assert_eq!(Backend::Linux.input_device(DeviceKind::Audio), "pulse");
    assert_eq!(Backend::DirectShow.input_device(DeviceKind::Audio), "dshow");
  }

  #[cfg(unix)]
  #[test]
  fn test_missing_executable_is_an_error() {
    let catalog = FfmpegDeviceCatalog::new("/nonexistent/ffmpeg", Backend::Linux);
    assert!(catalog.list_devices(DeviceKind::Video).is_err());
  }
}
