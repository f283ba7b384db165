//! The capture configuration model: inputs, encodings, filters and outputs.
//!
//! Everything here is plain data. Nothing is validated beyond defaulting;
//! the [`command`](crate::command) module turns a [`CaptureConfig`] into an
//! argument vector.

use std::{collections::BTreeMap, fs, path::Path};

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Input framerate used when a video input does not set one.
pub const DEFAULT_FRAMERATE: f64 = 30.0;

/// Video encoder used when a [`VideoEncoding`] does not name a codec.
pub const DEFAULT_VIDEO_CODEC: &str = "libx264";

/// Audio encoder used when an [`AudioEncoding`] does not name a codec.
pub const DEFAULT_AUDIO_CODEC: &str = "aac";

/// Pixel format used when a [`VideoEncoding`] does not set one.
pub const DEFAULT_PIX_FMT: &str = "yuv420p";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputKind {
  #[default]
  Video,
  Audio,
}

/// A single capture input, e.g. an X11 display or a PulseAudio source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputSpec {
  pub kind: InputKind,

  /// Input device/format, passed as `-f`, e.g. `x11grab`, `v4l2`, `pulse`.
  pub device: String,

  /// Device specific source passed as `-i`, e.g. `:0.0`, `/dev/video0`, `default`.
  pub source: String,

  /// Capture rate in frames per second (video only, defaults to 30).
  pub framerate: Option<f64>,

  /// Capture geometry as `(width, height)` (video only).
  pub size: Option<(u32, u32)>,

  /// Whether to draw the mouse cursor (screen grabbers only).
  pub draw_mouse: Option<bool>,

  /// Device-side pixel or compression format, passed as `-input_format`.
  pub input_format: Option<String>,

  /// Sample rate in Hz (audio only).
  pub sample_rate: Option<u32>,

  /// Channel count (audio only).
  pub channels: Option<u32>,

  /// Arguments inserted verbatim right before `-i`.
  pub extra_args: Vec<String>,
}

impl InputSpec {
  pub fn video<D: AsRef<str>, S: AsRef<str>>(device: D, source: S) -> Self {
    Self {
      kind: InputKind::Video,
      device: device.as_ref().to_string(),
      source: source.as_ref().to_string(),
      ..Default::default()
    }
  }

  pub fn audio<D: AsRef<str>, S: AsRef<str>>(device: D, source: S) -> Self {
    Self {
      kind: InputKind::Audio,
      device: device.as_ref().to_string(),
      source: source.as_ref().to_string(),
      ..Default::default()
    }
  }

  pub fn with_framerate(mut self, framerate: f64) -> Self {
    self.framerate = Some(framerate);
    self
  }

  pub fn with_size(mut self, width: u32, height: u32) -> Self {
    self.size = Some((width, height));
    self
  }

  pub fn with_draw_mouse(mut self, draw_mouse: bool) -> Self {
    self.draw_mouse = Some(draw_mouse);
    self
  }

  pub fn with_input_format<S: AsRef<str>>(mut self, format: S) -> Self {
    self.input_format = Some(format.as_ref().to_string());
    self
  }

  pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
    self.sample_rate = Some(sample_rate);
    self
  }

  pub fn with_channels(mut self, channels: u32) -> Self {
    self.channels = Some(channels);
    self
  }

  pub fn with_extra_args<I, S>(mut self, args: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    self
      .extra_args
      .extend(args.into_iter().map(|s| s.as_ref().to_string()));
    self
  }

  /// The effective framerate: the configured one, or [`DEFAULT_FRAMERATE`].
  pub fn framerate(&self) -> f64 {
    self.framerate.unwrap_or(DEFAULT_FRAMERATE)
  }
}

/// Video encoder settings.
///
/// Constant quality (`crf`) and bitrate controls (`bitrate`, `maxrate`,
/// `bufsize`) may be combined; e.g. capped CRF sets all of `crf`, `maxrate`
/// and `bufsize`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoEncoding {
  pub codec: Option<String>,
  pub preset: Option<String>,
  pub tune: Option<String>,
  /// Constant rate factor. x264/x265 accept fractional values, e.g. `23.5`.
  pub crf: Option<f32>,
  pub bitrate: Option<String>,
  pub maxrate: Option<String>,
  pub bufsize: Option<String>,
  pub pix_fmt: Option<String>,
  pub profile: Option<String>,
  pub level: Option<String>,
  /// Keyframe interval in frames (`-g`).
  pub gop: Option<u32>,
  /// Output framerate (`-r`).
  pub framerate: Option<f64>,
  pub extra_args: Vec<String>,
}

impl VideoEncoding {
  pub fn new<S: AsRef<str>>(codec: S) -> Self {
    Self {
      codec: Some(codec.as_ref().to_string()),
      ..Default::default()
    }
  }

  pub fn with_preset<S: AsRef<str>>(mut self, preset: S) -> Self {
    self.preset = Some(preset.as_ref().to_string());
    self
  }

  pub fn with_tune<S: AsRef<str>>(mut self, tune: S) -> Self {
    self.tune = Some(tune.as_ref().to_string());
    self
  }

  pub fn with_crf(mut self, crf: f32) -> Self {
    self.crf = Some(crf);
    self
  }

  pub fn with_bitrate<S: AsRef<str>>(mut self, bitrate: S) -> Self {
    self.bitrate = Some(bitrate.as_ref().to_string());
    self
  }

  pub fn with_maxrate<S: AsRef<str>>(mut self, maxrate: S) -> Self {
    self.maxrate = Some(maxrate.as_ref().to_string());
    self
  }

  pub fn with_bufsize<S: AsRef<str>>(mut self, bufsize: S) -> Self {
    self.bufsize = Some(bufsize.as_ref().to_string());
    self
  }

  pub fn with_pix_fmt<S: AsRef<str>>(mut self, pix_fmt: S) -> Self {
    self.pix_fmt = Some(pix_fmt.as_ref().to_string());
    self
  }

  pub fn with_profile<S: AsRef<str>>(mut self, profile: S) -> Self {
    self.profile = Some(profile.as_ref().to_string());
    self
  }

  pub fn with_level<S: AsRef<str>>(mut self, level: S) -> Self {
    self.level = Some(level.as_ref().to_string());
    self
  }

  pub fn with_gop(mut self, gop: u32) -> Self {
    self.gop = Some(gop);
    self
  }

  pub fn with_framerate(mut self, framerate: f64) -> Self {
    self.framerate = Some(framerate);
    self
  }

  pub fn with_extra_args<I, S>(mut self, args: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    self
      .extra_args
      .extend(args.into_iter().map(|s| s.as_ref().to_string()));
    self
  }

  pub fn codec(&self) -> &str {
    self.codec.as_deref().unwrap_or(DEFAULT_VIDEO_CODEC)
  }

  pub fn pix_fmt(&self) -> &str {
    self.pix_fmt.as_deref().unwrap_or(DEFAULT_PIX_FMT)
  }

  /// Overlay every field set in `other` onto `self`. Extra arguments are appended.
  pub fn merge(&mut self, other: &VideoEncoding) {
    merge_option(&mut self.codec, &other.codec);
    merge_option(&mut self.preset, &other.preset);
    merge_option(&mut self.tune, &other.tune);
    merge_option(&mut self.crf, &other.crf);
    merge_option(&mut self.bitrate, &other.bitrate);
    merge_option(&mut self.maxrate, &other.maxrate);
    merge_option(&mut self.bufsize, &other.bufsize);
    merge_option(&mut self.pix_fmt, &other.pix_fmt);
    merge_option(&mut self.profile, &other.profile);
    merge_option(&mut self.level, &other.level);
    merge_option(&mut self.gop, &other.gop);
    merge_option(&mut self.framerate, &other.framerate);
    self.extra_args.extend(other.extra_args.iter().cloned());
  }
}

/// Audio encoder settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioEncoding {
  pub codec: Option<String>,
  pub bitrate: Option<String>,
  pub sample_rate: Option<u32>,
  pub channels: Option<u32>,
  pub extra_args: Vec<String>,
}

impl AudioEncoding {
  pub fn new<S: AsRef<str>>(codec: S) -> Self {
    Self {
      codec: Some(codec.as_ref().to_string()),
      ..Default::default()
    }
  }

  pub fn with_bitrate<S: AsRef<str>>(mut self, bitrate: S) -> Self {
    self.bitrate = Some(bitrate.as_ref().to_string());
    self
  }

  pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
    self.sample_rate = Some(sample_rate);
    self
  }

  pub fn with_channels(mut self, channels: u32) -> Self {
    self.channels = Some(channels);
    self
  }

  pub fn with_extra_args<I, S>(mut self, args: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    self
      .extra_args
      .extend(args.into_iter().map(|s| s.as_ref().to_string()));
    self
  }

  pub fn codec(&self) -> &str {
    self.codec.as_deref().unwrap_or(DEFAULT_AUDIO_CODEC)
  }

  /// Overlay every field set in `other` onto `self`. Extra arguments are appended.
  pub fn merge(&mut self, other: &AudioEncoding) {
    merge_option(&mut self.codec, &other.codec);
    merge_option(&mut self.bitrate, &other.bitrate);
    merge_option(&mut self.sample_rate, &other.sample_rate);
    merge_option(&mut self.channels, &other.channels);
    self.extra_args.extend(other.extra_args.iter().cloned());
  }
}

fn merge_option<T: Clone>(into: &mut Option<T>, from: &Option<T>) {
  if let Some(value) = from {
    *into = Some(value.clone());
  }
}

/// What to do when an output file already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverwritePolicy {
  /// Replace existing files (`-y`).
  #[default]
  Overwrite,
  /// Refuse to touch existing files and exit immediately (`-n`).
  Skip,
}

/// A destination file or URL.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputTarget {
  pub path: String,

  /// Container format override (`-f`), e.g. `mp4`, `matroska`, `flv`.
  pub format: Option<String>,

  /// Container specific flags, e.g. `["-movflags", "+faststart"]`.
  pub container_args: Vec<String>,

  /// Global metadata, one `-metadata key=value` per entry. Keys are unique.
  pub metadata: BTreeMap<String, String>,

  pub overwrite: OverwritePolicy,

  /// Arguments inserted verbatim right before the output path.
  pub extra_args: Vec<String>,
}

impl OutputTarget {
  pub fn new<S: AsRef<str>>(path: S) -> Self {
    Self {
      path: path.as_ref().to_string(),
      ..Default::default()
    }
  }

  pub fn with_format<S: AsRef<str>>(mut self, format: S) -> Self {
    self.format = Some(format.as_ref().to_string());
    self
  }

  pub fn with_container_args<I, S>(mut self, args: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    self
      .container_args
      .extend(args.into_iter().map(|s| s.as_ref().to_string()));
    self
  }

  /// Set a metadata entry, replacing any previous value for `key`.
  pub fn with_metadata<K: AsRef<str>, V: AsRef<str>>(mut self, key: K, value: V) -> Self {
    self
      .metadata
      .insert(key.as_ref().to_string(), value.as_ref().to_string());
    self
  }

  pub fn with_overwrite(mut self, overwrite: OverwritePolicy) -> Self {
    self.overwrite = overwrite;
    self
  }

  pub fn with_extra_args<I, S>(mut self, args: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    self
      .extra_args
      .extend(args.into_iter().map(|s| s.as_ref().to_string()));
    self
  }
}

/// Maps a filter graph label (e.g. `[outv]`) or an input stream (e.g. `1:a`)
/// to an output track. The optional label becomes the track title.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamMap {
  pub source: String,
  pub label: Option<String>,
}

/// Per-track filter lists, or one complex graph with explicit stream maps.
///
/// When `complex` is set the simple `video`/`audio` lists are ignored by the
/// assembler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterChain {
  pub video: Vec<String>,
  pub audio: Vec<String>,
  pub complex: Option<String>,
  pub maps: Vec<StreamMap>,
}

impl FilterChain {
  pub fn uses_complex_graph(&self) -> bool {
    self.complex.is_some()
  }
}

/// Everything needed to assemble one capture invocation.
///
/// Mutators return `&mut Self` so calls can be chained. List-valued fields
/// (inputs, filters, stream maps, outputs) accumulate; encoding settings
/// overwrite.
///
/// ```rust
/// use capture_sidecar::config::{AudioEncoding, CaptureConfig, InputSpec, OutputTarget, VideoEncoding};
///
/// let mut config = CaptureConfig::new();
/// config
///   .input(InputSpec::video("x11grab", ":0.0").with_framerate(60.0))
///   .input(InputSpec::audio("pulse", "default"))
///   .video_encoding(VideoEncoding::new("libx264").with_crf(23.0).with_preset("medium"))
///   .audio_encoding(AudioEncoding::new("aac").with_bitrate("192k"))
///   .output(OutputTarget::new("out.mp4"));
///
/// assert_eq!(config.video_inputs().count(), 1);
/// assert_eq!(config.audio_inputs().count(), 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
  /// Arguments placed after the built-in global flags.
  pub global_args: Vec<String>,
  pub inputs: Vec<InputSpec>,
  pub filters: FilterChain,
  pub video: Option<VideoEncoding>,
  pub audio: Option<AudioEncoding>,
  pub outputs: Vec<OutputTarget>,
}

impl CaptureConfig {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn global_arg<S: AsRef<str>>(&mut self, arg: S) -> &mut Self {
    self.global_args.push(arg.as_ref().to_string());
    self
  }

  pub fn input(&mut self, input: InputSpec) -> &mut Self {
    self.inputs.push(input);
    self
  }

  /// Append a filter expression to the simple video chain (`-vf`).
  pub fn video_filter<S: AsRef<str>>(&mut self, filter: S) -> &mut Self {
    self.filters.video.push(filter.as_ref().to_string());
    self
  }

  /// Append a filter expression to the simple audio chain (`-af`).
  pub fn audio_filter<S: AsRef<str>>(&mut self, filter: S) -> &mut Self {
    self.filters.audio.push(filter.as_ref().to_string());
    self
  }

  /// Set the complex filter graph (`-filter_complex`). Takes precedence over
  /// the simple chains.
  pub fn complex_filter<S: AsRef<str>>(&mut self, graph: S) -> &mut Self {
    self.filters.complex = Some(graph.as_ref().to_string());
    self
  }

  /// Map a graph label or input stream to the next output track.
  pub fn map<S: AsRef<str>>(&mut self, source: S) -> &mut Self {
    self.filters.maps.push(StreamMap {
      source: source.as_ref().to_string(),
      label: None,
    });
    self
  }

  /// Like [`map`](Self::map), also titling the output track.
  pub fn map_labeled<S: AsRef<str>, L: AsRef<str>>(&mut self, source: S, label: L) -> &mut Self {
    self.filters.maps.push(StreamMap {
      source: source.as_ref().to_string(),
      label: Some(label.as_ref().to_string()),
    });
    self
  }

  pub fn video_encoding(&mut self, encoding: VideoEncoding) -> &mut Self {
    self.video = Some(encoding);
    self
  }

  pub fn audio_encoding(&mut self, encoding: AudioEncoding) -> &mut Self {
    self.audio = Some(encoding);
    self
  }

  pub fn output(&mut self, output: OutputTarget) -> &mut Self {
    self.outputs.push(output);
    self
  }

  pub fn video_inputs(&self) -> impl Iterator<Item = &InputSpec> {
    self
      .inputs
      .iter()
      .filter(|input| input.kind == InputKind::Video)
  }

  pub fn audio_inputs(&self) -> impl Iterator<Item = &InputSpec> {
    self
      .inputs
      .iter()
      .filter(|input| input.kind == InputKind::Audio)
  }

  /// Parse a configuration from TOML. Missing fields take their defaults.
  pub fn from_toml_str(toml_str: &str) -> anyhow::Result<Self> {
    toml::from_str(toml_str).context("parsing capture config")
  }

  /// Load a TOML configuration file.
  pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
    let path = path.as_ref();
    let contents =
      fs::read_to_string(path).with_context(|| format!("reading capture config at {path:?}"))?;
    toml::from_str(&contents).with_context(|| format!("parsing capture config from {path:?}"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults() {
    let input = InputSpec::video("x11grab", ":0.0");
    assert_eq!(input.framerate(), 30.0);
    assert_eq!(VideoEncoding::default().pix_fmt(), "yuv420p");
    assert_eq!(VideoEncoding::default().codec(), "libx264");
    assert_eq!(AudioEncoding::default().codec(), "aac");
  }

  #[test]
  fn test_lists_accumulate_and_encodings_overwrite() {
    let mut config = CaptureConfig::new();
    config
      .video_filter("scale=1280:-2")
      .video_filter("fps=30")
      .video_encoding(VideoEncoding::new("libx264"))
      .video_encoding(VideoEncoding::new("h264_nvenc"))
      .output(OutputTarget::new("a.mp4"))
      .output(OutputTarget::new("b.mkv"));

    assert_eq!(config.filters.video, vec!["scale=1280:-2", "fps=30"]);
    assert_eq!(config.video.as_ref().map(|v| v.codec()), Some("h264_nvenc"));
    assert_eq!(config.outputs.len(), 2);
  }

  #[test]
  fn test_metadata_keys_are_unique() {
    let output = OutputTarget::new("out.mp4")
      .with_metadata("title", "first")
      .with_metadata("title", "second");
    assert_eq!(output.metadata.len(), 1);
    assert_eq!(output.metadata["title"], "second");
  }

  #[test]
  fn test_merge_overlays_set_fields() {
    let mut base = VideoEncoding::new("libx264").with_crf(23.0).with_tune("film");
    base.merge(&VideoEncoding::default().with_crf(18.0).with_preset("slow"));
    assert_eq!(base.codec(), "libx264");
    assert_eq!(base.crf, Some(18.0));
    assert_eq!(base.preset.as_deref(), Some("slow"));
    assert_eq!(base.tune.as_deref(), Some("film"));
  }

  #[test]
  fn test_from_toml() {
    let config = CaptureConfig::from_toml_str(
      r#"
      [[inputs]]
      kind = "video"
      device = "x11grab"
      source = ":0.0"
      framerate = 60.0
      size = [1920, 1080]

      [[inputs]]
      kind = "audio"
      device = "pulse"
      source = "default"

      [video]
      codec = "libx264"
      crf = 23

      [[outputs]]
      path = "out.mkv"
      overwrite = "skip"

      [outputs.metadata]
      title = "Desktop"
      "#,
    )
    .unwrap();

    assert_eq!(config.inputs.len(), 2);
    assert_eq!(config.inputs[0].size, Some((1920, 1080)));
    assert_eq!(config.inputs[1].kind, InputKind::Audio);
    assert_eq!(config.video.as_ref().and_then(|v| v.crf), Some(23.0));
    assert!(config.audio.is_none());
    assert_eq!(config.outputs[0].overwrite, OverwritePolicy::Skip);
    assert_eq!(config.outputs[0].metadata["title"], "Desktop");
  }
}
