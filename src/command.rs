use std::{
  ffi::OsStr,
  fmt, io,
  process::{Command, CommandArgs, Stdio},
};

use crate::{
  child::FfmpegChild,
  config::{
    AudioEncoding, CaptureConfig, FilterChain, InputKind, InputSpec, OutputTarget, OverwritePolicy,
    VideoEncoding,
  },
  paths::ffmpeg_path,
  quote::{join_command, protect_output_path},
};

/// A wrapper around [`std::process::Command`] with aliases for the FFmpeg
/// options a capture invocation needs.
///
/// Options are appended in call order. [`FfmpegCommand::from_config`] calls
/// them in the order FFmpeg's option parser expects: global flags, inputs,
/// filters, encoders, outputs.
///
/// The `rustdoc` on each method includes relevant information from the FFmpeg
/// documentation: <https://ffmpeg.org/ffmpeg.html>.
pub struct FfmpegCommand {
  inner: Command,
}

impl FfmpegCommand {
  //// Generic option aliases
  //// https://ffmpeg.org/ffmpeg.html#Generic-options

  /// alias for `-hide_banner` argument.
  ///
  /// Suppress printing the copyright notice, build options and library
  /// versions.
  pub fn hide_banner(&mut self) -> &mut Self {
    self.arg("-hide_banner");
    self
  }

  /// Configures logging with a level and format expected by the progress parser.
  ///
  /// Equivalent to `ffmpeg -loglevel level+info`.
  ///
  /// The `level` flag prefixes every log message with its level in square
  /// brackets, which lets the parser tell errors and fatal messages apart from
  /// informational output.
  pub fn expected_loglevel(&mut self) -> &mut Self {
    self.args(["-loglevel", "level+info"]);
    self
  }

  //// Main option aliases
  //// https://ffmpeg.org/ffmpeg.html#Main-options

  /// Alias for `-y` argument: overwrite output files without asking.
  pub fn overwrite(&mut self) -> &mut Self {
    self.arg("-y");
    self
  }

  /// Alias for `-n` argument: do not overwrite output files, and exit
  /// immediately if a specified output file already exists.
  pub fn no_overwrite(&mut self) -> &mut Self {
    self.arg("-n");
    self
  }

  /// Alias for `-f` argument.
  ///
  /// Before an input this selects the capture device (`x11grab`, `pulse`,
  /// `v4l2`, `avfoundation`, `dshow`, ...). Before an output it forces the
  /// container format.
  pub fn format<S: AsRef<str>>(&mut self, format: S) -> &mut Self {
    self.arg("-f");
    self.arg(format.as_ref());
    self
  }

  /// Alias for `-i` argument, the input file path, URL or device source.
  pub fn input<S: AsRef<str>>(&mut self, source: S) -> &mut Self {
    self.arg("-i");
    self.arg(source.as_ref());
    self
  }

  /// Alias for the `-framerate` input option of grabbing devices.
  pub fn framerate(&mut self, fps: f64) -> &mut Self {
    self.arg("-framerate");
    self.arg(fps.to_string());
    self
  }

  /// Alias for the `-video_size` input option of grabbing devices.
  pub fn video_size(&mut self, width: u32, height: u32) -> &mut Self {
    self.arg("-video_size");
    self.arg(format!("{width}x{height}"));
    self
  }

  /// Alias for the `-draw_mouse` option of screen grabbers.
  pub fn draw_mouse(&mut self, draw: bool) -> &mut Self {
    self.arg("-draw_mouse");
    self.arg(if draw { "1" } else { "0" });
    self
  }

  /// Alias for the `-input_format` option of `v4l2`.
  pub fn input_format<S: AsRef<str>>(&mut self, format: S) -> &mut Self {
    self.arg("-input_format");
    self.arg(format.as_ref());
    self
  }

  /// Alias for the `-sample_rate` input option of audio grabbers.
  pub fn sample_rate(&mut self, rate: u32) -> &mut Self {
    self.arg("-sample_rate");
    self.arg(rate.to_string());
    self
  }

  /// Alias for the `-channels` input option of audio grabbers.
  pub fn channels(&mut self, channels: u32) -> &mut Self {
    self.arg("-channels");
    self.arg(channels.to_string());
    self
  }

  /// Alias for `-filter_complex` argument.
  ///
  /// Define a complex filtergraph, i.e. one with arbitrary number of inputs
  /// and/or outputs. Labelled outputs are routed to output files with `-map`.
  pub fn filter_complex<S: AsRef<str>>(&mut self, graph: S) -> &mut Self {
    self.arg("-filter_complex");
    self.arg(graph.as_ref());
    self
  }

  /// Alias for `-map` argument.
  ///
  /// Select a filter graph output label (`[outv]`) or an input stream
  /// (`0:v`) for the next output track.
  pub fn map<S: AsRef<str>>(&mut self, stream: S) -> &mut Self {
    self.arg("-map");
    self.arg(stream.as_ref());
    self
  }

  /// Alias for `-vf` argument: a simple video filtergraph.
  pub fn filter_video<S: AsRef<str>>(&mut self, filtergraph: S) -> &mut Self {
    self.arg("-vf");
    self.arg(filtergraph.as_ref());
    self
  }

  /// Alias for `-af` argument: a simple audio filtergraph.
  pub fn filter_audio<S: AsRef<str>>(&mut self, filtergraph: S) -> &mut Self {
    self.arg("-af");
    self.arg(filtergraph.as_ref());
    self
  }

  /// Alias for `-c:v` argument.
  ///
  /// Select a video encoder, or the special value `copy` to indicate that the
  /// stream is not to be re-encoded.
  pub fn codec_video<S: AsRef<str>>(&mut self, codec: S) -> &mut Self {
    self.arg("-c:v");
    self.arg(codec.as_ref());
    self
  }

  /// Alias for `-c:a` argument.
  ///
  /// Select an audio encoder, or the special value `copy` to indicate that the
  /// stream is not to be re-encoded.
  pub fn codec_audio<S: AsRef<str>>(&mut self, codec: S) -> &mut Self {
    self.arg("-c:a");
    self.arg(codec.as_ref());
    self
  }

  /// Alias for `-pix_fmt` argument.
  pub fn pix_fmt<S: AsRef<str>>(&mut self, format: S) -> &mut Self {
    self.arg("-pix_fmt");
    self.arg(format.as_ref());
    self
  }

  /// Alias for `-crf` argument: constant rate factor of x264/x265 style
  /// encoders. Lower is better quality.
  pub fn crf(&mut self, crf: f32) -> &mut Self {
    self.arg("-crf");
    self.arg(crf.to_string());
    self
  }

  /// Alias for `-metadata key=value` argument (global output metadata).
  pub fn metadata<K: AsRef<str>, V: AsRef<str>>(&mut self, key: K, value: V) -> &mut Self {
    self.arg("-metadata");
    self.arg(format!("{}={}", key.as_ref(), value.as_ref()));
    self
  }

  /// Alias for `-metadata:s:<index> title=<title>`: names an output track.
  pub fn stream_title<S: AsRef<str>>(&mut self, index: usize, title: S) -> &mut Self {
    self.arg(format!("-metadata:s:{index}"));
    self.arg(format!("title={}", title.as_ref()));
    self
  }

  /// Alias for a positional output path. Paths starting with `-` are routed
  /// through the `file:` protocol so they cannot be taken for an option.
  pub fn output<S: AsRef<str>>(&mut self, path: S) -> &mut Self {
    self.arg(&*protect_output_path(path.as_ref()));
    self
  }

  //// Configuration sections, in invocation order.

  fn global_section(&mut self, config: &CaptureConfig) -> &mut Self {
    self.hide_banner().expected_loglevel();
    if config
      .outputs
      .iter()
      .any(|output| output.overwrite == OverwritePolicy::Skip)
    {
      self.no_overwrite();
    } else {
      self.overwrite();
    }
    self.args(&config.global_args)
  }

  fn input_section(&mut self, input: &InputSpec) -> &mut Self {
    if !input.device.is_empty() {
      self.format(&input.device);
    }
    match input.kind {
      InputKind::Video => {
        self.framerate(input.framerate());
        if let Some((width, height)) = input.size {
          self.video_size(width, height);
        }
        if let Some(draw) = input.draw_mouse {
          self.draw_mouse(draw);
        }
        if let Some(format) = &input.input_format {
          self.input_format(format);
        }
      }
      InputKind::Audio => {
        if let Some(rate) = input.sample_rate {
          self.sample_rate(rate);
        }
        if let Some(channels) = input.channels {
          self.channels(channels);
        }
      }
    }
    self.args(&input.extra_args).input(&input.source)
  }

  fn filter_section(&mut self, filters: &FilterChain) -> &mut Self {
    if let Some(graph) = &filters.complex {
      self.filter_complex(graph);
      for (index, stream_map) in filters.maps.iter().enumerate() {
        self.map(&stream_map.source);
        if let Some(label) = &stream_map.label {
          self.stream_title(index, label);
        }
      }
      return self;
    }
    if !filters.video.is_empty() {
      self.filter_video(filters.video.join(","));
    }
    if !filters.audio.is_empty() {
      self.filter_audio(filters.audio.join(","));
    }
    self
  }

  fn video_section(&mut self, video: &VideoEncoding) -> &mut Self {
    self.codec_video(video.codec());
    if let Some(preset) = &video.preset {
      self.args(["-preset", preset.as_str()]);
    }
    if let Some(tune) = &video.tune {
      self.args(["-tune", tune.as_str()]);
    }
    if let Some(crf) = video.crf {
      self.crf(crf);
    }
    if let Some(bitrate) = &video.bitrate {
      self.args(["-b:v", bitrate.as_str()]);
    }
    if let Some(maxrate) = &video.maxrate {
      self.args(["-maxrate", maxrate.as_str()]);
    }
    if let Some(bufsize) = &video.bufsize {
      self.args(["-bufsize", bufsize.as_str()]);
    }
    self.pix_fmt(video.pix_fmt());
    if let Some(profile) = &video.profile {
      self.args(["-profile:v", profile.as_str()]);
    }
    if let Some(level) = &video.level {
      self.args(["-level", level.as_str()]);
    }
    if let Some(gop) = video.gop {
      self.arg("-g").arg(gop.to_string());
    }
    if let Some(fps) = video.framerate {
      self.arg("-r").arg(fps.to_string());
    }
    self.args(&video.extra_args)
  }

  fn audio_section(&mut self, audio: &AudioEncoding) -> &mut Self {
    self.codec_audio(audio.codec());
    if let Some(bitrate) = &audio.bitrate {
      self.args(["-b:a", bitrate.as_str()]);
    }
    if let Some(rate) = audio.sample_rate {
      self.arg("-ar").arg(rate.to_string());
    }
    if let Some(channels) = audio.channels {
      self.arg("-ac").arg(channels.to_string());
    }
    self.args(&audio.extra_args)
  }

  fn output_section(&mut self, output: &OutputTarget) -> &mut Self {
    if let Some(format) = &output.format {
      self.format(format);
    }
    self.args(&output.container_args);
    for (key, value) in &output.metadata {
      self.metadata(key, value);
    }
    self.args(&output.extra_args).output(&output.path)
  }

  /// Append the whole invocation described by `config`.
  ///
  /// Video inputs precede audio inputs. A complex filter graph suppresses the
  /// simple `-vf`/`-af` chains entirely.
  pub fn apply_config(&mut self, config: &CaptureConfig) -> &mut Self {
    self.global_section(config);
    for input in config.video_inputs() {
      self.input_section(input);
    }
    for input in config.audio_inputs() {
      self.input_section(input);
    }
    self.filter_section(&config.filters);
    if let Some(video) = &config.video {
      self.video_section(video);
    }
    if let Some(audio) = &config.audio {
      self.audio_section(audio);
    }
    for output in &config.outputs {
      self.output_section(output);
    }
    self
  }

  //// `std::process::Command` passthrough methods
  ///
  /// Adds an argument to pass to the program.
  ///
  /// Identical to `arg` in [`std::process::Command`].
  pub fn arg<S: AsRef<OsStr>>(&mut self, arg: S) -> &mut Self {
    self.inner.arg(arg.as_ref());
    self
  }

  /// Adds multiple arguments to pass to the program.
  ///
  /// Identical to `args` in [`std::process::Command`].
  pub fn args<I, S>(&mut self, args: I) -> &mut Self
  where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
  {
    for arg in args {
      self.arg(arg.as_ref());
    }
    self
  }

  /// Returns an iterator of the arguments that will be passed to the program.
  ///
  /// Identical to `get_args` in [`std::process::Command`].
  pub fn get_args(&self) -> CommandArgs<'_> {
    self.inner.get_args()
  }

  /// The arguments as owned strings. Non-UTF-8 data is converted lossily.
  pub fn args_vec(&self) -> Vec<String> {
    self
      .get_args()
      .map(|arg| arg.to_string_lossy().into_owned())
      .collect()
  }

  /// The program and its arguments as one shell-quoted line.
  pub fn command_line(&self) -> String {
    join_command(
      &self.inner.get_program().to_string_lossy(),
      self.args_vec(),
    )
  }

  /// Spawn the command as a child process, wrapping it in a `FfmpegChild`.
  ///
  /// Identical to `spawn` in [`std::process::Command`].
  pub fn spawn(&mut self) -> io::Result<FfmpegChild> {
    let program = self.inner.get_program().to_os_string();
    self
      .inner
      .spawn()
      .map(|child| FfmpegChild::from_inner(child, &program))
  }

  /// Log a command that can be copy-pasted to run in the terminal.
  /// Requires `&mut self` so that it chains seamlessly with other methods in the interface.
  pub fn print_command(&mut self) -> &mut Self {
    log::info!("Command: {}", self.command_line());
    self
  }

  //// Constructors
  pub fn new() -> Self {
    Self::new_with_exe(ffmpeg_path())
  }

  pub fn new_with_exe<S: AsRef<OsStr>>(exe: S) -> Self {
    let mut inner = Command::new(&exe);
    inner.stdin(Stdio::piped());
    inner.stdout(Stdio::null());
    inner.stderr(Stdio::piped());
    detach_from_console_group(&mut inner);
    Self { inner }
  }

  /// Build the full invocation for `config`, run with `exe`.
  pub fn from_config<S: AsRef<OsStr>>(exe: S, config: &CaptureConfig) -> Self {
    let mut command = Self::new_with_exe(exe);
    command.apply_config(config);
    command
  }

  //// Escape hatches
  /// Escape hatch to access the inner `Command`.
  pub fn as_inner(&self) -> &Command {
    &self.inner
  }

  /// Escape hatch to mutably access the inner `Command`.
  pub fn as_inner_mut(&mut self) -> &mut Command {
    &mut self.inner
  }
}

/// The ordered argument vector for `config`, without the program name.
///
/// Pure: the same configuration always yields the same arguments.
pub fn assemble_args(config: &CaptureConfig) -> Vec<String> {
  FfmpegCommand::from_config("ffmpeg", config).args_vec()
}

/// The full invocation for `config` as one shell-quoted line.
pub fn to_command<S: AsRef<OsStr>>(exe: S, config: &CaptureConfig) -> String {
  FfmpegCommand::from_config(exe, config).command_line()
}

impl Default for FfmpegCommand {
  fn default() -> Self {
    Self::new()
  }
}

impl fmt::Debug for FfmpegCommand {
  /// Format the program and arguments of a Command for display. Any
  /// non-utf8 data is lossily converted using the utf8 replacement
  /// character.
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    self.inner.fmt(f)
  }
}

impl From<Command> for FfmpegCommand {
  /// Convert a `Command` into a `FfmpegCommand`, making no guarantees about the
  /// validity of its configured arguments and stdio. In particular the
  /// expected log level is not applied, so error lines will not be detected.
  fn from(inner: Command) -> Self {
    Self { inner }
  }
}

/// Start the child in its own process group, so a terminal Ctrl-C only reaches
/// the host program. The child is then stopped through
/// [`CaptureSession::stop`](crate::supervisor::CaptureSession::stop) alone.
#[cfg(unix)]
fn detach_from_console_group(command: &mut Command) {
  use std::os::unix::process::CommandExt;
  command.process_group(0);
}

#[cfg(windows)]
fn detach_from_console_group(command: &mut Command) {
  use std::os::windows::process::CommandExt;
  const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
  command.creation_flags(CREATE_NEW_PROCESS_GROUP);
}

#[cfg(not(any(unix, windows)))]
fn detach_from_console_group(_command: &mut Command) {}

impl From<FfmpegCommand> for Command {
  fn from(command: FfmpegCommand) -> Self {
    command.inner
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::{InputSpec, OutputTarget};

  fn position(args: &[String], needle: &str) -> usize {
    args
      .iter()
      .position(|a| a == needle)
      .unwrap_or_else(|| panic!("missing {needle} in {args:?}"))
  }

  #[test]
  fn test_global_flags_come_first() {
    let mut config = CaptureConfig::new();
    config.output(OutputTarget::new("out.mp4"));
    let args = assemble_args(&config);
    assert_eq!(
      &args[..4],
      &["-hide_banner", "-loglevel", "level+info", "-y"]
    );
    assert_eq!(args.last().map(String::as_str), Some("out.mp4"));
  }

  #[test]
  fn test_skip_policy_uses_no_overwrite() {
    let mut config = CaptureConfig::new();
    config
      .output(OutputTarget::new("a.mp4"))
      .output(OutputTarget::new("b.mp4").with_overwrite(OverwritePolicy::Skip));
    let args = assemble_args(&config);
    assert!(args.contains(&"-n".to_string()));
    assert!(!args.contains(&"-y".to_string()));
  }

  #[test]
  fn test_video_inputs_precede_audio_inputs() {
    let mut config = CaptureConfig::new();
    config
      .input(InputSpec::audio("pulse", "default"))
      .input(InputSpec::video("x11grab", ":0.0"));
    let args = assemble_args(&config);
    assert!(position(&args, ":0.0") < position(&args, "default"));
    // default framerate applies to the video input only
    assert_eq!(args[position(&args, "-framerate") + 1], "30");
    assert_eq!(args.iter().filter(|a| *a == "-framerate").count(), 1);
  }

  #[test]
  fn test_input_options_precede_source() {
    let mut config = CaptureConfig::new();
    config.input(
      InputSpec::video("v4l2", "/dev/video0")
        .with_size(1280, 720)
        .with_input_format("mjpeg")
        .with_extra_args(["-thread_queue_size", "512"]),
    );
    let args = assemble_args(&config);
    let source = position(&args, "/dev/video0");
    assert_eq!(args[source - 1], "-i");
    assert!(position(&args, "-video_size") < source);
    assert_eq!(args[position(&args, "-video_size") + 1], "1280x720");
    assert!(position(&args, "-thread_queue_size") < source);
  }

  #[test]
  fn test_fractional_crf() {
    let mut config = CaptureConfig::new();
    config.video_encoding(VideoEncoding::new("libx265").with_crf(23.5));
    let args = assemble_args(&config);
    assert_eq!(args[position(&args, "-crf") + 1], "23.5");

    let config = CaptureConfig::from_toml_str("[video]\ncodec = \"libx264\"\ncrf = 18\n").unwrap();
    let args = assemble_args(&config);
    assert_eq!(args[position(&args, "-crf") + 1], "18");
  }

  #[test]
  fn test_simple_filters_are_joined() {
    let mut config = CaptureConfig::new();
    config
      .video_filter("scale=1280:-2")
      .video_filter("fps=30")
      .audio_filter("volume=2");
    let args = assemble_args(&config);
    assert_eq!(args[position(&args, "-vf") + 1], "scale=1280:-2,fps=30");
    assert_eq!(args[position(&args, "-af") + 1], "volume=2");
  }

  #[test]
  fn test_stream_map_labels_title_tracks() {
    let mut config = CaptureConfig::new();
    config
      .complex_filter("[0:v][1:v]overlay[outv]")
      .map_labeled("[outv]", "Screen")
      .map("2:a");
    let args = assemble_args(&config);
    let graph = position(&args, "-filter_complex");
    assert_eq!(
      &args[graph..],
      &[
        "-filter_complex",
        "[0:v][1:v]overlay[outv]",
        "-map",
        "[outv]",
        "-metadata:s:0",
        "title=Screen",
        "-map",
        "2:a",
      ]
    );
  }

  #[test]
  fn test_output_section_order() {
    let mut config = CaptureConfig::new();
    config.output(
      OutputTarget::new("-live.flv")
        .with_format("flv")
        .with_container_args(["-flvflags", "no_duration_filesize"])
        .with_metadata("title", "Stream")
        .with_metadata("artist", "me"),
    );
    let args = assemble_args(&config);
    let tail = &args[position(&args, "-f")..];
    assert_eq!(
      tail,
      &[
        "-f",
        "flv",
        "-flvflags",
        "no_duration_filesize",
        "-metadata",
        "artist=me",
        "-metadata",
        "title=Stream",
        "file:-live.flv",
      ]
    );
  }

  #[test]
  fn test_command_line_quotes_arguments() {
    let mut config = CaptureConfig::new();
    config.output(OutputTarget::new("my video; rm -rf ~.mp4"));
    let line = to_command("ffmpeg", &config);
    assert!(line.starts_with("ffmpeg -hide_banner"));
    if !cfg!(windows) {
      assert!(line.ends_with("'my video; rm -rf ~.mp4'"));
    }
  }
}
