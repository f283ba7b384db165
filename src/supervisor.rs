//! The capture session: one external process at a time, driven by polling.

use std::{
  fs, mem,
  path::{Path, PathBuf},
  process::{ExitStatus, Stdio},
  thread,
  time::Duration,
};

use crate::{
  child::{signal_by_name, FfmpegChild, SignalOutcome, StopMethod},
  command::FfmpegCommand,
  config::CaptureConfig,
  diagnostics::DiagnosticLog,
  error::{Error, Result},
  event::{Callbacks, CaptureEvent, StopReason},
  paths::{default_diagnostics_path, ffmpeg_path},
  progress::{LogLevel, PollOutcome, ProgressTracker},
  status::StatusSnapshot,
};

/// How a [`CaptureSession`] launches and stops its process.
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
  /// The FFmpeg executable. Defaults to [`ffmpeg_path`].
  pub executable: PathBuf,

  /// Where the child's stderr is written. `None` picks a fresh file in the
  /// temporary directory for every launch and deletes it with the session.
  pub diagnostics_path: Option<PathBuf>,

  pub stop_method: StopMethod,

  /// When signalling the tracked process fails, signal every process with
  /// the same executable name instead.
  ///
  /// **Correctness risk:** this is not scoped to processes launched here and
  /// can stop unrelated captures on a shared host.
  pub fallback_kill_by_name: bool,

  /// Wait this long after spawning and report an immediate failing exit as a
  /// launch error instead of a later [`StopReason::Exited`].
  pub launch_grace: Option<Duration>,
}

impl Default for SupervisorOptions {
  fn default() -> Self {
    Self {
      executable: ffmpeg_path(),
      diagnostics_path: None,
      stop_method: StopMethod::default(),
      fallback_kill_by_name: true,
      launch_grace: None,
    }
  }
}

impl SupervisorOptions {
  pub fn with_executable<P: Into<PathBuf>>(mut self, executable: P) -> Self {
    self.executable = executable.into();
    self
  }

  pub fn with_diagnostics_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
    self.diagnostics_path = Some(path.into());
    self
  }

  pub fn with_stop_method(mut self, stop_method: StopMethod) -> Self {
    self.stop_method = stop_method;
    self
  }

  pub fn with_fallback_kill_by_name(mut self, enabled: bool) -> Self {
    self.fallback_kill_by_name = enabled;
    self
  }

  pub fn with_launch_grace(mut self, grace: Duration) -> Self {
    self.launch_grace = Some(grace);
    self
  }
}

/// The externally visible lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
  Idle,
  Starting,
  Running,
  Stopping,
  /// The last attempt ended with a failing exit. `start()` may be retried.
  Errored,
}

/// Resources that exist only while a process is owned.
struct RunningProcess {
  child: FfmpegChild,
  tracker: ProgressTracker,
  stream_failed: bool,
}

enum SessionState {
  Idle,
  Starting,
  Running(RunningProcess),
  Stopping,
  Errored,
}

/// Supervises one FFmpeg capture process.
///
/// The session never blocks on the process. Progress is only parsed when the
/// owner calls [`CaptureSession::update`]; see [`crate::monitor`] for a
/// background alternative.
///
/// ```no_run
/// use capture_sidecar::{
///   config::{CaptureConfig, InputSpec, OutputTarget},
///   supervisor::CaptureSession,
/// };
/// use std::{thread, time::Duration};
///
/// let mut config = CaptureConfig::new();
/// config
///   .input(InputSpec::video("x11grab", ":0.0"))
///   .output(OutputTarget::new("out.mp4"));
///
/// let mut session = CaptureSession::new(config);
/// session.on_progress(|status| println!("frame {}", status.frame));
/// session.start()?;
/// for _ in 0..50 {
///   session.update();
///   thread::sleep(Duration::from_millis(100));
/// }
/// session.stop()?;
/// # Ok::<(), capture_sidecar::error::Error>(())
/// ```
pub struct CaptureSession {
  config: CaptureConfig,
  options: SupervisorOptions,
  state: SessionState,
  status: StatusSnapshot,
  callbacks: Callbacks,
  pending: Vec<CaptureEvent>,
  diagnostics_path: Option<PathBuf>,
  owns_diagnostics: bool,
}

impl CaptureSession {
  pub fn new(config: CaptureConfig) -> Self {
    Self::with_options(config, SupervisorOptions::default())
  }

  pub fn with_options(config: CaptureConfig, options: SupervisorOptions) -> Self {
    Self {
      config,
      options,
      state: SessionState::Idle,
      status: StatusSnapshot::default(),
      callbacks: Callbacks::default(),
      pending: Vec::new(),
      diagnostics_path: None,
      owns_diagnostics: false,
    }
  }

  //// Configuration

  pub fn config(&self) -> &CaptureConfig {
    &self.config
  }

  /// Mutable access to the configuration, refused while a process is owned.
  pub fn configure(&mut self) -> Result<&mut CaptureConfig> {
    match self.state {
      SessionState::Running(_) => Err(Error::AlreadyRunning),
      _ => Ok(&mut self.config),
    }
  }

  pub fn options(&self) -> &SupervisorOptions {
    &self.options
  }

  pub fn options_mut(&mut self) -> Result<&mut SupervisorOptions> {
    match self.state {
      SessionState::Running(_) => Err(Error::AlreadyRunning),
      _ => Ok(&mut self.options),
    }
  }

  /// The command `start()` would launch.
  pub fn command(&self) -> FfmpegCommand {
    FfmpegCommand::from_config(&self.options.executable, &self.config)
  }

  /// Preview of the command line, quoted for the platform shell.
  pub fn to_command(&self) -> String {
    self.command().command_line()
  }

  /// Alias for [`CaptureSession::to_command`].
  pub fn get_command(&self) -> String {
    self.to_command()
  }

  //// Lifecycle

  /// Launch the process. Valid from `Idle` or `Errored`.
  ///
  /// On failure the session is left idle and `start()` can be retried.
  pub fn start(&mut self) -> Result<()> {
    match self.state {
      SessionState::Idle | SessionState::Errored => {}
      _ => return Err(Error::AlreadyRunning),
    }

    self.state = SessionState::Starting;
    match self.launch() {
      Ok(process) => {
        let pid = process.child.id();
        log::info!("capture started with pid {pid}");
        self.state = SessionState::Running(process);
        self.pending.push(CaptureEvent::Started { pid });
        if let Some(e) = self.callbacks.fire_start(pid) {
          self.report(e);
        }
        Ok(())
      }
      Err(e) => {
        log::error!("{e}");
        self.state = SessionState::Idle;
        self.status.running = false;
        self.status.last_error = Some(e.to_string());
        Err(e)
      }
    }
  }

  fn launch(&mut self) -> Result<RunningProcess> {
    let mut command = self.command();
    let command_line = command.command_line();
    let launch_error = |reason: String, source: Option<std::io::Error>| Error::Launch {
      command: command_line.clone(),
      reason,
      source,
    };

    let (path, owned) = match &self.options.diagnostics_path {
      Some(path) => (path.clone(), false),
      None => (default_diagnostics_path(), true),
    };
    let (log, stderr) = DiagnosticLog::create(&path).map_err(|e| {
      launch_error(
        format!("cannot create diagnostic log {}: {e}", path.display()),
        Some(e),
      )
    })?;
    self.replace_diagnostics_path(path, owned);

    command.as_inner_mut().stderr(Stdio::from(stderr));
    log::debug!("launching: {command_line}");
    let mut child = command
      .spawn()
      .map_err(|e| launch_error(e.to_string(), Some(e)))?;

    self.status.begin_session();
    let mut tracker = ProgressTracker::new(log);

    if let Some(grace) = self.options.launch_grace {
      thread::sleep(grace);
      if let Ok(Some(exit)) = child.try_wait() {
        if !exit.success() {
          if let Err(e) = tracker.finish(&mut self.status) {
            log::debug!("cannot read diagnostic log after failed launch: {e}");
          }
          let reason = match &self.status.last_error {
            Some(message) => format!("exited during launch with {exit}: {message}"),
            None => format!("exited during launch with {exit}"),
          };
          return Err(launch_error(reason, None));
        }
      }
    }

    Ok(RunningProcess {
      child,
      tracker,
      stream_failed: false,
    })
  }

  /// Ask the process to stop and return without waiting for it to exit.
  ///
  /// The child is reaped in the background, so the output file may still be
  /// open for a moment after this returns.
  pub fn stop(&mut self) -> Result<()> {
    let mut process = match mem::replace(&mut self.state, SessionState::Stopping) {
      SessionState::Running(process) => process,
      other => {
        self.state = other;
        return Err(Error::NotRunning);
      }
    };

    if let Err(e) = self.deliver_stop(&mut process.child) {
      self.state = SessionState::Running(process);
      return Err(e);
    }

    log::info!("capture with pid {} stopped", process.child.id());
    process.child.reap_in_background();
    self.status.running = false;
    self.state = SessionState::Idle;
    self.finish_stop(StopReason::Requested);
    Ok(())
  }

  fn deliver_stop(&self, child: &mut FfmpegChild) -> Result<()> {
    let method = self.options.stop_method;
    let error = match child.send(method) {
      Ok(SignalOutcome::Delivered) => return Ok(()),
      Ok(SignalOutcome::AlreadyExited) => {
        log::debug!("process {} had already exited", child.id());
        return Ok(());
      }
      Err(e) => e,
    };
    if !self.options.fallback_kill_by_name {
      return Err(error);
    }
    log::warn!(
      "{error}; signalling every `{}` process by name",
      child.program_name()
    );
    signal_by_name(child.program_name(), method).map(|_| ())
  }

  /// Reserved. Always fails with [`Error::Unsupported`].
  pub fn pause(&mut self) -> Result<()> {
    Err(Error::Unsupported("pause"))
  }

  /// Reserved. Always fails with [`Error::Unsupported`].
  pub fn resume(&mut self) -> Result<()> {
    Err(Error::Unsupported("resume"))
  }

  //// Polling

  /// Parse new diagnostic output, detect exit, and dispatch callbacks.
  ///
  /// Returns every event produced since the previous call, including those
  /// from `start()` and `stop()`. Never fails: problems are reported through
  /// `on_error` and as [`CaptureEvent::Error`].
  pub fn update(&mut self) -> Vec<CaptureEvent> {
    let (poll, exited) = match &mut self.state {
      SessionState::Running(process) => {
        let poll = match process.tracker.poll(&mut self.status) {
          Ok(outcome) => {
            process.stream_failed = false;
            Some(Ok(outcome))
          }
          // report a vanished log once, not on every tick
          Err(_) if process.stream_failed => None,
          Err(e) => {
            process.stream_failed = true;
            Some(Err(e))
          }
        };
        let exited = match process.child.try_wait() {
          Ok(exited) => exited,
          Err(e) => {
            log::warn!("cannot query process {}: {e}", process.child.id());
            None
          }
        };
        (poll, exited)
      }
      _ => (None, None),
    };

    match poll {
      Some(Ok(outcome)) => self.dispatch_poll(outcome),
      Some(Err(e)) => self.report(Error::Stream(e)),
      None => {}
    }

    if let Some(exit) = exited {
      if let SessionState::Running(process) = mem::replace(&mut self.state, SessionState::Stopping)
      {
        self.finish_exited(process, exit);
      }
    }

    mem::take(&mut self.pending)
  }

  fn finish_exited(&mut self, mut process: RunningProcess, exit: ExitStatus) {
    match process.tracker.finish(&mut self.status) {
      Ok(outcome) => self.dispatch_poll(outcome),
      Err(e) if !process.stream_failed => self.report(Error::Stream(e)),
      Err(_) => {}
    }
    self.status.running = false;

    let code = exit.code();
    if exit.success() {
      log::info!("capture with pid {} finished", process.child.id());
      self.state = SessionState::Idle;
    } else {
      let error = Error::ProcessExited {
        code,
        last_error: self.status.last_error.clone(),
      };
      if self.status.last_error.is_none() {
        self.status.last_error = Some(error.to_string());
      }
      self.state = SessionState::Errored;
      self.report(error);
    }
    self.finish_stop(StopReason::Exited { code });
  }

  fn finish_stop(&mut self, reason: StopReason) {
    self.pending.push(CaptureEvent::Stopped(reason));
    if let Some(e) = self.callbacks.fire_stop(reason) {
      self.report(e);
    }
  }

  fn dispatch_poll(&mut self, outcome: PollOutcome) {
    for (level, message) in outcome.errors {
      log::warn!("ffmpeg: {message}");
      if level == LogLevel::Fatal {
        self.callbacks.fire_error(&Error::msg(&message));
      }
      self.pending.push(CaptureEvent::Error(message));
    }
    if outcome.progressed {
      let snapshot = self.status.clone();
      if let Some(e) = self.callbacks.fire_progress(&snapshot) {
        self.report(e);
      }
      self.pending.push(CaptureEvent::Progress(snapshot));
    }
  }

  fn report(&mut self, error: Error) {
    log::error!("{error}");
    self.callbacks.fire_error(&error);
    self.pending.push(CaptureEvent::Error(error.to_string()));
  }

  //// Status

  /// A copy of the current snapshot.
  pub fn get_status(&self) -> StatusSnapshot {
    self.status.clone()
  }

  pub fn phase(&self) -> Phase {
    match self.state {
      SessionState::Idle => Phase::Idle,
      SessionState::Starting => Phase::Starting,
      SessionState::Running(_) => Phase::Running,
      SessionState::Stopping => Phase::Stopping,
      SessionState::Errored => Phase::Errored,
    }
  }

  pub fn is_running(&self) -> bool {
    matches!(self.state, SessionState::Running(_))
  }

  /// The identifier of the owned process, if any.
  pub fn pid(&self) -> Option<u32> {
    match &self.state {
      SessionState::Running(process) => Some(process.child.id()),
      _ => None,
    }
  }

  /// The raw diagnostic output of the current or most recent process.
  pub fn get_stderr(&self) -> Result<String> {
    match &self.diagnostics_path {
      Some(path) => Ok(DiagnosticLog::open(path).contents()?),
      None => Ok(String::new()),
    }
  }

  pub fn diagnostics_path(&self) -> Option<&Path> {
    self.diagnostics_path.as_deref()
  }

  fn replace_diagnostics_path(&mut self, path: PathBuf, owned: bool) {
    if let Some(previous) = self.diagnostics_path.take() {
      if self.owns_diagnostics && previous != path {
        remove_log(&previous);
      }
    }
    self.diagnostics_path = Some(path);
    self.owns_diagnostics = owned;
  }

  //// Callbacks

  pub fn on_start<F: FnMut(u32) + Send + 'static>(&mut self, f: F) -> &mut Self {
    self.callbacks.set_on_start(f);
    self
  }

  pub fn on_stop<F: FnMut(StopReason) + Send + 'static>(&mut self, f: F) -> &mut Self {
    self.callbacks.set_on_stop(f);
    self
  }

  pub fn on_error<F: FnMut(&Error) + Send + 'static>(&mut self, f: F) -> &mut Self {
    self.callbacks.set_on_error(f);
    self
  }

  pub fn on_progress<F: FnMut(&StatusSnapshot) + Send + 'static>(&mut self, f: F) -> &mut Self {
    self.callbacks.set_on_progress(f);
    self
  }
}

fn remove_log(path: &Path) {
  if let Err(e) = fs::remove_file(path) {
    log::debug!("cannot remove diagnostic log {}: {e}", path.display());
  }
}

impl Drop for CaptureSession {
  fn drop(&mut self) {
    if let SessionState::Running(mut process) = mem::replace(&mut self.state, SessionState::Idle) {
      log::info!("stopping capture with pid {} on drop", process.child.id());
      if let Err(e) = process.child.send(self.options.stop_method) {
        log::warn!("{e}");
      }
      process.child.reap_in_background();
    }
    if self.owns_diagnostics {
      if let Some(path) = &self.diagnostics_path {
        remove_log(path);
      }
    }
  }
}
