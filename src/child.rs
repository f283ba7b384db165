use std::{
  ffi::OsStr,
  io::{self, Write},
  path::Path,
  process::{Child, ChildStdin, Command, ExitStatus, Stdio},
  thread::{self, JoinHandle},
};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How a running capture is asked to stop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopMethod {
  /// `SIGINT`, the same as pressing Ctrl-C. FFmpeg finalizes the output
  /// container before exiting. Falls back to a hard kill on Windows.
  #[default]
  Interrupt,
  /// `SIGTERM`. Falls back to a hard kill on Windows.
  Terminate,
  /// Write `q` to the process' stdin, FFmpeg's interactive quit command.
  /// Works on every platform as long as stdin is piped.
  Quit,
}

/// What happened when a stop request was delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOutcome {
  Delivered,
  /// The process was already gone; nothing was signalled.
  AlreadyExited,
}

/// A wrapper around [`std::process::Child`] containing a spawned FFmpeg
/// command. The process identifier is captured once, at spawn.
///
/// The operating system may recycle the identifier after the process has
/// been reaped. Signals are only ever sent while this handle still owns the
/// unreaped child, which keeps the identifier reserved.
pub struct FfmpegChild {
  inner: Child,
  pid: u32,
  program_name: String,
}

impl FfmpegChild {
  pub(crate) fn from_inner(inner: Child, program: &OsStr) -> Self {
    let pid = inner.id();
    let program_name = Path::new(program)
      .file_stem()
      .unwrap_or(program)
      .to_string_lossy()
      .into_owned();
    Self {
      inner,
      pid,
      program_name,
    }
  }

  /// The operating system process identifier.
  pub fn id(&self) -> u32 {
    self.pid
  }

  /// The executable's file stem, used for by-name signalling.
  pub fn program_name(&self) -> &str {
    &self.program_name
  }

  /// Check for exit without blocking.
  ///
  /// Identical to `try_wait` in [`std::process::Child`].
  pub fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
    self.inner.try_wait()
  }

  /// Block until the process exits.
  ///
  /// Identical to `wait` in [`std::process::Child`].
  pub fn wait(&mut self) -> io::Result<ExitStatus> {
    self.inner.wait()
  }

  /// Forcibly kill the process.
  ///
  /// Identical to `kill` in [`std::process::Child`].
  pub fn kill(&mut self) -> io::Result<()> {
    self.inner.kill()
  }

  /// Send FFmpeg the `q` command on stdin, asking it to finish gracefully.
  pub fn quit(&mut self) -> io::Result<()> {
    let stdin = self
      .inner
      .stdin
      .as_mut()
      .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "stdin is not piped"))?;
    stdin.write_all(b"q")?;
    stdin.flush()
  }

  /// Send an interrupt signal (`SIGINT`).
  pub fn interrupt(&mut self) -> Result<SignalOutcome> {
    self.send(StopMethod::Interrupt)
  }

  /// Send a terminate signal (`SIGTERM`).
  pub fn terminate(&mut self) -> Result<SignalOutcome> {
    self.send(StopMethod::Terminate)
  }

  /// Deliver a stop request using `method`.
  pub fn send(&mut self, method: StopMethod) -> Result<SignalOutcome> {
    if let Ok(Some(_)) = self.inner.try_wait() {
      return Ok(SignalOutcome::AlreadyExited);
    }
    match method {
      StopMethod::Quit => match self.quit() {
        Ok(()) => Ok(SignalOutcome::Delivered),
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(SignalOutcome::AlreadyExited),
        Err(e) => Err(Error::Signal {
          pid: self.pid,
          message: e.to_string(),
        }),
      },
      StopMethod::Interrupt | StopMethod::Terminate => self.send_signal(method),
    }
  }

  #[cfg(unix)]
  fn send_signal(&mut self, method: StopMethod) -> Result<SignalOutcome> {
    use nix::{
      errno::Errno,
      sys::signal::{kill, Signal},
      unistd::Pid,
    };

    let signal = match method {
      StopMethod::Terminate => Signal::SIGTERM,
      _ => Signal::SIGINT,
    };
    let pid = i32::try_from(self.pid).map_err(|_| Error::Signal {
      pid: self.pid,
      message: "process id out of range".to_string(),
    })?;
    match kill(Pid::from_raw(pid), signal) {
      Ok(()) => Ok(SignalOutcome::Delivered),
      Err(Errno::ESRCH) => Ok(SignalOutcome::AlreadyExited),
      Err(errno) => Err(Error::Signal {
        pid: self.pid,
        message: errno.desc().to_string(),
      }),
    }
  }

  #[cfg(not(unix))]
  fn send_signal(&mut self, _method: StopMethod) -> Result<SignalOutcome> {
    match self.inner.kill() {
      Ok(()) => Ok(SignalOutcome::Delivered),
      Err(e) if e.kind() == io::ErrorKind::InvalidInput => Ok(SignalOutcome::AlreadyExited),
      Err(e) => Err(Error::Signal {
        pid: self.pid,
        message: e.to_string(),
      }),
    }
  }

  /// Take ownership of the stdin pipe, if any.
  pub fn take_stdin(&mut self) -> Option<ChildStdin> {
    self.inner.stdin.take()
  }

  /// Hand the child to a detached thread that waits for it, so an exited
  /// process never lingers as a zombie.
  pub fn reap_in_background(mut self) -> JoinHandle<()> {
    thread::spawn(move || match self.inner.wait() {
      Ok(status) => log::debug!("process {} exited with {}", self.pid, status),
      Err(e) => log::warn!("failed to wait for process {}: {}", self.pid, e),
    })
  }

  /// Escape hatch to access the inner `Child`.
  pub fn as_inner(&self) -> &Child {
    &self.inner
  }

  /// Escape hatch to mutably access the inner `Child`.
  pub fn as_inner_mut(&mut self) -> &mut Child {
    &mut self.inner
  }
}

/// Signal **every** process whose name is `program_name`.
///
/// This is a last resort for when the tracked process identifier cannot be
/// signalled. It is not scoped to this program's children: on a shared host
/// it will also stop unrelated processes with the same name.
pub fn signal_by_name(program_name: &str, method: StopMethod) -> Result<SignalOutcome> {
  let mut command = by_name_command(program_name, method);
  let status = command
    .stdin(Stdio::null())
    .stdout(Stdio::null())
    .stderr(Stdio::null())
    .status()
    .map_err(|e| Error::msg(format!("failed to run by-name signal for `{program_name}`: {e}")))?;
  match status.code() {
    Some(0) => Ok(SignalOutcome::Delivered),
    // pkill: no process matched; taskkill: process not found
    Some(1) | Some(128) => Ok(SignalOutcome::AlreadyExited),
    _ => Err(Error::msg(format!(
      "by-name signal for `{program_name}` failed with {status}"
    ))),
  }
}

#[cfg(unix)]
fn by_name_command(program_name: &str, method: StopMethod) -> Command {
  let signal = match method {
    StopMethod::Terminate => "-TERM",
    _ => "-INT",
  };
  let mut command = Command::new("pkill");
  command.args([signal, "-x", program_name]);
  command
}

#[cfg(not(unix))]
fn by_name_command(program_name: &str, _method: StopMethod) -> Command {
  let mut command = Command::new("taskkill");
  command.args(["/F", "/IM", &format!("{program_name}.exe")]);
  command
}
