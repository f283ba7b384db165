use std::error::Error as StdError;
use std::fmt::{Display, Formatter};
use std::io;
use std::result::Result as StdResult;

/// Shorthand alias for `Result<T, Error>` using the `capture_sidecar` error type.
pub type Result<T> = StdResult<T, Error>;

/// Errors surfaced by the capture session lifecycle.
///
/// Lifecycle operations (`start`, `stop`, `pause`, `resume`) return these as
/// values. Failures that happen while polling are never returned; they are
/// delivered to the `on_error` callback instead.
#[derive(Debug)]
pub enum Error {
  /// `start()` was called while a process is already owned.
  AlreadyRunning,

  /// `stop()` was called without a running process.
  NotRunning,

  /// The external process could not be spawned, or it died inside the
  /// launch grace window. Carries the attempted command for diagnosis.
  Launch {
    command: String,
    reason: String,
    source: Option<io::Error>,
  },

  /// The operation is reserved but not implemented (`pause`/`resume`).
  Unsupported(&'static str),

  /// A user callback panicked. `slot` names the callback.
  Callback { slot: &'static str, message: String },

  /// Reading the diagnostic stream failed, e.g. the file vanished.
  Stream(io::Error),

  /// The process exited on its own with a failing status.
  ProcessExited {
    code: Option<i32>,
    last_error: Option<String>,
  },

  /// Signalling the tracked process failed.
  Signal { pid: u32, message: String },

  Io(io::Error),

  Message(String),
}

impl Display for Error {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    match self {
      Error::AlreadyRunning => write!(f, "capture process is already running"),
      Error::NotRunning => write!(f, "capture process is not running"),
      Error::Launch {
        command, reason, ..
      } => write!(f, "failed to launch `{command}`: {reason}"),
      Error::Unsupported(op) => write!(f, "`{op}` is not supported"),
      Error::Callback { slot, message } => write!(f, "{slot} callback panicked: {message}"),
      Error::Stream(e) => write!(f, "failed to read diagnostic stream: {e}"),
      Error::ProcessExited { code, last_error } => {
        match code {
          Some(code) => write!(f, "capture process exited with status {code}")?,
          None => write!(f, "capture process was terminated by a signal")?,
        }
        if let Some(last_error) = last_error {
          write!(f, " ({last_error})")?;
        }
        Ok(())
      }
      Error::Signal { pid, message } => write!(f, "failed to signal process {pid}: {message}"),
      Error::Io(e) => write!(f, "{e}"),
      Error::Message(message) => write!(f, "{message}"),
    }
  }
}

impl StdError for Error {
  fn source(&self) -> Option<&(dyn StdError + 'static)> {
    match self {
      Error::Launch {
        source: Some(e), ..
      } => Some(e),
      Error::Stream(e) | Error::Io(e) => Some(e),
      _ => None,
    }
  }
}

impl Error {
  /// Create an error message from a string.
  pub fn msg<S: AsRef<str>>(message: S) -> Self {
    Error::Message(message.as_ref().to_string())
  }

  /// Whether this error ends the current session attempt, as opposed to a
  /// rejected call that left the session untouched.
  pub fn is_terminal(&self) -> bool {
    matches!(
      self,
      Error::Launch { .. } | Error::Stream(_) | Error::ProcessExited { .. }
    )
  }
}

impl From<io::Error> for Error {
  fn from(e: io::Error) -> Self {
    Error::Io(e)
  }
}

impl From<&str> for Error {
  fn from(e: &str) -> Self {
    Error::msg(e)
  }
}

impl From<String> for Error {
  fn from(e: String) -> Self {
    Error::Message(e)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_launch_error_mentions_command() {
    let err = Error::Launch {
      command: "ffmpeg -i ':0.0' out.mp4".to_string(),
      reason: "No such file or directory".to_string(),
      source: None,
    };
    let message = err.to_string();
    assert!(message.contains("ffmpeg -i ':0.0' out.mp4"));
    assert!(err.is_terminal());
  }

  #[test]
  fn test_exit_error_includes_last_error() {
    let err = Error::ProcessExited {
      code: Some(1),
      last_error: Some("Device or resource busy".to_string()),
    };
    assert_eq!(
      err.to_string(),
      "capture process exited with status 1 (Device or resource busy)"
    );
  }

  #[test]
  fn test_guard_errors_are_not_terminal() {
    assert!(!Error::AlreadyRunning.is_terminal());
    assert!(!Error::NotRunning.is_terminal());
    assert!(!Error::Unsupported("pause").is_terminal());
  }
}
