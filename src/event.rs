use std::{
  any::Any,
  fmt,
  panic::{self, AssertUnwindSafe},
};

use crate::{error::Error, status::StatusSnapshot};

/// Something observable that happened to a capture session.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
  /// The process was launched with this identifier.
  Started { pid: u32 },
  /// New progress was parsed; carries a copy of the updated snapshot.
  Progress(StatusSnapshot),
  /// An error line, a failed poll, or an unexpected exit.
  Error(String),
  Stopped(StopReason),
}

impl CaptureEvent {
  pub fn is_stop(&self) -> bool {
    matches!(self, CaptureEvent::Stopped(_))
  }
}

/// Why a session left the running state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
  /// `stop()` was called.
  Requested,
  /// The process exited on its own.
  Exited { code: Option<i32> },
}

impl fmt::Display for StopReason {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      StopReason::Requested => write!(f, "stop requested"),
      StopReason::Exited { code: Some(code) } => write!(f, "exited with status {code}"),
      StopReason::Exited { code: None } => write!(f, "terminated by signal"),
    }
  }
}

type Slot<T> = Option<Box<dyn FnMut(T) + Send>>;

/// The four notification slots of a session. Each holds at most one handler;
/// registering again replaces the previous one.
#[derive(Default)]
pub struct Callbacks {
  on_start: Slot<u32>,
  on_stop: Slot<StopReason>,
  on_error: Option<Box<dyn FnMut(&Error) + Send>>,
  on_progress: Option<Box<dyn FnMut(&StatusSnapshot) + Send>>,
}

impl Callbacks {
  pub fn set_on_start<F: FnMut(u32) + Send + 'static>(&mut self, f: F) {
    self.on_start = Some(Box::new(f));
  }

  pub fn set_on_stop<F: FnMut(StopReason) + Send + 'static>(&mut self, f: F) {
    self.on_stop = Some(Box::new(f));
  }

  pub fn set_on_error<F: FnMut(&Error) + Send + 'static>(&mut self, f: F) {
    self.on_error = Some(Box::new(f));
  }

  pub fn set_on_progress<F: FnMut(&StatusSnapshot) + Send + 'static>(&mut self, f: F) {
    self.on_progress = Some(Box::new(f));
  }

  /// Invoke `on_start`. A panic is caught and returned as [`Error::Callback`].
  pub fn fire_start(&mut self, pid: u32) -> Option<Error> {
    let f = self.on_start.as_mut()?;
    guarded("on_start", || f(pid))
  }

  pub fn fire_stop(&mut self, reason: StopReason) -> Option<Error> {
    let f = self.on_stop.as_mut()?;
    guarded("on_stop", || f(reason))
  }

  pub fn fire_progress(&mut self, status: &StatusSnapshot) -> Option<Error> {
    let f = self.on_progress.as_mut()?;
    guarded("on_progress", || f(status))
  }

  /// Invoke `on_error`. A panic here has nowhere left to go, so it is logged.
  pub fn fire_error(&mut self, error: &Error) {
    let Some(f) = self.on_error.as_mut() else {
      return;
    };
    if let Some(e) = guarded("on_error", || f(error)) {
      log::error!("{e}");
    }
  }
}

impl fmt::Debug for Callbacks {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Callbacks")
      .field("on_start", &self.on_start.is_some())
      .field("on_stop", &self.on_stop.is_some())
      .field("on_error", &self.on_error.is_some())
      .field("on_progress", &self.on_progress.is_some())
      .finish()
  }
}

fn guarded<F: FnOnce()>(slot: &'static str, f: F) -> Option<Error> {
  panic::catch_unwind(AssertUnwindSafe(f))
    .err()
    .map(|payload| Error::Callback {
      slot,
      message: panic_message(payload.as_ref()),
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(s) = payload.downcast_ref::<&str>() {
    s.to_string()
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s.clone()
  } else {
    "unknown panic payload".to_string()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::{Arc, Mutex};

  #[test]
  fn test_empty_slots_are_noops() {
    let mut callbacks = Callbacks::default();
    assert!(callbacks.fire_start(1).is_none());
    assert!(callbacks.fire_stop(StopReason::Requested).is_none());
    assert!(callbacks.fire_progress(&StatusSnapshot::default()).is_none());
    callbacks.fire_error(&Error::NotRunning);
  }

  #[test]
  fn test_registering_replaces_handler() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let mut callbacks = Callbacks::default();

    let first = calls.clone();
    callbacks.set_on_start(move |pid| first.lock().unwrap().push(("first", pid)));
    let second = calls.clone();
    callbacks.set_on_start(move |pid| second.lock().unwrap().push(("second", pid)));

    callbacks.fire_start(42);
    assert_eq!(*calls.lock().unwrap(), vec![("second", 42)]);
  }

  #[test]
  fn test_panicking_callback_is_contained() {
    let mut callbacks = Callbacks::default();
    callbacks.set_on_progress(|_| panic!("boom"));
    let err = callbacks
      .fire_progress(&StatusSnapshot::default())
      .expect("panic should be reported");
    match err {
      Error::Callback { slot, message } => {
        assert_eq!(slot, "on_progress");
        assert_eq!(message, "boom");
      }
      other => panic!("unexpected error: {other}"),
    }

    // still callable afterwards
    assert!(callbacks.fire_progress(&StatusSnapshot::default()).is_some());
  }

  #[test]
  fn test_panicking_error_handler_does_not_propagate() {
    let mut callbacks = Callbacks::default();
    callbacks.set_on_error(|_| panic!("nested"));
    callbacks.fire_error(&Error::NotRunning);
  }

  #[test]
  fn test_stop_reason_display() {
    assert_eq!(StopReason::Requested.to_string(), "stop requested");
    assert_eq!(
      StopReason::Exited { code: Some(1) }.to_string(),
      "exited with status 1"
    );
  }
}
