//! Poll a shared session from a background thread and consume its events as
//! an iterator.

use std::{
  sync::{
    mpsc::{sync_channel, Receiver, SyncSender},
    Arc, Mutex,
  },
  thread::{self, JoinHandle},
  time::Duration,
};

use crate::{event::CaptureEvent, status::StatusSnapshot, supervisor::CaptureSession};

/// An iterator over the events of a [`CaptureSession`], fed by a worker
/// thread that calls [`CaptureSession::update`] every `interval`.
///
/// The channel is unbuffered, so the worker only polls again once the
/// previous events were consumed. Events arrive in the order the session
/// produced them. The iterator ends after the session leaves the running
/// state and its final events were delivered.
///
/// ```no_run
/// use capture_sidecar::{config::CaptureConfig, monitor::spawn_monitor, supervisor::CaptureSession};
/// use std::{sync::{Arc, Mutex}, time::Duration};
///
/// let session = Arc::new(Mutex::new(CaptureSession::new(CaptureConfig::new())));
/// session.lock().unwrap().start()?;
/// for status in spawn_monitor(session.clone(), Duration::from_millis(250)).filter_progress() {
///   println!("{} frames, {:.1}s", status.frame, status.duration_secs);
/// }
/// # Ok::<(), capture_sidecar::error::Error>(())
/// ```
pub struct MonitorIterator {
  rx: Receiver<CaptureEvent>,
  handle: Option<JoinHandle<()>>,
}

pub fn spawn_monitor(session: Arc<Mutex<CaptureSession>>, interval: Duration) -> MonitorIterator {
  let (tx, rx) = sync_channel::<CaptureEvent>(0);
  let handle = thread::spawn(move || monitor_loop(session, interval, tx));
  MonitorIterator {
    rx,
    handle: Some(handle),
  }
}

fn monitor_loop(
  session: Arc<Mutex<CaptureSession>>,
  interval: Duration,
  tx: SyncSender<CaptureEvent>,
) {
  loop {
    let (events, running) = match session.lock() {
      Ok(mut session) => (session.update(), session.is_running()),
      Err(_) => {
        tx.send(CaptureEvent::Error("capture session lock poisoned".to_string()))
          .ok();
        return;
      }
    };

    for event in events {
      if tx.send(event).is_err() {
        return; // iterator dropped
      }
    }

    if !running {
      return;
    }
    thread::sleep(interval);
  }
}

impl MonitorIterator {
  /// Only the progress snapshots.
  pub fn filter_progress(self) -> impl Iterator<Item = StatusSnapshot> {
    self.filter_map(|event| match event {
      CaptureEvent::Progress(status) => Some(status),
      _ => None,
    })
  }

  /// Only the error messages.
  pub fn filter_errors(self) -> impl Iterator<Item = String> {
    self.filter_map(|event| match event {
      CaptureEvent::Error(message) => Some(message),
      _ => None,
    })
  }

  /// Drain remaining events and wait for the worker to finish.
  pub fn join(mut self) {
    for _ in self.by_ref() {}
    if let Some(handle) = self.handle.take() {
      if handle.join().is_err() {
        log::error!("monitor thread panicked");
      }
    }
  }
}

impl Iterator for MonitorIterator {
  type Item = CaptureEvent;

  fn next(&mut self) -> Option<Self::Item> {
    self.rx.recv().ok()
  }
}
