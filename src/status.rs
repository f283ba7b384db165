use std::time::Duration;

use crate::progress::ProgressUpdate;

/// The last known state of a capture session.
///
/// Consumers always receive a copy; the session mutates its own instance only
/// while parsing the diagnostic stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusSnapshot {
  /// True while a process is owned and neither stop nor exit was observed.
  pub running: bool,

  /// Cumulative number of encoded frames.
  pub frame: u64,

  /// Instantaneous encoding rate in frames per second.
  pub fps: f64,

  /// Encoded output size in bytes.
  pub size_bytes: u64,

  /// Output bitrate in kilo**bits** per second.
  pub bitrate_kbps: f64,

  /// Elapsed media time in seconds.
  pub duration_secs: f64,

  /// Processing speed as a ratio of realtime (1.0 is realtime).
  pub speed: f64,

  /// Most recent error reported by the process or the supervisor.
  pub last_error: Option<String>,
}

impl StatusSnapshot {
  /// Copy every field present in `update`. Absent fields keep their values.
  ///
  /// Returns whether any field was assigned.
  pub fn apply(&mut self, update: &ProgressUpdate) -> bool {
    let mut updated = false;
    if let Some(frame) = update.frame {
      self.frame = frame;
      updated = true;
    }
    if let Some(fps) = update.fps {
      self.fps = fps;
      updated = true;
    }
    if let Some(size_bytes) = update.size_bytes {
      self.size_bytes = size_bytes;
      updated = true;
    }
    if let Some(bitrate_kbps) = update.bitrate_kbps {
      self.bitrate_kbps = bitrate_kbps;
      updated = true;
    }
    if let Some(duration_secs) = update.duration_secs {
      self.duration_secs = duration_secs;
      updated = true;
    }
    if let Some(speed) = update.speed {
      self.speed = speed;
      updated = true;
    }
    updated
  }

  /// Elapsed media time.
  pub fn duration(&self) -> Duration {
    Duration::from_secs_f64(self.duration_secs.max(0.0))
  }

  /// Reset counters for a freshly launched process.
  pub(crate) fn begin_session(&mut self) {
    *self = StatusSnapshot {
      running: true,
      ..Default::default()
    };
  }
}
