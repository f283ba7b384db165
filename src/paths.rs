use crate::error::Result;
use std::{
  env::{self, current_exe},
  path::{Path, PathBuf},
  process,
  sync::atomic::{AtomicUsize, Ordering},
};

/// Environment variable that overrides the FFmpeg executable.
pub const FFMPEG_ENV: &str = "CAPTURE_SIDECAR_FFMPEG";

/// Returns the default path of the FFmpeg executable, to be used as the
/// argument to `Command::new`.
///
/// `CAPTURE_SIDECAR_FFMPEG` wins when set. Otherwise an FFmpeg binary adjacent
/// to the Rust executable is preferred, falling back to `ffmpeg` on the
/// system path. A missing binary is only reported when the command is spawned.
pub fn ffmpeg_path() -> PathBuf {
  if let Some(path) = env::var_os(FFMPEG_ENV).filter(|p| !p.is_empty()) {
    return PathBuf::from(path);
  }
  let default = Path::new("ffmpeg").to_path_buf();
  match sidecar_path() {
    Ok(sidecar_path) if sidecar_path.exists() => sidecar_path,
    _ => default,
  }
}

/// The (expected) path to an FFmpeg binary adjacent to the Rust binary.
///
/// The extension between platforms, with Windows using `.exe`, while Mac and
/// Linux have no extension.
pub fn sidecar_path() -> Result<PathBuf> {
  let mut path = current_exe()?
    .parent()
    .ok_or("Can't get parent of current_exe")?
    .join("ffmpeg");
  if cfg!(windows) {
    path.set_extension("exe");
  }
  Ok(path)
}

static LOG_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// A fresh file name in the temporary directory for a session's stderr.
///
/// Unique per process and per call, so concurrent sessions never share a log.
pub fn default_diagnostics_path() -> PathBuf {
  let n = LOG_COUNTER.fetch_add(1, Ordering::Relaxed);
  env::temp_dir().join(format!("capture-sidecar-{}-{}.log", process::id(), n))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_diagnostics_paths_are_unique() {
    let a = default_diagnostics_path();
    let b = default_diagnostics_path();
    assert_ne!(a, b);
    assert!(a.starts_with(env::temp_dir()));
    assert_eq!(a.extension().and_then(|e| e.to_str()), Some("log"));
  }

  #[test]
  fn test_sidecar_path_is_next_to_exe() {
    let path = sidecar_path().unwrap();
    assert_eq!(path.parent(), current_exe().unwrap().parent());
    assert_eq!(path.file_stem().and_then(|s| s.to_str()), Some("ffmpeg"));
  }
}
