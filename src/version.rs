use crate::{
  error::{Error, Result},
  paths::ffmpeg_path,
};
use std::ffi::OsStr;
use std::process::{Command, Stdio};

/// Parse the version number out of the first line of `ffmpeg -version`.
///
/// ```rust
/// use capture_sidecar::version::try_parse_version;
/// let line = "ffmpeg version 6.1.1-3ubuntu5 Copyright (c) 2000-2023 the FFmpeg developers";
/// assert_eq!(try_parse_version(line), Some("6.1.1-3ubuntu5".to_string()));
/// assert_eq!(try_parse_version("[info] frame=1"), None);
/// ```
pub fn try_parse_version(string: &str) -> Option<String> {
  string
    .trim()
    .strip_prefix("[info]")
    .unwrap_or(string)
    .trim()
    .strip_prefix("ffmpeg version ")?
    .split_whitespace()
    .next()
    .map(|s| s.to_string())
}

/// Alias for `ffmpeg -version`, parsing the version number and returning it.
pub fn ffmpeg_version() -> Result<String> {
  ffmpeg_version_with_path(ffmpeg_path())
}

/// Lower level variant of `ffmpeg_version` that exposes a customized the path
/// to the ffmpeg binary.
pub fn ffmpeg_version_with_path<S: AsRef<OsStr>>(path: S) -> Result<String> {
  let output = Command::new(&path)
    .arg("-version")
    .stdin(Stdio::null())
    .stderr(Stdio::null())
    .output()?; // version goes to stdout, not stderr
  if !output.status.success() {
    return Err(Error::msg("ffmpeg -version exited with non-zero status"));
  }
  String::from_utf8_lossy(&output.stdout)
    .lines()
    .find_map(try_parse_version)
    .ok_or_else(|| Error::msg("Failed to parse ffmpeg version"))
}

/// Verify whether ffmpeg is installed on the system. This will return true if
/// there is an ffmpeg binary in the PATH, or in the same directory as the Rust
/// executable.
pub fn ffmpeg_is_installed() -> bool {
  Command::new(ffmpeg_path())
    .arg("-version")
    .stdin(Stdio::null())
    .stderr(Stdio::null())
    .stdout(Stdio::null())
    .status()
    .map(|s| s.success())
    .unwrap_or_else(|_| false)
}
