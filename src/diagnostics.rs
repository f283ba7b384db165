//! The file that receives the child's stderr, read incrementally.

use std::{
  fs::{self, File},
  io::{self, Read, Seek, SeekFrom},
  path::{Path, PathBuf},
};

/// A diagnostic log file with a byte-offset watermark.
///
/// Every read starts at the watermark and advances it past what was
/// returned, so no byte is ever handed out twice. [`read_available`] stops at
/// the last line terminator (`\n` or `\r`); an unterminated trailing fragment
/// stays unread until it is completed or flushed by [`read_remaining`].
///
/// [`read_available`]: DiagnosticLog::read_available
/// [`read_remaining`]: DiagnosticLog::read_remaining
#[derive(Debug)]
pub struct DiagnosticLog {
  path: PathBuf,
  watermark: u64,
}

impl DiagnosticLog {
  /// Create (or truncate) the log file and return a handle for the writer side.
  pub fn create<P: Into<PathBuf>>(path: P) -> io::Result<(Self, File)> {
    let path = path.into();
    let file = File::create(&path)?;
    Ok((Self { path, watermark: 0 }, file))
  }

  /// Follow an existing file from its beginning.
  pub fn open<P: Into<PathBuf>>(path: P) -> Self {
    Self {
      path: path.into(),
      watermark: 0,
    }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Number of bytes consumed so far.
  pub fn watermark(&self) -> u64 {
    self.watermark
  }

  /// Complete lines appended since the last read, or `None` when there are none.
  pub fn read_available(&mut self) -> io::Result<Option<String>> {
    self.read_from_watermark(false)
  }

  /// Everything appended since the last read, including an unterminated tail.
  pub fn read_remaining(&mut self) -> io::Result<Option<String>> {
    self.read_from_watermark(true)
  }

  /// The whole file, regardless of the watermark.
  pub fn contents(&self) -> io::Result<String> {
    Ok(String::from_utf8_lossy(&fs::read(&self.path)?).into_owned())
  }

  fn read_from_watermark(&mut self, include_partial: bool) -> io::Result<Option<String>> {
    let mut file = File::open(&self.path)?;
    let len = file.metadata()?.len();
    if len < self.watermark {
      log::warn!(
        "diagnostic log {:?} shrank from {} to {} bytes; reading from the start",
        self.path,
        self.watermark,
        len
      );
      self.watermark = 0;
    }
    if len == self.watermark {
      return Ok(None);
    }

    file.seek(SeekFrom::Start(self.watermark))?;
    let mut buf = Vec::with_capacity((len - self.watermark) as usize);
    file.take(len - self.watermark).read_to_end(&mut buf)?;

    let end = if include_partial {
      buf.len()
    } else {
      buf
        .iter()
        .rposition(|&b| b == b'\n' || b == b'\r')
        .map_or(0, |i| i + 1)
    };
    if end == 0 {
      return Ok(None);
    }

    self.watermark += end as u64;
    Ok(Some(String::from_utf8_lossy(&buf[..end]).into_owned()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  #[test]
  fn test_reads_only_new_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let (mut log, mut writer) = DiagnosticLog::create(dir.path().join("stderr.log")).unwrap();

    assert_eq!(log.read_available().unwrap(), None);

    writer.write_all(b"first\n").unwrap();
    assert_eq!(log.read_available().unwrap().as_deref(), Some("first\n"));
    assert_eq!(log.watermark(), 6);
    assert_eq!(log.read_available().unwrap(), None);

    writer.write_all(b"second\r").unwrap();
    assert_eq!(log.read_available().unwrap().as_deref(), Some("second\r"));
  }

  #[test]
  fn test_partial_line_is_held_back() {
    let dir = tempfile::tempdir().unwrap();
    let (mut log, mut writer) = DiagnosticLog::create(dir.path().join("stderr.log")).unwrap();

    writer.write_all(b"done\nframe=  12 fps=").unwrap();
    assert_eq!(log.read_available().unwrap().as_deref(), Some("done\n"));

    writer.write_all(b"30 time=00:00:01.00\r").unwrap();
    assert_eq!(
      log.read_available().unwrap().as_deref(),
      Some("frame=  12 fps=30 time=00:00:01.00\r")
    );
  }

  #[test]
  fn test_read_remaining_flushes_tail() {
    let dir = tempfile::tempdir().unwrap();
    let (mut log, mut writer) = DiagnosticLog::create(dir.path().join("stderr.log")).unwrap();

    writer.write_all(b"no newline").unwrap();
    assert_eq!(log.read_available().unwrap(), None);
    assert_eq!(log.read_remaining().unwrap().as_deref(), Some("no newline"));
    assert_eq!(log.read_remaining().unwrap(), None);
    assert_eq!(log.contents().unwrap(), "no newline");
  }

  #[test]
  fn test_missing_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut log = DiagnosticLog::open(dir.path().join("missing.log"));
    let err = log.read_available().unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::NotFound);
  }
}
