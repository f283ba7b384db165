//! Quoting for the printable form of a command line.
//!
//! Processes are always spawned from an argument vector, never through a
//! shell. The quoted string exists so a command can be logged, previewed or
//! copy-pasted into a terminal without any argument being split or expanded.

use std::borrow::Cow;

/// Characters that never need quoting in a POSIX shell.
fn is_shell_safe(c: char) -> bool {
  c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '+' | '=' | '/' | '.' | ',' | ':' | '@' | '%')
}

/// Quote one argument for a POSIX shell.
///
/// ```rust
/// use capture_sidecar::quote::quote_posix;
/// assert_eq!(quote_posix("out.mp4"), "out.mp4");
/// assert_eq!(quote_posix("my file.mp4"), "'my file.mp4'");
/// assert_eq!(quote_posix("it's"), r#"'it'\''s'"#);
/// assert_eq!(quote_posix("$(rm -rf ~)"), "'$(rm -rf ~)'");
/// assert_eq!(quote_posix(""), "''");
/// ```
pub fn quote_posix(arg: &str) -> Cow<'_, str> {
  // zsh expands a leading `=word` to the path of `word`
  if !arg.is_empty() && !arg.starts_with('=') && arg.chars().all(is_shell_safe) {
    return Cow::Borrowed(arg);
  }
  let mut quoted = String::with_capacity(arg.len() + 2);
  quoted.push('\'');
  for c in arg.chars() {
    if c == '\'' {
      quoted.push_str(r#"'\''"#);
    } else {
      quoted.push(c);
    }
  }
  quoted.push('\'');
  Cow::Owned(quoted)
}

/// Quote one argument following the MSVC `argv` rules used by Windows
/// programs.
///
/// ```rust
/// use capture_sidecar::quote::quote_windows;
/// assert_eq!(quote_windows("out.mp4"), "out.mp4");
/// assert_eq!(quote_windows("C:\\My Videos\\out.mp4"), "\"C:\\My Videos\\out.mp4\"");
/// assert_eq!(quote_windows("say \"hi\""), "\"say \\\"hi\\\"\"");
/// ```
pub fn quote_windows(arg: &str) -> Cow<'_, str> {
  if !arg.is_empty() && !arg.contains([' ', '\t', '\n', '"', '&', '|', '<', '>', '^', '%']) {
    return Cow::Borrowed(arg);
  }
  let mut quoted = String::with_capacity(arg.len() + 2);
  quoted.push('"');
  let mut backslashes = 0;
  for c in arg.chars() {
    match c {
      '\\' => backslashes += 1,
      '"' => {
        quoted.extend(std::iter::repeat('\\').take(backslashes * 2 + 1));
        quoted.push('"');
        backslashes = 0;
      }
      _ => {
        quoted.extend(std::iter::repeat('\\').take(backslashes));
        quoted.push(c);
        backslashes = 0;
      }
    }
  }
  quoted.extend(std::iter::repeat('\\').take(backslashes * 2));
  quoted.push('"');
  Cow::Owned(quoted)
}

/// Quote an argument for the current platform's shell.
pub fn quote_arg(arg: &str) -> Cow<'_, str> {
  if cfg!(windows) {
    quote_windows(arg)
  } else {
    quote_posix(arg)
  }
}

/// Join a program and its arguments into one copy-pasteable line.
pub fn join_command<I, S>(program: &str, args: I) -> String
where
  I: IntoIterator<Item = S>,
  S: AsRef<str>,
{
  let mut line = quote_arg(program).into_owned();
  for arg in args {
    line.push(' ');
    line.push_str(&quote_arg(arg.as_ref()));
  }
  line
}

/// Keep a positional output path from being read as an option.
///
/// FFmpeg treats any positional argument starting with `-` as a flag, so such
/// paths are routed through the explicit `file:` protocol. A lone `-` still
/// means stdout.
///
/// ```rust
/// use capture_sidecar::quote::protect_output_path;
/// assert_eq!(protect_output_path("out.mp4"), "out.mp4");
/// assert_eq!(protect_output_path("-y.mp4"), "file:-y.mp4");
/// assert_eq!(protect_output_path("-"), "-");
/// ```
pub fn protect_output_path(path: &str) -> Cow<'_, str> {
  if path.starts_with('-') && path != "-" {
    Cow::Owned(format!("file:{path}"))
  } else {
    Cow::Borrowed(path)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_shell_metacharacters_are_quoted() {
    for arg in ["a;b", "a|b", "a&b", "`id`", "a b", "*.mp4", "a\nb", "~"] {
      let quoted = quote_posix(arg);
      assert!(quoted.starts_with('\'') && quoted.ends_with('\''), "{arg}");
    }
  }

  #[test]
  fn test_leading_equals_is_quoted() {
    assert_eq!(quote_posix("=ls"), "'=ls'");
    assert_eq!(quote_posix("title=Desktop"), "title=Desktop");
  }

  #[test]
  fn test_join_command() {
    let line = join_command("ffmpeg", ["-i", ":0.0", "my out.mp4"]);
    if cfg!(windows) {
      assert_eq!(line, "ffmpeg -i :0.0 \"my out.mp4\"");
    } else {
      assert_eq!(line, "ffmpeg -i :0.0 'my out.mp4'");
    }
  }

  #[test]
  fn test_windows_trailing_backslash() {
    assert_eq!(quote_windows("C:\\dir with space\\"), "\"C:\\dir with space\\\\\"");
  }
}
