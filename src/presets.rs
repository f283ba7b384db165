//! Named encoding bundles that merge into a [`CaptureConfig`].

use std::{fs, path::Path};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::config::{AudioEncoding, CaptureConfig, VideoEncoding};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preset {
  pub name: String,
  pub description: String,
  pub video: Option<VideoEncoding>,
  pub audio: Option<AudioEncoding>,
}

#[derive(Debug, Default, Deserialize)]
struct PresetFile {
  #[serde(default)]
  preset: Vec<Preset>,
}

/// The presets shipped with the crate.
pub fn builtin_presets() -> Vec<Preset> {
  vec![
    Preset {
      name: "quality".to_string(),
      description: "Visually lossless H.264 for local recordings".to_string(),
      video: Some(VideoEncoding::new("libx264").with_preset("slow").with_crf(18.0)),
      audio: Some(AudioEncoding::new("aac").with_bitrate("256k")),
    },
    Preset {
      name: "balanced".to_string(),
      description: "Default H.264 quality at moderate size".to_string(),
      video: Some(VideoEncoding::new("libx264").with_preset("medium").with_crf(23.0)),
      audio: Some(AudioEncoding::new("aac").with_bitrate("192k")),
    },
    Preset {
      name: "small".to_string(),
      description: "Small files for sharing".to_string(),
      video: Some(
        VideoEncoding::new("libx264")
          .with_preset("veryfast")
          .with_crf(28.0)
          .with_maxrate("2M")
          .with_bufsize("4M"),
      ),
      audio: Some(AudioEncoding::new("aac").with_bitrate("96k")),
    },
    Preset {
      name: "streaming".to_string(),
      description: "Constant bitrate with a two second keyframe interval".to_string(),
      video: Some(
        VideoEncoding::new("libx264")
          .with_preset("veryfast")
          .with_tune("zerolatency")
          .with_bitrate("6000k")
          .with_maxrate("6000k")
          .with_bufsize("12000k")
          .with_gop(60),
      ),
      audio: Some(
        AudioEncoding::new("aac")
          .with_bitrate("160k")
          .with_sample_rate(48000),
      ),
    },
    Preset {
      name: "lossless".to_string(),
      description: "Lossless H.264 and FLAC; very large".to_string(),
      video: Some(
        VideoEncoding::new("libx264")
          .with_preset("ultrafast")
          .with_crf(0.0)
          .with_pix_fmt("yuv444p"),
      ),
      audio: Some(AudioEncoding::new("flac")),
    },
  ]
}

/// Look up a built-in preset by name, ignoring case.
pub fn find_preset(name: &str) -> Option<Preset> {
  builtin_presets()
    .into_iter()
    .find(|preset| preset.name.eq_ignore_ascii_case(name))
}

/// Parse a TOML document holding a `[[preset]]` array.
pub fn parse_presets(toml_str: &str) -> anyhow::Result<Vec<Preset>> {
  let file: PresetFile = toml::from_str(toml_str).context("parsing presets")?;
  if let Some(unnamed) = file.preset.iter().position(|p| p.name.is_empty()) {
    anyhow::bail!("preset #{} has no name", unnamed + 1);
  }
  Ok(file.preset)
}

pub fn load_presets(path: impl AsRef<Path>) -> anyhow::Result<Vec<Preset>> {
  let path = path.as_ref();
  let contents =
    fs::read_to_string(path).with_context(|| format!("reading presets at {path:?}"))?;
  parse_presets(&contents).with_context(|| format!("in {path:?}"))
}

impl CaptureConfig {
  /// Merge a preset's encodings into this configuration. Fields the preset
  /// sets win; everything else keeps its current value.
  pub fn apply_preset(&mut self, preset: &Preset) -> &mut Self {
    if let Some(video) = &preset.video {
      self.video.get_or_insert_with(VideoEncoding::default).merge(video);
    }
    if let Some(audio) = &preset.audio {
      self.audio.get_or_insert_with(AudioEncoding::default).merge(audio);
    }
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::command::assemble_args;

  #[test]
  fn test_builtin_names_are_unique() {
    let presets = builtin_presets();
    for (i, preset) in presets.iter().enumerate() {
      assert!(!preset.name.is_empty());
      assert!(presets[i + 1..].iter().all(|p| p.name != preset.name));
    }
  }

  #[test]
  fn test_find_preset_ignores_case() {
    assert_eq!(find_preset("Balanced").map(|p| p.name), Some("balanced".to_string()));
    assert!(find_preset("nope").is_none());
  }

  #[test]
  fn test_apply_preset_merges() {
    let mut config = CaptureConfig::new();
    config.video_encoding(VideoEncoding::new("h264_nvenc").with_pix_fmt("nv12"));
    let preset = Preset {
      name: "x".to_string(),
      video: Some(VideoEncoding::default().with_crf(20.0)),
      ..Default::default()
    };
    config.apply_preset(&preset);

    let video = config.video.as_ref().unwrap();
    assert_eq!(video.codec(), "h264_nvenc");
    assert_eq!(video.pix_fmt(), "nv12");
    assert_eq!(video.crf, Some(20.0));
    assert!(config.audio.is_none());
  }

  #[test]
  fn test_apply_builtin_preset_reaches_command() {
    let mut config = CaptureConfig::new();
    config.apply_preset(&find_preset("streaming").unwrap());
    let args = assemble_args(&config);
    let g = args.iter().position(|a| a == "-g").unwrap();
    assert_eq!(args[g + 1], "60");
    assert!(args.contains(&"zerolatency".to_string()));
  }

  #[test]
  fn test_parse_presets() {
    let presets = parse_presets(
      r#"
      [[preset]]
      name = "archive"
      description = "HEVC archive"

      [preset.video]
      codec = "libx265"
      crf = 26

      [[preset]]
      name = "voice"

      [preset.audio]
      codec = "libopus"
      bitrate = "64k"
      "#,
    )
    .unwrap();

    assert_eq!(presets.len(), 2);
    assert_eq!(presets[0].video.as_ref().and_then(|v| v.crf), Some(26.0));
    assert!(presets[0].audio.is_none());
    assert_eq!(presets[1].audio.as_ref().map(|a| a.codec()), Some("libopus"));
  }

  #[test]
  fn test_unnamed_preset_is_rejected() {
    let err = parse_presets("[[preset]]\ndescription = \"missing\"\n").unwrap_err();
    assert!(err.to_string().contains("no name"));
  }

  #[test]
  fn test_load_presets_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("presets.toml");
    fs::write(&path, "[[preset]]\nname = \"fast\"\n[preset.video]\npreset = \"ultrafast\"\n")
      .unwrap();
    let presets = load_presets(&path).unwrap();
    assert_eq!(presets[0].name, "fast");
    assert!(load_presets(dir.path().join("missing.toml")).is_err());
  }
}
