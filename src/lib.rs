//! Drive an FFmpeg screen/audio capture process from Rust.
//!
//! A [`CaptureConfig`](config::CaptureConfig) describes inputs, filters,
//! encoders and outputs. It is turned into an FFmpeg argument vector by the
//! pure [`command`] assembler and launched by a
//! [`CaptureSession`](supervisor::CaptureSession), which parses progress out of
//! the process' diagnostic output each time it is polled.
//!
//! ## Example
//!
//! ```no_run
//! use capture_sidecar::{
//!   config::{AudioEncoding, CaptureConfig, InputSpec, OutputTarget, VideoEncoding},
//!   error::Result,
//!   event::CaptureEvent,
//!   supervisor::CaptureSession,
//! };
//! use std::{thread, time::Duration};
//!
//! fn main() -> Result<()> {
//!   let mut config = CaptureConfig::new();
//!   config
//!     .input(InputSpec::video("x11grab", ":0.0").with_framerate(60.0)) // <- screen
//!     .input(InputSpec::audio("pulse", "default"))                     // <- microphone
//!     .video_encoding(VideoEncoding::new("libx264").with_crf(23.0))
//!     .audio_encoding(AudioEncoding::new("aac").with_bitrate("192k"))
//!     .output(OutputTarget::new("out.mp4"));
//!
//!   let mut session = CaptureSession::new(config);
//!   println!("{}", session.to_command()); // <- copy-pasteable preview
//!   session.start()?;
//!
//!   for _ in 0..100 {
//!     for event in session.update() {
//!       if let CaptureEvent::Progress(status) = event {
//!         eprintln!("{} frames, {:.1}x", status.frame, status.speed);
//!       }
//!     }
//!     thread::sleep(Duration::from_millis(100));
//!   }
//!
//!   session.stop()
//! }
//! ```


pub mod child;
pub mod command;
pub mod config;
pub mod devices;
pub mod diagnostics;
pub mod error;
pub mod event;
pub mod monitor;
pub mod paths;
pub mod presets;
pub mod progress;
pub mod quote;
pub mod status;
pub mod supervisor;
pub mod version;
