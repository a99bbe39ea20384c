//! Mixboard: live soundboard daemon for Linux
//!
//! This library provides the core functionality for:
//! - Capturing the microphone and routing it to an output device in
//!   real time (cpal; supports PipeWire, PulseAudio, ALSA)
//! - Mixing in hotkey-triggered WAV sound effects (single slot with
//!   pre-emption, floor-average PCM mix)
//! - Detecting key combinations via evdev (kernel-level, works on all
//!   compositors)
//! - Mirroring the output to an optional echo-monitor device
//!
//! # Architecture
//!
//! ```text
//!                     ┌─────────────────────────────────┐
//!                     │             Daemon              │
//!                     └─────────────────────────────────┘
//!                                     │
//!              ┌──────────────────────┼──────────────────────┐
//!              │                      │                      │
//!              ▼                      ▼                      ▼
//!      ┌──────────────┐      ┌──────────────┐       ┌──────────────┐
//!      │ Key Listener │      │ AudioEngine  │◀──────│ EngineHandle │
//!      │   (evdev)    │      │  tick loop   │ cmds  │  (UI / CLI)  │
//!      └──────────────┘      └──────────────┘       └──────────────┘
//!              │  key edges          │
//!              └─────────────▶ HotkeyMatcher ──▶ PlaybackSlot
//!                                     │               │
//!                                     ▼               ▼
//!              mic ──▶ InputStream ──▶ mix(mic, clip · gain)
//!                                     │
//!                          ┌──────────┴──────────┐
//!                          ▼                     ▼
//!                   OutputStream          OutputStream
//!                     (primary)          (echo, gated)
//! ```
//!
//! Every tick is strictly sequential: drain commands and key edges,
//! read one CHUNK of mic input, pull playback frames, mix, write.

pub mod audio;
pub mod config;
pub mod daemon;
pub mod engine;
pub mod error;
pub mod hotkey;
pub mod profile;

pub use config::Config;
pub use daemon::Daemon;
pub use engine::{AudioEngine, EngineHandle, StreamRole};
pub use error::{MixboardError, Result};
pub use profile::{Profile, SoundSpec};
