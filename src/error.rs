//! Error types for mixboard
//!
//! Uses thiserror for ergonomic error definitions with clear messages
//! that guide users toward fixing common issues.

use thiserror::Error;

/// Top-level error type for the mixboard application
#[derive(Error, Debug)]
pub enum MixboardError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Hotkey error: {0}")]
    Hotkey(#[from] HotkeyError),

    #[error("Audio device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Playback error: {0}")]
    Playback(#[from] PlaybackError),

    #[error("Mix error: {0}")]
    Mix(#[from] MixError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors related to global key detection
#[derive(Error, Debug)]
pub enum HotkeyError {
    #[error("Cannot open input device '{0}'. Is the user in the 'input' group?\n  Run: sudo usermod -aG input $USER\n  Then log out and back in.")]
    DeviceAccess(String),

    #[error("Unknown key name: '{0}'. Use evtest or wev to find valid key names.")]
    UnknownKey(String),

    #[error("No keyboard device found in /dev/input/")]
    NoKeyboard,

    #[error("Key listener channel closed")]
    ChannelClosed,

    #[error("evdev error: {0}")]
    Evdev(String),
}

/// Errors related to audio devices and streams
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Could not enumerate audio devices: {0}")]
    Enumeration(String),

    #[error("No {0} audio devices available. Is a sound server (PipeWire/PulseAudio) running?")]
    NoDevices(&'static str),

    #[error("Failed to open {direction} device '{name}': {reason}")]
    OpenFailed {
        direction: &'static str,
        name: String,
        reason: String,
    },

    #[error("Audio stream closed")]
    StreamClosed,
}

/// Errors related to sound-effect clips
#[derive(Error, Debug)]
pub enum PlaybackError {
    #[error("Sound file not found: {0}")]
    FileNotFound(String),

    #[error("Unsupported sound file format: {0}. Clips must be 16-bit PCM WAV.")]
    Format(String),

    #[error("Failed to read sound file: {0}")]
    Read(String),
}

/// Errors from the PCM mixing function
#[derive(Error, Debug, PartialEq, Eq)]
pub enum MixError {
    #[error("Buffer length mismatch: {left} vs {right} samples")]
    LengthMismatch { left: usize, right: usize },
}

/// Errors from the audio engine control surface
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Engine has been shut down")]
    Terminated,

    #[error("Engine did not acknowledge the command")]
    NoReply,
}

/// Result type alias using MixboardError
pub type Result<T> = std::result::Result<T, MixboardError>;

#[cfg(target_os = "linux")]
impl From<evdev::Error> for HotkeyError {
    fn from(e: evdev::Error) -> Self {
        HotkeyError::Evdev(e.to_string())
    }
}
