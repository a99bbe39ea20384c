//! Configuration loading and types for mixboard
//!
//! Configuration is loaded in layers:
//! 1. Built-in defaults
//! 2. Config file (~/.config/mixboard/config.toml, or the path given
//!    via `--config`)
//!
//! The config file holds the fixed stream parameters shared by every
//! stream the engine opens. The mutable soundboard state (sound list,
//! device choices, echo flag) lives in the profile, see `profile.rs`.

use crate::error::MixboardError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default configuration file content
pub const DEFAULT_CONFIG: &str = r#"# Mixboard Configuration
#
# Location: ~/.config/mixboard/config.toml
# The soundboard itself (sounds, key bindings, device choices) is kept
# separately in profile.toml and edited via `mixboard sounds`.

[audio]
# Sample rate in Hz, shared by the input, output, and echo streams.
sample_rate = 44100

# Interleaved channel count for all streams.
channels = 2

# Frames read/written per stream operation.
chunk_frames = 512

# Wall-clock interval between audio loop ticks, in milliseconds.
# The loop does not drift-correct; the blocking device reads pace it.
tick_ms = 1
"#;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub audio: AudioConfig,
}

/// Fixed audio stream parameters, shared process-wide
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct AudioConfig {
    /// Sample rate in Hz for all three streams
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Interleaved channel count for all three streams
    #[serde(default = "default_channels")]
    pub channels: u16,

    /// Frames per read/write operation (CHUNK)
    #[serde(default = "default_chunk_frames")]
    pub chunk_frames: usize,

    /// Tick period of the audio loop in milliseconds (DELAY)
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
}

fn default_sample_rate() -> u32 {
    44_100
}

fn default_channels() -> u16 {
    2
}

fn default_chunk_frames() -> usize {
    512
}

fn default_tick_ms() -> u64 {
    1
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            channels: default_channels(),
            chunk_frames: default_chunk_frames(),
            tick_ms: default_tick_ms(),
        }
    }
}

impl AudioConfig {
    /// Interleaved samples per CHUNK (frames times channels)
    pub fn samples_per_chunk(&self) -> usize {
        self.chunk_frames * self.channels as usize
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            audio: AudioConfig::default(),
        }
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("mixboard"))
    }

    /// Get the default config file path
    pub fn default_path() -> Option<PathBuf> {
        Self::config_dir().map(|d| d.join("config.toml"))
    }

    /// Get the default profile file path
    pub fn default_profile_path() -> Option<PathBuf> {
        Self::config_dir().map(|d| d.join("profile.toml"))
    }
}

/// Load configuration from file, with defaults for missing values
pub fn load_config(path: Option<&Path>) -> Result<Config, MixboardError> {
    let mut config = Config::default();

    let config_path = path.map(PathBuf::from).or_else(Config::default_path);

    if let Some(ref path) = config_path {
        if path.exists() {
            tracing::debug!("Loading config from {:?}", path);
            let contents = std::fs::read_to_string(path)
                .map_err(|e| MixboardError::Config(format!("Failed to read config: {}", e)))?;

            config = toml::from_str(&contents)
                .map_err(|e| MixboardError::Config(format!("Invalid config: {}", e)))?;
        } else {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
        }
    }

    Ok(config)
}

/// Write the commented default config template if no config file exists yet
pub fn write_default_config_if_missing() -> Result<(), MixboardError> {
    let Some(path) = Config::default_path() else {
        return Ok(());
    };
    if path.exists() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| MixboardError::Config(format!("Failed to create config dir: {}", e)))?;
    }
    std::fs::write(&path, DEFAULT_CONFIG)
        .map_err(|e| MixboardError::Config(format!("Failed to write config: {}", e)))?;
    tracing::info!("Wrote default config to {:?}", path);
    Ok(())
}
