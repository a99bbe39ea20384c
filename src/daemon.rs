//! Daemon module - wires the key listener to the audio engine
//!
//! Loads the profile, opens the three streams (fatal on failure, per
//! the startup contract), writes the resolved device names back so the
//! next session picks the same hardware, then runs the engine loop on
//! a blocking thread while this task waits for shutdown signals.

use crate::config::Config;
use crate::engine::{self, AudioEngine};
use crate::error::{MixboardError, Result};
use crate::hotkey::{self, KeyEventSource};
use crate::profile;
use std::path::PathBuf;
use tokio::signal::unix::{signal, SignalKind};

/// Main daemon that owns the engine lifecycle
pub struct Daemon {
    config: Config,
    profile_path: PathBuf,
}

impl Daemon {
    pub fn new(config: Config, profile_path: PathBuf) -> Self {
        Self {
            config,
            profile_path,
        }
    }

    /// Run until Ctrl-C or SIGTERM
    pub async fn run(&mut self) -> Result<()> {
        tracing::info!("Starting mixboard daemon");

        let profile = profile::load_profile(&self.profile_path);
        tracing::info!(
            "Profile: {} sound(s), echo {}",
            profile.sounds.len(),
            if profile.echo { "on" } else { "off" }
        );

        let engine = AudioEngine::new(self.config.audio, &profile)?;

        // Persist the resolved device names; a profile naming unplugged
        // hardware otherwise re-resolves differently every session
        let (input_name, output_name, echo_name) = engine.device_names();
        let mut resolved = profile.clone();
        resolved.input_device = input_name;
        resolved.output_device = output_name;
        resolved.echo_device = echo_name;
        if let Err(e) = profile::save_profile(&resolved, &self.profile_path) {
            tracing::warn!("Could not write back resolved profile: {}", e);
        }

        let mut listener = hotkey::create_listener()?;
        let key_rx = listener.start().await?;

        let (handle, cmd_rx) = engine::command_channel();
        let mut engine_task = tokio::task::spawn_blocking(move || engine.run(key_rx, cmd_rx));

        let mut sigterm = signal(SignalKind::terminate()).map_err(|e| {
            MixboardError::Config(format!("Failed to set up SIGTERM handler: {}", e))
        })?;

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received Ctrl-C, shutting down");
            }
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, shutting down");
            }
            result = &mut engine_task => {
                // Engine stopped on its own (stream failure)
                listener.stop().await?;
                return result
                    .map_err(|e| MixboardError::Config(format!("Engine task failed: {}", e)))?;
            }
        }

        // Idempotent; a second signal while stopping is harmless
        handle.shutdown().await.ok();
        listener.stop().await?;

        engine_task
            .await
            .map_err(|e| MixboardError::Config(format!("Engine task failed: {}", e)))?
    }
}
