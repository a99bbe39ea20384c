//! Mixboard - live soundboard for Linux
//!
//! Run with `mixboard` or `mixboard daemon` to start the soundboard.
//! Use `mixboard devices` to list audio devices, `mixboard sounds` to
//! manage the sound list, and `mixboard play <file>` to test a clip.

mod audio;
mod config;
mod daemon;
mod engine;
mod error;
mod hotkey;
mod profile;

use audio::device;
use audio::mixer::apply_gain;
use audio::playback::{ClipSource, WavClip};
use audio::stream::OutputStream;
use audio::FrameSink;
use clap::{Parser, Subcommand};
use config::Config;
use error::MixboardError;
use hotkey::KeyEventSource;
use profile::SoundSpec;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mixboard")]
#[command(author, version, about = "Live soundboard: mic passthrough with hotkey-triggered sound effects")]
#[command(long_about = "
Mixboard captures your microphone, mixes in sound effects triggered by
global key combinations, and routes the result to an output device
(typically a virtual cable) plus an optional echo monitor (headphones).

SETUP:
  1. Add yourself to the input group: sudo usermod -aG input $USER
  2. Log out and back in
  3. Add sounds: mixboard sounds add airhorn ~/sfx/airhorn.wav
  4. Bind keys: mixboard sounds bind airhorn
  5. Run: mixboard (to start the daemon)
")]
struct Cli {
    /// Path to config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v = debug, -vv = trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (errors only)
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the soundboard daemon (default if no command specified)
    Daemon,

    /// List input- and output-capable audio devices
    Devices,

    /// Test a sound file through the configured output device
    Play {
        /// Path to a 16-bit PCM WAV file
        file: PathBuf,

        /// Linear gain to apply (1.0 = unity)
        #[arg(long, default_value_t = 1.0)]
        volume: f32,
    },

    /// Manage the sound list
    Sounds {
        #[command(subcommand)]
        action: SoundsAction,
    },

    /// Show current configuration and profile paths
    Config,
}

#[derive(Subcommand)]
enum SoundsAction {
    /// List configured sounds and their bindings
    List,

    /// Add a sound
    Add {
        /// Sound name
        name: String,
        /// Path to a 16-bit PCM WAV file
        file: PathBuf,
        /// Linear gain (1.0 = unity)
        #[arg(long)]
        volume: Option<f32>,
    },

    /// Remove a sound by name
    Remove {
        /// Sound name
        name: String,
    },

    /// Capture a key combination for a sound: hold the keys, then
    /// release to confirm
    Bind {
        /// Sound name
        name: String,
    },
}

fn profile_path() -> anyhow::Result<PathBuf> {
    Config::default_profile_path()
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("mixboard={}", log_level))),
        )
        .with_target(false)
        .init();

    config::write_default_config_if_missing()?;
    let config = config::load_config(cli.config.as_deref())?;

    match cli.command.unwrap_or(Commands::Daemon) {
        Commands::Daemon => {
            let mut daemon = daemon::Daemon::new(config, profile_path()?);
            daemon.run().await?;
        }
        Commands::Devices => {
            list_devices()?;
        }
        Commands::Play { file, volume } => {
            play_file(&config, &file, volume)?;
        }
        Commands::Sounds { action } => {
            run_sounds(action).await?;
        }
        Commands::Config => {
            show_config(&config)?;
        }
    }

    Ok(())
}

fn list_devices() -> anyhow::Result<()> {
    let devices = device::enumerate_devices()?;

    println!("Input devices (microphones):");
    for d in device::input_devices(&devices) {
        println!("  [{}] {} ({} ch)", d.index, d.name, d.max_input_channels);
    }

    println!("\nOutput devices (cable / headphones):");
    for d in device::output_devices(&devices) {
        println!("  [{}] {} ({} ch)", d.index, d.name, d.max_output_channels);
    }

    Ok(())
}

/// The explicit test action: open errors are reported inline and no
/// daemon state is involved.
fn play_file(config: &Config, file: &PathBuf, volume: f32) -> anyhow::Result<()> {
    let mut clip = match WavClip::open(file, &config.audio) {
        Ok(clip) => clip,
        Err(e) => {
            eprintln!("Cannot play {}: {}", file.display(), e);
            std::process::exit(1);
        }
    };

    let profile = profile::load_profile(&profile_path()?);
    let devices = device::enumerate_devices()?;
    let outputs = device::output_devices(&devices);
    let desc = device::resolve_by_name(&profile.output_device, &outputs, "output")
        .map_err(MixboardError::from)?;

    println!("Playing {} on '{}'", file.display(), desc.name);
    let mut stream = OutputStream::open(desc, &config.audio, "output")?;

    loop {
        let mut buf = clip.read_frames(config.audio.chunk_frames)?;
        if buf.is_empty() {
            break;
        }
        apply_gain(&mut buf, volume);
        stream.write(&buf).map_err(MixboardError::from)?;
    }

    // The write queue may still hold the end of the clip; drain it
    // before the stream is dropped
    stream.drain(&config.audio).map_err(MixboardError::from)?;
    Ok(())
}

async fn run_sounds(action: SoundsAction) -> anyhow::Result<()> {
    let path = profile_path()?;
    let mut profile = profile::load_profile(&path);

    match action {
        SoundsAction::List => {
            if profile.sounds.is_empty() {
                println!("No sounds configured. Add one with: mixboard sounds add <name> <file>");
                return Ok(());
            }
            for sound in &profile.sounds {
                let binding = if sound.keys.is_empty() {
                    "(unbound)".to_string()
                } else {
                    sound.keys.join("+")
                };
                println!(
                    "{:<20} {:<12} vol {:.2}  {}",
                    sound.name, binding, sound.volume, sound.path
                );
            }
        }
        SoundsAction::Add { name, file, volume } => {
            if profile.sound_by_name(&name).is_some() {
                anyhow::bail!("A sound named '{}' already exists", name);
            }
            profile.sounds.push(SoundSpec {
                name: name.clone(),
                path: file.display().to_string(),
                volume: volume.unwrap_or(1.0),
                keys: Vec::new(),
            });
            profile::save_profile(&profile, &path)?;
            println!("Added '{}'. Bind it with: mixboard sounds bind {}", name, name);
        }
        SoundsAction::Remove { name } => {
            let before = profile.sounds.len();
            profile.sounds.retain(|s| s.name != name);
            if profile.sounds.len() == before {
                anyhow::bail!("No sound named '{}'", name);
            }
            profile::save_profile(&profile, &path)?;
            println!("Removed '{}'", name);
        }
        SoundsAction::Bind { name } => {
            if profile.sound_by_name(&name).is_none() {
                anyhow::bail!("No sound named '{}'", name);
            }

            println!("Hold the key combination for '{}', then release...", name);
            let mut listener = hotkey::create_listener()?;
            let mut key_rx = listener.start().await?;
            let combo = hotkey::capture_combo(&mut key_rx).await?;
            listener.stop().await?;

            let names = hotkey::format_combo(&combo);
            let sound = profile
                .sound_by_name_mut(&name)
                .ok_or_else(|| anyhow::anyhow!("No sound named '{}'", name))?;
            sound.keys = names.clone();
            profile::save_profile(&profile, &path)?;
            println!("Bound '{}' to {}", name, names.join("+"));
        }
    }

    Ok(())
}

fn show_config(config: &Config) -> anyhow::Result<()> {
    if let Some(path) = Config::default_path() {
        println!("Config file:  {}", path.display());
    }
    println!("Profile file: {}", profile_path()?.display());
    println!();
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}
