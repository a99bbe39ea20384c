//! Persisted soundboard state
//!
//! The profile is the mutable half of the on-disk state: the ordered
//! sound list, the echo flag, and the chosen device names. It carries a
//! format version that must match exactly; any mismatch (or any parse
//! failure) discards the file and starts from defaults. There is no
//! migration path, by design.

use crate::error::MixboardError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Current profile format version. Exact match required on load.
pub const PROFILE_VERSION: u32 = 2;

/// One sound-effect entry: a named clip with a key binding
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SoundSpec {
    /// Display name
    #[serde(default = "default_sound_name")]
    pub name: String,

    /// Path to a 16-bit PCM WAV file
    #[serde(default)]
    pub path: String,

    /// Linear gain applied to the clip while mixing (1.0 = unity)
    #[serde(default = "default_volume")]
    pub volume: f32,

    /// Key combination that triggers this sound (evdev key names,
    /// e.g. ["LEFTCTRL", "F5"]). An empty combo never fires.
    #[serde(default)]
    pub keys: Vec<String>,
}

fn default_sound_name() -> String {
    "Sound".to_string()
}

fn default_volume() -> f32 {
    1.0
}

impl Default for SoundSpec {
    fn default() -> Self {
        Self {
            name: default_sound_name(),
            path: String::new(),
            volume: default_volume(),
            keys: Vec::new(),
        }
    }
}

/// Versioned persisted soundboard state
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Profile {
    /// Format version; must equal PROFILE_VERSION exactly
    pub version: u32,

    /// Ordered sound list
    #[serde(default)]
    pub sounds: Vec<SoundSpec>,

    /// Whether the echo monitor stream receives a copy of the output
    #[serde(default = "default_echo")]
    pub echo: bool,

    /// Chosen device names, resolved against the live enumeration at
    /// startup; an unknown name falls back to the first device of the
    /// relevant direction.
    #[serde(default)]
    pub input_device: String,
    #[serde(default)]
    pub output_device: String,
    #[serde(default)]
    pub echo_device: String,
}

fn default_echo() -> bool {
    true
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            version: PROFILE_VERSION,
            sounds: Vec::new(),
            echo: default_echo(),
            input_device: String::new(),
            output_device: String::new(),
            echo_device: String::new(),
        }
    }
}

impl Profile {
    /// Find a sound by name
    pub fn sound_by_name(&self, name: &str) -> Option<&SoundSpec> {
        self.sounds.iter().find(|s| s.name == name)
    }

    /// Find a sound by name, mutably
    pub fn sound_by_name_mut(&mut self, name: &str) -> Option<&mut SoundSpec> {
        self.sounds.iter_mut().find(|s| s.name == name)
    }
}

/// Load the profile from disk. Missing file, unreadable contents, or a
/// version mismatch all yield a fresh default profile.
pub fn load_profile(path: &Path) -> Profile {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No profile at {:?}, starting fresh", path);
            return Profile::default();
        }
        Err(e) => {
            tracing::warn!("Failed to read profile {:?}: {}, starting fresh", path, e);
            return Profile::default();
        }
    };

    match toml::from_str::<Profile>(&contents) {
        Ok(profile) if profile.version == PROFILE_VERSION => profile,
        Ok(profile) => {
            tracing::warn!(
                "Profile version {} does not match {}, discarding",
                profile.version,
                PROFILE_VERSION
            );
            Profile::default()
        }
        Err(e) => {
            tracing::warn!("Invalid profile {:?}: {}, starting fresh", path, e);
            Profile::default()
        }
    }
}

/// Save the profile to disk
pub fn save_profile(profile: &Profile, path: &Path) -> Result<(), MixboardError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| MixboardError::Config(format!("Failed to create profile dir: {}", e)))?;
    }

    let contents = toml::to_string_pretty(profile)
        .map_err(|e| MixboardError::Config(format!("Failed to serialize profile: {}", e)))?;

    std::fs::write(path, contents)
        .map_err(|e| MixboardError::Config(format!("Failed to write profile: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_profile() {
        let profile = Profile::default();
        assert_eq!(profile.version, PROFILE_VERSION);
        assert!(profile.sounds.is_empty());
        assert!(profile.echo);
    }

    #[test]
    fn test_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profile.toml");

        let mut profile = Profile::default();
        profile.sounds.push(SoundSpec {
            name: "airhorn".to_string(),
            path: "/tmp/airhorn.wav".to_string(),
            volume: 0.8,
            keys: vec!["LEFTCTRL".to_string(), "F5".to_string()],
        });
        profile.echo = false;
        profile.input_device = "mic".to_string();

        save_profile(&profile, &path).unwrap();
        let loaded = load_profile(&path);

        assert_eq!(loaded.sounds.len(), 1);
        assert_eq!(loaded.sounds[0].name, "airhorn");
        assert_eq!(loaded.sounds[0].keys.len(), 2);
        assert!(!loaded.echo);
        assert_eq!(loaded.input_device, "mic");
    }

    #[test]
    fn test_version_mismatch_discards() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profile.toml");

        std::fs::write(
            &path,
            "version = 1\necho = false\n\n[[sounds]]\nname = \"old\"\n",
        )
        .unwrap();

        let loaded = load_profile(&path);
        assert_eq!(loaded.version, PROFILE_VERSION);
        assert!(loaded.sounds.is_empty());
        assert!(loaded.echo);
    }

    #[test]
    fn test_garbage_file_discards() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profile.toml");
        std::fs::write(&path, "not toml at all {{{").unwrap();

        let loaded = load_profile(&path);
        assert_eq!(loaded.version, PROFILE_VERSION);
    }

    #[test]
    fn test_missing_file_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load_profile(&dir.path().join("nope.toml"));
        assert_eq!(loaded.version, PROFILE_VERSION);
    }
}
