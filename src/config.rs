//! Configuration file.
//!
//! Settings live in a JSON file next to the binary (`midiwars.json` by default). A
//! missing file is written out with defaults on first run, together with an empty
//! MIDI directory, so the user has something to edit.

use crate::input::Keymap;
use crate::instrument::{Instrument, InstrumentError, Profile};
use crate::player::PlayerSettings;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Default configuration file name.
pub const CONFIG_FILE: &str = "midiwars.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid configuration in {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("MIDI directory {} does not exist or is not a directory", .0.display())]
    MidiPath(PathBuf),
    #[error(transparent)]
    Instrument(#[from] InstrumentError),
}

/// User settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory that relative file queries resolve against.
    pub midi_path: PathBuf,
    /// Instrument used when a command does not name one.
    pub default_instrument: String,
    /// Overrides the keybar cooldown of every instrument.
    pub keybar_cooldown_ms: Option<u64>,
    /// Seconds counted down before playback starts.
    pub countdown_secs: u64,
    /// Pause between two songs of a playlist.
    pub break_ms: u64,
    /// Pause before a song picked with next/prev.
    pub small_break_ms: u64,
    pub keymap: Keymap,
}

impl Default for Config {
    fn default() -> Self {
        let player = PlayerSettings::default();
        Self {
            midi_path: PathBuf::from("midi"),
            default_instrument: "harp".to_string(),
            keybar_cooldown_ms: None,
            countdown_secs: 3,
            break_ms: player.break_duration.as_millis() as u64,
            small_break_ms: player.small_break_duration.as_millis() as u64,
            keymap: Keymap::default(),
        }
    }
}

impl Config {
    /// Reads and validates the configuration at `path`. A relative `midi_path` is taken
    /// relative to the directory of the file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Config =
            serde_json::from_str(&json).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        if let Some(parent) = path.parent() {
            config.midi_path = parent.join(&config.midi_path);
        }
        config.validate()?;
        Ok(config)
    }

    /// Loads `path`, first writing the defaults there if it does not exist.
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            let config = Config::default();
            let midi_path = match path.parent() {
                Some(parent) => parent.join(&config.midi_path),
                None => config.midi_path.clone(),
            };
            fs::create_dir_all(&midi_path).map_err(|source| ConfigError::Io {
                path: midi_path.clone(),
                source,
            })?;
            config.save(path)?;
            info!("Wrote default configuration to {}", path.display());
        }
        Self::load(path)
    }

    /// Writes the configuration as pretty JSON.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, json).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Checks the MIDI directory and the default instrument.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.midi_path.is_dir() {
            return Err(ConfigError::MidiPath(self.midi_path.clone()));
        }
        Profile::by_name(&self.default_instrument)?;
        Ok(())
    }

    /// Builds the named instrument, or the default one, with configured overrides.
    pub fn instrument(&self, name: Option<&str>) -> Result<Instrument, ConfigError> {
        let instrument = Instrument::by_name(name.unwrap_or(&self.default_instrument))?;
        Ok(match self.keybar_cooldown_ms {
            Some(cooldown) => instrument.with_keybar_cooldown(cooldown),
            None => instrument,
        })
    }

    pub fn player_settings(&self) -> PlayerSettings {
        PlayerSettings {
            break_duration: Duration::from_millis(self.break_ms),
            small_break_duration: Duration::from_millis(self.small_break_ms),
            ..PlayerSettings::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn config_in(dir: &Path) -> Config {
        Config {
            midi_path: dir.to_path_buf(),
            ..Config::default()
        }
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        let mut config = config_in(dir.path());
        config.default_instrument = "flute".to_string();
        config.keybar_cooldown_ms = Some(150);
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded, config);
        let flute = loaded.instrument(None).unwrap();
        assert_eq!(flute.name(), "flute");
        assert_eq!(flute.timing().keybar_cooldown_ms, 150);
        assert_eq!(loaded.instrument(Some("harp")).unwrap().name(), "harp");
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        let json = format!(r#"{{ "midi_path": {:?} }}"#, dir.path().display().to_string());
        fs::write(&path, json).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.default_instrument, "harp");
        assert_eq!(config.break_ms, 3000);
        assert_eq!(config.keymap, Keymap::default());
    }

    #[test]
    fn test_load_or_create_writes_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        let config = Config::load_or_create(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.midi_path, dir.path().join("midi"));
        assert!(config.midi_path.is_dir());
    }

    #[test]
    fn test_validation() {
        let dir = tempdir().unwrap();
        let missing = Config {
            midi_path: dir.path().join("nope"),
            ..Config::default()
        };
        assert!(matches!(missing.validate(), Err(ConfigError::MidiPath(_))));

        let bad_instrument = Config {
            default_instrument: "kazoo".to_string(),
            ..config_in(dir.path())
        };
        assert!(matches!(
            bad_instrument.validate(),
            Err(ConfigError::Instrument(InstrumentError::Unknown(_)))
        ));
    }

    #[test]
    fn test_malformed_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(Config::load(&path), Err(ConfigError::Parse { .. })));
    }
}
