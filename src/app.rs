//! Application facade used by the front ends.
//!
//! Resolves user queries (a MIDI file or a JSON playlist) against the configured MIDI
//! directory, builds the requested instrument and drives the [`Player`].

use crate::config::Config;
use crate::input::Actuator;
use crate::player::{check_files, PlayOptions, PlayReport, Player, PlayerError};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("no file name given")]
    EmptyQuery,
    #[error("no such file: {}", .0.display())]
    NotFound(PathBuf),
    #[error("could not read playlist {}: {source}", path.display())]
    PlaylistIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid playlist {}: {source}", path.display())]
    PlaylistFormat {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("playlist {} lists no files", .0.display())]
    EmptyPlaylist(PathBuf),
}

/// On-disk playlist: `{ "files": [...], "shuffle": bool, "repeat": bool }`.
#[derive(Debug, Deserialize)]
struct PlaylistFile {
    files: Vec<PathBuf>,
    #[serde(flatten)]
    options: PlayOptions,
}

/// Files a query resolved to, with the playback modes it asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub files: Vec<PathBuf>,
    pub options: PlayOptions,
}

pub struct App {
    config: Config,
    player: Player,
}

impl App {
    pub fn new(config: Config, actuator: Arc<dyn Actuator>) -> Self {
        let player = Player::with_settings(actuator, config.player_settings());
        Self { config, player }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn player(&self) -> &Player {
        &self.player
    }

    /// Turns a query into the files to play.
    ///
    /// Relative names are looked up in the MIDI directory. A `.json` query is read as a
    /// playlist whose entries resolve the same way; every entry must exist.
    pub fn resolve(&self, query: &str) -> Result<Selection, AppError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(AppError::EmptyQuery);
        }

        let path = self.locate(Path::new(query));
        if !is_playlist(&path) {
            if !path.is_file() {
                return Err(AppError::NotFound(path));
            }
            return Ok(Selection {
                files: vec![path],
                options: PlayOptions::default(),
            });
        }

        let json = fs::read_to_string(&path).map_err(|source| AppError::PlaylistIo {
            path: path.clone(),
            source,
        })?;
        let playlist: PlaylistFile =
            serde_json::from_str(&json).map_err(|source| AppError::PlaylistFormat {
                path: path.clone(),
                source,
            })?;
        if playlist.files.is_empty() {
            return Err(AppError::EmptyPlaylist(path));
        }

        let files = playlist
            .files
            .iter()
            .map(|file| {
                let file = self.locate(file);
                if file.is_file() {
                    Ok(file)
                } else {
                    Err(AppError::NotFound(file))
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        debug!(playlist = %path.display(), files = files.len(), "Resolved playlist");
        Ok(Selection {
            files,
            options: playlist.options,
        })
    }

    /// Checks whether the files of `query` can be played, without playing them.
    pub fn can_play(&self, query: &str, instrument: Option<&str>) -> Result<PlayReport> {
        let selection = self
            .resolve(query)
            .with_context(|| format!("Failed to resolve '{}'", query))?;
        let instrument = self.config.instrument(instrument)?;
        Ok(check_files(&selection.files, &instrument))
    }

    /// Starts playing `query`.
    pub fn play(&self, query: &str, instrument: Option<&str>) -> Result<PlayReport> {
        let selection = self
            .resolve(query)
            .with_context(|| format!("Failed to resolve '{}'", query))?;
        let instrument = self.config.instrument(instrument)?;
        let report = self
            .player
            .play(&selection.files, selection.options, instrument)?;
        Ok(report)
    }

    pub fn pause(&self) -> Result<(), PlayerError> {
        self.player.pause()
    }

    pub fn resume(&self) -> Result<(), PlayerError> {
        self.player.resume()
    }

    pub fn stop(&self) -> Result<(), PlayerError> {
        self.player.stop()
    }

    pub fn next(&self) -> Result<(), PlayerError> {
        self.player.next()
    }

    pub fn prev(&self) -> Result<(), PlayerError> {
        self.player.prev()
    }

    pub fn set_shuffle(&self, enable: bool) -> Result<(), PlayerError> {
        self.player.set_shuffle(enable)
    }

    fn locate(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.config.midi_path.join(path)
        }
    }
}

fn is_playlist(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::RecordingActuator;
    use crate::midi::fixtures::{smf_bytes, Raw};
    use crate::player::{FileStatus, PlayerState};
    use tempfile::{tempdir, TempDir};

    fn setup() -> (TempDir, App, Arc<RecordingActuator>) {
        let dir = tempdir().unwrap();
        let config = Config {
            midi_path: dir.path().to_path_buf(),
            break_ms: 10,
            small_break_ms: 5,
            ..Config::default()
        };
        let actuator = Arc::new(RecordingActuator::new());
        let app = App::new(config, actuator.clone());
        (dir, app, actuator)
    }

    fn write_song(dir: &Path, name: &str, keys: &[u8]) {
        let mut events = Vec::new();
        for (i, &key) in keys.iter().enumerate() {
            let tick = i as u32 * 480;
            events.push(Raw::On(tick, key));
            events.push(Raw::Off(tick + 240, key));
        }
        fs::write(dir.join(name), smf_bytes(&[&events])).unwrap();
    }

    #[test]
    fn test_resolve_single_file() {
        let (dir, app, _) = setup();
        write_song(dir.path(), "song.mid", &[60]);

        let selection = app.resolve(" song.mid ").unwrap();
        assert_eq!(selection.files, vec![dir.path().join("song.mid")]);
        assert_eq!(selection.options, PlayOptions::default());

        assert!(matches!(app.resolve("missing.mid"), Err(AppError::NotFound(_))));
        assert!(matches!(app.resolve("   "), Err(AppError::EmptyQuery)));
    }

    #[test]
    fn test_resolve_playlist() {
        let (dir, app, _) = setup();
        write_song(dir.path(), "a.mid", &[60]);
        write_song(dir.path(), "b.mid", &[62]);
        fs::write(
            dir.path().join("set.json"),
            r#"{ "files": ["a.mid", "b.mid"], "shuffle": true }"#,
        )
        .unwrap();

        let selection = app.resolve("set.json").unwrap();
        assert_eq!(selection.files.len(), 2);
        assert!(selection.options.shuffle);
        assert!(!selection.options.repeat);
    }

    #[test]
    fn test_playlist_errors() {
        let (dir, app, _) = setup();
        write_song(dir.path(), "a.mid", &[60]);
        fs::write(dir.path().join("gap.json"), r#"{ "files": ["a.mid", "b.mid"] }"#).unwrap();
        fs::write(dir.path().join("empty.json"), r#"{ "files": [] }"#).unwrap();
        fs::write(dir.path().join("broken.json"), "[1, 2").unwrap();

        assert!(matches!(app.resolve("gap.json"), Err(AppError::NotFound(_))));
        assert!(matches!(app.resolve("empty.json"), Err(AppError::EmptyPlaylist(_))));
        assert!(matches!(
            app.resolve("broken.json"),
            Err(AppError::PlaylistFormat { .. })
        ));
        assert!(matches!(
            app.resolve("absent.json"),
            Err(AppError::PlaylistIo { .. })
        ));
    }

    #[test]
    fn test_can_play_per_instrument() {
        let (dir, app, actuator) = setup();
        write_song(dir.path(), "sharp.mid", &[60, 61]);

        let report = app.can_play("sharp.mid", Some("harp")).unwrap();
        assert!(!report.all_playable());
        assert!(matches!(report.files[0].status, FileStatus::Unplayable(_)));

        write_song(dir.path(), "e.mid", &[64, 66]);
        assert!(app.can_play("e.mid", Some("flute")).unwrap().all_playable());

        assert!(app.can_play("e.mid", Some("kazoo")).is_err());
        assert!(actuator.presses().is_empty());
    }

    #[test]
    fn test_play_and_stop() {
        let (dir, app, actuator) = setup();
        write_song(dir.path(), "song.mid", &[60, 62, 64, 65]);

        let report = app.play("song.mid", None).unwrap();
        assert_eq!(report.playable(), 1);
        assert_eq!(app.player().state(), PlayerState::Playing);

        app.stop().unwrap();
        assert_eq!(app.player().state(), PlayerState::Stopped);
        assert!(actuator.held().is_empty());
        assert!(matches!(app.pause(), Err(PlayerError::NotPlaying)));
    }

    #[test]
    fn test_play_unplayable_is_an_error() {
        let (dir, app, _) = setup();
        write_song(dir.path(), "sharp.mid", &[61]);

        let err = app.play("sharp.mid", Some("harp")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PlayerError>(),
            Some(PlayerError::NothingPlayable(_))
        ));
    }
}
