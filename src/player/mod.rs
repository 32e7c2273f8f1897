//! Playlist playback.
//!
//! The [`Player`] is a small state machine (stopped, playing, paused) in front of a
//! single background worker thread. Transport operations are called from the front
//! end; they only flip flags in a mutex-guarded block and, when they need the worker
//! gone, wait a bounded time for it to acknowledge. The worker polls the block at every
//! sleep slice, so it stops within a slice of being asked.

mod playlist;
mod worker;

pub use playlist::{PlayOptions, Playlist};

use crate::input::Actuator;
use crate::instrument::{Instrument, Interrupt, PlaybackPosition, Warning};
use crate::midi::{Timeline, TimelineError};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};
use worker::Worker;

/// Pause between two songs of a playlist (ms).
pub const BREAK_DURATION: u64 = 3000;

/// Pause before the song picked by a manual skip (ms).
pub const SMALL_BREAK_DURATION: u64 = 500;

/// Transport state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Stopped,
    Playing,
    Paused,
}

impl fmt::Display for PlayerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlayerState::Stopped => "stopped",
            PlayerState::Playing => "playing",
            PlayerState::Paused => "paused",
        };
        f.write_str(name)
    }
}

/// Errors returned by transport operations.
#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("nothing is playing")]
    NotPlaying,
    #[error("playback is not paused")]
    NotPaused,
    #[error("the player is busy, stop it first")]
    Busy,
    #[error("no playlist loaded")]
    NoPlaylist,
    #[error("no more songs in this direction")]
    EndOfPlaylist,
    #[error("none of the files can be played")]
    NothingPlayable(PlayReport),
    #[error("failed to start the playback thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Notifications published by the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerEvent {
    SongStarted { path: PathBuf },
    SongFinished { path: PathBuf },
    /// The actuator failed mid-song; the playlist moved on.
    SongFailed { path: PathBuf, error: String },
    PlaylistFinished,
}

/// Player timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerSettings {
    pub break_duration: Duration,
    pub small_break_duration: Duration,
    /// Longest a transport operation waits for the worker to stop.
    pub ack_timeout: Duration,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self {
            break_duration: Duration::from_millis(BREAK_DURATION),
            small_break_duration: Duration::from_millis(SMALL_BREAK_DURATION),
            ack_timeout: Duration::from_secs(2),
        }
    }
}

/// A loaded file.
#[derive(Debug, Clone)]
pub struct Song {
    path: PathBuf,
    timeline: Timeline,
}

impl Song {
    pub fn new(path: impl Into<PathBuf>, timeline: Timeline) -> Self {
        Self {
            path: path.into(),
            timeline,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    /// File name for display.
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .unwrap_or(self.path.as_os_str())
            .to_string_lossy()
            .into_owned()
    }
}

/// Verdict on one file of a playlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileStatus {
    /// Queued, possibly with advisory warnings.
    Playable(BTreeSet<Warning>),
    /// Refused because of a blocking warning.
    Unplayable(BTreeSet<Warning>),
    /// The file could not be read or parsed.
    Unreadable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReport {
    pub path: PathBuf,
    pub status: FileStatus,
}

/// Per-file outcome of loading and checking a playlist, in playlist order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlayReport {
    pub files: Vec<FileReport>,
}

impl PlayReport {
    fn push(&mut self, path: PathBuf, status: FileStatus) {
        self.files.push(FileReport { path, status });
    }

    /// Number of files that were queued.
    pub fn playable(&self) -> usize {
        self.files
            .iter()
            .filter(|f| matches!(f.status, FileStatus::Playable(_)))
            .count()
    }

    /// Returns true if every file can be played.
    pub fn all_playable(&self) -> bool {
        self.playable() == self.files.len()
    }
}

/// Loads `files` and checks each against `instrument`, without playing anything.
pub fn check_files(files: &[PathBuf], instrument: &Instrument) -> PlayReport {
    let loaded = files
        .iter()
        .map(|path| (path.clone(), Timeline::from_file(path)))
        .collect();
    assess(loaded, instrument).0
}

/// Sorts loaded files into a report and the songs that can be queued.
fn assess(
    loaded: Vec<(PathBuf, Result<Timeline, TimelineError>)>,
    instrument: &Instrument,
) -> (PlayReport, Vec<Arc<Song>>) {
    let mut report = PlayReport::default();
    let mut songs = Vec::new();
    for (path, result) in loaded {
        match result {
            Ok(timeline) => {
                let warnings = instrument.check_feasibility(&timeline);
                if warnings.iter().any(Warning::is_blocking) {
                    warn!(
                        file = %path.display(),
                        ?warnings,
                        "File can not be played on this instrument"
                    );
                    report.push(path, FileStatus::Unplayable(warnings));
                } else {
                    if !warnings.is_empty() {
                        info!(file = %path.display(), ?warnings, "File has feasibility warnings");
                    }
                    songs.push(Arc::new(Song::new(path.clone(), timeline)));
                    report.push(path, FileStatus::Playable(warnings));
                }
            }
            Err(e) => {
                warn!(file = %path.display(), "Could not load file: {}", e);
                report.push(path, FileStatus::Unreadable(e.to_string()));
            }
        }
    }
    (report, songs)
}

/// State shared with the worker.
struct Block {
    state: PlayerState,
    playlist: Option<Playlist>,
    songs: Vec<Arc<Song>>,
    /// Session instrument while no worker holds it.
    instrument: Option<Instrument>,
    /// Where the next run starts.
    position: PlaybackPosition,
    interrupt: Option<Interrupt>,
    running: bool,
    /// A transport call gave up waiting for the worker; it stops the player on exit.
    abandoned: bool,
    rng: StdRng,
}

impl Block {
    fn current_song(&self) -> Option<Arc<Song>> {
        let index = self.playlist.as_ref()?.current()?;
        self.songs.get(index).cloned()
    }

    fn advance_playlist(&mut self) -> Option<usize> {
        let Block { playlist, rng, .. } = self;
        playlist.as_mut()?.advance(rng)
    }
}

struct Shared {
    block: Mutex<Block>,
    /// Signalled when the worker exits.
    idle: Condvar,
}

/// Plays playlists on one instrument through an actuator.
pub struct Player {
    shared: Arc<Shared>,
    actuator: Arc<dyn Actuator>,
    settings: PlayerSettings,
    worker: Mutex<Option<JoinHandle<()>>>,
    /// Serialises transport operations.
    transport: Mutex<()>,
    events_tx: Sender<PlayerEvent>,
    events_rx: Receiver<PlayerEvent>,
}

impl Player {
    pub fn new(actuator: Arc<dyn Actuator>) -> Self {
        Self::with_settings(actuator, PlayerSettings::default())
    }

    pub fn with_settings(actuator: Arc<dyn Actuator>, settings: PlayerSettings) -> Self {
        let (events_tx, events_rx) = unbounded();
        Self {
            shared: Arc::new(Shared {
                block: Mutex::new(Block {
                    state: PlayerState::Stopped,
                    playlist: None,
                    songs: Vec::new(),
                    instrument: None,
                    position: PlaybackPosition::start(),
                    interrupt: None,
                    running: false,
                    abandoned: false,
                    rng: StdRng::from_entropy(),
                }),
                idle: Condvar::new(),
            }),
            actuator,
            settings,
            worker: Mutex::new(None),
            transport: Mutex::new(()),
            events_tx,
            events_rx,
        }
    }

    pub fn settings(&self) -> &PlayerSettings {
        &self.settings
    }

    pub fn state(&self) -> PlayerState {
        self.shared.block.lock().state
    }

    /// Path of the current playlist entry.
    pub fn current_song(&self) -> Option<PathBuf> {
        self.shared
            .block
            .lock()
            .current_song()
            .map(|song| song.path().to_path_buf())
    }

    /// Position the next run would start from.
    pub fn position(&self) -> PlaybackPosition {
        self.shared.block.lock().position
    }

    pub fn is_shuffled(&self) -> bool {
        self.shared
            .block
            .lock()
            .playlist
            .as_ref()
            .is_some_and(Playlist::is_shuffled)
    }

    /// Receiver of player notifications.
    pub fn events(&self) -> Receiver<PlayerEvent> {
        self.events_rx.clone()
    }

    /// Loads `files`, checks them against `instrument` and starts playing the playable
    /// ones. Only allowed while stopped.
    pub fn play(
        &self,
        files: &[PathBuf],
        options: PlayOptions,
        instrument: Instrument,
    ) -> Result<PlayReport, PlayerError> {
        if self.state() != PlayerState::Stopped {
            return Err(PlayerError::Busy);
        }
        let loaded = files
            .iter()
            .map(|path| (path.clone(), Timeline::from_file(path)))
            .collect();
        self.start(loaded, options, instrument)
    }

    /// Like [`Player::play`] with already built timelines.
    pub fn play_songs(
        &self,
        songs: Vec<Song>,
        options: PlayOptions,
        instrument: Instrument,
    ) -> Result<PlayReport, PlayerError> {
        let loaded = songs
            .into_iter()
            .map(|song| (song.path, Ok(song.timeline)))
            .collect();
        self.start(loaded, options, instrument)
    }

    fn start(
        &self,
        loaded: Vec<(PathBuf, Result<Timeline, TimelineError>)>,
        options: PlayOptions,
        instrument: Instrument,
    ) -> Result<PlayReport, PlayerError> {
        let _transport = self.transport.lock();
        if self.state() != PlayerState::Stopped {
            return Err(PlayerError::Busy);
        }
        if loaded.is_empty() {
            return Err(PlayerError::NoPlaylist);
        }
        // The previous worker may still be releasing keys after the playlist ended.
        self.wait_idle()?;

        let (report, songs) = assess(loaded, &instrument);
        if songs.is_empty() {
            return Err(PlayerError::NothingPlayable(report));
        }

        {
            let mut block = self.shared.block.lock();
            let playlist = Playlist::new(songs.len(), options, &mut block.rng);
            block.playlist = Some(playlist);
            block.songs = songs;
            block.instrument = Some(instrument);
            block.position = PlaybackPosition::start();
            block.state = PlayerState::Playing;
        }
        self.spawn(Duration::ZERO)?;
        Ok(report)
    }

    /// Suspends playback, keeping the position.
    pub fn pause(&self) -> Result<(), PlayerError> {
        let _transport = self.transport.lock();
        self.signal(PlayerState::Playing, Interrupt::Pause)?;
        self.wait_idle()?;

        let mut block = self.shared.block.lock();
        if block.state != PlayerState::Playing {
            // The playlist ended while the request was in flight.
            return Err(PlayerError::NotPlaying);
        }
        block.state = PlayerState::Paused;
        info!(at_ms = block.position.offset_ms, "Paused");
        Ok(())
    }

    /// Continues from where [`Player::pause`] left off.
    pub fn resume(&self) -> Result<(), PlayerError> {
        let _transport = self.transport.lock();
        {
            let mut block = self.shared.block.lock();
            match block.state {
                PlayerState::Paused => block.state = PlayerState::Playing,
                PlayerState::Stopped => return Err(PlayerError::NotPlaying),
                PlayerState::Playing => return Err(PlayerError::NotPaused),
            }
        }
        info!("Resuming");
        self.spawn(Duration::ZERO)
    }

    /// Stops playback and forgets the position. The playlist stays loaded.
    pub fn stop(&self) -> Result<(), PlayerError> {
        let _transport = self.transport.lock();
        {
            let mut block = self.shared.block.lock();
            if block.state == PlayerState::Stopped {
                return Err(PlayerError::NotPlaying);
            }
            block.interrupt = Some(Interrupt::Stop);
        }
        self.wait_idle()?;

        let mut block = self.shared.block.lock();
        block.state = PlayerState::Stopped;
        block.position = PlaybackPosition::start();
        info!("Stopped");
        Ok(())
    }

    /// Skips to the next song.
    pub fn next(&self) -> Result<(), PlayerError> {
        self.skip(true)
    }

    /// Skips to the previous song.
    pub fn prev(&self) -> Result<(), PlayerError> {
        self.skip(false)
    }

    fn skip(&self, forward: bool) -> Result<(), PlayerError> {
        let _transport = self.transport.lock();
        let requested = Instant::now();
        {
            let mut block = self.shared.block.lock();
            let playlist = block.playlist.as_ref().ok_or(PlayerError::NoPlaylist)?;
            if playlist.peek_step(forward).is_none() {
                return Err(PlayerError::EndOfPlaylist);
            }
            if block.state == PlayerState::Playing {
                block.interrupt = Some(Interrupt::Skip);
            }
        }
        self.wait_idle()?;

        let restart = {
            let mut block = self.shared.block.lock();
            if let Some(playlist) = block.playlist.as_mut() {
                playlist.step(forward);
            }
            block.position = PlaybackPosition::start();
            if let Some(song) = block.current_song() {
                info!(song = %song.name(), "Skipped");
            }
            block.state == PlayerState::Playing
        };

        if restart {
            let lead_in = self
                .settings
                .small_break_duration
                .saturating_sub(requested.elapsed());
            self.spawn(lead_in)?;
        }
        Ok(())
    }

    /// Turns shuffling on or off. The current song keeps playing.
    pub fn set_shuffle(&self, enable: bool) -> Result<(), PlayerError> {
        let mut block = self.shared.block.lock();
        let Block { playlist, rng, .. } = &mut *block;
        let playlist = playlist.as_mut().ok_or(PlayerError::NoPlaylist)?;
        playlist.set_shuffle(enable, rng);
        debug!(enable, "Shuffle");
        Ok(())
    }

    fn signal(&self, expected: PlayerState, interrupt: Interrupt) -> Result<(), PlayerError> {
        let mut block = self.shared.block.lock();
        if block.state != expected {
            return Err(PlayerError::NotPlaying);
        }
        block.interrupt = Some(interrupt);
        Ok(())
    }

    /// Waits for the worker to exit and joins it.
    ///
    /// On timeout the worker is left to finish on its own and the player moves to
    /// [`PlayerState::Stopped`] once it does.
    fn wait_idle(&self) -> Result<(), PlayerError> {
        let deadline = Instant::now() + self.settings.ack_timeout;
        {
            let mut block = self.shared.block.lock();
            while block.running {
                if self
                    .shared
                    .idle
                    .wait_until(&mut block, deadline)
                    .timed_out()
                {
                    warn!("Playback thread did not stop in time");
                    block.abandoned = true;
                    return Err(PlayerError::Busy);
                }
            }
        }

        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                warn!("Playback thread panicked");
            }
        }
        Ok(())
    }

    /// Starts a worker on the current song after `lead_in`.
    fn spawn(&self, lead_in: Duration) -> Result<(), PlayerError> {
        let instrument = {
            let mut block = self.shared.block.lock();
            let instrument = block.instrument.take().ok_or(PlayerError::NoPlaylist)?;
            block.running = true;
            block.interrupt = None;
            block.abandoned = false;
            instrument
        };

        let worker = Worker {
            shared: Arc::clone(&self.shared),
            actuator: Arc::clone(&self.actuator),
            events: self.events_tx.clone(),
            settings: self.settings,
            instrument,
            lead_in,
        };

        match thread::Builder::new()
            .name("midiwars-player".to_string())
            .spawn(move || worker.run())
        {
            Ok(handle) => {
                *self.worker.lock() = Some(handle);
                Ok(())
            }
            Err(e) => {
                let mut block = self.shared.block.lock();
                block.running = false;
                block.state = PlayerState::Stopped;
                Err(PlayerError::Spawn(e))
            }
        }
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        if self.state() != PlayerState::Stopped {
            if let Err(e) = self.stop() {
                warn!("Failed to stop playback: {}", e);
            }
        }
    }
}
