//! The background thread that plays a playlist.
//!
//! At most one worker runs at a time. It owns the session instrument while it runs and
//! talks to the [`Player`](super::Player) only through the shared block: it reads the
//! current song and retained position, polls the interrupt flag, and on exit hands the
//! instrument back and wakes whoever waits for it to stop.

use super::{PlayerEvent, PlayerSettings, PlayerState, Shared};
use crate::input::{Actuator, InjectionBlock};
use crate::instrument::{ExecOutcome, Instrument, Interrupt, PlaybackControl, PlaybackPosition};
use crossbeam_channel::Sender;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Interrupt source backed by the shared block.
struct SessionControl<'a> {
    shared: &'a Shared,
}

impl PlaybackControl for SessionControl<'_> {
    fn poll(&self) -> Option<Interrupt> {
        self.shared.block.lock().interrupt
    }
}

impl SessionControl<'_> {
    /// Sleeps in slices, returning early on an interrupt.
    fn rest(&self, duration: Duration, slice: Duration) -> Option<Interrupt> {
        let deadline = Instant::now() + duration;
        loop {
            if let Some(reason) = self.poll() {
                return Some(reason);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            thread::sleep((deadline - now).min(slice));
        }
    }
}

/// Marks the worker as gone when dropped, including on panic.
struct Running {
    shared: Arc<Shared>,
    instrument: Option<Instrument>,
}

impl Drop for Running {
    fn drop(&mut self) {
        let mut block = self.shared.block.lock();
        if let Some(instrument) = self.instrument.take() {
            block.instrument = Some(instrument);
        }
        if block.abandoned {
            block.abandoned = false;
            block.state = PlayerState::Stopped;
            block.position = PlaybackPosition::start();
        }
        block.running = false;
        block.interrupt = None;
        self.shared.idle.notify_all();
    }
}

pub(super) struct Worker {
    pub shared: Arc<Shared>,
    pub actuator: Arc<dyn Actuator>,
    pub events: Sender<PlayerEvent>,
    pub settings: PlayerSettings,
    pub instrument: Instrument,
    pub lead_in: Duration,
}

impl Worker {
    pub fn run(self) {
        let Worker {
            shared,
            actuator,
            events,
            settings,
            instrument,
            lead_in,
        } = self;

        // Declared first so it is dropped after the injection block.
        let mut running = Running {
            shared: Arc::clone(&shared),
            instrument: None,
        };
        let injection = InjectionBlock::acquire(actuator.as_ref());

        let mut instrument = instrument;
        let control = SessionControl { shared: &shared };
        let slice = instrument.timing().max_sleep_slice();

        if control.rest(lead_in, slice).is_some() {
            debug!("interrupted before the first song");
        } else {
            play_songs(&shared, actuator.as_ref(), &events, &settings, &mut instrument, &control);
        }

        drop(injection);
        running.instrument = Some(instrument);
    }
}

fn play_songs(
    shared: &Shared,
    actuator: &dyn Actuator,
    events: &Sender<PlayerEvent>,
    settings: &PlayerSettings,
    instrument: &mut Instrument,
    control: &SessionControl<'_>,
) {
    let slice = instrument.timing().max_sleep_slice();

    loop {
        let (song, position) = {
            let block = shared.block.lock();
            match block.current_song() {
                Some(song) => (song, block.position),
                None => return,
            }
        };

        if position.is_start() {
            info!(song = %song.name(), instrument = instrument.name(), "Playing");
            let _ = events.send(PlayerEvent::SongStarted {
                path: song.path().to_path_buf(),
            });
        } else {
            info!(song = %song.name(), at_ms = position.offset_ms, "Resuming");
        }

        match instrument.execute(song.timeline(), &position, control, actuator) {
            Ok(ExecOutcome::Finished) => {
                info!(song = %song.name(), "Finished");
                let _ = events.send(PlayerEvent::SongFinished {
                    path: song.path().to_path_buf(),
                });
            }
            Ok(ExecOutcome::Interrupted { reason, position }) => {
                if reason == Interrupt::Pause {
                    shared.block.lock().position = position;
                }
                return;
            }
            Err(e) => {
                error!(song = %song.name(), "Playback failed: {}", e);
                let _ = events.send(PlayerEvent::SongFailed {
                    path: song.path().to_path_buf(),
                    error: e.to_string(),
                });
            }
        }

        if !advance(shared, events) {
            return;
        }
        if control.rest(settings.break_duration, slice).is_some() {
            return;
        }
    }
}

/// Moves to the next song. At the end of the playlist the player stops.
fn advance(shared: &Shared, events: &Sender<PlayerEvent>) -> bool {
    let mut block = shared.block.lock();
    block.position = PlaybackPosition::start();
    if block.advance_playlist().is_some() {
        return true;
    }
    block.state = PlayerState::Stopped;
    drop(block);

    info!("Playlist finished");
    let _ = events.send(PlayerEvent::PlaylistFinished);
    false
}
