//! Real-time execution of a timeline.
//!
//! The engine walks the note events in order, sleeps until each one is due and
//! emits the press/release actions that play it. Sleeps are cut into slices no longer
//! than [`Timing::max_sleep_slice`](super::Timing::max_sleep_slice) and the
//! [`PlaybackControl`] is polled between slices, so a pause or stop request is seen
//! quickly even during long notes. Whatever ends a run, no note key is left held.

use super::{Held, Instrument};
use crate::input::{Action, Actuator, InputError};
use crate::midi::{note_to_name, NoteEvent, Timeline};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Why a run was cut short.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    /// Suspend, keeping the position so playback can resume.
    Pause,
    /// Abandon the file.
    Stop,
    /// Abandon the file to move to another song.
    Skip,
}

/// Source of interrupt requests, polled at every sleep slice and before every note.
pub trait PlaybackControl {
    fn poll(&self) -> Option<Interrupt>;
}

/// A held note that was cut by a pause and should sound again on resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sustain {
    pub key: u8,
    /// Timeline time (ms) at which the note ends.
    pub release_at: u64,
}

/// Where to continue a timeline from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlaybackPosition {
    /// Index of the first event still to play.
    pub next_event: usize,
    /// Timeline time (ms) the run starts at.
    pub offset_ms: u64,
    /// Note to press again before continuing.
    pub sustain: Option<Sustain>,
}

impl PlaybackPosition {
    /// The beginning of a timeline.
    pub fn start() -> Self {
        Self::default()
    }

    pub fn is_start(&self) -> bool {
        *self == Self::start()
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecOutcome {
    /// Every event was played.
    Finished,
    /// An interrupt was observed; `position` is where to resume.
    Interrupted {
        reason: Interrupt,
        position: PlaybackPosition,
    },
}

/// Maps wall-clock time onto timeline time.
struct Clock {
    started: Instant,
    base_ms: u64,
}

impl Clock {
    /// A clock reading `offset_ms` now.
    fn starting_at(offset_ms: u64) -> Self {
        Self {
            started: Instant::now(),
            base_ms: offset_ms,
        }
    }

    fn now_ms(&self) -> u64 {
        self.base_ms + self.started.elapsed().as_millis() as u64
    }
}

impl Instrument {
    /// Plays `timeline` from `from`, pacing actions in real time.
    ///
    /// Returns when the timeline is done or when `control` reports an interrupt. On
    /// every exit, including actuator errors, held keys are released and the
    /// instrument is brought back to its idle keybar.
    pub fn execute(
        &mut self,
        timeline: &Timeline,
        from: &PlaybackPosition,
        control: &dyn PlaybackControl,
        actuator: &dyn Actuator,
    ) -> Result<ExecOutcome, InputError> {
        let clock = Clock::starting_at(from.offset_ms);
        match self.run(timeline, from, &clock, control, actuator) {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.abandon(actuator);
                Err(e)
            }
        }
    }

    fn run(
        &mut self,
        timeline: &Timeline,
        from: &PlaybackPosition,
        clock: &Clock,
        control: &dyn PlaybackControl,
        actuator: &dyn Actuator,
    ) -> Result<ExecOutcome, InputError> {
        let events = timeline.events();

        if let Some(sustain) = from.sustain {
            if self.can_hold() && sustain.release_at > from.offset_ms {
                if let Some(reason) = self.resume_note(sustain, control, actuator)? {
                    return self.suspend(reason, from.next_event, events, clock, actuator);
                }
            }
        }

        for (index, event) in events.iter().enumerate().skip(from.next_event) {
            if !self.profile.in_range(event.key) {
                trace!(key = %note_to_name(event.key), "skipping note out of range");
                continue;
            }

            if let Some(reason) = self.wait_for(event.timestamp, events, index, clock, control, actuator)? {
                return self.suspend(reason, index, events, clock, actuator);
            }
            if let Some(reason) = self.fire(event, clock, control, actuator)? {
                return self.suspend(reason, index, events, clock, actuator);
            }
        }

        // Let the last note ring out.
        if let Some(held) = self.held {
            if let Some(reason) =
                self.wait_for(held.release_at, events, events.len(), clock, control, actuator)?
            {
                return self.suspend(reason, events.len(), events, clock, actuator);
            }
        }

        self.release_held(actuator)?;
        self.return_to_idle_keybar(actuator)?;
        Ok(ExecOutcome::Finished)
    }

    /// Sleeps until timeline time `target`, releasing the held key when it expires and
    /// switching keybars early for the upcoming event when there is room for it.
    fn wait_for(
        &mut self,
        target: u64,
        events: &[NoteEvent],
        upcoming: usize,
        clock: &Clock,
        control: &dyn PlaybackControl,
        actuator: &dyn Actuator,
    ) -> Result<Option<Interrupt>, InputError> {
        let slice = self.timing().max_sleep_slice();
        loop {
            if let Some(reason) = control.poll() {
                return Ok(Some(reason));
            }

            if self.held.is_some_and(|h| h.release_at <= clock.now_ms()) {
                self.release_held(actuator)?;
            }
            if self.held.is_none() {
                if let Some(reason) =
                    self.preempt_keybar(events.get(upcoming), target, clock, control, actuator)?
                {
                    return Ok(Some(reason));
                }
            }

            let now = clock.now_ms();
            if now >= target {
                return Ok(None);
            }

            let wake = match self.held {
                Some(held) => target.min(held.release_at),
                None => target,
            };
            let nap = Duration::from_millis(wake.saturating_sub(now).max(1));
            thread::sleep(nap.min(slice));
        }
    }

    /// Switches to the keybar of `upcoming` ahead of time if the note is within the
    /// lookahead window and far enough away for the switch to finish before it.
    fn preempt_keybar(
        &mut self,
        upcoming: Option<&NoteEvent>,
        target: u64,
        clock: &Clock,
        control: &dyn PlaybackControl,
        actuator: &dyn Actuator,
    ) -> Result<Option<Interrupt>, InputError> {
        let Some(event) = upcoming else {
            return Ok(None);
        };
        let Some(keybar) = self.profile.keybar_for(event.key, self.active_keybar) else {
            return Ok(None);
        };
        if keybar == self.active_keybar {
            return Ok(None);
        }

        let timing = *self.timing();
        let lead = target.saturating_sub(clock.now_ms());
        if lead > timing.lookahead_ms() || lead < timing.preemptive_threshold_ms() {
            return Ok(None);
        }

        debug!(from = self.active_keybar, to = keybar, lead_ms = lead, "preemptive keybar change");
        self.change_keybar(keybar, Some(control), actuator)
    }

    /// Plays one note: releases the held key, switches keybar if needed, respects the
    /// minimum spacing between presses and presses the note's slot.
    fn fire(
        &mut self,
        event: &NoteEvent,
        clock: &Clock,
        control: &dyn PlaybackControl,
        actuator: &dyn Actuator,
    ) -> Result<Option<Interrupt>, InputError> {
        if let Some(reason) = control.poll() {
            return Ok(Some(reason));
        }

        self.release_held(actuator)?;

        let Some(keybar) = self.profile.keybar_for(event.key, self.active_keybar) else {
            return Ok(None);
        };
        if let Some(reason) = self.change_keybar(keybar, Some(control), actuator)? {
            return Ok(Some(reason));
        }
        let Some(slot) = self.profile.slot_of(self.active_keybar, event.key) else {
            return Ok(None);
        };

        self.keep_spacing();
        actuator.press(Action::Note { slot })?;
        self.last_note_press = Some(Instant::now());

        let fired_at = clock.now_ms();
        let strike_end = fired_at + self.timing().strike_ms;
        let release_at = if self.can_hold() {
            event.end().max(strike_end)
        } else {
            strike_end
        };
        self.held = Some(Held {
            slot,
            key: event.key,
            release_at,
        });

        trace!(
            key = %note_to_name(event.key),
            slot,
            due_ms = event.timestamp,
            late_ms = fired_at.saturating_sub(event.timestamp),
            "note"
        );
        Ok(None)
    }

    /// Presses again a note that was held when playback paused.
    fn resume_note(
        &mut self,
        sustain: Sustain,
        control: &dyn PlaybackControl,
        actuator: &dyn Actuator,
    ) -> Result<Option<Interrupt>, InputError> {
        let Some(keybar) = self.profile.keybar_for(sustain.key, self.active_keybar) else {
            return Ok(None);
        };
        if let Some(reason) = self.change_keybar(keybar, Some(control), actuator)? {
            return Ok(Some(reason));
        }
        let Some(slot) = self.profile.slot_of(self.active_keybar, sustain.key) else {
            return Ok(None);
        };

        self.keep_spacing();
        actuator.press(Action::Note { slot })?;
        self.last_note_press = Some(Instant::now());
        self.held = Some(Held {
            slot,
            key: sustain.key,
            release_at: sustain.release_at,
        });
        debug!(key = %note_to_name(sustain.key), "resumed held note");
        Ok(None)
    }

    /// Sleeps off whatever is left of the minimum spacing since the last note press.
    fn keep_spacing(&self) {
        if let Some(last) = self.last_note_press {
            let spacing = self.timing().robot_sleep();
            let since = last.elapsed();
            if since < spacing {
                thread::sleep(spacing - since);
            }
        }
    }

    /// Walks the active keybar towards `target` one step at a time, waiting out the
    /// cooldown before each step. A change that comes too early is delayed, never
    /// dropped. Without a `control` the walk cannot be interrupted.
    fn change_keybar(
        &mut self,
        target: usize,
        control: Option<&dyn PlaybackControl>,
        actuator: &dyn Actuator,
    ) -> Result<Option<Interrupt>, InputError> {
        let timing = *self.timing();

        while self.active_keybar != target {
            if let Some(last) = self.last_keybar_change {
                let ready = last + timing.keybar_cooldown();
                loop {
                    let now = Instant::now();
                    if now >= ready {
                        break;
                    }
                    if let Some(reason) = control.and_then(|c| c.poll()) {
                        return Ok(Some(reason));
                    }
                    thread::sleep((ready - now).min(timing.max_sleep_slice()));
                }
            }

            // Key bar changes cut the sounding note.
            self.release_held(actuator)?;

            let (action, next) = if target > self.active_keybar {
                (Action::KeybarUp, self.active_keybar + 1)
            } else {
                (Action::KeybarDown, self.active_keybar - 1)
            };
            actuator.press(action)?;
            self.last_keybar_change = Some(Instant::now());

            // Needed for the keybar change to take effect.
            thread::sleep(timing.robot_sleep());
            actuator.release(action)?;

            self.active_keybar = next;
            debug!(keybar = next, "keybar change");
        }

        Ok(None)
    }

    /// Moves back to the idle keybar so the next file starts from a known state.
    pub fn return_to_idle_keybar(&mut self, actuator: &dyn Actuator) -> Result<(), InputError> {
        let idle = self.idle_keybar();
        self.change_keybar(idle, None, actuator).map(|_| ())
    }

    fn release_held(&mut self, actuator: &dyn Actuator) -> Result<(), InputError> {
        if let Some(held) = self.held.take() {
            actuator.release(Action::Note { slot: held.slot })?;
        }
        Ok(())
    }

    /// Releases held input and returns to idle, recording where to resume.
    fn suspend(
        &mut self,
        reason: Interrupt,
        next_event: usize,
        events: &[NoteEvent],
        clock: &Clock,
        actuator: &dyn Actuator,
    ) -> Result<ExecOutcome, InputError> {
        let now = clock.now_ms();
        let offset_ms = events
            .get(next_event)
            .map_or(now, |event| now.min(event.timestamp));

        let sustain = self
            .held
            .filter(|held| self.can_hold() && held.release_at > now)
            .map(|held| Sustain {
                key: held.key,
                release_at: held.release_at,
            });

        self.release_held(actuator)?;
        self.return_to_idle_keybar(actuator)?;

        debug!(?reason, next_event, offset_ms, "playback interrupted");
        Ok(ExecOutcome::Interrupted {
            reason,
            position: PlaybackPosition {
                next_event,
                offset_ms,
                sustain,
            },
        })
    }

    /// Best-effort cleanup after an actuator failure.
    fn abandon(&mut self, actuator: &dyn Actuator) {
        if let Err(e) = self.release_held(actuator) {
            warn!("Failed to release held key: {}", e);
        }
        if let Err(e) = self.return_to_idle_keybar(actuator) {
            warn!("Failed to return to idle keybar: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::{ActionKind, RecordingActuator};
    use crate::instrument::Timing;
    use parking_lot::Mutex;

    fn fast_timing(cooldown_ms: u64) -> Timing {
        Timing {
            robot_sleep_ms: 2,
            keybar_cooldown_ms: cooldown_ms,
            note_duration_limit_ms: 2250,
            pause_duration_limit_ms: 5000,
            strike_ms: 1,
            max_sleep_slice_ms: 2,
        }
    }

    fn instrument(name: &str, cooldown_ms: u64) -> Instrument {
        Instrument::by_name(name)
            .unwrap()
            .with_timing(fast_timing(cooldown_ms))
    }

    fn timeline(notes: &[(u8, u64, u64)]) -> Timeline {
        Timeline::from_events(
            notes
                .iter()
                .map(|&(key, ts, dur)| NoteEvent::new(key, ts, dur))
                .collect(),
        )
    }

    struct Never;

    impl PlaybackControl for Never {
        fn poll(&self) -> Option<Interrupt> {
            None
        }
    }

    /// Interrupts once a deadline has passed, then keeps reporting it.
    struct InterruptAt {
        deadline: Instant,
        reason: Interrupt,
    }

    impl InterruptAt {
        fn new(after_ms: u64, reason: Interrupt) -> Self {
            Self {
                deadline: Instant::now() + Duration::from_millis(after_ms),
                reason,
            }
        }
    }

    impl PlaybackControl for InterruptAt {
        fn poll(&self) -> Option<Interrupt> {
            (Instant::now() >= self.deadline).then_some(self.reason)
        }
    }

    /// Counts polls, interrupting on the given one.
    struct InterruptOnPoll {
        polls: Mutex<usize>,
        on: usize,
    }

    impl PlaybackControl for InterruptOnPoll {
        fn poll(&self) -> Option<Interrupt> {
            let mut polls = self.polls.lock();
            *polls += 1;
            (*polls >= self.on).then_some(Interrupt::Stop)
        }
    }

    fn note(slot: u8) -> Action {
        Action::Note { slot }
    }

    #[test]
    fn test_plays_notes_in_order() {
        let mut harp = instrument("harp", 15);
        let actuator = RecordingActuator::new();
        let t = timeline(&[(60, 0, 5), (64, 10, 5), (67, 20, 5)]);

        let outcome = harp
            .execute(&t, &PlaybackPosition::start(), &Never, &actuator)
            .unwrap();

        assert_eq!(outcome, ExecOutcome::Finished);
        assert_eq!(actuator.presses(), vec![note(0), note(2), note(4)]);
        assert!(actuator.held().is_empty());
        assert_eq!(actuator.max_held_notes(), 1);
        assert_eq!(harp.active_keybar(), harp.idle_keybar());
    }

    #[test]
    fn test_keybar_changes_and_return_to_idle() {
        let mut harp = instrument("harp", 15);
        let actuator = RecordingActuator::new();
        // Keybar 1, then 2, then 0 (two steps down).
        let t = timeline(&[(64, 0, 5), (79, 5, 5), (48, 10, 5)]);

        harp.execute(&t, &PlaybackPosition::start(), &Never, &actuator)
            .unwrap();

        assert_eq!(
            actuator.presses(),
            vec![
                note(2),
                Action::KeybarUp,
                note(4),
                Action::KeybarDown,
                Action::KeybarDown,
                note(0),
                Action::KeybarUp,
            ]
        );
        assert_eq!(harp.active_keybar(), 1);
        assert!(actuator.held().is_empty());
    }

    #[test]
    fn test_keybar_cooldown_defers_without_dropping() {
        let cooldown = Duration::from_millis(30);
        let mut harp = instrument("harp", 30);
        let actuator = RecordingActuator::new();
        let t = timeline(&[(64, 0, 1), (79, 2, 1), (64, 4, 1), (79, 6, 1)]);

        harp.execute(&t, &PlaybackPosition::start(), &Never, &actuator)
            .unwrap();

        let notes = actuator.presses().into_iter().filter(Action::is_note).count();
        assert_eq!(notes, 4);
        let changes = actuator.keybar_changes();
        assert_eq!(changes.len(), 4);
        for pair in changes.windows(2) {
            assert!(pair[1].duration_since(pair[0]) >= cooldown);
        }
    }

    #[test]
    fn test_preemptive_keybar_change_during_pause() {
        let mut harp = instrument("harp", 15);
        let actuator = RecordingActuator::new();
        let t = timeline(&[(64, 0, 1), (79, 50, 1)]);

        harp.execute(&t, &PlaybackPosition::start(), &Never, &actuator)
            .unwrap();

        let records = actuator.records();
        let up = records
            .iter()
            .find(|r| r.action == Action::KeybarUp && r.kind == ActionKind::Press)
            .unwrap();
        let high = records
            .iter()
            .find(|r| r.action == note(4) && r.kind == ActionKind::Press)
            .unwrap();
        assert!(high.at.duration_since(up.at) >= Duration::from_millis(20));
    }

    #[test]
    fn test_holding_instrument_releases_at_note_end() {
        let mut flute = instrument("flute", 15);
        let actuator = RecordingActuator::new();
        let t = timeline(&[(64, 0, 30), (66, 40, 20)]);

        flute
            .execute(&t, &PlaybackPosition::start(), &Never, &actuator)
            .unwrap();

        let records = actuator.records();
        let kinds: Vec<(Action, ActionKind)> = records.iter().map(|r| (r.action, r.kind)).collect();
        assert_eq!(
            kinds,
            vec![
                (note(0), ActionKind::Press),
                (note(0), ActionKind::Release),
                (note(1), ActionKind::Press),
                (note(1), ActionKind::Release),
            ]
        );
        let held_for = records[1].at.duration_since(records[0].at);
        assert!(held_for >= Duration::from_millis(25));
    }

    #[test]
    fn test_pause_keeps_position() {
        let mut harp = instrument("harp", 15);
        let actuator = RecordingActuator::new();
        let t = timeline(&[(60, 0, 1), (62, 30, 1), (64, 60, 1), (65, 90, 1)]);

        let outcome = harp
            .execute(
                &t,
                &PlaybackPosition::start(),
                &InterruptAt::new(45, Interrupt::Pause),
                &actuator,
            )
            .unwrap();

        let ExecOutcome::Interrupted { reason, position } = outcome else {
            panic!("expected an interrupt");
        };
        assert_eq!(reason, Interrupt::Pause);
        assert_eq!(position.next_event, 2);
        assert!(position.offset_ms >= 40 && position.offset_ms <= 60);
        assert!(actuator.held().is_empty());
        assert_eq!(actuator.presses(), vec![note(0), note(1)]);

        let outcome = harp.execute(&t, &position, &Never, &actuator).unwrap();
        assert_eq!(outcome, ExecOutcome::Finished);
        assert_eq!(actuator.presses(), vec![note(0), note(1), note(2), note(3)]);
    }

    #[test]
    fn test_resume_presses_sustained_note_again() {
        let mut flute = instrument("flute", 15);
        let actuator = RecordingActuator::new();
        let t = timeline(&[(64, 0, 100)]);

        let outcome = flute
            .execute(
                &t,
                &PlaybackPosition::start(),
                &InterruptAt::new(30, Interrupt::Pause),
                &actuator,
            )
            .unwrap();
        let ExecOutcome::Interrupted { position, .. } = outcome else {
            panic!("expected an interrupt");
        };
        assert_eq!(position.next_event, 1);
        assert_eq!(
            position.sustain,
            Some(Sustain {
                key: 64,
                release_at: 100
            })
        );
        assert!(actuator.held().is_empty());

        flute.execute(&t, &position, &Never, &actuator).unwrap();
        assert_eq!(actuator.presses(), vec![note(0), note(0)]);
        assert!(actuator.held().is_empty());
    }

    #[test]
    fn test_stop_mid_note_releases_key() {
        let mut flute = instrument("flute", 15);
        let actuator = RecordingActuator::new();
        let t = timeline(&[(64, 0, 500), (80, 600, 100)]);

        let outcome = flute
            .execute(
                &t,
                &PlaybackPosition::start(),
                &InterruptAt::new(20, Interrupt::Stop),
                &actuator,
            )
            .unwrap();

        assert!(matches!(
            outcome,
            ExecOutcome::Interrupted {
                reason: Interrupt::Stop,
                ..
            }
        ));
        assert!(actuator.held().is_empty());
        assert_eq!(flute.active_keybar(), flute.idle_keybar());
    }

    #[test]
    fn test_interrupt_before_first_note() {
        let mut harp = instrument("harp", 15);
        let actuator = RecordingActuator::new();
        let control = InterruptOnPoll {
            polls: Mutex::new(0),
            on: 1,
        };
        let t = timeline(&[(60, 0, 10)]);

        let outcome = harp
            .execute(&t, &PlaybackPosition::start(), &control, &actuator)
            .unwrap();
        assert!(matches!(outcome, ExecOutcome::Interrupted { .. }));
        assert!(actuator.presses().is_empty());
    }

    #[test]
    fn test_out_of_range_notes_are_skipped() {
        let mut harp = instrument("harp", 15);
        let actuator = RecordingActuator::new();
        let t = timeline(&[(61, 0, 1), (60, 5, 1)]);

        harp.execute(&t, &PlaybackPosition::start(), &Never, &actuator)
            .unwrap();
        assert_eq!(actuator.presses(), vec![note(0)]);
    }

    #[test]
    fn test_actuator_failure_releases_input() {
        let mut flute = instrument("flute", 15);
        let actuator = RecordingActuator::failing_after(1);
        let t = timeline(&[(64, 0, 20), (66, 10, 20)]);

        let result = flute.execute(&t, &PlaybackPosition::start(), &Never, &actuator);
        assert!(result.is_err());
        assert!(actuator.held().is_empty());
        assert!(!flute.is_holding());
    }
}
