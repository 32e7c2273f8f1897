//! Feasibility checks of a timeline against an instrument's physical limits.

use super::Instrument;
use crate::midi::{micros_to_bpm, note_to_name, NoteEvent, Timeline};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use tracing::debug;

/// A feasibility finding for a (timeline, instrument) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Warning {
    /// Some notes can't be played by this instrument. Blocks playback.
    NotInRange,
    /// Some notes last too long for an instrument that can't hold them.
    NotesTooLong,
    /// Some silences are long enough to suggest an error in the file.
    PausesTooLong,
    /// Notes or keybar changes follow each other faster than the instrument can act.
    TempoTooFast,
}

impl Warning {
    /// Returns true if this warning prevents playback.
    pub fn is_blocking(&self) -> bool {
        matches!(self, Warning::NotInRange)
    }

    /// Explanation suitable for showing to the user.
    pub fn explanation(&self) -> &'static str {
        match self {
            Warning::NotInRange => {
                "This file contains notes that this instrument can not play."
            }
            Warning::NotesTooLong => {
                "This file contains notes that are too long - they will probably be played twice. Lower their duration for smoother playback."
            }
            Warning::PausesTooLong => {
                "This file contains pauses that are too long - probably due to an error in the file."
            }
            Warning::TempoTooFast => {
                "This file's tempo is too fast - playback will probably be hindered. Lower the tempo for smoother playback."
            }
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Warning::NotInRange => "NOT_IN_RANGE",
            Warning::NotesTooLong => "NOTES_TOO_LONG",
            Warning::PausesTooLong => "PAUSES_TOO_LONG",
            Warning::TempoTooFast => "TEMPO_TOO_FAST",
        };
        f.write_str(name)
    }
}

impl Instrument {
    /// Checks how well this instrument can play the given timeline.
    ///
    /// Pure: neither the instrument's keybar state nor the timeline is touched. The
    /// keybar walk needed for the tempo check is simulated on local state starting
    /// from the idle keybar.
    pub fn check_feasibility(&self, timeline: &Timeline) -> BTreeSet<Warning> {
        let profile = self.profile();
        let timing = profile.timing();
        let mut warnings = BTreeSet::new();

        let mut active = profile.idle_keybar();
        let mut last_change: Option<u64> = None;
        let mut previous: Option<&NoteEvent> = None;
        let mut sounding_until: Option<u64> = None;

        for event in timeline.events() {
            if !profile.in_range(event.key) {
                warnings.insert(Warning::NotInRange);
            }

            if !profile.can_hold() && event.duration > timing.note_duration_limit_ms {
                warnings.insert(Warning::NotesTooLong);
            }

            if let Some(end) = sounding_until {
                if event.timestamp.saturating_sub(end) > timing.pause_duration_limit_ms {
                    warnings.insert(Warning::PausesTooLong);
                }
            }
            sounding_until = Some(sounding_until.unwrap_or(0).max(event.end()));

            if !warnings.contains(&Warning::TempoTooFast)
                && self.is_too_fast(previous, event, &mut active, &mut last_change)
            {
                if let Some(prev) = previous {
                    let tempos = timeline.tempos_between(prev.tick, event.tick);
                    debug!(
                        key = %note_to_name(event.key),
                        at_ms = event.timestamp,
                        bpm = ?tempos.iter().map(|t| micros_to_bpm(t.micros_per_quarter)).collect::<Vec<_>>(),
                        "tempo too fast"
                    );
                }
                warnings.insert(Warning::TempoTooFast);
            }

            if profile.in_range(event.key) {
                previous = Some(event);
            }
        }

        warnings
    }

    /// Returns true unless some note is out of this instrument's range.
    pub fn can_play(&self, timeline: &Timeline) -> bool {
        !self.check_feasibility(timeline).contains(&Warning::NotInRange)
    }

    /// Decides whether `event` follows `previous` faster than the instrument can act,
    /// advancing the simulated keybar state.
    fn is_too_fast(
        &self,
        previous: Option<&NoteEvent>,
        event: &NoteEvent,
        active: &mut usize,
        last_change: &mut Option<u64>,
    ) -> bool {
        let profile = self.profile();
        let timing = profile.timing();

        let Some(keybar) = profile.keybar_for(event.key, *active) else {
            return false;
        };

        // Chords are played back to back; only distinct onsets count.
        let gap = previous
            .filter(|prev| prev.timestamp != event.timestamp)
            .map(|prev| event.timestamp - prev.timestamp);
        if gap.is_some_and(|gap| gap < timing.robot_sleep_ms) {
            return true;
        }

        if keybar == *active {
            return false;
        }

        let steps = keybar.abs_diff(*active) as u64;
        if let Some(last) = *last_change {
            if event.timestamp.saturating_sub(last) < steps * timing.keybar_cooldown_ms {
                return true;
            }
        }

        // The switch can only start once the previous note is done with its key.
        let ready_at = previous.map(|prev| {
            if profile.can_hold() {
                prev.end()
            } else {
                prev.timestamp
            }
        });
        if let (Some(prev), Some(ready)) = (previous, ready_at) {
            if prev.timestamp != event.timestamp && event.timestamp < ready + timing.robot_sleep_ms
            {
                return true;
            }
        }

        *last_change = Some(ready_at.unwrap_or(event.timestamp));
        *active = keybar;
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timeline(notes: &[(u8, u64, u64)]) -> Timeline {
        Timeline::from_events(
            notes
                .iter()
                .map(|&(key, ts, dur)| NoteEvent::new(key, ts, dur))
                .collect(),
        )
    }

    fn harp() -> Instrument {
        Instrument::by_name("harp").unwrap()
    }

    #[test]
    fn test_clean_timeline_has_no_warnings() {
        let t = timeline(&[(60, 0, 400), (62, 500, 400), (64, 1000, 400), (65, 1500, 400)]);
        assert!(harp().check_feasibility(&t).is_empty());
        assert!(harp().can_play(&t));
    }

    #[test]
    fn test_not_in_range_iff_out_of_union() {
        let with_sharp = timeline(&[(60, 0, 100), (61, 500, 100), (64, 1000, 100)]);
        let warnings = harp().check_feasibility(&with_sharp);
        assert!(warnings.contains(&Warning::NotInRange));
        assert!(!harp().can_play(&with_sharp));

        let without = timeline(&[(60, 0, 100), (64, 1000, 100)]);
        assert!(!harp().check_feasibility(&without).contains(&Warning::NotInRange));
        assert!(harp().can_play(&without));

        // Keys on other keybars are still in range.
        let spread = timeline(&[(48, 0, 100), (84, 1000, 100)]);
        assert!(harp().can_play(&spread));
    }

    #[test]
    fn test_notes_too_long_only_for_strike_instruments() {
        let long = timeline(&[(64, 0, 3000)]);
        assert!(harp().check_feasibility(&long).contains(&Warning::NotesTooLong));
        let flute = Instrument::by_name("flute").unwrap();
        assert!(!flute.check_feasibility(&long).contains(&Warning::NotesTooLong));
    }

    #[test]
    fn test_pauses_too_long() {
        let gap = timeline(&[(60, 0, 500), (62, 5600, 100)]);
        assert!(harp().check_feasibility(&gap).contains(&Warning::PausesTooLong));

        // A long note covers the silence.
        let covered = timeline(&[(60, 0, 2000), (64, 100, 100), (62, 6000, 100)]);
        assert!(!harp()
            .check_feasibility(&covered)
            .contains(&Warning::PausesTooLong));
    }

    #[test]
    fn test_tempo_too_fast_on_close_onsets() {
        let fast = timeline(&[(60, 0, 10), (62, 20, 10)]);
        assert!(harp().check_feasibility(&fast).contains(&Warning::TempoTooFast));

        let chord = timeline(&[(60, 0, 100), (64, 0, 100), (67, 0, 100)]);
        assert!(!harp().check_feasibility(&chord).contains(&Warning::TempoTooFast));
    }

    #[test]
    fn test_tempo_too_fast_on_keybar_cooldown() {
        // Keybar 1 -> 2 -> 1 with only 120ms between the two changes.
        let bouncing = timeline(&[(64, 0, 20), (79, 60, 20), (64, 120, 20)]);
        assert!(harp()
            .check_feasibility(&bouncing)
            .contains(&Warning::TempoTooFast));

        let relaxed = timeline(&[(64, 0, 50), (79, 300, 50), (64, 800, 50)]);
        assert!(!harp()
            .check_feasibility(&relaxed)
            .contains(&Warning::TempoTooFast));
    }

    #[test]
    fn test_hold_instrument_needs_time_after_note_end() {
        let flute = Instrument::by_name("flute").unwrap();
        // The second note needs keybar 1 but the first note is held until 500.
        let legato = timeline(&[(64, 0, 500), (80, 520, 100)]);
        assert!(flute.check_feasibility(&legato).contains(&Warning::TempoTooFast));

        let detached = timeline(&[(64, 0, 300), (80, 520, 100)]);
        assert!(!flute
            .check_feasibility(&detached)
            .contains(&Warning::TempoTooFast));
    }

    #[test]
    fn test_check_is_pure() {
        let t = timeline(&[(60, 0, 10), (61, 20, 3000), (84, 9000, 10)]);
        let instrument = harp();
        let before = t.clone();
        let first = instrument.check_feasibility(&t);
        let second = instrument.check_feasibility(&t);
        assert_eq!(first, second);
        assert_eq!(t, before);
        assert_eq!(instrument.active_keybar(), instrument.idle_keybar());
    }

    #[test]
    fn test_warning_display() {
        assert_eq!(Warning::NotInRange.to_string(), "NOT_IN_RANGE");
        assert!(Warning::NotInRange.is_blocking());
        assert!(!Warning::TempoTooFast.is_blocking());
        assert!(!Warning::PausesTooLong.explanation().is_empty());
    }
}
