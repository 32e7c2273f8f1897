//! In-game instruments.
//!
//! Every instrument is the same data-driven [`Instrument`] type, parameterized by a
//! [`Profile`]: its keybars (pitch segments reachable without switching), whether it
//! can hold notes, and its timing constants. Instruments check whether a timeline is
//! feasible and execute timelines as press/release actions.

mod feasibility;
mod playback;

pub use feasibility::Warning;
pub use playback::{ExecOutcome, Interrupt, PlaybackControl, PlaybackPosition, Sustain};

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Amount of time the input needs after a keybar change to take effect (ms).
/// Also the minimum spacing between two note presses.
pub const ROBOT_SLEEP: u64 = 50;

/// Minimum amount of time needed in-between keybar changes (ms).
pub const KEYBAR_COOLDOWN: u64 = 200;

/// Upper limit to a note's duration (ms) on instruments that can't hold notes.
pub const NOTE_DURATION_LIMIT: u64 = 2250;

/// Upper limit to a pause's duration (ms). Longer pauses are probably errors in the file.
pub const PAUSE_DURATION_LIMIT: u64 = 5000;

/// How long a strike keeps its key down (ms).
pub const STRIKE_DURATION: u64 = 20;

/// Longest uninterrupted sleep of the playback loop (ms).
pub const MAX_SLEEP_SLICE: u64 = 25;

/// Errors raised when resolving or building instruments.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InstrumentError {
    #[error("unknown instrument '{0}' (available: harp, flute, magbell)")]
    Unknown(String),
    #[error("invalid instrument profile '{name}': {reason}")]
    InvalidProfile { name: String, reason: String },
}

/// Timing constants of an instrument, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timing {
    pub robot_sleep_ms: u64,
    pub keybar_cooldown_ms: u64,
    pub note_duration_limit_ms: u64,
    pub pause_duration_limit_ms: u64,
    pub strike_ms: u64,
    pub max_sleep_slice_ms: u64,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            robot_sleep_ms: ROBOT_SLEEP,
            keybar_cooldown_ms: KEYBAR_COOLDOWN,
            note_duration_limit_ms: NOTE_DURATION_LIMIT,
            pause_duration_limit_ms: PAUSE_DURATION_LIMIT,
            strike_ms: STRIKE_DURATION,
            max_sleep_slice_ms: MAX_SLEEP_SLICE,
        }
    }
}

impl Timing {
    pub fn robot_sleep(&self) -> Duration {
        Duration::from_millis(self.robot_sleep_ms)
    }

    pub fn keybar_cooldown(&self) -> Duration {
        Duration::from_millis(self.keybar_cooldown_ms)
    }

    pub fn max_sleep_slice(&self) -> Duration {
        Duration::from_millis(self.max_sleep_slice_ms.max(1))
    }

    /// How far ahead the engine looks for a keybar change it could make early.
    pub fn lookahead_ms(&self) -> u64 {
        self.keybar_cooldown_ms * 4
    }

    /// Idle time needed before an upcoming note to switch keybars ahead of it.
    pub fn preemptive_threshold_ms(&self) -> u64 {
        self.keybar_cooldown_ms + self.robot_sleep_ms
    }
}

/// Static description of an instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    name: String,
    can_hold: bool,
    /// Each keybar lists the pitch of every slot, in slot order.
    keybars: Vec<Vec<u8>>,
    idle_keybar: usize,
    timing: Timing,
}

impl Profile {
    /// Names accepted by [`Profile::by_name`].
    pub const NAMES: [&'static str; 3] = ["harp", "flute", "magbell"];

    /// Names of the built-in profiles.
    pub fn names() -> &'static [&'static str] {
        &Self::NAMES
    }

    /// Builds a profile, checking that the idle keybar exists and no keybar is empty.
    pub fn new(
        name: impl Into<String>,
        can_hold: bool,
        keybars: Vec<Vec<u8>>,
        idle_keybar: usize,
        timing: Timing,
    ) -> Result<Self, InstrumentError> {
        let name = name.into();
        let invalid = |reason: &str| InstrumentError::InvalidProfile {
            name: name.clone(),
            reason: reason.to_string(),
        };
        if keybars.is_empty() {
            return Err(invalid("no keybars"));
        }
        if keybars.iter().any(Vec::is_empty) {
            return Err(invalid("empty keybar"));
        }
        if keybars.iter().any(|bar| bar.len() > u8::MAX as usize) {
            return Err(invalid("keybar has too many slots"));
        }
        if idle_keybar >= keybars.len() {
            return Err(invalid("idle keybar out of bounds"));
        }
        Ok(Self {
            name,
            can_hold,
            keybars,
            idle_keybar,
            timing,
        })
    }

    /// The Musical Harp, tuned in C major [C3, C6].
    pub fn harp() -> Self {
        Self {
            name: "harp".to_string(),
            can_hold: false,
            keybars: vec![
                vec![48, 50, 52, 53, 55, 57, 59, 60],
                vec![60, 62, 64, 65, 67, 69, 71, 72],
                vec![72, 74, 76, 77, 79, 81, 83, 84],
            ],
            idle_keybar: 1,
            timing: Timing::default(),
        }
    }

    /// The Flute, tuned in E major [E4, E6]. Holds notes.
    pub fn flute() -> Self {
        Self {
            name: "flute".to_string(),
            can_hold: true,
            keybars: vec![
                vec![64, 66, 68, 69, 71, 73, 75, 76],
                vec![76, 78, 80, 81, 83, 85, 87, 88],
            ],
            idle_keybar: 0,
            timing: Timing::default(),
        }
    }

    /// The Magnanimous Choir Bell, tuned in C major [C5, C7].
    pub fn magbell() -> Self {
        Self {
            name: "magbell".to_string(),
            can_hold: false,
            keybars: vec![
                vec![72, 74, 76, 77, 79, 81, 83, 84],
                vec![84, 86, 88, 89, 91, 93, 95, 96],
            ],
            idle_keybar: 0,
            timing: Timing::default(),
        }
    }

    /// Resolves an instrument name (case-insensitive) to its profile.
    pub fn by_name(name: &str) -> Result<Self, InstrumentError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "harp" => Ok(Self::harp()),
            "flute" => Ok(Self::flute()),
            "magbell" => Ok(Self::magbell()),
            _ => Err(InstrumentError::Unknown(name.to_string())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn can_hold(&self) -> bool {
        self.can_hold
    }

    pub fn keybars(&self) -> &[Vec<u8>] {
        &self.keybars
    }

    pub fn idle_keybar(&self) -> usize {
        self.idle_keybar
    }

    pub fn timing(&self) -> &Timing {
        &self.timing
    }

    /// Returns true if any keybar can play `key`.
    pub fn in_range(&self, key: u8) -> bool {
        self.keybars.iter().any(|bar| bar.contains(&key))
    }

    /// Keybar to play `key` from, preferring `active` and otherwise the closest one
    /// (fewest switches). `None` if the key is out of range.
    pub fn keybar_for(&self, key: u8, active: usize) -> Option<usize> {
        if self.keybars.get(active).is_some_and(|bar| bar.contains(&key)) {
            return Some(active);
        }
        self.keybars
            .iter()
            .enumerate()
            .filter(|(_, bar)| bar.contains(&key))
            .map(|(index, _)| index)
            .min_by_key(|&index| index.abs_diff(active))
    }

    /// Slot of `key` within the given keybar.
    pub fn slot_of(&self, keybar: usize, key: u8) -> Option<u8> {
        self.keybars
            .get(keybar)?
            .iter()
            .position(|&k| k == key)
            .map(|slot| slot as u8)
    }
}

/// A note key currently held down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Held {
    slot: u8,
    key: u8,
    /// Timeline time (ms) at which the key must be released.
    release_at: u64,
}

/// A playable instrument: a profile plus the mutable keybar state of one session.
#[derive(Debug, Clone)]
pub struct Instrument {
    profile: Arc<Profile>,
    active_keybar: usize,
    last_keybar_change: Option<Instant>,
    last_note_press: Option<Instant>,
    held: Option<Held>,
}

impl Instrument {
    /// Creates an instrument resting on its idle keybar.
    pub fn new(profile: Profile) -> Self {
        let active_keybar = profile.idle_keybar;
        Self {
            profile: Arc::new(profile),
            active_keybar,
            last_keybar_change: None,
            last_note_press: None,
            held: None,
        }
    }

    /// Resolves a name to a new instrument.
    ///
    /// # Examples
    ///
    /// ```
    /// use midiwars::instrument::Instrument;
    ///
    /// let harp = Instrument::by_name("harp").unwrap();
    /// assert!(!harp.can_hold());
    /// assert!(Instrument::by_name("kazoo").is_err());
    /// ```
    pub fn by_name(name: &str) -> Result<Self, InstrumentError> {
        Profile::by_name(name).map(Self::new)
    }

    /// Replaces the timing constants.
    pub fn with_timing(mut self, timing: Timing) -> Self {
        Arc::make_mut(&mut self.profile).timing = timing;
        self
    }

    /// Overrides only the keybar cooldown.
    pub fn with_keybar_cooldown(self, cooldown_ms: u64) -> Self {
        let timing = Timing {
            keybar_cooldown_ms: cooldown_ms,
            ..self.profile.timing
        };
        self.with_timing(timing)
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    pub fn name(&self) -> &str {
        self.profile.name()
    }

    pub fn can_hold(&self) -> bool {
        self.profile.can_hold
    }

    pub fn timing(&self) -> &Timing {
        &self.profile.timing
    }

    pub fn active_keybar(&self) -> usize {
        self.active_keybar
    }

    pub fn idle_keybar(&self) -> usize {
        self.profile.idle_keybar
    }

    /// Pitches playable without switching keybars.
    pub fn key_range(&self) -> &[u8] {
        &self.profile.keybars[self.active_keybar]
    }

    /// Returns true if a note key is currently held down.
    pub fn is_holding(&self) -> bool {
        self.held.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory() {
        for name in Profile::NAMES {
            let instrument = Instrument::by_name(name).unwrap();
            assert_eq!(instrument.name(), name);
            assert_eq!(instrument.active_keybar(), instrument.idle_keybar());
        }
        assert!(Instrument::by_name("FLUTE").unwrap().can_hold());
        assert_eq!(
            Instrument::by_name("lute").unwrap_err(),
            InstrumentError::Unknown("lute".to_string())
        );
    }

    #[test]
    fn test_keybar_for_prefers_active() {
        let harp = Profile::harp();
        // 60 sits on both keybar 0 and 1.
        assert_eq!(harp.keybar_for(60, 0), Some(0));
        assert_eq!(harp.keybar_for(60, 1), Some(1));
        assert_eq!(harp.keybar_for(60, 2), Some(1));
        assert_eq!(harp.keybar_for(48, 2), Some(0));
        // Sharps are not on a C major harp.
        assert_eq!(harp.keybar_for(61, 1), None);
    }

    #[test]
    fn test_slot_of() {
        let flute = Profile::flute();
        assert_eq!(flute.slot_of(0, 64), Some(0));
        assert_eq!(flute.slot_of(1, 88), Some(7));
        assert_eq!(flute.slot_of(0, 88), None);
        assert_eq!(flute.slot_of(5, 64), None);
    }

    #[test]
    fn test_in_range_is_union_of_keybars() {
        let magbell = Profile::magbell();
        assert!(magbell.in_range(72));
        assert!(magbell.in_range(96));
        assert!(!magbell.in_range(71));
        assert!(!magbell.in_range(73));
    }

    #[test]
    fn test_invalid_profiles() {
        assert!(Profile::new("x", false, vec![], 0, Timing::default()).is_err());
        assert!(Profile::new("x", false, vec![vec![60]], 1, Timing::default()).is_err());
        assert!(Profile::new("x", false, vec![vec![60], vec![]], 0, Timing::default()).is_err());
        let ok = Profile::new("x", true, vec![vec![60, 62]], 0, Timing::default()).unwrap();
        assert_eq!(Instrument::new(ok).key_range(), &[60, 62]);
    }

    #[test]
    fn test_cooldown_override() {
        let harp = Instrument::by_name("harp").unwrap().with_keybar_cooldown(120);
        assert_eq!(harp.timing().keybar_cooldown_ms, 120);
        assert_eq!(harp.timing().robot_sleep_ms, ROBOT_SLEEP);
        assert_eq!(harp.timing().preemptive_threshold_ms(), 170);
    }
}
