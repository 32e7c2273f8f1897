//! MIDI timeline construction.
//!
//! This module turns a Standard MIDI File into a [`Timeline`]: an ordered list of
//! [`NoteEvent`]s with absolute millisecond timestamps and durations. Only note on/off
//! and tempo messages are taken into account.

mod note;
mod tempo;
mod timeline;

pub use note::NoteEvent;
pub use tempo::{TempoMap, TempoSegment, DEFAULT_MICROS_PER_QUARTER};
pub use timeline::{Timeline, TimelineError};

/// Standard MIDI note names for display purposes.
/// Maps MIDI note number (0-127) to note name within an octave.
pub const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Converts a MIDI note number to a human-readable note name with octave.
///
/// # Arguments
///
/// * `note` - MIDI note number (0-127)
///
/// # Returns
///
/// String representation like "C4" or "F#5"
///
/// # Examples
///
/// ```
/// use midiwars::midi::note_to_name;
///
/// let name = note_to_name(60); // Middle C
/// assert_eq!(name, "C4");
/// ```
pub fn note_to_name(note: u8) -> String {
    let octave = (note / 12) as i8 - 1; // MIDI octave convention
    let note_index = (note % 12) as usize;
    format!("{}{}", NOTE_NAMES[note_index], octave)
}

/// Converts a tempo in microseconds per quarter note to beats per minute.
pub fn micros_to_bpm(micros_per_quarter: u32) -> f64 {
    if micros_per_quarter == 0 {
        return 0.0;
    }
    60_000_000.0 / micros_per_quarter as f64
}
