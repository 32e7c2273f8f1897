//! Note event representation.
//!
//! A note event is one sounded note: its pitch, absolute start time and duration,
//! both in milliseconds from the start of the timeline.

use serde::{Deserialize, Serialize};

/// A single sounded note with absolute timing.
///
/// Created when a note-on is read, with the duration left open until the matching
/// note-off arrives. Timelines order events by timestamp only, so equal timestamps
/// keep the order they were inserted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteEvent {
    /// MIDI note number (0-127). 60 = Middle C (C4).
    pub key: u8,

    /// Start time in milliseconds from the beginning of the timeline.
    pub timestamp: u64,

    /// Length in milliseconds.
    pub duration: u64,

    /// Tick the note-on was read at, in the source file's resolution.
    pub tick: u64,
}

impl NoteEvent {
    /// Creates a note event with a known duration.
    ///
    /// # Examples
    ///
    /// ```
    /// use midiwars::midi::NoteEvent;
    ///
    /// let note = NoteEvent::new(60, 500, 250);
    /// assert_eq!(note.end(), 750);
    /// ```
    pub fn new(key: u8, timestamp: u64, duration: u64) -> Self {
        Self {
            key: key.min(127),
            timestamp,
            duration,
            tick: 0,
        }
    }

    /// Opens a note at the given tick and time. The duration stays zero until
    /// [`NoteEvent::close`] is called.
    pub(crate) fn open(key: u8, tick: u64, timestamp: u64) -> Self {
        Self {
            key: key.min(127),
            timestamp,
            duration: 0,
            tick,
        }
    }

    /// Finalizes the duration from the note-off time.
    pub(crate) fn close(&mut self, end_ms: u64) {
        self.duration = end_ms.saturating_sub(self.timestamp);
    }

    /// Returns the end time of this note (timestamp + duration).
    pub fn end(&self) -> u64 {
        self.timestamp.saturating_add(self.duration)
    }
}
