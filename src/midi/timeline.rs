//! Standard MIDI File (SMF) timeline construction.
//!
//! Reads .mid and .midi files into a [`Timeline`] of absolute-time note events.
//! Supports SMF Format 0 (single track) and Format 1 (multi-track) files.
//!
//! # Limitations
//!
//! - Only note on/off and tempo events are read
//! - All channels are merged; pitch is the only note identity
//! - SMPTE timecode timing and Format 2 files are rejected

use super::note::NoteEvent;
use super::tempo::{TempoMap, TempoSegment};
use super::note_to_name;
use midly::{Format, MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, trace};

/// Errors that can occur while building a timeline.
#[derive(Debug, Error)]
pub enum TimelineError {
    /// File could not be read.
    #[error("could not read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The data is not a structurally valid MIDI file (bad header, truncated stream).
    #[error("malformed MIDI data: {0}")]
    Malformed(#[from] midly::Error),
    /// Valid MIDI that this player does not handle.
    #[error("unsupported MIDI file: {0}")]
    Unsupported(String),
}

/// A fully resolved performance: note events sorted by start time and the tempo map
/// used to place them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Timeline {
    events: Vec<NoteEvent>,
    tempo_map: TempoMap,
}

impl Timeline {
    /// Reads and parses a MIDI file.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, TimelineError> {
        let path = path.as_ref();
        let data = fs::read(path).map_err(|source| TimelineError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let timeline = Self::parse(&data)?;
        debug!(
            path = %path.display(),
            notes = timeline.len(),
            duration_ms = timeline.duration_ms(),
            "built timeline"
        );
        Ok(timeline)
    }

    /// Builds a timeline from raw SMF bytes.
    ///
    /// Events from every track are merged in tick order before being walked, so tempo
    /// changes stored in a separate tempo track apply to the notes of all tracks.
    pub fn parse(data: &[u8]) -> Result<Self, TimelineError> {
        let smf = Smf::parse(data)?;

        let ticks_per_quarter = match smf.header.timing {
            Timing::Metrical(tpq) => tpq.as_int(),
            Timing::Timecode(_, _) => {
                return Err(TimelineError::Unsupported(
                    "SMPTE timecode timing not supported".to_string(),
                ))
            }
        };
        if smf.header.format == Format::Sequential {
            return Err(TimelineError::Unsupported(
                "Format 2 (sequential) MIDI files not supported".to_string(),
            ));
        }

        // Absolute tick for every event of every track.
        let mut stream = Vec::new();
        for track in &smf.tracks {
            let mut tick = 0u64;
            for event in track {
                tick += event.delta.as_int() as u64;
                stream.push((tick, event.kind));
            }
        }
        // Stable, so simultaneous events keep track order.
        stream.sort_by_key(|(tick, _)| *tick);

        let mut builder = TimelineBuilder::new(ticks_per_quarter);
        let mut last_tick = 0;
        for (tick, kind) in stream {
            last_tick = tick;
            match kind {
                TrackEventKind::Meta(MetaMessage::Tempo(tempo)) => {
                    builder.tempo(tick, tempo.as_int());
                }
                TrackEventKind::Midi { message, .. } => match message {
                    MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                        builder.note_on(tick, key.as_int());
                    }
                    // Note on with velocity 0 = note off
                    MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => {
                        builder.note_off(tick, key.as_int());
                    }
                    _ => {} // Ignore other MIDI messages
                },
                _ => {} // Ignore SysEx and other meta events
            }
        }

        Ok(builder.finish(last_tick))
    }

    /// Builds a timeline directly from note events, at the default tempo.
    pub fn from_events(mut events: Vec<NoteEvent>) -> Self {
        events.sort_by_key(|e| e.timestamp);
        Self {
            events,
            tempo_map: TempoMap::default(),
        }
    }

    /// Note events in ascending timestamp order.
    pub fn events(&self) -> &[NoteEvent] {
        &self.events
    }

    /// Tempo changes of the source file.
    pub fn tempo_map(&self) -> &TempoMap {
        &self.tempo_map
    }

    /// Tempo segments overlapping the given tick range.
    pub fn tempos_between(&self, from_tick: u64, to_tick: u64) -> Vec<TempoSegment> {
        self.tempo_map.segments_between(from_tick, to_tick)
    }

    /// Number of note events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns true if the timeline holds no notes.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Time at which the last note stops sounding.
    pub fn duration_ms(&self) -> u64 {
        self.events.iter().map(NoteEvent::end).max().unwrap_or(0)
    }
}

/// Incremental state while walking a merged event stream.
struct TimelineBuilder {
    tempo_map: TempoMap,
    events: Vec<NoteEvent>,
    /// Open notes by pitch, as an index into `events`.
    pending: HashMap<u8, usize>,
}

impl TimelineBuilder {
    fn new(ticks_per_quarter: u16) -> Self {
        Self {
            tempo_map: TempoMap::new(ticks_per_quarter),
            events: Vec::new(),
            pending: HashMap::new(),
        }
    }

    fn tempo(&mut self, tick: u64, micros_per_quarter: u32) {
        if micros_per_quarter > 0 {
            self.tempo_map.push(tick, micros_per_quarter);
        }
    }

    fn note_on(&mut self, tick: u64, key: u8) {
        let now = self.tempo_map.ticks_to_millis(tick);

        // A retrigger ends the note still sounding on the same pitch.
        if let Some(index) = self.pending.remove(&key) {
            trace!(key = %note_to_name(key), tick, "retriggered open note");
            self.events[index].close(now);
        }

        self.pending.insert(key, self.events.len());
        self.events.push(NoteEvent::open(key, tick, now));
    }

    fn note_off(&mut self, tick: u64, key: u8) {
        match self.pending.remove(&key) {
            Some(index) => {
                let now = self.tempo_map.ticks_to_millis(tick);
                self.events[index].close(now);
            }
            None => trace!(key = %note_to_name(key), tick, "note off without note on"),
        }
    }

    fn finish(mut self, end_tick: u64) -> Timeline {
        // Close any remaining open notes (in case the MIDI file is incomplete)
        let end = self.tempo_map.ticks_to_millis(end_tick);
        for (_, index) in self.pending.drain() {
            self.events[index].close(end);
        }

        self.events.sort_by_key(|e| e.timestamp);
        Timeline {
            events: self.events,
            tempo_map: self.tempo_map,
        }
    }
}
