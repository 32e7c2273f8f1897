//! Tempo map and tick to millisecond conversion.
//!
//! MIDI files time their events in ticks, and the length of a tick depends on the
//! tempo in effect. The tempo map records every tempo change so that any tick can be
//! converted to absolute milliseconds by integrating over the tempo segments before it.

use serde::{Deserialize, Serialize};

/// Tempo used until the first tempo message (120 BPM).
pub const DEFAULT_MICROS_PER_QUARTER: u32 = 500_000;

/// A tempo in effect from `tick` until the next segment starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TempoSegment {
    /// First tick this tempo applies to.
    pub tick: u64,
    /// Microseconds per quarter note.
    pub micros_per_quarter: u32,
}

impl TempoSegment {
    /// Tempo in beats per minute.
    pub fn bpm(&self) -> f64 {
        super::micros_to_bpm(self.micros_per_quarter)
    }
}

/// Ordered tempo changes of a file, plus its resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TempoMap {
    ticks_per_quarter: u16,
    /// Sorted by tick, at most one segment per tick.
    segments: Vec<TempoSegment>,
}

impl TempoMap {
    /// Creates an empty tempo map. Until a change is pushed the default tempo applies.
    pub fn new(ticks_per_quarter: u16) -> Self {
        Self {
            ticks_per_quarter: ticks_per_quarter.max(1),
            segments: Vec::new(),
        }
    }

    /// Number of ticks per quarter note.
    pub fn ticks_per_quarter(&self) -> u16 {
        self.ticks_per_quarter
    }

    /// Explicit tempo changes, in tick order.
    pub fn segments(&self) -> &[TempoSegment] {
        &self.segments
    }

    /// Records a tempo change. A second change at the same tick replaces the first.
    pub fn push(&mut self, tick: u64, micros_per_quarter: u32) {
        let segment = TempoSegment {
            tick,
            micros_per_quarter,
        };
        match self.segments.binary_search_by_key(&tick, |s| s.tick) {
            Ok(pos) => self.segments[pos] = segment,
            Err(pos) => self.segments.insert(pos, segment),
        }
    }

    /// Converts an absolute tick into milliseconds from the start of the file.
    ///
    /// Sums `ticks_in_segment * micros_per_quarter / ticks_per_quarter` over every tempo
    /// segment before `tick`. The sum is kept in microseconds-times-ticks so the only
    /// rounding is the final floor to whole milliseconds, which makes the result
    /// independent of when it is computed.
    ///
    /// # Examples
    ///
    /// ```
    /// use midiwars::midi::TempoMap;
    ///
    /// let map = TempoMap::new(480);
    /// // One quarter note at the default 120 BPM.
    /// assert_eq!(map.ticks_to_millis(480), 500);
    /// ```
    pub fn ticks_to_millis(&self, tick: u64) -> u64 {
        let mut total: u128 = 0;
        let mut start = 0u64;
        let mut tempo = DEFAULT_MICROS_PER_QUARTER;

        for segment in &self.segments {
            if segment.tick >= tick {
                break;
            }
            total += (segment.tick - start) as u128 * tempo as u128;
            start = segment.tick;
            tempo = segment.micros_per_quarter;
        }
        total += (tick - start) as u128 * tempo as u128;

        let divisor = self.ticks_per_quarter as u128 * 1000;
        (total / divisor) as u64
    }

    /// Returns the tempo segments overlapping the tick range `[from, to]`.
    ///
    /// The first entry is the tempo already in effect at `from` (the implicit default
    /// tempo is reported as a segment at tick 0), followed by every change up to `to`.
    pub fn segments_between(&self, from: u64, to: u64) -> Vec<TempoSegment> {
        let (from, to) = if from <= to { (from, to) } else { (to, from) };

        let current = self
            .segments
            .iter()
            .take_while(|s| s.tick <= from)
            .last()
            .copied()
            .unwrap_or(TempoSegment {
                tick: 0,
                micros_per_quarter: DEFAULT_MICROS_PER_QUARTER,
            });

        let mut out = vec![current];
        out.extend(
            self.segments
                .iter()
                .filter(|s| s.tick > from && s.tick <= to)
                .copied(),
        );
        out
    }
}

impl Default for TempoMap {
    fn default() -> Self {
        Self::new(480)
    }
}
