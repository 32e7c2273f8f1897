//! Actuator that records what it was asked to do.
//!
//! Used to check playback without a host: every press and release is stored with
//! the instant it happened, and the set of currently held keys is tracked.

use super::{Action, Actuator, InputError};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::time::Instant;

/// Whether a record is a press or a release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Press,
    Release,
}

/// One recorded input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record {
    pub action: Action,
    pub kind: ActionKind,
    pub at: Instant,
}

#[derive(Debug, Default)]
struct Inner {
    records: Vec<Record>,
    held: BTreeSet<Action>,
    max_held_notes: usize,
    injection_depth: usize,
    max_injection_depth: usize,
    /// Presses left before every further press fails.
    presses_until_failure: Option<usize>,
}

/// Records every action instead of performing it.
#[derive(Debug, Default)]
pub struct RecordingActuator {
    inner: Mutex<Inner>,
}

impl RecordingActuator {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a recorder whose presses fail once `presses` presses have succeeded.
    pub fn failing_after(presses: usize) -> Self {
        let recorder = Self::default();
        recorder.inner.lock().presses_until_failure = Some(presses);
        recorder
    }

    /// Everything recorded so far, in order.
    pub fn records(&self) -> Vec<Record> {
        self.inner.lock().records.clone()
    }

    /// Pressed actions, in order.
    pub fn presses(&self) -> Vec<Action> {
        self.inner
            .lock()
            .records
            .iter()
            .filter(|r| r.kind == ActionKind::Press)
            .map(|r| r.action)
            .collect()
    }

    /// Instants at which keybar changes were pressed.
    pub fn keybar_changes(&self) -> Vec<Instant> {
        self.inner
            .lock()
            .records
            .iter()
            .filter(|r| r.kind == ActionKind::Press && !r.action.is_note())
            .map(|r| r.at)
            .collect()
    }

    /// Keys currently held down.
    pub fn held(&self) -> BTreeSet<Action> {
        self.inner.lock().held.clone()
    }

    /// Largest number of note keys that were ever held at the same time.
    pub fn max_held_notes(&self) -> usize {
        self.inner.lock().max_held_notes
    }

    /// Number of sessions currently blocking external injection.
    pub fn injection_depth(&self) -> usize {
        self.inner.lock().injection_depth
    }

    /// Largest number of sessions that ever blocked injection at the same time.
    pub fn max_injection_depth(&self) -> usize {
        self.inner.lock().max_injection_depth
    }
}

impl Actuator for RecordingActuator {
    fn press(&self, action: Action) -> Result<(), InputError> {
        let mut inner = self.inner.lock();
        if let Some(left) = inner.presses_until_failure.as_mut() {
            if *left == 0 {
                return Err(InputError::Rejected {
                    verb: "press",
                    action,
                    reason: "recorder configured to fail".to_string(),
                });
            }
            *left -= 1;
        }

        inner.records.push(Record {
            action,
            kind: ActionKind::Press,
            at: Instant::now(),
        });
        inner.held.insert(action);
        let held_notes = inner.held.iter().filter(|a| a.is_note()).count();
        inner.max_held_notes = inner.max_held_notes.max(held_notes);
        Ok(())
    }

    fn release(&self, action: Action) -> Result<(), InputError> {
        let mut inner = self.inner.lock();
        inner.records.push(Record {
            action,
            kind: ActionKind::Release,
            at: Instant::now(),
        });
        inner.held.remove(&action);
        Ok(())
    }

    fn block_external_injection(&self, block: bool) -> Result<(), InputError> {
        let mut inner = self.inner.lock();
        if block {
            inner.injection_depth += 1;
            inner.max_injection_depth = inner.max_injection_depth.max(inner.injection_depth);
        } else {
            inner.injection_depth = inner.injection_depth.saturating_sub(1);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracks_held_keys() {
        let recorder = RecordingActuator::new();
        recorder.press(Action::Note { slot: 2 }).unwrap();
        recorder.press(Action::KeybarUp).unwrap();
        assert_eq!(recorder.held().len(), 2);
        assert_eq!(recorder.max_held_notes(), 1);

        recorder.release(Action::Note { slot: 2 }).unwrap();
        recorder.release(Action::KeybarUp).unwrap();
        assert!(recorder.held().is_empty());
        assert_eq!(recorder.keybar_changes().len(), 1);
        assert_eq!(recorder.records().len(), 4);
    }

    #[test]
    fn test_failing_after() {
        let recorder = RecordingActuator::failing_after(1);
        assert!(recorder.press(Action::Note { slot: 0 }).is_ok());
        assert!(recorder.press(Action::Note { slot: 1 }).is_err());
        assert_eq!(recorder.presses(), vec![Action::Note { slot: 0 }]);
    }
}
