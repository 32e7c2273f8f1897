//! Input actuation.
//!
//! The playback engine never talks to the host directly. It emits [`Action`]s
//! through an [`Actuator`], which turns them into key presses in whatever way the
//! host environment allows. Actuators are shared between the player and its worker
//! thread, so all methods take `&self`.

mod keymap;
mod logger;
mod recording;

pub use keymap::Keymap;
pub use logger::LogActuator;
pub use recording::{ActionKind, Record, RecordingActuator};

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::warn;

/// A single input an instrument can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Action {
    /// Plays the note in the given slot of the active keybar.
    Note { slot: u8 },
    /// Shifts to the next higher keybar.
    KeybarUp,
    /// Shifts to the next lower keybar.
    KeybarDown,
}

impl Action {
    /// Returns true for actions that sound a note.
    pub fn is_note(&self) -> bool {
        matches!(self, Action::Note { .. })
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Note { slot } => write!(f, "note slot {}", slot + 1),
            Action::KeybarUp => write!(f, "keybar up"),
            Action::KeybarDown => write!(f, "keybar down"),
        }
    }
}

/// Failure reported by an actuator.
#[derive(Debug, Error)]
pub enum InputError {
    /// The host rejected or failed to deliver the input.
    #[error("failed to {verb} {action}: {reason}")]
    Rejected {
        verb: &'static str,
        action: Action,
        reason: String,
    },
    /// Injection blocking could not be toggled.
    #[error("failed to toggle input blocking: {0}")]
    Blocking(String),
}

/// Executes press/release actions against the host environment.
pub trait Actuator: Send + Sync {
    /// Presses the key bound to `action`.
    fn press(&self, action: Action) -> Result<(), InputError>;

    /// Releases the key bound to `action`.
    fn release(&self, action: Action) -> Result<(), InputError>;

    /// Blocks (or unblocks) key events injected from outside while a session plays,
    /// so the user's own key-ups do not cut held notes short.
    fn block_external_injection(&self, block: bool) -> Result<(), InputError>;
}

/// Keeps external injection blocked for as long as it is alive.
///
/// Unblocking happens in `Drop`, so every exit path of a playback session
/// (completion, cancellation, error or panic unwinding) lifts the block.
pub struct InjectionBlock<'a> {
    actuator: &'a dyn Actuator,
    active: bool,
}

impl<'a> InjectionBlock<'a> {
    /// Blocks external injection. A failure is logged and playback continues unblocked.
    pub fn acquire(actuator: &'a dyn Actuator) -> Self {
        let active = match actuator.block_external_injection(true) {
            Ok(()) => true,
            Err(e) => {
                warn!("Could not block external input: {}", e);
                false
            }
        };
        Self { actuator, active }
    }

    /// Returns true if the block was actually put in place.
    pub fn is_active(&self) -> bool {
        self.active
    }
}

impl Drop for InjectionBlock<'_> {
    fn drop(&mut self) {
        if self.active {
            if let Err(e) = self.actuator.block_external_injection(false) {
                warn!("Could not unblock external input: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_injection_block_is_scoped() {
        let actuator = RecordingActuator::new();
        {
            let guard = InjectionBlock::acquire(&actuator);
            assert!(guard.is_active());
            assert_eq!(actuator.injection_depth(), 1);
        }
        assert_eq!(actuator.injection_depth(), 0);
        assert_eq!(actuator.max_injection_depth(), 1);
    }

    #[test]
    fn test_action_display() {
        assert_eq!(Action::Note { slot: 0 }.to_string(), "note slot 1");
        assert_eq!(Action::KeybarUp.to_string(), "keybar up");
        assert!(Action::Note { slot: 3 }.is_note());
        assert!(!Action::KeybarDown.is_note());
    }
}
