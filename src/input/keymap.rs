//! Host key bindings for instrument actions.

use super::Action;
use serde::{Deserialize, Serialize};

/// Maps actions to the names of the host keys bound to them.
///
/// The defaults follow the in-game skill bar: slots on numpad 1-8, keybar up on
/// numpad 9 and keybar down on numpad 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Keymap {
    /// Key per keybar slot, in slot order.
    pub slots: Vec<String>,
    /// Key that shifts to the next higher keybar.
    pub keybar_up: String,
    /// Key that shifts to the next lower keybar.
    pub keybar_down: String,
}

impl Default for Keymap {
    fn default() -> Self {
        Self {
            slots: (1..=8).map(|n| format!("numpad{}", n)).collect(),
            keybar_up: "numpad9".to_string(),
            keybar_down: "numpad0".to_string(),
        }
    }
}

impl Keymap {
    /// Returns the key bound to an action, if any.
    pub fn key_for(&self, action: Action) -> Option<&str> {
        match action {
            Action::Note { slot } => self.slots.get(slot as usize).map(String::as_str),
            Action::KeybarUp => Some(&self.keybar_up),
            Action::KeybarDown => Some(&self.keybar_down),
        }
    }
}
