//! Dry-run actuator that logs actions instead of injecting them.

use super::{Action, Actuator, InputError, Keymap};
use tracing::info;

/// Logs every action with the key it is bound to.
#[derive(Debug, Clone, Default)]
pub struct LogActuator {
    keymap: Keymap,
}

impl LogActuator {
    /// Creates a logging actuator using the given key bindings.
    pub fn new(keymap: Keymap) -> Self {
        Self { keymap }
    }

    fn key(&self, action: Action) -> &str {
        self.keymap.key_for(action).unwrap_or("<unbound>")
    }
}

impl Actuator for LogActuator {
    fn press(&self, action: Action) -> Result<(), InputError> {
        info!(key = self.key(action), "press {}", action);
        Ok(())
    }

    fn release(&self, action: Action) -> Result<(), InputError> {
        info!(key = self.key(action), "release {}", action);
        Ok(())
    }

    fn block_external_injection(&self, block: bool) -> Result<(), InputError> {
        info!(block, "external input blocking");
        Ok(())
    }
}
