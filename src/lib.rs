//! midiwars - plays MIDI files on in-game instruments.
//!
//! A MIDI file is turned into a timeline of absolute-time note events, checked against
//! the physical limits of an instrument and played back as timed key presses by a
//! background player with playlist and transport controls.

pub mod app;
pub mod command;
pub mod config;
pub mod input;
pub mod instrument;
pub mod midi;
pub mod player;

// Re-export commonly used types
pub use app::{App, AppError, Selection};
pub use command::{Command, CommandError};
pub use config::{Config, ConfigError};
pub use input::{Action, Actuator, InputError, Keymap, LogActuator};
pub use instrument::{Instrument, Profile, Warning};
pub use midi::{NoteEvent, Timeline, TimelineError};
pub use player::{PlayOptions, PlayReport, Player, PlayerError, PlayerEvent, PlayerState};
