//! Text commands.
//!
//! Front ends read lines like `play song.mid -inst flute` or `/pause` and turn them
//! into [`Command`]s. A leading slash is accepted so chat-style input works unchanged.

use std::str::FromStr;
use thiserror::Error;

/// Help text listing every command.
pub const HELP: &str = "\
Commands:
  play <file|playlist.json> [-inst <name>]     start playing
  canplay <file|playlist.json> [-inst <name>]  check whether files can be played
  pause                                        pause playback
  resume                                       resume paused playback
  stop                                         stop playback
  next                                         skip to the next song
  prev                                         go back to the previous song
  shuffle on|off                               toggle shuffle
  help                                         show this help
  quit                                         exit";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("empty command")]
    Empty,
    #[error("unknown command '{0}', type 'help' for a list")]
    Unknown(String),
    #[error("'{command}' needs {what}")]
    MissingArgument {
        command: &'static str,
        what: &'static str,
    },
    #[error("invalid argument '{value}' for '{command}'")]
    InvalidArgument { command: &'static str, value: String },
}

/// A parsed front-end command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Play {
        query: String,
        instrument: Option<String>,
    },
    CanPlay {
        query: String,
        instrument: Option<String>,
    },
    Pause,
    Resume,
    Stop,
    Next,
    Prev,
    Shuffle(bool),
    Help,
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let line = line.trim();
        let line = line.strip_prefix('/').unwrap_or(line);
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Err(CommandError::Empty);
        };
        let args: Vec<&str> = words.collect();

        match verb.to_ascii_lowercase().as_str() {
            "play" => {
                let (query, instrument) = query_args("play", &args)?;
                Ok(Command::Play { query, instrument })
            }
            "canplay" => {
                let (query, instrument) = query_args("canplay", &args)?;
                Ok(Command::CanPlay { query, instrument })
            }
            "pause" => Ok(Command::Pause),
            "resume" => Ok(Command::Resume),
            "stop" => Ok(Command::Stop),
            "next" => Ok(Command::Next),
            "prev" => Ok(Command::Prev),
            "shuffle" => match args.first().map(|a| a.to_ascii_lowercase()).as_deref() {
                Some("on") => Ok(Command::Shuffle(true)),
                Some("off") => Ok(Command::Shuffle(false)),
                Some(other) => Err(CommandError::InvalidArgument {
                    command: "shuffle",
                    value: other.to_string(),
                }),
                None => Err(CommandError::MissingArgument {
                    command: "shuffle",
                    what: "'on' or 'off'",
                }),
            },
            "help" => Ok(Command::Help),
            "quit" | "exit" => Ok(Command::Quit),
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Command::parse(s)
    }
}

/// Splits `<query words...> [-inst <name>]`. The query may contain spaces.
fn query_args(
    command: &'static str,
    args: &[&str],
) -> Result<(String, Option<String>), CommandError> {
    let mut query = Vec::new();
    let mut instrument = None;
    let mut iter = args.iter();

    while let Some(&arg) = iter.next() {
        if arg.eq_ignore_ascii_case("-inst") {
            let name = iter.next().ok_or(CommandError::MissingArgument {
                command,
                what: "an instrument name after -inst",
            })?;
            instrument = Some(name.to_string());
        } else {
            query.push(arg);
        }
    }

    if query.is_empty() {
        return Err(CommandError::MissingArgument {
            command,
            what: "a file name",
        });
    }
    Ok((query.join(" "), instrument))
}
