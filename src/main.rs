//! midiwars - plays MIDI files on in-game instruments.
//!
//! Terminal front end: an optional `check` or `play` subcommand, followed by an
//! interactive command loop on stdin.
//!
//! # Usage
//!
//! ```bash
//! midiwars                                  # command loop only
//! midiwars check song.mid --instrument flute
//! midiwars play playlist.json
//! ```
//!
//! Type `help` in the command loop for the list of commands. Set `RUST_LOG=info` to
//! see every emitted key action.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use midiwars::command::HELP;
use midiwars::config::CONFIG_FILE;
use midiwars::player::{FileStatus, PlayReport};
use midiwars::{App, Command, Config, LogActuator, PlayerError, PlayerEvent, PlayerState};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Parser)]
#[command(author, version, about = "Plays MIDI files on in-game instruments")]
struct Cli {
    /// Path to the configuration file (created with defaults if missing).
    #[arg(long, default_value = CONFIG_FILE)]
    config: PathBuf,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Check whether a file or playlist can be played, then exit.
    Check(QueryArgs),
    /// Start playing a file or playlist, then read commands from stdin.
    Play(QueryArgs),
}

#[derive(Args)]
struct QueryArgs {
    /// MIDI file or JSON playlist, relative to the MIDI directory.
    query: String,
    /// Instrument to use instead of the configured default.
    #[arg(long, short)]
    instrument: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so they don't interleave with command output
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load_or_create(&cli.config).with_context(|| {
        format!(
            "Failed to load configuration from {}",
            cli.config.display()
        )
    })?;
    let actuator = Arc::new(LogActuator::new(config.keymap.clone()));
    let app = App::new(config, actuator);

    match cli.command {
        Some(Commands::Check(args)) => {
            check(&app, &args.query, args.instrument.as_deref())?;
            return Ok(());
        }
        Some(Commands::Play(args)) => {
            if let Err(e) = start(&app, &args.query, args.instrument.as_deref()) {
                println!("Error: {:#}", e);
            }
        }
        None => {}
    }

    report_events(&app);
    command_loop(&app)
}

/// Prints player notifications as they arrive.
fn report_events(app: &App) {
    let events = app.player().events();
    thread::spawn(move || {
        for event in events {
            match event {
                PlayerEvent::SongStarted { path } => println!("Now playing {}", path.display()),
                PlayerEvent::SongFinished { .. } => {}
                PlayerEvent::SongFailed { path, error } => {
                    println!("Playback of {} failed: {}", path.display(), error)
                }
                PlayerEvent::PlaylistFinished => println!("Playlist finished"),
            }
        }
    });
}

fn command_loop(app: &App) -> Result<()> {
    println!("Type 'help' for a list of commands.");
    let stdin = io::stdin();
    prompt();

    for line in stdin.lock().lines() {
        let line = line.context("Failed to read command")?;
        if !line.trim().is_empty() {
            match Command::parse(&line) {
                Ok(Command::Quit) => break,
                Ok(command) => {
                    if let Err(e) = run(app, command) {
                        println!("Error: {:#}", e);
                    }
                }
                Err(e) => println!("{}", e),
            }
        }
        prompt();
    }

    if app.player().state() != PlayerState::Stopped {
        app.stop().context("Failed to stop playback")?;
    }
    Ok(())
}

fn prompt() {
    print!("> ");
    let _ = io::stdout().flush();
}

fn run(app: &App, command: Command) -> Result<()> {
    match command {
        Command::Play { query, instrument } => start(app, &query, instrument.as_deref())?,
        Command::CanPlay { query, instrument } => check(app, &query, instrument.as_deref())?,
        Command::Pause => app.pause()?,
        Command::Resume => {
            countdown(app.config().countdown_secs);
            app.resume()?
        }
        Command::Stop => app.stop()?,
        Command::Next => app.next()?,
        Command::Prev => app.prev()?,
        Command::Shuffle(enable) => {
            app.set_shuffle(enable)?;
            println!("Shuffle {}", if enable { "on" } else { "off" });
        }
        Command::Help => println!("{}", HELP),
        Command::Quit => {}
    }
    Ok(())
}

fn check(app: &App, query: &str, instrument: Option<&str>) -> Result<()> {
    let report = app.can_play(query, instrument)?;
    print_report(&report);
    if report.all_playable() {
        println!("All files can be played.");
    }
    Ok(())
}

fn start(app: &App, query: &str, instrument: Option<&str>) -> Result<()> {
    // Fail fast on a bad query before counting down
    app.resolve(query)
        .with_context(|| format!("Failed to resolve '{}'", query))?;
    countdown(app.config().countdown_secs);

    match app.play(query, instrument) {
        Ok(report) => {
            print_report(&report);
            Ok(())
        }
        Err(e) => {
            if let Some(PlayerError::NothingPlayable(report)) = e.downcast_ref::<PlayerError>() {
                print_report(report);
            }
            Err(e)
        }
    }
}

/// Gives the user time to switch to the game window.
fn countdown(secs: u64) {
    for left in (1..=secs).rev() {
        println!("Starting in {}...", left);
        thread::sleep(Duration::from_secs(1));
    }
}

fn print_report(report: &PlayReport) {
    for file in &report.files {
        let name = file
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| file.path.display().to_string());

        match &file.status {
            FileStatus::Playable(warnings) if warnings.is_empty() => println!("{}: ok", name),
            FileStatus::Playable(warnings) => {
                println!("{}: playable with warnings", name);
                for warning in warnings {
                    println!("  {}: {}", warning, warning.explanation());
                }
            }
            FileStatus::Unplayable(warnings) => {
                println!("{}: can not be played", name);
                for warning in warnings {
                    println!("  {}: {}", warning, warning.explanation());
                }
            }
            FileStatus::Unreadable(error) => println!("{}: unreadable ({})", name, error),
        }
    }
}
