//! Application orchestration and command routing.
//!
//! Handles command-line argument parsing and delegates to appropriate command handlers.

use crate::commands::{self, ConfigAction};
use crate::config::get_config_path;
use crate::logging;
use anyhow::anyhow;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use std::io;
use std::process;

/// Writes the default config on first run and migrates an older one.
///
/// This is called early in the startup sequence, before command handling.
async fn check_and_run_setup() -> Result<(), anyhow::Error> {
    let config_path = get_config_path()?;
    crate::setup::run_setup(&config_path).map_err(|e| {
        tracing::error!("Setup failed: {e}");
        anyhow!("Setup failed: {e}")
    })
}

/// Captures a depth stream into colored point clouds
#[derive(Parser)]
#[command(name = "depthcap")]
#[command(version)]
#[command(about = "Capture a depth stream into colored point clouds")]
#[command(long_about = "Capture a depth stream into colored point clouds.\n\nFrames are accumulated while a session is recording. Stopping a session\nexports its points as PLY into a timestamped session folder; snapshots save\nthe next frame's color image (and optionally depth) next to it.\n\nDEFAULT COMMAND:\n    If no command is specified, 'record' is used by default.\n\nEXAMPLES:\n    # Interactive capture (r: record, s: snapshot, q: quit)\n    $ depthcap\n\n    # Toggle recording from another process\n    $ pkill -USR1 depthcap\n\n    # Record for ten seconds with two snapshots, no UI\n    $ depthcap capture --seconds 10 --snapshots 2\n\n    # Open the most recent export\n    $ depthcap open\n\n    # Edit, then check the configuration file\n    $ depthcap config\n    $ depthcap config --check")]
#[command(
    after_help = "CONFIGURATION:\n    Config file:        ~/.config/depthcap/depthcap.toml\n    Export history:     ~/.local/share/depthcap/exports.db\n    Logs:               ~/.local/state/depthcap/depthcap.log.*"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture interactively with a live preview (default)
    ///
    /// Press r or Enter to start/stop a session, s or Space for a snapshot,
    /// R to restart a failed source, q or Esc to quit. SIGUSR1 toggles
    /// recording and SIGUSR2 takes a snapshot.
    #[command(visible_alias = "r")]
    Record,

    /// Record one session without the UI and export it
    ///
    /// The exported point cloud is handed to the configured share target
    /// (by default its path is printed to stdout).
    #[command(visible_alias = "c")]
    Capture {
        /// How long to record, in seconds
        #[arg(short, long, default_value_t = 5.0)]
        seconds: f64,

        /// Snapshots to take, spread evenly over the recording
        #[arg(long, default_value_t = 0)]
        snapshots: u32,
    },

    /// Browse exported artifacts and open one
    ///
    /// Use arrow keys to navigate, Enter to open, Esc to exit.
    #[command(visible_alias = "h")]
    History,

    /// Open a previous export with the system viewer
    #[command(visible_alias = "o")]
    Open {
        /// Export index (1 = most recent, 2 = second most recent, etc.)
        #[arg(value_name = "N")]
        index: Option<usize>,
    },

    /// List session folders with their point counts
    #[command(visible_alias = "s")]
    Sessions,

    /// Edit, check or print the configuration file
    ///
    /// Without flags the file opens in $VISUAL or $EDITOR (falling back to
    /// nano/vi) and is validated when the editor exits.
    Config {
        /// Validate the file and summarize the effective settings
        #[arg(long, conflicts_with_all = ["show", "path"])]
        check: bool,

        /// Print the effective settings, defaults filled in, as TOML
        #[arg(long, conflicts_with = "path")]
        show: bool,

        /// Print where the config file lives
        #[arg(long)]
        path: bool,
    },

    /// Show recent log entries from the application
    ///
    /// Display the last 50 lines of the most recent log file.
    Logs,

    /// Generate shell completion script
    ///
    /// Examples:
    ///   depthcap completions bash > depthcap.bash
    ///   depthcap completions zsh > _depthcap
    ///   depthcap completions fish > depthcap.fish
    Completions {
        /// The shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Runs the main application based on command-line arguments.
///
/// # Exit Codes
/// - 0: Success
/// - 1: General error
/// - 2: Usage error (invalid arguments)
///
/// # Errors
/// - If setup fails
/// - If logging initialization fails
/// - If command execution fails
pub async fn run() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    // Commands that don't need logging or config setup
    match &cli.command {
        Some(Commands::Completions { shell }) => {
            generate(*shell, &mut Cli::command(), "depthcap", &mut io::stdout());
            return Ok(());
        }
        Some(Commands::Logs) => {
            return match commands::handle_logs() {
                Ok(()) => Ok(()),
                Err(e) => {
                    eprintln!("Error: {e}");
                    process::exit(1);
                }
            };
        }
        _ => {}
    }

    logging::init_logging()?;
    check_and_run_setup().await?;

    match cli.command {
        None | Some(Commands::Record) => commands::handle_record().await?,
        Some(Commands::Capture { seconds, snapshots }) => {
            commands::handle_capture(seconds, snapshots).await?;
        }
        Some(Commands::History) => commands::handle_history().await?,
        Some(Commands::Open { index }) => commands::handle_open(index).await?,
        Some(Commands::Sessions) => commands::handle_sessions()?,
        Some(Commands::Config { check, show, path }) => {
            let action = if check {
                ConfigAction::Check
            } else if show {
                ConfigAction::Show
            } else if path {
                ConfigAction::Path
            } else {
                ConfigAction::Edit
            };
            commands::handle_config(action)?;
        }
        Some(Commands::Completions { .. }) | Some(Commands::Logs) => {
            unreachable!("These commands are handled earlier")
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_capture_arguments() {
        let cli = Cli::try_parse_from(["depthcap", "capture", "--seconds", "2.5", "--snapshots", "3"]).unwrap();
        match cli.command {
            Some(Commands::Capture { seconds, snapshots }) => {
                assert_eq!(seconds, 2.5);
                assert_eq!(snapshots, 3);
            }
            _ => panic!("expected capture"),
        }
    }

    #[test]
    fn test_config_modes_are_exclusive() {
        let cli = Cli::try_parse_from(["depthcap", "config", "--check"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Config { check: true, show: false, path: false })));
        assert!(Cli::try_parse_from(["depthcap", "config", "--check", "--show"]).is_err());
        assert!(Cli::try_parse_from(["depthcap", "config", "--show", "--path"]).is_err());
    }

    #[test]
    fn test_no_subcommand_records() {
        let cli = Cli::try_parse_from(["depthcap"]).unwrap();
        assert!(cli.command.is_none());
    }
}
