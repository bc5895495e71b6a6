//! CLI command definitions and subcommands

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// TripDaemon - trip-planning lobby coordinator
#[derive(Parser)]
#[command(
    name = "tripd",
    about = "Coordinates trip-planning lobbies and destination matching",
    version = crate::daemon::VERSION,
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Manage the tripdaemon daemon
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },

    /// Run the coordinator in the foreground (no fork)
    Serve,

    /// Internal: Run as daemon process (used by `daemon start`)
    #[command(hide = true)]
    RunDaemon,

    /// Show daemon logs
    Logs {
        /// Follow log output (like tail -f)
        #[arg(short, long)]
        follow: bool,

        /// Number of lines to show
        #[arg(short = 'n', long, default_value = "50")]
        lines: usize,
    },
}

/// Daemon management subcommands
#[derive(Debug, Subcommand)]
pub enum DaemonCommand {
    /// Start the daemon
    Start {
        /// Don't fork to background (run in foreground)
        #[arg(long)]
        foreground: bool,
    },

    /// Stop the daemon
    Stop,

    /// Check daemon status
    Status {
        /// Show live session counters from the coordinator
        #[arg(short, long)]
        detailed: bool,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: StatusFormat,
    },

    /// Ping the daemon to check if it's alive and responsive
    Ping,
}

/// Get the log file path
pub fn get_log_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tripdaemon")
        .join("logs")
        .join("tripd.log")
}

/// How `daemon status` renders its report
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum StatusFormat {
    /// Human-readable report
    #[default]
    Text,
    /// Machine-readable JSON, for scripting against the coordinator
    Json,
}
