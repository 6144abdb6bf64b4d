//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::bus::WorkerId;

/// ShardDaemon - shard worker pool with hot-reloadable handlers
#[derive(Parser)]
#[command(
    name = "sd",
    about = "Shard worker pool with hot-reloadable handler modules and pool-wide status broadcast",
    version = crate::VERSION,
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
    /// Run the worker pool in the foreground
    Run {
        /// Number of workers (overrides config)
        #[arg(short, long)]
        workers: Option<u32>,
    },

    /// Reload one handler unit by id or alias
    Reload {
        /// Unit id or alias
        id: String,

        /// Only reload on this worker (default: every worker)
        #[arg(short, long)]
        worker: Option<WorkerId>,
    },

    /// Re-probe the audio backend and register units gated on it
    ReloadAudio {
        /// Only reload on this worker (default: every worker)
        #[arg(short, long)]
        worker: Option<WorkerId>,
    },

    /// Begin or end a pool-wide status override
    Override {
        #[command(subcommand)]
        command: OverrideCommand,
    },

    /// Check that the pool is running
    Ping,

    /// Stop the running pool
    Stop,

    /// Scan a module directory and report what would load
    Modules {
        /// Module root (default: from config)
        #[arg(short, long)]
        root: Option<PathBuf>,
    },
}

/// Status override subcommands
#[derive(Debug, Subcommand)]
pub enum OverrideCommand {
    /// Show this text on every worker until ended
    Begin {
        /// Status text
        text: String,

        /// Worker that originates the override (default: lowest id)
        #[arg(short, long)]
        worker: Option<WorkerId>,
    },

    /// Return every worker to rotation
    End {
        /// Worker that originates the end (default: lowest id)
        #[arg(short, long)]
        worker: Option<WorkerId>,
    },
}

/// Path of the pool's log file
pub fn get_log_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sharddaemon")
        .join("logs")
        .join("sharddaemon.log")
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_reload_with_worker() {
        let cli = Cli::parse_from(["sd", "reload", "ping", "--worker", "2"]);
        match cli.command {
            Command::Reload { id, worker } => {
                assert_eq!(id, "ping");
                assert_eq!(worker, Some(2));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_override_begin() {
        let cli = Cli::parse_from(["sd", "-l", "debug", "override", "begin", "Maintenance at 5"]);
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        match cli.command {
            Command::Override {
                command: OverrideCommand::Begin { text, worker },
            } => {
                assert_eq!(text, "Maintenance at 5");
                assert_eq!(worker, None);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_log_path_ends_with_file_name() {
        assert!(get_log_path().ends_with("sharddaemon/logs/sharddaemon.log"));
    }
}
