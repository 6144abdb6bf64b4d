//! CLI argument parsing for sharedstore

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "ss")]
#[command(author, version, about = "Shared key/value store for a shard pool", long_about = None)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Store directory (overrides config)
    #[arg(short, long)]
    pub store: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print a value
    Get {
        #[arg(required = true)]
        key: String,
    },

    /// Set a value
    Set {
        #[arg(required = true)]
        key: String,

        #[arg(required = true)]
        value: String,
    },

    /// Delete a value
    Del {
        #[arg(required = true)]
        key: String,
    },

    /// List all keys with their values
    List,
}
