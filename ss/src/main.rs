use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;

use sharedstore::SharedStore;
use sharedstore::cli::{Cli, Command};
use sharedstore::config::Config;

fn setup_logging() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Warn)
        .init();
    Ok(())
}

fn main() -> Result<()> {
    setup_logging().context("Failed to setup logging")?;

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    let store_path = cli.store.unwrap_or(config.store_path);

    info!("sharedstore opening {}", store_path.display());
    let store = SharedStore::open(&store_path)?;

    match cli.command {
        Command::Get { key } => match store.get(&key)? {
            Some(value) => println!("{}", value),
            None => {
                eprintln!("{} no value for {}", "✗".red(), key.cyan());
                std::process::exit(1);
            }
        },
        Command::Set { key, value } => {
            store.set(&key, &value)?;
            println!("{} {} set", "✓".green(), key.cyan());
        }
        Command::Del { key } => {
            if store.remove(&key)? {
                println!("{} {} deleted", "✓".green(), key.cyan());
            } else {
                println!("{} not present", key.cyan());
            }
        }
        Command::List => {
            let entries = store.list()?;
            if entries.is_empty() {
                println!("No entries");
            } else {
                for (key, entry) in entries {
                    println!(
                        "{} = {} {}",
                        key.yellow(),
                        entry.value,
                        entry.updated_at.to_rfc3339().dimmed()
                    );
                }
            }
        }
    }

    Ok(())
}
