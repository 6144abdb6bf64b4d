//! ShardDaemon - shard worker pool
//!
//! CLI entry point for running the pool and sending it control requests.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use sharddaemon::audio::AudioManager;
use sharddaemon::catalog::Catalog;
use sharddaemon::cli::{Cli, Command, OverrideCommand};
use sharddaemon::config::Config;
use sharddaemon::ipc::{self, PoolClient, WorkerResult};
use sharddaemon::loader::{FactoryRegistry, LoadResult, Loader, LoaderSettings, PathIndex};
use sharddaemon::pool::Pool;

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sharddaemon")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Priority: CLI --log-level > config file > INFO
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(log_dir.join("sharddaemon.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Run { workers } => cmd_run(config, workers).await,
        Command::Reload { id, worker } => {
            let entries = client()?.reload(&id, worker).await?;
            print_results(&format!("reload {id}"), &entries)
        }
        Command::ReloadAudio { worker } => {
            let entries = client()?.reload_audio(worker).await?;
            print_results("reload-audio", &entries)
        }
        Command::Override { command } => match command {
            OverrideCommand::Begin { text, worker } => {
                let entries = client()?.begin_override(&text, worker).await?;
                print_results("override begin", &entries)
            }
            OverrideCommand::End { worker } => {
                let entries = client()?.end_override(worker).await?;
                print_results("override end", &entries)
            }
        },
        Command::Ping => cmd_ping().await,
        Command::Stop => cmd_stop().await,
        Command::Modules { root } => cmd_modules(&config, root.as_deref()).await,
    }
}

/// Client for a running pool; errors when no pool is listening
fn client() -> Result<PoolClient> {
    let client = PoolClient::new();
    if !client.socket_exists() {
        eyre::bail!("ShardDaemon is not running (no socket at {})", ipc::get_socket_path().display());
    }
    Ok(client)
}

fn print_results(action: &str, entries: &[WorkerResult]) -> Result<()> {
    for entry in entries {
        if entry.ok {
            println!("{} worker {}: {}", "✓".green(), entry.worker, entry.detail);
        } else {
            println!("{} worker {}: {}", "✗".red(), entry.worker, entry.detail.red());
        }
    }
    let failed = entries.iter().filter(|e| !e.ok).count();
    if failed > 0 {
        eyre::bail!("{} failed on {} of {} worker(s)", action, failed, entries.len());
    }
    Ok(())
}

async fn cmd_ping() -> Result<()> {
    debug!("cmd_ping: called");
    let client = PoolClient::new();
    if !client.socket_exists() {
        println!("ShardDaemon is not running");
        return Ok(());
    }
    let (version, workers) = client.ping().await.context("Pool did not answer ping")?;
    println!("{} ShardDaemon {} is alive", "✓".green(), version.cyan());
    println!("Workers: {:?}", workers);
    Ok(())
}

async fn cmd_stop() -> Result<()> {
    debug!("cmd_stop: called");
    let client = PoolClient::new();
    if !client.socket_exists() {
        println!("ShardDaemon is not running");
        return Ok(());
    }
    client.shutdown().await.context("Failed to request shutdown")?;
    println!("{} Shutdown requested", "✓".green());
    Ok(())
}

/// Scan a module root without starting a pool
async fn cmd_modules(config: &Config, root: Option<&Path>) -> Result<()> {
    debug!(?root, "cmd_modules: called");
    let root = root.map(Path::to_path_buf).unwrap_or_else(|| config.modules.expanded_root());
    let audio = Arc::new(AudioManager::new(&config.audio)?);
    audio.check_status().await;

    let loader = Loader::new(
        Arc::new(Catalog::new()),
        Arc::new(PathIndex::new()),
        Arc::new(FactoryRegistry::with_builtins()),
        audio,
        LoaderSettings::from_config(&config.modules).context("Invalid module file pattern")?,
    );

    let (mut loaded, mut failed) = (0, 0);
    for result in loader.scan(&root) {
        match result {
            LoadResult::Loaded(id) => {
                loaded += 1;
                println!("{} {}", "✓".green(), id);
            }
            LoadResult::Failed(path, e) => {
                failed += 1;
                println!("{} {}: {}", "✗".red(), path.display(), e);
            }
        }
    }
    println!("{} loaded, {} failed under {}", loaded, failed, root.display());
    Ok(())
}

/// Run the pool until a signal or a Shutdown request arrives
async fn cmd_run(mut config: Config, workers: Option<u32>) -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    debug!(?workers, "cmd_run: called");
    if let Some(n) = workers {
        config.pool.workers = n;
    }

    let mut sighup = signal(SignalKind::hangup())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let signals = async move {
        tokio::select! {
            _ = sighup.recv() => warn!("SIGHUP received"),
            _ = sigint.recv() => warn!("SIGINT received"),
            _ = sigterm.recv() => warn!("SIGTERM received"),
        }
    };

    let (listener, socket_path) = ipc::create_listener()?;
    let pool = Arc::new(RwLock::new(Pool::start(&config).await?));
    println!(
        "ShardDaemon running with {} worker(s), socket {}",
        pool.read().await.worker_ids().len(),
        socket_path.display()
    );

    ipc::serve(pool.clone(), listener, signals).await;

    info!("ShardDaemon shutting down...");
    pool.write().await.shutdown().await;
    ipc::cleanup_socket(&socket_path);
    Ok(())
}
