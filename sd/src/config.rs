//! ShardDaemon configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::bus::BusConfig;
use crate::gateway::Presence;

/// Rotation messages used when neither a messages file nor an inline list is configured
const FALLBACK_MESSAGES: &[&str] = &["with your events", "the waiting game", "nothing in particular"];

/// Main ShardDaemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,

    /// Worker pool settings
    pub pool: PoolConfig,

    /// Handler module discovery
    pub modules: ModulesConfig,

    /// Status rotation and override
    pub broadcast: BroadcastConfig,

    /// Audio backend nodes
    pub audio: AudioConfig,

    /// Command bus tuning
    pub bus: BusConfig,

    /// Central shared store
    pub store: StoreConfig,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .sharddaemon.yml
        let local_config = PathBuf::from(".sharddaemon.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/sharddaemon/sharddaemon.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("sharddaemon").join("sharddaemon.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read only the log level, before logging is initialized
    ///
    /// Errors are swallowed; the full load reports them once logging is up.
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        let candidates = match config_path {
            Some(path) => vec![path.clone()],
            None => {
                let mut paths = vec![PathBuf::from(".sharddaemon.yml")];
                if let Some(config_dir) = dirs::config_dir() {
                    paths.push(config_dir.join("sharddaemon").join("sharddaemon.yml"));
                }
                paths
            }
        };

        candidates
            .iter()
            .find(|p| p.exists())
            .and_then(|p| Self::load_from_file(p).ok())
            .and_then(|c| c.log_level)
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Worker pool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of workers to run
    pub workers: u32,

    /// Name shown in the rotating status
    #[serde(rename = "bot-name")]
    pub bot_name: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            bot_name: "shardbot".to_string(),
        }
    }
}

/// Handler module discovery
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModulesConfig {
    /// Root directory scanned recursively for unit manifests
    pub root: String,

    /// File name globs that mark a loadable unit
    pub patterns: Vec<String>,

    /// Follow symlinks while scanning (loops are not detected)
    #[serde(rename = "follow-links")]
    pub follow_links: bool,
}

impl Default for ModulesConfig {
    fn default() -> Self {
        Self {
            root: "modules".to_string(),
            patterns: vec!["*.yml".to_string(), "*.yaml".to_string()],
            follow_links: false,
        }
    }
}

impl ModulesConfig {
    /// Module root with `~/` expanded
    pub fn expanded_root(&self) -> PathBuf {
        expand_home(&self.root)
    }
}

/// Status rotation and override settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    /// Seconds between rotation ticks
    #[serde(rename = "rotation-period-secs")]
    pub rotation_period_secs: u64,

    /// JSON file holding an array of rotation messages
    #[serde(rename = "messages-file")]
    pub messages_file: Option<String>,

    /// Inline rotation messages (appended after the file's)
    pub messages: Vec<String>,

    /// Presence shown with every status
    pub presence: Presence,

    /// Rotation template; `{message}` and `{bot}` are substituted
    pub template: String,

    /// Status shown while a worker shuts down
    #[serde(rename = "shutdown-status")]
    pub shutdown_status: String,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            rotation_period_secs: 900,
            messages_file: None,
            messages: Vec::new(),
            presence: Presence::Dnd,
            template: "{message} | @{bot} help".to_string(),
            shutdown_status: "Restarting/shutting down...".to_string(),
        }
    }
}

impl BroadcastConfig {
    pub fn rotation_period(&self) -> Duration {
        Duration::from_secs(self.rotation_period_secs.max(1))
    }

    /// Build the rotation pool once: file entries, then inline entries
    pub fn rotation_pool(&self) -> Result<Vec<String>> {
        debug!(?self.messages_file, inline = self.messages.len(), "rotation_pool: called");
        let mut pool = Vec::new();

        if let Some(file) = &self.messages_file {
            let path = expand_home(file);
            let content =
                fs::read_to_string(&path).context(format!("Failed to read messages file {}", path.display()))?;
            let messages: Vec<String> = serde_json::from_str(&content)
                .context(format!("Messages file {} is not a JSON array of strings", path.display()))?;
            pool.extend(messages);
        }

        pool.extend(self.messages.iter().cloned());
        pool.retain(|m| !m.trim().is_empty());

        if pool.is_empty() {
            debug!("rotation_pool: nothing configured, using fallback messages");
            pool = FALLBACK_MESSAGES.iter().map(|s| s.to_string()).collect();
        }
        Ok(pool)
    }
}

/// One audio backend node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioNode {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub password: String,
}

impl AudioNode {
    /// Endpoint probed for availability
    pub fn version_url(&self) -> String {
        format!("http://{}:{}/version", self.host, self.port)
    }
}

/// Audio backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub nodes: Vec<AudioNode>,

    /// Timeout for each availability probe in milliseconds
    #[serde(rename = "probe-timeout-ms")]
    pub probe_timeout_ms: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            probe_timeout_ms: 3_000,
        }
    }
}

impl AudioConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// Central shared store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: sharedstore::config::default_store_path(),
        }
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    PathBuf::from(path)
}
