//! Configuration for sharedstore

use eyre::Result;
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Path to the store directory
    #[serde(rename = "store-path", default = "default_store_path")]
    pub store_path: PathBuf,
}

/// Default store location, shared with the daemon's default
pub fn default_store_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sharddaemon")
        .join("store")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
        }
    }
}

impl Config {
    /// Load config from file, or use defaults
    pub fn load(path: Option<&PathBuf>) -> Result<Self> {
        if let Some(config_path) = path {
            let content = std::fs::read_to_string(config_path)?;
            let config: Config = serde_yaml::from_str(&content)?;
            return Ok(config);
        }

        let default_paths = [
            dirs::config_dir().map(|p| p.join("sharedstore").join("config.yml")),
            Some(PathBuf::from("sharedstore.yml")),
        ];

        for path in default_paths.iter().flatten() {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let config: Config = serde_yaml::from_str(&content)?;
                return Ok(config);
            }
        }

        Ok(Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_path_ends_with_store() {
        let config = Config::default();
        assert!(config.store_path.ends_with("sharddaemon/store"));
    }

    #[test]
    fn test_load_explicit_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.yml");
        std::fs::write(&path, "store-path: /srv/pool/store\n").unwrap();

        let loaded = Config::load(Some(&path)).unwrap();
        assert_eq!(loaded.store_path, PathBuf::from("/srv/pool/store"));
    }

    #[test]
    fn test_missing_key_uses_default_path() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.yml");
        std::fs::write(&path, "{}\n").unwrap();

        let loaded = Config::load(Some(&path)).unwrap();
        assert_eq!(loaded.store_path, default_store_path());
    }
}
