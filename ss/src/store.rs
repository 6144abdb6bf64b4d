//! Core SharedStore implementation

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

const DATA_FILE: &str = "store.json";
const LOCK_FILE: &str = "store.lock";

/// Errors from store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt store file {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A single stored value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub value: String,
    #[serde(rename = "updated-at")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    entries: BTreeMap<String, Entry>,
}

/// File-backed key/value store shared between processes
#[derive(Debug, Clone)]
pub struct SharedStore {
    base_path: PathBuf,
}

impl SharedStore {
    /// Open or create a store at the given directory
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let base_path = path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path).map_err(|source| StoreError::Io {
            path: base_path.clone(),
            source,
        })?;
        debug!(?base_path, "Opened shared store");
        Ok(Self { base_path })
    }

    /// Directory backing this store
    pub fn path(&self) -> &Path {
        &self.base_path
    }

    /// Read a value
    pub fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entry(key)?.map(|e| e.value))
    }

    /// Read a value with its metadata
    pub fn entry(&self, key: &str) -> Result<Option<Entry>, StoreError> {
        debug!(%key, "SharedStore::entry: called");
        let lock = self.lock_file()?;
        FileExt::lock_shared(&lock).map_err(|source| self.io_err(LOCK_FILE, source))?;
        let snapshot = self.read_snapshot();
        FileExt::unlock(&lock).map_err(|source| self.io_err(LOCK_FILE, source))?;
        Ok(snapshot?.entries.get(key).cloned())
    }

    /// Write a value, replacing any previous one
    pub fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        debug!(%key, "SharedStore::set: called");
        self.mutate(|snapshot| {
            snapshot.entries.insert(
                key.to_string(),
                Entry {
                    value: value.to_string(),
                    updated_at: Utc::now(),
                },
            );
        })?;
        info!(%key, "Stored value");
        Ok(())
    }

    /// Remove a value, returning whether it existed
    pub fn remove(&self, key: &str) -> Result<bool, StoreError> {
        debug!(%key, "SharedStore::remove: called");
        let mut existed = false;
        self.mutate(|snapshot| {
            existed = snapshot.entries.remove(key).is_some();
        })?;
        if existed {
            info!(%key, "Removed value");
        }
        Ok(existed)
    }

    /// List all entries sorted by key
    pub fn list(&self) -> Result<Vec<(String, Entry)>, StoreError> {
        let lock = self.lock_file()?;
        FileExt::lock_shared(&lock).map_err(|source| self.io_err(LOCK_FILE, source))?;
        let snapshot = self.read_snapshot();
        FileExt::unlock(&lock).map_err(|source| self.io_err(LOCK_FILE, source))?;
        Ok(snapshot?.entries.into_iter().collect())
    }

    /// Read-modify-write under an exclusive lock; the data file is replaced by rename
    fn mutate(&self, f: impl FnOnce(&mut Snapshot)) -> Result<(), StoreError> {
        let lock = self.lock_file()?;
        FileExt::lock_exclusive(&lock).map_err(|source| self.io_err(LOCK_FILE, source))?;

        let result = (|| {
            let mut snapshot = self.read_snapshot()?;
            f(&mut snapshot);
            let json = serde_json::to_string_pretty(&snapshot)?;
            let tmp = self.base_path.join(format!("{DATA_FILE}.tmp"));
            fs::write(&tmp, json).map_err(|source| StoreError::Io {
                path: tmp.clone(),
                source,
            })?;
            fs::rename(&tmp, self.base_path.join(DATA_FILE)).map_err(|source| self.io_err(DATA_FILE, source))
        })();

        FileExt::unlock(&lock).map_err(|source| self.io_err(LOCK_FILE, source))?;
        result
    }

    fn read_snapshot(&self) -> Result<Snapshot, StoreError> {
        let path = self.base_path.join(DATA_FILE);
        match fs::read_to_string(&path) {
            Ok(content) if content.trim().is_empty() => Ok(Snapshot::default()),
            Ok(content) => serde_json::from_str(&content).map_err(|source| StoreError::Corrupt { path, source }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Snapshot::default()),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }

    fn lock_file(&self) -> Result<File, StoreError> {
        OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.base_path.join(LOCK_FILE))
            .map_err(|source| self.io_err(LOCK_FILE, source))
    }

    fn io_err(&self, file: &str, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.base_path.join(file),
            source,
        }
    }
}
