//! Identifier → source path index
//!
//! Kept in step with the catalog so a single unit can be reloaded from disk.
//! Entries are recorded as soon as a file is identified, before requirement
//! checks, so units skipped for a missing capability can be retried later.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{PoisonError, RwLock};

use tracing::debug;

/// Where a unit came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    /// Canonical identifier
    pub id: String,
    pub path: PathBuf,
    pub category: Option<String>,
}

/// Name (identifier or alias) → source
#[derive(Debug, Default)]
pub struct PathIndex {
    entries: RwLock<HashMap<String, IndexEntry>>,
}

impl PathIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a unit under its identifier and aliases, dropping aliases it no longer declares
    pub fn record(&self, entry: IndexEntry, aliases: &[String]) {
        debug!(id = %entry.id, path = %entry.path.display(), "PathIndex::record: called");
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);

        entries.retain(|name, existing| existing.id != entry.id || name == &entry.id || aliases.contains(name));

        for alias in aliases {
            let owned_by_other = entries
                .get(alias)
                .is_some_and(|existing| existing.id != entry.id && existing.id == *alias);
            if alias != &entry.id && !owned_by_other {
                entries.insert(alias.clone(), entry.clone());
            }
        }
        entries.insert(entry.id.clone(), entry);
    }

    /// Resolve a name to its source
    pub fn lookup(&self, name: &str) -> Option<IndexEntry> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Forget a unit and all of its aliases
    pub fn forget(&self, id: &str) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, existing| existing.id != id);
    }

    /// One entry per canonical identifier, sorted
    pub fn units(&self) -> Vec<IndexEntry> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut units: Vec<IndexEntry> = entries
            .iter()
            .filter(|(name, entry)| *name == &entry.id)
            .map(|(_, entry)| entry.clone())
            .collect();
        units.sort_by(|a, b| a.id.cmp(&b.id));
        units
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str) -> IndexEntry {
        IndexEntry {
            id: id.to_string(),
            path: PathBuf::from(format!("modules/{id}.yml")),
            category: None,
        }
    }

    #[test]
    fn test_record_and_lookup_by_alias() {
        let index = PathIndex::new();
        index.record(entry("ping"), &["p".to_string()]);
        assert_eq!(index.lookup("p").unwrap().id, "ping");
        assert_eq!(index.lookup("ping").unwrap().path, PathBuf::from("modules/ping.yml"));
        assert!(index.lookup("missing").is_none());
    }

    #[test]
    fn test_rerecord_drops_old_aliases() {
        let index = PathIndex::new();
        index.record(entry("ping"), &["p".to_string(), "old".to_string()]);
        index.record(entry("ping"), &["p".to_string()]);
        assert!(index.lookup("old").is_none());
        assert!(index.lookup("p").is_some());
    }

    #[test]
    fn test_alias_does_not_steal_identifier() {
        let index = PathIndex::new();
        index.record(entry("help"), &[]);
        index.record(entry("ping"), &["help".to_string()]);
        assert_eq!(index.lookup("help").unwrap().id, "help");
    }

    #[test]
    fn test_units_and_forget() {
        let index = PathIndex::new();
        index.record(entry("b"), &["bb".to_string()]);
        index.record(entry("a"), &[]);
        let ids: Vec<String> = index.units().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["a", "b"]);

        index.forget("b");
        assert!(index.lookup("bb").is_none());
        assert_eq!(index.units().len(), 1);
    }
}
