//! Catalog of loaded handler units
//!
//! Each worker owns one catalog. Units are stored behind `Arc` and replaced
//! wholesale: a reload swaps the pointer under the write lock, so a reader
//! holding the previous `Arc` keeps a complete unit and a reader arriving
//! after the swap sees the complete new one.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::gateway::Invocation;
use crate::loader::Requirement;

/// Executable body of a handler unit
#[async_trait]
pub trait Handler: Send + Sync {
    async fn run(&self, invocation: &Invocation) -> eyre::Result<String>;
}

/// A loaded handler plus the metadata it was declared with
pub struct HandlerUnit {
    pub id: String,
    pub path: PathBuf,
    pub entry: String,
    pub category: Option<String>,
    pub description: String,
    pub aliases: Vec<String>,
    pub requires: Vec<Requirement>,
    pub param_hints: Vec<String>,
    pub loaded_at: DateTime<Utc>,
    pub handler: Arc<dyn Handler>,
}

impl fmt::Debug for HandlerUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerUnit")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("entry", &self.entry)
            .field("category", &self.category)
            .field("aliases", &self.aliases)
            .field("requires", &self.requires)
            .field("loaded_at", &self.loaded_at)
            .finish_non_exhaustive()
    }
}

impl HandlerUnit {
    pub fn requires_audio(&self) -> bool {
        self.requires.contains(&Requirement::Audio)
    }
}

/// Help-table row for one unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitInfo {
    pub id: String,
    pub category: Option<String>,
    pub description: String,
    pub aliases: Vec<String>,
    pub params: Vec<String>,
}

#[derive(Default)]
struct Inner {
    units: HashMap<String, Arc<HandlerUnit>>,
    /// alias -> canonical id
    aliases: HashMap<String, String>,
}

impl Inner {
    fn drop_aliases_of(&mut self, unit: &HandlerUnit) {
        for alias in &unit.aliases {
            if self.aliases.get(alias).is_some_and(|owner| owner == &unit.id) {
                self.aliases.remove(alias);
            }
        }
    }
}

/// Registry of handler units keyed by identifier
#[derive(Default)]
pub struct Catalog {
    inner: RwLock<Inner>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or replace a unit, returning the one it displaced
    pub fn put(&self, unit: HandlerUnit) -> Option<Arc<HandlerUnit>> {
        debug!(id = %unit.id, "Catalog::put: called");
        let unit = Arc::new(unit);
        let mut inner = self.write();

        let previous = inner.units.insert(unit.id.clone(), unit.clone());
        if let Some(prev) = &previous {
            inner.drop_aliases_of(prev);
        }

        for alias in &unit.aliases {
            if alias == &unit.id {
                continue;
            }
            if inner.units.contains_key(alias) {
                warn!(id = %unit.id, %alias, "Alias shadows another unit's identifier, ignoring");
                continue;
            }
            if let Some(owner) = inner.aliases.insert(alias.clone(), unit.id.clone())
                && owner != unit.id
            {
                warn!(id = %unit.id, %alias, previous_owner = %owner, "Alias reassigned");
            }
        }

        previous
    }

    /// Look up by canonical identifier only
    pub fn get(&self, id: &str) -> Option<Arc<HandlerUnit>> {
        self.read().units.get(id).cloned()
    }

    /// Look up by identifier, falling back to aliases
    pub fn resolve(&self, name: &str) -> Option<Arc<HandlerUnit>> {
        let inner = self.read();
        if let Some(unit) = inner.units.get(name) {
            return Some(unit.clone());
        }
        inner.aliases.get(name).and_then(|id| inner.units.get(id)).cloned()
    }

    /// Remove a unit and its aliases
    pub fn remove(&self, id: &str) -> Option<Arc<HandlerUnit>> {
        debug!(%id, "Catalog::remove: called");
        let mut inner = self.write();
        let removed = inner.units.remove(id);
        if let Some(unit) = &removed {
            inner.drop_aliases_of(unit);
        }
        removed
    }

    /// Remove everything, returning how many units were unregistered
    pub fn clear(&self) -> usize {
        let mut inner = self.write();
        let count = inner.units.len();
        inner.units.clear();
        inner.aliases.clear();
        debug!(count, "Catalog::clear: done");
        count
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read().units.contains_key(id)
    }

    /// Sorted canonical identifiers
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.read().units.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.read().units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().units.is_empty()
    }

    /// Help table sorted by category, then identifier
    pub fn info(&self) -> Vec<UnitInfo> {
        let mut rows: Vec<UnitInfo> = self
            .read()
            .units
            .values()
            .map(|u| UnitInfo {
                id: u.id.clone(),
                category: u.category.clone(),
                description: u.description.clone(),
                aliases: u.aliases.clone(),
                params: u.param_hints.clone(),
            })
            .collect();
        rows.sort_by(|a, b| a.category.cmp(&b.category).then_with(|| a.id.cmp(&b.id)));
        rows
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) struct Fixed(pub &'static str);

    #[async_trait]
    impl Handler for Fixed {
        async fn run(&self, _invocation: &Invocation) -> eyre::Result<String> {
            Ok(self.0.to_string())
        }
    }

    pub(crate) fn unit(id: &str, aliases: &[&str], body: &'static str) -> HandlerUnit {
        HandlerUnit {
            id: id.to_string(),
            path: PathBuf::from(format!("modules/{id}.yml")),
            entry: "reply".to_string(),
            category: None,
            description: String::new(),
            aliases: aliases.iter().map(|s| s.to_string()).collect(),
            requires: Vec::new(),
            param_hints: Vec::new(),
            loaded_at: Utc::now(),
            handler: Arc::new(Fixed(body)),
        }
    }

    #[test]
    fn test_put_get_remove() {
        let catalog = Catalog::new();
        assert!(catalog.put(unit("ping", &[], "pong")).is_none());
        assert_eq!(catalog.len(), 1);
        assert!(catalog.get("ping").is_some());

        let removed = catalog.remove("ping").unwrap();
        assert_eq!(removed.id, "ping");
        assert!(catalog.is_empty());
    }

    #[test]
    fn test_put_replaces_wholesale() {
        let catalog = Catalog::new();
        catalog.put(unit("ping", &[], "v1"));
        let held = catalog.get("ping").unwrap();

        let previous = catalog.put(unit("ping", &[], "v2")).unwrap();
        assert!(Arc::ptr_eq(&previous, &held));
        assert_eq!(catalog.len(), 1);
        assert!(!Arc::ptr_eq(&catalog.get("ping").unwrap(), &held));
    }

    #[tokio::test]
    async fn test_old_reader_keeps_complete_unit() {
        let catalog = Catalog::new();
        catalog.put(unit("ping", &[], "v1"));
        let held = catalog.get("ping").unwrap();
        catalog.put(unit("ping", &[], "v2"));

        let inv = Invocation::new("ping", vec![]);
        assert_eq!(held.handler.run(&inv).await.unwrap(), "v1");
        let fresh = catalog.get("ping").unwrap();
        assert_eq!(fresh.handler.run(&inv).await.unwrap(), "v2");
    }

    #[test]
    fn test_resolve_alias() {
        let catalog = Catalog::new();
        catalog.put(unit("ping", &["p", "pg"], "pong"));
        assert_eq!(catalog.resolve("p").unwrap().id, "ping");
        assert_eq!(catalog.resolve("ping").unwrap().id, "ping");
        assert!(catalog.get("p").is_none());
    }

    #[test]
    fn test_replacing_drops_stale_aliases() {
        let catalog = Catalog::new();
        catalog.put(unit("ping", &["p", "old"], "v1"));
        catalog.put(unit("ping", &["p"], "v2"));
        assert!(catalog.resolve("old").is_none());
        assert!(catalog.resolve("p").is_some());
    }

    #[test]
    fn test_alias_cannot_shadow_identifier() {
        let catalog = Catalog::new();
        catalog.put(unit("help", &[], "help"));
        catalog.put(unit("ping", &["help"], "pong"));
        assert_eq!(catalog.resolve("help").unwrap().id, "help");
    }

    #[test]
    fn test_remove_drops_aliases() {
        let catalog = Catalog::new();
        catalog.put(unit("ping", &["p"], "pong"));
        catalog.remove("ping");
        assert!(catalog.resolve("p").is_none());
    }

    #[test]
    fn test_clear_and_ids() {
        let catalog = Catalog::new();
        catalog.put(unit("b", &[], ""));
        catalog.put(unit("a", &[], ""));
        assert_eq!(catalog.ids(), vec!["a", "b"]);
        assert_eq!(catalog.clear(), 2);
        assert!(catalog.is_empty());
    }

    #[test]
    fn test_info_sorted_by_category() {
        let catalog = Catalog::new();
        let mut music = unit("play", &[], "");
        music.category = Some("music".to_string());
        let mut fun = unit("joke", &[], "");
        fun.category = Some("fun".to_string());
        catalog.put(music);
        catalog.put(fun);

        let ids: Vec<String> = catalog.info().into_iter().map(|i| i.id).collect();
        assert_eq!(ids, vec!["joke", "play"]);
    }
}
