//! Single-unit reload
//!
//! A reload re-reads exactly one unit from the path recorded for it and swaps
//! the catalog entry only when the new version loaded cleanly. Any failure
//! leaves the previous unit active.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::loader::{IndexEntry, LoadError, Loader};

/// Why a reload did not take effect
#[derive(Debug, Error)]
pub enum ReloadError {
    #[error("No unit named '{0}' is known")]
    NotFound(String),

    #[error("Reload failed: {0}")]
    LoadFailure(#[from] LoadError),
}

/// Reloads units one at a time against a worker's catalog
#[derive(Clone)]
pub struct Reloader {
    loader: Arc<Loader>,
}

impl Reloader {
    pub fn new(loader: Arc<Loader>) -> Self {
        Self { loader }
    }

    /// Reload the unit known as `name` (identifier or alias), returning its canonical id
    pub fn reload(&self, name: &str) -> Result<String, ReloadError> {
        debug!(%name, "Reloader::reload: called");
        let source = self
            .loader
            .index()
            .lookup(name)
            .ok_or_else(|| ReloadError::NotFound(name.to_string()))?;

        let unit = self.loader.load_file(&source.path, source.category.clone())?;
        if unit.id != source.id {
            warn!(expected = %source.id, found = %unit.id, "Reloaded unit changed its identifier");
            return Err(LoadError::IdentifierChanged {
                expected: source.id,
                found: unit.id,
            }
            .into());
        }

        let aliases = unit.aliases.clone();
        let id = unit.id.clone();
        self.loader.catalog().put(unit);
        self.loader.index().record(
            IndexEntry {
                id: id.clone(),
                path: source.path,
                category: source.category,
            },
            &aliases,
        );

        info!(%id, "Reloaded unit");
        Ok(id)
    }

    /// Retry every indexed unit that is not in the catalog
    ///
    /// Used after the audio backend comes back so gated units can register.
    pub fn reload_gated(&self) -> Vec<String> {
        debug!("Reloader::reload_gated: called");
        let catalog = self.loader.catalog();
        self.loader
            .index()
            .units()
            .into_iter()
            .filter(|entry| !catalog.contains(&entry.id))
            .filter_map(|entry| match self.reload(&entry.id) {
                Ok(id) => Some(id),
                Err(e) => {
                    debug!(id = %entry.id, error = %e, "Reloader::reload_gated: still not loadable");
                    None
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioManager;
    use crate::audio::tests::fake_node_on;
    use crate::config::{AudioConfig, AudioNode};
    use crate::loader::scan::tests::{loader, loader_with, write};
    use std::fs;
    use tempfile::TempDir;

    fn setup(files: &[(&str, &str)]) -> (TempDir, Arc<Loader>, Reloader) {
        let temp = TempDir::new().unwrap();
        for (rel, content) in files {
            write(temp.path(), rel, content);
        }
        let loader = Arc::new(loader());
        let _ = loader.scan(temp.path()).count();
        let reloader = Reloader::new(loader.clone());
        (temp, loader, reloader)
    }

    #[test]
    fn test_reload_missing_is_not_found() {
        let (_temp, loader, reloader) = setup(&[("ping.yml", "entry: reply\nparams:\n  text: pong\n")]);
        let before = loader.catalog().get("ping").unwrap();

        assert!(matches!(reloader.reload("missing"), Err(ReloadError::NotFound(n)) if n == "missing"));
        assert_eq!(loader.catalog().ids(), vec!["ping"]);
        assert!(Arc::ptr_eq(&before, &loader.catalog().get("ping").unwrap()));
    }

    #[tokio::test]
    async fn test_reload_swaps_entry() {
        let (temp, loader, reloader) = setup(&[("ping.yml", "entry: reply\nparams:\n  text: v1\n")]);
        fs::write(temp.path().join("ping.yml"), "entry: reply\nparams:\n  text: v2\n").unwrap();

        assert_eq!(reloader.reload("ping").unwrap(), "ping");
        let unit = loader.catalog().get("ping").unwrap();
        let out = unit
            .handler
            .run(&crate::gateway::Invocation::new("ping", vec![]))
            .await
            .unwrap();
        assert_eq!(out, "v2");
    }

    #[test]
    fn test_failed_reload_keeps_previous_unit() {
        let (temp, loader, reloader) = setup(&[("ping.yml", "entry: reply\nparams:\n  text: v1\n")]);
        let before = loader.catalog().get("ping").unwrap();

        fs::write(temp.path().join("ping.yml"), "entry: [broken\n").unwrap();
        assert!(matches!(reloader.reload("ping"), Err(ReloadError::LoadFailure(LoadError::Parse { .. }))));
        assert!(Arc::ptr_eq(&before, &loader.catalog().get("ping").unwrap()));

        fs::remove_file(temp.path().join("ping.yml")).unwrap();
        assert!(matches!(reloader.reload("ping"), Err(ReloadError::LoadFailure(LoadError::Io { .. }))));
        assert!(Arc::ptr_eq(&before, &loader.catalog().get("ping").unwrap()));
    }

    #[test]
    fn test_reload_leaves_other_units_alone() {
        let (temp, loader, reloader) = setup(&[
            ("a.yml", "entry: reply\nparams:\n  text: a\n"),
            ("b.yml", "entry: reply\nparams:\n  text: b\n"),
        ]);
        let b_before = loader.catalog().get("b").unwrap();
        fs::write(temp.path().join("a.yml"), "entry: reply\nparams:\n  text: a2\n").unwrap();

        reloader.reload("a").unwrap();
        assert!(Arc::ptr_eq(&b_before, &loader.catalog().get("b").unwrap()));
    }

    #[test]
    fn test_reload_by_alias_and_alias_refresh() {
        let (temp, loader, reloader) = setup(&[("ping.yml", "entry: echo\naliases: [p, old]\n")]);
        fs::write(temp.path().join("ping.yml"), "entry: echo\naliases: [p]\n").unwrap();

        assert_eq!(reloader.reload("p").unwrap(), "ping");
        assert!(loader.catalog().resolve("old").is_none());
        assert!(loader.index().lookup("old").is_none());
        assert_eq!(loader.catalog().resolve("p").unwrap().id, "ping");
    }

    #[test]
    fn test_identifier_change_rejected() {
        let (temp, loader, reloader) = setup(&[("ping.yml", "entry: echo\n")]);
        fs::write(temp.path().join("ping.yml"), "name: pong\nentry: echo\n").unwrap();

        assert!(matches!(
            reloader.reload("ping"),
            Err(ReloadError::LoadFailure(LoadError::IdentifierChanged { .. }))
        ));
        assert_eq!(loader.catalog().ids(), vec!["ping"]);
    }

    #[tokio::test]
    async fn test_reload_gated_after_backend_returns() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "music/play.yml", "entry: echo\nrequires: [audio]\n");
        write(temp.path(), "ping.yml", "entry: echo\n");

        // reserve a port with nothing listening on it
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let audio = AudioManager::new(&AudioConfig {
            nodes: vec![AudioNode {
                host: "127.0.0.1".to_string(),
                port,
                password: String::new(),
            }],
            probe_timeout_ms: 500,
        })
        .unwrap();
        assert!(audio.check_status().await);

        let loader = Arc::new(loader_with(audio));
        let _ = loader.scan(temp.path()).count();
        assert_eq!(loader.catalog().ids(), vec!["ping"]);

        let reloader = Reloader::new(loader.clone());
        assert!(reloader.reload_gated().is_empty());

        let _node = fake_node_on(port).await;
        assert_eq!(loader.audio().reload().await, 1);
        assert_eq!(reloader.reload_gated(), vec!["play"]);
        assert_eq!(loader.catalog().get("play").unwrap().category.as_deref(), Some("music"));
        assert!(reloader.reload_gated().is_empty());
    }
}
