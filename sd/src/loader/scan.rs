//! Loader - discovers, validates and registers handler units

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::factory::{Factory, FactoryRegistry};
use super::index::{IndexEntry, PathIndex};
use super::manifest::{Requirement, UnitManifest, is_valid_identifier};
use super::{LoadError, LoadResult};
use crate::audio::AudioManager;
use crate::catalog::{Catalog, HandlerUnit};
use crate::config::ModulesConfig;

/// File matching and walk behaviour
#[derive(Debug, Clone)]
pub struct LoaderSettings {
    patterns: Vec<glob::Pattern>,
    follow_links: bool,
}

impl Default for LoaderSettings {
    fn default() -> Self {
        Self {
            patterns: ["*.yml", "*.yaml"]
                .iter()
                .filter_map(|p| glob::Pattern::new(p).ok())
                .collect(),
            follow_links: false,
        }
    }
}

impl LoaderSettings {
    pub fn new(patterns: &[String], follow_links: bool) -> Result<Self, glob::PatternError> {
        let patterns = patterns
            .iter()
            .map(|p| glob::Pattern::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns, follow_links })
    }

    pub fn from_config(config: &ModulesConfig) -> Result<Self, glob::PatternError> {
        Self::new(&config.patterns, config.follow_links)
    }

    /// Does the file name mark a loadable unit
    pub fn matches(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|name| self.patterns.iter().any(|p| p.matches(name)))
    }
}

/// A manifest that passed shape validation
struct Prepared {
    id: String,
    entry: String,
    path: PathBuf,
    category: Option<String>,
    manifest: UnitManifest,
    factory: Factory,
}

/// Loads handler units into a catalog
pub struct Loader {
    catalog: Arc<Catalog>,
    index: Arc<PathIndex>,
    factories: Arc<FactoryRegistry>,
    audio: Arc<AudioManager>,
    settings: LoaderSettings,
}

impl Loader {
    pub fn new(
        catalog: Arc<Catalog>,
        index: Arc<PathIndex>,
        factories: Arc<FactoryRegistry>,
        audio: Arc<AudioManager>,
        settings: LoaderSettings,
    ) -> Self {
        Self {
            catalog,
            index,
            factories,
            audio,
            settings,
        }
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn index(&self) -> &Arc<PathIndex> {
        &self.index
    }

    pub fn audio(&self) -> &Arc<AudioManager> {
        &self.audio
    }

    /// Lazily walk `root` depth-first, registering every matching file
    ///
    /// Each call starts a fresh walk. Symlinks are only followed when
    /// configured, and loops are not detected.
    pub fn scan(&self, root: &Path) -> impl Iterator<Item = LoadResult> + '_ {
        info!(root = %root.display(), "Scanning for handler units");
        let root = root.to_path_buf();
        WalkDir::new(&root)
            .follow_links(self.settings.follow_links)
            .sort_by_file_name()
            .into_iter()
            .filter_map(move |entry| match entry {
                Ok(entry) if entry.file_type().is_file() && self.settings.matches(entry.path()) => {
                    let category = category_for(&root, entry.path());
                    Some(self.register(entry.path(), category))
                }
                Ok(_) => None,
                Err(e) => {
                    let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.clone());
                    warn!(path = %path.display(), error = %e, "Walk error");
                    Some(LoadResult::Failed(
                        path.clone(),
                        LoadError::Walk {
                            path,
                            message: e.to_string(),
                        },
                    ))
                }
            })
    }

    /// Load one file and register it, recording its path even when gated
    pub fn register(&self, path: &Path, category: Option<String>) -> LoadResult {
        debug!(path = %path.display(), "Loader::register: called");
        let prepared = match self.prepare(path, category) {
            Ok(prepared) => prepared,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to load unit");
                return LoadResult::Failed(path.to_path_buf(), e);
            }
        };

        self.index.record(
            IndexEntry {
                id: prepared.id.clone(),
                path: prepared.path.clone(),
                category: prepared.category.clone(),
            },
            &prepared.manifest.aliases,
        );

        match self.check_requirements(&prepared).and_then(|_| self.build(prepared)) {
            Ok(unit) => {
                let id = unit.id.clone();
                if let Some(previous) = self.catalog.put(unit) {
                    warn!(%id, previous = %previous.path.display(), "Identifier registered twice, keeping the later file");
                }
                debug!(%id, "Loader::register: registered");
                LoadResult::Loaded(id)
            }
            Err(e) => {
                if e.is_gated() {
                    warn!(path = %path.display(), reason = %e, "Skipped unit");
                } else {
                    warn!(path = %path.display(), error = %e, "Failed to load unit");
                }
                LoadResult::Failed(path.to_path_buf(), e)
            }
        }
    }

    /// Build a unit from one file without touching the catalog or the index
    pub fn load_file(&self, path: &Path, category: Option<String>) -> Result<HandlerUnit, LoadError> {
        debug!(path = %path.display(), "Loader::load_file: called");
        let prepared = self.prepare(path, category)?;
        self.check_requirements(&prepared)?;
        self.build(prepared)
    }

    fn prepare(&self, path: &Path, category: Option<String>) -> Result<Prepared, LoadError> {
        let content = fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let manifest = UnitManifest::parse(&content).map_err(|source| LoadError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        let entry = manifest
            .entry
            .clone()
            .filter(|e| !e.trim().is_empty())
            .ok_or_else(|| LoadError::MissingEntry {
                path: path.to_path_buf(),
            })?;
        let factory = self.factories.get(&entry).ok_or_else(|| LoadError::UnknownEntry {
            path: path.to_path_buf(),
            entry: entry.clone(),
        })?;

        let id = match &manifest.name {
            Some(name) => name.clone(),
            None => path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default(),
        };
        if let Some(bad) = std::iter::once(&id)
            .chain(manifest.aliases.iter())
            .find(|name| !is_valid_identifier(name))
        {
            return Err(LoadError::InvalidIdentifier {
                path: path.to_path_buf(),
                id: bad.clone(),
            });
        }

        Ok(Prepared {
            id,
            entry,
            path: path.to_path_buf(),
            category,
            manifest,
            factory,
        })
    }

    fn check_requirements(&self, prepared: &Prepared) -> Result<(), LoadError> {
        for requirement in &prepared.manifest.requires {
            match requirement {
                Requirement::Audio => {
                    if self.audio.status().unavailable {
                        return Err(LoadError::BackendUnavailable {
                            id: prepared.id.clone(),
                        });
                    }
                }
                Requirement::Env(var) => {
                    if std::env::var(var).map(|v| v.is_empty()).unwrap_or(true) {
                        return Err(LoadError::MissingEnv {
                            id: prepared.id.clone(),
                            var: var.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    fn build(&self, prepared: Prepared) -> Result<HandlerUnit, LoadError> {
        let handler = (prepared.factory)(&prepared.manifest).map_err(|reason| LoadError::Factory {
            path: prepared.path.clone(),
            entry: prepared.entry.clone(),
            reason,
        })?;
        let manifest = prepared.manifest;
        Ok(HandlerUnit {
            id: prepared.id,
            path: prepared.path,
            entry: prepared.entry,
            category: prepared.category,
            description: manifest.description,
            aliases: manifest.aliases,
            requires: manifest.requires,
            param_hints: manifest.param_hints,
            loaded_at: Utc::now(),
            handler,
        })
    }
}

/// First directory below the root, if the file is not directly in it
fn category_for(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parent = relative.parent()?;
    parent
        .components()
        .next()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
}
