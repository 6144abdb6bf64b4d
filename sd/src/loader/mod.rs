//! Handler module loading
//!
//! Units are discovered by walking a module root depth-first. Every file
//! whose name matches one of the configured globs is parsed as a
//! [`UnitManifest`], validated, checked against its requirements and built
//! through the [`FactoryRegistry`]. Each attempted file yields exactly one
//! [`LoadResult`]; a bad file is reported and the walk moves on.
//!
//! ```text
//! modules/
//! ├── general/
//! │   ├── ping.yml        -> id "ping", category "general"
//! │   └── echo.yaml       -> id "echo", category "general"
//! └── music/
//!     └── play.yml        -> id "play", category "music", requires [audio]
//! ```

mod factory;
mod index;
mod manifest;
pub(crate) mod scan;

use std::path::PathBuf;

use thiserror::Error;

pub use factory::{Factory, FactoryRegistry};
pub use index::{IndexEntry, PathIndex};
pub use manifest::{Requirement, UnitManifest, is_valid_identifier};
pub use scan::{Loader, LoaderSettings};

/// Why a single unit could not be loaded
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed unit {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Unit {path} declares no entry point")]
    MissingEntry { path: PathBuf },

    #[error("Unit {path} names unknown entry point '{entry}'")]
    UnknownEntry { path: PathBuf, entry: String },

    #[error("Invalid identifier '{id}' in {path}")]
    InvalidIdentifier { path: PathBuf, id: String },

    #[error("Audio backend unavailable, skipped '{id}'")]
    BackendUnavailable { id: String },

    #[error("Environment variable {var} not set, skipped '{id}'")]
    MissingEnv { id: String, var: String },

    #[error("Entry point '{entry}' rejected {path}: {reason}")]
    Factory {
        path: PathBuf,
        entry: String,
        reason: String,
    },

    #[error("Identifier changed from '{expected}' to '{found}'")]
    IdentifierChanged { expected: String, found: String },

    #[error("Cannot walk {path}: {message}")]
    Walk { path: PathBuf, message: String },
}

impl LoadError {
    /// Unit was well-formed but a capability it needs is missing
    pub fn is_gated(&self) -> bool {
        matches!(self, LoadError::BackendUnavailable { .. } | LoadError::MissingEnv { .. })
    }
}

/// Outcome of attempting one file
#[derive(Debug)]
pub enum LoadResult {
    Loaded(String),
    Failed(PathBuf, LoadError),
}

impl LoadResult {
    pub fn is_loaded(&self) -> bool {
        matches!(self, LoadResult::Loaded(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gated_errors() {
        assert!(LoadError::BackendUnavailable { id: "play".into() }.is_gated());
        assert!(
            LoadError::MissingEnv {
                id: "x".into(),
                var: "KEY".into()
            }
            .is_gated()
        );
        assert!(!LoadError::MissingEntry { path: "a.yml".into() }.is_gated());
    }

    #[test]
    fn test_error_messages_name_the_file() {
        let err = LoadError::UnknownEntry {
            path: "modules/x.yml".into(),
            entry: "nope".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("modules/x.yml"));
        assert!(msg.contains("nope"));
    }
}
