//! Unit manifest shape
//!
//! A manifest is a small YAML document:
//!
//! ```yaml
//! name: ping              # optional, defaults to the file stem
//! entry: reply            # required, a registered factory
//! description: Replies with pong
//! aliases: [p]
//! requires: [audio, "env:API_KEY"]
//! param-hints: ["[text]"]
//! params:
//!   text: pong
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// Capability a unit needs before it may register
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Requirement {
    /// The audio backend must be reachable
    Audio,
    /// The named environment variable must be set and non-empty
    Env(String),
}

impl TryFrom<String> for Requirement {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.trim() {
            "audio" | "sound" => Ok(Requirement::Audio),
            other => match other.strip_prefix("env:") {
                Some(var) if !var.is_empty() => Ok(Requirement::Env(var.to_string())),
                _ => Err(format!("unknown requirement '{other}' (expected 'audio' or 'env:NAME')")),
            },
        }
    }
}

impl From<Requirement> for String {
    fn from(value: Requirement) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Requirement::Audio => f.write_str("audio"),
            Requirement::Env(var) => write!(f, "env:{var}"),
        }
    }
}

/// Parsed manifest, before validation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnitManifest {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub entry: Option<String>,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub aliases: Vec<String>,

    #[serde(default)]
    pub requires: Vec<Requirement>,

    #[serde(rename = "param-hints", default)]
    pub param_hints: Vec<String>,

    /// Factory-specific settings
    #[serde(default)]
    pub params: serde_yaml::Value,
}

impl UnitManifest {
    pub fn parse(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }

    /// String parameter lookup
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(|v| v.as_str())
    }

    /// String-list parameter lookup; non-string items are skipped
    pub fn param_list(&self, key: &str) -> Vec<String> {
        self.params
            .get(key)
            .and_then(|v| v.as_sequence())
            .map(|seq| seq.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default()
    }
}

/// Identifiers are non-empty and free of whitespace
pub fn is_valid_identifier(id: &str) -> bool {
    !id.is_empty() && !id.chars().any(char::is_whitespace)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_manifest() {
        let yaml = r#"
name: ping
entry: reply
description: Replies with pong
aliases: [p]
requires: [audio, "env:API_KEY"]
param-hints: ["[text]"]
params:
  text: pong
"#;
        let manifest = UnitManifest::parse(yaml).unwrap();
        assert_eq!(manifest.name.as_deref(), Some("ping"));
        assert_eq!(manifest.entry.as_deref(), Some("reply"));
        assert_eq!(manifest.aliases, vec!["p"]);
        assert_eq!(
            manifest.requires,
            vec![Requirement::Audio, Requirement::Env("API_KEY".to_string())]
        );
        assert_eq!(manifest.param_str("text"), Some("pong"));
    }

    #[test]
    fn test_parse_minimal_manifest() {
        let manifest = UnitManifest::parse("entry: echo\n").unwrap();
        assert!(manifest.name.is_none());
        assert!(manifest.requires.is_empty());
        assert!(manifest.param_list("choices").is_empty());
    }

    #[test]
    fn test_unknown_requirement_rejected() {
        let err = UnitManifest::parse("entry: echo\nrequires: [gpu]\n").unwrap_err();
        assert!(err.to_string().contains("unknown requirement"));
    }

    #[test]
    fn test_sound_is_audio() {
        let manifest = UnitManifest::parse("entry: echo\nrequires: [sound]\n").unwrap();
        assert_eq!(manifest.requires, vec![Requirement::Audio]);
    }

    #[test]
    fn test_requirement_display() {
        assert_eq!(Requirement::Env("X".to_string()).to_string(), "env:X");
        assert_eq!(String::from(Requirement::Audio), "audio");
    }

    #[test]
    fn test_identifier_validation() {
        assert!(is_valid_identifier("ping"));
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier("two words"));
    }
}
