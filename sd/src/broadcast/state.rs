//! Broadcast state and status formatting

use std::fmt;
use std::sync::Arc;

use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};

use crate::config::BroadcastConfig;
use crate::gateway::Presence;

/// What drives the displayed status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Rotating,
    Overridden,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Rotating => f.write_str("rotating"),
            Mode::Overridden => f.write_str("overridden"),
        }
    }
}

/// Override value plus the rotation pool
///
/// The pool is fixed when the state is built; only the override changes.
#[derive(Debug, Clone)]
pub struct BroadcastState {
    override_value: Option<String>,
    rotation_pool: Arc<[String]>,
}

impl BroadcastState {
    pub fn new(rotation_pool: Vec<String>) -> Self {
        Self {
            override_value: None,
            rotation_pool: rotation_pool.into(),
        }
    }

    pub fn mode(&self) -> Mode {
        match self.override_value {
            Some(_) => Mode::Overridden,
            None => Mode::Rotating,
        }
    }

    pub fn override_value(&self) -> Option<&str> {
        self.override_value.as_deref()
    }

    pub fn rotation_pool(&self) -> &[String] {
        &self.rotation_pool
    }

    pub(crate) fn set_override(&mut self, value: Option<String>) {
        self.override_value = value;
    }

    /// Uniform pick from the pool
    pub(crate) fn pick(&self) -> Option<&str> {
        self.rotation_pool.choose(&mut rand::rng()).map(String::as_str)
    }
}

/// How rotated messages are turned into status text
#[derive(Debug, Clone)]
pub struct StatusFormat {
    pub presence: Presence,
    pub template: String,
    pub bot_name: String,
    pub shutdown_status: String,
}

impl StatusFormat {
    pub fn from_config(config: &BroadcastConfig, bot_name: &str) -> Self {
        Self {
            presence: config.presence,
            template: config.template.clone(),
            bot_name: bot_name.to_string(),
            shutdown_status: config.shutdown_status.clone(),
        }
    }

    /// Apply the template to a rotation message
    pub fn render(&self, message: &str) -> String {
        self.template.replace("{message}", message).replace("{bot}", &self.bot_name)
    }
}

impl Default for StatusFormat {
    fn default() -> Self {
        Self::from_config(&BroadcastConfig::default(), "shardbot")
    }
}
