//! Factory registry
//!
//! Manifests name their entry point; the registry maps that name to a typed
//! constructor. Nothing is loaded by reflection: a manifest whose entry is not
//! registered here is rejected at load time.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rand::seq::IndexedRandom;
use tracing::debug;

use super::manifest::UnitManifest;
use crate::catalog::Handler;
use crate::gateway::Invocation;

/// Constructor for a handler; `Err` carries a human-readable reason
pub type Factory = Arc<dyn Fn(&UnitManifest) -> Result<Arc<dyn Handler>, String> + Send + Sync>;

/// Named handler constructors
#[derive(Clone, Default)]
pub struct FactoryRegistry {
    factories: HashMap<String, Factory>,
}

impl FactoryRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with `reply`, `echo` and `choose`
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("reply", |m: &UnitManifest| {
            let text = m.param_str("text").ok_or("params.text is required")?;
            Ok(Arc::new(ReplyHandler { text: text.to_string() }) as Arc<dyn Handler>)
        });
        registry.register("echo", |m: &UnitManifest| {
            let prefix = m.param_str("prefix").unwrap_or_default().to_string();
            Ok(Arc::new(EchoHandler { prefix }) as Arc<dyn Handler>)
        });
        registry.register("choose", |m: &UnitManifest| {
            Ok(Arc::new(ChooseHandler {
                choices: m.param_list("choices"),
            }) as Arc<dyn Handler>)
        });
        registry
    }

    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&UnitManifest) -> Result<Arc<dyn Handler>, String> + Send + Sync + 'static,
    {
        debug!(%name, "FactoryRegistry::register: called");
        self.factories.insert(name.to_string(), Arc::new(factory));
    }

    pub fn get(&self, name: &str) -> Option<Factory> {
        self.factories.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}

struct ReplyHandler {
    text: String,
}

#[async_trait]
impl Handler for ReplyHandler {
    async fn run(&self, _invocation: &Invocation) -> eyre::Result<String> {
        Ok(self.text.clone())
    }
}

struct EchoHandler {
    prefix: String,
}

#[async_trait]
impl Handler for EchoHandler {
    async fn run(&self, invocation: &Invocation) -> eyre::Result<String> {
        if invocation.args.is_empty() {
            return Err(eyre::eyre!("nothing to echo"));
        }
        Ok(format!("{}{}", self.prefix, invocation.args.join(" ")))
    }
}

struct ChooseHandler {
    choices: Vec<String>,
}

#[async_trait]
impl Handler for ChooseHandler {
    async fn run(&self, invocation: &Invocation) -> eyre::Result<String> {
        let pool = if invocation.args.is_empty() {
            &self.choices
        } else {
            &invocation.args
        };
        pool.choose(&mut rand::rng())
            .cloned()
            .ok_or_else(|| eyre::eyre!("no choices given"))
    }
}
