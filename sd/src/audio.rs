//! Audio backend connection manager
//!
//! Only the availability contract is modelled here. Each configured node is
//! probed over HTTP; the resulting flags decide whether units that require
//! audio may register.

use std::sync::atomic::{AtomicBool, Ordering};

use eyre::{Context, Result};
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::config::{AudioConfig, AudioNode};

/// Snapshot of the backend flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AudioStatus {
    /// Backend is (transiently) unavailable
    pub unavailable: bool,
    pub connected: bool,
}

/// Tracks reachability of the audio backend nodes
#[derive(Debug)]
pub struct AudioManager {
    nodes: Vec<AudioNode>,
    client: reqwest::Client,
    unavailable: AtomicBool,
    connected: AtomicBool,
    connecting: AtomicBool,
}

impl AudioManager {
    pub fn new(config: &AudioConfig) -> Result<Self> {
        debug!(nodes = config.nodes.len(), "AudioManager::new: called");
        let client = reqwest::Client::builder()
            .timeout(config.probe_timeout())
            .build()
            .context("Failed to build audio probe client")?;
        Ok(Self {
            nodes: config.nodes.clone(),
            client,
            unavailable: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            connecting: AtomicBool::new(false),
        })
    }

    /// Current flags
    pub fn status(&self) -> AudioStatus {
        AudioStatus {
            unavailable: self.unavailable.load(Ordering::SeqCst),
            connected: self.connected.load(Ordering::SeqCst),
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Probe every node; returns true when the backend is unavailable
    ///
    /// With no nodes configured the backend counts as unavailable.
    pub async fn check_status(&self) -> bool {
        debug!("AudioManager::check_status: called");
        let reachable = self.probe_all().await;
        let unavailable = self.nodes.is_empty() || reachable < self.nodes.len();
        self.unavailable.store(unavailable, Ordering::SeqCst);
        if unavailable {
            warn!(reachable, total = self.nodes.len(), "Audio backend unavailable");
        }
        unavailable
    }

    /// Establish the backend session; no-op when connected or already connecting
    pub async fn connect(&self) {
        if self.connected.load(Ordering::SeqCst) {
            debug!("AudioManager::connect: already connected");
            return;
        }
        if self.connecting.swap(true, Ordering::SeqCst) {
            debug!("AudioManager::connect: connection already in progress");
            return;
        }

        let reachable = self.probe_all().await;
        self.connected.store(reachable > 0, Ordering::SeqCst);
        self.connecting.store(false, Ordering::SeqCst);
        info!(reachable, total = self.nodes.len(), "Audio backend connect finished");
    }

    /// Re-establish every node; returns how many are reachable
    pub async fn reload(&self) -> usize {
        debug!("AudioManager::reload: called");
        self.connected.store(false, Ordering::SeqCst);
        let reachable = self.probe_all().await;
        self.unavailable
            .store(self.nodes.is_empty() || reachable < self.nodes.len(), Ordering::SeqCst);
        self.connected.store(reachable > 0, Ordering::SeqCst);
        info!(reachable, "Audio backend reloaded");
        reachable
    }

    /// Release the backend session
    pub fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            info!("Audio backend released");
        }
    }

    async fn probe_all(&self) -> usize {
        let probes = self.nodes.iter().map(|node| self.probe(node));
        join_all(probes).await.into_iter().filter(|ok| *ok).count()
    }

    async fn probe(&self, node: &AudioNode) -> bool {
        let url = node.version_url();
        let result = self
            .client
            .get(&url)
            .header("Authorization", &node.password)
            .send()
            .await
            .and_then(|resp| resp.error_for_status());
        match result {
            Ok(_) => {
                debug!(%url, "AudioManager::probe: reachable");
                true
            }
            Err(e) => {
                warn!(%url, error = %e, "Audio node unreachable");
                false
            }
        }
    }
}
