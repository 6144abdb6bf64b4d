//! Worker lifecycle
//!
//! A worker owns one catalog, one audio manager and one broadcast manager.
//! Startup runs in a fixed order so an active override is adopted before the
//! first rotation tick and audio-gated units see a fresh backend status.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use eyre::{Context, Result};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::audio::AudioManager;
use crate::broadcast::{BroadcastManager, BroadcastState, CentralStore, RotationTask, StatusFormat};
use crate::bus::{BusCommand, BusEvent, BusHandle, BusReply, CommandHandler, CommandRouter, Inbound, Participant, WorkerId};
use crate::catalog::Catalog;
use crate::config::{AudioConfig, Config};
use crate::gateway::{Gateway, Invocation};
use crate::loader::{FactoryRegistry, LoadResult, Loader, LoaderSettings, PathIndex};
use crate::reload::Reloader;

/// Everything a worker needs from configuration, resolved once for the pool
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub modules_root: PathBuf,
    pub loader: LoaderSettings,
    pub audio: AudioConfig,
    pub rotation_pool: Vec<String>,
    pub rotation_period: Duration,
    pub format: StatusFormat,
}

impl WorkerSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        debug!("WorkerSettings::from_config: called");
        Ok(Self {
            modules_root: config.modules.expanded_root(),
            loader: LoaderSettings::from_config(&config.modules).context("Invalid module file pattern")?,
            audio: config.audio.clone(),
            rotation_pool: config.broadcast.rotation_pool()?,
            rotation_period: config.broadcast.rotation_period(),
            format: StatusFormat::from_config(&config.broadcast, &config.pool.bot_name),
        })
    }
}

/// Collaborators shared by every worker in the pool
#[derive(Clone)]
pub struct WorkerDeps {
    pub gateway: Arc<dyn Gateway>,
    pub store: Arc<dyn CentralStore>,
    pub factories: Arc<FactoryRegistry>,
}

/// Counts from the startup scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub loaded: usize,
    pub failed: usize,
}

/// One member of the pool
pub struct Worker {
    id: WorkerId,
    bus: BusHandle,
    gateway: Arc<dyn Gateway>,
    loader: Arc<Loader>,
    audio: Arc<AudioManager>,
    broadcast: Arc<BroadcastManager>,
    rotation: Option<RotationTask>,
    router: CommandRouter,
    summary: ScanSummary,
}

impl Worker {
    /// Bring a worker up; `bus` must already be registered as this worker
    pub async fn start(id: WorkerId, settings: &WorkerSettings, bus: BusHandle, deps: WorkerDeps) -> Result<Self> {
        debug!(worker = id, "Worker::start: called");

        let audio = Arc::new(AudioManager::new(&settings.audio)?);
        audio.check_status().await;

        let loader = Arc::new(Loader::new(
            Arc::new(Catalog::new()),
            Arc::new(PathIndex::new()),
            deps.factories.clone(),
            audio.clone(),
            settings.loader.clone(),
        ));
        let summary = scan_modules(loader.clone(), settings.modules_root.clone()).await?;
        info!(worker = id, loaded = summary.loaded, failed = summary.failed, "Loaded handler units");

        let broadcast = Arc::new(BroadcastManager::new(
            BroadcastState::new(settings.rotation_pool.clone()),
            deps.gateway.clone(),
            deps.store.clone(),
            Some(bus.clone()),
            settings.format.clone(),
        ));
        broadcast.hydrate();

        let status = audio.status();
        if !status.unavailable && !status.connected {
            audio.connect().await;
        }

        let rotation = RotationTask::spawn(broadcast.clone(), settings.rotation_period);

        let reloader = Reloader::new(loader.clone());
        let mut router = CommandRouter::new();
        router.register(
            "reload",
            Arc::new(ReloadCommand {
                worker: id,
                reloader: reloader.clone(),
                bus: bus.clone(),
            }),
        );
        router.register(
            "reload-audio",
            Arc::new(AudioReloadCommand {
                worker: id,
                audio: audio.clone(),
                reloader,
                bus: bus.clone(),
            }),
        );
        let overrides = Arc::new(OverrideCommand {
            broadcast: broadcast.clone(),
        });
        router.register("begin-override", overrides.clone());
        router.register("end-override", overrides);
        router.register("ping", Arc::new(PingCommand { worker: id }));

        if let Err(e) = bus.broadcast(BusEvent::WorkerReady { worker: id }).await {
            warn!(worker = id, error = %e, "Failed to announce worker");
        }

        info!("Started worker {}", id);
        Ok(Self {
            id,
            bus,
            gateway: deps.gateway,
            loader,
            audio,
            broadcast,
            rotation: Some(rotation),
            router,
            summary,
        })
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        self.loader.catalog()
    }

    pub fn broadcast(&self) -> &Arc<BroadcastManager> {
        &self.broadcast
    }

    pub fn audio(&self) -> &Arc<AudioManager> {
        &self.audio
    }

    pub fn summary(&self) -> ScanSummary {
        self.summary
    }

    /// Registered command names
    pub fn commands(&self) -> Vec<String> {
        self.router.names()
    }

    /// Steady state: bus traffic and invocations until shutdown
    ///
    /// Commands and invocations each run in their own task, so a slow reload
    /// never holds up this loop.
    pub async fn run(self, mut invocations: mpsc::Receiver<Invocation>, mut shutdown: oneshot::Receiver<()>) {
        info!(worker = self.id, "Worker running");
        loop {
            tokio::select! {
                msg = self.bus.recv() => match msg {
                    Some(Inbound::Command { request_id, from, command }) => {
                        self.router.dispatch(&self.bus, request_id, from, command);
                    }
                    Some(Inbound::Event { from, event }) => self.on_event(from, event),
                    None => {
                        warn!(worker = self.id, "Command bus closed");
                        break;
                    }
                },
                Some(invocation) = invocations.recv() => self.invoke(invocation),
                _ = &mut shutdown => {
                    debug!(worker = self.id, "Worker::run: shutdown requested");
                    break;
                }
            }
        }
        self.shutdown().await;
    }

    fn on_event(&self, from: Participant, event: BusEvent) {
        debug!(worker = self.id, %from, event = event.event_type(), "Worker::on_event: called");
        match event {
            BusEvent::OverrideBegan { value } => self.broadcast.apply_override_began(&value),
            BusEvent::OverrideEnded => self.broadcast.apply_override_ended(),
            BusEvent::ReloadSucceeded { worker, id } => info!(worker, %id, "Sibling reloaded unit"),
            BusEvent::ReloadFailed { worker, reason } => warn!(worker, %reason, "Sibling reload failed"),
            BusEvent::AudioReloadSucceeded { worker, count } => {
                info!(worker, count, "Sibling reloaded audio backend")
            }
            BusEvent::AudioReloadFailed { worker } => warn!(worker, "Sibling audio reload failed"),
            BusEvent::WorkerReady { worker } => info!(worker, "Sibling ready"),
        }
    }

    fn invoke(&self, invocation: Invocation) {
        let unit = self.catalog().resolve(&invocation.name);
        let help = (unit.is_none() && invocation.name == "help").then(|| help_text(self.catalog()));
        let gateway = self.gateway.clone();
        let worker = self.id;

        tokio::spawn(async move {
            let content = match (unit, help) {
                (Some(unit), _) => match unit.handler.run(&invocation).await {
                    Ok(out) => out,
                    Err(e) => {
                        warn!(worker, id = %unit.id, error = %e, "Handler failed");
                        format!("Error: {e}")
                    }
                },
                (None, Some(help)) => help,
                (None, None) => {
                    debug!(worker, name = %invocation.name, "No handler for invocation");
                    return;
                }
            };
            if let Err(e) = gateway.reply(&invocation, &content).await {
                warn!(worker, error = %e, "Failed to send reply");
            }
        });
    }

    /// Orderly stop: status, catalog, audio, rotation, bus
    pub async fn shutdown(mut self) {
        debug!(worker = self.id, "Worker::shutdown: called");
        if let Some(rotation) = self.rotation.take() {
            rotation.stop().await;
        }
        self.broadcast.show_shutdown();

        let removed = self.catalog().clear();
        debug!(worker = self.id, removed, "Worker::shutdown: unregistered units");

        self.audio.disconnect();

        if let Err(e) = self.bus.leave().await {
            debug!(worker = self.id, error = %e, "Worker::shutdown: bus already gone");
        }
        info!("Stopped worker {}", self.id);
    }
}

/// Walk the module root off the async runtime
async fn scan_modules(loader: Arc<Loader>, root: PathBuf) -> Result<ScanSummary> {
    tokio::task::spawn_blocking(move || {
        loader.scan(&root).fold(ScanSummary::default(), |mut acc, result| {
            match result {
                LoadResult::Loaded(_) => acc.loaded += 1,
                LoadResult::Failed(..) => acc.failed += 1,
            }
            acc
        })
    })
    .await
    .context("Module scan task failed")
}

/// Help listing grouped by category
fn help_text(catalog: &Catalog) -> String {
    let mut out = String::new();
    let mut current: Option<Option<String>> = None;
    for info in catalog.info() {
        if current.as_ref() != Some(&info.category) {
            out.push_str(&format!("[{}]\n", info.category.as_deref().unwrap_or("general")));
            current = Some(info.category.clone());
        }
        let mut line = format!("  {}", info.id);
        for param in &info.params {
            line.push(' ');
            line.push_str(param);
        }
        if !info.description.is_empty() {
            line.push_str(&format!(" - {}", info.description));
        }
        if !info.aliases.is_empty() {
            line.push_str(&format!(" (aliases: {})", info.aliases.join(", ")));
        }
        out.push_str(&line);
        out.push('\n');
    }
    out
}

struct ReloadCommand {
    worker: WorkerId,
    reloader: Reloader,
    bus: BusHandle,
}

#[async_trait]
impl CommandHandler for ReloadCommand {
    async fn handle(&self, from: Participant, command: BusCommand) -> BusReply {
        let BusCommand::Reload { id: name } = command else {
            return BusReply::Failed {
                reason: format!("'{}' is not a reload", command.name()),
            };
        };
        debug!(worker = self.worker, %from, %name, "ReloadCommand::handle: called");

        let reloader = self.reloader.clone();
        let result = match tokio::task::spawn_blocking(move || reloader.reload(&name)).await {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(e) => Err(format!("reload task failed: {e}")),
        };

        let (event, reply) = match result {
            Ok(id) => (
                BusEvent::ReloadSucceeded {
                    worker: self.worker,
                    id: id.clone(),
                },
                BusReply::Reloaded { id },
            ),
            Err(reason) => {
                warn!(worker = self.worker, %reason, "Reload failed");
                (
                    BusEvent::ReloadFailed {
                        worker: self.worker,
                        reason: reason.clone(),
                    },
                    BusReply::Failed { reason },
                )
            }
        };
        if let Err(e) = self.bus.broadcast(event).await {
            warn!(worker = self.worker, error = %e, "Failed to announce reload result");
        }
        reply
    }
}

struct AudioReloadCommand {
    worker: WorkerId,
    audio: Arc<AudioManager>,
    reloader: Reloader,
    bus: BusHandle,
}

#[async_trait]
impl CommandHandler for AudioReloadCommand {
    async fn handle(&self, from: Participant, _command: BusCommand) -> BusReply {
        debug!(worker = self.worker, %from, "AudioReloadCommand::handle: called");
        let count = self.audio.reload().await;

        // Gated units stay unregistered while any node is down
        if self.audio.status().unavailable {
            if let Err(e) = self.bus.broadcast(BusEvent::AudioReloadFailed { worker: self.worker }).await {
                warn!(worker = self.worker, error = %e, "Failed to announce audio reload result");
            }
            return BusReply::Failed {
                reason: format!("{} of {} audio nodes reachable", count, self.audio.node_count()),
            };
        }

        let reloader = self.reloader.clone();
        match tokio::task::spawn_blocking(move || reloader.reload_gated()).await {
            Ok(ids) if !ids.is_empty() => info!(worker = self.worker, units = ?ids, "Registered gated units"),
            Ok(_) => {}
            Err(e) => warn!(worker = self.worker, error = %e, "Gated unit retry failed"),
        }

        let event = BusEvent::AudioReloadSucceeded {
            worker: self.worker,
            count,
        };
        if let Err(e) = self.bus.broadcast(event).await {
            warn!(worker = self.worker, error = %e, "Failed to announce audio reload result");
        }
        BusReply::AudioReloaded { count }
    }
}

struct OverrideCommand {
    broadcast: Arc<BroadcastManager>,
}

#[async_trait]
impl CommandHandler for OverrideCommand {
    async fn handle(&self, from: Participant, command: BusCommand) -> BusReply {
        debug!(%from, command = command.name(), "OverrideCommand::handle: called");
        let result = match command {
            BusCommand::BeginOverride { value } => self.broadcast.begin_override(&value).await,
            BusCommand::EndOverride => self.broadcast.end_override().await,
            other => {
                return BusReply::Failed {
                    reason: format!("'{}' is not an override command", other.name()),
                };
            }
        };
        match result {
            Ok(()) => BusReply::Ack,
            Err(e) => BusReply::Failed { reason: e.to_string() },
        }
    }
}

struct PingCommand {
    worker: WorkerId,
}

#[async_trait]
impl CommandHandler for PingCommand {
    async fn handle(&self, _from: Participant, _command: BusCommand) -> BusReply {
        BusReply::Pong { worker: self.worker }
    }
}
