//! Pool of workers sharing one command bus

use std::collections::BTreeMap;
use std::sync::Arc;

use eyre::{Context, Result, eyre};
use futures::future::join_all;
use sharedstore::SharedStore;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::VERSION;
use crate::broadcast::CentralStore;
use crate::bus::{BusCommand, BusConfig, BusError, BusHandle, BusReply, BusRequest, Hub, Inbound, Participant, WorkerId};
use crate::config::Config;
use crate::gateway::{Gateway, Invocation, LogGateway};
use crate::ipc::{ControlMessage, ControlResponse, WorkerResult};
use crate::loader::FactoryRegistry;
use crate::worker::{Worker, WorkerDeps, WorkerSettings};

/// Builds the gateway for a worker
pub type GatewayFactory = Arc<dyn Fn(WorkerId) -> Arc<dyn Gateway> + Send + Sync>;

/// Buffer for each worker's invocation queue
const INVOCATION_BUFFER: usize = 64;

struct WorkerSlot {
    invocations: mpsc::Sender<Invocation>,
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Running pool: hub, workers and the controller endpoint
pub struct Pool {
    settings: WorkerSettings,
    bus_config: BusConfig,
    hub_tx: mpsc::Sender<BusRequest>,
    hub_task: Option<JoinHandle<()>>,
    controller: BusHandle,
    drain_task: JoinHandle<()>,
    store: Arc<dyn CentralStore>,
    factories: Arc<FactoryRegistry>,
    gateways: GatewayFactory,
    workers: BTreeMap<WorkerId, WorkerSlot>,
}

impl Pool {
    /// Start with logging gateways and the configured shared store
    pub async fn start(config: &Config) -> Result<Self> {
        let store = SharedStore::open(&config.store.dir)
            .with_context(|| format!("Failed to open shared store at {}", config.store.dir.display()))?;
        let gateways: GatewayFactory =
            Arc::new(|id: WorkerId| Arc::new(LogGateway::new(format!("worker-{id}"))) as Arc<dyn Gateway>);
        Self::start_with(
            config,
            Arc::new(store),
            Arc::new(FactoryRegistry::with_builtins()),
            gateways,
        )
        .await
    }

    /// Start `config.pool.workers` workers with explicit collaborators
    pub async fn start_with(
        config: &Config,
        store: Arc<dyn CentralStore>,
        factories: Arc<FactoryRegistry>,
        gateways: GatewayFactory,
    ) -> Result<Self> {
        debug!(workers = config.pool.workers, "Pool::start_with: called");
        let settings = WorkerSettings::from_config(config)?;

        let hub = Hub::new(config.bus.clone());
        let hub_tx = hub.sender();
        let controller = hub.register(Participant::Controller).await?;
        let hub_task = tokio::spawn(hub.run());
        let drain_task = tokio::spawn(drain_controller(controller.clone()));

        let mut pool = Self {
            settings,
            bus_config: config.bus.clone(),
            hub_tx,
            hub_task: Some(hub_task),
            controller,
            drain_task,
            store,
            factories,
            gateways,
            workers: BTreeMap::new(),
        };

        for id in 0..config.pool.workers {
            pool.spawn_worker(id).await?;
        }
        info!(workers = pool.workers.len(), "Pool started");
        Ok(pool)
    }

    /// Start one worker and its run loop
    pub async fn spawn_worker(&mut self, id: WorkerId) -> Result<()> {
        debug!(worker = id, "Pool::spawn_worker: called");
        if self.workers.contains_key(&id) {
            return Err(eyre!("Worker {} is already running", id));
        }

        let bus = BusHandle::join(self.hub_tx.clone(), &self.bus_config, Participant::Worker(id)).await?;
        let deps = WorkerDeps {
            gateway: (self.gateways)(id),
            store: self.store.clone(),
            factories: self.factories.clone(),
        };
        let worker = Worker::start(id, &self.settings, bus, deps)
            .await
            .with_context(|| format!("Failed to start worker {id}"))?;

        let (inv_tx, inv_rx) = mpsc::channel(INVOCATION_BUFFER);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(worker.run(inv_rx, shutdown_rx));

        self.workers.insert(
            id,
            WorkerSlot {
                invocations: inv_tx,
                shutdown_tx,
                task,
            },
        );
        Ok(())
    }

    /// Run one worker's shutdown sequence; false if it was not running
    pub async fn stop_worker(&mut self, id: WorkerId) -> bool {
        debug!(worker = id, "Pool::stop_worker: called");
        let Some(slot) = self.workers.remove(&id) else {
            return false;
        };
        let _ = slot.shutdown_tx.send(());
        if let Err(e) = slot.task.await {
            warn!(worker = id, error = %e, "Worker task ended abnormally");
        }
        true
    }

    /// Stop and start one worker; the new instance hydrates from the store
    pub async fn restart_worker(&mut self, id: WorkerId) -> Result<()> {
        info!(worker = id, "Restarting worker");
        self.stop_worker(id).await;
        self.spawn_worker(id).await
    }

    pub fn worker_ids(&self) -> Vec<WorkerId> {
        self.workers.keys().copied().collect()
    }

    /// Queue for delivering invocations to one worker
    pub fn invocations(&self, id: WorkerId) -> Option<mpsc::Sender<Invocation>> {
        self.workers.get(&id).map(|slot| slot.invocations.clone())
    }

    /// The pool's own bus endpoint
    pub fn controller(&self) -> &BusHandle {
        &self.controller
    }

    /// Answer one control socket request
    pub async fn handle_control(&self, msg: ControlMessage) -> ControlResponse {
        debug!(?msg, "Pool::handle_control: called");
        match msg {
            ControlMessage::Reload { id, worker } => {
                self.fan_out(worker, BusCommand::Reload { id }).await
            }
            ControlMessage::ReloadAudio { worker } => self.fan_out(worker, BusCommand::ReloadAudio).await,
            ControlMessage::BeginOverride { value, worker } => {
                self.send_one(worker, BusCommand::BeginOverride { value }).await
            }
            ControlMessage::EndOverride { worker } => self.send_one(worker, BusCommand::EndOverride).await,
            ControlMessage::Ping => ControlResponse::Pong {
                version: VERSION.to_string(),
                workers: self.worker_ids(),
            },
            ControlMessage::Shutdown => ControlResponse::Ok,
        }
    }

    /// Send to one worker, or to every worker when none is named
    async fn fan_out(&self, worker: Option<WorkerId>, command: BusCommand) -> ControlResponse {
        let targets = match worker {
            Some(id) => vec![id],
            None => self.worker_ids(),
        };
        if targets.is_empty() {
            return ControlResponse::Error {
                message: "No workers running".to_string(),
            };
        }

        let calls = targets.iter().map(|id| {
            let command = command.clone();
            async move { (*id, self.controller.command(Participant::Worker(*id), command).await) }
        });
        let entries = join_all(calls)
            .await
            .into_iter()
            .map(|(worker, result)| worker_result(worker, result))
            .collect();
        ControlResponse::Results { entries }
    }

    /// Send to the named worker or the lowest-numbered one
    async fn send_one(&self, worker: Option<WorkerId>, command: BusCommand) -> ControlResponse {
        let Some(target) = worker.or_else(|| self.worker_ids().first().copied()) else {
            return ControlResponse::Error {
                message: "No workers running".to_string(),
            };
        };
        let result = self.controller.command(Participant::Worker(target), command).await;
        ControlResponse::Results {
            entries: vec![worker_result(target, result)],
        }
    }

    /// Stop every worker, then the hub; later calls do nothing
    pub async fn shutdown(&mut self) {
        let Some(hub_task) = self.hub_task.take() else {
            debug!("Pool::shutdown: already stopped");
            return;
        };
        info!("Pool shutting down");
        for id in self.worker_ids() {
            self.stop_worker(id).await;
        }
        let _ = self.controller.leave().await;
        if self.hub_tx.send(BusRequest::Shutdown).await.is_err() {
            debug!("Pool::shutdown: hub already stopped");
        }
        if let Err(e) = hub_task.await {
            warn!(error = %e, "Hub task ended abnormally");
        }
        self.drain_task.abort();
        info!("Pool stopped");
    }
}

fn worker_result(worker: WorkerId, result: Result<BusReply, BusError>) -> WorkerResult {
    let (ok, detail) = match result {
        Ok(BusReply::Reloaded { id }) => (true, id),
        Ok(BusReply::AudioReloaded { count }) => (true, format!("{count} audio node(s) reachable")),
        Ok(BusReply::Ack) => (true, "ok".to_string()),
        Ok(BusReply::Pong { worker }) => (true, format!("worker {worker} alive")),
        Ok(BusReply::Failed { reason }) => (false, reason),
        Err(e) => (false, e.to_string()),
    };
    WorkerResult { worker, ok, detail }
}

/// Keep the controller's inbound queue empty so the hub never blocks on it
async fn drain_controller(controller: BusHandle) {
    while let Some(msg) = controller.recv().await {
        match msg {
            Inbound::Event { from, event } => debug!(%from, event = event.event_type(), "Controller saw event"),
            Inbound::Command {
                request_id,
                from,
                command,
            } => {
                let name = command.name().to_string();
                let _ = controller
                    .reply(&request_id, Err(BusError::UnknownCommand { name }))
                    .await;
                debug!(%from, "Controller refused command");
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::broadcast::store::tests::MemoryStore;
    use crate::loader::scan::tests::write;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tempfile::TempDir;

    pub(crate) struct Gateways(Mutex<HashMap<WorkerId, Arc<LogGateway>>>);

    impl Gateways {
        pub(crate) fn get(&self, id: WorkerId) -> Arc<LogGateway> {
            self.0.lock().unwrap().get(&id).cloned().unwrap()
        }
    }

    pub(crate) async fn pool(workers: u32) -> (TempDir, Arc<Gateways>, Pool) {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "modules/ping.yml", "entry: reply\nparams:\n  text: pong\n");

        let mut config = Config::default();
        config.pool.workers = workers;
        config.modules.root = temp.path().join("modules").to_string_lossy().to_string();
        config.broadcast.messages = vec!["a".to_string()];
        config.broadcast.template = "{message}".to_string();
        config.audio.probe_timeout_ms = 200;

        let gateways = Arc::new(Gateways(Mutex::new(HashMap::new())));
        let registry = gateways.clone();
        let factory: GatewayFactory = Arc::new(move |id: WorkerId| {
            let gateway = Arc::new(LogGateway::new(format!("worker-{id}")));
            registry.0.lock().unwrap().insert(id, gateway.clone());
            gateway as Arc<dyn Gateway>
        });

        let pool = Pool::start_with(
            &config,
            Arc::new(MemoryStore::default()),
            Arc::new(FactoryRegistry::with_builtins()),
            factory,
        )
        .await
        .unwrap();
        (temp, gateways, pool)
    }

    #[tokio::test]
    async fn test_ping_lists_workers() {
        let (_temp, _gateways, mut pool) = pool(3).await;
        match pool.handle_control(ControlMessage::Ping).await {
            ControlResponse::Pong { version, workers } => {
                assert_eq!(version, VERSION);
                assert_eq!(workers, vec![0, 1, 2]);
            }
            other => panic!("unexpected {other:?}"),
        }
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_reload_fans_out() {
        let (_temp, _gateways, mut pool) = pool(2).await;
        let response = pool
            .handle_control(ControlMessage::Reload {
                id: "ping".to_string(),
                worker: None,
            })
            .await;
        match &response {
            ControlResponse::Results { entries } => {
                assert_eq!(entries.len(), 2);
                assert!(entries.iter().all(|e| e.ok && e.detail == "ping"));
            }
            other => panic!("unexpected {other:?}"),
        }

        let response = pool
            .handle_control(ControlMessage::Reload {
                id: "missing".to_string(),
                worker: Some(1),
            })
            .await;
        assert!(!response.all_ok());
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_override_reaches_every_worker() {
        let (_temp, gateways, mut pool) = pool(2).await;
        let response = pool
            .handle_control(ControlMessage::BeginOverride {
                value: "SALE".to_string(),
                worker: None,
            })
            .await;
        assert!(response.all_ok());
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert_eq!(gateways.get(0).current_status().as_deref(), Some("SALE"));
        assert_eq!(gateways.get(1).current_status().as_deref(), Some("SALE"));

        assert!(pool.handle_control(ControlMessage::EndOverride { worker: Some(1) }).await.all_ok());
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert_eq!(gateways.get(0).current_status().as_deref(), Some("a"));
        assert_eq!(gateways.get(1).current_status().as_deref(), Some("a"));
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_restart_and_stop() {
        let (_temp, gateways, mut pool) = pool(2).await;
        pool.restart_worker(1).await.unwrap();
        assert_eq!(pool.worker_ids(), vec![0, 1]);
        assert!(pool.invocations(1).is_some());
        assert!(pool.spawn_worker(1).await.is_err());

        assert!(pool.stop_worker(0).await);
        assert!(!pool.stop_worker(0).await);
        assert_eq!(
            gateways.get(0).current_status().as_deref(),
            Some("Restarting/shutting down...")
        );

        let response = pool
            .handle_control(ControlMessage::Reload {
                id: "ping".to_string(),
                worker: Some(0),
            })
            .await;
        match response {
            ControlResponse::Results { entries } => {
                assert!(!entries[0].ok);
                assert!(entries[0].detail.contains("not reachable"));
            }
            other => panic!("unexpected {other:?}"),
        }
        pool.shutdown().await;
    }
}
