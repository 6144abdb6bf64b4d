//! Pool-level behaviour: override propagation, restart hydration and reload isolation

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sharddaemon::broadcast::CentralStore;
use sharddaemon::config::Config;
use sharddaemon::gateway::{Gateway, Invocation, LogGateway};
use sharddaemon::ipc::{ControlMessage, ControlResponse};
use sharddaemon::loader::FactoryRegistry;
use sharddaemon::pool::{GatewayFactory, Pool};
use sharddaemon::WorkerId;
use sharedstore::SharedStore;
use tempfile::TempDir;

const SETTLE: Duration = Duration::from_millis(150);

/// Latest gateway handed to each worker id
#[derive(Default)]
struct Gateways(Mutex<HashMap<WorkerId, Arc<LogGateway>>>);

impl Gateways {
    fn get(&self, id: WorkerId) -> Arc<LogGateway> {
        self.0.lock().unwrap().get(&id).cloned().unwrap()
    }

    fn factory(self: &Arc<Self>) -> GatewayFactory {
        let gateways = self.clone();
        Arc::new(move |id: WorkerId| {
            let gateway = Arc::new(LogGateway::new(format!("worker-{id}")));
            gateways.0.lock().unwrap().insert(id, gateway.clone());
            gateway as Arc<dyn Gateway>
        })
    }
}

struct Fixture {
    temp: TempDir,
    store: Arc<SharedStore>,
    gateways: Arc<Gateways>,
    pool: Pool,
}

fn write(path: &Path, content: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

async fn fixture(workers: u32) -> Fixture {
    let temp = TempDir::new().unwrap();
    write(
        &temp.path().join("modules/general/ping.yml"),
        "entry: reply\naliases: [p]\nparams:\n  text: pong\n",
    );

    let mut config = Config::default();
    config.pool.workers = workers;
    config.modules.root = temp.path().join("modules").to_string_lossy().to_string();
    config.broadcast.messages = vec!["a".to_string(), "b".to_string()];
    config.broadcast.template = "{message}".to_string();

    let store = Arc::new(SharedStore::open(temp.path().join("store")).unwrap());
    let gateways = Arc::new(Gateways::default());
    let pool = Pool::start_with(
        &config,
        store.clone() as Arc<dyn CentralStore>,
        Arc::new(FactoryRegistry::with_builtins()),
        gateways.factory(),
    )
    .await
    .unwrap();

    Fixture {
        temp,
        store,
        gateways,
        pool,
    }
}

async fn invoke(fx: &Fixture, worker: WorkerId, name: &str) -> String {
    let tx = fx.pool.invocations(worker).unwrap();
    tx.send(Invocation::new(name, Vec::new())).await.unwrap();
    tokio::time::sleep(SETTLE).await;
    fx.gateways.get(worker).replies().last().unwrap().1.clone()
}

#[tokio::test]
async fn test_override_survives_restart_and_ends_everywhere() {
    let mut fx = fixture(2).await;

    let response = fx
        .pool
        .handle_control(ControlMessage::BeginOverride {
            value: "SALE".to_string(),
            worker: Some(0),
        })
        .await;
    assert!(response.all_ok());
    tokio::time::sleep(SETTLE).await;
    assert_eq!(fx.gateways.get(1).current_status().as_deref(), Some("SALE"));
    assert_eq!(fx.store.read_override().unwrap().as_deref(), Some("SALE"));

    // A restarted worker adopts the stored override before its first tick
    fx.pool.restart_worker(1).await.unwrap();
    let fresh = fx.gateways.get(1);
    assert_eq!(fresh.status_history(), vec!["SALE"]);

    let response = fx
        .pool
        .handle_control(ControlMessage::EndOverride { worker: Some(0) })
        .await;
    assert!(response.all_ok());
    tokio::time::sleep(SETTLE).await;

    assert_eq!(fx.store.read_override().unwrap(), None);
    for id in [0, 1] {
        let status = fx.gateways.get(id).current_status().unwrap();
        assert!(["a", "b"].contains(&status.as_str()), "worker {id} shows {status}");
    }
    fx.pool.shutdown().await;
}

#[tokio::test]
async fn test_reload_on_one_worker_leaves_others_untouched() {
    let mut fx = fixture(2).await;
    assert_eq!(invoke(&fx, 0, "ping").await, "pong");
    assert_eq!(invoke(&fx, 1, "p").await, "pong");

    write(
        &fx.temp.path().join("modules/general/ping.yml"),
        "entry: reply\naliases: [p]\nparams:\n  text: pong v2\n",
    );
    let response = fx
        .pool
        .handle_control(ControlMessage::Reload {
            id: "p".to_string(),
            worker: Some(0),
        })
        .await;
    match response {
        ControlResponse::Results { entries } => {
            assert_eq!(entries.len(), 1);
            assert!(entries[0].ok);
            assert_eq!(entries[0].detail, "ping");
        }
        other => panic!("unexpected {other:?}"),
    }

    assert_eq!(invoke(&fx, 0, "ping").await, "pong v2");
    assert_eq!(invoke(&fx, 1, "ping").await, "pong");
    fx.pool.shutdown().await;
}

#[tokio::test]
async fn test_broken_edit_keeps_previous_version() {
    let mut fx = fixture(1).await;
    write(&fx.temp.path().join("modules/general/ping.yml"), "entry: [unclosed\n");

    let response = fx
        .pool
        .handle_control(ControlMessage::Reload {
            id: "ping".to_string(),
            worker: None,
        })
        .await;
    assert!(!response.all_ok());
    assert_eq!(invoke(&fx, 0, "ping").await, "pong");
    fx.pool.shutdown().await;
}

#[tokio::test]
async fn test_restart_without_override_rotates() {
    let mut fx = fixture(1).await;
    fx.pool.restart_worker(0).await.unwrap();
    tokio::time::sleep(SETTLE).await;

    let status = fx.gateways.get(0).current_status().unwrap();
    assert!(["a", "b"].contains(&status.as_str()));
    assert_eq!(fx.store.read_override().unwrap(), None);
    fx.pool.shutdown().await;
}
