//! Repeating rotation task

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use super::manager::BroadcastManager;

/// Cancellable task calling [`BroadcastManager::tick`] every period
///
/// The first tick fires immediately. A panicking tick is logged and the
/// schedule continues.
pub struct RotationTask {
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl RotationTask {
    pub fn spawn(manager: Arc<BroadcastManager>, period: Duration) -> Self {
        debug!(?period, "RotationTask::spawn: called");
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        match catch_unwind(AssertUnwindSafe(|| manager.tick())) {
                            Ok(Some(text)) => debug!(status = %text, "Rotated status"),
                            Ok(None) => {}
                            Err(_) => error!("Rotation tick panicked"),
                        }
                    }
                    _ = &mut shutdown_rx => {
                        info!("Rotation stopped");
                        break;
                    }
                }
            }
        });

        Self {
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the task and wait for it to exit
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for RotationTask {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
