//! BroadcastManager - owns the worker's visible status

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tracing::{debug, info, warn};

use super::state::{BroadcastState, Mode, StatusFormat};
use super::store::CentralStore;
use crate::bus::{BusError, BusEvent, BusHandle};
use crate::gateway::Gateway;
use sharedstore::StoreError;

#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("Central store: {0}")]
    Store(#[from] StoreError),

    #[error("Bus: {0}")]
    Bus(#[from] BusError),
}

/// Rotation and override for one worker
///
/// Every change to the displayed status happens while the state lock is
/// held, so a tick can never overwrite an override that began after it
/// looked at the mode.
pub struct BroadcastManager {
    state: Mutex<BroadcastState>,
    gateway: Arc<dyn Gateway>,
    store: Arc<dyn CentralStore>,
    bus: Option<BusHandle>,
    format: StatusFormat,
}

impl BroadcastManager {
    pub fn new(
        state: BroadcastState,
        gateway: Arc<dyn Gateway>,
        store: Arc<dyn CentralStore>,
        bus: Option<BusHandle>,
        format: StatusFormat,
    ) -> Self {
        Self {
            state: Mutex::new(state),
            gateway,
            store,
            bus,
            format,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BroadcastState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn mode(&self) -> Mode {
        self.lock().mode()
    }

    pub fn override_value(&self) -> Option<String> {
        self.lock().override_value().map(str::to_string)
    }

    pub fn format(&self) -> &StatusFormat {
        &self.format
    }

    /// Adopt an override persisted by another worker
    ///
    /// Must run before the first rotation tick. A failed read is logged and
    /// treated as no override.
    pub fn hydrate(&self) -> Mode {
        debug!("BroadcastManager::hydrate: called");
        match self.store.read_override() {
            Ok(Some(value)) => {
                info!(%value, "Hydrated active override");
                self.show_override(&mut self.lock(), value);
                Mode::Overridden
            }
            Ok(None) => Mode::Rotating,
            Err(e) => {
                warn!(error = %e, "Failed to read override from central store, rotating");
                Mode::Rotating
            }
        }
    }

    /// Override the status for the whole pool
    ///
    /// The local display changes first. A store failure is reported after
    /// siblings have been notified.
    pub async fn begin_override(&self, value: &str) -> Result<(), BroadcastError> {
        debug!(%value, "BroadcastManager::begin_override: called");
        self.show_override(&mut self.lock(), value.to_string());

        let stored = self.store.write_override(value);
        if let Err(e) = &stored {
            warn!(error = %e, "Failed to persist override");
        }
        if let Some(bus) = &self.bus {
            bus.broadcast(BusEvent::OverrideBegan {
                value: value.to_string(),
            })
            .await?;
        }
        info!(%value, "Override began");
        Ok(stored?)
    }

    /// End the override for the whole pool and rotate immediately
    pub async fn end_override(&self) -> Result<(), BroadcastError> {
        debug!("BroadcastManager::end_override: called");
        let cleared = self.store.clear_override();
        if let Err(e) = &cleared {
            warn!(error = %e, "Failed to clear persisted override");
        }
        if let Some(bus) = &self.bus {
            bus.broadcast(BusEvent::OverrideEnded).await?;
        }
        self.apply_override_ended();
        info!("Override ended");
        Ok(cleared?)
    }

    /// A sibling began an override; repeating it is harmless
    pub fn apply_override_began(&self, value: &str) {
        debug!(%value, "BroadcastManager::apply_override_began: called");
        self.show_override(&mut self.lock(), value.to_string());
    }

    /// An override ended; show a fresh rotation value right away
    pub fn apply_override_ended(&self) {
        debug!("BroadcastManager::apply_override_ended: called");
        let mut state = self.lock();
        state.set_override(None);
        self.show_rotation(&state);
    }

    /// One rotation step; returns the text displayed, if any
    pub fn tick(&self) -> Option<String> {
        let state = self.lock();
        if state.mode() == Mode::Overridden {
            debug!("BroadcastManager::tick: overridden, skipping");
            return None;
        }
        self.show_rotation(&state)
    }

    /// Status shown while the worker shuts down
    pub fn show_shutdown(&self) {
        let _state = self.lock();
        self.gateway.set_status(self.format.presence, &self.format.shutdown_status);
    }

    fn show_override(&self, state: &mut BroadcastState, value: String) {
        self.gateway.set_status(self.format.presence, &value);
        state.set_override(Some(value));
    }

    fn show_rotation(&self, state: &BroadcastState) -> Option<String> {
        let Some(message) = state.pick() else {
            warn!("Rotation pool is empty, status unchanged");
            return None;
        };
        let text = self.format.render(message);
        self.gateway.set_status(self.format.presence, &text);
        Some(text)
    }
}
