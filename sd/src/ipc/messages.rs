//! Control socket message types
//!
//! Simple JSON-over-newline protocol. Each message is a single line of JSON followed by `\n`.

use serde::{Deserialize, Serialize};

use crate::bus::WorkerId;

/// Requests from the CLI to the pool
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum ControlMessage {
    /// Reload one unit on one worker, or on every worker
    Reload {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        worker: Option<WorkerId>,
    },

    /// Reconnect the audio backend on one worker, or on every worker
    ReloadAudio {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        worker: Option<WorkerId>,
    },

    /// Begin a pool-wide override through one worker (the first by default)
    BeginOverride {
        value: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        worker: Option<WorkerId>,
    },

    /// End the pool-wide override through one worker (the first by default)
    EndOverride {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        worker: Option<WorkerId>,
    },

    /// Ping to check if the pool is alive
    Ping,

    /// Request the pool to stop gracefully
    Shutdown,
}

/// Outcome on one worker
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkerResult {
    pub worker: WorkerId,
    pub ok: bool,
    pub detail: String,
}

/// Responses from the pool to the CLI
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum ControlResponse {
    /// Acknowledgment
    Ok,

    /// Pong response to ping
    Pong { version: String, workers: Vec<WorkerId> },

    /// Per-worker outcomes of a command
    Results { entries: Vec<WorkerResult> },

    /// Error response
    Error { message: String },
}

impl ControlResponse {
    /// True when every per-worker entry succeeded
    pub fn all_ok(&self) -> bool {
        match self {
            ControlResponse::Results { entries } => entries.iter().all(|e| e.ok),
            ControlResponse::Error { .. } => false,
            _ => true,
        }
    }
}
