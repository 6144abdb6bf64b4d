//! Message types for the command bus

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Worker index within the pool
pub type WorkerId = u32;

/// Anything registered with the hub
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Participant {
    Worker(WorkerId),
    /// The pool's own endpoint, used for external control requests
    Controller,
}

impl fmt::Display for Participant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Participant::Worker(id) => write!(f, "worker-{id}"),
            Participant::Controller => f.write_str("controller"),
        }
    }
}

/// Point-to-point request, answered by exactly one reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "kebab-case")]
pub enum BusCommand {
    /// Reload one handler unit
    Reload { id: String },

    /// Reconnect the audio backend and retry gated units
    ReloadAudio,

    /// Force the displayed status for the whole pool
    BeginOverride { value: String },

    /// Return the pool to rotation
    EndOverride,

    Ping,

    /// Anything else; only answered if a handler with this name is registered
    Custom {
        name: String,
        #[serde(default)]
        payload: serde_json::Value,
    },
}

impl BusCommand {
    /// Name used to route the command to a handler
    pub fn name(&self) -> &str {
        match self {
            BusCommand::Reload { .. } => "reload",
            BusCommand::ReloadAudio => "reload-audio",
            BusCommand::BeginOverride { .. } => "begin-override",
            BusCommand::EndOverride => "end-override",
            BusCommand::Ping => "ping",
            BusCommand::Custom { name, .. } => name,
        }
    }
}

/// Result of a delivered command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reply", rename_all = "kebab-case")]
pub enum BusReply {
    Reloaded { id: String },
    AudioReloaded { count: usize },
    Ack,
    Pong { worker: WorkerId },
    /// The command ran and failed; the reason is meant for whoever issued it
    Failed { reason: String },
}

/// Fan-out notification, no reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum BusEvent {
    ReloadSucceeded { worker: WorkerId, id: String },
    ReloadFailed { worker: WorkerId, reason: String },
    AudioReloadSucceeded { worker: WorkerId, count: usize },
    AudioReloadFailed { worker: WorkerId },
    OverrideBegan { value: String },
    OverrideEnded,
    WorkerReady { worker: WorkerId },
}

impl BusEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            BusEvent::ReloadSucceeded { .. } => "reload-succeeded",
            BusEvent::ReloadFailed { .. } => "reload-failed",
            BusEvent::AudioReloadSucceeded { .. } => "audio-reload-succeeded",
            BusEvent::AudioReloadFailed { .. } => "audio-reload-failed",
            BusEvent::OverrideBegan { .. } => "override-began",
            BusEvent::OverrideEnded => "override-ended",
            BusEvent::WorkerReady { .. } => "worker-ready",
        }
    }
}

/// Delivery-level failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    #[error("{0} is not reachable")]
    Unreachable(Participant),

    #[error("No handler registered for command '{name}'")]
    UnknownCommand { name: String },

    #[error("Command {request_id} timed out")]
    Timeout { request_id: String },

    #[error("Command bus closed")]
    Closed,

    #[error("Command handler failed: {0}")]
    Handler(String),
}

/// Messages delivered to a participant by the hub
#[derive(Debug, Clone)]
pub enum Inbound {
    Command {
        request_id: String,
        from: Participant,
        command: BusCommand,
    },
    Event {
        from: Participant,
        event: BusEvent,
    },
}

/// Reply channel for one command
pub type ReplySender = oneshot::Sender<Result<BusReply, BusError>>;

/// Internal requests to the hub task
#[derive(Debug)]
pub enum BusRequest {
    /// Register a participant, replacing any previous registration
    Register {
        participant: Participant,
        tx: mpsc::Sender<Inbound>,
    },

    Unregister { participant: Participant },

    /// Deliver a command to exactly one participant
    Command {
        request_id: String,
        from: Participant,
        target: Participant,
        command: BusCommand,
        reply_tx: ReplySender,
        timeout: Duration,
    },

    /// Answer a pending command
    Reply {
        request_id: String,
        result: Result<BusReply, BusError>,
    },

    /// Fan an event out to every participant
    Broadcast {
        from: Participant,
        event: BusEvent,
        include_sender: bool,
    },

    /// Command timeout notification (internal)
    CommandTimeout { request_id: String },

    /// List registered participants
    Participants {
        reply_tx: oneshot::Sender<Vec<Participant>>,
    },

    GetMetrics {
        reply_tx: oneshot::Sender<BusMetrics>,
    },

    Shutdown,
}

/// Hub counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusMetrics {
    pub participants: usize,
    #[serde(rename = "pending-commands")]
    pub pending_commands: usize,
    #[serde(rename = "messages-sent")]
    pub messages_sent: u64,
    #[serde(rename = "messages-received")]
    pub messages_received: u64,
    #[serde(rename = "command-timeouts")]
    pub command_timeouts: u64,
    pub unreachable: u64,
    /// Events not delivered because the receiver's inbox was full
    #[serde(rename = "dropped-events")]
    pub dropped_events: u64,
}
