//! Hub task implementation

use std::collections::HashMap;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use super::config::BusConfig;
use super::handle::BusHandle;
use super::messages::{BusError, BusMetrics, BusRequest, Inbound, Participant, ReplySender};

/// Command awaiting its reply
struct PendingCommand {
    reply_tx: ReplySender,
    target: Participant,
}

/// Routes commands and broadcasts between participants
///
/// A single task owns the registry, so every receiver sees broadcasts from one
/// sender in the order they were sent. Delivery never waits on a participant:
/// a full inbox fails the command as unreachable and drops the event.
pub struct Hub {
    config: BusConfig,
    tx: mpsc::Sender<BusRequest>,
    rx: mpsc::Receiver<BusRequest>,
}

impl Hub {
    pub fn new(config: BusConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.channel_buffer);
        Self { config, tx, rx }
    }

    /// Sender for creating handles after the hub is running
    pub fn sender(&self) -> mpsc::Sender<BusRequest> {
        self.tx.clone()
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// Register a participant and return its handle
    pub async fn register(&self, participant: Participant) -> Result<BusHandle, BusError> {
        BusHandle::join(self.tx.clone(), &self.config, participant).await
    }

    /// Request shutdown of the hub
    pub async fn shutdown(&self) -> Result<(), BusError> {
        self.tx.send(BusRequest::Shutdown).await.map_err(|_| BusError::Closed)
    }

    /// Run the hub until shutdown is requested
    pub async fn run(mut self) {
        let hub_tx = self.tx.clone();

        let mut registry: HashMap<Participant, mpsc::Sender<Inbound>> = HashMap::new();
        let mut pending: HashMap<String, PendingCommand> = HashMap::new();
        let mut metrics = BusMetrics::default();

        info!("Command bus started");

        while let Some(req) = self.rx.recv().await {
            metrics.messages_received += 1;

            match req {
                BusRequest::Register { participant, tx } => {
                    debug!(%participant, "Registering participant");
                    if registry.insert(participant, tx).is_some() {
                        info!(%participant, "Participant re-registered");
                    }
                    metrics.participants = registry.len();
                }

                BusRequest::Unregister { participant } => {
                    debug!(%participant, "Unregistering participant");
                    registry.remove(&participant);
                    metrics.participants = registry.len();

                    // commands it will never answer
                    let lost: Vec<String> = pending
                        .iter()
                        .filter(|(_, p)| p.target == participant)
                        .map(|(id, _)| id.clone())
                        .collect();
                    for request_id in lost {
                        if let Some(p) = pending.remove(&request_id) {
                            let _ = p.reply_tx.send(Err(BusError::Unreachable(participant)));
                            metrics.unreachable += 1;
                        }
                    }
                    metrics.pending_commands = pending.len();
                }

                BusRequest::Command {
                    request_id,
                    from,
                    target,
                    command,
                    reply_tx,
                    timeout,
                } => {
                    debug!(%request_id, %from, %target, command = command.name(), "Routing command");

                    let Some(tx) = registry.get(&target) else {
                        warn!(%target, command = command.name(), "Command target not registered");
                        metrics.unreachable += 1;
                        let _ = reply_tx.send(Err(BusError::Unreachable(target)));
                        continue;
                    };

                    let msg = Inbound::Command {
                        request_id: request_id.clone(),
                        from,
                        command,
                    };
                    match tx.try_send(msg) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            warn!(%target, "Command target inbox full");
                            metrics.unreachable += 1;
                            let _ = reply_tx.send(Err(BusError::Unreachable(target)));
                            continue;
                        }
                        Err(TrySendError::Closed(_)) => {
                            warn!(%target, "Command target channel closed");
                            registry.remove(&target);
                            metrics.participants = registry.len();
                            metrics.unreachable += 1;
                            let _ = reply_tx.send(Err(BusError::Unreachable(target)));
                            continue;
                        }
                    }
                    metrics.messages_sent += 1;

                    pending.insert(request_id.clone(), PendingCommand { reply_tx, target });
                    metrics.pending_commands = pending.len();

                    let timeout_tx = hub_tx.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(timeout).await;
                        let _ = timeout_tx.send(BusRequest::CommandTimeout { request_id }).await;
                    });
                }

                BusRequest::Reply { request_id, result } => {
                    match pending.remove(&request_id) {
                        Some(p) => {
                            debug!(%request_id, ok = result.is_ok(), "Resolving command");
                            let _ = p.reply_tx.send(result);
                            metrics.pending_commands = pending.len();
                        }
                        None => debug!(%request_id, "Late reply dropped"),
                    }
                }

                BusRequest::CommandTimeout { request_id } => {
                    if let Some(p) = pending.remove(&request_id) {
                        warn!(%request_id, target = %p.target, "Command timed out");
                        let _ = p.reply_tx.send(Err(BusError::Timeout { request_id }));
                        metrics.pending_commands = pending.len();
                        metrics.command_timeouts += 1;
                    }
                }

                BusRequest::Broadcast {
                    from,
                    event,
                    include_sender,
                } => {
                    debug!(%from, event = event.event_type(), "Broadcasting event");
                    for (participant, tx) in &registry {
                        if *participant == from && !include_sender {
                            continue;
                        }
                        let msg = Inbound::Event {
                            from,
                            event: event.clone(),
                        };
                        match tx.try_send(msg) {
                            Ok(()) => metrics.messages_sent += 1,
                            Err(TrySendError::Full(_)) => {
                                warn!(%participant, event = event.event_type(), "Inbox full, event dropped");
                                metrics.dropped_events += 1;
                            }
                            Err(TrySendError::Closed(_)) => {
                                debug!(%participant, "Event for closed inbox discarded");
                            }
                        }
                    }
                }

                BusRequest::Participants { reply_tx } => {
                    let mut participants: Vec<Participant> = registry.keys().copied().collect();
                    participants.sort();
                    let _ = reply_tx.send(participants);
                }

                BusRequest::GetMetrics { reply_tx } => {
                    let _ = reply_tx.send(metrics.clone());
                }

                BusRequest::Shutdown => {
                    info!("Command bus shutting down");
                    break;
                }
            }
        }

        for (_, p) in pending.drain() {
            let _ = p.reply_tx.send(Err(BusError::Closed));
        }
        info!("Command bus stopped");
    }
}
