//! BusHandle - participant interface to the hub

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

use super::config::BusConfig;
use super::messages::{BusCommand, BusError, BusEvent, BusMetrics, BusReply, BusRequest, Inbound, Participant};

/// Extra wait past the hub's own deadline before the caller gives up
const CALLER_GRACE: Duration = Duration::from_millis(500);

/// Handle for one participant
///
/// Cloneable; every clone shares the same inbound receiver, so only one task
/// should call [`BusHandle::recv`].
#[derive(Clone)]
pub struct BusHandle {
    tx: mpsc::Sender<BusRequest>,
    rx: Option<Arc<Mutex<mpsc::Receiver<Inbound>>>>,
    participant: Participant,
    default_timeout: Duration,
}

impl BusHandle {
    /// Register `participant` with the hub behind `tx`
    pub async fn join(
        tx: mpsc::Sender<BusRequest>,
        config: &BusConfig,
        participant: Participant,
    ) -> Result<Self, BusError> {
        debug!(%participant, "BusHandle::join: called");
        let (msg_tx, msg_rx) = mpsc::channel(config.participant_channel_buffer);
        tx.send(BusRequest::Register {
            participant,
            tx: msg_tx,
        })
        .await
        .map_err(|_| BusError::Closed)?;

        Ok(Self {
            tx,
            rx: Some(Arc::new(Mutex::new(msg_rx))),
            participant,
            default_timeout: config.command_timeout(),
        })
    }

    /// Handle that can send but never receives
    pub fn sender_only(tx: mpsc::Sender<BusRequest>, participant: Participant, default_timeout: Duration) -> Self {
        debug!(%participant, "BusHandle::sender_only: called");
        Self {
            tx,
            rx: None,
            participant,
            default_timeout,
        }
    }

    pub fn participant(&self) -> Participant {
        self.participant
    }

    /// Send a command and wait for its reply with the default timeout
    pub async fn command(&self, target: Participant, command: BusCommand) -> Result<BusReply, BusError> {
        self.command_with_timeout(target, command, self.default_timeout).await
    }

    /// Send a command and wait for its reply
    pub async fn command_with_timeout(
        &self,
        target: Participant,
        command: BusCommand,
        timeout: Duration,
    ) -> Result<BusReply, BusError> {
        let request_id = Uuid::now_v7().to_string();
        debug!(from = %self.participant, %target, command = command.name(), %request_id, ?timeout, "BusHandle::command: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        let request = BusRequest::Command {
            request_id: request_id.clone(),
            from: self.participant,
            target,
            command,
            reply_tx,
            timeout,
        };

        // the hub normally answers first; this deadline covers a hub that never does
        let exchange = async {
            self.tx.send(request).await.map_err(|_| BusError::Closed)?;
            reply_rx.await.map_err(|_| BusError::Closed)?
        };
        let result = tokio::time::timeout(timeout.saturating_add(CALLER_GRACE), exchange).await;
        match result {
            Ok(reply) => reply,
            Err(_) => {
                warn!(%target, %request_id, "No answer from command bus");
                Err(BusError::Timeout { request_id })
            }
        }
    }

    /// Broadcast to every other participant
    pub async fn broadcast(&self, event: BusEvent) -> Result<(), BusError> {
        self.send_broadcast(event, false).await
    }

    /// Broadcast to every participant, this one included
    pub async fn broadcast_including_self(&self, event: BusEvent) -> Result<(), BusError> {
        self.send_broadcast(event, true).await
    }

    async fn send_broadcast(&self, event: BusEvent, include_sender: bool) -> Result<(), BusError> {
        debug!(from = %self.participant, event = event.event_type(), include_sender, "BusHandle::broadcast: called");
        self.tx
            .send(BusRequest::Broadcast {
                from: self.participant,
                event,
                include_sender,
            })
            .await
            .map_err(|_| BusError::Closed)
    }

    /// Answer a command this participant received
    pub async fn reply(&self, request_id: &str, result: Result<BusReply, BusError>) -> Result<(), BusError> {
        debug!(from = %self.participant, %request_id, ok = result.is_ok(), "BusHandle::reply: called");
        self.tx
            .send(BusRequest::Reply {
                request_id: request_id.to_string(),
                result,
            })
            .await
            .map_err(|_| BusError::Closed)
    }

    /// Next inbound message; None once the hub drops this participant or for sender-only handles
    pub async fn recv(&self) -> Option<Inbound> {
        let rx = self.rx.as_ref()?;
        let mut guard = rx.lock().await;
        guard.recv().await
    }

    /// Registered participants, sorted
    pub async fn participants(&self) -> Result<Vec<Participant>, BusError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(BusRequest::Participants { reply_tx })
            .await
            .map_err(|_| BusError::Closed)?;
        reply_rx.await.map_err(|_| BusError::Closed)
    }

    pub async fn metrics(&self) -> Result<BusMetrics, BusError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(BusRequest::GetMetrics { reply_tx })
            .await
            .map_err(|_| BusError::Closed)?;
        reply_rx.await.map_err(|_| BusError::Closed)
    }

    /// Unregister from the hub
    pub async fn leave(&self) -> Result<(), BusError> {
        debug!(participant = %self.participant, "BusHandle::leave: called");
        self.tx
            .send(BusRequest::Unregister {
                participant: self.participant,
            })
            .await
            .map_err(|_| BusError::Closed)
    }
}
