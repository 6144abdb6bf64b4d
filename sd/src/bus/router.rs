//! Worker-side command dispatch

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::handle::BusHandle;
use super::messages::{BusCommand, BusError, BusReply, Participant};

/// Handler for one named command
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, from: Participant, command: BusCommand) -> BusReply;
}

/// Named command handlers registered at worker startup
#[derive(Clone, Default)]
pub struct CommandRouter {
    handlers: HashMap<String, Arc<dyn CommandHandler>>,
}

impl CommandRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, handler: Arc<dyn CommandHandler>) {
        debug!(%name, "CommandRouter::register: called");
        if self.handlers.insert(name.to_string(), handler).is_some() {
            warn!(%name, "Command handler replaced");
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered command names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Run the matching handler in its own task and send its reply
    ///
    /// A command without a handler is answered with
    /// [`BusError::UnknownCommand`] rather than dropped.
    pub fn dispatch(
        &self,
        bus: &BusHandle,
        request_id: String,
        from: Participant,
        command: BusCommand,
    ) -> JoinHandle<()> {
        let name = command.name().to_string();
        debug!(%request_id, %from, %name, "CommandRouter::dispatch: called");
        let handler = self.handlers.get(&name).cloned();
        let bus = bus.clone();

        tokio::spawn(async move {
            let result = match handler {
                Some(handler) => match AssertUnwindSafe(handler.handle(from, command)).catch_unwind().await {
                    Ok(reply) => Ok(reply),
                    Err(_) => {
                        error!(%name, %request_id, "Command handler panicked");
                        Err(BusError::Handler(format!("handler for '{name}' panicked")))
                    }
                },
                None => {
                    warn!(%name, %from, "No handler for command");
                    Err(BusError::UnknownCommand { name })
                }
            };
            if let Err(e) = bus.reply(&request_id, result).await {
                warn!(%request_id, error = %e, "Failed to send command reply");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BusConfig, Hub, Inbound};
    use std::time::Duration;

    struct PingHandler(u32);

    #[async_trait]
    impl CommandHandler for PingHandler {
        async fn handle(&self, _from: Participant, _command: BusCommand) -> BusReply {
            BusReply::Pong { worker: self.0 }
        }
    }

    struct Panics;

    #[async_trait]
    impl CommandHandler for Panics {
        async fn handle(&self, _from: Participant, _command: BusCommand) -> BusReply {
            panic!("boom")
        }
    }

    /// Worker 1 answers every inbound command through `router`
    async fn serve(router: CommandRouter) -> (BusHandle, tokio::task::JoinHandle<()>) {
        let hub = Hub::new(BusConfig::default());
        let caller = hub.register(Participant::Worker(0)).await.unwrap();
        let worker = hub.register(Participant::Worker(1)).await.unwrap();
        tokio::spawn(hub.run());

        let task = tokio::spawn(async move {
            while let Some(msg) = worker.recv().await {
                if let Inbound::Command {
                    request_id,
                    from,
                    command,
                } = msg
                {
                    router.dispatch(&worker, request_id, from, command);
                }
            }
        });
        (caller, task)
    }

    #[tokio::test]
    async fn test_dispatch_to_handler() {
        let mut router = CommandRouter::new();
        router.register("ping", Arc::new(PingHandler(1)));
        assert_eq!(router.names(), vec!["ping"]);

        let (caller, _task) = serve(router).await;
        let reply = caller.command(Participant::Worker(1), BusCommand::Ping).await;
        assert_eq!(reply, Ok(BusReply::Pong { worker: 1 }));
    }

    #[tokio::test]
    async fn test_unknown_command_is_delivery_failure() {
        let (caller, _task) = serve(CommandRouter::new()).await;
        let reply = caller
            .command_with_timeout(
                Participant::Worker(1),
                BusCommand::Custom {
                    name: "restart".into(),
                    payload: serde_json::Value::Null,
                },
                Duration::from_secs(2),
            )
            .await;
        assert_eq!(
            reply,
            Err(BusError::UnknownCommand {
                name: "restart".into()
            })
        );
    }

    #[tokio::test]
    async fn test_panicking_handler_still_replies() {
        let mut router = CommandRouter::new();
        router.register("ping", Arc::new(Panics));
        let (caller, _task) = serve(router).await;

        let reply = caller
            .command_with_timeout(Participant::Worker(1), BusCommand::Ping, Duration::from_secs(2))
            .await;
        assert!(matches!(reply, Err(BusError::Handler(_))));
    }
}
