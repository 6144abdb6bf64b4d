//! Control socket client used by the CLI

use std::path::PathBuf;
use std::time::Duration;

use eyre::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::debug;

use super::get_socket_path;
use super::messages::{ControlMessage, ControlResponse, WorkerResult};
use crate::bus::WorkerId;

/// Timeout for connecting and writing
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default wait for a response; covers a bus command timing out on the pool side
const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(40);

/// Largest request sent, in bytes
const MAX_MESSAGE_SIZE: usize = 4096;

/// Largest response accepted, in bytes
const MAX_RESPONSE_SIZE: usize = 256 * 1024;

/// Client for the pool's control socket
#[derive(Debug, Clone)]
pub struct PoolClient {
    socket_path: PathBuf,
    timeout: Duration,
}

impl Default for PoolClient {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolClient {
    /// Client for the default socket path
    pub fn new() -> Self {
        Self {
            socket_path: get_socket_path(),
            timeout: DEFAULT_REPLY_TIMEOUT,
        }
    }

    pub fn with_socket_path(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            timeout: DEFAULT_REPLY_TIMEOUT,
        }
    }

    /// Set how long to wait for a response
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Check if the pool socket exists
    pub fn socket_exists(&self) -> bool {
        self.socket_path.exists()
    }

    /// Check the pool is alive; returns its version and worker ids
    pub async fn ping(&self) -> Result<(String, Vec<WorkerId>)> {
        debug!("PoolClient: pinging pool");
        match self.send_message(ControlMessage::Ping).await? {
            ControlResponse::Pong { version, workers } => Ok((version, workers)),
            other => Err(unexpected(other)),
        }
    }

    /// Reload a unit on one worker or on all of them
    pub async fn reload(&self, id: &str, worker: Option<WorkerId>) -> Result<Vec<WorkerResult>> {
        debug!(%id, ?worker, "PoolClient: requesting reload");
        let msg = ControlMessage::Reload {
            id: id.to_string(),
            worker,
        };
        self.expect_results(msg).await
    }

    /// Reload the audio backend on one worker or on all of them
    pub async fn reload_audio(&self, worker: Option<WorkerId>) -> Result<Vec<WorkerResult>> {
        debug!(?worker, "PoolClient: requesting audio reload");
        self.expect_results(ControlMessage::ReloadAudio { worker }).await
    }

    pub async fn begin_override(&self, value: &str, worker: Option<WorkerId>) -> Result<Vec<WorkerResult>> {
        debug!(%value, ?worker, "PoolClient: beginning override");
        let msg = ControlMessage::BeginOverride {
            value: value.to_string(),
            worker,
        };
        self.expect_results(msg).await
    }

    pub async fn end_override(&self, worker: Option<WorkerId>) -> Result<Vec<WorkerResult>> {
        debug!(?worker, "PoolClient: ending override");
        self.expect_results(ControlMessage::EndOverride { worker }).await
    }

    /// Request the pool to shut down gracefully
    pub async fn shutdown(&self) -> Result<()> {
        debug!("PoolClient: requesting shutdown");
        match self.send_message(ControlMessage::Shutdown).await? {
            ControlResponse::Ok => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn expect_results(&self, msg: ControlMessage) -> Result<Vec<WorkerResult>> {
        match self.send_message(msg).await? {
            ControlResponse::Results { entries } => Ok(entries),
            other => Err(unexpected(other)),
        }
    }

    /// Send one request and wait for its response
    async fn send_message(&self, msg: ControlMessage) -> Result<ControlResponse> {
        debug!(?self.socket_path, ?msg, "PoolClient: sending message");

        let mut stream = tokio::time::timeout(CONNECT_TIMEOUT, UnixStream::connect(&self.socket_path))
            .await
            .context("Connection timeout")?
            .context("Failed to connect to pool socket (is `sd run` running?)")?;

        let msg_json = serde_json::to_string(&msg).context("Failed to serialize message")?;
        if msg_json.len() > MAX_MESSAGE_SIZE {
            return Err(eyre::eyre!("Message too large: {} bytes", msg_json.len()));
        }

        tokio::time::timeout(CONNECT_TIMEOUT, async {
            stream
                .write_all(msg_json.as_bytes())
                .await
                .context("Failed to write message")?;
            stream.write_all(b"\n").await.context("Failed to write newline")?;
            stream.flush().await.context("Failed to flush stream")?;
            Ok::<_, eyre::Error>(())
        })
        .await
        .context("Write timeout")??;

        let mut reader = BufReader::new(&mut stream);
        let mut response_line = String::new();

        tokio::time::timeout(self.timeout, async {
            let bytes_read = reader
                .read_line(&mut response_line)
                .await
                .context("Failed to read response")?;

            if bytes_read > MAX_RESPONSE_SIZE {
                return Err(eyre::eyre!("Response too large: {} bytes", bytes_read));
            }

            Ok::<_, eyre::Error>(())
        })
        .await
        .context("Read timeout")??;

        let response: ControlResponse =
            serde_json::from_str(response_line.trim()).context("Failed to parse pool response")?;

        debug!(?response, "PoolClient: received response");
        Ok(response)
    }
}

fn unexpected(response: ControlResponse) -> eyre::Error {
    match response {
        ControlResponse::Error { message } => eyre::eyre!("Pool error: {}", message),
        other => eyre::eyre!("Unexpected response: {:?}", other),
    }
}
