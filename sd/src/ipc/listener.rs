//! Control socket, pool side

use std::path::{Path, PathBuf};

use eyre::{Context, Result, eyre};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tracing::{debug, warn};

use super::get_socket_path;
use super::messages::{ControlMessage, ControlResponse};

/// Largest request accepted, newline included
pub const MAX_MESSAGE_SIZE: usize = 4096;

/// Bind the control socket at the default path
///
/// Handles cleanup of stale socket files from previous runs.
pub fn create_listener() -> Result<(UnixListener, PathBuf)> {
    create_listener_at(&get_socket_path())
}

/// Bind the control socket at a specific path
pub fn create_listener_at(socket_path: &Path) -> Result<(UnixListener, PathBuf)> {
    debug!(?socket_path, "create_listener: creating control socket");

    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create socket directory")?;
    }

    if socket_path.exists() {
        debug!(?socket_path, "create_listener: removing stale socket");
        std::fs::remove_file(socket_path).context("Failed to remove stale socket")?;
    }

    let listener = UnixListener::bind(socket_path).context("Failed to bind control socket")?;
    debug!(?socket_path, "create_listener: socket bound");

    Ok((listener, socket_path.to_path_buf()))
}

/// Remove the socket file on shutdown
pub fn cleanup_socket(socket_path: &Path) {
    if socket_path.exists() {
        debug!(?socket_path, "cleanup_socket: removing socket file");
        if let Err(e) = std::fs::remove_file(socket_path) {
            warn!(?socket_path, error = %e, "Failed to remove socket file");
        }
    }
}

/// Read one request line
///
/// At most `MAX_MESSAGE_SIZE` bytes are buffered; a longer line is rejected
/// without reading the rest of it.
pub async fn read_message<S>(stream: &mut S) -> Result<ControlMessage>
where
    S: AsyncRead + Unpin,
{
    let mut line = Vec::new();
    let mut bounded = BufReader::new(stream).take(MAX_MESSAGE_SIZE as u64 + 1);
    bounded
        .read_until(b'\n', &mut line)
        .await
        .context("Failed to read control message")?;

    if line.len() > MAX_MESSAGE_SIZE {
        return Err(eyre!("Control message exceeds {} bytes", MAX_MESSAGE_SIZE));
    }
    let body = line.trim_ascii();
    if body.is_empty() {
        return Err(eyre!("Connection closed before a request was sent"));
    }

    let msg: ControlMessage = serde_json::from_slice(body).context("Failed to parse control message")?;
    debug!(?msg, "read_message: parsed message");
    Ok(msg)
}

/// Write one response line
pub async fn send_response<S>(stream: &mut S, response: &ControlResponse) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_vec(response).context("Failed to serialize response")?;
    line.push(b'\n');
    stream.write_all(&line).await.context("Failed to write response")?;
    stream.flush().await.context("Failed to flush response")?;
    debug!(?response, "send_response: sent response");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::client::PoolClient;
    use crate::ipc::messages::WorkerResult;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_create_listener_creates_parent_dir() {
        let temp = TempDir::new().unwrap();
        let socket_path = temp.path().join("subdir").join("pool.sock");

        let (_, path) = create_listener_at(&socket_path).unwrap();
        assert_eq!(path, socket_path);
        assert!(socket_path.exists());
    }

    #[tokio::test]
    async fn test_create_listener_removes_stale_socket() {
        let temp = TempDir::new().unwrap();
        let socket_path = temp.path().join("pool.sock");
        std::fs::write(&socket_path, "stale").unwrap();

        assert!(create_listener_at(&socket_path).is_ok());
    }

    #[test]
    fn test_cleanup_socket() {
        let temp = TempDir::new().unwrap();
        let socket_path = temp.path().join("pool.sock");
        std::fs::write(&socket_path, "test").unwrap();

        cleanup_socket(&socket_path);
        assert!(!socket_path.exists());

        // missing file is fine
        cleanup_socket(&socket_path);
    }

    #[tokio::test]
    async fn test_oversized_request_rejected() {
        let (mut client, mut server) = tokio::io::duplex(2 * MAX_MESSAGE_SIZE);
        let mut request = vec![b'a'; MAX_MESSAGE_SIZE + 100];
        request.push(b'\n');
        client.write_all(&request).await.unwrap();

        let err = read_message(&mut server).await.unwrap_err();
        assert!(err.to_string().contains("exceeds"), "{err}");
    }

    #[tokio::test]
    async fn test_request_at_limit_accepted() {
        let (mut client, mut server) = tokio::io::duplex(2 * MAX_MESSAGE_SIZE);
        let json = serde_json::to_string(&ControlMessage::Ping).unwrap();
        let padding = MAX_MESSAGE_SIZE - json.len() - 1;
        client
            .write_all(format!("{json}{}\n", " ".repeat(padding)).as_bytes())
            .await
            .unwrap();

        assert_eq!(read_message(&mut server).await.unwrap(), ControlMessage::Ping);
    }

    #[tokio::test]
    async fn test_closed_without_request() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);
        assert!(read_message(&mut server).await.is_err());
    }

    #[tokio::test]
    async fn test_end_to_end_reload() {
        let temp = TempDir::new().unwrap();
        let socket_path = temp.path().join("test.sock");
        let (listener, _) = create_listener_at(&socket_path).unwrap();

        let mock_pool = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let msg = read_message(&mut stream).await.unwrap();
            assert_eq!(
                msg,
                ControlMessage::Reload {
                    id: "ping".to_string(),
                    worker: Some(1)
                }
            );
            let response = ControlResponse::Results {
                entries: vec![WorkerResult {
                    worker: 1,
                    ok: true,
                    detail: "ping".to_string(),
                }],
            };
            send_response(&mut stream, &response).await.unwrap();
        });

        let client = PoolClient::with_socket_path(socket_path);
        let entries = client.reload("ping", Some(1)).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].ok);

        mock_pool.await.unwrap();
    }

    #[tokio::test]
    async fn test_end_to_end_ping_pong() {
        let temp = TempDir::new().unwrap();
        let socket_path = temp.path().join("test.sock");
        let (listener, _) = create_listener_at(&socket_path).unwrap();

        let mock_pool = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            assert_eq!(read_message(&mut stream).await.unwrap(), ControlMessage::Ping);
            let response = ControlResponse::Pong {
                version: "test-version".to_string(),
                workers: vec![0, 1],
            };
            send_response(&mut stream, &response).await.unwrap();
        });

        let client = PoolClient::with_socket_path(socket_path);
        let (version, workers) = client.ping().await.unwrap();
        assert_eq!(version, "test-version");
        assert_eq!(workers, vec![0, 1]);

        mock_pool.await.unwrap();
    }
}
