//! Serving the control socket
//!
//! Each connection is answered in its own task, so a slow or silent client
//! never delays another client or the shutdown future.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::listener::{read_message, send_response};
use super::messages::{ControlMessage, ControlResponse};
use crate::pool::Pool;

/// How long a client may take to send its request
const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Answer control requests until `shutdown` resolves or a client asks to stop
///
/// Open connections are aborted on return, releasing their hold on the pool.
pub async fn serve<F>(pool: Arc<RwLock<Pool>>, listener: UnixListener, shutdown: F)
where
    F: Future<Output = ()>,
{
    let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);
    let mut connections = JoinSet::new();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    connections.spawn(handle_connection(pool.clone(), stream, stop_tx.clone()));
                }
                Err(e) => error!(error = %e, "Failed to accept control connection"),
            },
            Some(joined) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = joined {
                    warn!(error = %e, "Control connection task failed");
                }
            }
            _ = stop_rx.recv() => {
                info!("Shutdown requested over control socket");
                break;
            }
            _ = &mut shutdown => {
                debug!("serve: shutdown signalled");
                break;
            }
        }
    }

    debug!(open = connections.len(), "serve: aborting open connections");
    connections.abort_all();
    while connections.join_next().await.is_some() {}
}

async fn handle_connection(pool: Arc<RwLock<Pool>>, mut stream: UnixStream, stop_tx: mpsc::Sender<()>) {
    let msg = match tokio::time::timeout(READ_TIMEOUT, read_message(&mut stream)).await {
        Ok(Ok(msg)) => msg,
        Ok(Err(e)) => {
            warn!(error = %e, "Bad control request");
            let response = ControlResponse::Error { message: e.to_string() };
            let _ = send_response(&mut stream, &response).await;
            return;
        }
        Err(_) => {
            warn!(timeout = ?READ_TIMEOUT, "Control client sent no request");
            return;
        }
    };

    let stop = matches!(msg, ControlMessage::Shutdown);
    let response = pool.read().await.handle_control(msg).await;
    if let Err(e) = send_response(&mut stream, &response).await {
        warn!(error = %e, "Failed to send control response");
    }
    if stop {
        let _ = stop_tx.send(()).await;
    }
}
