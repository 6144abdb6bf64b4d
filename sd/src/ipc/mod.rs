//! Control socket for the running pool
//!
//! Unix Domain Socket carrying one JSON line per request and one per
//! response. The `sd` CLI uses it to ask the running pool to reload units,
//! reload the audio backend, begin or end an override, or stop.

use std::path::PathBuf;

pub mod client;
pub mod listener;
pub mod messages;
pub mod server;

pub use client::PoolClient;
pub use listener::{MAX_MESSAGE_SIZE, cleanup_socket, create_listener, create_listener_at, read_message, send_response};
pub use messages::{ControlMessage, ControlResponse, WorkerResult};
pub use server::serve;

/// Get the socket path for pool control
pub fn get_socket_path() -> PathBuf {
    dirs::runtime_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("sharddaemon")
        .join("pool.sock")
}
