//! ShardDaemon - shard worker pool with hot-reloadable handlers
//!
//! One process runs a pool of workers. Each worker owns its own catalog of
//! handler units loaded from YAML manifests, its own audio backend view and
//! its own status rotation. Workers never share memory; they coordinate over
//! a command bus and persist the pool-wide status override in a central store.
//!
//! # Modules
//!
//! - [`catalog`] - Id and alias lookup for loaded handler units
//! - [`loader`] - Directory scan, manifest parsing and handler factories
//! - [`reload`] - Hot reload of a single unit by id or alias
//! - [`audio`] - Audio backend availability and connection lifecycle
//! - [`bus`] - Point-to-point commands and broadcasts between workers
//! - [`broadcast`] - Status rotation and pool-wide override
//! - [`worker`] - One pool member wiring the above together
//! - [`pool`] - Hub plus workers, answering control requests
//! - [`ipc`] - Control socket protocol, listener and client
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod audio;
pub mod broadcast;
pub mod bus;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod gateway;
pub mod ipc;
pub mod loader;
pub mod pool;
pub mod reload;
pub mod worker;

pub use audio::{AudioManager, AudioStatus};
pub use broadcast::{BroadcastError, BroadcastManager, BroadcastState, CentralStore, Mode, RotationTask, StatusFormat};
pub use bus::{BusCommand, BusConfig, BusError, BusEvent, BusHandle, BusReply, Hub, Participant, WorkerId};
pub use catalog::{Catalog, HandlerUnit};
pub use config::Config;
pub use gateway::{Gateway, Invocation, LogGateway, Presence};
pub use loader::{FactoryRegistry, LoadError, LoadResult, Loader, LoaderSettings, PathIndex};
pub use pool::{GatewayFactory, Pool};
pub use reload::{ReloadError, Reloader};
pub use worker::{Worker, WorkerDeps, WorkerSettings};

/// Crate version reported over the control socket
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
