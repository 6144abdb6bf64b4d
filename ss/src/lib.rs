//! SharedStore - durable key/value store for a shard pool
//!
//! Holds the small amount of state that must outlive any single worker
//! process, such as the pool-wide status override. Every worker reads it at
//! startup; writes are rare and last-writer-wins.
//!
//! # Architecture
//!
//! ```text
//! {store_path}/
//! ├── store.json      # { "entries": { key: { value, updated-at } } }
//! └── store.lock      # fs2 advisory lock (shared for reads, exclusive for writes)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use sharedstore::SharedStore;
//!
//! let store = SharedStore::open("/var/lib/sharddaemon/store")?;
//! store.set("broadcast", "Maintenance at 18:00")?;
//! assert_eq!(store.get("broadcast")?.as_deref(), Some("Maintenance at 18:00"));
//! store.remove("broadcast")?;
//! ```

pub mod cli;
pub mod config;
mod store;

pub use store::{Entry, SharedStore, StoreError};

/// Key used by the broadcast state manager for the pool-wide override
pub const BROADCAST_KEY: &str = "broadcast";
