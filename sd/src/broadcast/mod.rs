//! Pool-wide status broadcast
//!
//! Each worker rotates its visible status through a fixed pool of messages
//! until an override is active. An override is written to the central store
//! and pushed to siblings over the bus; a worker that starts later reads the
//! store before it ever rotates.
//!
//! ```text
//!            begin_override(v)             end_override()
//! Rotating ──────────────────▶ Overridden ───────────────▶ Rotating
//!    ▲  │ tick: show random pool entry     tick: no-op        │
//!    └──┘                                                     └─ show fresh entry now
//! ```

mod manager;
mod rotation;
mod state;
pub(crate) mod store;

pub use manager::{BroadcastError, BroadcastManager};
pub use rotation::RotationTask;
pub use state::{BroadcastState, Mode, StatusFormat};
pub use store::CentralStore;
