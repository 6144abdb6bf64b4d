//! Command bus between workers
//!
//! A hub task mediates all cross-worker communication through two primitives:
//! - **Command:** point-to-point request with exactly one reply or a delivery error
//! - **Broadcast:** fan-out event, no reply, per-receiver FIFO
//!
//! Workers never touch each other's state; everything goes through here.

mod config;
mod core;
mod handle;
mod messages;
mod router;

pub use config::BusConfig;
pub use core::Hub;
pub use handle::BusHandle;
pub use messages::{
    BusCommand, BusError, BusEvent, BusMetrics, BusReply, BusRequest, Inbound, Participant, ReplySender, WorkerId,
};
pub use router::{CommandHandler, CommandRouter};
