//! Broadcast Layers
//!
//! This crate builds the broadcast abstractions on top of the perfect link:
//! best-effort broadcast (send to every peer), uniform reliable broadcast
//! (relay on first receipt, deliver on majority acknowledgment), and FIFO
//! broadcast (uniform broadcast delivered in per-source order).

pub mod beb;
pub mod config;
pub mod error;
pub mod fifo;
pub mod urb;

pub use beb::BestEffortBroadcast;
pub use config::BroadcastConfig;
pub use error::BroadcastError;
pub use fifo::{FifoBroadcast, FifoSequencer};
pub use urb::{UniformBroadcast, UrbState, URB_HEADER_LEN};
pub use urb_link::Deliver;

use bytes::Bytes;
use urb_protocol::ProcessId;

/// Common interface of the broadcast layers
pub trait Broadcast: Send + Sync {
    /// Id of the local process
    fn local(&self) -> ProcessId;

    /// Broadcast `payload` to every process
    fn broadcast(&self, payload: Bytes) -> Result<(), BroadcastError>;

    /// Stop the layer and everything underneath it
    fn close(&self) -> Result<(), BroadcastError>;
}
