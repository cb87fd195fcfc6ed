//! URB - Uniform Reliable Broadcast
//!
//! High-level Rust API for reliable links and broadcast over UDP.

pub use urb_broadcast as broadcast;
pub use urb_io as io;
pub use urb_link as link;
pub use urb_protocol as protocol;

// Re-export commonly used types
pub use broadcast::{
    BestEffortBroadcast, Broadcast, BroadcastConfig, BroadcastError, FifoBroadcast,
    UniformBroadcast,
};
pub use io::{MemoryNetwork, Transport, UdpTransport};
pub use link::{Deliver, LinkConfig, LinkError, PerfectLink};
pub use protocol::{Membership, Message, MessageId, ProcessId};
