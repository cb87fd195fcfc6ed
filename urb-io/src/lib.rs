//! URB I/O and Platform Abstraction
//!
//! This crate provides the datagram transports the link runs on (a real UDP
//! socket and an in-process lossy network for tests), plus the threading
//! utilities shared by the upper layers: a periodic ticker and a small worker
//! pool.

pub mod memory;
pub mod pool;
pub mod time;
pub mod transport;
pub mod udp;

pub use memory::{Fate, MemoryNetwork, MemoryTransport, NetworkStats};
pub use pool::TaskPool;
pub use time::{Shutdown, Ticker};
pub use transport::{Transport, TransportError};
pub use udp::UdpTransport;

/// Largest payload a UDP datagram can carry over IPv4
pub const MAX_UDP_PAYLOAD: usize = 65_507;
