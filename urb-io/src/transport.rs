//! Datagram transport abstraction
//!
//! The link layer only needs two things from the network: put a datagram on
//! the wire towards a peer, and wait a bounded time for the next inbound
//! datagram. Peers are addressed by process id; mapping ids to network
//! addresses is the transport's business.

use std::io;
use std::time::Duration;
use thiserror::Error;
use urb_protocol::ProcessId;

/// Transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Unknown peer: {0}")]
    UnknownPeer(ProcessId),

    #[error("Transport closed")]
    Closed,
}

/// Unreliable, unordered, size-limited datagram channel
///
/// Datagrams may be lost, duplicated or reordered. Implementations must be
/// usable from several threads at once (one receiver, many senders).
pub trait Transport: Send + Sync {
    /// Send one datagram to `destination`
    fn send_to(&self, destination: ProcessId, datagram: &[u8]) -> Result<(), TransportError>;

    /// Wait for the next datagram, up to the receive timeout
    ///
    /// Returns the datagram length, or `None` if the timeout expired. A
    /// datagram longer than `buf` is truncated to `buf.len()`.
    fn recv(&self, buf: &mut [u8]) -> Result<Option<usize>, TransportError>;

    /// Set how long `recv` waits before giving up
    fn set_recv_timeout(&self, timeout: Duration) -> Result<(), TransportError>;
}
