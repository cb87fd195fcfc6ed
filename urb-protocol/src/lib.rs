//! URB Protocol Core Implementation
//!
//! This crate implements the pure (I/O-free) parts of the reliable link and
//! broadcast stack: identifiers and membership, the big-endian wire codec,
//! message fragments, data/acknowledgment packets, per-destination send queues,
//! fragment reassembly, and receiver-side duplicate tracking.

pub mod codec;
pub mod delivered;
pub mod fragment;
pub mod membership;
pub mod message;
pub mod packet;
pub mod reassembly;
pub mod send_queue;

pub use codec::WireError;
pub use delivered::DeliveredTracker;
pub use fragment::{Fragment, FRAGMENT_HEADER_LEN};
pub use membership::{Membership, MembershipError};
pub use message::{Message, MessageId, PacketId, ProcessId};
pub use packet::{AckPacket, DataPacket, Packet, ACK_HEADER_LEN, PACKET_HEADER_LEN};
pub use reassembly::{MessageBuilder, Reassembler};
pub use send_queue::{Flush, OutgoingPacket, SendQueue};

/// Default packet size ceiling (bytes, all headers included)
///
/// Kept below the 65507-byte UDP payload limit.
pub const DEFAULT_MAX_PACKET_SIZE: usize = 65_000;

/// Smallest packet size that can still carry one data byte per packet
pub const MIN_PACKET_SIZE: usize = PACKET_HEADER_LEN + FRAGMENT_HEADER_LEN + 1;
