//! Identifiers and the message value shared by every layer
//!
//! All layers (perfect link, best-effort, uniform and FIFO broadcast) hand the
//! same plain value around. Which id namespace a `Message` belongs to depends on
//! the layer that produced it: a perfect-link message carries the link-level id
//! and the hop sender, a broadcast message carries the broadcast id and the
//! original broadcaster.

use bytes::Bytes;
use std::fmt;

/// Process identifier (small positive integer, statically known)
pub type ProcessId = u32;

/// Message identifier, assigned by the source starting at 1
pub type MessageId = u32;

/// Packet identifier, assigned per (sender, destination) queue starting at 1
///
/// Packet id 0 is reserved for acknowledgment packets.
pub type PacketId = u32;

/// A complete message as seen by one layer
#[derive(Clone, PartialEq, Eq)]
pub struct Message {
    /// Message id within the source's id namespace
    pub id: MessageId,
    /// Process that produced the message in this layer's namespace
    pub source: ProcessId,
    /// Opaque application bytes
    pub payload: Bytes,
}

impl Message {
    /// Create a new message
    pub fn new(id: MessageId, source: ProcessId, payload: impl Into<Bytes>) -> Self {
        Message {
            id,
            source,
            payload: payload.into(),
        }
    }

    /// The (message id, source id) pair that identifies this message
    #[inline]
    pub fn key(&self) -> (MessageId, ProcessId) {
        (self.id, self.source)
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("id", &self.id)
            .field("source", &self.source)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}
