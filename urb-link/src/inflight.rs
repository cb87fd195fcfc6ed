//! In-flight packet registry
//!
//! Every data packet stays here, keyed by (destination, packet id), until the
//! destination acknowledges it. The scheduler resends the registry in rotating
//! batches: each batch starts right after the last packet of the previous one
//! and wraps around, so every packet is retried once per full cycle however
//! large the registry grows.

use crate::error::LinkError;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound::{Excluded, Included, Unbounded};
use urb_protocol::{PacketId, ProcessId};

/// Result of applying one acknowledgment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acked {
    /// The packet was in flight and is now released
    Released,
    /// The packet was already acknowledged earlier
    Duplicate,
}

/// Unacknowledged packets for every destination
#[derive(Debug, Default)]
pub struct InFlight {
    packets: BTreeMap<(ProcessId, PacketId), Bytes>,
    /// Highest packet id ever registered per destination
    issued: HashMap<ProcessId, PacketId>,
    /// Last key of the previous resend batch
    cursor: Option<(ProcessId, PacketId)>,
}

impl InFlight {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Retain a packet until `destination` acknowledges it
    pub fn insert(&mut self, destination: ProcessId, packet_id: PacketId, bytes: Bytes) {
        self.packets.insert((destination, packet_id), bytes);
        let issued = self.issued.entry(destination).or_insert(0);
        *issued = (*issued).max(packet_id);
    }

    /// Release a packet acknowledged by `from`
    ///
    /// Acknowledging a packet twice is harmless; acknowledging one that was
    /// never sent is a protocol violation.
    pub fn acknowledge(&mut self, from: ProcessId, packet_id: PacketId) -> Result<Acked, LinkError> {
        if self.packets.remove(&(from, packet_id)).is_some() {
            return Ok(Acked::Released);
        }

        let issued = self.issued.get(&from).copied().unwrap_or(0);
        if packet_id != 0 && packet_id <= issued {
            Ok(Acked::Duplicate)
        } else {
            Err(LinkError::UnknownAcknowledgement { from, packet_id })
        }
    }

    /// Next batch of up to `max` packets to resend, as (destination, bytes)
    pub fn next_batch(&mut self, max: usize) -> Vec<(ProcessId, Bytes)> {
        let mut batch = Vec::with_capacity(max.min(self.packets.len()));
        let mut last = None;

        let start = self.cursor;
        let head = match start {
            Some(key) => self.packets.range((Excluded(key), Unbounded)),
            None => self.packets.range(..),
        };
        for (key, bytes) in head.take(max) {
            batch.push((key.0, bytes.clone()));
            last = Some(*key);
        }

        // Wrap around, stopping before anything already in this batch
        if let Some(start) = start {
            let room = max - batch.len();
            for (key, bytes) in self.packets.range((Unbounded, Included(start))).take(room) {
                batch.push((key.0, bytes.clone()));
                last = Some(*key);
            }
        }

        if last.is_some() {
            self.cursor = last;
        }
        batch
    }

    /// Number of packets in flight
    pub fn len(&self) -> usize {
        self.packets.len()
    }

    /// Check if nothing is in flight
    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// Number of packets in flight towards `destination`
    pub fn len_for(&self, destination: ProcessId) -> usize {
        self.packets
            .range((destination, 0)..=(destination, PacketId::MAX))
            .count()
    }
}
