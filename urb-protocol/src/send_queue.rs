//! Per-destination send queue
//!
//! Buffers outgoing fragments for one peer and packs them into size-bounded
//! data packets, and batches outgoing acknowledgments into ack packets.
//!
//! Packets are produced in two ways:
//! - eagerly, as soon as enough fragment bytes are queued to fill a packet
//! - on `flush`, which empties whatever is left (underfull packets included)
//!
//! The queue only builds packets; retaining them for retransmission and
//! putting them on the wire is up to the caller.

use crate::fragment::{Fragment, FRAGMENT_HEADER_LEN};
use crate::message::{MessageId, PacketId, ProcessId};
use crate::packet::{AckPacket, DataPacket, PACKET_HEADER_LEN};
use bytes::Bytes;
use std::collections::VecDeque;
use tracing::trace;

/// A data packet ready for the wire
#[derive(Debug, Clone)]
pub struct OutgoingPacket {
    /// Packet id, unique within this queue
    pub packet_id: PacketId,
    /// Encoded packet
    pub bytes: Bytes,
}

/// Everything produced by a forced flush
#[derive(Debug, Default)]
pub struct Flush {
    /// Encoded ack packets (fire-and-forget)
    pub acks: Vec<Bytes>,
    /// Data packets (to be tracked until acknowledged)
    pub packets: Vec<OutgoingPacket>,
}

impl Flush {
    /// Check if the flush produced nothing
    pub fn is_empty(&self) -> bool {
        self.acks.is_empty() && self.packets.is_empty()
    }
}

/// Outgoing state for one (sender, destination) pair
#[derive(Debug)]
pub struct SendQueue {
    /// This process (written into every packet)
    source: ProcessId,
    /// Peer this queue sends to
    destination: ProcessId,
    /// Packet size ceiling, headers included
    max_packet_size: usize,
    /// Pending acks needed before an ack packet is sent eagerly
    min_acks_per_packet: usize,
    /// Fragments not yet packed, in submission order
    fragments: VecDeque<Fragment>,
    /// Encoded size of everything in `fragments`
    queued_bytes: usize,
    /// Packet ids waiting to be acknowledged to the peer
    acks: VecDeque<PacketId>,
    /// Next data packet id (0 is reserved for acks)
    next_packet_id: PacketId,
}

impl SendQueue {
    /// Create a new send queue
    ///
    /// # Arguments
    /// * `source` - Id of the local process
    /// * `destination` - Id of the peer
    /// * `max_packet_size` - Packet size ceiling (at least `MIN_PACKET_SIZE`)
    /// * `min_acks_per_packet` - Ack batch size that triggers an eager ack packet
    pub fn new(
        source: ProcessId,
        destination: ProcessId,
        max_packet_size: usize,
        min_acks_per_packet: usize,
    ) -> Self {
        debug_assert!(max_packet_size >= crate::MIN_PACKET_SIZE);

        let ack_capacity = AckPacket::capacity(max_packet_size).max(1);

        SendQueue {
            source,
            destination,
            max_packet_size,
            min_acks_per_packet: min_acks_per_packet.clamp(1, ack_capacity),
            fragments: VecDeque::new(),
            queued_bytes: 0,
            acks: VecDeque::new(),
            next_packet_id: 1,
        }
    }

    /// Peer this queue sends to
    pub fn destination(&self) -> ProcessId {
        self.destination
    }

    /// Encoded size of the fragments waiting to be packed
    pub fn queued_bytes(&self) -> usize {
        self.queued_bytes
    }

    /// Number of acknowledgments waiting to be sent
    pub fn pending_acks(&self) -> usize {
        self.acks.len()
    }

    /// Id of the most recently built data packet (0 if none yet)
    pub fn last_packet_id(&self) -> PacketId {
        self.next_packet_id - 1
    }

    /// Queue a whole message, returning any packets that became full
    pub fn push_message(&mut self, message_id: MessageId, payload: Bytes) -> Vec<OutgoingPacket> {
        let fragment = Fragment::whole(message_id, payload);
        self.queued_bytes += fragment.encoded_len();
        self.fragments.push_back(fragment);

        let mut packets = Vec::new();
        while self.queued_bytes >= self.packet_body_size() {
            match self.make_packet() {
                Some(packet) => packets.push(packet),
                None => break,
            }
        }
        packets
    }

    /// Queue an acknowledgment, returning an ack packet once the batch is big enough
    pub fn push_ack(&mut self, packet_id: PacketId) -> Option<Bytes> {
        self.acks.push_back(packet_id);

        if self.acks.len() >= self.min_acks_per_packet {
            self.make_ack_packet()
        } else {
            None
        }
    }

    /// Pack everything that is still queued, underfull packets included
    pub fn flush(&mut self) -> Flush {
        let mut flush = Flush::default();

        while let Some(ack) = self.make_ack_packet() {
            flush.acks.push(ack);
        }
        while let Some(packet) = self.make_packet() {
            flush.packets.push(packet);
        }

        flush
    }

    #[inline]
    fn packet_body_size(&self) -> usize {
        self.max_packet_size - PACKET_HEADER_LEN
    }

    /// Build one data packet from the front of the queue
    ///
    /// Returns None only if no fragments are queued.
    fn make_packet(&mut self) -> Option<OutgoingPacket> {
        if self.fragments.is_empty() {
            return None;
        }

        let budget = self.packet_body_size();
        let mut used = 0;
        let mut fragments = Vec::new();

        while let Some(fragment) = self.fragments.pop_front() {
            let space = budget - used;
            let len = fragment.encoded_len();

            if len <= space {
                used += len;
                self.queued_bytes -= len;
                fragments.push(fragment);
                continue;
            }

            if space <= FRAGMENT_HEADER_LEN {
                self.fragments.push_front(fragment);
                break;
            }

            let (head, tail) = fragment.split(space);
            self.queued_bytes -= len;
            used += head.encoded_len();
            fragments.push(head);
            if let Some(tail) = tail {
                self.queued_bytes += tail.encoded_len();
                self.fragments.push_front(tail);
            }
            break;
        }

        let packet_id = self.next_packet_id;
        self.next_packet_id += 1;

        let packet = DataPacket::new(packet_id, self.source, fragments);
        trace!(
            destination = self.destination,
            packet_id,
            fragments = packet.fragments.len(),
            len = PACKET_HEADER_LEN + used,
            "data packet built"
        );

        Some(OutgoingPacket {
            packet_id,
            bytes: packet.to_bytes(),
        })
    }

    /// Build one ack packet from the pending acknowledgments
    fn make_ack_packet(&mut self) -> Option<Bytes> {
        if self.acks.is_empty() {
            return None;
        }

        let take = AckPacket::capacity(self.max_packet_size).min(self.acks.len());
        let packet_ids: Vec<PacketId> = self.acks.drain(..take).collect();

        trace!(
            destination = self.destination,
            count = packet_ids.len(),
            "ack packet built"
        );
        Some(AckPacket::new(self.source, packet_ids).to_bytes())
    }
}
