//! Packet structures and serialization
//!
//! Two kinds of packets share the wire, distinguished by the leading packet id:
//!
//! ```text
//! data packet: packet id (4B, > 0) | source id (4B) | fragment | fragment | ...
//! ack packet:  0 (4B) | source id (4B, the acknowledger) | count (4B) | count x packet id (4B)
//! ```
//!
//! Packet ids are scoped to one (sender, destination) pair and increase from 1.

use crate::codec::{self, WireError, INT_LEN};
use crate::fragment::{Fragment, FragmentIter};
use crate::message::{PacketId, ProcessId};
use bytes::{Bytes, BytesMut};

/// Size of the data packet header (packet id + source id)
pub const PACKET_HEADER_LEN: usize = 8;

/// Size of the ack packet header (zero id + source id + count)
pub const ACK_HEADER_LEN: usize = 12;

/// Packet id value reserved for acknowledgment packets
pub const ACK_PACKET_ID: PacketId = 0;

/// Data packet: one or more (possibly partial) message fragments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPacket {
    /// Packet id (never 0)
    pub packet_id: PacketId,
    /// Sender of this packet
    pub source: ProcessId,
    /// Fragments in packing order
    pub fragments: Vec<Fragment>,
}

impl DataPacket {
    /// Create a new data packet
    pub fn new(packet_id: PacketId, source: ProcessId, fragments: Vec<Fragment>) -> Self {
        debug_assert_ne!(packet_id, ACK_PACKET_ID);
        DataPacket {
            packet_id,
            source,
            fragments,
        }
    }

    /// Total size of the packet once encoded
    pub fn encoded_len(&self) -> usize {
        PACKET_HEADER_LEN
            + self
                .fragments
                .iter()
                .map(Fragment::encoded_len)
                .sum::<usize>()
    }

    /// Serialize the packet to bytes
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        codec::put_int(&mut buf, self.packet_id);
        codec::put_int(&mut buf, self.source);
        for fragment in &self.fragments {
            fragment.encode(&mut buf);
        }
        buf.freeze()
    }

    /// Parse a data packet (header already known to be non-zero)
    fn decode_body(packet_id: PacketId, source: ProcessId, body: Bytes) -> Result<Self, WireError> {
        let fragments = FragmentIter::new(body).collect::<Result<Vec<_>, _>>()?;
        Ok(DataPacket {
            packet_id,
            source,
            fragments,
        })
    }
}

/// Acknowledgment packet: a batch of acknowledged packet ids
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckPacket {
    /// Process sending the acknowledgments
    pub source: ProcessId,
    /// Acknowledged packet ids
    pub packet_ids: Vec<PacketId>,
}

impl AckPacket {
    /// Create a new ack packet
    pub fn new(source: ProcessId, packet_ids: Vec<PacketId>) -> Self {
        AckPacket { source, packet_ids }
    }

    /// Maximum number of acknowledged ids fitting in a packet of `max_packet_size`
    pub fn capacity(max_packet_size: usize) -> usize {
        max_packet_size.saturating_sub(ACK_HEADER_LEN) / INT_LEN
    }

    /// Total size of the packet once encoded
    pub fn encoded_len(&self) -> usize {
        ACK_HEADER_LEN + self.packet_ids.len() * INT_LEN
    }

    /// Serialize the packet to bytes
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        codec::put_int(&mut buf, ACK_PACKET_ID);
        codec::put_int(&mut buf, self.source);
        codec::put_int(&mut buf, self.packet_ids.len() as u32);
        for &packet_id in &self.packet_ids {
            codec::put_int(&mut buf, packet_id);
        }
        buf.freeze()
    }

    fn decode_body(source: ProcessId, mut body: Bytes) -> Result<Self, WireError> {
        let count = codec::get_int(&mut body, "ack count")? as usize;
        codec::ensure(&body, count.saturating_mul(INT_LEN), "acknowledged ids")?;

        let mut packet_ids = Vec::with_capacity(count);
        for _ in 0..count {
            packet_ids.push(codec::get_int(&mut body, "acknowledged id")?);
        }

        Ok(AckPacket { source, packet_ids })
    }
}

/// Unified packet type (either data or acknowledgment)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Data(DataPacket),
    Ack(AckPacket),
}

impl Packet {
    /// Check if this is a data packet
    pub fn is_data(&self) -> bool {
        matches!(self, Packet::Data(_))
    }

    /// Check if this is an ack packet
    pub fn is_ack(&self) -> bool {
        matches!(self, Packet::Ack(_))
    }

    /// Sender of the packet
    pub fn source(&self) -> ProcessId {
        match self {
            Packet::Data(p) => p.source,
            Packet::Ack(p) => p.source,
        }
    }

    /// Serialize the packet to bytes
    pub fn to_bytes(&self) -> Bytes {
        match self {
            Packet::Data(p) => p.to_bytes(),
            Packet::Ack(p) => p.to_bytes(),
        }
    }

    /// Parse a packet from a received datagram (automatically determines type)
    pub fn decode(mut datagram: Bytes) -> Result<Self, WireError> {
        let packet_id = codec::get_int(&mut datagram, "packet id")?;
        let source = codec::get_int(&mut datagram, "source id")?;

        if packet_id == ACK_PACKET_ID {
            Ok(Packet::Ack(AckPacket::decode_body(source, datagram)?))
        } else {
            Ok(Packet::Data(DataPacket::decode_body(
                packet_id, source, datagram,
            )?))
        }
    }

    /// Read the leading packet id without decoding the rest
    pub fn peek_id(datagram: &[u8]) -> Result<PacketId, WireError> {
        codec::peek_int(datagram, 0, "packet id")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_packet_layout() {
        let packet = DataPacket::new(
            3,
            2,
            vec![
                Fragment::whole(1, Bytes::from_static(b"hi")),
                Fragment::whole(2, Bytes::from_static(b"yo")),
            ],
        );

        let bytes = packet.to_bytes();
        assert_eq!(bytes.len(), packet.encoded_len());
        assert_eq!(&bytes[..8], &[0, 0, 0, 3, 0, 0, 0, 2]);
        assert_eq!(Packet::peek_id(&bytes).unwrap(), 3);

        match Packet::decode(bytes).unwrap() {
            Packet::Data(decoded) => assert_eq!(decoded, packet),
            other => panic!("expected data packet, got {:?}", other),
        }
    }

    #[test]
    fn test_ack_packet_layout() {
        let ack = AckPacket::new(4, vec![1, 2, 300]);
        let bytes = ack.to_bytes();

        assert_eq!(bytes.len(), ACK_HEADER_LEN + 12);
        assert_eq!(&bytes[..12], &[0, 0, 0, 0, 0, 0, 0, 4, 0, 0, 0, 3]);

        let decoded = Packet::decode(bytes).unwrap();
        assert!(decoded.is_ack());
        assert_eq!(decoded.source(), 4);
        assert_eq!(decoded, Packet::Ack(ack));
    }

    #[test]
    fn test_ack_capacity() {
        assert_eq!(AckPacket::capacity(ACK_HEADER_LEN + 40), 10);
        assert_eq!(AckPacket::capacity(65_000), (65_000 - 12) / 4);
        assert_eq!(AckPacket::capacity(4), 0);
    }

    #[test]
    fn test_short_ack_is_rejected() {
        let mut bytes = BytesMut::from(&AckPacket::new(1, vec![5, 6]).to_bytes()[..]);
        bytes.truncate(bytes.len() - 2);

        let err = Packet::decode(bytes.freeze()).unwrap_err();
        assert!(matches!(
            err,
            WireError::Truncated {
                field: "acknowledged ids",
                ..
            }
        ));
    }

    #[test]
    fn test_short_header_is_rejected() {
        assert!(Packet::decode(Bytes::from_static(&[0, 0, 0, 1, 0])).is_err());
        assert!(Packet::peek_id(&[0, 0]).is_err());
    }

    #[test]
    fn test_data_packet_without_fragments() {
        let packet = DataPacket::new(1, 1, Vec::new());
        let decoded = Packet::decode(packet.to_bytes()).unwrap();
        assert!(decoded.is_data());
    }
}
