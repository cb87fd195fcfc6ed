//! Message reassembly
//!
//! Fragments may arrive in any order, any number of times, spread over any
//! number of packets. A builder per (message id, source id) collects them and
//! yields the message once every index up to the last fragment is present.

use crate::fragment::Fragment;
use crate::message::{Message, MessageId, ProcessId};
use crate::packet::DataPacket;
use bytes::{Bytes, BytesMut};
use std::collections::{BTreeMap, HashMap};
use tracing::trace;

/// Collects the fragments of one message
#[derive(Debug)]
pub struct MessageBuilder {
    message_id: MessageId,
    source: ProcessId,
    /// Total fragment count, known once the last fragment arrived
    expected: Option<u32>,
    fragments: BTreeMap<u32, Bytes>,
}

impl MessageBuilder {
    /// Create an empty builder
    pub fn new(message_id: MessageId, source: ProcessId) -> Self {
        MessageBuilder {
            message_id,
            source,
            expected: None,
            fragments: BTreeMap::new(),
        }
    }

    /// Add a fragment
    ///
    /// Returns false if a fragment with the same index was already present,
    /// or if a last fragment carries an index with no valid fragment count.
    pub fn insert(&mut self, fragment: Fragment) -> bool {
        debug_assert_eq!(fragment.message_id, self.message_id);

        if fragment.is_last {
            match fragment.index.checked_add(1) {
                Some(count) => self.expected = Some(count),
                None => return false,
            }
        }

        if self.fragments.contains_key(&fragment.index) {
            return false;
        }
        self.fragments.insert(fragment.index, fragment.data);
        true
    }

    /// Number of distinct fragments received
    pub fn received(&self) -> usize {
        self.fragments.len()
    }

    /// Whether every fragment of the message is present
    pub fn is_complete(&self) -> bool {
        match self.expected {
            Some(expected) => {
                self.fragments.len() == expected as usize
                    && self
                        .fragments
                        .keys()
                        .next_back()
                        .map_or(true, |&last| last + 1 == expected)
            }
            None => false,
        }
    }

    /// Concatenate the fragments, or hand the builder back if incomplete
    pub fn build(self) -> Result<Message, Self> {
        if !self.is_complete() {
            return Err(self);
        }

        let len = self.fragments.values().map(Bytes::len).sum();
        let payload = if self.fragments.len() == 1 {
            self.fragments.into_values().next().unwrap_or_default()
        } else {
            let mut buf = BytesMut::with_capacity(len);
            for data in self.fragments.into_values() {
                buf.extend_from_slice(&data);
            }
            buf.freeze()
        };

        Ok(Message::new(self.message_id, self.source, payload))
    }
}

/// Reassembles messages from all sources
#[derive(Debug, Default)]
pub struct Reassembler {
    builders: HashMap<(MessageId, ProcessId), MessageBuilder>,
}

impl Reassembler {
    /// Create an empty reassembler
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one fragment from `source`, returning the message if it completed
    pub fn push(&mut self, source: ProcessId, fragment: Fragment) -> Option<Message> {
        let key = (fragment.message_id, source);

        // Single-fragment messages never need a builder
        if fragment.index == 0 && fragment.is_last && !self.builders.contains_key(&key) {
            return Some(Message::new(fragment.message_id, source, fragment.data));
        }

        let builder = self
            .builders
            .entry(key)
            .or_insert_with(|| MessageBuilder::new(key.0, source));
        if !builder.insert(fragment) && builder.received() == 0 {
            self.builders.remove(&key);
            return None;
        }

        if !builder.is_complete() {
            return None;
        }

        let builder = self.builders.remove(&key)?;
        match builder.build() {
            Ok(message) => {
                trace!(
                    message_id = message.id,
                    source,
                    len = message.payload.len(),
                    "message reassembled"
                );
                Some(message)
            }
            Err(builder) => {
                self.builders.insert(key, builder);
                None
            }
        }
    }

    /// Feed every fragment of a data packet, returning completed messages in order
    pub fn push_packet(&mut self, packet: DataPacket) -> Vec<Message> {
        let source = packet.source;
        packet
            .fragments
            .into_iter()
            .filter_map(|fragment| self.push(source, fragment))
            .collect()
    }

    /// Number of messages partially assembled
    pub fn pending(&self) -> usize {
        self.builders.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::FRAGMENT_HEADER_LEN;

    fn fragments_of(message_id: MessageId, data: &[u8], piece: usize) -> Vec<Fragment> {
        let mut out = Vec::new();
        let mut rest = Some(Fragment::whole(message_id, Bytes::copy_from_slice(data)));
        while let Some(fragment) = rest.take() {
            let (head, tail) = fragment.split(FRAGMENT_HEADER_LEN + piece);
            out.push(head);
            rest = tail;
        }
        out
    }

    #[test]
    fn test_single_fragment_message() {
        let mut reassembler = Reassembler::new();
        let msg = reassembler
            .push(2, Fragment::whole(1, Bytes::from_static(b"solo")))
            .unwrap();

        assert_eq!(msg.key(), (1, 2));
        assert_eq!(&msg.payload[..], b"solo");
        assert_eq!(reassembler.pending(), 0);
    }

    #[test]
    fn test_out_of_order_assembly() {
        let data: Vec<u8> = (0..=255).collect();
        let mut fragments = fragments_of(4, &data, 10);
        fragments.reverse();

        let mut reassembler = Reassembler::new();
        let last = fragments.len() - 1;
        for (i, fragment) in fragments.into_iter().enumerate() {
            let result = reassembler.push(1, fragment);
            if i < last {
                assert!(result.is_none(), "no partial delivery");
                assert_eq!(reassembler.pending(), 1);
            } else {
                assert_eq!(&result.unwrap().payload[..], &data[..]);
            }
        }
        assert_eq!(reassembler.pending(), 0);
    }

    #[test]
    fn test_duplicate_fragments_are_absorbed() {
        let data = b"duplicated fragments do not corrupt the payload";
        let fragments = fragments_of(1, data, 7);

        let mut builder = MessageBuilder::new(1, 1);
        assert!(builder.insert(fragments[1].clone()));
        assert!(!builder.insert(fragments[1].clone()));
        for fragment in &fragments {
            builder.insert(fragment.clone());
        }

        assert_eq!(builder.received(), fragments.len());
        let msg = builder.build().unwrap();
        assert_eq!(&msg.payload[..], &data[..]);
    }

    #[test]
    fn test_last_fragment_at_max_index_is_ignored() {
        let mut builder = MessageBuilder::new(1, 1);
        let fragment = Fragment {
            message_id: 1,
            index: u32::MAX,
            is_last: true,
            data: Bytes::new(),
        };

        assert!(!builder.insert(fragment.clone()));
        assert_eq!(builder.received(), 0);
        assert!(!builder.is_complete());

        let mut reassembler = Reassembler::new();
        assert!(reassembler.push(1, fragment).is_none());
        assert_eq!(reassembler.pending(), 0);
    }

    #[test]
    fn test_incomplete_build_returns_builder() {
        let fragments = fragments_of(1, b"0123456789", 3);
        let mut builder = MessageBuilder::new(1, 1);
        builder.insert(fragments.last().unwrap().clone());

        let builder = builder.build().unwrap_err();
        assert!(!builder.is_complete());
    }

    #[test]
    fn test_same_message_id_from_different_sources() {
        let mut reassembler = Reassembler::new();
        let a = fragments_of(1, b"from source one", 4);
        let b = fragments_of(1, b"from source two", 4);

        let mut delivered = Vec::new();
        for (fa, fb) in a.into_iter().zip(b) {
            delivered.extend(reassembler.push(1, fa));
            delivered.extend(reassembler.push(2, fb));
        }

        assert_eq!(delivered.len(), 2);
        assert_eq!(&delivered[0].payload[..], b"from source one");
        assert_eq!(&delivered[1].payload[..], b"from source two");
    }

    #[test]
    fn test_push_packet_interleaved_messages() {
        let mut reassembler = Reassembler::new();
        let packet = DataPacket::new(
            1,
            3,
            vec![
                Fragment::whole(1, Bytes::from_static(b"one")),
                Fragment::whole(2, Bytes::from_static(b"two")),
            ],
        );

        let messages = reassembler.push_packet(packet);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id, 1);
        assert_eq!(messages[1].id, 2);
    }
}
