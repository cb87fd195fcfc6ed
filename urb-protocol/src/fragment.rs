//! Message fragments
//!
//! A fragment is a slice of one message's payload plus the metadata needed to
//! put it back together:
//!
//! ```text
//! message id (4B) | fragment index (4B) | is last (1B, 0/1) | data length (4B) | data
//! ```
//!
//! Every message starts life as a single fragment (index 0, last). When a
//! fragment does not fit in the space left in a packet it is split in two; the
//! tail keeps the message id, takes the next index and inherits the last flag.

use crate::codec::{self, WireError};
use crate::message::MessageId;
use bytes::{Buf, BufMut, Bytes};

/// Metadata bytes carried by every fragment
pub const FRAGMENT_HEADER_LEN: usize = 13;

/// A slice of one message's payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    /// Id of the message this fragment belongs to
    pub message_id: MessageId,
    /// Position of this fragment within the message (contiguous from 0)
    pub index: u32,
    /// Whether this is the final fragment of the message
    pub is_last: bool,
    /// Fragment payload bytes
    pub data: Bytes,
}

impl Fragment {
    /// Create a single fragment covering a whole message
    pub fn whole(message_id: MessageId, data: Bytes) -> Self {
        Fragment {
            message_id,
            index: 0,
            is_last: true,
            data,
        }
    }

    /// Size of this fragment once encoded
    #[inline]
    pub fn encoded_len(&self) -> usize {
        FRAGMENT_HEADER_LEN + self.data.len()
    }

    /// Serialize the fragment
    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        codec::put_int(buf, self.message_id);
        codec::put_int(buf, self.index);
        buf.put_u8(self.is_last as u8);
        codec::put_int(buf, self.data.len() as u32);
        buf.put_slice(&self.data);
    }

    /// Parse one fragment from the front of `buf`, advancing past it
    ///
    /// The fragment data shares memory with `buf`.
    pub fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        codec::ensure(&*buf, FRAGMENT_HEADER_LEN, "fragment header")?;

        let message_id = codec::get_int(buf, "message id")?;
        let index = codec::get_int(buf, "fragment index")?;
        let is_last = codec::get_flag(buf, "last fragment flag")?;
        let len = codec::get_int(buf, "fragment length")? as usize;

        // The fragment count is index + 1 and must fit in a u32
        if is_last && index == u32::MAX {
            return Err(WireError::FragmentIndexOverflow(index));
        }

        codec::ensure(&*buf, len, "fragment data")?;
        let data = buf.split_to(len);

        Ok(Fragment {
            message_id,
            index,
            is_last,
            data,
        })
    }

    /// Split so that the first part encodes to at most `max_encoded` bytes
    ///
    /// Returns the fragment unchanged (and no tail) when it already fits.
    /// `max_encoded` must leave room for at least one data byte.
    pub fn split(self, max_encoded: usize) -> (Fragment, Option<Fragment>) {
        debug_assert!(max_encoded > FRAGMENT_HEADER_LEN);

        if self.encoded_len() <= max_encoded {
            return (self, None);
        }

        let mut head_data = self.data;
        let tail_data = head_data.split_off(max_encoded - FRAGMENT_HEADER_LEN);

        let head = Fragment {
            message_id: self.message_id,
            index: self.index,
            is_last: false,
            data: head_data,
        };
        let tail = Fragment {
            message_id: self.message_id,
            index: self.index + 1,
            is_last: self.is_last,
            data: tail_data,
        };

        (head, Some(tail))
    }
}

/// Iterator over the fragments packed back-to-back in a packet body
pub struct FragmentIter {
    body: Bytes,
    failed: bool,
}

impl FragmentIter {
    pub(crate) fn new(body: Bytes) -> Self {
        FragmentIter {
            body,
            failed: false,
        }
    }
}

impl Iterator for FragmentIter {
    type Item = Result<Fragment, WireError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || !self.body.has_remaining() {
            return None;
        }

        let result = Fragment::decode(&mut self.body);
        self.failed = result.is_err();
        Some(result)
    }
}
