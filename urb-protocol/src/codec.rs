//! Big-endian integer codec
//!
//! Every integer on the wire is a 32-bit big-endian value (4 bytes). Reads are
//! bounds-checked and report which field was cut short.

use bytes::{Buf, BufMut};
use thiserror::Error;

/// Size of an encoded integer in bytes
pub const INT_LEN: usize = 4;

/// Wire decoding errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("Truncated {field}: need {needed} bytes, {remaining} remaining")]
    Truncated {
        field: &'static str,
        needed: usize,
        remaining: usize,
    },

    #[error("Invalid boolean byte: {0}")]
    InvalidFlag(u8),

    #[error("Packet too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },

    #[error("Last fragment index {0} leaves no room for a fragment count")]
    FragmentIndexOverflow(u32),
}

/// Append a 32-bit integer in network byte order
#[inline]
pub fn put_int<B: BufMut>(buf: &mut B, value: u32) {
    buf.put_u32(value);
}

/// Read a 32-bit integer in network byte order, advancing the buffer
pub fn get_int<B: Buf>(buf: &mut B, field: &'static str) -> Result<u32, WireError> {
    ensure(buf, INT_LEN, field)?;
    Ok(buf.get_u32())
}

/// Read a 0/1 flag byte, advancing the buffer
pub fn get_flag<B: Buf>(buf: &mut B, field: &'static str) -> Result<bool, WireError> {
    ensure(buf, 1, field)?;
    match buf.get_u8() {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(WireError::InvalidFlag(other)),
    }
}

/// Decode the integer at `offset` without consuming anything
pub fn peek_int(bytes: &[u8], offset: usize, field: &'static str) -> Result<u32, WireError> {
    let end = offset + INT_LEN;
    if bytes.len() < end {
        return Err(WireError::Truncated {
            field,
            needed: INT_LEN,
            remaining: bytes.len().saturating_sub(offset),
        });
    }
    let mut raw = [0u8; INT_LEN];
    raw.copy_from_slice(&bytes[offset..end]);
    Ok(u32::from_be_bytes(raw))
}

/// Check that at least `needed` bytes remain
#[inline]
pub fn ensure<B: Buf>(buf: &B, needed: usize, field: &'static str) -> Result<(), WireError> {
    if buf.remaining() < needed {
        return Err(WireError::Truncated {
            field,
            needed,
            remaining: buf.remaining(),
        });
    }
    Ok(())
}
