//! Link errors

use thiserror::Error;
use urb_io::TransportError;
use urb_protocol::{PacketId, ProcessId, WireError};

/// Perfect link errors
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("Malformed packet: {0}")]
    Wire(#[from] WireError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Acknowledgment from {from} for packet {packet_id} that was never sent")]
    UnknownAcknowledgement { from: ProcessId, packet_id: PacketId },

    #[error("Packet from unknown process {0}")]
    UnknownSource(ProcessId),

    #[error("Unknown destination: {0}")]
    UnknownDestination(ProcessId),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Link is closed")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LinkError {
    /// Whether this error means the peers disagree on the protocol
    ///
    /// These stop the receive loop; everything else is reported to the caller.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            LinkError::Wire(_)
                | LinkError::UnknownAcknowledgement { .. }
                | LinkError::UnknownSource(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_violations() {
        assert!(LinkError::Wire(WireError::InvalidFlag(2)).is_protocol_violation());
        assert!(LinkError::UnknownSource(9).is_protocol_violation());
        assert!(LinkError::UnknownAcknowledgement {
            from: 2,
            packet_id: 1
        }
        .is_protocol_violation());

        assert!(!LinkError::Closed.is_protocol_violation());
        assert!(!LinkError::Transport(TransportError::UnknownPeer(3)).is_protocol_violation());
    }
}
