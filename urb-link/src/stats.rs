//! Link statistics

/// Counters for one perfect link
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkStats {
    /// Messages accepted by `send`
    pub messages_sent: u64,
    /// Messages handed to the delivery callback
    pub messages_delivered: u64,
    /// Data packets put on the wire for the first time
    pub data_packets_sent: u64,
    /// Data packets resent by the scheduler
    pub retransmissions: u64,
    /// Ack packets put on the wire
    pub ack_packets_sent: u64,
    /// Acks that removed a packet from the in-flight set
    pub acks_received: u64,
    /// Acks for packets already acknowledged
    pub duplicate_acks: u64,
    /// Data packets received
    pub data_packets_received: u64,
    /// Data packets received more than once
    pub duplicate_packets: u64,
    /// Transport send failures (swallowed)
    pub send_errors: u64,
    /// Packets awaiting acknowledgment (filled in by the snapshot)
    pub in_flight: usize,
}
