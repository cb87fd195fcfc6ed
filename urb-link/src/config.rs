//! Link configuration

use crate::error::LinkError;
use std::time::Duration;
use urb_protocol::{ACK_HEADER_LEN, DEFAULT_MAX_PACKET_SIZE, MIN_PACKET_SIZE};

/// Largest datagram a UDP socket will carry
const MAX_DATAGRAM: usize = urb_io::MAX_UDP_PAYLOAD;

/// Perfect link tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConfig {
    /// Packet size ceiling, all headers included (bytes)
    pub max_packet_size: usize,
    /// Period of the flush/retransmission tick
    pub resend_interval: Duration,
    /// In-flight packets resent per tick
    pub resend_batch_size: usize,
    /// Pending acks that trigger an ack packet before the next tick
    pub min_acks_per_packet: usize,
    /// How long the receive loop blocks before re-checking for shutdown
    pub recv_timeout: Duration,
    /// Threads running `send` jobs
    pub worker_threads: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            resend_interval: Duration::from_millis(10),
            resend_batch_size: 100,
            min_acks_per_packet: 100,
            recv_timeout: Duration::from_millis(10),
            worker_threads: 5,
        }
    }
}

impl LinkConfig {
    /// Check that the configuration can run
    pub fn validate(&self) -> Result<(), LinkError> {
        let min = MIN_PACKET_SIZE.max(ACK_HEADER_LEN + 4);
        if self.max_packet_size < min {
            return Err(LinkError::InvalidConfig(format!(
                "max_packet_size {} is below the minimum of {}",
                self.max_packet_size, min
            )));
        }
        if self.max_packet_size > MAX_DATAGRAM {
            return Err(LinkError::InvalidConfig(format!(
                "max_packet_size {} exceeds the datagram limit of {}",
                self.max_packet_size, MAX_DATAGRAM
            )));
        }
        if self.resend_interval.is_zero() {
            return Err(LinkError::InvalidConfig(
                "resend_interval must be positive".into(),
            ));
        }
        if self.recv_timeout.is_zero() {
            return Err(LinkError::InvalidConfig(
                "recv_timeout must be positive".into(),
            ));
        }
        if self.resend_batch_size == 0 {
            return Err(LinkError::InvalidConfig(
                "resend_batch_size must be positive".into(),
            ));
        }
        if self.min_acks_per_packet == 0 {
            return Err(LinkError::InvalidConfig(
                "min_acks_per_packet must be positive".into(),
            ));
        }
        if self.worker_threads == 0 {
            return Err(LinkError::InvalidConfig(
                "worker_threads must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = LinkConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_packet_size, 65_000);
        assert_eq!(config.resend_batch_size, 100);
    }

    #[test]
    fn test_rejects_tiny_packets() {
        let config = LinkConfig {
            max_packet_size: 10,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(LinkError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_rejects_zero_values() {
        let config = LinkConfig {
            resend_interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = LinkConfig {
            resend_batch_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
