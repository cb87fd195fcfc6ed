//! Perfect Link
//!
//! Turns an unreliable, size-limited datagram transport into a reliable
//! point-to-point channel for messages of any size. Messages are fragmented
//! into packets, retransmitted until acknowledged, deduplicated on receipt and
//! reassembled before delivery.
//!
//! Three kinds of threads share the link state:
//! - a receive loop that decodes datagrams, acknowledges data and delivers
//! - a retransmission scheduler that flushes queues and resends in rotating batches
//! - a small worker pool that runs `send` off the caller's thread

pub mod config;
pub mod deliver;
pub mod error;
pub mod inflight;
pub mod link;
mod receiver;
mod scheduler;
pub mod stats;

pub use config::LinkConfig;
pub use deliver::Deliver;
pub use error::LinkError;
pub use inflight::InFlight;
pub use link::PerfectLink;
pub use stats::LinkStats;
