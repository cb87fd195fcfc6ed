//! Statistics display and formatting

use std::time::Duration;
use urb::link::LinkStats;

/// Format a message rate in human-readable form
pub fn format_rate(count: u64, elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return "n/a".to_string();
    }

    let rate = count as f64 / secs;
    if rate >= 1_000_000.0 {
        format!("{:.2} M msg/s", rate / 1_000_000.0)
    } else if rate >= 1_000.0 {
        format!("{:.2} K msg/s", rate / 1_000.0)
    } else {
        format!("{:.0} msg/s", rate)
    }
}

/// One-line summary of link counters
pub fn display_link_stats(stats: &LinkStats, elapsed: Duration) -> String {
    format!(
        "sent={} delivered={} ({}) | packets={} resent={} acks_out={} acks_in={} dup_in={} | in_flight={} send_errors={}",
        stats.messages_sent,
        stats.messages_delivered,
        format_rate(stats.messages_delivered, elapsed),
        stats.data_packets_sent,
        stats.retransmissions,
        stats.ack_packets_sent,
        stats.acks_received,
        stats.duplicate_packets,
        stats.in_flight,
        stats.send_errors,
    )
}
