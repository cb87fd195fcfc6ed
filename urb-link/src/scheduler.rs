//! Retransmission scheduler

use crate::link::LinkShared;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::debug;
use urb_io::Ticker;

/// Flush and resend on every tick until shutdown
pub(crate) fn run(shared: Arc<LinkShared>, ticker: Ticker) {
    while ticker.wait() {
        if !shared.running.load(Ordering::Acquire) {
            break;
        }
        shared.tick();
    }

    debug!(
        local = shared.local(),
        interval_ms = ticker.interval().as_millis() as u64,
        "retransmission scheduler exited"
    );
}
