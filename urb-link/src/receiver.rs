//! Receive loop

use crate::link::LinkShared;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};
use urb_io::TransportError;

/// Pause after a failed receive before polling the transport again
const ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Consecutive receive failures between two warnings
const ERROR_LOG_EVERY: u64 = 100;

/// Poll the transport until the link stops
///
/// The transport's receive timeout bounds how long a shutdown goes unnoticed.
pub(crate) fn run(shared: Arc<LinkShared>) {
    // One spare byte so an oversized datagram is detected instead of silently truncated
    let mut buf = vec![0u8; shared.config.max_packet_size + 1];
    let mut failures: u64 = 0;

    while shared.running.load(Ordering::Acquire) {
        let len = match shared.transport.recv(&mut buf) {
            Ok(Some(len)) => len,
            Ok(None) => continue,
            Err(TransportError::Closed) => break,
            Err(e) => {
                failures += 1;
                if failures % ERROR_LOG_EVERY == 1 {
                    warn!(local = shared.local(), error = %e, failures, "receive failed");
                }
                thread::sleep(ERROR_BACKOFF);
                continue;
            }
        };
        failures = 0;

        match shared.handle_datagram(&buf[..len]) {
            Ok(()) => {}
            Err(err) if err.is_protocol_violation() => {
                shared.fail(err);
                break;
            }
            Err(err) => warn!(local = shared.local(), error = %err, "datagram dropped"),
        }
    }

    debug!(local = shared.local(), "receive loop exited");
}
