//! Periodic timing
//!
//! Background tasks run on a fixed period and must stop promptly on shutdown.
//! A `Ticker` pairs a periodic tick channel with a shutdown channel: dropping
//! the `Shutdown` handle wakes every waiter immediately.

use crossbeam::channel::{self, Receiver, Sender};
use crossbeam::select;
use std::time::{Duration, Instant};

/// Signals a shutdown to every `Ticker` created from it when dropped
pub struct Shutdown {
    _sender: Sender<()>,
}

/// Fixed-period ticker that can be interrupted
pub struct Ticker {
    interval: Duration,
    ticks: Receiver<Instant>,
    shutdown: Receiver<()>,
}

impl Ticker {
    /// Create a ticker and the handle that stops it
    pub fn new(interval: Duration) -> (Self, Shutdown) {
        let (tx, rx) = channel::bounded(0);
        let ticker = Ticker {
            interval,
            ticks: channel::tick(interval),
            shutdown: rx,
        };
        (ticker, Shutdown { _sender: tx })
    }

    /// Tick period
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Block until the next tick
    ///
    /// Returns false once shutdown was signalled. Missed ticks are coalesced,
    /// so a slow tick body never causes a burst of catch-up ticks.
    pub fn wait(&self) -> bool {
        select! {
            recv(self.ticks) -> _ => true,
            recv(self.shutdown) -> _ => false,
        }
    }
}
