//! FIFO broadcast
//!
//! Uniform broadcast delivers in whatever order majorities form. This layer
//! holds back early arrivals so that each source's broadcasts reach the
//! application in the order that source issued them.

use crate::config::BroadcastConfig;
use crate::error::BroadcastError;
use crate::urb::UniformBroadcast;
use crate::{Broadcast, Deliver};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::trace;
use urb_io::Transport;
use urb_link::PerfectLink;
use urb_protocol::{Membership, Message, MessageId, ProcessId};

/// Per-source in-order release of messages numbered from 1
#[derive(Debug, Default)]
pub struct FifoSequencer {
    /// Next id to release per source
    next: HashMap<ProcessId, MessageId>,
    /// Arrivals ahead of `next`, per source
    early: HashMap<ProcessId, BTreeMap<MessageId, Message>>,
}

impl FifoSequencer {
    /// Create an empty sequencer
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept a message, returning every message now releasable in order
    ///
    /// Messages already released or already buffered are ignored.
    pub fn push(&mut self, message: Message) -> Vec<Message> {
        let source = message.source;
        let next = self.next.entry(source).or_insert(1);

        if message.id < *next {
            return Vec::new();
        }
        if message.id > *next {
            trace!(source, id = message.id, expected = *next, "holding early message");
            self.early
                .entry(source)
                .or_default()
                .entry(message.id)
                .or_insert(message);
            return Vec::new();
        }

        let mut ready = vec![message];
        *next += 1;

        if let Some(early) = self.early.get_mut(&source) {
            while let Some(message) = early.remove(&*next) {
                ready.push(message);
                *next += 1;
            }
            if early.is_empty() {
                self.early.remove(&source);
            }
        }
        ready
    }

    /// Next id expected from `source`
    pub fn next_expected(&self, source: ProcessId) -> MessageId {
        self.next.get(&source).copied().unwrap_or(1)
    }

    /// Number of messages held back
    pub fn buffered(&self) -> usize {
        self.early.values().map(BTreeMap::len).sum()
    }
}

/// Uniform broadcast with per-source FIFO delivery
pub struct FifoBroadcast {
    urb: UniformBroadcast,
    sequencer: Arc<Mutex<FifoSequencer>>,
}

impl FifoBroadcast {
    /// Start the broadcast stack for the local process of `membership`
    pub fn start<D: Deliver>(
        membership: Membership,
        transport: Arc<dyn Transport>,
        config: BroadcastConfig,
        deliver: D,
    ) -> Result<Self, BroadcastError> {
        let sequencer = Arc::new(Mutex::new(FifoSequencer::new()));

        let release = sequencer.clone();
        let urb = UniformBroadcast::start(membership, transport, config, move |message: Message| {
            // Deliver under the lock so concurrent releases cannot reorder
            let mut sequencer = release.lock();
            for ready in sequencer.push(message) {
                deliver.deliver(ready);
            }
        })?;

        Ok(FifoBroadcast { urb, sequencer })
    }

    /// The perfect link underneath
    pub fn link(&self) -> &PerfectLink {
        self.urb.link()
    }

    /// Number of delivered broadcasts held back for ordering
    pub fn buffered(&self) -> usize {
        self.sequencer.lock().buffered()
    }
}

impl Broadcast for FifoBroadcast {
    fn local(&self) -> ProcessId {
        self.urb.local()
    }

    fn broadcast(&self, payload: Bytes) -> Result<(), BroadcastError> {
        self.urb.broadcast(payload)
    }

    fn close(&self) -> Result<(), BroadcastError> {
        self.urb.close()
    }
}
