//! In-process datagram network
//!
//! Every endpoint gets an inbox channel; sending pushes a copy of the datagram
//! into the destination's inbox. An optional filter decides the fate of each
//! datagram, which makes loss, duplication and partitions easy to script in
//! tests without touching real sockets.

use crate::transport::{Transport, TransportError};
use bytes::Bytes;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;
use urb_protocol::ProcessId;

/// What happens to one datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fate {
    /// Deliver it once
    Deliver,
    /// Lose it
    Drop,
    /// Deliver it twice
    Duplicate,
}

type Filter = Box<dyn FnMut(ProcessId, ProcessId, &[u8]) -> Fate + Send>;

/// Counters for everything that crossed the network
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NetworkStats {
    pub sent: u64,
    pub delivered: u64,
    pub dropped: u64,
    pub duplicated: u64,
}

#[derive(Default)]
struct Counters {
    sent: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    duplicated: AtomicU64,
}

struct NetworkInner {
    inboxes: RwLock<HashMap<ProcessId, Sender<Bytes>>>,
    filter: Mutex<Option<Filter>>,
    counters: Counters,
}

/// Shared in-process network connecting any number of endpoints
#[derive(Clone)]
pub struct MemoryNetwork {
    inner: Arc<NetworkInner>,
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryNetwork {
    /// Create a lossless network
    pub fn new() -> Self {
        MemoryNetwork {
            inner: Arc::new(NetworkInner {
                inboxes: RwLock::new(HashMap::new()),
                filter: Mutex::new(None),
                counters: Counters::default(),
            }),
        }
    }

    /// Create a network whose datagrams go through `filter`
    ///
    /// The filter sees (from, to, datagram) for every send.
    pub fn with_filter<F>(filter: F) -> Self
    where
        F: FnMut(ProcessId, ProcessId, &[u8]) -> Fate + Send + 'static,
    {
        let network = Self::new();
        network.set_filter(filter);
        network
    }

    /// Replace the datagram filter
    pub fn set_filter<F>(&self, filter: F)
    where
        F: FnMut(ProcessId, ProcessId, &[u8]) -> Fate + Send + 'static,
    {
        *self.inner.filter.lock() = Some(Box::new(filter));
    }

    /// Remove the filter, making the network lossless again
    pub fn clear_filter(&self) {
        *self.inner.filter.lock() = None;
    }

    /// Attach a new endpoint for process `id`
    ///
    /// Attaching the same id twice replaces the earlier endpoint's inbox.
    pub fn endpoint(&self, id: ProcessId) -> MemoryTransport {
        let (tx, rx) = channel::unbounded();
        self.inner.inboxes.write().insert(id, tx);

        MemoryTransport {
            id,
            network: self.inner.clone(),
            inbox: rx,
            recv_timeout: Mutex::new(Duration::from_millis(10)),
        }
    }

    /// Snapshot of the traffic counters
    pub fn stats(&self) -> NetworkStats {
        let c = &self.inner.counters;
        NetworkStats {
            sent: c.sent.load(Ordering::Relaxed),
            delivered: c.delivered.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            duplicated: c.duplicated.load(Ordering::Relaxed),
        }
    }
}

/// One process's view of a `MemoryNetwork`
pub struct MemoryTransport {
    id: ProcessId,
    network: Arc<NetworkInner>,
    inbox: Receiver<Bytes>,
    recv_timeout: Mutex<Duration>,
}

impl MemoryTransport {
    /// Process id this endpoint was attached as
    pub fn id(&self) -> ProcessId {
        self.id
    }
}

impl Transport for MemoryTransport {
    fn send_to(&self, destination: ProcessId, datagram: &[u8]) -> Result<(), TransportError> {
        let counters = &self.network.counters;
        counters.sent.fetch_add(1, Ordering::Relaxed);

        let inbox = self
            .network
            .inboxes
            .read()
            .get(&destination)
            .cloned()
            .ok_or(TransportError::UnknownPeer(destination))?;

        let fate = match self.network.filter.lock().as_mut() {
            Some(filter) => filter(self.id, destination, datagram),
            None => Fate::Deliver,
        };

        let copies = match fate {
            Fate::Deliver => 1,
            Fate::Drop => {
                counters.dropped.fetch_add(1, Ordering::Relaxed);
                trace!(from = self.id, to = destination, "datagram dropped");
                0
            }
            Fate::Duplicate => {
                counters.duplicated.fetch_add(1, Ordering::Relaxed);
                2
            }
        };

        let datagram = Bytes::copy_from_slice(datagram);
        for _ in 0..copies {
            // A detached receiver behaves like a closed port: the datagram vanishes
            if inbox.send(datagram.clone()).is_ok() {
                counters.delivered.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    fn recv(&self, buf: &mut [u8]) -> Result<Option<usize>, TransportError> {
        let timeout = *self.recv_timeout.lock();
        match self.inbox.recv_timeout(timeout) {
            Ok(datagram) => {
                let n = datagram.len().min(buf.len());
                buf[..n].copy_from_slice(&datagram[..n]);
                Ok(Some(n))
            }
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::Closed),
        }
    }

    fn set_recv_timeout(&self, timeout: Duration) -> Result<(), TransportError> {
        *self.recv_timeout.lock() = timeout;
        Ok(())
    }
}
