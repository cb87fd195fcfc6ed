//! Perfect link orchestration
//!
//! `PerfectLink` owns the shared link state and the threads working on it.
//! Each structure has its own lock (send queues individually, the in-flight
//! registry, the reassembler, the delivered tracker) so a retransmission tick
//! never waits behind reassembly and vice versa.

use crate::config::LinkConfig;
use crate::deliver::Deliver;
use crate::error::LinkError;
use crate::inflight::{Acked, InFlight};
use crate::stats::LinkStats;
use crate::{receiver, scheduler};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, trace, warn};
use urb_io::{Shutdown, TaskPool, Ticker, Transport};
use urb_protocol::{
    DataPacket, DeliveredTracker, Membership, MessageId, OutgoingPacket, Packet, PacketId,
    ProcessId, Reassembler, SendQueue, WireError,
};

/// State shared by the caller, the worker pool, the receive loop and the scheduler
pub(crate) struct LinkShared {
    pub(crate) membership: Membership,
    pub(crate) config: LinkConfig,
    pub(crate) transport: Arc<dyn Transport>,
    queues: RwLock<HashMap<ProcessId, Arc<Mutex<SendQueue>>>>,
    in_flight: Mutex<InFlight>,
    reassembler: Mutex<Reassembler>,
    delivered: Mutex<DeliveredTracker>,
    deliver: Box<dyn Deliver>,
    stats: Mutex<LinkStats>,
    pub(crate) running: AtomicBool,
    fatal: Mutex<Option<LinkError>>,
}

impl LinkShared {
    #[inline]
    pub(crate) fn local(&self) -> ProcessId {
        self.membership.local()
    }

    /// Send queue for `destination`, created on first use
    fn queue(&self, destination: ProcessId) -> Option<Arc<Mutex<SendQueue>>> {
        if let Some(queue) = self.queues.read().get(&destination) {
            return Some(queue.clone());
        }
        if !self.membership.contains(destination) {
            return None;
        }

        let mut queues = self.queues.write();
        let queue = queues.entry(destination).or_insert_with(|| {
            Arc::new(Mutex::new(SendQueue::new(
                self.local(),
                destination,
                self.config.max_packet_size,
                self.config.min_acks_per_packet,
            )))
        });
        Some(queue.clone())
    }

    /// Every send queue created so far
    fn queues(&self) -> Vec<Arc<Mutex<SendQueue>>> {
        self.queues.read().values().cloned().collect()
    }

    /// Queue a message and put any packets that filled up on the wire
    pub(crate) fn enqueue(&self, destination: ProcessId, message_id: MessageId, payload: Bytes) {
        let Some(queue) = self.queue(destination) else {
            return;
        };

        let len = payload.len();
        let packets = queue.lock().push_message(message_id, payload);
        trace!(destination, message_id, len, packets = packets.len(), "message queued");

        for packet in packets {
            self.dispatch(destination, packet);
        }
    }

    /// Register a data packet as in flight, then send it
    fn dispatch(&self, destination: ProcessId, packet: OutgoingPacket) {
        self.in_flight
            .lock()
            .insert(destination, packet.packet_id, packet.bytes.clone());
        self.stats.lock().data_packets_sent += 1;
        self.transmit(destination, &packet.bytes);
    }

    /// Put a datagram on the wire, swallowing failures
    fn transmit(&self, destination: ProcessId, datagram: &[u8]) {
        if let Err(e) = self.transport.send_to(destination, datagram) {
            debug!(destination, error = %e, "send failed, retransmission will retry");
            self.stats.lock().send_errors += 1;
        }
    }

    /// One scheduler tick: resend a batch of in-flight packets, then flush every queue
    pub(crate) fn tick(&self) {
        let batch = self
            .in_flight
            .lock()
            .next_batch(self.config.resend_batch_size);
        if !batch.is_empty() {
            trace!(packets = batch.len(), "resending in-flight batch");
            self.stats.lock().retransmissions += batch.len() as u64;
        }
        for (destination, bytes) in batch {
            self.transmit(destination, &bytes);
        }

        for queue in self.queues() {
            let (destination, flush) = {
                let mut queue = queue.lock();
                (queue.destination(), queue.flush())
            };

            for ack in flush.acks {
                self.stats.lock().ack_packets_sent += 1;
                self.transmit(destination, &ack);
            }
            for packet in flush.packets {
                self.dispatch(destination, packet);
            }
        }
    }

    /// Handle one inbound datagram
    ///
    /// Errors returned here are protocol violations and stop the receive loop.
    pub(crate) fn handle_datagram(&self, datagram: &[u8]) -> Result<(), LinkError> {
        if datagram.len() > self.config.max_packet_size {
            return Err(WireError::TooLarge {
                size: datagram.len(),
                max: self.config.max_packet_size,
            }
            .into());
        }

        match Packet::decode(Bytes::copy_from_slice(datagram))? {
            Packet::Ack(ack) => {
                let mut released = 0;
                let mut duplicates = 0;
                {
                    let mut in_flight = self.in_flight.lock();
                    for &packet_id in &ack.packet_ids {
                        match in_flight.acknowledge(ack.source, packet_id)? {
                            Acked::Released => released += 1,
                            Acked::Duplicate => duplicates += 1,
                        }
                    }
                }
                trace!(from = ack.source, released, duplicates, "acks received");

                let mut stats = self.stats.lock();
                stats.acks_received += released;
                stats.duplicate_acks += duplicates;
                Ok(())
            }
            Packet::Data(packet) => self.handle_data(packet),
        }
    }

    fn handle_data(&self, packet: DataPacket) -> Result<(), LinkError> {
        let source = packet.source;
        let packet_id: PacketId = packet.packet_id;

        let queue = self
            .queue(source)
            .ok_or(LinkError::UnknownSource(source))?;

        // Acknowledge every copy so a lost ack is eventually repaired
        let ack = queue.lock().push_ack(packet_id);
        if let Some(ack) = ack {
            self.stats.lock().ack_packets_sent += 1;
            self.transmit(source, &ack);
        }

        let fresh = self.delivered.lock().insert(source, packet_id);
        if !fresh {
            trace!(source, packet_id, "duplicate data packet");
            let mut stats = self.stats.lock();
            stats.data_packets_received += 1;
            stats.duplicate_packets += 1;
            return Ok(());
        }

        let messages = self.reassembler.lock().push_packet(packet);
        {
            let mut stats = self.stats.lock();
            stats.data_packets_received += 1;
            stats.messages_delivered += messages.len() as u64;
        }
        for message in messages {
            trace!(source, message_id = message.id, len = message.payload.len(), "delivering");
            self.deliver.deliver(message);
        }
        Ok(())
    }

    /// Record a protocol violation and stop
    pub(crate) fn fail(&self, err: LinkError) {
        error!(local = self.local(), error = %err, "fatal link error, stopping");
        self.running.store(false, Ordering::Release);
        self.fatal.lock().get_or_insert(err);
    }
}

/// Reliable point-to-point link over a datagram transport
pub struct PerfectLink {
    shared: Arc<LinkShared>,
    next_message_id: AtomicU32,
    pool: TaskPool,
    shutdown: Mutex<Option<Shutdown>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl PerfectLink {
    /// Start a link for the local process of `membership`
    ///
    /// Spawns the receive loop, the retransmission scheduler and the send
    /// workers. `deliver` is called once per distinct message received.
    pub fn start<D: Deliver>(
        membership: Membership,
        transport: Arc<dyn Transport>,
        config: LinkConfig,
        deliver: D,
    ) -> Result<Self, LinkError> {
        config.validate()?;
        transport.set_recv_timeout(config.recv_timeout)?;

        let local = membership.local();
        let shared = Arc::new(LinkShared {
            membership,
            config: config.clone(),
            transport,
            queues: RwLock::new(HashMap::new()),
            in_flight: Mutex::new(InFlight::new()),
            reassembler: Mutex::new(Reassembler::new()),
            delivered: Mutex::new(DeliveredTracker::new()),
            deliver: Box::new(deliver),
            stats: Mutex::new(LinkStats::default()),
            running: AtomicBool::new(true),
            fatal: Mutex::new(None),
        });

        let pool = TaskPool::new(&format!("link-{}-send", local), config.worker_threads)?;
        let (ticker, shutdown) = Ticker::new(config.resend_interval);

        let mut threads = Vec::with_capacity(2);
        let recv_shared = shared.clone();
        threads.push(
            thread::Builder::new()
                .name(format!("link-{}-recv", local))
                .spawn(move || receiver::run(recv_shared))?,
        );
        let tick_shared = shared.clone();
        threads.push(
            thread::Builder::new()
                .name(format!("link-{}-resend", local))
                .spawn(move || scheduler::run(tick_shared, ticker))?,
        );

        info!(
            local,
            processes = shared.membership.len(),
            max_packet_size = config.max_packet_size,
            "perfect link started"
        );

        Ok(PerfectLink {
            shared,
            next_message_id: AtomicU32::new(1),
            pool,
            shutdown: Mutex::new(Some(shutdown)),
            threads: Mutex::new(threads),
        })
    }

    /// Id of the local process
    pub fn local(&self) -> ProcessId {
        self.shared.local()
    }

    /// The process set this link connects
    pub fn membership(&self) -> &Membership {
        &self.shared.membership
    }

    /// Send `payload` to `destination`
    ///
    /// Returns the link-level message id as soon as the message is handed to
    /// a worker; packing and transmission happen in the background.
    pub fn send(&self, payload: Bytes, destination: ProcessId) -> Result<MessageId, LinkError> {
        if !self.is_running() {
            return Err(LinkError::Closed);
        }
        if !self.shared.membership.contains(destination) {
            return Err(LinkError::UnknownDestination(destination));
        }

        let message_id = self.next_message_id.fetch_add(1, Ordering::Relaxed);
        let shared = self.shared.clone();
        if !self
            .pool
            .execute(move || shared.enqueue(destination, message_id, payload))
        {
            return Err(LinkError::Closed);
        }

        self.shared.stats.lock().messages_sent += 1;
        Ok(message_id)
    }

    /// Whether the link is still running
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Whether the link stopped on a protocol violation
    pub fn is_failed(&self) -> bool {
        self.shared.fatal.lock().is_some()
    }

    /// Description of the protocol violation that stopped the link, if any
    pub fn fatal_error(&self) -> Option<String> {
        self.shared.fatal.lock().as_ref().map(ToString::to_string)
    }

    /// Snapshot of the link counters
    pub fn stats(&self) -> LinkStats {
        let mut stats = self.shared.stats.lock().clone();
        stats.in_flight = self.shared.in_flight.lock().len();
        stats
    }

    /// Number of packets awaiting acknowledgment
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.lock().len()
    }

    /// Stop the receive loop and the scheduler and wait for them
    ///
    /// Unacknowledged packets are abandoned. Returns the protocol violation
    /// that stopped the link, if there was one. Calling `close` again is a
    /// no-op.
    pub fn close(&self) -> Result<(), LinkError> {
        let was_running = self.shared.running.swap(false, Ordering::AcqRel);
        self.shutdown.lock().take();
        self.pool.shutdown();

        let current = thread::current().id();
        let threads: Vec<_> = self.threads.lock().drain(..).collect();
        let joined = !threads.is_empty();
        for handle in threads {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                warn!(local = self.local(), "link thread panicked");
            }
        }

        if was_running || joined {
            let stats = self.stats();
            info!(
                local = self.local(),
                sent = stats.messages_sent,
                delivered = stats.messages_delivered,
                in_flight = stats.in_flight,
                "perfect link closed"
            );
        }

        match self.shared.fatal.lock().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Drop for PerfectLink {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!(error = %e, "perfect link stopped with an error");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use urb_io::{MemoryNetwork, TransportError};
    use urb_protocol::{AckPacket, Fragment, Message};

    /// Wait up to a second for the link to record a fatal error
    fn wait_failed(link: &PerfectLink) {
        for _ in 0..500 {
            if link.is_failed() {
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }
    }

    /// Transport whose receive side is permanently broken
    #[derive(Default)]
    struct BrokenTransport {
        recv_calls: AtomicUsize,
    }

    impl Transport for BrokenTransport {
        fn send_to(&self, _destination: ProcessId, _datagram: &[u8]) -> Result<(), TransportError> {
            Ok(())
        }

        fn recv(&self, _buf: &mut [u8]) -> Result<Option<usize>, TransportError> {
            self.recv_calls.fetch_add(1, Ordering::Relaxed);
            Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "socket gone",
            )))
        }

        fn set_recv_timeout(&self, _timeout: Duration) -> Result<(), TransportError> {
            Ok(())
        }
    }

    fn pair(network: &MemoryNetwork) -> (PerfectLink, channel::Receiver<Message>) {
        let (tx, rx) = channel::unbounded();
        let link = PerfectLink::start(
            Membership::range(1, 2).unwrap(),
            Arc::new(network.endpoint(1)),
            LinkConfig::default(),
            move |m: Message| {
                let _ = tx.send(m);
            },
        )
        .unwrap();
        (link, rx)
    }

    #[test]
    fn test_send_to_self() {
        let network = MemoryNetwork::new();
        let (link, rx) = pair(&network);

        let id = link.send(Bytes::from_static(b"loopback"), 1).unwrap();
        let msg = rx.recv_timeout(Duration::from_secs(5)).unwrap();

        assert_eq!(msg.id, id);
        assert_eq!(msg.source, 1);
        assert_eq!(&msg.payload[..], b"loopback");
        link.close().unwrap();
    }

    #[test]
    fn test_message_ids_increase() {
        let network = MemoryNetwork::new();
        let _peer = network.endpoint(2);
        let (link, _rx) = pair(&network);

        let ids: Vec<_> = (0..5)
            .map(|_| link.send(Bytes::from_static(b"x"), 2).unwrap())
            .collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_unknown_destination() {
        let network = MemoryNetwork::new();
        let (link, _rx) = pair(&network);

        assert!(matches!(
            link.send(Bytes::new(), 7),
            Err(LinkError::UnknownDestination(7))
        ));
    }

    #[test]
    fn test_send_after_close() {
        let network = MemoryNetwork::new();
        let (link, _rx) = pair(&network);

        link.close().unwrap();
        link.close().unwrap();
        assert!(matches!(link.send(Bytes::new(), 1), Err(LinkError::Closed)));
    }

    #[test]
    fn test_unknown_ack_is_fatal() {
        let network = MemoryNetwork::new();
        let peer = network.endpoint(2);
        let (link, _rx) = pair(&network);

        peer.send_to(1, &AckPacket::new(2, vec![42]).to_bytes())
            .unwrap();

        for _ in 0..500 {
            if link.is_failed() {
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }
        assert!(link.is_failed());
        assert!(!link.is_running());
        assert!(link.fatal_error().unwrap().contains("never sent"));
        assert!(matches!(
            link.close(),
            Err(LinkError::UnknownAcknowledgement { from: 2, packet_id: 42 })
        ));
    }

    #[test]
    fn test_malformed_packet_is_fatal() {
        let network = MemoryNetwork::new();
        let peer = network.endpoint(2);
        let (link, _rx) = pair(&network);

        peer.send_to(1, &[0, 0, 0, 1, 0]).unwrap();

        wait_failed(&link);
        assert!(matches!(link.close(), Err(LinkError::Wire(_))));
    }

    #[test]
    fn test_last_fragment_index_overflow_is_fatal() {
        let network = MemoryNetwork::new();
        let peer = network.endpoint(2);
        let (link, rx) = pair(&network);

        let bad = DataPacket::new(
            1,
            2,
            vec![Fragment {
                message_id: 1,
                index: u32::MAX,
                is_last: true,
                data: Bytes::new(),
            }],
        );
        peer.send_to(1, &bad.to_bytes()).unwrap();
        let good = DataPacket::new(2, 2, vec![Fragment::whole(2, Bytes::from_static(b"ok"))]);
        peer.send_to(1, &good.to_bytes()).unwrap();

        wait_failed(&link);
        assert!(link.is_failed());
        assert!(!link.is_running());
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert!(matches!(
            link.close(),
            Err(LinkError::Wire(WireError::FragmentIndexOverflow(u32::MAX)))
        ));
    }

    #[test]
    fn test_data_from_non_member_is_fatal() {
        let network = MemoryNetwork::new();
        let stranger = network.endpoint(7);
        let (link, rx) = pair(&network);

        let packet = DataPacket::new(1, 7, vec![Fragment::whole(1, Bytes::from_static(b"hi"))]);
        stranger.send_to(1, &packet.to_bytes()).unwrap();

        wait_failed(&link);
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        assert!(matches!(link.close(), Err(LinkError::UnknownSource(7))));
    }

    #[test]
    fn test_receive_errors_back_off() {
        let transport = Arc::new(BrokenTransport::default());
        let link = PerfectLink::start(
            Membership::range(1, 2).unwrap(),
            transport.clone(),
            LinkConfig::default(),
            |_m: Message| {},
        )
        .unwrap();

        thread::sleep(Duration::from_millis(300));
        let calls = transport.recv_calls.load(Ordering::Relaxed);
        assert!(calls >= 1);
        assert!(calls <= 20, "receive loop polled a broken transport {} times", calls);

        // Transport failures are not protocol violations
        assert!(link.is_running());
        assert!(!link.is_failed());
        link.close().unwrap();
    }

    #[test]
    fn test_invalid_config_rejected() {
        let network = MemoryNetwork::new();
        let config = LinkConfig {
            worker_threads: 0,
            ..Default::default()
        };
        let result = PerfectLink::start(
            Membership::range(1, 1).unwrap(),
            Arc::new(network.endpoint(1)),
            config,
            |_m: Message| {},
        );
        assert!(matches!(result, Err(LinkError::InvalidConfig(_))));
    }
}
