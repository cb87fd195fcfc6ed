//! Perfect link integration tests over the in-process network

use bytes::Bytes;
use crossbeam::channel::{self, Receiver};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use urb::io::{Fate, MemoryNetwork, UdpTransport};
use urb::protocol::Packet;
use urb::{LinkConfig, Membership, Message, PerfectLink, ProcessId, Transport};

const TIMEOUT: Duration = Duration::from_secs(10);

/// Poll `cond` until it holds or `timeout` passes
fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

/// Start a link for process `id` of `n` and hand back its deliveries
fn start_link(
    network: &MemoryNetwork,
    id: ProcessId,
    n: u32,
    config: LinkConfig,
) -> (PerfectLink, Receiver<Message>) {
    let (tx, rx) = channel::unbounded();
    let link = PerfectLink::start(
        Membership::range(id, n).unwrap(),
        Arc::new(network.endpoint(id)),
        config,
        move |m: Message| {
            let _ = tx.send(m);
        },
    )
    .unwrap();
    (link, rx)
}

fn is_data(datagram: &[u8]) -> bool {
    Packet::peek_id(datagram).map_or(false, |id| id != 0)
}

#[test]
fn test_lossy_retransmission() {
    // Lose the first two transmissions of every data packet from 1 to 2
    let attempts: Arc<Mutex<HashMap<Vec<u8>, u32>>> = Arc::default();
    let seen = attempts.clone();
    let network = MemoryNetwork::with_filter(move |from, _to, datagram| {
        if from != 1 || !is_data(datagram) {
            return Fate::Deliver;
        }
        let mut seen = seen.lock();
        let count = seen.entry(datagram.to_vec()).or_insert(0);
        *count += 1;
        if *count <= 2 {
            Fate::Drop
        } else {
            Fate::Deliver
        }
    });

    let (sender, _) = start_link(&network, 1, 2, LinkConfig::default());
    let (receiver, deliveries) = start_link(&network, 2, 2, LinkConfig::default());

    sender.send(Bytes::from_static(b"persistent"), 2).unwrap();

    let message = deliveries.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(message.source, 1);
    assert_eq!(&message.payload[..], b"persistent");

    assert!(wait_until(TIMEOUT, || sender.in_flight() == 0));
    let stats = sender.stats();
    assert!(stats.retransmissions >= 2);
    assert!(network.stats().dropped >= 2);
    assert!(deliveries.recv_timeout(Duration::from_millis(100)).is_err());

    sender.close().unwrap();
    receiver.close().unwrap();
}

#[test]
fn test_oversized_message_out_of_order() {
    // Lose every third data packet once so the rest overtake it
    let dropped: Arc<Mutex<HashSet<u32>>> = Arc::default();
    let once = dropped.clone();
    let network = MemoryNetwork::with_filter(move |from, _to, datagram| {
        if from != 1 || !is_data(datagram) {
            return Fate::Deliver;
        }
        let Ok(packet_id) = Packet::peek_id(datagram) else {
            return Fate::Deliver;
        };
        if packet_id % 3 == 0 && once.lock().insert(packet_id) {
            Fate::Drop
        } else {
            Fate::Deliver
        }
    });

    let config = LinkConfig {
        max_packet_size: 128,
        ..LinkConfig::default()
    };
    let payload: Bytes = (0..20_000u32).map(|i| (i % 251) as u8).collect::<Vec<_>>().into();

    let (sender, _) = start_link(&network, 1, 2, config.clone());
    let (receiver, deliveries) = start_link(&network, 2, 2, config);

    sender.send(payload.clone(), 2).unwrap();

    let message = deliveries.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(message.payload, payload);
    assert!(!dropped.lock().is_empty());

    // Exactly one delivery, no partial ones
    assert!(deliveries.recv_timeout(Duration::from_millis(200)).is_err());

    sender.close().unwrap();
    receiver.close().unwrap();
}

#[test]
fn test_at_most_once_under_duplication() {
    let network = MemoryNetwork::with_filter(|_, _, _| Fate::Duplicate);

    let (sender, _) = start_link(&network, 1, 2, LinkConfig::default());
    let (receiver, deliveries) = start_link(&network, 2, 2, LinkConfig::default());

    for i in 0..50u32 {
        sender.send(Bytes::from(i.to_string()), 2).unwrap();
    }

    let mut ids = HashSet::new();
    for _ in 0..50 {
        let message = deliveries.recv_timeout(TIMEOUT).unwrap();
        assert!(ids.insert(message.id), "message {} delivered twice", message.id);
    }
    assert!(deliveries.recv_timeout(Duration::from_millis(200)).is_err());
    assert!(receiver.stats().duplicate_packets > 0);
    assert!(wait_until(TIMEOUT, || sender.in_flight() == 0));

    sender.close().unwrap();
    receiver.close().unwrap();
}

#[test]
fn test_both_directions() {
    let network = MemoryNetwork::new();
    let (a, from_b) = start_link(&network, 1, 2, LinkConfig::default());
    let (b, from_a) = start_link(&network, 2, 2, LinkConfig::default());

    a.send(Bytes::from_static(b"ping"), 2).unwrap();
    let ping = from_a.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(&ping.payload[..], b"ping");

    b.send(Bytes::from_static(b"pong"), 1).unwrap();
    let pong = from_b.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(pong.source, 2);
    assert_eq!(&pong.payload[..], b"pong");

    a.close().unwrap();
    b.close().unwrap();
}

#[test]
fn test_udp_loopback() {
    let any: std::net::SocketAddr = "127.0.0.1:0".parse().unwrap();
    let mut first = UdpTransport::bind(any, []).unwrap();
    let mut second = UdpTransport::bind(any, []).unwrap();
    let first_addr = first.local_addr().unwrap();
    let second_addr = second.local_addr().unwrap();
    for transport in [&mut first, &mut second] {
        transport.add_peer(1, first_addr);
        transport.add_peer(2, second_addr);
    }

    let first: Arc<dyn Transport> = Arc::new(first);
    let second: Arc<dyn Transport> = Arc::new(second);

    let (tx, deliveries) = channel::unbounded();
    let sender = PerfectLink::start(
        Membership::range(1, 2).unwrap(),
        first,
        LinkConfig::default(),
        |_m: Message| {},
    )
    .unwrap();
    let receiver = PerfectLink::start(
        Membership::range(2, 2).unwrap(),
        second,
        LinkConfig::default(),
        move |m: Message| {
            let _ = tx.send(m);
        },
    )
    .unwrap();

    let big = Bytes::from(vec![0xAB; 150_000]);
    sender.send(Bytes::from_static(b"small"), 2).unwrap();
    sender.send(big.clone(), 2).unwrap();

    let mut payloads: Vec<Bytes> = (0..2)
        .map(|_| deliveries.recv_timeout(TIMEOUT).unwrap().payload)
        .collect();
    payloads.sort_by_key(|p| p.len());
    assert_eq!(&payloads[0][..], b"small");
    assert_eq!(payloads[1], big);

    sender.close().unwrap();
    receiver.close().unwrap();
}
