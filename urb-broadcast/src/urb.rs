//! Uniform reliable broadcast
//!
//! Every broadcast message is keyed by (message id, original source). A
//! process tracks, per key, the set of processes known to hold the message:
//!
//! - broadcasting a message starts it pending with just the local process
//! - the first receipt starts it pending with {local, relayer, source} and
//!   relays it to every other process
//! - every later receipt adds the relayer
//! - once more than half of the processes hold it, the message is delivered
//!   and its entry dropped for good
//!
//! The local process keeps at most `own_batch_size` of its own broadcasts
//! pending; further payloads wait in FIFO order until one is delivered.
//!
//! On the link, each broadcast payload carries an 8-byte header identifying
//! the original broadcast:
//!
//! ```text
//! message id (4B) | original source id (4B) | payload
//! ```

use crate::beb::BestEffortBroadcast;
use crate::config::BroadcastConfig;
use crate::error::BroadcastError;
use crate::Broadcast;
use bytes::{Bytes, BytesMut};
use crossbeam::channel::{self, Receiver, Sender};
use crossbeam::select;
use parking_lot::Mutex;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, trace, warn};
use urb_io::Transport;
use urb_link::{Deliver, PerfectLink};
use urb_protocol::codec;
use urb_protocol::{DeliveredTracker, Membership, Message, MessageId, ProcessId, WireError};

/// Size of the broadcast header prepended to every payload on the link
pub const URB_HEADER_LEN: usize = 8;

/// Prefix `message.payload` with the broadcast header
pub fn encode_broadcast(message: &Message) -> Bytes {
    let mut buf = BytesMut::with_capacity(URB_HEADER_LEN + message.payload.len());
    codec::put_int(&mut buf, message.id);
    codec::put_int(&mut buf, message.source);
    buf.extend_from_slice(&message.payload);
    buf.freeze()
}

/// Split a link payload into the broadcast it carries
pub fn decode_broadcast(mut bytes: Bytes) -> Result<Message, WireError> {
    let id = codec::get_int(&mut bytes, "broadcast id")?;
    let source = codec::get_int(&mut bytes, "broadcast source")?;
    Ok(Message::new(id, source, bytes))
}

/// What the caller must do after a state transition
#[derive(Debug, Default)]
pub struct Effects {
    /// Broadcasts to send to every other process (own sends and relays)
    pub outgoing: Vec<Message>,
    /// Broadcasts now delivered, in delivery order
    pub deliveries: Vec<Message>,
}

impl Effects {
    /// Check if nothing needs to be done
    pub fn is_empty(&self) -> bool {
        self.outgoing.is_empty() && self.deliveries.is_empty()
    }
}

#[derive(Debug)]
struct Pending {
    payload: Bytes,
    acks: HashSet<ProcessId>,
    own: bool,
}

/// Quorum bookkeeping of uniform reliable broadcast, free of any I/O
#[derive(Debug)]
pub struct UrbState {
    membership: Membership,
    own_batch_size: usize,
    pending: HashMap<(MessageId, ProcessId), Pending>,
    /// Delivered keys, tracked as (source, message id)
    delivered: DeliveredTracker,
    waiting: VecDeque<Bytes>,
    own_pending: usize,
    next_id: MessageId,
}

impl UrbState {
    /// Create the state for the local process of `membership`
    pub fn new(membership: Membership, own_batch_size: usize) -> Self {
        UrbState {
            membership,
            own_batch_size: own_batch_size.max(1),
            pending: HashMap::new(),
            delivered: DeliveredTracker::new(),
            waiting: VecDeque::new(),
            own_pending: 0,
            next_id: 1,
        }
    }

    #[inline]
    fn local(&self) -> ProcessId {
        self.membership.local()
    }

    /// Broadcast a payload, or queue it if too many own broadcasts are pending
    pub fn broadcast(&mut self, payload: Bytes) -> Effects {
        let mut effects = Effects::default();
        self.waiting.push_back(payload);
        self.admit(&mut effects);
        effects
    }

    /// Apply a receipt of broadcast (`message_id`, `source`) relayed by `relayer`
    pub fn receive(
        &mut self,
        relayer: ProcessId,
        message_id: MessageId,
        source: ProcessId,
        payload: Bytes,
    ) -> Effects {
        let mut effects = Effects::default();
        let key = (message_id, source);

        if self.delivered.contains(source, message_id) {
            trace!(message_id, source, relayer, "ack for delivered broadcast ignored");
            return effects;
        }

        let local = self.local();
        match self.pending.entry(key) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().acks.insert(relayer);
            }
            Entry::Vacant(entry) => {
                let acks: HashSet<_> = [local, relayer, source].into_iter().collect();
                entry.insert(Pending {
                    payload: payload.clone(),
                    acks,
                    own: false,
                });
                effects
                    .outgoing
                    .push(Message::new(message_id, source, payload));
            }
        }

        if self.try_deliver(key, &mut effects) {
            self.admit(&mut effects);
        }
        effects
    }

    /// Start as many waiting own broadcasts as the batch limit allows
    fn admit(&mut self, effects: &mut Effects) {
        while self.own_pending < self.own_batch_size {
            let Some(payload) = self.waiting.pop_front() else {
                break;
            };
            self.start_own(payload, effects);
        }
    }

    fn start_own(&mut self, payload: Bytes, effects: &mut Effects) {
        let local = self.local();
        let message_id = self.next_id;
        self.next_id += 1;

        let key = (message_id, local);
        self.pending.insert(
            key,
            Pending {
                payload: payload.clone(),
                acks: HashSet::from([local]),
                own: true,
            },
        );
        self.own_pending += 1;
        effects
            .outgoing
            .push(Message::new(message_id, local, payload));

        // A single-process membership is its own majority
        self.try_deliver(key, effects);
    }

    /// Deliver `key` if it reached a majority; returns true if an own broadcast completed
    fn try_deliver(&mut self, key: (MessageId, ProcessId), effects: &mut Effects) -> bool {
        let reached = self
            .pending
            .get(&key)
            .map_or(false, |p| self.membership.has_quorum(p.acks.len()));
        if !reached {
            return false;
        }

        let Some(pending) = self.pending.remove(&key) else {
            return false;
        };
        let (message_id, source) = key;
        self.delivered.insert(source, message_id);
        effects
            .deliveries
            .push(Message::new(message_id, source, pending.payload));

        if pending.own {
            self.own_pending -= 1;
        }
        pending.own
    }

    /// Check if a broadcast was delivered
    pub fn is_delivered(&self, message_id: MessageId, source: ProcessId) -> bool {
        self.delivered.contains(source, message_id)
    }

    /// Number of processes known to hold a pending broadcast
    pub fn acks(&self, message_id: MessageId, source: ProcessId) -> Option<usize> {
        self.pending
            .get(&(message_id, source))
            .map(|p| p.acks.len())
    }

    /// Broadcasts awaiting a majority (own and relayed)
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Own broadcasts awaiting a majority
    pub fn own_pending(&self) -> usize {
        self.own_pending
    }

    /// Own payloads not yet broadcast
    pub fn waiting(&self) -> usize {
        self.waiting.len()
    }

    /// Id the next own broadcast will get
    pub fn next_id(&self) -> MessageId {
        self.next_id
    }
}

struct UrbCore {
    state: Mutex<UrbState>,
    beb: BestEffortBroadcast,
    deliver: Box<dyn Deliver>,
    running: AtomicBool,
}

impl UrbCore {
    fn local(&self) -> ProcessId {
        self.beb.link().local()
    }

    /// Carry out a transition's effects outside the state lock
    fn apply(&self, effects: Effects) {
        for message in effects.outgoing {
            if let Err(e) = self.beb.send_to_others(&encode_broadcast(&message)) {
                debug!(
                    local = self.local(),
                    message_id = message.id,
                    source = message.source,
                    error = %e,
                    "broadcast send dropped"
                );
            }
        }

        for message in effects.deliveries {
            trace!(
                local = self.local(),
                message_id = message.id,
                source = message.source,
                "broadcast delivered"
            );
            self.deliver.deliver(message);
        }
    }

    fn on_link_delivery(&self, message: Message) {
        let relayer = message.source;
        let broadcast = match decode_broadcast(message.payload) {
            Ok(broadcast) => broadcast,
            Err(e) => {
                error!(local = self.local(), relayer, error = %e, "malformed broadcast dropped");
                return;
            }
        };

        let effects =
            self.state
                .lock()
                .receive(relayer, broadcast.id, broadcast.source, broadcast.payload);
        self.apply(effects);
    }
}

fn run_worker(core: Arc<UrbCore>, inbox: Receiver<Message>, stop: Receiver<()>) {
    loop {
        select! {
            recv(inbox) -> message => match message {
                Ok(message) => core.on_link_delivery(message),
                Err(_) => break,
            },
            recv(stop) -> _ => break,
        }
    }
    debug!(local = core.local(), "broadcast worker exited");
}

/// Uniform reliable broadcast over perfect links
pub struct UniformBroadcast {
    core: Arc<UrbCore>,
    stop: Mutex<Option<Sender<()>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl UniformBroadcast {
    /// Start the broadcast stack for the local process of `membership`
    ///
    /// `deliver` is called exactly once per broadcast that reaches a majority.
    pub fn start<D: Deliver>(
        membership: Membership,
        transport: Arc<dyn Transport>,
        config: BroadcastConfig,
        deliver: D,
    ) -> Result<Self, BroadcastError> {
        config.validate()?;

        let local = membership.local();
        let (inbox_tx, inbox_rx) = channel::unbounded();
        let beb = BestEffortBroadcast::start(
            membership.clone(),
            transport,
            config.link,
            move |message: Message| {
                let _ = inbox_tx.send(message);
            },
        )?;

        let core = Arc::new(UrbCore {
            state: Mutex::new(UrbState::new(membership, config.own_batch_size)),
            beb,
            deliver: Box::new(deliver),
            running: AtomicBool::new(true),
        });

        let (stop_tx, stop_rx) = channel::bounded(0);
        let worker_core = core.clone();
        let worker = thread::Builder::new()
            .name(format!("urb-{}-deliver", local))
            .spawn(move || run_worker(worker_core, inbox_rx, stop_rx))?;

        info!(local, own_batch_size = config.own_batch_size, "uniform broadcast started");

        Ok(UniformBroadcast {
            core,
            stop: Mutex::new(Some(stop_tx)),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// The perfect link underneath
    pub fn link(&self) -> &PerfectLink {
        self.core.beb.link()
    }

    /// Broadcasts awaiting a majority
    pub fn pending(&self) -> usize {
        self.core.state.lock().pending()
    }

    /// Own payloads queued behind the batch limit
    pub fn waiting(&self) -> usize {
        self.core.state.lock().waiting()
    }
}

impl Broadcast for UniformBroadcast {
    fn local(&self) -> ProcessId {
        self.core.local()
    }

    fn broadcast(&self, payload: Bytes) -> Result<(), BroadcastError> {
        if !self.core.running.load(Ordering::Acquire) {
            return Err(BroadcastError::Closed);
        }

        let effects = self.core.state.lock().broadcast(payload);
        self.core.apply(effects);
        Ok(())
    }

    fn close(&self) -> Result<(), BroadcastError> {
        self.core.running.store(false, Ordering::Release);
        let result = self.core.beb.close();

        self.stop.lock().take();
        if let Some(worker) = self.worker.lock().take() {
            if worker.thread().id() != thread::current().id() && worker.join().is_err() {
                warn!(local = self.local(), "broadcast worker panicked");
            }
        }

        result
    }
}

impl Drop for UniformBroadcast {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!(error = %e, "uniform broadcast stopped with an error");
        }
    }
}
