//! Best-effort broadcast
//!
//! Sends a payload over the perfect link to every other process. Deliveries
//! pass straight through from the link: the message source is the sending
//! process and the id is the link-level message id.

use crate::error::BroadcastError;
use crate::Broadcast;
use bytes::Bytes;
use std::sync::Arc;
use tracing::debug;
use urb_io::Transport;
use urb_link::{Deliver, LinkConfig, LinkError, PerfectLink};
use urb_protocol::{Membership, ProcessId};

/// Broadcast to all peers over perfect links, without agreement
pub struct BestEffortBroadcast {
    link: PerfectLink,
}

impl BestEffortBroadcast {
    /// Start the underlying link and deliver its messages to `deliver`
    pub fn start<D: Deliver>(
        membership: Membership,
        transport: Arc<dyn Transport>,
        config: LinkConfig,
        deliver: D,
    ) -> Result<Self, BroadcastError> {
        let link = PerfectLink::start(membership, transport, config, deliver)?;
        Ok(BestEffortBroadcast { link })
    }

    /// The perfect link underneath
    pub fn link(&self) -> &PerfectLink {
        &self.link
    }

    /// Send `payload` to every process except the local one
    pub fn send_to_others(&self, payload: &Bytes) -> Result<(), LinkError> {
        for peer in self.link.membership().others() {
            self.link.send(payload.clone(), peer)?;
        }
        debug!(local = self.link.local(), len = payload.len(), "payload sent to all peers");
        Ok(())
    }
}

impl Broadcast for BestEffortBroadcast {
    fn local(&self) -> ProcessId {
        self.link.local()
    }

    fn broadcast(&self, payload: Bytes) -> Result<(), BroadcastError> {
        Ok(self.send_to_others(&payload)?)
    }

    fn close(&self) -> Result<(), BroadcastError> {
        Ok(self.link.close()?)
    }
}
