//! Delivery to the layer above

use urb_protocol::Message;

/// Receives each distinct message exactly once
///
/// Called from the link's receive thread; implementations should hand the
/// message off quickly rather than block.
pub trait Deliver: Send + Sync + 'static {
    fn deliver(&self, message: Message);
}

impl<F> Deliver for F
where
    F: Fn(Message) + Send + Sync + 'static,
{
    fn deliver(&self, message: Message) {
        self(message)
    }
}
