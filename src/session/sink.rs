//! Channel-backed deliverer.

use tokio::sync::mpsc;

use crate::core::{Deliverer, SessionEvent};
use crate::message::ApplicationMessage;

/// A [`Deliverer`] forwarding messages and events to unbounded channels.
#[derive(Debug, Clone)]
pub struct ChannelDeliverer {
    messages: mpsc::UnboundedSender<ApplicationMessage>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl ChannelDeliverer {
    /// Create a deliverer and the receiving ends of its channels.
    pub fn new() -> (
        Self,
        mpsc::UnboundedReceiver<ApplicationMessage>,
        mpsc::UnboundedReceiver<SessionEvent>,
    ) {
        let (messages, message_rx) = mpsc::unbounded_channel();
        let (events, event_rx) = mpsc::unbounded_channel();
        (Self { messages, events }, message_rx, event_rx)
    }
}

impl Deliverer for ChannelDeliverer {
    fn deliver(&self, message: ApplicationMessage) {
        let _ = self.messages.send(message);
    }

    fn report(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }
}
