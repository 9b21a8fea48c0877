//! Reliable channel
//!
//! Combines ordering, pending sends and received records into the single
//! piece of mutable state a session serialises access to. The channel does
//! no I/O: it tells its caller what to write and what to deliver.

use tracing::{trace, warn};

use super::config::ReliabilityConfig;
use super::order::OrderBuffer;
use super::pending::{PendingSends, Retransmission};
use super::received::ReceivedCache;
use crate::core::ReliabilityError;
use crate::message::{Acknowledgement, ApplicationMessage, Message, MessageId, ReloginMessage, Securable};

/// What an inbound message amounts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// An acknowledgement; `known` tells whether it cleared a pending send.
    Acknowledged {
        /// Acknowledged message.
        message_id: MessageId,
        /// Whether a pending send was removed.
        known: bool,
    },

    /// An application message. The acknowledgement must be sent in every
    /// case, the deliveries in the given order.
    Application {
        /// Messages released to the application, possibly none.
        deliver: Vec<ApplicationMessage>,
        /// Acknowledgement to write back.
        ack: Acknowledgement,
        /// Whether the message had been received before.
        duplicate: bool,
    },

    /// A relogin control message for the recovery handshake.
    Control(ReloginMessage),

    /// The peer signalled a corrupted stream.
    Corrupted,
}

/// Work produced by one maintenance cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Maintenance {
    /// Retransmissions and losses.
    pub retransmission: Retransmission,
    /// Received records purged this cycle.
    pub expired: usize,
}

/// Reliability state of one session.
#[derive(Debug)]
pub struct ReliableChannel {
    config: ReliabilityConfig,
    order: OrderBuffer,
    pending: PendingSends,
    received: ReceivedCache,
}

impl ReliableChannel {
    /// Create a channel with the given parameters.
    pub fn new(config: ReliabilityConfig) -> Self {
        Self {
            order: OrderBuffer::new(config.stale_sequence_policy),
            pending: PendingSends::new(),
            received: ReceivedCache::new(),
            config,
        }
    }

    /// Stamp and secure an outgoing message.
    ///
    /// Application messages get the next sequence number and become pending;
    /// acknowledgements pass through untouched. Control messages are
    /// rejected before any sequence number is consumed.
    pub fn prepare_outgoing(&mut self, mut message: Message) -> Result<Message, ReliabilityError> {
        match message {
            Message::Application(_) => {}
            Message::Acknowledgement(_) => return Ok(message),
            Message::Relogin(_) | Message::Corruption => {
                return Err(ReliabilityError::NotSecurable(message.kind()));
            }
        }
        let sequence = self.order.stamp_outgoing(&mut message);
        self.pending.secure(&message)?;
        trace!(?sequence, pending = self.pending.len(), "secured outgoing message");
        Ok(message)
    }

    /// Account for one inbound message.
    pub fn on_receive(&mut self, message: Message) -> Inbound {
        match message {
            Message::Acknowledgement(ack) => {
                let known = self.pending.acknowledge(&ack);
                trace!(message_id = %ack.acknowledging, known, "acknowledgement");
                Inbound::Acknowledged {
                    message_id: ack.acknowledging,
                    known,
                }
            }
            Message::Application(message) => {
                let ack = Acknowledgement::new(message.message_id());
                if self.received.is_duplicate(&message) {
                    trace!(message_id = %message.message_id(), "duplicate suppressed");
                    return Inbound::Application {
                        deliver: Vec::new(),
                        ack,
                        duplicate: true,
                    };
                }
                Inbound::Application {
                    deliver: self.order.release(message),
                    ack,
                    duplicate: false,
                }
            }
            Message::Relogin(relogin) => Inbound::Control(relogin),
            Message::Corruption => Inbound::Corrupted,
        }
    }

    /// Run one maintenance cycle.
    ///
    /// With `retransmit` unset the pending sends are frozen (no ageing, no
    /// retries consumed); received records expire either way.
    pub fn tick(&mut self, retransmit: bool) -> Maintenance {
        let retransmission = if retransmit {
            self.pending.tick(&self.config)
        } else {
            Retransmission::default()
        };
        for lost in &retransmission.lost {
            warn!(message_id = %lost.message_id, retries = lost.retries, "message lost");
        }
        Maintenance {
            retransmission,
            expired: self.received.expire(self.config.retention),
        }
    }

    /// Parameters of this channel.
    pub fn config(&self) -> &ReliabilityConfig {
        &self.config
    }

    /// Ordering state.
    pub fn order(&self) -> &OrderBuffer {
        &self.order
    }

    /// Pending sends.
    pub fn pending(&self) -> &PendingSends {
        &self.pending
    }

    /// Received records.
    pub fn received(&self) -> &ReceivedCache {
        &self.received
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageKind;

    fn wire(sender: &mut ReliableChannel, id: u64, payload: &[u8]) -> Message {
        sender
            .prepare_outgoing(ApplicationMessage::with_id(MessageId::new(id), payload.to_vec()).into())
            .unwrap()
    }

    fn delivered(inbound: Inbound) -> Vec<Vec<u8>> {
        match inbound {
            Inbound::Application { deliver, .. } => {
                deliver.into_iter().map(ApplicationMessage::into_payload).collect()
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_send_ack_roundtrip() {
        let mut alice = ReliableChannel::new(ReliabilityConfig::default());
        let mut bob = ReliableChannel::new(ReliabilityConfig::default());

        let message = wire(&mut alice, 42, b"hello");
        assert!(alice.pending().contains(MessageId::new(42)));

        let inbound = bob.on_receive(message);
        let Inbound::Application { deliver, ack, duplicate } = inbound else {
            panic!("expected application");
        };
        assert!(!duplicate);
        assert_eq!(deliver.len(), 1);
        assert_eq!(ack.acknowledging, MessageId::new(42));

        assert_eq!(
            alice.on_receive(ack.into()),
            Inbound::Acknowledged {
                message_id: MessageId::new(42),
                known: true
            }
        );
        assert!(alice.pending().is_empty());
        for _ in 0..20 {
            assert!(alice.tick(true).retransmission.resend.is_empty());
        }
    }

    #[test]
    fn test_unacknowledged_message_is_resent_verbatim() {
        let mut alice = ReliableChannel::new(ReliabilityConfig::default());
        let original = wire(&mut alice, 42, b"hello");

        let mut resent = Vec::new();
        for _ in 0..6 {
            resent.extend(alice.tick(true).retransmission.resend);
        }
        assert_eq!(resent.len(), 1);
        assert_eq!(Message::from(resent.remove(0)), original);
    }

    #[test]
    fn test_duplicates_are_acked_but_not_delivered() {
        let mut alice = ReliableChannel::new(ReliabilityConfig::default());
        let mut bob = ReliableChannel::new(ReliabilityConfig::default());
        let message = wire(&mut alice, 42, b"once");

        assert_eq!(delivered(bob.on_receive(message.clone())).len(), 1);
        for _ in 0..3 {
            let inbound = bob.on_receive(message.clone());
            let Inbound::Application { deliver, ack, duplicate } = inbound else {
                panic!("expected application");
            };
            assert!(duplicate);
            assert!(deliver.is_empty());
            assert_eq!(ack.acknowledging, MessageId::new(42));
        }
    }

    #[test]
    fn test_reordered_and_repeated_stream_delivers_once_in_order() {
        let mut alice = ReliableChannel::new(ReliabilityConfig::default());
        let mut bob = ReliableChannel::new(ReliabilityConfig::default());
        let sent: Vec<Message> = (1..=4u64)
            .map(|i| wire(&mut alice, i * 11, &[i as u8]))
            .collect();

        let arrival = [3, 0, 3, 1, 0, 2, 1, 3];
        let mut payloads = Vec::new();
        for index in arrival {
            payloads.extend(delivered(bob.on_receive(sent[index].clone())));
        }
        assert_eq!(payloads, vec![vec![1], vec![2], vec![3], vec![4]]);
    }

    #[test]
    fn test_control_messages_are_not_secured() {
        let mut channel = ReliableChannel::new(ReliabilityConfig::default());
        let result = channel.prepare_outgoing(Message::Corruption);
        assert!(matches!(
            result,
            Err(ReliabilityError::NotSecurable(MessageKind::Corruption))
        ));
        assert_eq!(channel.order().next_send(), 1);

        let ack: Message = Acknowledgement::new(MessageId::new(5)).into();
        assert_eq!(channel.prepare_outgoing(ack.clone()).unwrap(), ack);
        assert!(channel.pending().is_empty());
    }

    #[test]
    fn test_frozen_pending_keeps_received_expiry() {
        let config = ReliabilityConfig {
            retention: 2,
            ..ReliabilityConfig::default()
        };
        let mut alice = ReliableChannel::new(config.clone());
        let mut bob = ReliableChannel::new(config);
        bob.on_receive(wire(&mut alice, 1, b"x"));

        let mut expired = 0;
        for _ in 0..20 {
            let cycle = alice.tick(false);
            assert!(cycle.retransmission.resend.is_empty());
            expired += bob.tick(false).expired;
        }
        assert_eq!(expired, 1);
        assert_eq!(alice.pending().get(MessageId::new(1)).unwrap().age, 0);
    }
}
