//! Pending sends
//!
//! Tracks secured messages until the peer acknowledges them and decides when
//! they are retransmitted or given up.

use std::collections::HashMap;

use super::config::ReliabilityConfig;
use crate::core::ReliabilityError;
use crate::message::{Acknowledgement, ApplicationMessage, Message, MessageId, Securable};

/// A secured message awaiting acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSend {
    /// The message exactly as first sent.
    pub message: ApplicationMessage,
    /// Cycles since the last (re)transmission.
    pub age: u32,
    /// Retransmissions made so far.
    pub retries: u32,
}

impl PendingSend {
    fn new(message: ApplicationMessage) -> Self {
        Self {
            message,
            age: 0,
            retries: 0,
        }
    }
}

/// A pending message that ran out of retransmissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LostMessage {
    /// Identity of the lost message.
    pub message_id: MessageId,
    /// Retransmissions made before giving up.
    pub retries: u32,
}

/// Work produced by one retransmission cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Retransmission {
    /// Messages to write again, in sequence order.
    pub resend: Vec<ApplicationMessage>,
    /// Messages given up on during this cycle.
    pub lost: Vec<LostMessage>,
}

/// Secured messages keyed by identity.
#[derive(Debug, Default)]
pub struct PendingSends {
    entries: HashMap<MessageId, PendingSend>,
}

impl PendingSends {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a message as pending.
    ///
    /// Returns `Ok(true)` when the message was recorded and `Ok(false)` for
    /// acknowledgements, which are never secured. Any other non-securable
    /// message is rejected.
    pub fn secure(&mut self, message: &Message) -> Result<bool, ReliabilityError> {
        match message {
            Message::Application(message) => {
                self.entries
                    .insert(message.message_id(), PendingSend::new(message.clone()));
                Ok(true)
            }
            Message::Acknowledgement(_) => Ok(false),
            other => Err(ReliabilityError::NotSecurable(other.kind())),
        }
    }

    /// Remove the entry an acknowledgement refers to.
    ///
    /// Returns whether an entry was removed. Unknown ids are ignored.
    pub fn acknowledge(&mut self, ack: &Acknowledgement) -> bool {
        self.entries.remove(&ack.acknowledging).is_some()
    }

    /// Run one retransmission cycle.
    ///
    /// An entry younger than its threshold ages by one cycle. Otherwise its
    /// age resets and its retry count grows; past `max_retries` it is removed
    /// and reported lost instead of being resent.
    pub fn tick(&mut self, config: &ReliabilityConfig) -> Retransmission {
        let mut resend = Vec::new();
        let mut lost = Vec::new();

        for (id, entry) in self.entries.iter_mut() {
            if entry.age < config.retry_threshold(entry.retries) {
                entry.age += 1;
                continue;
            }
            entry.age = 0;
            entry.retries += 1;
            if entry.retries > config.max_retries {
                lost.push(LostMessage {
                    message_id: *id,
                    retries: entry.retries - 1,
                });
            } else {
                resend.push(entry.message.clone());
            }
        }

        for gone in &lost {
            self.entries.remove(&gone.message_id);
        }
        resend.sort_by_key(|m| m.send_count());
        lost.sort_by_key(|l| l.message_id);

        Retransmission { resend, lost }
    }

    /// Entry for a message id.
    pub fn get(&self, id: MessageId) -> Option<&PendingSend> {
        self.entries.get(&id)
    }

    /// Whether a message is still awaiting acknowledgement.
    pub fn contains(&self, id: MessageId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Number of pending messages.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
