//! Message ordering
//!
//! Stamps outgoing application messages with a per-session sequence number
//! and releases inbound ones to the application in sequence order.

use std::collections::BTreeMap;

use tracing::debug;

use super::config::StaleSequencePolicy;
use crate::core::FIRST_SEQUENCE;
use crate::message::{ApplicationMessage, Message, Securable};

/// Outcome of admitting one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// The message may be delivered now.
    Deliver(ApplicationMessage),
    /// The message is ahead of the stream and was parked.
    Buffered,
    /// The message is behind the stream and was discarded.
    Discarded,
}

/// Ordering state of one session.
#[derive(Debug)]
pub struct OrderBuffer {
    /// Next sequence number for outgoing messages.
    next_send: u64,
    /// Highest contiguous sequence number released inbound.
    last_received: u64,
    /// Early arrivals keyed by sequence number.
    reorder: BTreeMap<u64, ApplicationMessage>,
    stale_policy: StaleSequencePolicy,
}

impl OrderBuffer {
    /// Create an empty ordering state.
    pub fn new(stale_policy: StaleSequencePolicy) -> Self {
        Self {
            next_send: FIRST_SEQUENCE,
            last_received: FIRST_SEQUENCE - 1,
            reorder: BTreeMap::new(),
            stale_policy,
        }
    }

    /// Assign the next sequence number to a securable message.
    ///
    /// Returns the assigned number, or `None` for messages that are not
    /// securable (they pass through unstamped).
    pub fn stamp_outgoing(&mut self, message: &mut Message) -> Option<u64> {
        let securable = message.as_securable_mut()?;
        let sequence = self.next_send;
        self.next_send += 1;
        securable.set_send_count(sequence);
        Some(sequence)
    }

    /// Decide what happens to an inbound message.
    ///
    /// A buffered message replaces any earlier one parked under the same
    /// sequence number.
    pub fn admit(&mut self, message: ApplicationMessage) -> Admission {
        let sequence = message.send_count();
        if sequence == self.last_received + 1 {
            self.last_received = sequence;
            Admission::Deliver(message)
        } else if sequence <= self.last_received {
            debug!(
                message_id = %message.message_id(),
                sequence,
                last_received = self.last_received,
                "stale sequence number"
            );
            match self.stale_policy {
                StaleSequencePolicy::Deliver => Admission::Deliver(message),
                StaleSequencePolicy::Drop => Admission::Discarded,
            }
        } else {
            self.reorder.insert(sequence, message);
            Admission::Buffered
        }
    }

    /// Release the parked message that is next in sequence, if any.
    pub fn next_buffered(&mut self) -> Option<ApplicationMessage> {
        let message = self.reorder.remove(&(self.last_received + 1))?;
        self.last_received += 1;
        Some(message)
    }

    /// Admit a message and collect everything that became deliverable.
    pub fn release(&mut self, message: ApplicationMessage) -> Vec<ApplicationMessage> {
        match self.admit(message) {
            Admission::Deliver(message) => {
                let mut released = vec![message];
                while let Some(next) = self.next_buffered() {
                    released.push(next);
                }
                released
            }
            Admission::Buffered | Admission::Discarded => Vec::new(),
        }
    }

    /// Highest contiguous sequence number released so far.
    pub fn last_received(&self) -> u64 {
        self.last_received
    }

    /// Sequence number the next outgoing message will get.
    pub fn next_send(&self) -> u64 {
        self.next_send
    }

    /// Number of parked messages.
    pub fn buffered_len(&self) -> usize {
        self.reorder.len()
    }
}

impl Default for OrderBuffer {
    fn default() -> Self {
        Self::new(StaleSequencePolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Acknowledgement, MessageId, ReloginMessage};

    fn msg(id: u64, sequence: u64) -> ApplicationMessage {
        ApplicationMessage::from_parts(MessageId::new(id), sequence, id.to_le_bytes().to_vec())
    }

    fn sequences(messages: &[ApplicationMessage]) -> Vec<u64> {
        messages.iter().map(|m| m.send_count()).collect()
    }

    /// All permutations of `items` (Heap's algorithm).
    fn permutations(items: &mut Vec<u64>, k: usize, out: &mut Vec<Vec<u64>>) {
        if k <= 1 {
            out.push(items.clone());
            return;
        }
        permutations(items, k - 1, out);
        for i in 0..k - 1 {
            if k % 2 == 0 {
                items.swap(i, k - 1);
            } else {
                items.swap(0, k - 1);
            }
            permutations(items, k - 1, out);
        }
    }

    #[test]
    fn test_stamp_is_monotonic_from_one() {
        let mut order = OrderBuffer::default();
        let mut first = Message::from(ApplicationMessage::new(b"a".to_vec()));
        let mut second = Message::from(ApplicationMessage::new(b"b".to_vec()));

        assert_eq!(order.stamp_outgoing(&mut first), Some(1));
        assert_eq!(order.stamp_outgoing(&mut second), Some(2));
        assert_eq!(first.as_securable().unwrap().send_count(), 1);
        assert_eq!(order.next_send(), 3);
    }

    #[test]
    fn test_control_messages_pass_unstamped() {
        let mut order = OrderBuffer::default();
        let mut ack = Message::from(Acknowledgement::new(MessageId::new(1)));
        let mut relogin = Message::from(ReloginMessage::server_request());

        assert_eq!(order.stamp_outgoing(&mut ack), None);
        assert_eq!(order.stamp_outgoing(&mut relogin), None);
        assert_eq!(order.next_send(), FIRST_SEQUENCE);
    }

    #[test]
    fn test_out_of_order_arrival_is_released_in_order() {
        let mut order = OrderBuffer::default();

        assert_eq!(sequences(&order.release(msg(10, 1))), vec![1]);
        assert!(order.release(msg(30, 3)).is_empty());
        assert_eq!(order.buffered_len(), 1);
        assert_eq!(sequences(&order.release(msg(20, 2))), vec![2, 3]);
        assert_eq!(order.last_received(), 3);
        assert_eq!(order.buffered_len(), 0);
    }

    #[test]
    fn test_every_arrival_order_releases_in_sequence() {
        let mut all = Vec::new();
        permutations(&mut vec![1, 2, 3, 4, 5], 5, &mut all);
        assert_eq!(all.len(), 120);
        let distinct: std::collections::HashSet<_> = all.iter().cloned().collect();
        assert_eq!(distinct.len(), 120);

        for arrival in all {
            let mut order = OrderBuffer::default();
            let mut released = Vec::new();
            for sequence in &arrival {
                released.extend(order.release(msg(*sequence * 100, *sequence)));
            }
            assert_eq!(sequences(&released), vec![1, 2, 3, 4, 5], "arrival {arrival:?}");
        }
    }

    #[test]
    fn test_buffer_is_last_write_wins() {
        let mut order = OrderBuffer::default();
        let older = ApplicationMessage::from_parts(MessageId::new(1), 2, b"old".to_vec());
        let newer = ApplicationMessage::from_parts(MessageId::new(2), 2, b"new".to_vec());

        assert_eq!(order.admit(older), Admission::Buffered);
        assert_eq!(order.admit(newer.clone()), Admission::Buffered);
        let released = order.release(msg(0, 1));
        assert_eq!(released.len(), 2);
        assert_eq!(released[1], newer);
    }

    #[test]
    fn test_stale_sequence_is_delivered_by_default() {
        let mut order = OrderBuffer::default();
        order.release(msg(1, 1));
        order.release(msg(2, 2));

        let stale = msg(9, 1);
        assert_eq!(order.admit(stale.clone()), Admission::Deliver(stale));
        assert_eq!(order.last_received(), 2);
    }

    #[test]
    fn test_stale_sequence_is_dropped_when_strict() {
        let mut order = OrderBuffer::new(StaleSequencePolicy::Drop);
        order.release(msg(1, 1));

        assert_eq!(order.admit(msg(9, 1)), Admission::Discarded);
        assert!(order.release(msg(9, 0)).is_empty());
    }
}
