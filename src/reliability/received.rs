//! Received records
//!
//! Remembers recently received application messages so retransmissions of
//! messages that were already handled are recognised.

use std::collections::HashMap;

use crate::message::{ApplicationMessage, MessageId, Securable};

/// A remembered inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedRecord {
    /// The message as first received.
    pub message: ApplicationMessage,
    /// Cycles since it was recorded.
    pub age: u32,
}

/// Time-bounded cache of received messages.
#[derive(Debug, Default)]
pub struct ReceivedCache {
    records: HashMap<MessageId, ReceivedRecord>,
}

impl ReceivedCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check a message against the cache, recording it when it is new.
    ///
    /// A message is a duplicate only when a record with the same id holds an
    /// equal message. A different message reusing a known id replaces the
    /// record and is not a duplicate.
    pub fn is_duplicate(&mut self, message: &ApplicationMessage) -> bool {
        let id = message.message_id();
        if let Some(record) = self.records.get(&id) {
            if record.message == *message {
                return true;
            }
        }
        self.records.insert(
            id,
            ReceivedRecord {
                message: message.clone(),
                age: 0,
            },
        );
        false
    }

    /// Age every record by one cycle and purge those older than `retention`.
    ///
    /// Returns the number of purged records.
    pub fn expire(&mut self, retention: u32) -> usize {
        let before = self.records.len();
        self.records.retain(|_, record| {
            record.age += 1;
            record.age <= retention
        });
        before - self.records.len()
    }

    /// Whether a record exists for the id.
    pub fn contains(&self, id: MessageId) -> bool {
        self.records.contains_key(&id)
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
