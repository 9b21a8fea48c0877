//! Reliability configuration.

use std::time::Duration;

use crate::core::{
    DEFAULT_BASE_INTERVAL, DEFAULT_INCREASE_AFTER, DEFAULT_MAX_RETRIES, DEFAULT_RETENTION,
    DEFAULT_TICK_INTERVAL,
};

/// What to do with an inbound message whose sequence number was already
/// passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StaleSequencePolicy {
    /// Deliver it immediately (legacy, permissive).
    #[default]
    Deliver,
    /// Acknowledge it but do not deliver it.
    Drop,
}

/// Timing and retry parameters of the reliability layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReliabilityConfig {
    /// Interval between two maintenance cycles.
    pub tick_interval: Duration,

    /// Cycles before the first retransmission.
    pub base_interval: u32,

    /// Retransmissions after which the interval grows.
    pub increase_after: u32,

    /// Retransmissions before a message is declared lost.
    pub max_retries: u32,

    /// Cycles a received record is kept.
    pub retention: u32,

    /// Handling of inbound messages with an already passed sequence number.
    pub stale_sequence_policy: StaleSequencePolicy,
}

impl ReliabilityConfig {
    /// Age (in cycles) a pending message must reach before it is resent,
    /// given how often it was already resent.
    ///
    /// Constant at `base_interval` for the first `increase_after`
    /// retransmissions, then growing by `base_interval` per retransmission.
    pub fn retry_threshold(&self, retries: u32) -> u32 {
        let extra = retries.saturating_sub(self.increase_after);
        self.base_interval
            .saturating_add(extra.saturating_mul(self.base_interval))
    }
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            base_interval: DEFAULT_BASE_INTERVAL,
            increase_after: DEFAULT_INCREASE_AFTER,
            max_retries: DEFAULT_MAX_RETRIES,
            retention: DEFAULT_RETENTION,
            stale_sequence_policy: StaleSequencePolicy::default(),
        }
    }
}
