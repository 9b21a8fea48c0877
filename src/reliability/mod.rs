//! Tether Protocol - Reliability Layer
//!
//! Sans-IO state machines driven by a session:
//! - Sequence stamping and in-order release of inbound messages
//! - Pending sends with acknowledgement and linear-backoff retransmission
//! - Duplicate suppression through time-bounded received records
//! - The recovery state of a session

mod channel;
mod config;
mod order;
mod pending;
mod received;
mod recovery;

pub use channel::*;
pub use config::*;
pub use order::*;
pub use pending::*;
pub use received::*;
pub use recovery::*;
