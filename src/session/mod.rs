//! Tether Protocol - Sessions
//!
//! A session binds a [`ReliableChannel`](crate::reliability::ReliableChannel)
//! to a replaceable transport and runs its read worker and maintenance cycle.
//! Recovery rebinds a session to a new transport without losing pending
//! sends, received records or sequence state.

mod relogin;
#[allow(clippy::module_inception)]
mod session;
mod sink;

pub use relogin::*;
pub use session::*;
pub use sink::*;
