//! Tether Protocol - Transport Layer
//!
//! Message-framed byte streams underneath a session:
//!
//! - **Wire codec**: length-prefixed frames, see [`frame`]
//! - **TCP**: [`TcpTransport`] and [`TcpConnector`]
//! - **In-memory**: [`MemoryTransport`] pairs and [`MemoryConnector`]
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        Application (Deliverer)          │
//! ├─────────────────────────────────────────┤
//! │   Session: acks, retransmission,        │
//! │   duplicates, ordering, recovery        │
//! ├─────────────────────────────────────────┤
//! │         Transport Layer                 │  ← This module
//! │   frames, TCP, in-memory pairs          │
//! ├─────────────────────────────────────────┤
//! │              TCP                        │
//! └─────────────────────────────────────────┘
//! ```

pub mod frame;
mod memory;
mod tcp;

pub use memory::*;
pub use tcp::*;
