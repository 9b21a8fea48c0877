//! # Tether Protocol
//!
//! Tether is an acknowledged message session layer over TCP. A TCP stream
//! can break or be corrupted mid-conversation; Tether keeps the logical
//! session alive across such failures. It provides:
//!
//! - **Acknowledgements**: every application message is acknowledged and
//!   retransmitted with linear backoff until it is, or reported lost
//! - **Duplicate suppression**: retransmitted copies are acknowledged again
//!   but delivered once
//! - **Ordering**: messages reach the application in sending order
//! - **Session recovery**: a client reconnects with a single-use recovery
//!   secret and the session resumes on the new connection without losing
//!   pending messages or sequence state
//!
//! ## Feature Flags
//!
//! - `transport` (default): Wire codec, TCP and in-memory transports, sessions
//! - `client` (default): High-level client API
//! - `server` (default): High-level server API
//!
//! ## Modules
//!
//! - [`core`]: Core traits, constants, and error types (always included)
//! - [`message`]: Message model and recovery secrets (always included)
//! - [`reliability`]: Sans-IO reliability state machines (always included)
//! - [`transport`]: Transport layer (requires `transport` feature)
//! - [`session`]: Session runtime and relogin (requires `transport` feature)
//!
//! ## Example Usage
//!
//! The reliability layer can be driven without any I/O:
//!
//! ```rust
//! use tether_protocol::prelude::*;
//!
//! let mut alice = ReliableChannel::new(ReliabilityConfig::default());
//! let mut bob = ReliableChannel::new(ReliabilityConfig::default());
//!
//! let outgoing = alice
//!     .prepare_outgoing(ApplicationMessage::new(b"hello".to_vec()).into())
//!     .unwrap();
//! assert_eq!(alice.pending().len(), 1);
//!
//! let Inbound::Application { deliver, ack, .. } = bob.on_receive(outgoing.clone()) else {
//!     unreachable!()
//! };
//! assert_eq!(deliver[0].payload(), b"hello");
//!
//! // A retransmitted copy is acknowledged again but not delivered twice.
//! let Inbound::Application { deliver, duplicate, .. } = bob.on_receive(outgoing) else {
//!     unreachable!()
//! };
//! assert!(duplicate && deliver.is_empty());
//!
//! alice.on_receive(ack.into());
//! assert!(alice.pending().is_empty());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Core module (always included)
pub mod core;

// Message model (always included)
pub mod message;

// Reliability state machines (always included)
pub mod reliability;

// Transport layer (feature-gated)
#[cfg(feature = "transport")]
#[cfg_attr(docsrs, doc(cfg(feature = "transport")))]
pub mod transport;

// Session runtime (feature-gated)
#[cfg(feature = "transport")]
#[cfg_attr(docsrs, doc(cfg(feature = "transport")))]
pub mod session;

// Client API (feature-gated)
#[cfg(feature = "client")]
#[cfg_attr(docsrs, doc(cfg(feature = "client")))]
pub mod client;

// Server API (feature-gated)
#[cfg(feature = "server")]
#[cfg_attr(docsrs, doc(cfg(feature = "server")))]
pub mod server;

/// Prelude module for convenient imports.
pub mod prelude {
    // Core traits and types
    pub use crate::core::*;

    // Messages and reliability state
    pub use crate::message::*;
    pub use crate::reliability::*;

    // Transports and sessions (when enabled)
    #[cfg(feature = "transport")]
    pub use crate::session::*;
    #[cfg(feature = "transport")]
    pub use crate::transport::{MemoryConnector, MemoryTransport, TcpConnector, TcpTransport};

    #[cfg(feature = "client")]
    pub use crate::client::{ClientConfig, ClientEvent, TetherClient, TetherClientBuilder};

    #[cfg(feature = "server")]
    pub use crate::server::{
        GroupId, ServerConfig, ServerEvent, TetherServer, TetherServerBuilder,
    };
}

// Re-export commonly used items at crate root
pub use crate::core::{ReliabilityError, TransportError};
pub use crate::message::{ApplicationMessage, Message, MessageId, RecoverySecret};

#[cfg(feature = "transport")]
pub use crate::session::{Session, SessionConfig, SessionId};
