//! Core traits for the Tether protocol.
//!
//! These traits are the seams between the reliability layer, the byte
//! transport underneath it and the application above it.

use std::future::Future;

use super::error::TransportResult;
use crate::message::{ApplicationMessage, Message, MessageId};

/// A bidirectional, message-framed stream to one peer.
///
/// Implementations must be safe to share between a read worker and any
/// number of writers. Writes issued through `send` must not interleave.
///
/// # Example
///
/// ```ignore
/// struct Loopback { queue: tokio::sync::Mutex<VecDeque<Message>> }
///
/// impl Transport for Loopback {
///     async fn send(&self, message: &Message) -> TransportResult<()> {
///         self.queue.lock().await.push_back(message.clone());
///         Ok(())
///     }
///
///     async fn receive(&self) -> TransportResult<Message> {
///         self.queue.lock().await.pop_front().ok_or(TransportError::Closed)
///     }
///
///     fn reset_output_state(&self) {}
///
///     async fn close(&self) {}
/// }
/// ```
pub trait Transport: Send + Sync + 'static {
    /// Write one message to the peer.
    fn send(&self, message: &Message) -> impl Future<Output = TransportResult<()>> + Send;

    /// Wait for the next message from the peer.
    ///
    /// Fails with `Corrupted` when the stream cannot be decoded any more and
    /// with `Closed` when the peer went away.
    fn receive(&self) -> impl Future<Output = TransportResult<Message>> + Send;

    /// Drop any cached output encoding state.
    ///
    /// Called before a retransmission so the message is written out in full
    /// rather than as a back-reference to an earlier write.
    fn reset_output_state(&self);

    /// Largest frame body this transport will write.
    ///
    /// Sessions refuse to secure messages above this size.
    fn max_frame_size(&self) -> usize {
        usize::MAX
    }

    /// Close the transport. Pending and future reads observe `Closed`.
    fn close(&self) -> impl Future<Output = ()> + Send;
}

/// Opens fresh transports to a fixed endpoint.
///
/// Used by the client side of session recovery.
pub trait Connector: Send + Sync + 'static {
    /// Transport produced by this connector.
    type Transport: Transport;

    /// Open a new transport to the same endpoint.
    fn connect(&self) -> impl Future<Output = TransportResult<Self::Transport>> + Send;
}

/// Why a transport stopped being usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportFailure {
    /// Inbound bytes could not be decoded, or a corruption marker arrived.
    Corrupted,
    /// The stream was closed.
    Closed,
    /// Another I/O error.
    Io,
    /// The server asked the client to reconnect.
    ServerRequest,
}

/// Lifecycle notifications emitted by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A pending message exhausted its retransmissions.
    MessageLost {
        /// Identity of the lost message.
        message_id: MessageId,
        /// Retransmissions made before giving up.
        retries: u32,
    },

    /// The peer handed over a recovery secret.
    SecretReceived,

    /// The transport failed.
    TransportLost(TransportFailure),

    /// The session entered recovery.
    RecoveryStarted,

    /// The session was rebound to a new transport.
    Recovered,

    /// Recovery failed or timed out; the session is gone for good.
    Abandoned,

    /// The session was torn down.
    Closed,
}

/// Receives the in-order, duplicate-free application stream of a session.
pub trait Deliverer: Send + Sync + 'static {
    /// Hand one application message to the application.
    ///
    /// Called from the session's read worker, in sequence order, while the
    /// session's delivery lock is held. Must not block.
    fn deliver(&self, message: ApplicationMessage);

    /// Observe a session lifecycle event.
    fn report(&self, event: SessionEvent) {
        let _ = event;
    }
}
