//! Error types for the Tether protocol.

use std::io;

use thiserror::Error;

use crate::message::MessageKind;
use crate::reliability::RecoveryState;

/// Errors that can occur when decoding a frame body.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Body ended before all fields were read.
    #[error("frame too short: expected {expected} bytes, got {actual}")]
    TooShort {
        /// Bytes needed.
        expected: usize,
        /// Bytes available.
        actual: usize,
    },

    /// Declared frame length is above the configured limit.
    #[error("frame of {size} bytes exceeds maximum of {max}")]
    TooLarge {
        /// Declared body size.
        size: usize,
        /// Configured limit.
        max: usize,
    },

    /// Unknown message kind byte.
    #[error("unknown message kind 0x{0:02x}")]
    UnknownKind(u8),

    /// Unknown relogin control kind byte.
    #[error("unknown relogin kind 0x{0:02x}")]
    UnknownReloginKind(u8),

    /// Secret bytes are not a valid recovery secret.
    #[error("invalid recovery secret encoding")]
    InvalidSecret,

    /// Bytes left over after the message was decoded.
    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),
}

/// Errors surfaced by a transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The byte stream can no longer be decoded.
    #[error("stream corrupted: {0}")]
    Corrupted(#[from] FrameError),

    /// The peer closed the stream or the transport was closed locally.
    #[error("transport closed")]
    Closed,

    /// Any other I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    /// Classify an error raised while reading from or writing to a stream.
    ///
    /// End-of-stream and connection teardown become [`TransportError::Closed`].
    pub fn from_io(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected => TransportError::Closed,
            _ => TransportError::Io(err),
        }
    }

    /// Whether the stream became undecodable.
    pub fn is_corrupted(&self) -> bool {
        matches!(self, TransportError::Corrupted(_))
    }

    /// Whether the stream is gone.
    pub fn is_closed(&self) -> bool {
        matches!(self, TransportError::Closed)
    }
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Errors of the reliability layer and its sessions.
#[derive(Debug, Error)]
pub enum ReliabilityError {
    /// Only application messages can be secured.
    #[error("{0} messages cannot be secured")]
    NotSecurable(MessageKind),

    /// The session has been torn down.
    #[error("session closed")]
    SessionClosed,

    /// The peer refused the relogin request.
    #[error("relogin rejected by peer")]
    RecoveryRejected,

    /// Recovery needs a secret the session never received.
    #[error("no recovery secret known for this session")]
    NoRecoverySecret,

    /// A recovery transition was requested from the wrong state.
    #[error("invalid recovery transition from {0}")]
    InvalidRecoveryState(RecoveryState),

    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_errors_classified_for_both_directions() {
        for kind in [
            io::ErrorKind::UnexpectedEof,
            io::ErrorKind::BrokenPipe,
            io::ErrorKind::ConnectionReset,
        ] {
            assert!(TransportError::from_io(io::Error::from(kind)).is_closed());
        }
        let other = TransportError::from_io(io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(matches!(other, TransportError::Io(_)));
    }
}
