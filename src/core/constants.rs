//! Protocol constants and defaults.
//!
//! Cycle-based values are counted in maintenance ticks. With the default
//! tick interval one tick is one second.

use std::time::Duration;

// =============================================================================
// RELIABILITY DEFAULTS
// =============================================================================

/// Interval between two maintenance cycles.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Cycles before the first retransmission of an unacknowledged message.
pub const DEFAULT_BASE_INTERVAL: u32 = 5;

/// Retransmissions after which the interval starts growing linearly.
pub const DEFAULT_INCREASE_AFTER: u32 = 5;

/// Retransmissions after which a pending message is declared lost.
pub const DEFAULT_MAX_RETRIES: u32 = 20;

/// Cycles a received-message record is kept for duplicate detection.
pub const DEFAULT_RETENTION: u32 = 60;

/// Sequence number assigned to the first outgoing application message.
pub const FIRST_SEQUENCE: u64 = 1;

// =============================================================================
// SESSION RECOVERY
// =============================================================================

/// Number of characters in a recovery secret.
pub const SECRET_LENGTH: usize = 25;

/// How long a session may stay in recovery before it is abandoned.
pub const DEFAULT_RECOVERY_TIMEOUT: Duration = Duration::from_secs(300);

/// Stabilisation wait between reconnecting and sending the relogin request.
pub const DEFAULT_RELOGIN_DELAY: Duration = Duration::from_millis(500);

/// Time allowed for the server to answer a relogin request.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Reconnect attempts made before recovery gives up.
pub const DEFAULT_RECONNECT_ATTEMPTS: u32 = 3;

/// Pause between two reconnect attempts.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);

// =============================================================================
// CONNECTIONS
// =============================================================================

/// Port the server listens on unless configured otherwise.
pub const DEFAULT_PORT: u16 = 7331;

/// Pause after a failed accept before listening again.
pub const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Time a fresh connection has to send its first message.
pub const DEFAULT_LOGIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Time allowed for establishing a TCP connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum number of concurrent server sessions.
pub const DEFAULT_MAX_SESSIONS: usize = 1000;

// =============================================================================
// WIRE FORMAT
// =============================================================================

/// Size of the little-endian length prefix in front of every frame.
pub const FRAME_LENGTH_SIZE: usize = 4;

/// Largest frame body accepted from a peer (16 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Application message carrying a payload.
pub const KIND_APPLICATION: u8 = 0x01;

/// Acknowledgement of an application message.
pub const KIND_ACKNOWLEDGEMENT: u8 = 0x02;

/// Relogin control message.
pub const KIND_RELOGIN: u8 = 0x03;

/// Marker standing in for a corrupted stream.
pub const KIND_CORRUPTION: u8 = 0x04;

/// Server hands the client its (new) recovery secret.
pub const RELOGIN_SEND_SECRET: u8 = 0x01;

/// Client asks to rebind its session on a new transport.
pub const RELOGIN_CLIENT_REQUEST: u8 = 0x02;

/// Server asks the client to reconnect.
pub const RELOGIN_SERVER_REQUEST: u8 = 0x03;

/// Application header size (kind + message id + send count + payload length).
pub const APPLICATION_HEADER_SIZE: usize = 1 + 8 + 8 + 4;

/// Acknowledgement size (kind + message id).
pub const ACKNOWLEDGEMENT_SIZE: usize = 1 + 8;

/// Relogin header size (kind + relogin kind + secret length).
pub const RELOGIN_HEADER_SIZE: usize = 1 + 1 + 2;
