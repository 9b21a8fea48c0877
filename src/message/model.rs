//! Message variants
//!
//! Only application messages carry an identity and a sequence number and can
//! therefore be secured. Acknowledgements, relogin control messages and the
//! corruption marker travel outside the reliability layer.

use std::fmt;

use rand::Rng;

use super::secret::RecoverySecret;

/// Identity of an application message, chosen by the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(u64);

impl MessageId {
    /// Create a message id from a raw value.
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Generate a random message id.
    pub fn random() -> Self {
        Self(rand::thread_rng().r#gen())
    }

    /// Raw value.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for MessageId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Capability of messages that take part in acknowledgement, retransmission,
/// duplicate suppression and ordering.
pub trait Securable {
    /// Sender-assigned identity, stable across retransmissions.
    fn message_id(&self) -> MessageId;

    /// Sequence number stamped by the sending session.
    fn send_count(&self) -> u64;

    /// Stamp the sequence number.
    fn set_send_count(&mut self, send_count: u64);
}

/// An application message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationMessage {
    message_id: MessageId,
    send_count: u64,
    payload: Vec<u8>,
}

impl ApplicationMessage {
    /// Create a message with a random identity.
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self::with_id(MessageId::random(), payload)
    }

    /// Create a message with a caller-chosen identity.
    pub fn with_id(message_id: MessageId, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            message_id,
            send_count: 0,
            payload: payload.into(),
        }
    }

    /// Rebuild a message read from the wire.
    pub fn from_parts(message_id: MessageId, send_count: u64, payload: Vec<u8>) -> Self {
        Self {
            message_id,
            send_count,
            payload,
        }
    }

    /// Payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Take the payload.
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }
}

impl Securable for ApplicationMessage {
    fn message_id(&self) -> MessageId {
        self.message_id
    }

    fn send_count(&self) -> u64 {
        self.send_count
    }

    fn set_send_count(&mut self, send_count: u64) {
        self.send_count = send_count;
    }
}

/// Acknowledgement of one application message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acknowledgement {
    /// Identity of the acknowledged message.
    pub acknowledging: MessageId,
}

impl Acknowledgement {
    /// Acknowledge the given message.
    pub fn new(acknowledging: MessageId) -> Self {
        Self { acknowledging }
    }
}

/// Kind of relogin control message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReloginKind {
    /// Server to client: here is your recovery secret.
    SendSecret,
    /// Client to server: rebind my session, here is my secret.
    ClientReloginRequest,
    /// Server to client: your stream is broken, reconnect.
    ServerReloginRequest,
}

impl fmt::Display for ReloginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReloginKind::SendSecret => "SEND_SECRET",
            ReloginKind::ClientReloginRequest => "CLIENT_RELOGIN_REQUEST",
            ReloginKind::ServerReloginRequest => "SERVER_RELOGIN_REQUEST",
        };
        f.write_str(name)
    }
}

/// Control message of the recovery handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReloginMessage {
    /// What this message asks for.
    pub kind: ReloginKind,
    /// Secret carried by `SendSecret` and `ClientReloginRequest`.
    pub secret: Option<RecoverySecret>,
}

impl ReloginMessage {
    /// Server hands out a secret.
    pub fn send_secret(secret: RecoverySecret) -> Self {
        Self {
            kind: ReloginKind::SendSecret,
            secret: Some(secret),
        }
    }

    /// Client asks to rebind the session owning `secret`.
    pub fn client_request(secret: RecoverySecret) -> Self {
        Self {
            kind: ReloginKind::ClientReloginRequest,
            secret: Some(secret),
        }
    }

    /// Server asks the client to reconnect.
    pub fn server_request() -> Self {
        Self {
            kind: ReloginKind::ServerReloginRequest,
            secret: None,
        }
    }
}

/// Discriminant of [`Message`], used in errors and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// [`Message::Application`]
    Application,
    /// [`Message::Acknowledgement`]
    Acknowledgement,
    /// [`Message::Relogin`]
    Relogin,
    /// [`Message::Corruption`]
    Corruption,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageKind::Application => "application",
            MessageKind::Acknowledgement => "acknowledgement",
            MessageKind::Relogin => "relogin",
            MessageKind::Corruption => "corruption marker",
        };
        f.write_str(name)
    }
}

/// A message exchanged between two peers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Application payload, securable.
    Application(ApplicationMessage),
    /// Acknowledgement of an application message.
    Acknowledgement(Acknowledgement),
    /// Recovery handshake control.
    Relogin(ReloginMessage),
    /// Stands in for a corrupted stream.
    Corruption,
}

impl Message {
    /// Discriminant of this message.
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Application(_) => MessageKind::Application,
            Message::Acknowledgement(_) => MessageKind::Acknowledgement,
            Message::Relogin(_) => MessageKind::Relogin,
            Message::Corruption => MessageKind::Corruption,
        }
    }

    /// View as a securable message, if it is one.
    pub fn as_securable(&self) -> Option<&dyn Securable> {
        match self {
            Message::Application(message) => Some(message),
            _ => None,
        }
    }

    /// Mutable view as a securable message, if it is one.
    pub fn as_securable_mut(&mut self) -> Option<&mut dyn Securable> {
        match self {
            Message::Application(message) => Some(message),
            _ => None,
        }
    }
}

impl From<ApplicationMessage> for Message {
    fn from(message: ApplicationMessage) -> Self {
        Message::Application(message)
    }
}

impl From<Acknowledgement> for Message {
    fn from(ack: Acknowledgement) -> Self {
        Message::Acknowledgement(ack)
    }
}

impl From<ReloginMessage> for Message {
    fn from(message: ReloginMessage) -> Self {
        Message::Relogin(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_application_is_securable() {
        let mut app = Message::from(ApplicationMessage::with_id(MessageId::new(7), b"hi".to_vec()));
        assert!(app.as_securable().is_some());
        app.as_securable_mut().unwrap().set_send_count(3);
        assert_eq!(app.as_securable().unwrap().send_count(), 3);
        assert_eq!(app.as_securable().unwrap().message_id(), MessageId::new(7));

        let ack = Message::from(Acknowledgement::new(MessageId::new(7)));
        assert!(ack.as_securable().is_none());
        assert!(Message::from(ReloginMessage::server_request()).as_securable().is_none());
        assert!(Message::Corruption.as_securable().is_none());
    }

    #[test]
    fn test_equality_covers_identity_sequence_and_payload() {
        let a = ApplicationMessage::from_parts(MessageId::new(1), 1, b"x".to_vec());
        assert_eq!(a, a.clone());
        assert_ne!(a, ApplicationMessage::from_parts(MessageId::new(1), 2, b"x".to_vec()));
        assert_ne!(a, ApplicationMessage::from_parts(MessageId::new(1), 1, b"y".to_vec()));
        assert_ne!(a, ApplicationMessage::from_parts(MessageId::new(2), 1, b"x".to_vec()));
    }

    #[test]
    fn test_new_messages_are_unstamped() {
        let message = ApplicationMessage::new(b"payload".to_vec());
        assert_eq!(message.send_count(), 0);
        assert_eq!(message.payload(), b"payload");
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(Message::Corruption.kind(), MessageKind::Corruption);
        assert_eq!(MessageKind::Relogin.to_string(), "relogin");
        assert_eq!(ReloginKind::SendSecret.to_string(), "SEND_SECRET");
        assert_eq!(MessageId::new(0x2a).to_string(), "000000000000002a");
    }
}
