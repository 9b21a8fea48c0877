//! Wire codec for Tether messages.
//!
//! Every message travels as one length-prefixed frame:
//!
//! ```text
//! +0  Body length (4 bytes LE32)
//! +4  Kind (1 byte)
//! +5  Kind-specific fields
//! ```
//!
//! Kind-specific layouts (all integers little-endian):
//!
//! ```text
//! 0x01 Application      message id (8) | send count (8) | payload length (4) | payload
//! 0x02 Acknowledgement  acknowledged message id (8)
//! 0x03 Relogin          relogin kind (1) | secret length (2) | secret bytes
//! 0x04 Corruption       (empty)
//! ```

use crate::core::{
    ACKNOWLEDGEMENT_SIZE, APPLICATION_HEADER_SIZE, FRAME_LENGTH_SIZE, FrameError,
    KIND_ACKNOWLEDGEMENT, KIND_APPLICATION, KIND_CORRUPTION, KIND_RELOGIN, RELOGIN_CLIENT_REQUEST,
    RELOGIN_HEADER_SIZE, RELOGIN_SEND_SECRET, RELOGIN_SERVER_REQUEST,
};
use crate::message::{
    Acknowledgement, ApplicationMessage, Message, MessageId, RecoverySecret, ReloginKind,
    ReloginMessage, Securable,
};

impl ReloginKind {
    /// Wire byte of this kind.
    pub fn to_wire(self) -> u8 {
        match self {
            ReloginKind::SendSecret => RELOGIN_SEND_SECRET,
            ReloginKind::ClientReloginRequest => RELOGIN_CLIENT_REQUEST,
            ReloginKind::ServerReloginRequest => RELOGIN_SERVER_REQUEST,
        }
    }

    /// Parse a wire byte.
    pub fn from_wire(byte: u8) -> Result<Self, FrameError> {
        match byte {
            RELOGIN_SEND_SECRET => Ok(ReloginKind::SendSecret),
            RELOGIN_CLIENT_REQUEST => Ok(ReloginKind::ClientReloginRequest),
            RELOGIN_SERVER_REQUEST => Ok(ReloginKind::ServerReloginRequest),
            other => Err(FrameError::UnknownReloginKind(other)),
        }
    }
}

/// Encoded body size of a message (without the length prefix).
pub fn body_size(message: &Message) -> usize {
    match message {
        Message::Application(app) => APPLICATION_HEADER_SIZE + app.payload().len(),
        Message::Acknowledgement(_) => ACKNOWLEDGEMENT_SIZE,
        Message::Relogin(relogin) => {
            RELOGIN_HEADER_SIZE + relogin.secret.as_ref().map_or(0, |s| s.as_bytes().len())
        }
        Message::Corruption => 1,
    }
}

/// Encode a message body (without the length prefix).
pub fn encode(message: &Message) -> Result<Vec<u8>, FrameError> {
    let mut buf = Vec::with_capacity(body_size(message));
    encode_body(message, &mut buf)?;
    Ok(buf)
}

/// Append a complete length-prefixed frame to `buf`.
///
/// Fails with [`FrameError::TooLarge`] when the body does not fit the
/// 32-bit length prefix; `buf` is left untouched in that case.
pub fn encode_frame(message: &Message, buf: &mut Vec<u8>) -> Result<(), FrameError> {
    let size = body_size(message);
    let prefix = length_field(size)?;
    buf.reserve(FRAME_LENGTH_SIZE + size);
    buf.extend_from_slice(&prefix.to_le_bytes());
    encode_body(message, buf)
}

/// A length as written on the wire.
fn length_field(len: usize) -> Result<u32, FrameError> {
    u32::try_from(len).map_err(|_| FrameError::TooLarge {
        size: len,
        max: u32::MAX as usize,
    })
}

fn encode_body(message: &Message, buf: &mut Vec<u8>) -> Result<(), FrameError> {
    match message {
        Message::Application(app) => {
            let payload_len = length_field(app.payload().len())?;
            buf.push(KIND_APPLICATION);
            buf.extend_from_slice(&app.message_id().get().to_le_bytes());
            buf.extend_from_slice(&app.send_count().to_le_bytes());
            buf.extend_from_slice(&payload_len.to_le_bytes());
            buf.extend_from_slice(app.payload());
        }
        Message::Acknowledgement(ack) => {
            buf.push(KIND_ACKNOWLEDGEMENT);
            buf.extend_from_slice(&ack.acknowledging.get().to_le_bytes());
        }
        Message::Relogin(relogin) => {
            buf.push(KIND_RELOGIN);
            buf.push(relogin.kind.to_wire());
            let secret = relogin.secret.as_ref().map_or(&[][..], |s| s.as_bytes());
            buf.extend_from_slice(&(secret.len() as u16).to_le_bytes());
            buf.extend_from_slice(secret);
        }
        Message::Corruption => buf.push(KIND_CORRUPTION),
    }
    Ok(())
}

/// Decode one frame body.
pub fn decode(body: &[u8]) -> Result<Message, FrameError> {
    let mut reader = Reader::new(body);
    let message = match reader.u8()? {
        KIND_APPLICATION => {
            let id = MessageId::new(reader.u64()?);
            let send_count = reader.u64()?;
            let len = reader.u32()? as usize;
            let payload = reader.bytes(len)?.to_vec();
            Message::Application(ApplicationMessage::from_parts(id, send_count, payload))
        }
        KIND_ACKNOWLEDGEMENT => {
            Message::Acknowledgement(Acknowledgement::new(MessageId::new(reader.u64()?)))
        }
        KIND_RELOGIN => {
            let kind = ReloginKind::from_wire(reader.u8()?)?;
            let len = reader.u16()? as usize;
            let secret = match len {
                0 => None,
                _ => Some(RecoverySecret::from_bytes(reader.bytes(len)?)?),
            };
            Message::Relogin(ReloginMessage { kind, secret })
        }
        KIND_CORRUPTION => Message::Corruption,
        other => return Err(FrameError::UnknownKind(other)),
    };
    reader.finish()?;
    Ok(message)
}

/// Bounds-checked little-endian reader over a frame body.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8], FrameError> {
        let end = self.pos.checked_add(len).filter(|end| *end <= self.data.len());
        let Some(end) = end else {
            return Err(FrameError::TooShort {
                expected: self.pos.saturating_add(len),
                actual: self.data.len(),
            });
        };
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], FrameError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, FrameError> {
        Ok(self.array::<1>()?[0])
    }

    fn u16(&mut self) -> Result<u16, FrameError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32, FrameError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn u64(&mut self) -> Result<u64, FrameError> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    fn finish(self) -> Result<(), FrameError> {
        match self.data.len() - self.pos {
            0 => Ok(()),
            extra => Err(FrameError::TrailingBytes(extra)),
        }
    }
}
