//! TCP transport.
//!
//! Frames are written through the write half of a split stream and read with
//! `read_exact` from the read half, each half behind its own async mutex so a
//! read worker and writers never block each other.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tracing::{debug, trace};

use super::frame;
use crate::core::{
    Connector, DEFAULT_CONNECT_TIMEOUT, DEFAULT_MAX_FRAME_SIZE, FRAME_LENGTH_SIZE, FrameError,
    Transport, TransportError, TransportResult,
};
use crate::message::Message;

struct FrameWriter {
    half: OwnedWriteHalf,
    /// Encode buffer reused between writes.
    scratch: Vec<u8>,
}

/// A [`Transport`] over one TCP connection.
pub struct TcpTransport {
    peer_addr: SocketAddr,
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<FrameWriter>,
    max_frame_size: usize,
    reset_requested: AtomicBool,
    closed: AtomicBool,
}

impl TcpTransport {
    /// Wrap an established stream.
    pub fn new(stream: TcpStream, max_frame_size: usize) -> io::Result<Self> {
        stream.set_nodelay(true)?;
        let peer_addr = stream.peer_addr()?;
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            peer_addr,
            reader: Mutex::new(read_half),
            writer: Mutex::new(FrameWriter {
                half: write_half,
                scratch: Vec::new(),
            }),
            max_frame_size,
            reset_requested: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    /// Connect to `addr`.
    pub async fn connect(addr: SocketAddr, max_frame_size: usize) -> io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Self::new(stream, max_frame_size)
    }

    /// Address of the peer.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("peer_addr", &self.peer_addr)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl Transport for TcpTransport {
    async fn send(&self, message: &Message) -> TransportResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let size = frame::body_size(message);
        if size > self.max_frame_size {
            return Err(FrameError::TooLarge {
                size,
                max: self.max_frame_size,
            }
            .into());
        }

        let mut writer = self.writer.lock().await;
        let FrameWriter { half, scratch } = &mut *writer;
        if self.reset_requested.swap(false, Ordering::AcqRel) {
            *scratch = Vec::new();
        }
        scratch.clear();
        frame::encode_frame(message, scratch)?;
        half.write_all(&scratch[..]).await.map_err(TransportError::from_io)?;
        trace!(peer = %self.peer_addr, kind = %message.kind(), bytes = scratch.len(), "frame written");
        Ok(())
    }

    async fn receive(&self) -> TransportResult<Message> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let mut reader = self.reader.lock().await;

        let mut len_buf = [0u8; FRAME_LENGTH_SIZE];
        reader
            .read_exact(&mut len_buf)
            .await
            .map_err(TransportError::from_io)?;
        let len = u32::from_le_bytes(len_buf) as usize;
        if len > self.max_frame_size {
            return Err(FrameError::TooLarge {
                size: len,
                max: self.max_frame_size,
            }
            .into());
        }

        let mut body = vec![0u8; len];
        reader
            .read_exact(&mut body)
            .await
            .map_err(TransportError::from_io)?;
        Ok(frame::decode(&body)?)
    }

    fn reset_output_state(&self) {
        self.reset_requested.store(true, Ordering::Release);
    }

    fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.half.shutdown().await {
            debug!(peer = %self.peer_addr, "shutdown failed: {e}");
        }
        debug!(peer = %self.peer_addr, "transport closed");
    }
}

/// Opens [`TcpTransport`]s to a fixed address.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: SocketAddr,
    connect_timeout: Duration,
    max_frame_size: usize,
}

impl TcpConnector {
    /// Connector for `addr` with default limits.
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Set the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the frame size limit of created transports.
    pub fn max_frame_size(mut self, max: usize) -> Self {
        self.max_frame_size = max;
        self
    }

    /// Target address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Connector for TcpConnector {
    type Transport = TcpTransport;

    async fn connect(&self) -> TransportResult<TcpTransport> {
        let connecting = TcpTransport::connect(self.addr, self.max_frame_size);
        match tokio::time::timeout(self.connect_timeout, connecting).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "connect timed out").into()),
        }
    }
}
