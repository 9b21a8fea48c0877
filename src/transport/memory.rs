//! In-process transport.
//!
//! Two connected ends backed by unbounded channels. Useful for running
//! sessions without sockets and for injecting failures: sending
//! [`Message::Corruption`] from one end makes the other end's session treat
//! its stream as corrupted. A frame size limit set with
//! [`MemoryTransport::set_max_frame_size`] makes oversized writes fail the
//! way a TCP transport would.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use tokio::sync::{mpsc, watch};

use super::frame;
use crate::core::{Connector, FrameError, Transport, TransportError, TransportResult};
use crate::message::Message;

/// One end of an in-memory transport pair.
#[derive(Debug)]
pub struct MemoryTransport {
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<Message>>,
    closed: watch::Sender<bool>,
    resets: AtomicUsize,
    max_frame_size: AtomicUsize,
}

impl MemoryTransport {
    /// Create two connected ends.
    pub fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (Self::new(a_tx, b_rx), Self::new(b_tx, a_rx))
    }

    fn new(
        outbound: mpsc::UnboundedSender<Message>,
        inbound: mpsc::UnboundedReceiver<Message>,
    ) -> Self {
        Self {
            outbound: Mutex::new(Some(outbound)),
            inbound: tokio::sync::Mutex::new(inbound),
            closed: watch::Sender::new(false),
            resets: AtomicUsize::new(0),
            max_frame_size: AtomicUsize::new(usize::MAX),
        }
    }

    /// How often `reset_output_state` was called.
    pub fn output_resets(&self) -> usize {
        self.resets.load(Ordering::Relaxed)
    }

    /// Refuse to write frame bodies larger than `max`.
    pub fn set_max_frame_size(&self, max: usize) {
        self.max_frame_size.store(max, Ordering::Relaxed);
    }

    /// Whether this end was closed.
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Take the next message if one is already queued.
    pub async fn try_receive(&self) -> Option<Message> {
        self.inbound.lock().await.try_recv().ok()
    }
}

impl Transport for MemoryTransport {
    async fn send(&self, message: &Message) -> TransportResult<()> {
        let size = frame::body_size(message);
        let max = self.max_frame_size();
        if size > max {
            return Err(FrameError::TooLarge { size, max }.into());
        }
        let outbound = self
            .outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match outbound {
            Some(tx) => tx
                .send(message.clone())
                .map_err(|_| TransportError::Closed),
            None => Err(TransportError::Closed),
        }
    }

    async fn receive(&self) -> TransportResult<Message> {
        let mut closed = self.closed.subscribe();
        let mut inbound = self.inbound.lock().await;
        loop {
            if *closed.borrow_and_update() {
                return Err(TransportError::Closed);
            }
            tokio::select! {
                changed = closed.changed() => {
                    if changed.is_err() {
                        return Err(TransportError::Closed);
                    }
                }
                message = inbound.recv() => return message.ok_or(TransportError::Closed),
            }
        }
    }

    fn reset_output_state(&self) {
        self.resets.fetch_add(1, Ordering::Relaxed);
    }

    fn max_frame_size(&self) -> usize {
        self.max_frame_size.load(Ordering::Relaxed)
    }

    async fn close(&self) {
        self.closed.send_replace(true);
        self.outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

/// Connector producing [`MemoryTransport`] pairs.
///
/// The far end of every pair is handed to the receiver returned by
/// [`MemoryConnector::new`], which plays the role of a listener.
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    accepted: mpsc::UnboundedSender<MemoryTransport>,
}

impl MemoryConnector {
    /// Create a connector and its listener side.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MemoryTransport>) {
        let (accepted, listener) = mpsc::unbounded_channel();
        (Self { accepted }, listener)
    }
}

impl Connector for MemoryConnector {
    type Transport = MemoryTransport;

    async fn connect(&self) -> TransportResult<MemoryTransport> {
        let (near, far) = MemoryTransport::pair();
        self.accepted
            .send(far)
            .map_err(|_| TransportError::Closed)?;
        Ok(near)
    }
}
