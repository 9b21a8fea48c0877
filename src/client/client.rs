//! High-level Tether client API.
//!
//! Provides `TetherClient` for talking to a Tether server over TCP. When the
//! connection breaks (or the server asks for it) a supervisor task reconnects
//! and relogs in with the recovery secret, so pending messages and sequence
//! state carry over to the new connection.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{Instrument, debug, info, info_span, trace, warn};

use crate::core::{
    Connector, DEFAULT_CONNECT_TIMEOUT, DEFAULT_MAX_FRAME_SIZE, DEFAULT_PORT, Deliverer,
    ReliabilityError, SessionEvent, TransportError,
};
use crate::message::{ApplicationMessage, Message, MessageId, Securable};
use crate::reliability::{RecoveryState, Role};
use crate::session::{ReloginOptions, Session, SessionConfig, SessionId, relogin};
use crate::transport::{TcpConnector, TcpTransport};

/// Errors that can occur in the Tether client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Session error.
    #[error("session error: {0}")]
    Session(#[from] ReliabilityError),

    /// The client was closed or its session abandoned.
    #[error("client closed")]
    Closed,
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server address to connect to.
    pub server_addr: SocketAddr,

    /// Connection timeout.
    pub connect_timeout: Duration,

    /// Largest frame body accepted from the server.
    pub max_frame_size: usize,

    /// Reconnect and relogin timing.
    pub relogin: ReloginOptions,

    /// Reliability and recovery settings.
    pub session: SessionConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            relogin: ReloginOptions::default(),
            session: SessionConfig::default(),
        }
    }
}

/// Builder for creating a client configuration.
#[derive(Debug)]
pub struct TetherClientBuilder {
    config: ClientConfig,
}

impl TetherClientBuilder {
    /// Create a new client builder.
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
        }
    }

    /// Set the server address.
    pub fn server_addr(mut self, addr: SocketAddr) -> Self {
        self.config.server_addr = addr;
        self
    }

    /// Set the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set the largest accepted frame body.
    pub fn max_frame_size(mut self, max: usize) -> Self {
        self.config.max_frame_size = max;
        self
    }

    /// Set the reconnect and relogin timing.
    pub fn relogin(mut self, options: ReloginOptions) -> Self {
        self.config.relogin = options;
        self
    }

    /// Set the session configuration.
    pub fn session(mut self, session: SessionConfig) -> Self {
        self.config.session = session;
        self
    }

    /// Build the client configuration.
    pub fn build(self) -> ClientConfig {
        self.config
    }
}

impl Default for TetherClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Event from the client session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// An application message from the server, in order.
    Message(ApplicationMessage),

    /// A message to the server was never acknowledged.
    MessageLost {
        /// The lost message.
        message_id: MessageId,
        /// Retransmissions made before giving up.
        retries: u32,
    },

    /// The server issued a new recovery secret.
    SecretReceived,

    /// The connection broke; a relogin is under way.
    Recovering,

    /// The session continues on a new connection.
    Recovered,

    /// Recovery failed; the session is gone.
    Abandoned,

    /// The session was closed.
    Closed,
}

/// Deliverer of the client session.
#[derive(Debug)]
pub struct ClientSink {
    events: mpsc::UnboundedSender<ClientEvent>,
    recover: mpsc::UnboundedSender<()>,
}

impl Deliverer for ClientSink {
    fn deliver(&self, message: ApplicationMessage) {
        let _ = self.events.send(ClientEvent::Message(message));
    }

    fn report(&self, event: SessionEvent) {
        let event = match event {
            SessionEvent::MessageLost {
                message_id,
                retries,
            } => ClientEvent::MessageLost {
                message_id,
                retries,
            },
            SessionEvent::SecretReceived => ClientEvent::SecretReceived,
            SessionEvent::RecoveryStarted => {
                let _ = self.recover.send(());
                ClientEvent::Recovering
            }
            SessionEvent::Recovered => ClientEvent::Recovered,
            SessionEvent::Abandoned => ClientEvent::Abandoned,
            SessionEvent::Closed => ClientEvent::Closed,
            SessionEvent::TransportLost(failure) => {
                trace!(?failure, "transport lost");
                return;
            }
        };
        let _ = self.events.send(event);
    }
}

/// Session type used by the client.
pub type ClientSession = Session<TcpTransport, ClientSink>;

/// A Tether protocol client.
///
/// # Example
///
/// ```ignore
/// use tether_protocol::client::{ClientEvent, TetherClient, TetherClientBuilder};
///
/// let config = TetherClientBuilder::new()
///     .server_addr("127.0.0.1:7331".parse()?)
///     .build();
///
/// let (client, mut events) = TetherClient::connect(config).await?;
/// client.send(b"hello".to_vec()).await?;
///
/// while let Some(event) = events.recv().await {
///     if let ClientEvent::Message(message) = event {
///         println!("{:?}", message.payload());
///     }
/// }
/// ```
pub struct TetherClient {
    session: Arc<ClientSession>,

    /// Shutdown signal for the recovery supervisor.
    shutdown_tx: Option<oneshot::Sender<()>>,

    config: ClientConfig,
}

impl TetherClient {
    /// Connect to a Tether server.
    ///
    /// The server answers the first message with the recovery secret; until
    /// then a broken connection cannot be recovered.
    pub async fn connect(
        config: ClientConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ClientEvent>), ClientError> {
        let connector = TcpConnector::new(config.server_addr)
            .connect_timeout(config.connect_timeout)
            .max_frame_size(config.max_frame_size);
        let transport = connector.connect().await?;

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (recover_tx, recover_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let sink = ClientSink {
            events: event_tx,
            recover: recover_tx,
        };
        let session = Session::new(
            SessionId::generate(),
            Role::Client,
            config.session.clone(),
            transport,
            sink,
        );
        session.start().await;

        let span = info_span!("tether_client", session = %session.id());
        tokio::spawn(
            supervise(
                Arc::clone(&session),
                connector,
                config.relogin.clone(),
                recover_rx,
                shutdown_rx,
            )
            .instrument(span),
        );
        info!(server = %config.server_addr, session = %session.id(), "connected");

        let client = Self {
            session,
            shutdown_tx: Some(shutdown_tx),
            config,
        };
        Ok((client, event_rx))
    }

    /// Send a payload as a secured message.
    pub async fn send(&self, payload: impl Into<Vec<u8>>) -> Result<MessageId, ClientError> {
        let message = ApplicationMessage::new(payload);
        let message_id = message.message_id();
        self.send_message(message).await?;
        Ok(message_id)
    }

    /// Send a secured message with a caller-chosen id.
    pub async fn send_message(&self, message: ApplicationMessage) -> Result<(), ClientError> {
        self.ensure_open()?;
        self.session.secure_and_send(message).await?;
        Ok(())
    }

    /// Send a secured message, written in full on the current connection.
    pub async fn send_unshared(&self, message: ApplicationMessage) -> Result<(), ClientError> {
        self.ensure_open()?;
        self.session.secure_and_send_unshared(message).await?;
        Ok(())
    }

    /// Write a corruption marker, making the server request a relogin.
    pub async fn send_corruption_marker(&self) -> Result<(), ClientError> {
        self.ensure_open()?;
        self.session.send_raw(Message::Corruption).await?;
        Ok(())
    }

    /// Current recovery state.
    pub fn recovery_state(&self) -> RecoveryState {
        self.session.recovery_state()
    }

    /// Whether the server has issued a recovery secret yet.
    pub fn has_recovery_secret(&self) -> bool {
        self.session.recovery_secret().is_some()
    }

    /// Number of messages awaiting acknowledgement.
    pub fn pending_count(&self) -> usize {
        self.session.pending_count()
    }

    /// Local id of the session, used in logs.
    pub fn session_id(&self) -> SessionId {
        self.session.id()
    }

    /// The underlying session.
    pub fn session(&self) -> &Arc<ClientSession> {
        &self.session
    }

    /// Get the server address.
    pub fn server_addr(&self) -> SocketAddr {
        self.config.server_addr
    }

    /// Close the session and stop the supervisor.
    pub async fn close(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.session.close().await;
    }

    fn ensure_open(&self) -> Result<(), ClientError> {
        if self.session.is_closed() {
            return Err(ClientError::Closed);
        }
        Ok(())
    }
}

impl std::fmt::Debug for TetherClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TetherClient")
            .field("server_addr", &self.config.server_addr)
            .field("session", &self.session)
            .finish()
    }
}

impl Drop for TetherClient {
    fn drop(&mut self) {
        // Send shutdown signal if not already sent
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
            self.session.stop_workers();
        }
    }
}

/// Run a relogin each time the session enters recovery.
async fn supervise(
    session: Arc<ClientSession>,
    connector: TcpConnector,
    options: ReloginOptions,
    mut signals: mpsc::UnboundedReceiver<()>,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        let signal = tokio::select! {
            biased;
            _ = &mut shutdown => break,
            signal = signals.recv() => signal,
        };
        if signal.is_none() {
            break;
        }
        if session.recovery_state() != RecoveryState::Recovering {
            continue;
        }

        let outcome = tokio::select! {
            biased;
            _ = &mut shutdown => break,
            outcome = relogin(&session, &connector, &options) => outcome,
        };
        match outcome {
            Ok(()) => debug!("relogin complete"),
            Err(e) => {
                warn!("recovery failed: {e}");
                break;
            }
        }
    }
    trace!("supervisor stopped");
}
