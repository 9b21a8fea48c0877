//! High-level Tether server API.
//!
//! Provides `TetherServer` for accepting TCP clients. Every client gets a
//! [`Session`] that survives a broken connection: the client reconnects,
//! presents its recovery secret and the session continues on the new
//! connection with its pending sends and sequence state intact.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::Duration;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tracing::{Instrument, debug, error, info, info_span, instrument, trace, warn};

use super::group::{GroupId, SessionGroups};
use super::registry::SecretRegistry;
use crate::core::{
    ACCEPT_BACKOFF, DEFAULT_LOGIN_TIMEOUT, DEFAULT_MAX_FRAME_SIZE, DEFAULT_MAX_SESSIONS,
    DEFAULT_PORT, Deliverer, ReliabilityError, SessionEvent, Transport, TransportError,
};
use crate::message::{
    ApplicationMessage, Message, MessageId, RecoverySecret, ReloginKind, ReloginMessage,
    Securable,
};
use crate::reliability::{RecoveryState, Role};
use crate::session::{Session, SessionConfig, SessionId, accept_relogin};
use crate::transport::TcpTransport;

/// Errors that can occur in the Tether server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to address.
    #[error("bind failed: {0}")]
    BindFailed(String),

    /// No session with this id.
    #[error("unknown session {0}")]
    UnknownSession(SessionId),

    /// The session limit was reached.
    #[error("session limit of {0} reached")]
    SessionLimit(usize),

    /// The session has not been placed in a formed group.
    #[error("session {0} has no group")]
    NoGroup(SessionId),

    /// A connection sent nothing within the login timeout.
    #[error("no login within {0:?}")]
    LoginTimeout(Duration),

    /// Session error.
    #[error("session error: {0}")]
    Session(#[from] ReliabilityError),

    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Server is shut down.
    #[error("server shut down")]
    Shutdown,
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,

    /// Maximum number of concurrent sessions.
    pub max_sessions: usize,

    /// Time a new connection has to send its first message.
    pub login_timeout: Duration,

    /// Largest frame body accepted from a client.
    pub max_frame_size: usize,

    /// Group sessions by login order into groups of this size.
    pub group_size: Option<NonZeroUsize>,

    /// Reliability and recovery settings for every session.
    pub session: SessionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            max_sessions: DEFAULT_MAX_SESSIONS,
            login_timeout: DEFAULT_LOGIN_TIMEOUT,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            group_size: None,
            session: SessionConfig::default(),
        }
    }
}

/// Builder for creating a server configuration.
#[derive(Debug)]
pub struct TetherServerBuilder {
    config: ServerConfig,
}

impl TetherServerBuilder {
    /// Create a new server builder.
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
        }
    }

    /// Set the bind address.
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.config.bind_addr = addr;
        self
    }

    /// Set the maximum number of concurrent sessions.
    pub fn max_sessions(mut self, max: usize) -> Self {
        self.config.max_sessions = max;
        self
    }

    /// Set the login timeout.
    pub fn login_timeout(mut self, timeout: Duration) -> Self {
        self.config.login_timeout = timeout;
        self
    }

    /// Set the largest accepted frame body.
    pub fn max_frame_size(mut self, max: usize) -> Self {
        self.config.max_frame_size = max;
        self
    }

    /// Group sessions into groups of `size`. Zero disables grouping.
    pub fn group_size(mut self, size: usize) -> Self {
        self.config.group_size = NonZeroUsize::new(size);
        self
    }

    /// Set the session configuration.
    pub fn session(mut self, session: SessionConfig) -> Self {
        self.config.session = session;
        self
    }

    /// Build the server configuration.
    pub fn build(self) -> ServerConfig {
        self.config
    }
}

impl Default for TetherServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Event from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// A new client has logged in.
    ClientConnected {
        /// Session ID.
        session_id: SessionId,
        /// Address the client connected from.
        peer_addr: SocketAddr,
    },

    /// An application message was delivered in order.
    MessageReceived {
        /// Session ID.
        session_id: SessionId,
        /// The delivered message.
        message: ApplicationMessage,
    },

    /// A message to the client was never acknowledged.
    MessageLost {
        /// Session ID.
        session_id: SessionId,
        /// The lost message.
        message_id: MessageId,
        /// Retransmissions made before giving up.
        retries: u32,
    },

    /// The client's connection broke; waiting for its relogin.
    ClientRecovering {
        /// Session ID.
        session_id: SessionId,
    },

    /// A group filled up.
    GroupFormed {
        /// Group ID.
        group_id: GroupId,
        /// Members in login order.
        members: Vec<SessionId>,
    },

    /// The client logged back in on a new connection.
    ClientRecovered {
        /// Session ID.
        session_id: SessionId,
    },

    /// The session is gone.
    ClientDisconnected {
        /// Session ID.
        session_id: SessionId,
    },
}

/// Deliverer of server sessions: turns session output into [`ServerEvent`]s.
#[derive(Debug)]
pub struct ServerSink {
    session_id: SessionId,
    events: mpsc::UnboundedSender<ServerEvent>,
    shared: Weak<Shared>,
}

impl Deliverer for ServerSink {
    fn deliver(&self, message: ApplicationMessage) {
        let _ = self.events.send(ServerEvent::MessageReceived {
            session_id: self.session_id,
            message,
        });
    }

    fn report(&self, event: SessionEvent) {
        let session_id = self.session_id;
        let event = match event {
            SessionEvent::MessageLost {
                message_id,
                retries,
            } => ServerEvent::MessageLost {
                session_id,
                message_id,
                retries,
            },
            SessionEvent::RecoveryStarted => ServerEvent::ClientRecovering { session_id },
            SessionEvent::Recovered => ServerEvent::ClientRecovered { session_id },
            SessionEvent::Closed => {
                if let Some(shared) = self.shared.upgrade() {
                    shared.forget(session_id);
                }
                ServerEvent::ClientDisconnected { session_id }
            }
            other => {
                trace!(session = %session_id, ?other, "session event");
                return;
            }
        };
        let _ = self.events.send(event);
    }
}

/// Session type used by the server.
pub type ServerSession = Session<TcpTransport, ServerSink>;

#[derive(Debug)]
struct Shared {
    config: ServerConfig,
    sessions: RwLock<HashMap<SessionId, Arc<ServerSession>>>,
    registry: Mutex<SecretRegistry>,
    groups: Option<Mutex<SessionGroups>>,
    events: mpsc::UnboundedSender<ServerEvent>,
}

fn lock<V>(mutex: &Mutex<V>) -> MutexGuard<'_, V> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn session(&self, id: SessionId) -> Option<Arc<ServerSession>> {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        sessions.get(&id).cloned()
    }

    fn snapshot(&self) -> Vec<Arc<ServerSession>> {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        sessions.values().cloned().collect()
    }

    fn session_count(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn insert(&self, session: Arc<ServerSession>) {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        sessions.insert(session.id(), session);
    }

    fn forget(&self, id: SessionId) {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        lock(&self.registry).revoke(id);
        if let Some(groups) = &self.groups {
            lock(groups).leave(id);
        }
    }

    /// Place a new session; reports the group it completed, if any.
    fn join_group(&self, id: SessionId) {
        let Some(groups) = &self.groups else {
            return;
        };
        let formed = lock(groups).join(id);
        if let Some((group_id, members)) = formed {
            info!(group = %group_id, size = members.len(), "group formed");
            let _ = self.events.send(ServerEvent::GroupFormed { group_id, members });
        }
    }

    fn group_members(&self, id: SessionId) -> Option<Vec<SessionId>> {
        let groups = lock(self.groups.as_ref()?);
        let group_id = groups.group_of(id)?;
        groups.members(group_id).map(<[SessionId]>::to_vec)
    }

    fn drain(&self) -> Vec<Arc<ServerSession>> {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        sessions.drain().map(|(_, session)| session).collect()
    }
}

/// A Tether protocol server.
///
/// # Example
///
/// ```ignore
/// use tether_protocol::server::{ServerEvent, TetherServer, TetherServerBuilder};
///
/// let config = TetherServerBuilder::new()
///     .bind_addr("0.0.0.0:7331".parse()?)
///     .build();
///
/// let (server, mut events) = TetherServer::bind(config).await?;
///
/// while let Some(event) = events.recv().await {
///     match event {
///         ServerEvent::MessageReceived { session_id, message } => {
///             server.send_to(session_id, message.into_payload()).await?;
///         }
///         other => println!("{other:?}"),
///     }
/// }
/// ```
pub struct TetherServer {
    shared: Arc<Shared>,

    /// Shutdown signal for the accept loop.
    shutdown_tx: Option<oneshot::Sender<()>>,

    local_addr: SocketAddr,
}

impl TetherServer {
    /// Bind to the configured address and start accepting clients.
    pub async fn bind(
        config: ServerConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ServerEvent>), ServerError> {
        let listener = TcpListener::bind(config.bind_addr)
            .await
            .map_err(|e| ServerError::BindFailed(e.to_string()))?;
        let local_addr = listener.local_addr()?;

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let groups = config.group_size.map(|size| Mutex::new(SessionGroups::new(size)));
        let shared = Arc::new(Shared {
            config,
            sessions: RwLock::new(HashMap::new()),
            registry: Mutex::new(SecretRegistry::new()),
            groups,
            events: event_tx,
        });

        let span = info_span!("tether_server", addr = %local_addr);
        tokio::spawn(accept_loop(listener, Arc::clone(&shared), shutdown_rx).instrument(span));
        info!(addr = %local_addr, "server listening");

        let server = Self {
            shared,
            shutdown_tx: Some(shutdown_tx),
            local_addr,
        };
        Ok((server, event_rx))
    }

    /// Get the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    /// Number of live sessions, recovering ones included.
    pub fn session_count(&self) -> usize {
        self.shared.session_count()
    }

    /// Ids of the live sessions.
    pub fn session_ids(&self) -> Vec<SessionId> {
        self.shared
            .snapshot()
            .iter()
            .map(|session| session.id())
            .collect()
    }

    /// Look up a session.
    pub fn session(&self, session_id: SessionId) -> Option<Arc<ServerSession>> {
        self.shared.session(session_id)
    }

    /// Send a payload to one client as a secured message.
    ///
    /// A recovering session queues the message until its client is back.
    pub async fn send_to(
        &self,
        session_id: SessionId,
        payload: impl Into<Vec<u8>>,
    ) -> Result<MessageId, ServerError> {
        let session = self
            .shared
            .session(session_id)
            .ok_or(ServerError::UnknownSession(session_id))?;
        let message = ApplicationMessage::new(payload);
        let message_id = message.message_id();
        session.secure_and_send(message).await?;
        Ok(message_id)
    }

    /// Send a payload to every active client. Returns how many got it.
    pub async fn broadcast(&self, payload: impl Into<Vec<u8>>) -> usize {
        send_all(self.shared.snapshot(), payload.into()).await
    }

    /// Group of a session, once its group has formed.
    pub fn group_of(&self, session_id: SessionId) -> Option<GroupId> {
        let groups = lock(self.shared.groups.as_ref()?);
        groups.group_of(session_id)
    }

    /// Send a payload to every active member of `session_id`'s group,
    /// the session itself included. Returns how many got it.
    pub async fn broadcast_group(
        &self,
        session_id: SessionId,
        payload: impl Into<Vec<u8>>,
    ) -> Result<usize, ServerError> {
        let members = self.group_sessions(session_id)?;
        Ok(send_all(members, payload.into()).await)
    }

    /// Like [`TetherServer::broadcast_group`], but skips `session_id`.
    pub async fn relay_to_group(
        &self,
        session_id: SessionId,
        payload: impl Into<Vec<u8>>,
    ) -> Result<usize, ServerError> {
        let mut members = self.group_sessions(session_id)?;
        members.retain(|session| session.id() != session_id);
        Ok(send_all(members, payload.into()).await)
    }

    fn group_sessions(&self, session_id: SessionId) -> Result<Vec<Arc<ServerSession>>, ServerError> {
        if self.shared.session(session_id).is_none() {
            return Err(ServerError::UnknownSession(session_id));
        }
        let members = self
            .shared
            .group_members(session_id)
            .ok_or(ServerError::NoGroup(session_id))?;
        Ok(members
            .into_iter()
            .filter_map(|member| self.shared.session(member))
            .collect())
    }

    /// Close one session for good.
    pub async fn disconnect(&self, session_id: SessionId) -> Result<(), ServerError> {
        let session = self
            .shared
            .session(session_id)
            .ok_or(ServerError::UnknownSession(session_id))?;
        session.close().await;
        Ok(())
    }

    /// Write a corruption marker to a client, making it reconnect.
    pub async fn send_corruption_marker(&self, session_id: SessionId) -> Result<(), ServerError> {
        let session = self
            .shared
            .session(session_id)
            .ok_or(ServerError::UnknownSession(session_id))?;
        session.send_raw(Message::Corruption).await?;
        Ok(())
    }

    /// Stop accepting clients and close every session.
    pub async fn shutdown(mut self) -> Result<(), ServerError> {
        let tx = self.shutdown_tx.take().ok_or(ServerError::Shutdown)?;
        let _ = tx.send(());

        for session in self.shared.drain() {
            session.close().await;
        }
        info!(addr = %self.local_addr, "server shut down");
        Ok(())
    }
}

impl std::fmt::Debug for TetherServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TetherServer")
            .field("local_addr", &self.local_addr)
            .field("sessions", &self.session_count())
            .finish()
    }
}

impl Drop for TetherServer {
    fn drop(&mut self) {
        // Send shutdown signal if not already sent
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
            for session in self.shared.drain() {
                session.stop_workers();
            }
        }
    }
}

/// Secure `payload` to each active session. Returns how many got it.
async fn send_all(sessions: Vec<Arc<ServerSession>>, payload: Vec<u8>) -> usize {
    let mut sent = 0;
    for session in sessions {
        if session.recovery_state() != RecoveryState::Active {
            continue;
        }
        match session
            .secure_and_send(ApplicationMessage::new(payload.clone()))
            .await
        {
            Ok(()) => sent += 1,
            Err(e) => debug!(session = %session.id(), "broadcast skipped: {e}"),
        }
    }
    sent
}

async fn accept_loop(
    listener: TcpListener,
    shared: Arc<Shared>,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        let accepted = tokio::select! {
            biased;
            _ = &mut shutdown => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, peer_addr)) => {
                let shared = Arc::clone(&shared);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(shared, stream, peer_addr).await {
                        debug!(peer = %peer_addr, "connection refused: {e}");
                    }
                });
            }
            Err(e) => {
                error!("accept failed: {e}");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
    debug!("accept loop stopped");
}

/// Classify a new connection by its first message.
#[instrument(skip(shared, stream))]
async fn handle_connection(
    shared: Arc<Shared>,
    stream: TcpStream,
    peer_addr: SocketAddr,
) -> Result<(), ServerError> {
    let transport = TcpTransport::new(stream, shared.config.max_frame_size)?;

    let login_timeout = shared.config.login_timeout;
    let first = match tokio::time::timeout(login_timeout, transport.receive()).await {
        Ok(Ok(message)) => message,
        Ok(Err(e)) => {
            transport.close().await;
            return Err(e.into());
        }
        Err(_) => {
            transport.close().await;
            return Err(ServerError::LoginTimeout(login_timeout));
        }
    };

    match first {
        Message::Relogin(ReloginMessage {
            kind: ReloginKind::ClientReloginRequest,
            secret,
        }) => relogin(&shared, transport, secret).await,
        first => login(&shared, transport, first).await,
    }
}

async fn relogin(
    shared: &Arc<Shared>,
    transport: TcpTransport,
    secret: Option<RecoverySecret>,
) -> Result<(), ServerError> {
    let rotated = secret.and_then(|secret| lock(&shared.registry).rotate(&secret));
    let Some((session_id, fresh)) = rotated else {
        warn!("relogin with unknown secret rejected");
        transport.close().await;
        return Err(ReliabilityError::RecoveryRejected.into());
    };
    let Some(session) = shared.session(session_id) else {
        lock(&shared.registry).revoke(session_id);
        transport.close().await;
        return Err(ServerError::UnknownSession(session_id));
    };

    if let Err(e) = accept_relogin(&session, transport, fresh).await {
        warn!(session = %session_id, "relogin failed: {e}");
        return Err(e.into());
    }
    info!(session = %session_id, "client relogged in");
    Ok(())
}

async fn login(
    shared: &Arc<Shared>,
    transport: TcpTransport,
    first: Message,
) -> Result<(), ServerError> {
    let max_sessions = shared.config.max_sessions;
    if shared.session_count() >= max_sessions {
        warn!(max_sessions, "login refused, session limit reached");
        transport.close().await;
        return Err(ServerError::SessionLimit(max_sessions));
    }

    let session_id = SessionId::generate();
    let secret = lock(&shared.registry).issue(session_id);

    // The secret goes out before anything else on the connection.
    let greeting = Message::from(ReloginMessage::send_secret(secret));
    if let Err(e) = transport.send(&greeting).await {
        lock(&shared.registry).revoke(session_id);
        transport.close().await;
        return Err(e.into());
    }

    let peer_addr = transport.peer_addr();
    let sink = ServerSink {
        session_id,
        events: shared.events.clone(),
        shared: Arc::downgrade(shared),
    };
    let session = Session::new(
        session_id,
        Role::Server,
        shared.config.session.clone(),
        transport,
        sink,
    );
    shared.insert(Arc::clone(&session));
    info!(session = %session_id, peer = %peer_addr, "client logged in");
    let _ = shared.events.send(ServerEvent::ClientConnected {
        session_id,
        peer_addr,
    });
    shared.join_group(session_id);

    let handled = session.on_receive(first).await;
    session.start().await;
    handled?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::message::Acknowledgement;

    const WAIT: Duration = Duration::from_secs(5);

    async fn server(max_sessions: usize) -> (TetherServer, mpsc::UnboundedReceiver<ServerEvent>) {
        let config = TetherServerBuilder::new()
            .bind_addr("127.0.0.1:0".parse().expect("valid address"))
            .max_sessions(max_sessions)
            .login_timeout(Duration::from_secs(2))
            .build();
        TetherServer::bind(config).await.expect("bind")
    }

    async fn raw_client(server: &TetherServer) -> TcpTransport {
        TcpTransport::connect(server.local_addr(), DEFAULT_MAX_FRAME_SIZE)
            .await
            .expect("connect")
    }

    async fn receive(transport: &TcpTransport) -> Message {
        tokio::time::timeout(WAIT, transport.receive())
            .await
            .expect("message in time")
            .expect("message")
    }

    async fn event(events: &mut mpsc::UnboundedReceiver<ServerEvent>) -> ServerEvent {
        tokio::time::timeout(WAIT, events.recv())
            .await
            .expect("event in time")
            .expect("event")
    }

    fn take_secret(message: Message) -> RecoverySecret {
        match message {
            Message::Relogin(ReloginMessage {
                kind: ReloginKind::SendSecret,
                secret: Some(secret),
            }) => secret,
            other => panic!("expected SEND_SECRET, got {other:?}"),
        }
    }

    /// Log in with one application message; returns the secret and session id.
    async fn login_with(
        client: &TcpTransport,
        events: &mut mpsc::UnboundedReceiver<ServerEvent>,
        payload: &[u8],
    ) -> (RecoverySecret, SessionId) {
        let message = ApplicationMessage::from_parts(MessageId::from(1), 1, payload.to_vec());
        client.send(&message.into()).await.expect("send");

        let secret = take_secret(receive(client).await);
        assert_eq!(
            receive(client).await,
            Message::Acknowledgement(Acknowledgement::new(MessageId::from(1)))
        );

        let session_id = match event(events).await {
            ServerEvent::ClientConnected { session_id, .. } => session_id,
            other => panic!("unexpected event {other:?}"),
        };
        match event(events).await {
            ServerEvent::MessageReceived {
                session_id: from,
                message,
            } => {
                assert_eq!(from, session_id);
                assert_eq!(message.payload(), payload);
            }
            other => panic!("unexpected event {other:?}"),
        }
        (secret, session_id)
    }

    #[test]
    fn test_builder() {
        let config = TetherServerBuilder::new()
            .max_sessions(4)
            .login_timeout(Duration::from_secs(1))
            .max_frame_size(1024)
            .group_size(3)
            .build();

        assert_eq!(config.max_sessions, 4);
        assert_eq!(config.login_timeout, Duration::from_secs(1));
        assert_eq!(config.max_frame_size, 1024);
        assert_eq!(config.group_size, NonZeroUsize::new(3));
        assert_eq!(TetherServerBuilder::new().group_size(0).build().group_size, None);
        assert_eq!(config.bind_addr.port(), DEFAULT_PORT);
    }

    #[tokio::test]
    async fn test_login_sends_secret_first() {
        let (server, mut events) = server(8).await;
        let client = raw_client(&server).await;

        let (_, session_id) = login_with(&client, &mut events, b"hello").await;

        assert_eq!(server.session_count(), 1);
        assert_eq!(server.session_ids(), vec![session_id]);
    }

    #[tokio::test]
    async fn test_send_to_is_secured() {
        let (server, mut events) = server(8).await;
        let client = raw_client(&server).await;
        let (_, session_id) = login_with(&client, &mut events, b"hello").await;

        let message_id = server.send_to(session_id, b"reply".to_vec()).await.expect("send");
        match receive(&client).await {
            Message::Application(message) => {
                assert_eq!(message.message_id(), message_id);
                assert_eq!(message.send_count(), 1);
                assert_eq!(message.payload(), b"reply");
            }
            other => panic!("unexpected message {other:?}"),
        }

        let session = server.session(session_id).expect("session");
        assert_eq!(session.pending_count(), 1);
        client
            .send(&Acknowledgement::new(message_id).into())
            .await
            .expect("ack");
        tokio::time::timeout(WAIT, async {
            while session.pending_count() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("acknowledged");
    }

    #[tokio::test]
    async fn test_relogin_rotates_secret() {
        let (server, mut events) = server(8).await;
        let first = raw_client(&server).await;
        let (secret, session_id) = login_with(&first, &mut events, b"hello").await;
        first.close().await;
        drop(first);

        assert_eq!(
            event(&mut events).await,
            ServerEvent::ClientRecovering { session_id }
        );

        let second = raw_client(&server).await;
        second
            .send(&ReloginMessage::client_request(secret.clone()).into())
            .await
            .expect("relogin");
        let fresh = take_secret(receive(&second).await);
        assert_ne!(fresh, secret);
        assert_eq!(
            event(&mut events).await,
            ServerEvent::ClientRecovered { session_id }
        );
        assert_eq!(server.session_count(), 1);

        // The old secret was single use.
        let third = raw_client(&server).await;
        third
            .send(&ReloginMessage::client_request(secret).into())
            .await
            .expect("relogin");
        let answer = tokio::time::timeout(WAIT, third.receive())
            .await
            .expect("answer in time");
        assert!(matches!(answer, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn test_unknown_secret_rejected() {
        let (server, _events) = server(8).await;
        let client = raw_client(&server).await;

        client
            .send(&ReloginMessage::client_request(RecoverySecret::generate()).into())
            .await
            .expect("relogin");
        let answer = tokio::time::timeout(WAIT, client.receive())
            .await
            .expect("answer in time");

        assert!(matches!(answer, Err(TransportError::Closed)));
        assert_eq!(server.session_count(), 0);
    }

    #[tokio::test]
    async fn test_session_limit() {
        let (server, mut events) = server(1).await;
        let first = raw_client(&server).await;
        login_with(&first, &mut events, b"one").await;

        let second = raw_client(&server).await;
        let message = ApplicationMessage::from_parts(MessageId::from(2), 1, b"two".to_vec());
        second.send(&message.into()).await.expect("send");
        let answer = tokio::time::timeout(WAIT, second.receive())
            .await
            .expect("answer in time");

        assert!(matches!(answer, Err(TransportError::Closed)));
        assert_eq!(server.session_count(), 1);
    }

    #[tokio::test]
    async fn test_client_corruption_triggers_relogin_request() {
        let (server, mut events) = server(8).await;
        let client = raw_client(&server).await;
        let (_, session_id) = login_with(&client, &mut events, b"hello").await;

        client.send(&Message::Corruption).await.expect("send");

        assert_eq!(
            receive(&client).await,
            Message::Relogin(ReloginMessage::server_request())
        );
        assert_eq!(
            event(&mut events).await,
            ServerEvent::ClientRecovering { session_id }
        );
    }

    #[tokio::test]
    async fn test_corruption_marker_and_disconnect() {
        let (server, mut events) = server(8).await;
        let client = raw_client(&server).await;
        let (_, session_id) = login_with(&client, &mut events, b"hello").await;

        server
            .send_corruption_marker(session_id)
            .await
            .expect("marker");
        assert_eq!(receive(&client).await, Message::Corruption);

        server.disconnect(session_id).await.expect("disconnect");
        assert_eq!(
            event(&mut events).await,
            ServerEvent::ClientDisconnected { session_id }
        );
        assert_eq!(server.session_count(), 0);
        assert!(matches!(
            server.send_to(session_id, b"late".to_vec()).await,
            Err(ServerError::UnknownSession(_))
        ));
    }

    #[tokio::test]
    async fn test_broadcast_and_shutdown() {
        let (server, mut events) = server(8).await;
        let first = raw_client(&server).await;
        login_with(&first, &mut events, b"one").await;
        let second = raw_client(&server).await;
        login_with(&second, &mut events, b"two").await;

        assert_eq!(server.broadcast(b"all".to_vec()).await, 2);
        for client in [&first, &second] {
            match receive(client).await {
                Message::Application(message) => assert_eq!(message.payload(), b"all"),
                other => panic!("unexpected message {other:?}"),
            }
        }

        server.shutdown().await.expect("shutdown");
        let answer = tokio::time::timeout(WAIT, first.receive())
            .await
            .expect("answer in time");
        assert!(matches!(answer, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn test_group_broadcast_stays_in_group() {
        let config = TetherServerBuilder::new()
            .bind_addr("127.0.0.1:0".parse().expect("valid address"))
            .group_size(2)
            .build();
        let (server, mut events) = TetherServer::bind(config).await.expect("bind");

        let first = raw_client(&server).await;
        let (_, a) = login_with(&first, &mut events, b"a").await;
        assert_eq!(server.group_of(a), None);

        // The second login completes the group.
        let second = raw_client(&server).await;
        let login = ApplicationMessage::from_parts(MessageId::from(1), 1, b"b".to_vec());
        second.send(&login.into()).await.expect("send");
        take_secret(receive(&second).await);
        assert_eq!(
            receive(&second).await,
            Message::Acknowledgement(Acknowledgement::new(MessageId::from(1)))
        );
        let b = match event(&mut events).await {
            ServerEvent::ClientConnected { session_id, .. } => session_id,
            other => panic!("unexpected event {other:?}"),
        };
        let group_id = server.group_of(a).expect("group formed");
        assert_eq!(
            event(&mut events).await,
            ServerEvent::GroupFormed {
                group_id,
                members: vec![a, b]
            }
        );
        assert!(matches!(
            event(&mut events).await,
            ServerEvent::MessageReceived { .. }
        ));
        assert_eq!(server.group_of(b), Some(group_id));

        let third = raw_client(&server).await;
        let (_, c) = login_with(&third, &mut events, b"c").await;

        assert_eq!(server.broadcast_group(a, b"team".to_vec()).await.expect("group"), 2);
        for client in [&first, &second] {
            match receive(client).await {
                Message::Application(message) => assert_eq!(message.payload(), b"team"),
                other => panic!("unexpected message {other:?}"),
            }
        }

        assert_eq!(server.relay_to_group(a, b"peer".to_vec()).await.expect("group"), 1);
        match receive(&second).await {
            Message::Application(message) => assert_eq!(message.payload(), b"peer"),
            other => panic!("unexpected message {other:?}"),
        }

        // The waiting session is outside every group.
        assert!(
            tokio::time::timeout(Duration::from_millis(200), third.receive())
                .await
                .is_err()
        );
        assert!(matches!(
            server.broadcast_group(c, b"x".to_vec()).await,
            Err(ServerError::NoGroup(id)) if id == c
        ));
        assert!(matches!(
            server.broadcast_group(SessionId::new(0), b"x".to_vec()).await,
            Err(ServerError::UnknownSession(_))
        ));
    }
}
