//! Session runtime.
//!
//! Owns the reliability state of one logical conversation and the transport
//! currently carrying it. A read worker feeds inbound messages through the
//! channel; a maintenance worker retransmits, expires received records and
//! enforces the recovery timeout.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rand::Rng;
use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;
use tracing::{Instrument, debug, info, info_span, trace, warn};

use crate::core::{
    DEFAULT_RECOVERY_TIMEOUT, Deliverer, FrameError, ReliabilityError, SessionEvent, Transport,
    TransportError, TransportFailure,
};
use crate::message::{Message, MessageId, RecoverySecret, ReloginKind, ReloginMessage, Securable};
use crate::reliability::{
    Inbound, Maintenance, RecoveryController, RecoveryState, ReliabilityConfig, ReliableChannel,
    Role,
};
use crate::transport::frame;

/// Identifier of a session, unique per process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    /// Create a session id from a raw value.
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Generate a random session id.
    pub fn generate() -> Self {
        Self(rand::thread_rng().r#gen())
    }

    /// Raw value.
    pub const fn to_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Session configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Retransmission and retention parameters.
    pub reliability: ReliabilityConfig,

    /// Longest time a session may stay in recovery before it is abandoned.
    pub recovery_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reliability: ReliabilityConfig::default(),
            recovery_timeout: DEFAULT_RECOVERY_TIMEOUT,
        }
    }
}

/// One end of a reliable session.
///
/// Created with [`Session::new`] and started with [`Session::start`]. The
/// workers hold a reference to the session; [`Session::close`] (or
/// [`Session::stop_workers`]) releases them.
pub struct Session<T: Transport, D: Deliverer> {
    id: SessionId,
    config: SessionConfig,
    channel: Mutex<ReliableChannel>,
    /// Serialises inbound admission with delivery.
    delivery: Mutex<()>,
    recovery: Mutex<RecoveryController>,
    /// Current transport. Held across writes so frames never interleave.
    link: tokio::sync::Mutex<Option<Arc<T>>>,
    deliverer: D,
    reader_stop: Mutex<Option<oneshot::Sender<()>>>,
    maintenance_stop: Mutex<Option<oneshot::Sender<()>>>,
    closed: AtomicBool,
}

fn lock<V>(mutex: &Mutex<V>) -> MutexGuard<'_, V> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T: Transport, D: Deliverer> Session<T, D> {
    /// Create a session bound to `transport`. No worker runs yet.
    pub fn new(
        id: SessionId,
        role: Role,
        config: SessionConfig,
        transport: T,
        deliverer: D,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            channel: Mutex::new(ReliableChannel::new(config.reliability.clone())),
            delivery: Mutex::new(()),
            recovery: Mutex::new(RecoveryController::new(role)),
            link: tokio::sync::Mutex::new(Some(Arc::new(transport))),
            deliverer,
            reader_stop: Mutex::new(None),
            maintenance_stop: Mutex::new(None),
            closed: AtomicBool::new(false),
            config,
        })
    }

    /// Start the read worker on the bound transport and the maintenance cycle.
    pub async fn start(self: &Arc<Self>) {
        let transport = self.link.lock().await.clone();
        if let Some(transport) = transport {
            self.spawn_reader(transport);
        }
        self.spawn_maintenance();
    }

    /// Session id.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Which end of the session this is.
    pub fn role(&self) -> Role {
        lock(&self.recovery).role()
    }

    /// Session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The application side of this session.
    pub fn deliverer(&self) -> &D {
        &self.deliverer
    }

    /// Current recovery state.
    pub fn recovery_state(&self) -> RecoveryState {
        lock(&self.recovery).state()
    }

    /// Whether the session was torn down.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Secret currently authorising a relogin.
    pub fn recovery_secret(&self) -> Option<RecoverySecret> {
        lock(&self.recovery).secret().cloned()
    }

    /// Store a recovery secret.
    pub fn install_secret(&self, secret: RecoverySecret) {
        lock(&self.recovery).install_secret(secret);
    }

    /// Number of messages awaiting acknowledgement.
    pub fn pending_count(&self) -> usize {
        lock(&self.channel).pending().len()
    }

    /// Retransmissions made so far for a pending message.
    pub fn pending_retries(&self, id: MessageId) -> Option<u32> {
        lock(&self.channel).pending().get(id).map(|entry| entry.retries)
    }

    /// Transport currently bound, if any.
    pub async fn transport(&self) -> Option<Arc<T>> {
        self.link.lock().await.clone()
    }

    /// Secure a message and write it to the current transport.
    ///
    /// A message larger than the bound transport's frame limit is refused
    /// before it is secured. A failed write is returned to the caller, but
    /// the message stays pending and is retransmitted. While the session is
    /// recovering the message is only queued.
    pub async fn secure_and_send(&self, message: impl Into<Message>) -> Result<(), ReliabilityError> {
        self.send_secured(message.into(), false).await
    }

    /// Like [`Session::secure_and_send`], but resets the transport's output
    /// state first so the message is written in full.
    pub async fn secure_and_send_unshared(
        &self,
        message: impl Into<Message>,
    ) -> Result<(), ReliabilityError> {
        self.send_secured(message.into(), true).await
    }

    async fn send_secured(&self, message: Message, unshared: bool) -> Result<(), ReliabilityError> {
        if self.is_closed() {
            return Err(ReliabilityError::SessionClosed);
        }
        // Held from stamping to writing, so frames leave in sequence order.
        let link = self.link.lock().await;
        if let Some(transport) = link.as_ref() {
            let size = frame::body_size(&message);
            let max = transport.max_frame_size();
            if size > max {
                return Err(TransportError::from(FrameError::TooLarge { size, max }).into());
            }
        }
        let message = lock(&self.channel).prepare_outgoing(message)?;

        let Some(transport) = link.as_ref() else {
            trace!(session = %self.id, "no transport bound, message queued");
            return Ok(());
        };
        if unshared {
            transport.reset_output_state();
        }
        if let Err(e) = transport.send(&message).await {
            debug!(session = %self.id, "write failed, message stays pending: {e}");
            return Err(e.into());
        }
        Ok(())
    }

    /// Write a message without securing it.
    ///
    /// Used for acknowledgements, relogin control and the corruption marker.
    pub async fn send_raw(&self, message: impl Into<Message>) -> Result<(), ReliabilityError> {
        if self.is_closed() {
            return Err(ReliabilityError::SessionClosed);
        }
        let message = message.into();
        let link = self.link.lock().await;
        let transport = link.as_ref().ok_or(TransportError::Closed)?;
        transport.send(&message).await?;
        Ok(())
    }

    /// Account for one inbound message.
    ///
    /// Application messages are acknowledged whether they are new or not;
    /// new ones are delivered in sequence order.
    pub async fn on_receive(&self, message: Message) -> Result<(), ReliabilityError> {
        if self.is_closed() {
            return Err(ReliabilityError::SessionClosed);
        }
        match self.admit(message) {
            Inbound::Acknowledged { .. } => {}
            Inbound::Application { ack, .. } => self.send_raw(ack).await?,
            Inbound::Control(relogin) => self.on_control(relogin).await,
            Inbound::Corrupted => {
                self.transport_failed(None, TransportFailure::Corrupted)
                    .await;
            }
        }
        Ok(())
    }

    /// Run one message through the channel and deliver what it releases.
    ///
    /// Readers overlapping around a rebind cannot interleave their
    /// deliveries, so the application sees sequence order.
    fn admit(&self, message: Message) -> Inbound {
        let _delivery = lock(&self.delivery);
        let mut inbound = lock(&self.channel).on_receive(message);
        if let Inbound::Application { deliver, .. } = &mut inbound {
            for message in deliver.drain(..) {
                self.deliverer.deliver(message);
            }
        }
        inbound
    }

    async fn on_control(&self, relogin: ReloginMessage) {
        let role = self.role();
        match (role, relogin.kind) {
            (Role::Client, ReloginKind::SendSecret) => match relogin.secret {
                Some(secret) => {
                    self.install_secret(secret);
                    debug!(session = %self.id, "recovery secret received");
                    self.deliverer.report(SessionEvent::SecretReceived);
                }
                None => warn!(session = %self.id, "SEND_SECRET without a secret"),
            },
            (Role::Client, ReloginKind::ServerReloginRequest) => {
                info!(session = %self.id, "server requested relogin");
                self.transport_failed(None, TransportFailure::ServerRequest)
                    .await;
            }
            (_, kind) => warn!(session = %self.id, %kind, "unexpected relogin message ignored"),
        }
    }

    /// React to the loss of a transport.
    ///
    /// `failed` names the transport that broke; failures of a transport that
    /// is no longer bound are ignored.
    async fn transport_failed(&self, failed: Option<&Arc<T>>, failure: TransportFailure) {
        if self.is_closed() {
            return;
        }
        if let Some(failed) = failed {
            let current = self
                .link
                .lock()
                .await
                .as_ref()
                .is_some_and(|bound| Arc::ptr_eq(bound, failed));
            if !current {
                trace!(session = %self.id, ?failure, "failure of a replaced transport ignored");
                return;
            }
        }

        warn!(session = %self.id, ?failure, "transport lost");
        self.deliverer.report(SessionEvent::TransportLost(failure));

        let (role, recoverable) = {
            let recovery = lock(&self.recovery);
            (recovery.role(), recovery.can_recover())
        };
        if role == Role::Server && failure == TransportFailure::Corrupted {
            if let Err(e) = self.send_raw(ReloginMessage::server_request()).await {
                debug!(session = %self.id, "could not request relogin: {e}");
            }
        }
        if !recoverable {
            self.close().await;
            return;
        }
        let begun = self.detach(failed).await;
        if let Err(e) = begun {
            debug!(session = %self.id, "recovery not started: {e}");
        }
    }

    /// Detach the broken transport and enter recovery.
    ///
    /// Closes the old transport and stops its read worker. Pending sends stay
    /// queued and stop ageing until the session is rebound. Calling this while
    /// already recovering does nothing.
    pub async fn begin_recovery(&self) -> Result<(), ReliabilityError> {
        self.detach(None).await
    }

    /// Enter recovery, but only while `failed` (when given) is still bound.
    async fn detach(&self, failed: Option<&Arc<T>>) -> Result<(), ReliabilityError> {
        if self.is_closed() {
            return Err(ReliabilityError::SessionClosed);
        }
        let mut link = self.link.lock().await;
        if let Some(failed) = failed {
            if !link.as_ref().is_some_and(|bound| Arc::ptr_eq(bound, failed)) {
                return Ok(());
            }
        }
        let started = lock(&self.recovery).begin()?;
        if !started {
            return Ok(());
        }
        lock(&self.reader_stop).take();
        let old = link.take();
        drop(link);
        if let Some(old) = old {
            old.close().await;
        }
        info!(session = %self.id, "session recovering");
        self.deliverer.report(SessionEvent::RecoveryStarted);
        Ok(())
    }

    /// Rebind the session to `transport` and leave recovery.
    ///
    /// Pending sends are retransmitted on the new transport with their retry
    /// counts intact.
    pub async fn complete_recovery(self: &Arc<Self>, transport: T) -> Result<(), ReliabilityError> {
        if self.is_closed() {
            transport.close().await;
            return Err(ReliabilityError::SessionClosed);
        }
        let transport = Arc::new(transport);

        let mut link = self.link.lock().await;
        let completed = lock(&self.recovery).complete();
        if let Err(e) = completed {
            drop(link);
            transport.close().await;
            return Err(e);
        }
        let previous = link.replace(Arc::clone(&transport));
        drop(link);
        if let Some(previous) = previous {
            previous.close().await;
        }

        self.spawn_reader(transport);
        info!(session = %self.id, pending = self.pending_count(), "session recovered");
        self.deliverer.report(SessionEvent::Recovered);
        Ok(())
    }

    /// Run one maintenance cycle.
    ///
    /// Retransmits due pending sends (only while active), reports lost
    /// messages, expires received records and abandons a recovery that
    /// outlived the recovery timeout.
    pub async fn run_maintenance(&self) -> Maintenance {
        let active = self.recovery_state() == RecoveryState::Active;
        let cycle = lock(&self.channel).tick(active);

        for lost in &cycle.retransmission.lost {
            self.deliverer.report(SessionEvent::MessageLost {
                message_id: lost.message_id,
                retries: lost.retries,
            });
        }

        if !cycle.retransmission.resend.is_empty() {
            let link = self.link.lock().await;
            if let Some(transport) = link.as_ref() {
                for message in &cycle.retransmission.resend {
                    debug!(session = %self.id, message_id = %message.message_id(), "retransmitting");
                    transport.reset_output_state();
                    let resend = Message::Application(message.clone());
                    if let Err(e) = transport.send(&resend).await {
                        debug!(
                            session = %self.id,
                            message_id = %message.message_id(),
                            "retransmission failed: {e}"
                        );
                    }
                }
            }
        }

        let timed_out = lock(&self.recovery).elapse(
            self.config.reliability.tick_interval,
            self.config.recovery_timeout,
        );
        if timed_out {
            warn!(session = %self.id, timeout = ?self.config.recovery_timeout, "recovery timed out");
            self.abandon().await;
        }
        cycle
    }

    /// Give up on the session for good.
    pub async fn abandon(&self) {
        let changed = lock(&self.recovery).abandon();
        if changed {
            warn!(session = %self.id, "session abandoned");
            self.deliverer.report(SessionEvent::Abandoned);
        }
        self.close().await;
    }

    /// Tear the session down: stop the workers and close the transport.
    ///
    /// Later sends fail with [`ReliabilityError::SessionClosed`].
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        lock(&self.recovery).abandon();
        self.stop_workers();
        let transport = self.link.lock().await.take();
        if let Some(transport) = transport {
            transport.close().await;
        }
        info!(session = %self.id, "session closed");
        self.deliverer.report(SessionEvent::Closed);
    }

    /// Signal the read and maintenance workers to stop.
    ///
    /// A worker finishes the message or cycle it is handling before it stops.
    pub fn stop_workers(&self) {
        lock(&self.reader_stop).take();
        lock(&self.maintenance_stop).take();
    }

    fn spawn_reader(self: &Arc<Self>, transport: Arc<T>) {
        let (stop_tx, stop_rx) = oneshot::channel();
        let previous = lock(&self.reader_stop).replace(stop_tx);
        drop(previous);

        let session = Arc::clone(self);
        let span = info_span!("session_reader", session = %self.id);
        tokio::spawn(session.read_loop(transport, stop_rx).instrument(span));
    }

    async fn read_loop(self: Arc<Self>, transport: Arc<T>, mut stop: oneshot::Receiver<()>) {
        loop {
            let received = tokio::select! {
                biased;
                _ = &mut stop => break,
                received = transport.receive() => received,
            };
            match received {
                Ok(message) => {
                    trace!(kind = %message.kind(), "message received");
                    if let Err(e) = self.on_receive(message).await {
                        debug!("inbound handling failed: {e}");
                    }
                }
                Err(e) => {
                    let failure = match e {
                        TransportError::Corrupted(_) => TransportFailure::Corrupted,
                        TransportError::Closed => TransportFailure::Closed,
                        TransportError::Io(_) => TransportFailure::Io,
                    };
                    debug!("read failed: {e}");
                    self.transport_failed(Some(&transport), failure).await;
                    break;
                }
            }
        }
        trace!("read worker stopped");
    }

    fn spawn_maintenance(self: &Arc<Self>) {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let previous = lock(&self.maintenance_stop).replace(stop_tx);
        drop(previous);

        let session = Arc::clone(self);
        let period = self
            .config
            .reliability
            .tick_interval
            .max(Duration::from_millis(1));
        let span = info_span!("session_maintenance", session = %self.id);
        tokio::spawn(
            async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                // The first tick completes immediately.
                ticker.tick().await;
                loop {
                    tokio::select! {
                        biased;
                        _ = &mut stop_rx => break,
                        _ = ticker.tick() => {}
                    }
                    session.run_maintenance().await;
                }
                trace!("maintenance stopped");
            }
            .instrument(span),
        );
    }
}

impl<T: Transport, D: Deliverer> fmt::Debug for Session<T, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.recovery_state())
            .field("closed", &self.is_closed())
            .finish()
    }
}
