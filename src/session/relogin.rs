//! Relogin handshake.
//!
//! The client side reconnects through a [`Connector`], proves ownership of
//! its session with the recovery secret and rebinds the session when the
//! server answers with a fresh secret. The server side hands that fresh
//! secret out on the new transport and rebinds its half of the session.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use super::session::Session;
use crate::core::{
    Connector, DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_DELAY,
    DEFAULT_RELOGIN_DELAY, Deliverer, ReliabilityError, Transport, TransportResult,
};
use crate::message::{Message, RecoverySecret, ReloginKind, ReloginMessage};

/// Timing of the client side of a relogin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReloginOptions {
    /// Connect attempts before giving up.
    pub reconnect_attempts: u32,
    /// Pause between connect attempts.
    pub reconnect_delay: Duration,
    /// Wait between connecting and sending the relogin request.
    pub relogin_delay: Duration,
    /// Time allowed for the server's answer.
    pub handshake_timeout: Duration,
}

impl Default for ReloginOptions {
    fn default() -> Self {
        Self {
            reconnect_attempts: DEFAULT_RECONNECT_ATTEMPTS,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            relogin_delay: DEFAULT_RELOGIN_DELAY,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }
}

/// Recover a client session on a new transport.
///
/// Enters recovery if the session is not recovering yet. Any failure
/// (no secret, no connection, no or wrong answer) abandons the session.
#[instrument(name = "relogin", skip_all, fields(session = %session.id()))]
pub async fn relogin<C, D>(
    session: &Arc<Session<C::Transport, D>>,
    connector: &C,
    options: &ReloginOptions,
) -> Result<(), ReliabilityError>
where
    C: Connector,
    D: Deliverer,
{
    let Some(secret) = session.recovery_secret() else {
        warn!("no recovery secret, abandoning session");
        session.abandon().await;
        return Err(ReliabilityError::NoRecoverySecret);
    };
    session.begin_recovery().await?;

    let transport = match connect(connector, options).await {
        Ok(transport) => transport,
        Err(e) => {
            warn!("reconnect failed: {e}");
            session.abandon().await;
            return Err(e.into());
        }
    };

    tokio::time::sleep(options.relogin_delay).await;
    let request = Message::from(ReloginMessage::client_request(secret));
    if let Err(e) = transport.send(&request).await {
        warn!("relogin request not sent: {e}");
        transport.close().await;
        session.abandon().await;
        return Err(e.into());
    }

    let reply = tokio::time::timeout(options.handshake_timeout, transport.receive()).await;
    match reply {
        Ok(Ok(Message::Relogin(ReloginMessage {
            kind: ReloginKind::SendSecret,
            secret: Some(fresh),
        }))) => {
            session.install_secret(fresh);
            session.complete_recovery(transport).await?;
            info!("relogin accepted");
            Ok(())
        }
        other => {
            match other {
                Ok(Ok(message)) => warn!(kind = %message.kind(), "relogin rejected"),
                Ok(Err(e)) => warn!("relogin rejected: {e}"),
                Err(_) => warn!(timeout = ?options.handshake_timeout, "relogin unanswered"),
            }
            transport.close().await;
            session.abandon().await;
            Err(ReliabilityError::RecoveryRejected)
        }
    }
}

async fn connect<C: Connector>(connector: &C, options: &ReloginOptions) -> TransportResult<C::Transport> {
    let attempts = options.reconnect_attempts.max(1);
    let mut attempt = 1;
    loop {
        match connector.connect().await {
            Ok(transport) => return Ok(transport),
            Err(e) if attempt < attempts => {
                debug!(attempt, "connect failed: {e}");
                attempt += 1;
                tokio::time::sleep(options.reconnect_delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Accept a relogin on the server side.
///
/// Sends `fresh` as the new recovery secret on `transport`, then rebinds the
/// session to it. The caller has already matched the old secret.
pub async fn accept_relogin<T, D>(
    session: &Arc<Session<T, D>>,
    transport: T,
    fresh: RecoverySecret,
) -> Result<(), ReliabilityError>
where
    T: Transport,
    D: Deliverer,
{
    let greeting = Message::from(ReloginMessage::send_secret(fresh));
    if let Err(e) = transport.send(&greeting).await {
        transport.close().await;
        return Err(e.into());
    }
    let begun = session.begin_recovery().await;
    if let Err(e) = begun {
        transport.close().await;
        return Err(e);
    }
    session.complete_recovery(transport).await
}
