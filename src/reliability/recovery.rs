//! Recovery state
//!
//! Tracks whether a session's transport is usable, being replaced, or gone
//! for good, together with the secret that authorises a relogin.

use std::fmt;
use std::time::Duration;

use tracing::debug;

use crate::core::ReliabilityError;
use crate::message::RecoverySecret;

/// Which end of the session this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The connecting side; it drives reconnection.
    Client,
    /// The accepting side; it waits for the client to come back.
    Server,
}

/// Recovery state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryState {
    /// Transport bound and usable.
    Active,
    /// Transport lost; waiting for a replacement.
    Recovering,
    /// Permanently closed.
    Abandoned,
}

impl fmt::Display for RecoveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecoveryState::Active => "ACTIVE",
            RecoveryState::Recovering => "RECOVERING",
            RecoveryState::Abandoned => "ABANDONED",
        };
        f.write_str(name)
    }
}

/// Recovery state machine of one session.
#[derive(Debug)]
pub struct RecoveryController {
    role: Role,
    state: RecoveryState,
    secret: Option<RecoverySecret>,
    /// Time spent in the current recovery, advanced by maintenance cycles.
    recovering_for: Duration,
}

impl RecoveryController {
    /// Create an active controller.
    pub fn new(role: Role) -> Self {
        Self {
            role,
            state: RecoveryState::Active,
            secret: None,
            recovering_for: Duration::ZERO,
        }
    }

    /// Which end of the session this is.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Current state.
    pub fn state(&self) -> RecoveryState {
        self.state
    }

    /// Secret currently authorising a relogin.
    pub fn secret(&self) -> Option<&RecoverySecret> {
        self.secret.as_ref()
    }

    /// Store a secret handed over by the peer, returning the previous one.
    pub fn install_secret(&mut self, secret: RecoverySecret) -> Option<RecoverySecret> {
        self.secret.replace(secret)
    }

    /// Whether losing the transport can be survived.
    ///
    /// A client needs a secret to prove ownership of the session; a server
    /// simply waits for the client.
    pub fn can_recover(&self) -> bool {
        if self.state == RecoveryState::Abandoned {
            return false;
        }
        match self.role {
            Role::Client => self.secret.is_some(),
            Role::Server => true,
        }
    }

    /// Enter recovery.
    ///
    /// Returns `Ok(true)` when the state changed and `Ok(false)` when a
    /// recovery was already under way.
    pub fn begin(&mut self) -> Result<bool, ReliabilityError> {
        match self.state {
            RecoveryState::Active => {
                debug!(role = ?self.role, "entering recovery");
                self.state = RecoveryState::Recovering;
                self.recovering_for = Duration::ZERO;
                Ok(true)
            }
            RecoveryState::Recovering => Ok(false),
            RecoveryState::Abandoned => Err(ReliabilityError::InvalidRecoveryState(self.state)),
        }
    }

    /// Leave recovery with a new transport bound.
    pub fn complete(&mut self) -> Result<(), ReliabilityError> {
        if self.state != RecoveryState::Recovering {
            return Err(ReliabilityError::InvalidRecoveryState(self.state));
        }
        debug!(role = ?self.role, elapsed = ?self.recovering_for, "recovery complete");
        self.state = RecoveryState::Active;
        self.recovering_for = Duration::ZERO;
        Ok(())
    }

    /// Give up on the session.
    ///
    /// Returns whether the state changed.
    pub fn abandon(&mut self) -> bool {
        let changed = self.state != RecoveryState::Abandoned;
        self.state = RecoveryState::Abandoned;
        changed
    }

    /// Account one maintenance interval while recovering.
    ///
    /// Returns `true` once the recovery has lasted longer than `timeout`.
    pub fn elapse(&mut self, interval: Duration, timeout: Duration) -> bool {
        if self.state != RecoveryState::Recovering {
            return false;
        }
        self.recovering_for += interval;
        self.recovering_for > timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_and_complete() {
        let mut recovery = RecoveryController::new(Role::Server);
        assert_eq!(recovery.state(), RecoveryState::Active);

        assert!(recovery.begin().unwrap());
        assert!(!recovery.begin().unwrap());
        assert_eq!(recovery.state(), RecoveryState::Recovering);

        recovery.complete().unwrap();
        assert_eq!(recovery.state(), RecoveryState::Active);
        assert!(matches!(
            recovery.complete(),
            Err(ReliabilityError::InvalidRecoveryState(RecoveryState::Active))
        ));
    }

    #[test]
    fn test_client_needs_secret_to_recover() {
        let mut recovery = RecoveryController::new(Role::Client);
        assert!(!recovery.can_recover());

        assert!(recovery.install_secret(RecoverySecret::generate()).is_none());
        assert!(recovery.can_recover());
        assert!(recovery.install_secret(RecoverySecret::generate()).is_some());
    }

    #[test]
    fn test_abandoned_is_terminal() {
        let mut recovery = RecoveryController::new(Role::Server);
        assert!(recovery.abandon());
        assert!(!recovery.abandon());
        assert!(!recovery.can_recover());
        assert!(recovery.begin().is_err());
    }

    #[test]
    fn test_recovery_timeout() {
        let mut recovery = RecoveryController::new(Role::Server);
        let second = Duration::from_secs(1);
        let timeout = Duration::from_secs(3);

        assert!(!recovery.elapse(second, timeout));
        recovery.begin().unwrap();
        assert!(!recovery.elapse(second, timeout));
        assert!(!recovery.elapse(second, timeout));
        assert!(!recovery.elapse(second, timeout));
        assert!(recovery.elapse(second, timeout));
    }
}
