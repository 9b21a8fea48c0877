//! Recovery secret registry.
//!
//! Maps every issued secret to the session it unlocks. Secrets are single
//! use: claiming one removes it, and the session gets a fresh one.

use std::collections::HashMap;

use crate::message::RecoverySecret;
use crate::session::SessionId;

/// Secrets issued by a server, by secret and by session.
#[derive(Debug, Default)]
pub struct SecretRegistry {
    by_secret: HashMap<RecoverySecret, SessionId>,
    by_session: HashMap<SessionId, RecoverySecret>,
}

impl SecretRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a fresh secret for `session`, invalidating its previous one.
    pub fn issue(&mut self, session: SessionId) -> RecoverySecret {
        let secret = RecoverySecret::generate();
        if let Some(previous) = self.by_session.insert(session, secret.clone()) {
            self.by_secret.remove(&previous);
        }
        self.by_secret.insert(secret.clone(), session);
        secret
    }

    /// Session a secret belongs to, without consuming it.
    pub fn lookup(&self, secret: &RecoverySecret) -> Option<SessionId> {
        self.by_secret.get(secret).copied()
    }

    /// Consume a secret, returning the session it unlocks.
    pub fn claim(&mut self, secret: &RecoverySecret) -> Option<SessionId> {
        let session = self.by_secret.remove(secret)?;
        self.by_session.remove(&session);
        Some(session)
    }

    /// Trade a presented secret for a fresh one.
    ///
    /// Returns the session and its new secret, or `None` when `secret` is
    /// unknown or was already used.
    pub fn rotate(&mut self, secret: &RecoverySecret) -> Option<(SessionId, RecoverySecret)> {
        let session = self.claim(secret)?;
        Some((session, self.issue(session)))
    }

    /// Forget the secret of a session. Returns whether one existed.
    pub fn revoke(&mut self, session: SessionId) -> bool {
        match self.by_session.remove(&session) {
            Some(secret) => {
                self.by_secret.remove(&secret);
                true
            }
            None => false,
        }
    }

    /// Number of live secrets.
    pub fn len(&self) -> usize {
        self.by_secret.len()
    }

    /// Whether no secret is live.
    pub fn is_empty(&self) -> bool {
        self.by_secret.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_and_lookup() {
        let mut registry = SecretRegistry::new();
        let session = SessionId::new(1);
        let secret = registry.issue(session);

        assert_eq!(registry.lookup(&secret), Some(session));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_reissue_invalidates_previous() {
        let mut registry = SecretRegistry::new();
        let session = SessionId::new(1);
        let first = registry.issue(session);
        let second = registry.issue(session);

        assert_eq!(registry.lookup(&first), None);
        assert_eq!(registry.lookup(&second), Some(session));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_claim_is_single_use() {
        let mut registry = SecretRegistry::new();
        let session = SessionId::new(7);
        let secret = registry.issue(session);

        assert_eq!(registry.claim(&secret), Some(session));
        assert_eq!(registry.claim(&secret), None);
        assert!(registry.is_empty());
        assert_eq!(registry.claim(&RecoverySecret::generate()), None);
    }

    #[test]
    fn test_rotate() {
        let mut registry = SecretRegistry::new();
        let session = SessionId::new(9);
        let first = registry.issue(session);

        let (owner, fresh) = registry.rotate(&first).expect("known secret");
        assert_eq!(owner, session);
        assert_ne!(fresh, first);
        assert_eq!(registry.lookup(&fresh), Some(session));
        assert!(registry.rotate(&first).is_none());
    }

    #[test]
    fn test_revoke() {
        let mut registry = SecretRegistry::new();
        let session = SessionId::new(3);
        let secret = registry.issue(session);

        assert!(registry.revoke(session));
        assert!(!registry.revoke(session));
        assert_eq!(registry.lookup(&secret), None);
    }
}
