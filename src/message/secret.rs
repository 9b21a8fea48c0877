//! Recovery secrets.
//!
//! A secret is handed to a client at login and proves ownership of a session
//! when the client reconnects. Every secret is single use.

use std::fmt;

use rand::Rng;
use rand::distributions::Alphanumeric;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::core::{FrameError, SECRET_LENGTH};

/// A session recovery secret (25 alphanumeric characters).
///
/// The contents are wiped on drop and never printed by `Debug`.
#[derive(Clone, PartialEq, Eq, Hash, Zeroize, ZeroizeOnDrop)]
pub struct RecoverySecret(String);

impl RecoverySecret {
    /// Generate a fresh random secret.
    pub fn generate() -> Self {
        let secret = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(SECRET_LENGTH)
            .map(char::from)
            .collect();
        Self(secret)
    }

    /// Rebuild a secret from its wire bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FrameError> {
        let text = std::str::from_utf8(bytes).map_err(|_| FrameError::InvalidSecret)?;
        if text.is_empty() || u16::try_from(text.len()).is_err() {
            return Err(FrameError::InvalidSecret);
        }
        Ok(Self(text.to_owned()))
    }

    /// Secret text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Secret bytes as written on the wire.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for RecoverySecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RecoverySecret").field(&"[REDACTED]").finish()
    }
}
