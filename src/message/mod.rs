//! Tether message model.
//!
//! Implements:
//! - The tagged message variants exchanged between peers
//! - The `Securable` capability of application messages
//! - Recovery secrets used by relogin control messages

mod model;
mod secret;

pub use model::*;
pub use secret::*;
