//! Tether Protocol - Server Library
//!
//! High-level API for Tether servers.

mod group;
mod registry;
#[allow(clippy::module_inception)]
mod server;

pub use group::*;
pub use registry::*;
pub use server::*;
