//! Tether Protocol - Client Library
//!
//! High-level API for Tether clients.

#[allow(clippy::module_inception)]
mod client;

pub use client::*;
