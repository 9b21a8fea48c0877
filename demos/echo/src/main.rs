//! Tether Echo Demo
//!
//! Runs an echo server, a broadcast server, a group server or an
//! interactive client.
//!
//! Environment variables:
//! - TETHER_MODE: "server" (echo), "broadcast", "group" or "client"
//! - TETHER_GROUP_SIZE: Clients per group (group mode, default 2)
//! - TETHER_BIND_ADDR: Bind address (servers only, default 0.0.0.0:7331)
//! - TETHER_SERVER_ADDR: Server address (client only, default 127.0.0.1:7331)
//! - TETHER_TICK_MS: Maintenance interval in milliseconds (default 1000)
//! - RUST_LOG: tracing filter (default info)

mod client;
mod server;

use std::net::{AddrParseError, SocketAddr};
use std::num::ParseIntError;
use std::time::Duration;

use tether_protocol::SessionConfig;
use tether_protocol::client::ClientError;
use tether_protocol::server::ServerError;
use thiserror::Error;

use crate::server::Routing;

/// Errors ending the demo.
#[derive(Debug, Error)]
pub enum DemoError {
    /// An environment variable has an unusable value.
    #[error("invalid {name}: {reason}")]
    InvalidEnv {
        /// Variable name.
        name: &'static str,
        /// What is wrong with it.
        reason: String,
    },

    /// Server failure.
    #[error(transparent)]
    Server(#[from] ServerError),

    /// Client failure.
    #[error(transparent)]
    Client(#[from] ClientError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Which side of the demo to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Server(Routing),
    Client,
}

fn mode() -> Result<Mode, DemoError> {
    let raw = std::env::var("TETHER_MODE").unwrap_or_else(|_| "server".to_string());
    match raw.as_str() {
        "server" | "echo" => Ok(Mode::Server(Routing::Echo)),
        "broadcast" => Ok(Mode::Server(Routing::Broadcast)),
        "group" => Ok(Mode::Server(Routing::Group(group_size()?))),
        "client" => Ok(Mode::Client),
        other => Err(DemoError::InvalidEnv {
            name: "TETHER_MODE",
            reason: format!("unknown mode {other:?}"),
        }),
    }
}

fn group_size() -> Result<usize, DemoError> {
    let raw = std::env::var("TETHER_GROUP_SIZE").unwrap_or_else(|_| "2".to_string());
    match raw.parse::<usize>() {
        Ok(size) if size > 0 => Ok(size),
        Ok(_) => Err(DemoError::InvalidEnv {
            name: "TETHER_GROUP_SIZE",
            reason: "must be at least 1".to_string(),
        }),
        Err(e) => Err(DemoError::InvalidEnv {
            name: "TETHER_GROUP_SIZE",
            reason: e.to_string(),
        }),
    }
}

fn addr(name: &'static str, default: &str) -> Result<SocketAddr, DemoError> {
    let raw = std::env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse().map_err(|e: AddrParseError| DemoError::InvalidEnv {
        name,
        reason: e.to_string(),
    })
}

fn session_config() -> Result<SessionConfig, DemoError> {
    let mut config = SessionConfig::default();
    if let Ok(raw) = std::env::var("TETHER_TICK_MS") {
        let millis: u64 = raw.parse().map_err(|e: ParseIntError| DemoError::InvalidEnv {
            name: "TETHER_TICK_MS",
            reason: e.to_string(),
        })?;
        config.reliability.tick_interval = Duration::from_millis(millis.max(1));
    }
    Ok(config)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run().await {
        eprintln!("tether-echo: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), DemoError> {
    let session = session_config()?;
    match mode()? {
        Mode::Server(routing) => {
            server::run(addr("TETHER_BIND_ADDR", "0.0.0.0:7331")?, session, routing).await
        }
        Mode::Client => client::run(addr("TETHER_SERVER_ADDR", "127.0.0.1:7331")?, session).await,
    }
}
