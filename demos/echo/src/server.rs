//! Echo, broadcast and group servers.
//!
//! The echo server answers every message to its sender. The broadcast
//! server forwards every message to all connected clients. The group server
//! puts clients into fixed-size groups by login order and forwards every
//! message to the sender's group.

use std::net::SocketAddr;

use tether_protocol::SessionConfig;
use tether_protocol::server::{ServerEvent, TetherServer, TetherServerBuilder};
use tracing::{info, warn};

use crate::DemoError;

/// Where a received message goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routing {
    /// Back to its sender.
    Echo,
    /// To every client.
    Broadcast,
    /// To the sender's group of this size.
    Group(usize),
}

/// Serve until Ctrl-C.
pub async fn run(bind_addr: SocketAddr, session: SessionConfig, routing: Routing) -> Result<(), DemoError> {
    let mut builder = TetherServerBuilder::new().bind_addr(bind_addr).session(session);
    if let Routing::Group(size) = routing {
        builder = builder.group_size(size);
    }
    let (server, mut events) = TetherServer::bind(builder.build()).await?;
    info!(addr = %server.local_addr(), ?routing, "serving");

    loop {
        let event = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => event,
        };
        let Some(event) = event else { break };
        handle(&server, event, routing).await;
    }

    server.shutdown().await?;
    Ok(())
}

async fn handle(server: &TetherServer, event: ServerEvent, routing: Routing) {
    match event {
        ServerEvent::MessageReceived { session_id, message } => {
            let payload = message.into_payload();
            match routing {
                Routing::Echo => {
                    if let Err(e) = server.send_to(session_id, payload).await {
                        warn!(session = %session_id, "echo failed: {e}");
                    }
                }
                Routing::Broadcast => {
                    let reached = server.broadcast(payload).await;
                    info!(from = %session_id, reached, "broadcast");
                }
                Routing::Group(_) => match server.broadcast_group(session_id, payload).await {
                    Ok(reached) => info!(from = %session_id, reached, "group broadcast"),
                    Err(e) => warn!(session = %session_id, "group broadcast failed: {e}"),
                },
            }
        }
        ServerEvent::ClientConnected { session_id, peer_addr } => {
            info!(session = %session_id, peer = %peer_addr, "client connected");
        }
        ServerEvent::GroupFormed { group_id, members } => {
            info!(group = %group_id, size = members.len(), "group formed");
        }
        ServerEvent::MessageLost { session_id, message_id, retries } => {
            warn!(session = %session_id, message = %message_id, retries, "message lost");
        }
        ServerEvent::ClientRecovering { session_id } => {
            info!(session = %session_id, "client recovering");
        }
        ServerEvent::ClientRecovered { session_id } => {
            info!(session = %session_id, "client recovered");
        }
        ServerEvent::ClientDisconnected { session_id } => {
            info!(session = %session_id, "client disconnected");
        }
    }
}
