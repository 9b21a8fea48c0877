//! Interactive client.
//!
//! Sends every stdin line as a message and prints what the server sends
//! back. The line `/corrupt` writes a corruption marker, which makes the
//! server request a relogin.

use std::net::SocketAddr;

use tether_protocol::SessionConfig;
use tether_protocol::client::{ClientEvent, TetherClient, TetherClientBuilder};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::DemoError;

/// Run until stdin ends or the session is gone.
pub async fn run(server_addr: SocketAddr, session: SessionConfig) -> Result<(), DemoError> {
    let config = TetherClientBuilder::new()
        .server_addr(server_addr)
        .session(session)
        .build();
    let (client, mut events) = TetherClient::connect(config).await?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim() == "/corrupt" {
                    client.send_corruption_marker().await?;
                } else {
                    client.send(line.into_bytes()).await?;
                }
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                if !report(event) {
                    break;
                }
            }
        }
    }

    client.close().await;
    Ok(())
}

/// Print one event. Returns `false` once the session is over.
fn report(event: ClientEvent) -> bool {
    match event {
        ClientEvent::Message(message) => {
            println!("< {}", String::from_utf8_lossy(message.payload()));
        }
        ClientEvent::MessageLost { message_id, retries } => {
            warn!(message = %message_id, retries, "message lost");
        }
        ClientEvent::SecretReceived => info!("recovery secret received"),
        ClientEvent::Recovering => info!("connection lost, recovering"),
        ClientEvent::Recovered => info!("session recovered"),
        ClientEvent::Abandoned => {
            warn!("session abandoned");
            return false;
        }
        ClientEvent::Closed => return false,
    }
    true
}
