//! End-to-end session recovery over loopback TCP.

#![cfg(all(feature = "client", feature = "server"))]

use std::net::SocketAddr;
use std::time::Duration;

use tether_protocol::client::{ClientConfig, ClientEvent, TetherClient, TetherClientBuilder};
use tether_protocol::reliability::{RecoveryState, ReliabilityConfig};
use tether_protocol::server::{ServerEvent, TetherServer, TetherServerBuilder};
use tether_protocol::session::ReloginOptions;
use tether_protocol::{SessionConfig, SessionId};
use tokio::sync::mpsc::UnboundedReceiver;

const WAIT: Duration = Duration::from_secs(10);

fn session_config() -> SessionConfig {
    SessionConfig {
        reliability: ReliabilityConfig {
            tick_interval: Duration::from_millis(20),
            ..ReliabilityConfig::default()
        },
        recovery_timeout: Duration::from_secs(5),
    }
}

fn client_config(addr: SocketAddr) -> ClientConfig {
    TetherClientBuilder::new()
        .server_addr(addr)
        .relogin(ReloginOptions {
            reconnect_attempts: 3,
            reconnect_delay: Duration::from_millis(20),
            relogin_delay: Duration::from_millis(20),
            handshake_timeout: Duration::from_secs(2),
        })
        .session(session_config())
        .build()
}

async fn start_server() -> (TetherServer, UnboundedReceiver<ServerEvent>) {
    let config = TetherServerBuilder::new()
        .bind_addr("127.0.0.1:0".parse().expect("valid address"))
        .session(session_config())
        .build();
    TetherServer::bind(config).await.expect("bind")
}

/// Wait for the first event `pick` accepts, skipping the others.
async fn wait_for<E, T>(events: &mut UnboundedReceiver<E>, mut pick: impl FnMut(E) -> Option<T>) -> T {
    tokio::time::timeout(WAIT, async {
        loop {
            let event = events.recv().await.expect("event stream open");
            if let Some(found) = pick(event) {
                return found;
            }
        }
    })
    .await
    .expect("event in time")
}

async fn server_message(events: &mut UnboundedReceiver<ServerEvent>) -> (SessionId, Vec<u8>) {
    wait_for(events, |event| match event {
        ServerEvent::MessageReceived { session_id, message } => {
            Some((session_id, message.into_payload()))
        }
        _ => None,
    })
    .await
}

async fn client_message(events: &mut UnboundedReceiver<ClientEvent>) -> Vec<u8> {
    wait_for(events, |event| match event {
        ClientEvent::Message(message) => Some(message.into_payload()),
        _ => None,
    })
    .await
}

async fn client_event(events: &mut UnboundedReceiver<ClientEvent>, wanted: ClientEvent) {
    wait_for(events, |event| (event == wanted).then_some(())).await
}

#[tokio::test]
async fn test_session_survives_corruption_marker() {
    let (server, mut server_events) = start_server().await;
    let (client, mut client_events) = TetherClient::connect(client_config(server.local_addr()))
        .await
        .expect("connect");

    client.send(b"one".to_vec()).await.expect("send");
    let (session_id, payload) = server_message(&mut server_events).await;
    assert_eq!(payload, b"one");
    client_event(&mut client_events, ClientEvent::SecretReceived).await;
    let first_secret = client.session().recovery_secret().expect("secret");

    server
        .send_corruption_marker(session_id)
        .await
        .expect("marker");
    client_event(&mut client_events, ClientEvent::Recovered).await;
    wait_for(&mut server_events, |event| {
        (event == ServerEvent::ClientRecovered { session_id }).then_some(())
    })
    .await;

    assert_eq!(client.recovery_state(), RecoveryState::Active);
    let second_secret = client.session().recovery_secret().expect("secret");
    assert_ne!(first_secret, second_secret);
    assert_eq!(server.session_count(), 1);

    client.send(b"two".to_vec()).await.expect("send");
    assert_eq!(server_message(&mut server_events).await, (session_id, b"two".to_vec()));

    server
        .send_to(session_id, b"three".to_vec())
        .await
        .expect("send");
    assert_eq!(client_message(&mut client_events).await, b"three");

    client.close().await;
    server.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn test_messages_queued_during_recovery_arrive_once() {
    let (server, mut server_events) = start_server().await;
    let (client, mut client_events) = TetherClient::connect(client_config(server.local_addr()))
        .await
        .expect("connect");

    client.send(b"hello".to_vec()).await.expect("send");
    let (session_id, _) = server_message(&mut server_events).await;
    client_event(&mut client_events, ClientEvent::SecretReceived).await;

    client.send_corruption_marker().await.expect("marker");
    client_event(&mut client_events, ClientEvent::Recovering).await;
    for index in 0..5u8 {
        client.send(vec![index]).await.expect("queued");
    }
    client_event(&mut client_events, ClientEvent::Recovered).await;

    let mut received = Vec::new();
    while received.len() < 5 {
        let (from, payload) = server_message(&mut server_events).await;
        assert_eq!(from, session_id);
        received.push(payload);
    }
    assert_eq!(received, (0..5u8).map(|index| vec![index]).collect::<Vec<_>>());

    // Retransmissions are not delivered a second time.
    tokio::time::sleep(Duration::from_millis(500)).await;
    while let Ok(event) = server_events.try_recv() {
        assert!(
            !matches!(event, ServerEvent::MessageReceived { .. }),
            "unexpected delivery {event:?}"
        );
    }
    tokio::time::timeout(WAIT, async {
        while client.pending_count() > 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("all acknowledged");
}

#[tokio::test]
async fn test_disconnected_session_cannot_relogin() {
    let (server, mut server_events) = start_server().await;
    let (client, mut client_events) = TetherClient::connect(client_config(server.local_addr()))
        .await
        .expect("connect");

    client.send(b"hello".to_vec()).await.expect("send");
    let (session_id, _) = server_message(&mut server_events).await;
    client_event(&mut client_events, ClientEvent::SecretReceived).await;

    server.disconnect(session_id).await.expect("disconnect");

    client_event(&mut client_events, ClientEvent::Abandoned).await;
    assert_eq!(client.recovery_state(), RecoveryState::Abandoned);
    assert_eq!(server.session_count(), 0);
}
