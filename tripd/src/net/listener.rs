//! TCP listener for lobby connections
//!
//! Newline-delimited JSON over a persistent connection. Each connection gets
//! a reader task (parses commands, forwards them to the store, relays the
//! reply) and a single writer draining one outgoing queue, so replies and
//! broadcast events never interleave mid-line. Commands are processed in
//! arrival order: the reader does not pick up the next line until the store
//! has answered the previous one.

use std::net::SocketAddr;

use eyre::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::messages::{ErrorCode, ServerMessage, ServerReply, SessionEvent};
use crate::session::messages::SessionRequest;
use crate::session::room::ConnectionId;

/// Maximum accepted line length
const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Bind the lobby listener
pub async fn bind(addr: &str) -> Result<TcpListener> {
    let listener = TcpListener::bind(addr)
        .await
        .context(format!("Failed to bind lobby listener on {addr}"))?;
    info!(addr = %listener.local_addr()?, "Lobby listener bound");
    Ok(listener)
}

/// Accept connections until aborted
pub async fn run(listener: TcpListener, store: mpsc::Sender<SessionRequest>, outbox_buffer: usize) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let store = store.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, peer, store, outbox_buffer).await {
                        debug!(%peer, error = %e, "Connection ended: {e}");
                    }
                });
            }
            Err(e) => {
                warn!(error = %e, "Accept failed");
            }
        }
    }
}

/// Serve one connection until EOF, a socket error, or store shutdown
async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    store: mpsc::Sender<SessionRequest>,
    outbox_buffer: usize,
) -> Result<()> {
    let conn_id: ConnectionId = Uuid::now_v7();
    debug!(%conn_id, %peer, "Connection opened");

    let (read_half, mut write_half) = stream.into_split();

    // Register the event outbox before reading any command
    let (event_tx, mut event_rx) = mpsc::channel::<SessionEvent>(outbox_buffer);
    store
        .send(SessionRequest::Register { conn_id, tx: event_tx })
        .await
        .map_err(|_| eyre::eyre!("Session store is not running"))?;

    // Single writer: replies and events funnel through one queue
    let (out_tx, mut out_rx) = mpsc::channel::<ServerMessage>(outbox_buffer);

    let pump_tx = out_tx.clone();
    let pump = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            if pump_tx.send(ServerMessage::Event(event)).await.is_err() {
                break;
            }
        }
    });

    let writer = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            let line = match serde_json::to_string(&message) {
                Ok(line) => line,
                Err(e) => {
                    warn!(error = %e, "Failed to serialize outgoing message");
                    continue;
                }
            };
            if write_half.write_all(line.as_bytes()).await.is_err()
                || write_half.write_all(b"\n").await.is_err()
                || write_half.flush().await.is_err()
            {
                break;
            }
        }
    });

    let mut reader = BufReader::new(read_half);
    let mut line = String::new();
    loop {
        line.clear();
        let bytes_read = match reader.read_line(&mut line).await {
            Ok(n) => n,
            Err(e) => {
                debug!(%conn_id, error = %e, "Read failed");
                break;
            }
        };
        if bytes_read == 0 {
            break;
        }
        if bytes_read > MAX_MESSAGE_SIZE {
            warn!(%conn_id, bytes_read, "Oversized message, closing connection");
            break;
        }
        if line.trim().is_empty() {
            continue;
        }

        let command = match serde_json::from_str(line.trim()) {
            Ok(command) => command,
            Err(e) => {
                debug!(%conn_id, error = %e, "Unparseable command");
                let reply = ServerReply::Error {
                    code: ErrorCode::BadRequest,
                    message: "Invalid message format".to_string(),
                };
                if out_tx.send(ServerMessage::Reply(reply)).await.is_err() {
                    break;
                }
                continue;
            }
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        if store
            .send(SessionRequest::Command {
                conn_id,
                command,
                reply_tx,
            })
            .await
            .is_err()
        {
            // Store shut down; nothing more to serve
            break;
        }
        match reply_rx.await {
            Ok(reply) => {
                if out_tx.send(ServerMessage::Reply(reply)).await.is_err() {
                    break;
                }
            }
            Err(_) => break,
        }
    }

    // Leaving the session happens store-side; dropping the outbox sender
    // chain lets the pump and writer drain and finish.
    let _ = store.send(SessionRequest::Disconnect { conn_id }).await;
    drop(out_tx);
    let _ = pump.await;
    let _ = writer.await;

    debug!(%conn_id, "Connection closed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TravelConfig;
    use crate::net::client::LobbyClient;
    use crate::net::messages::ClientCommand;
    use crate::session::config::SessionConfig;
    use crate::session::core::SessionStore;
    use std::sync::Arc;
    use tripmatch::StaticProvider;

    async fn spawn_server() -> String {
        let store = SessionStore::new(
            SessionConfig::default(),
            TravelConfig::default(),
            Arc::new(StaticProvider::new()),
        );
        let store_tx = store.sender();
        tokio::spawn(store.run());

        let listener = bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(run(listener, store_tx, 64));
        addr
    }

    #[tokio::test]
    async fn test_ping_over_the_wire() {
        let addr = spawn_server().await;
        let mut client = LobbyClient::connect(&addr).await.unwrap();
        let version = client.ping().await.unwrap();
        assert_eq!(version, crate::daemon::VERSION);
    }

    #[tokio::test]
    async fn test_create_session_over_the_wire() {
        let addr = spawn_server().await;
        let mut client = LobbyClient::connect(&addr).await.unwrap();

        let reply = client
            .send(&ClientCommand::CreateSession {
                display_name: "Maria".to_string(),
            })
            .await
            .unwrap();
        match reply {
            ServerReply::SessionCreated { code, members, .. } => {
                assert_eq!(code.len(), 6);
                assert_eq!(members.len(), 1);
                assert!(members[0].is_host);
            }
            other => panic!("Expected sessionCreated, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_garbage_line_gets_bad_request_not_disconnect() {
        let addr = spawn_server().await;
        let mut client = LobbyClient::connect(&addr).await.unwrap();

        let reply = client.send_raw("this is not json").await.unwrap();
        assert!(matches!(
            reply,
            ServerReply::Error {
                code: ErrorCode::BadRequest,
                ..
            }
        ));

        // The connection survives bad input
        assert!(client.ping().await.is_ok());
    }

    #[tokio::test]
    async fn test_events_reach_other_members() {
        let addr = spawn_server().await;
        let mut host = LobbyClient::connect(&addr).await.unwrap();
        let mut guest = LobbyClient::connect(&addr).await.unwrap();

        let code = match host
            .send(&ClientCommand::CreateSession {
                display_name: "Maria".to_string(),
            })
            .await
            .unwrap()
        {
            ServerReply::SessionCreated { code, .. } => code,
            other => panic!("Expected sessionCreated, got {other:?}"),
        };

        guest
            .send(&ClientCommand::JoinSession {
                code,
                display_name: "Alex".to_string(),
            })
            .await
            .unwrap();

        match host.next_event().await.unwrap() {
            SessionEvent::MemberJoined { member } => assert_eq!(member.display_name, "Alex"),
            other => panic!("Expected memberJoined, got {other:?}"),
        }
    }
}
