//! Client side of the lobby wire protocol
//!
//! Used by the CLI (`tripd ping`, `tripd daemon stop`) and by integration
//! tests. Holds one persistent connection; events that arrive while waiting
//! for a reply are queued and can be read with [`LobbyClient::next_event`].

use std::collections::VecDeque;
use std::time::Duration;

use eyre::{Context, Result, eyre};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::debug;

use super::messages::{ClientCommand, ServerMessage, ServerReply, SessionEvent};
use crate::session::messages::StoreStats;

/// Default timeout for client operations
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// A persistent lobby connection
pub struct LobbyClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    timeout: Duration,
    pending_events: VecDeque<SessionEvent>,
}

impl LobbyClient {
    /// Connect to a running coordinator
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = tokio::time::timeout(DEFAULT_TIMEOUT, TcpStream::connect(addr))
            .await
            .context("Connection timeout")?
            .context(format!("Failed to connect to coordinator at {addr}"))?;
        let (read_half, write_half) = stream.into_split();

        Ok(Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            timeout: DEFAULT_TIMEOUT,
            pending_events: VecDeque::new(),
        })
    }

    /// Set a custom timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Send a command and wait for its reply, queueing any events in between
    pub async fn send(&mut self, command: &ClientCommand) -> Result<ServerReply> {
        let line = serde_json::to_string(command).context("Failed to serialize command")?;
        self.send_raw(&line).await
    }

    /// Send a raw line (test hook for malformed input)
    pub async fn send_raw(&mut self, line: &str) -> Result<ServerReply> {
        debug!(%line, "LobbyClient: sending");
        tokio::time::timeout(self.timeout, async {
            self.writer.write_all(line.as_bytes()).await.context("Failed to write command")?;
            self.writer.write_all(b"\n").await.context("Failed to write newline")?;
            self.writer.flush().await.context("Failed to flush")?;
            Ok::<_, eyre::Error>(())
        })
        .await
        .context("Write timeout")??;

        loop {
            match self.read_message().await? {
                ServerMessage::Reply(reply) => return Ok(reply),
                ServerMessage::Event(event) => self.pending_events.push_back(event),
            }
        }
    }

    /// Next broadcast event, either queued or read from the wire
    pub async fn next_event(&mut self) -> Result<SessionEvent> {
        if let Some(event) = self.pending_events.pop_front() {
            return Ok(event);
        }
        loop {
            match self.read_message().await? {
                ServerMessage::Event(event) => return Ok(event),
                ServerMessage::Reply(reply) => {
                    // A reply with no command in flight is a protocol error
                    return Err(eyre!("Unexpected reply while waiting for event: {reply:?}"));
                }
            }
        }
    }

    async fn read_message(&mut self) -> Result<ServerMessage> {
        let mut line = String::new();
        tokio::time::timeout(self.timeout, self.reader.read_line(&mut line))
            .await
            .context("Read timeout")?
            .context("Failed to read from coordinator")?;

        if line.is_empty() {
            return Err(eyre!("Coordinator closed the connection"));
        }

        serde_json::from_str(line.trim()).context("Failed to parse coordinator message")
    }

    /// Check the coordinator is alive and get its version
    pub async fn ping(&mut self) -> Result<String> {
        match self.send(&ClientCommand::Ping).await? {
            ServerReply::Pong { version } => Ok(version),
            ServerReply::Error { message, .. } => Err(eyre!("Coordinator error: {message}")),
            other => Err(eyre!("Unexpected response: {other:?}")),
        }
    }

    /// Fetch coordinator counters
    pub async fn stats(&mut self) -> Result<StoreStats> {
        match self.send(&ClientCommand::Stats).await? {
            ServerReply::Stats(stats) => Ok(stats),
            ServerReply::Error { message, .. } => Err(eyre!("Coordinator error: {message}")),
            other => Err(eyre!("Unexpected response: {other:?}")),
        }
    }

    /// Ask the coordinator to stop gracefully
    pub async fn shutdown(&mut self) -> Result<()> {
        match self.send(&ClientCommand::Shutdown).await? {
            ServerReply::Ack => Ok(()),
            ServerReply::Error { message, .. } => Err(eyre!("Coordinator error: {message}")),
            other => Err(eyre!("Unexpected response: {other:?}")),
        }
    }
}
