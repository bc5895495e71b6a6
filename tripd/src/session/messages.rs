//! Message and error types for the session store actor

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use tripmatch::MatchResult;

use super::phase::Phase;
use super::room::ConnectionId;
use crate::net::messages::{ClientCommand, ErrorCode, ServerReply, SessionEvent};

/// Errors a command can produce, mirrored onto the wire as `error` replies
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("Session not found")]
    NotFound,

    #[error("Not authorized: host-only command")]
    NotAuthorized,

    #[error("Command not valid in phase {0}")]
    InvalidPhase(Phase),

    #[error("Session already started")]
    AlreadyStarted,
}

impl SessionError {
    /// The wire error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            SessionError::NotFound => ErrorCode::NotFound,
            SessionError::NotAuthorized => ErrorCode::NotAuthorized,
            SessionError::InvalidPhase(_) => ErrorCode::InvalidPhase,
            SessionError::AlreadyStarted => ErrorCode::AlreadyStarted,
        }
    }

    /// The wire reply for this error
    pub fn reply(&self) -> ServerReply {
        ServerReply::Error {
            code: self.code(),
            message: self.to_string(),
        }
    }
}

/// Requests processed by the session store actor
///
/// Connection tasks send `Register`/`Command`/`Disconnect`; timer and
/// matching tasks send the internal completions. Everything funnels through
/// one channel so session mutations are serialized.
#[derive(Debug)]
pub enum SessionRequest {
    /// A connection opened; its outbox receives session events
    Register {
        conn_id: ConnectionId,
        tx: mpsc::Sender<SessionEvent>,
    },

    /// A connection closed (read side hit EOF or an error)
    Disconnect { conn_id: ConnectionId },

    /// A client command; exactly one reply is always sent
    Command {
        conn_id: ConnectionId,
        command: ClientCommand,
        reply_tx: oneshot::Sender<ServerReply>,
    },

    /// A phase deadline fired (internal)
    DeadlineElapsed {
        code: String,
        phase: Phase,
        generation: u64,
    },

    /// The matching task for a session finished (internal)
    MatchingFinished { code: String, ranked: Vec<MatchResult> },

    /// Coordinator counters (programmatic access)
    GetStats { reply_tx: oneshot::Sender<StoreStats> },

    /// Stop the store loop
    Shutdown,
}

/// Store-level counters for observability
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub active_sessions: usize,
    pub connected_clients: usize,
    pub matches_computed: u64,
}
