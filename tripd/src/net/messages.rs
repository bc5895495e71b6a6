//! Wire message types for lobby connections
//!
//! JSON-over-newline protocol. Each line is one message. Clients send
//! commands; the server answers every command with exactly one reply, and
//! pushes session events in between. Field names are camelCase to match the
//! mobile client.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use tripmatch::{MatchResult, TravelWindow};

use crate::quiz::QuizChoice;
use crate::session::messages::StoreStats;
use crate::session::phase::Phase;
use crate::session::room::{ConnectionId, Member, PersonalInfo};

/// Commands from a client connection to the coordinator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "cmd", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientCommand {
    /// Open a new lobby with the caller as host
    CreateSession { display_name: String },

    /// Join an existing lobby that has not started yet
    JoinSession { code: String, display_name: String },

    /// Host only: leave `waiting` and begin the questionnaire
    StartSession,

    /// Submit the personal-info payload for the current phase
    SubmitPersonalInfo {
        origin_airport: String,
        budget: u32,
        has_license: bool,
    },

    /// Submit the ordered left/right quiz choices
    SubmitQuiz { choices: Vec<QuizChoice> },

    /// Fetch a full snapshot of the caller's session
    GetSessionState,

    /// Host only: destroy the session for everyone
    CloseSession,

    /// Host only: full reset back to `waiting`
    ResetSession,

    /// Coordinator-level counters
    Stats,

    /// Liveness check
    Ping,

    /// Request the coordinator to stop gracefully
    Shutdown,
}

/// Error codes surfaced to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorCode {
    NotFound,
    NotAuthorized,
    InvalidPhase,
    AlreadyStarted,
    /// The line was not a parseable command (wire-level only)
    BadRequest,
}

/// Replies to commands; every command gets exactly one
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerReply {
    SessionCreated {
        code: String,
        connection_id: ConnectionId,
        members: Vec<Member>,
        host_id: ConnectionId,
    },

    SessionJoined {
        code: String,
        connection_id: ConnectionId,
        members: Vec<Member>,
        host_id: ConnectionId,
    },

    /// Plain acknowledgment
    Ack,

    /// Answer accepted; how far the phase has progressed
    SubmissionRecorded { completed_count: usize, total: usize },

    SessionState(SessionSnapshot),

    Stats(StoreStats),

    Pong { version: String },

    Error { code: ErrorCode, message: String },
}

/// Events broadcast to every connection in a session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum SessionEvent {
    MemberJoined { member: Member },
    MemberLeft { connection_id: ConnectionId },
    HostChanged { new_host_id: ConnectionId },
    PhaseChanged { phase: Phase },
    PersonalInfoStatus { completed: usize, total: usize },
    PersonalInfoDeadlineReached,
    QuizStatus { completed: usize, total: usize },
    QuizDeadlineReached,
    MatchingComplete { success: bool, result: Option<MatchResult> },
    SessionClosed,
}

/// Anything the server writes on a connection
///
/// Events carry an `event` tag, replies a `type` tag, so the untagged
/// resolution is unambiguous.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ServerMessage {
    Event(SessionEvent),
    Reply(ServerReply),
}

/// Full, deterministic view of one session
///
/// Ordered containers only: serializing the same state twice yields
/// byte-identical JSON.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub code: String,
    pub phase: Phase,
    pub host_id: ConnectionId,
    pub members: Vec<Member>,
    pub travel_window: TravelWindow,
    pub personal_info: BTreeMap<ConnectionId, PersonalInfo>,
    pub quiz_answers: BTreeMap<ConnectionId, Vec<QuizChoice>>,
    /// Phase name -> ids recorded as complete
    pub completion: BTreeMap<String, BTreeSet<ConnectionId>>,
    pub selected_destination: Option<MatchResult>,
}
