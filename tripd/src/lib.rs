//! TripDaemon - trip-planning lobby coordinator
//!
//! TripDaemon coordinates short-lived multi-participant decision sessions
//! ("lobbies") over persistent connections. A group creates a lobby with a
//! six-character code, answers a budget/origin questionnaire and a binary
//! trip-style quiz, and gets back the destinations every member can afford,
//! ranked by group preference fit.
//!
//! # Core Concepts
//!
//! - **One actor owns everything**: all session mutations funnel through a
//!   single store task, so there are no locks and no interleaving hazards
//! - **Deadlines race completions**: every questionnaire phase advances on
//!   full completion or on a timer, whichever is processed first
//! - **State is volatile**: sessions live in process memory only; a restart
//!   forgets them by design
//!
//! # Modules
//!
//! - [`session`] - session store actor, phase machine, completion tracking
//! - [`net`] - wire protocol, TCP listener, client
//! - [`quiz`] - the binary questionnaire and its attribute mapping
//! - [`config`] - configuration types and loading
//! - [`daemon`] - process management (PID files, signals)
//! - [`cli`] - command-line interface

pub mod cli;
pub mod config;
pub mod daemon;
pub mod net;
pub mod quiz;
pub mod session;

// Re-export commonly used types
pub use config::{Config, ServerConfig, TravelConfig};
pub use daemon::{DaemonManager, DaemonStatus, RunInfo, VERSION};
pub use net::{ClientCommand, ErrorCode, LobbyClient, ServerMessage, ServerReply, SessionEvent, SessionSnapshot};
pub use quiz::{QUIZ_QUESTIONS, QuizChoice, preferences_from_choices};
pub use session::{
    CompletionTracker, ConnectionId, Member, PersonalInfo, Phase, PhaseAnswer, Session, SessionConfig, SessionError,
    SessionRequest, SessionStore, StoreStats,
};
