//! Wire protocol for lobby connections
//!
//! JSON-over-newline on TCP. One reply per command, session events pushed in
//! between, everything scoped to the originating session's connections.

pub mod client;
pub mod listener;
pub mod messages;

pub use client::LobbyClient;
pub use messages::{ClientCommand, ErrorCode, ServerMessage, ServerReply, SessionEvent, SessionSnapshot};
