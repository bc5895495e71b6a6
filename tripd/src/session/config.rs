//! Session store configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Timing and buffering knobs for the session store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Personal-info phase deadline, armed at phase entry
    #[serde(rename = "personal-info-deadline-ms")]
    pub personal_info_deadline_ms: u64,

    /// Quiz phase deadline, armed when the first member finishes
    #[serde(rename = "quiz-deadline-ms")]
    pub quiz_deadline_ms: u64,

    /// Length of the end-of-session countdown
    #[serde(rename = "countdown-ms")]
    pub countdown_ms: u64,

    /// Store command channel capacity
    #[serde(rename = "command-buffer")]
    pub command_buffer: usize,

    /// Per-connection event outbox capacity
    #[serde(rename = "outbox-buffer")]
    pub outbox_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            personal_info_deadline_ms: 25_000,
            quiz_deadline_ms: 30_000,
            countdown_ms: 5_000,
            command_buffer: 256,
            outbox_buffer: 64,
        }
    }
}

impl SessionConfig {
    pub fn personal_info_deadline(&self) -> Duration {
        Duration::from_millis(self.personal_info_deadline_ms)
    }

    pub fn quiz_deadline(&self) -> Duration {
        Duration::from_millis(self.quiz_deadline_ms)
    }

    pub fn countdown(&self) -> Duration {
        Duration::from_millis(self.countdown_ms)
    }
}
