//! Session lifecycle phases
//!
//! A session moves forward through these phases and never backward, except
//! through an explicit host reset to `Waiting`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Ordered lifecycle phases of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    Waiting,
    PersonalInfo,
    PreferenceQuiz,
    ResultsProcessing,
    Countdown,
    Done,
}

impl Phase {
    /// The phase that follows this one, if any
    pub fn next(&self) -> Option<Phase> {
        match self {
            Phase::Waiting => Some(Phase::PersonalInfo),
            Phase::PersonalInfo => Some(Phase::PreferenceQuiz),
            Phase::PreferenceQuiz => Some(Phase::ResultsProcessing),
            Phase::ResultsProcessing => Some(Phase::Countdown),
            Phase::Countdown => Some(Phase::Done),
            Phase::Done => None,
        }
    }

    /// Whether members submit answers during this phase
    pub fn accepts_answers(&self) -> bool {
        matches!(self, Phase::PersonalInfo | Phase::PreferenceQuiz)
    }

    /// Wire name, matching the serde representation
    pub fn name(&self) -> &'static str {
        match self {
            Phase::Waiting => "waiting",
            Phase::PersonalInfo => "personalInfo",
            Phase::PreferenceQuiz => "preferenceQuiz",
            Phase::ResultsProcessing => "resultsProcessing",
            Phase::Countdown => "countdown",
            Phase::Done => "done",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
