//! Per-session state: members, answers, completion tracking, timers
//!
//! Everything here is owned by the session store actor and only ever touched
//! from its run loop; nothing in this module is shared or locked.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use uuid::Uuid;

use tripmatch::{ItineraryCache, MatchResult, TravelWindow};

use super::phase::Phase;
use crate::quiz::QuizChoice;

/// Identifies one live connection for its whole lifetime
pub type ConnectionId = Uuid;

/// Character set for session codes
const CODE_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Session code length
pub const CODE_LENGTH: usize = 6;

/// Generate a random session code (uniqueness is the caller's concern)
pub fn random_code() -> String {
    use rand::Rng;
    let mut rng = rand::rng();
    (0..CODE_LENGTH)
        .map(|_| CODE_CHARSET[rng.random_range(0..CODE_CHARSET.len())] as char)
        .collect()
}

/// One member of a session, in join order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub connection_id: ConnectionId,
    pub display_name: String,
    pub is_host: bool,
}

/// Personal-info phase payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonalInfo {
    /// IATA code of the member's origin airport
    pub origin_airport: String,
    /// Budget in whole euros
    pub budget: u32,
    pub has_license: bool,
}

/// A phase-keyed answer payload, validated at the wire boundary
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseAnswer {
    PersonalInfo(PersonalInfo),
    Quiz(Vec<QuizChoice>),
}

impl PhaseAnswer {
    /// The phase this payload belongs to
    pub fn phase(&self) -> Phase {
        match self {
            PhaseAnswer::PersonalInfo(_) => Phase::PersonalInfo,
            PhaseAnswer::Quiz(_) => Phase::PreferenceQuiz,
        }
    }
}

/// Who has answered which phase
///
/// An id appears in a completion set only when the matching answers map has
/// an entry; [`Session::record_answer`] is the single mutation path that
/// keeps both in step.
#[derive(Debug, Clone, Default)]
pub struct CompletionTracker {
    personal_info: BTreeSet<ConnectionId>,
    quiz: BTreeSet<ConnectionId>,
}

impl CompletionTracker {
    fn set(&self, phase: Phase) -> Option<&BTreeSet<ConnectionId>> {
        match phase {
            Phase::PersonalInfo => Some(&self.personal_info),
            Phase::PreferenceQuiz => Some(&self.quiz),
            _ => None,
        }
    }

    fn set_mut(&mut self, phase: Phase) -> Option<&mut BTreeSet<ConnectionId>> {
        match phase {
            Phase::PersonalInfo => Some(&mut self.personal_info),
            Phase::PreferenceQuiz => Some(&mut self.quiz),
            _ => None,
        }
    }

    /// Mark a member complete for a phase; idempotent
    pub fn record(&mut self, phase: Phase, member: ConnectionId) {
        if let Some(set) = self.set_mut(phase) {
            set.insert(member);
        }
    }

    /// How many of the given members have completed the phase
    ///
    /// Departed members may linger in the set; only current members count.
    pub fn completed_count(&self, members: &[Member], phase: Phase) -> usize {
        match self.set(phase) {
            Some(set) => members.iter().filter(|m| set.contains(&m.connection_id)).count(),
            None => 0,
        }
    }

    /// Whether every current member has completed the phase
    pub fn is_complete(&self, members: &[Member], phase: Phase) -> bool {
        !members.is_empty() && self.completed_count(members, phase) == members.len()
    }

    /// Ids recorded for a phase, for snapshots
    pub fn recorded(&self, phase: Phase) -> BTreeSet<ConnectionId> {
        self.set(phase).cloned().unwrap_or_default()
    }

    pub fn clear(&mut self) {
        self.personal_info.clear();
        self.quiz.clear();
    }
}

/// An armed phase deadline
///
/// The generation stamps the arming; a fired timer whose generation no
/// longer matches the session's counter is stale and ignored.
#[derive(Debug)]
pub struct DeadlineTimer {
    pub phase: Phase,
    pub generation: u64,
    pub handle: JoinHandle<()>,
}

/// One trip-planning lobby
#[derive(Debug)]
pub struct Session {
    pub code: String,
    pub host: ConnectionId,
    pub members: Vec<Member>,
    pub phase: Phase,
    pub personal_info: BTreeMap<ConnectionId, PersonalInfo>,
    pub quiz_answers: BTreeMap<ConnectionId, Vec<QuizChoice>>,
    pub completion: CompletionTracker,
    pub deadline: Option<DeadlineTimer>,
    pub timer_generation: u64,
    pub travel_window: TravelWindow,
    pub selected_destination: Option<MatchResult>,
    pub cache: Arc<ItineraryCache>,
}

impl Session {
    /// Create a session with its creator as sole member and host
    pub fn new(code: String, host: ConnectionId, display_name: String, travel_window: TravelWindow) -> Self {
        Self {
            code,
            host,
            members: vec![Member {
                connection_id: host,
                display_name,
                is_host: true,
            }],
            phase: Phase::Waiting,
            personal_info: BTreeMap::new(),
            quiz_answers: BTreeMap::new(),
            completion: CompletionTracker::default(),
            deadline: None,
            timer_generation: 0,
            travel_window,
            selected_destination: None,
            cache: Arc::new(ItineraryCache::new()),
        }
    }

    pub fn member(&self, conn_id: ConnectionId) -> Option<&Member> {
        self.members.iter().find(|m| m.connection_id == conn_id)
    }

    /// Append a joining member (only legal while waiting; caller checks)
    pub fn add_member(&mut self, conn_id: ConnectionId, display_name: String) -> Member {
        let member = Member {
            connection_id: conn_id,
            display_name,
            is_host: false,
        };
        self.members.push(member.clone());
        member
    }

    /// Remove a member; if they held host authority, promote the first
    /// remaining member by join order. Returns the new host when one was
    /// promoted. Recorded answers are retained.
    pub fn remove_member(&mut self, conn_id: ConnectionId) -> Option<ConnectionId> {
        self.members.retain(|m| m.connection_id != conn_id);

        if self.host == conn_id
            && let Some(next) = self.members.first_mut()
        {
            next.is_host = true;
            self.host = next.connection_id;
            return Some(self.host);
        }
        None
    }

    /// Record an answer payload; resubmission overwrites, completion counts once
    pub fn record_answer(&mut self, member: ConnectionId, answer: PhaseAnswer) {
        let phase = answer.phase();
        match answer {
            PhaseAnswer::PersonalInfo(info) => {
                self.personal_info.insert(member, info);
            }
            PhaseAnswer::Quiz(choices) => {
                self.quiz_answers.insert(member, choices);
            }
        }
        self.completion.record(phase, member);
    }

    /// Cancel any armed deadline and invalidate in-flight timer fires
    pub fn cancel_deadline(&mut self) {
        if let Some(timer) = self.deadline.take() {
            timer.handle.abort();
        }
        self.timer_generation += 1;
    }

    /// The explicit full reset: back to waiting with answers wiped
    pub fn reset(&mut self) {
        self.cancel_deadline();
        self.personal_info.clear();
        self.quiz_answers.clear();
        self.completion.clear();
        self.selected_destination = None;
        self.phase = Phase::Waiting;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // No orphaned timers, whatever path destroyed the session
        if let Some(timer) = self.deadline.take() {
            timer.handle.abort();
        }
    }
}
