//! The session store actor
//!
//! One task owns every session, the connection registry, and the membership
//! index. All mutations arrive on a single channel and run to completion one
//! at a time, so there is no locking and no interleaving within a session.
//! Timers and matching runs execute in spawned tasks and come back as
//! internal messages; whichever of a deadline and a completion is processed
//! first commits the transition, and the loser observes "already advanced"
//! and becomes a no-op.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use tripmatch::{FlightProvider, GroupQuery, MemberProfile, TravelWindow, find_best_destinations};

use super::config::SessionConfig;
use super::messages::{SessionError, SessionRequest, StoreStats};
use super::phase::Phase;
use super::room::{ConnectionId, DeadlineTimer, PersonalInfo, PhaseAnswer, Session, random_code};
use crate::config::TravelConfig;
use crate::daemon::VERSION;
use crate::net::messages::{ClientCommand, ServerReply, SessionEvent, SessionSnapshot};
use crate::quiz::preferences_from_choices;

/// The session coordinator actor
pub struct SessionStore {
    config: SessionConfig,
    travel: TravelConfig,
    provider: Arc<dyn FlightProvider>,
    tx: mpsc::Sender<SessionRequest>,
    rx: mpsc::Receiver<SessionRequest>,
}

impl SessionStore {
    /// Create a new store with the given configuration and flight provider
    pub fn new(config: SessionConfig, travel: TravelConfig, provider: Arc<dyn FlightProvider>) -> Self {
        let (tx, rx) = mpsc::channel(config.command_buffer);
        Self {
            config,
            travel,
            provider,
            tx,
            rx,
        }
    }

    /// Get a sender for connection tasks and timers
    pub fn sender(&self) -> mpsc::Sender<SessionRequest> {
        self.tx.clone()
    }

    /// Run the store task
    ///
    /// Consumes the store and runs until `Shutdown` (internal or over the
    /// wire) or until every sender is dropped.
    pub async fn run(mut self) {
        let mut state = StoreState {
            config: self.config,
            travel: self.travel,
            provider: self.provider,
            tx: self.tx.clone(),
            sessions: HashMap::new(),
            registry: HashMap::new(),
            memberships: HashMap::new(),
            matches_computed: 0,
        };

        info!("Session store started");

        while let Some(req) = self.rx.recv().await {
            match req {
                SessionRequest::Register { conn_id, tx } => {
                    debug!(%conn_id, "Registering connection");
                    state.registry.insert(conn_id, tx);
                }

                SessionRequest::Disconnect { conn_id } => {
                    debug!(%conn_id, "Connection closed");
                    state.registry.remove(&conn_id);
                    state.leave_session(conn_id);
                }

                SessionRequest::Command {
                    conn_id,
                    command,
                    reply_tx,
                } => {
                    if matches!(command, ClientCommand::Shutdown) {
                        info!("Shutdown requested over the wire");
                        let _ = reply_tx.send(ServerReply::Ack);
                        break;
                    }
                    let reply = state.handle_command(conn_id, command);
                    let _ = reply_tx.send(reply);
                }

                SessionRequest::DeadlineElapsed {
                    code,
                    phase,
                    generation,
                } => {
                    state.handle_deadline(&code, phase, generation);
                }

                SessionRequest::MatchingFinished { code, ranked } => {
                    state.handle_matching_finished(&code, ranked);
                }

                SessionRequest::GetStats { reply_tx } => {
                    let _ = reply_tx.send(state.stats());
                }

                SessionRequest::Shutdown => {
                    info!("Session store shutting down");
                    break;
                }
            }
        }

        info!("Session store stopped");
    }
}

/// Everything the run loop owns
struct StoreState {
    config: SessionConfig,
    travel: TravelConfig,
    provider: Arc<dyn FlightProvider>,
    tx: mpsc::Sender<SessionRequest>,
    sessions: HashMap<String, Session>,
    /// Connection registry: live connections and their event outboxes
    registry: HashMap<ConnectionId, mpsc::Sender<SessionEvent>>,
    /// Which session a connection currently belongs to
    memberships: HashMap<ConnectionId, String>,
    matches_computed: u64,
}

impl StoreState {
    fn stats(&self) -> StoreStats {
        StoreStats {
            active_sessions: self.sessions.len(),
            connected_clients: self.registry.len(),
            matches_computed: self.matches_computed,
        }
    }

    /// Deliver an event to the given connections only
    ///
    /// Outboxes are bounded; a slow client loses events rather than stalling
    /// every session behind it.
    fn send_event(&self, recipients: &[ConnectionId], event: SessionEvent) {
        for conn_id in recipients {
            if let Some(tx) = self.registry.get(conn_id)
                && tx.try_send(event.clone()).is_err()
            {
                warn!(%conn_id, "Dropping event for slow or closed connection");
            }
        }
    }

    fn recipients(&self, code: &str) -> Vec<ConnectionId> {
        self.sessions
            .get(code)
            .map(|s| s.members.iter().map(|m| m.connection_id).collect())
            .unwrap_or_default()
    }

    fn handle_command(&mut self, conn_id: ConnectionId, command: ClientCommand) -> ServerReply {
        let result = match command {
            ClientCommand::CreateSession { display_name } => self.create_session(conn_id, display_name),
            ClientCommand::JoinSession { code, display_name } => self.join_session(conn_id, &code, display_name),
            ClientCommand::StartSession => self.start_session(conn_id),
            ClientCommand::SubmitPersonalInfo {
                origin_airport,
                budget,
                has_license,
            } => {
                let info = PersonalInfo {
                    origin_airport: origin_airport.trim().to_uppercase(),
                    budget,
                    has_license,
                };
                self.submit_answer(conn_id, PhaseAnswer::PersonalInfo(info))
            }
            ClientCommand::SubmitQuiz { choices } => self.submit_answer(conn_id, PhaseAnswer::Quiz(choices)),
            ClientCommand::GetSessionState => self.session_state(conn_id),
            ClientCommand::CloseSession => self.close_session(conn_id),
            ClientCommand::ResetSession => self.reset_session(conn_id),
            ClientCommand::Stats => Ok(ServerReply::Stats(self.stats())),
            ClientCommand::Ping => Ok(ServerReply::Pong {
                version: VERSION.to_string(),
            }),
            // Intercepted by the run loop
            ClientCommand::Shutdown => Ok(ServerReply::Ack),
        };

        result.unwrap_or_else(|e| e.reply())
    }

    fn create_session(&mut self, conn_id: ConnectionId, display_name: String) -> Result<ServerReply, SessionError> {
        // Creating while in another session implicitly leaves it first
        self.leave_session(conn_id);

        let code = loop {
            let candidate = random_code();
            if !self.sessions.contains_key(&candidate) {
                break candidate;
            }
        };

        let depart = Utc::now().date_naive() + chrono::Duration::days(self.travel.depart_offset_days);
        let window = TravelWindow::new(depart, depart + chrono::Duration::days(self.travel.trip_length_days));

        let session = Session::new(code.clone(), conn_id, display_name, window);
        let members = session.members.clone();
        self.sessions.insert(code.clone(), session);
        self.memberships.insert(conn_id, code.clone());

        info!(%code, %conn_id, "Session created");
        Ok(ServerReply::SessionCreated {
            code,
            connection_id: conn_id,
            members,
            host_id: conn_id,
        })
    }

    fn join_session(
        &mut self,
        conn_id: ConnectionId,
        code: &str,
        display_name: String,
    ) -> Result<ServerReply, SessionError> {
        let code = code.trim().to_uppercase();
        {
            let session = self.sessions.get(&code).ok_or(SessionError::NotFound)?;
            if session.phase != Phase::Waiting {
                return Err(SessionError::AlreadyStarted);
            }
        }

        // Only leave the previous session once the join is known to succeed
        self.leave_session(conn_id);

        let session = self.sessions.get_mut(&code).ok_or(SessionError::NotFound)?;
        let member = session.add_member(conn_id, display_name);
        let members = session.members.clone();
        let host_id = session.host;
        let others: Vec<ConnectionId> = members
            .iter()
            .map(|m| m.connection_id)
            .filter(|id| *id != conn_id)
            .collect();
        self.memberships.insert(conn_id, code.clone());

        info!(%code, %conn_id, "Member joined");
        self.send_event(&others, SessionEvent::MemberJoined { member });

        Ok(ServerReply::SessionJoined {
            code,
            connection_id: conn_id,
            members,
            host_id,
        })
    }

    fn start_session(&mut self, conn_id: ConnectionId) -> Result<ServerReply, SessionError> {
        let code = self.memberships.get(&conn_id).cloned().ok_or(SessionError::NotFound)?;
        let session = self.sessions.get_mut(&code).ok_or(SessionError::NotFound)?;

        if session.host != conn_id {
            return Err(SessionError::NotAuthorized);
        }
        if session.phase != Phase::Waiting {
            return Err(SessionError::InvalidPhase(session.phase));
        }

        session.phase = Phase::PersonalInfo;
        info!(%code, "Session started");

        let recipients = self.recipients(&code);
        self.send_event(
            &recipients,
            SessionEvent::PhaseChanged {
                phase: Phase::PersonalInfo,
            },
        );
        self.arm_deadline(&code, Phase::PersonalInfo, self.config.personal_info_deadline());

        Ok(ServerReply::Ack)
    }

    fn submit_answer(&mut self, conn_id: ConnectionId, answer: PhaseAnswer) -> Result<ServerReply, SessionError> {
        let code = self.memberships.get(&conn_id).cloned().ok_or(SessionError::NotFound)?;
        let session = self.sessions.get_mut(&code).ok_or(SessionError::NotFound)?;

        let phase = answer.phase();
        if session.phase != phase {
            return Err(SessionError::InvalidPhase(session.phase));
        }

        session.record_answer(conn_id, answer);

        let completed = session.completion.completed_count(&session.members, phase);
        let total = session.members.len();
        let complete = session.completion.is_complete(&session.members, phase);

        // The quiz deadline is armed lazily, once the first member finishes,
        // so members progressing at different speeds share one clock.
        if phase == Phase::PreferenceQuiz && !complete && session.deadline.is_none() {
            self.arm_deadline(&code, Phase::PreferenceQuiz, self.config.quiz_deadline());
        }

        let status = match phase {
            Phase::PersonalInfo => SessionEvent::PersonalInfoStatus { completed, total },
            _ => SessionEvent::QuizStatus { completed, total },
        };
        let recipients = self.recipients(&code);
        self.send_event(&recipients, status);

        if complete {
            debug!(%code, %phase, "Phase complete before deadline");
            match phase {
                Phase::PersonalInfo => self.advance_to_quiz(&code),
                _ => self.enter_results(&code),
            }
        }

        Ok(ServerReply::SubmissionRecorded {
            completed_count: completed,
            total,
        })
    }

    fn session_state(&mut self, conn_id: ConnectionId) -> Result<ServerReply, SessionError> {
        let code = self.memberships.get(&conn_id).ok_or(SessionError::NotFound)?;
        let session = self.sessions.get(code).ok_or(SessionError::NotFound)?;
        Ok(ServerReply::SessionState(snapshot(session)))
    }

    fn close_session(&mut self, conn_id: ConnectionId) -> Result<ServerReply, SessionError> {
        let code = self.memberships.get(&conn_id).cloned().ok_or(SessionError::NotFound)?;
        let session = self.sessions.get(&code).ok_or(SessionError::NotFound)?;
        if session.host != conn_id {
            return Err(SessionError::NotAuthorized);
        }

        let recipients = self.recipients(&code);
        for id in &recipients {
            self.memberships.remove(id);
        }
        self.sessions.remove(&code);
        info!(%code, "Session closed by host");
        self.send_event(&recipients, SessionEvent::SessionClosed);

        Ok(ServerReply::Ack)
    }

    fn reset_session(&mut self, conn_id: ConnectionId) -> Result<ServerReply, SessionError> {
        let code = self.memberships.get(&conn_id).cloned().ok_or(SessionError::NotFound)?;
        let session = self.sessions.get_mut(&code).ok_or(SessionError::NotFound)?;
        if session.host != conn_id {
            return Err(SessionError::NotAuthorized);
        }

        session.reset();
        info!(%code, "Session reset to waiting");

        let recipients = self.recipients(&code);
        self.send_event(&recipients, SessionEvent::PhaseChanged { phase: Phase::Waiting });

        Ok(ServerReply::Ack)
    }

    /// Remove a connection from its session, if it has one
    ///
    /// Handles host promotion, empty-session cleanup, and the case where the
    /// departure satisfies the current phase's completion condition.
    fn leave_session(&mut self, conn_id: ConnectionId) {
        let Some(code) = self.memberships.remove(&conn_id) else {
            return;
        };
        let Some(session) = self.sessions.get_mut(&code) else {
            return;
        };

        let new_host = session.remove_member(conn_id);

        if session.members.is_empty() {
            // Session::drop aborts any armed timer
            self.sessions.remove(&code);
            info!(%code, "Last member left, session deleted");
            return;
        }

        let phase = session.phase;
        let now_complete = phase.accepts_answers() && session.completion.is_complete(&session.members, phase);

        let recipients = self.recipients(&code);
        if let Some(new_host_id) = new_host {
            info!(%code, %new_host_id, "Host left, promoted next member");
            self.send_event(&recipients, SessionEvent::HostChanged { new_host_id });
        }
        self.send_event(&recipients, SessionEvent::MemberLeft { connection_id: conn_id });

        if now_complete {
            debug!(%code, %phase, "Departure completed the phase");
            match phase {
                Phase::PersonalInfo => self.advance_to_quiz(&code),
                _ => self.enter_results(&code),
            }
        }
    }

    /// Arm the deadline for a phase, replacing any armed timer
    fn arm_deadline(&mut self, code: &str, phase: Phase, duration: Duration) {
        let Some(session) = self.sessions.get_mut(code) else {
            return;
        };

        session.cancel_deadline();
        let generation = session.timer_generation;
        let tx = self.tx.clone();
        let code_owned = code.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            let _ = tx
                .send(SessionRequest::DeadlineElapsed {
                    code: code_owned,
                    phase,
                    generation,
                })
                .await;
        });

        debug!(%code, %phase, ?duration, generation, "Deadline armed");
        session.deadline = Some(DeadlineTimer {
            phase,
            generation,
            handle,
        });
    }

    /// A deadline fired; stale or superseded timers are no-ops
    fn handle_deadline(&mut self, code: &str, phase: Phase, generation: u64) {
        let Some(session) = self.sessions.get_mut(code) else {
            return;
        };
        if session.phase != phase || session.timer_generation != generation {
            debug!(%code, %phase, generation, "Stale deadline ignored");
            return;
        }
        session.deadline = None;

        info!(%code, %phase, "Deadline reached");
        let recipients = self.recipients(code);
        match phase {
            Phase::PersonalInfo => {
                self.send_event(&recipients, SessionEvent::PersonalInfoDeadlineReached);
                self.advance_to_quiz(code);
            }
            Phase::PreferenceQuiz => {
                self.send_event(&recipients, SessionEvent::QuizDeadlineReached);
                self.enter_results(code);
            }
            Phase::Countdown => {
                if let Some(session) = self.sessions.get_mut(code) {
                    session.phase = Phase::Done;
                }
                self.send_event(&recipients, SessionEvent::PhaseChanged { phase: Phase::Done });
            }
            _ => {}
        }
    }

    fn advance_to_quiz(&mut self, code: &str) {
        let Some(session) = self.sessions.get_mut(code) else {
            return;
        };
        session.cancel_deadline();
        session.phase = Phase::PreferenceQuiz;

        let recipients = self.recipients(code);
        self.send_event(
            &recipients,
            SessionEvent::PhaseChanged {
                phase: Phase::PreferenceQuiz,
            },
        );
    }

    /// Enter `resultsProcessing` and kick off the matching task
    ///
    /// The engine runs in its own task so provider lookups never block the
    /// store from serving other sessions; the result re-enters the loop as
    /// `MatchingFinished`.
    fn enter_results(&mut self, code: &str) {
        let Some(session) = self.sessions.get_mut(code) else {
            return;
        };
        session.cancel_deadline();
        session.phase = Phase::ResultsProcessing;

        // Members without a personal-info payload are excluded from scoring;
        // a missing quiz just means no preferences.
        let members: Vec<MemberProfile> = session
            .members
            .iter()
            .filter_map(|m| {
                session.personal_info.get(&m.connection_id).map(|info| MemberProfile {
                    name: m.display_name.clone(),
                    origin_airport: info.origin_airport.clone(),
                    budget: info.budget,
                    preferences: session
                        .quiz_answers
                        .get(&m.connection_id)
                        .map(|choices| preferences_from_choices(choices))
                        .unwrap_or_default(),
                })
            })
            .collect();

        let group = GroupQuery {
            code: code.to_string(),
            window: session.travel_window,
            members,
        };
        let cache = Arc::clone(&session.cache);
        let provider = Arc::clone(&self.provider);
        let tx = self.tx.clone();

        info!(%code, members = group.members.len(), "Matching started");
        let code_owned = code.to_string();
        let engine = tokio::spawn(async move { find_best_destinations(&group, provider, &cache).await });
        tokio::spawn(async move {
            // Even a crashed engine run must move the session forward
            let ranked = match engine.await {
                Ok(ranked) => ranked,
                Err(e) => {
                    warn!(code = %code_owned, error = %e, "Matching task failed");
                    Vec::new()
                }
            };
            let _ = tx
                .send(SessionRequest::MatchingFinished {
                    code: code_owned,
                    ranked,
                })
                .await;
        });

        let recipients = self.recipients(code);
        self.send_event(
            &recipients,
            SessionEvent::PhaseChanged {
                phase: Phase::ResultsProcessing,
            },
        );
    }

    /// The matching task reported back; move into the countdown
    fn handle_matching_finished(&mut self, code: &str, ranked: Vec<tripmatch::MatchResult>) {
        let Some(session) = self.sessions.get_mut(code) else {
            return;
        };
        if session.phase != Phase::ResultsProcessing {
            debug!(%code, phase = %session.phase, "Matching result for wrong phase ignored");
            return;
        }

        let selected = ranked.into_iter().next();
        session.selected_destination = selected.clone();
        session.phase = Phase::Countdown;
        self.matches_computed += 1;

        info!(
            %code,
            destination = selected.as_ref().map(|r| r.destination_key.as_str()).unwrap_or("none"),
            "Matching complete"
        );

        let recipients = self.recipients(code);
        self.send_event(
            &recipients,
            SessionEvent::MatchingComplete {
                success: selected.is_some(),
                result: selected,
            },
        );
        self.send_event(
            &recipients,
            SessionEvent::PhaseChanged {
                phase: Phase::Countdown,
            },
        );
        self.arm_deadline(code, Phase::Countdown, self.config.countdown());
    }
}

/// Build the deterministic wire snapshot of a session
fn snapshot(session: &Session) -> SessionSnapshot {
    let mut completion = std::collections::BTreeMap::new();
    completion.insert(
        Phase::PersonalInfo.name().to_string(),
        session.completion.recorded(Phase::PersonalInfo),
    );
    completion.insert(
        Phase::PreferenceQuiz.name().to_string(),
        session.completion.recorded(Phase::PreferenceQuiz),
    );

    SessionSnapshot {
        code: session.code.clone(),
        phase: session.phase,
        host_id: session.host,
        members: session.members.clone(),
        travel_window: session.travel_window,
        personal_info: session.personal_info.clone(),
        quiz_answers: session.quiz_answers.clone(),
        completion,
        selected_destination: session.selected_destination.clone(),
    }
}
