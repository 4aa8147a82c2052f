//! Session controller implementation
//!
//! Owns the status, speaking indicator and transcript of one conversation.
//! Everything here runs on the conversation task, so each method applies a
//! single input completely before the next one is looked at. Calls into the
//! transport are split in two: `begin_*` updates local state and hands back
//! what the caller needs to talk to the agent, `finish_*` applies the result
//! once the call resolves. Agent events may be handled in between.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::agent::AgentSession;
use crate::error::{SessionError, TransportError};
use crate::events::{AgentEvent, SessionEvent};
use crate::notify::{Notice, Notifier, Severity};

use super::transcript::{Role, Transcript};

/// Lifecycle status of the conversation session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Idle,
    Connecting,
    Connected,
    Ended,
    Errored,
}

impl SessionStatus {
    /// Whether a session is open or being opened
    pub fn is_active(&self) -> bool {
        matches!(self, SessionStatus::Connecting | SessionStatus::Connected)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Idle => write!(f, "Idle"),
            SessionStatus::Connecting => write!(f, "Connecting"),
            SessionStatus::Connected => write!(f, "Connected"),
            SessionStatus::Ended => write!(f, "Ended"),
            SessionStatus::Errored => write!(f, "Errored"),
        }
    }
}

/// What the user should see while connected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Indicator {
    /// The agent is talking
    Speaking,
    /// The agent is waiting for the user
    Listening,
}

/// A start request that has been accepted locally but not yet by the agent
pub struct StartAttempt {
    previous: SessionStatus,
    agent: Arc<dyn AgentSession>,
    agent_id: String,
}

impl StartAttempt {
    /// Ask the agent to open the session
    pub async fn connect(self) -> StartOutcome {
        let result = self.agent.start(&self.agent_id).await;
        StartOutcome {
            previous: self.previous,
            result,
        }
    }
}

/// Result of [`StartAttempt::connect`], fed back through `finish_start`
#[derive(Debug)]
pub struct StartOutcome {
    previous: SessionStatus,
    result: Result<(), TransportError>,
}

/// Drives one agent session and records its transcript
pub struct SessionController {
    status: SessionStatus,
    /// Last reported speaking state; only shown while connected
    speaking: bool,
    transcript: Transcript,
    status_entered_at: Instant,
    agent: Arc<dyn AgentSession>,
    agent_id: String,
    notifier: Arc<dyn Notifier>,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl SessionController {
    pub fn new(
        agent: Arc<dyn AgentSession>,
        agent_id: impl Into<String>,
        notifier: Arc<dyn Notifier>,
        event_tx: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self {
            status: SessionStatus::Idle,
            speaking: false,
            transcript: Transcript::new(),
            status_entered_at: Instant::now(),
            agent,
            agent_id: agent_id.into(),
            notifier,
            event_tx,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    #[cfg(test)]
    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    /// Speaking/listening indicator, `None` unless connected
    pub fn indicator(&self) -> Option<Indicator> {
        if self.status != SessionStatus::Connected {
            return None;
        }
        Some(if self.speaking {
            Indicator::Speaking
        } else {
            Indicator::Listening
        })
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// The transport, for calls that do not touch session state
    pub fn agent(&self) -> Arc<dyn AgentSession> {
        Arc::clone(&self.agent)
    }

    /// Move to `Connecting` and return the call to make on the agent.
    ///
    /// The caller must have checked microphone permission first.
    pub fn begin_start(&mut self) -> Result<StartAttempt, SessionError> {
        if self.status.is_active() {
            warn!(status = %self.status, "start requested while session active");
            return Err(SessionError::AlreadyActive);
        }

        let previous = self.status;
        self.transition_to(SessionStatus::Connecting);

        Ok(StartAttempt {
            previous,
            agent: Arc::clone(&self.agent),
            agent_id: self.agent_id.clone(),
        })
    }

    /// Apply the agent's answer to a start request.
    ///
    /// On failure the status before the attempt is restored, unless events
    /// handled in the meantime already moved it away from `Connecting`.
    pub fn finish_start(&mut self, outcome: StartOutcome) -> Result<(), SessionError> {
        match outcome.result {
            Ok(()) => {
                info!(agent_id = %self.agent_id, "session start accepted");
                Ok(())
            }
            Err(e) => {
                if self.status == SessionStatus::Connecting {
                    self.transition_to(outcome.previous);
                }
                let err = SessionError::ConnectionFailed(e);
                warn!(agent_id = %self.agent_id, error = %err, "session start failed");
                self.notifier.notify(Notice::new(
                    "Connection failed",
                    err.to_string(),
                    Severity::Error,
                ));
                Err(err)
            }
        }
    }

    /// Mark the session ended and return the transport to tear down.
    ///
    /// Returns `None` when there is nothing to end. The local status is
    /// `Ended` whatever the transport later says.
    pub fn begin_end(&mut self) -> Option<Arc<dyn AgentSession>> {
        if matches!(self.status, SessionStatus::Idle | SessionStatus::Ended) {
            debug!(status = %self.status, "end requested with no session, ignoring");
            return None;
        }

        self.transition_to(SessionStatus::Ended);
        Some(Arc::clone(&self.agent))
    }

    /// Report how the transport teardown went
    pub fn finish_end(&self, result: Result<(), TransportError>) {
        match result {
            Ok(()) => {
                self.notifier.notify(Notice::new(
                    "Conversation ended",
                    "The session was closed.",
                    Severity::Info,
                ));
            }
            Err(e) => {
                // Not user-facing: the session is already gone locally
                warn!(error = %SessionError::TeardownFailed(e), "session teardown failed");
            }
        }
    }

    /// Apply one event from the agent transport
    pub fn handle_event(&mut self, event: AgentEvent) {
        debug!(%event, status = %self.status, "agent event");

        match event {
            AgentEvent::Connected => {
                self.transition_to(SessionStatus::Connected);
                self.notifier.notify(Notice::new(
                    "Connected",
                    "You can start talking.",
                    Severity::Success,
                ));
            }
            AgentEvent::Disconnected => {
                info!("agent disconnected");
                self.transition_to(SessionStatus::Ended);
            }
            AgentEvent::Message { role, content } => {
                if let Err(e) = self.ingest_message(role.as_deref(), content) {
                    debug!(error = %e, "dropping agent message");
                }
            }
            AgentEvent::Error { details } => {
                warn!(error = %SessionError::TransportError(details.clone()), "agent error");
                self.transition_to(SessionStatus::Errored);
                self.notifier.notify(Notice::new("Agent error", details, Severity::Error));
            }
            AgentEvent::SpeakingChanged { is_speaking } => {
                self.set_speaking(is_speaking);
            }
        }
    }

    /// Append a message if it has both a known role and content
    fn ingest_message(
        &mut self,
        role: Option<&str>,
        content: Option<String>,
    ) -> Result<(), SessionError> {
        let role = role.ok_or(SessionError::MalformedEvent("missing role"))?;
        let role = Role::parse(role).ok_or(SessionError::MalformedEvent("unknown role"))?;
        let content = content
            .filter(|c| !c.is_empty())
            .ok_or(SessionError::MalformedEvent("missing content"))?;

        let turn = self.transcript.append(role, content, Utc::now()).clone();
        debug!(
            role = %turn.role(),
            at = %turn.timestamp(),
            chars = turn.content().chars().count(),
            turns = self.transcript.len(),
            "turn appended"
        );

        let _ = self.event_tx.send(SessionEvent::TurnAppended { turn });
        Ok(())
    }

    fn set_speaking(&mut self, is_speaking: bool) {
        if self.speaking == is_speaking {
            return;
        }
        self.speaking = is_speaking;
        let _ = self.event_tx.send(SessionEvent::SpeakingChanged { is_speaking });
    }

    /// Perform a status transition
    fn transition_to(&mut self, new_status: SessionStatus) {
        let old_status = self.status;
        if old_status == new_status {
            return;
        }

        let duration_ms = self.status_entered_at.elapsed().as_millis() as u64;
        info!(
            from = %old_status,
            to = %new_status,
            duration_ms = duration_ms,
            "session transition"
        );

        self.status = new_status;
        self.status_entered_at = Instant::now();

        let _ = self.event_tx.send(SessionEvent::StatusChanged {
            from: old_status,
            to: new_status,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::testing::{AgentCalls, ScriptedAgent};
    use crate::notify::testing::RecordingNotifier;

    fn create_controller(
        agent: ScriptedAgent,
    ) -> (SessionController, Arc<RecordingNotifier>, broadcast::Receiver<SessionEvent>) {
        let notifier = Arc::new(RecordingNotifier::default());
        let (tx, rx) = broadcast::channel(64);
        let controller = SessionController::new(Arc::new(agent), "agent-1", notifier.clone(), tx);
        (controller, notifier, rx)
    }

    fn scripted() -> (SessionController, Arc<RecordingNotifier>, Arc<AgentCalls>) {
        let (agent, calls) = ScriptedAgent::new();
        let (controller, notifier, _) = create_controller(agent);
        (controller, notifier, calls)
    }

    /// Start with the transport call resolved inline
    async fn start(controller: &mut SessionController) -> Result<(), SessionError> {
        let attempt = controller.begin_start()?;
        let outcome = attempt.connect().await;
        controller.finish_start(outcome)
    }

    /// End with the transport call resolved inline
    async fn end(controller: &mut SessionController) {
        if let Some(agent) = controller.begin_end() {
            let result = agent.end().await;
            controller.finish_end(result);
        }
    }

    fn message(role: Option<&str>, content: Option<&str>) -> AgentEvent {
        AgentEvent::Message {
            role: role.map(String::from),
            content: content.map(String::from),
        }
    }

    fn contents(controller: &SessionController) -> Vec<(Role, String)> {
        controller
            .transcript()
            .turns()
            .iter()
            .map(|t| (t.role(), t.content().to_string()))
            .collect()
    }

    #[test]
    fn test_initial_state() {
        let (controller, _, _) = scripted();
        assert_eq!(controller.status(), SessionStatus::Idle);
        assert_eq!(controller.transcript().len(), 0);
        assert_eq!(controller.indicator(), None);
    }

    #[tokio::test]
    async fn test_full_conversation_scenario() {
        let (mut controller, notifier, calls) = scripted();

        start(&mut controller).await.unwrap();
        assert_eq!(controller.status(), SessionStatus::Connecting);

        controller.handle_event(AgentEvent::Connected);
        assert_eq!(controller.status(), SessionStatus::Connected);

        controller.handle_event(AgentEvent::message(Role::User, "Hello"));
        controller.handle_event(AgentEvent::message(Role::Assistant, "Hi there"));
        controller.handle_event(AgentEvent::Disconnected);
        end(&mut controller).await;

        assert_eq!(
            contents(&controller),
            vec![
                (Role::User, "Hello".to_string()),
                (Role::Assistant, "Hi there".to_string()),
            ]
        );
        assert_eq!(controller.status(), SessionStatus::Ended);
        assert_eq!(calls.starts(), 1);
        // Already ended by the agent, so no second teardown
        assert_eq!(calls.ends(), 0);
        assert_eq!(notifier.titles(), vec!["Connected"]);
    }

    #[tokio::test]
    async fn test_end_session_notifies_and_ends() {
        let (mut controller, notifier, calls) = scripted();

        start(&mut controller).await.unwrap();
        controller.handle_event(AgentEvent::Connected);
        end(&mut controller).await;

        assert_eq!(controller.status(), SessionStatus::Ended);
        assert_eq!(calls.ends(), 1);
        assert_eq!(notifier.titles(), vec!["Connected", "Conversation ended"]);
    }

    #[tokio::test]
    async fn test_end_session_is_idempotent() {
        let (mut controller, notifier, calls) = scripted();

        start(&mut controller).await.unwrap();
        controller.handle_event(AgentEvent::message(Role::User, "Hello"));
        end(&mut controller).await;
        assert!(controller.begin_end().is_none());

        assert_eq!(controller.status(), SessionStatus::Ended);
        assert_eq!(controller.transcript().len(), 1);
        assert_eq!(calls.ends(), 1);
        assert_eq!(notifier.titles(), vec!["Conversation ended"]);
    }

    #[tokio::test]
    async fn test_teardown_failure_still_ends_without_notice() {
        let (agent, calls) = ScriptedAgent::new();
        let (mut controller, notifier, _) =
            create_controller(agent.failing_end(TransportError::NotConnected));

        start(&mut controller).await.unwrap();
        controller.handle_event(AgentEvent::Connected);
        end(&mut controller).await;

        assert_eq!(controller.status(), SessionStatus::Ended);
        assert_eq!(calls.ends(), 1);
        assert_eq!(notifier.titles(), vec!["Connected"]);

        // Does not block a fresh start
        tokio_test::assert_ok!(start(&mut controller).await);
    }

    #[tokio::test]
    async fn test_end_while_connecting() {
        let (mut controller, _, calls) = scripted();

        start(&mut controller).await.unwrap();
        end(&mut controller).await;

        assert_eq!(controller.status(), SessionStatus::Ended);
        assert_eq!(calls.ends(), 1);
    }

    #[tokio::test]
    async fn test_start_failure_restores_status() {
        let (agent, _) = ScriptedAgent::new();
        let (mut controller, notifier, _) =
            create_controller(agent.failing_start(TransportError::Rejected("busy".into())));

        let err = tokio_test::assert_err!(start(&mut controller).await);
        assert_eq!(err.code(), "connection_failed");
        assert_eq!(controller.status(), SessionStatus::Idle);

        let notices = notifier.notices();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].title, "Connection failed");
        assert_eq!(notices[0].severity, Severity::Error);
    }

    #[tokio::test]
    async fn test_late_start_failure_keeps_ended() {
        let (agent, _) = ScriptedAgent::new();
        let (mut controller, notifier, _) =
            create_controller(agent.failing_start(TransportError::Rejected("busy".into())));

        let attempt = controller.begin_start().unwrap();
        assert!(controller.begin_end().is_some());

        let outcome = attempt.connect().await;
        assert!(controller.finish_start(outcome).is_err());

        assert_eq!(controller.status(), SessionStatus::Ended);
        assert_eq!(notifier.titles(), vec!["Connection failed"]);
    }

    #[tokio::test]
    async fn test_start_while_active_rejected() {
        let (mut controller, _, calls) = scripted();

        start(&mut controller).await.unwrap();
        controller.handle_event(AgentEvent::Connected);

        assert!(matches!(controller.begin_start(), Err(SessionError::AlreadyActive)));
        assert_eq!(controller.status(), SessionStatus::Connected);
        assert_eq!(calls.starts(), 1);
    }

    #[tokio::test]
    async fn test_restart_keeps_transcript() {
        let (mut controller, _, calls) = scripted();

        start(&mut controller).await.unwrap();
        controller.handle_event(AgentEvent::Connected);
        controller.handle_event(AgentEvent::message(Role::User, "first"));
        end(&mut controller).await;

        start(&mut controller).await.unwrap();
        controller.handle_event(AgentEvent::Connected);
        controller.handle_event(AgentEvent::message(Role::User, "second"));

        assert_eq!(calls.starts(), 2);
        assert_eq!(controller.transcript().len(), 2);
    }

    #[test]
    fn test_malformed_messages_dropped() {
        let (mut controller, notifier, _) = scripted();

        controller.handle_event(message(Some("user"), Some("")));
        assert_eq!(controller.transcript().len(), 0);

        controller.handle_event(message(None, Some("orphan")));
        controller.handle_event(message(Some("assistant"), None));
        controller.handle_event(message(Some("system"), Some("prompt")));
        controller.handle_event(message(Some("user"), Some("kept")));
        controller.handle_event(message(Some("ai"), Some("also kept")));

        assert_eq!(
            contents(&controller),
            vec![
                (Role::User, "kept".to_string()),
                (Role::Assistant, "also kept".to_string()),
            ]
        );
        assert!(notifier.notices().is_empty());
    }

    #[test]
    fn test_message_before_connect_is_accepted() {
        let (mut controller, _, _) = scripted();

        controller.handle_event(AgentEvent::message(Role::Assistant, "early"));
        assert_eq!(controller.transcript().len(), 1);
        assert_eq!(controller.status(), SessionStatus::Idle);
    }

    #[test]
    fn test_speaking_changes_without_messages() {
        let (mut controller, _, _) = scripted();

        controller.handle_event(AgentEvent::SpeakingChanged { is_speaking: true });
        controller.handle_event(AgentEvent::SpeakingChanged { is_speaking: false });

        assert!(!controller.is_speaking());
        assert_eq!(controller.transcript().len(), 0);
    }

    #[test]
    fn test_speaking_survives_connect() {
        let (mut controller, _, _) = scripted();

        controller.handle_event(AgentEvent::SpeakingChanged { is_speaking: true });
        controller.handle_event(AgentEvent::Connected);

        assert!(controller.is_speaking());
        assert_eq!(controller.indicator(), Some(Indicator::Speaking));
    }

    #[test]
    fn test_indicator_only_while_connected() {
        let (mut controller, _, _) = scripted();

        controller.handle_event(AgentEvent::SpeakingChanged { is_speaking: true });
        assert_eq!(controller.indicator(), None);

        controller.handle_event(AgentEvent::Connected);
        assert_eq!(controller.indicator(), Some(Indicator::Speaking));

        controller.handle_event(AgentEvent::SpeakingChanged { is_speaking: false });
        assert_eq!(controller.indicator(), Some(Indicator::Listening));

        controller.handle_event(AgentEvent::SpeakingChanged { is_speaking: true });
        controller.handle_event(AgentEvent::Disconnected);
        assert_eq!(controller.indicator(), None);
        assert!(controller.is_speaking());
    }

    #[test]
    fn test_error_is_not_terminal() {
        let (mut controller, notifier, _) = scripted();

        controller.handle_event(AgentEvent::Error {
            details: "socket hiccup".into(),
        });
        assert_eq!(controller.status(), SessionStatus::Errored);

        controller.handle_event(AgentEvent::Connected);
        assert_eq!(controller.status(), SessionStatus::Connected);
        assert_eq!(controller.indicator(), Some(Indicator::Listening));

        let notices = notifier.notices();
        assert_eq!(notices[0].title, "Agent error");
        assert_eq!(notices[0].description, "socket hiccup");
    }

    #[tokio::test]
    async fn test_start_from_errored() {
        let (mut controller, _, calls) = scripted();

        controller.handle_event(AgentEvent::Error { details: "boom".into() });
        tokio_test::assert_ok!(start(&mut controller).await);
        assert_eq!(controller.status(), SessionStatus::Connecting);
        assert_eq!(calls.starts(), 1);
    }

    #[tokio::test]
    async fn test_events_published() {
        let (agent, _) = ScriptedAgent::new();
        let (mut controller, _, mut rx) = create_controller(agent);

        start(&mut controller).await.unwrap();
        controller.handle_event(AgentEvent::Connected);
        controller.handle_event(AgentEvent::message(Role::User, "Hello"));

        assert!(matches!(
            rx.try_recv().unwrap(),
            SessionEvent::StatusChanged { from: SessionStatus::Idle, to: SessionStatus::Connecting }
        ));
        assert!(matches!(
            rx.try_recv().unwrap(),
            SessionEvent::StatusChanged { to: SessionStatus::Connected, .. }
        ));
        match rx.try_recv().unwrap() {
            SessionEvent::TurnAppended { turn } => assert_eq!(turn.content(), "Hello"),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
