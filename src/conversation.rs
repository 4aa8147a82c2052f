//! Conversation task: permission gate and session controller on one loop
//!
//! User requests arrive as [`Command`]s, agent events on their own queue.
//! Both are handled one at a time by [`Conversation::run`], and a fresh
//! [`SessionSnapshot`] is published after each so readers never mutate state.
//!
//! Calls into the capture device or the agent never run on the loop itself.
//! They are spawned, and their results come back as completions, so agent
//! events and other commands keep flowing while a call is pending.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::agent::AgentSession;
use crate::error::{CaptureError, SessionError, TransportError};
use crate::events::{AgentEvent, SessionEvent};
use crate::permission::{CapturePermission, PermissionGate, PermissionState};
use crate::session::{Indicator, SessionController, SessionStatus, StartOutcome, Turn};

const COMPLETION_CAPACITY: usize = 16;

/// Requests sent to the conversation task
#[derive(Debug)]
pub enum Command {
    RequestPermission {
        reply: oneshot::Sender<PermissionState>,
    },
    StartSession {
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    EndSession {
        reply: oneshot::Sender<()>,
    },
    SendText {
        text: String,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
}

/// A capability call that resolved off the loop
#[derive(Debug)]
enum Completion {
    Permission {
        result: Result<(), CaptureError>,
        reply: oneshot::Sender<PermissionState>,
    },
    Start {
        outcome: StartOutcome,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    End {
        result: Result<(), TransportError>,
    },
}

/// Read-only view of the conversation state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub permission: PermissionState,
    pub status: SessionStatus,
    pub indicator: Option<Indicator>,
    /// Shared between snapshots until a turn is appended
    pub turns: Arc<[Turn]>,
}

/// Owns all conversation state; see the module docs
pub struct Conversation {
    gate: PermissionGate,
    controller: SessionController,
    agent_rx: mpsc::Receiver<AgentEvent>,
    completion_tx: mpsc::Sender<Completion>,
    completion_rx: mpsc::Receiver<Completion>,
    event_tx: broadcast::Sender<SessionEvent>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    turns: Arc<[Turn]>,
}

impl Conversation {
    /// Create a conversation and a receiver for its snapshots.
    ///
    /// `agent_rx` is the ordered event queue the agent transport feeds.
    pub fn new(
        gate: PermissionGate,
        controller: SessionController,
        agent_rx: mpsc::Receiver<AgentEvent>,
        event_tx: broadcast::Sender<SessionEvent>,
    ) -> (Self, watch::Receiver<SessionSnapshot>) {
        let turns: Arc<[Turn]> = Arc::from(controller.transcript().turns());
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot {
            permission: gate.state(),
            status: controller.status(),
            indicator: controller.indicator(),
            turns: Arc::clone(&turns),
        });
        let (completion_tx, completion_rx) = mpsc::channel(COMPLETION_CAPACITY);

        let conversation = Self {
            gate,
            controller,
            agent_rx,
            completion_tx,
            completion_rx,
            event_tx,
            snapshot_tx,
            turns,
        };
        (conversation, snapshot_rx)
    }

    /// Process commands, agent events and completions until the command
    /// queue closes
    pub async fn run(&mut self, mut command_rx: mpsc::Receiver<Command>) {
        info!("conversation started");

        loop {
            tokio::select! {
                Some(event) = self.agent_rx.recv() => {
                    self.handle_agent_event(event);
                }
                Some(completion) = self.completion_rx.recv() => {
                    self.handle_completion(completion);
                }
                command = command_rx.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
            }
        }

        info!("conversation stopped");
    }

    /// End any open session before the process exits.
    ///
    /// The loop is gone by now, so the teardown is awaited directly.
    pub async fn shutdown(&mut self) {
        if let Some(agent) = self.controller.begin_end() {
            info!("ending active session for shutdown");
            let result = agent.end().await;
            self.controller.finish_end(result);
        }
        self.publish();
    }

    fn handle_agent_event(&mut self, event: AgentEvent) {
        self.controller.handle_event(event);
        self.publish();
    }

    fn handle_command(&mut self, command: Command) {
        debug!(?command, "conversation command");

        match command {
            Command::RequestPermission { reply } => {
                let capture = self.gate.capture();
                let completion_tx = self.completion_tx.clone();
                tokio::spawn(async move {
                    let result = capture.request_audio_capture().await;
                    let _ = completion_tx.send(Completion::Permission { result, reply }).await;
                });
            }
            Command::StartSession { reply } => {
                if !self.gate.is_granted() {
                    warn!(permission = %self.gate.state(), "start refused without microphone permission");
                    let _ = reply.send(Err(SessionError::PermissionRequired));
                    return;
                }

                match self.controller.begin_start() {
                    Ok(attempt) => {
                        let completion_tx = self.completion_tx.clone();
                        tokio::spawn(async move {
                            let outcome = attempt.connect().await;
                            let _ = completion_tx.send(Completion::Start { outcome, reply }).await;
                        });
                    }
                    Err(e) => {
                        let _ = reply.send(Err(e));
                    }
                }
            }
            Command::EndSession { reply } => {
                if let Some(agent) = self.controller.begin_end() {
                    let completion_tx = self.completion_tx.clone();
                    tokio::spawn(async move {
                        let result = agent.end().await;
                        let _ = completion_tx.send(Completion::End { result }).await;
                    });
                }
                self.publish();
                let _ = reply.send(());
                return;
            }
            Command::SendText { text, reply } => {
                let agent = self.controller.agent();
                tokio::spawn(async move {
                    let result = agent
                        .send_text(&text)
                        .await
                        .map_err(|e| SessionError::TransportError(e.to_string()));
                    let _ = reply.send(result);
                });
            }
        }

        self.publish();
    }

    fn handle_completion(&mut self, completion: Completion) {
        debug!(?completion, "capability call resolved");

        match completion {
            Completion::Permission { result, reply } => {
                let before = self.gate.state();
                let after = self.gate.record_outcome(result);
                if before != after {
                    let _ = self
                        .event_tx
                        .send(SessionEvent::PermissionChanged { state: after });
                }
                self.publish();
                let _ = reply.send(after);
            }
            Completion::Start { outcome, reply } => {
                let result = self.controller.finish_start(outcome);
                self.publish();
                let _ = reply.send(result);
            }
            Completion::End { result } => {
                self.controller.finish_end(result);
                self.publish();
            }
        }
    }

    fn publish(&mut self) {
        // Append-only, so a length change is the only way turns differ
        let turns = self.controller.transcript().turns();
        if turns.len() != self.turns.len() {
            self.turns = Arc::from(turns);
        }

        self.snapshot_tx.send_replace(SessionSnapshot {
            permission: self.gate.state(),
            status: self.controller.status(),
            indicator: self.controller.indicator(),
            turns: Arc::clone(&self.turns),
        });
    }
}

/// Cloneable sender side for talking to a running [`Conversation`]
#[derive(Clone)]
pub struct ConversationHandle {
    command_tx: mpsc::Sender<Command>,
}

impl ConversationHandle {
    pub fn new(command_tx: mpsc::Sender<Command>) -> Self {
        Self { command_tx }
    }

    pub async fn request_permission(&self) -> Result<PermissionState> {
        self.call(|reply| Command::RequestPermission { reply }).await
    }

    pub async fn start_session(&self) -> Result<Result<(), SessionError>> {
        self.call(|reply| Command::StartSession { reply }).await
    }

    pub async fn end_session(&self) -> Result<()> {
        self.call(|reply| Command::EndSession { reply }).await
    }

    pub async fn send_text(&self, text: impl Into<String>) -> Result<Result<(), SessionError>> {
        let text = text.into();
        self.call(|reply| Command::SendText { text, reply }).await
    }

    async fn call<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(build(reply_tx))
            .await
            .ok()
            .context("conversation task is not running")?;
        reply_rx.await.context("conversation task dropped the request")
    }
}
