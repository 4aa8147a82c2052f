//! In-process loopback agent
//!
//! Stands in for a remote voice agent during development. It connects
//! instantly, optionally greets the user, and echoes typed input back as
//! an assistant turn.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info};

use crate::error::TransportError;
use crate::events::AgentEvent;
use crate::session::Role;

use super::AgentSession;

pub struct LoopbackAgent {
    event_tx: mpsc::Sender<AgentEvent>,
    greeting: Option<String>,
    open: AtomicBool,
}

impl LoopbackAgent {
    pub fn new(event_tx: mpsc::Sender<AgentEvent>, greeting: Option<String>) -> Self {
        Self {
            event_tx,
            greeting,
            open: AtomicBool::new(false),
        }
    }

    /// Enqueue without waiting; the consumer may be the task awaiting us
    fn emit(&self, event: AgentEvent) -> Result<(), TransportError> {
        debug!(%event, "loopback emitting event");
        self.event_tx.try_send(event).map_err(|e| match e {
            TrySendError::Full(_) => TransportError::Backpressure,
            TrySendError::Closed(_) => TransportError::Closed,
        })
    }

    /// An assistant utterance framed by speaking indicators
    fn speak(&self, content: &str) -> Result<(), TransportError> {
        self.emit(AgentEvent::SpeakingChanged { is_speaking: true })?;
        self.emit(AgentEvent::message(Role::Assistant, content))?;
        self.emit(AgentEvent::SpeakingChanged { is_speaking: false })
    }
}

#[async_trait]
impl AgentSession for LoopbackAgent {
    async fn start(&self, agent_id: &str) -> Result<(), TransportError> {
        if self.open.swap(true, Ordering::SeqCst) {
            return Err(TransportError::Rejected("session already open".to_string()));
        }

        info!(agent_id, "loopback session opened");

        let result = self.emit(AgentEvent::Connected).and_then(|()| match &self.greeting {
            Some(greeting) => self.speak(greeting),
            None => Ok(()),
        });

        if result.is_err() {
            self.open.store(false, Ordering::SeqCst);
        }
        result
    }

    async fn end(&self) -> Result<(), TransportError> {
        if !self.open.swap(false, Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }

        info!("loopback session closed");
        self.emit(AgentEvent::Disconnected)
    }

    async fn send_text(&self, text: &str) -> Result<(), TransportError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }

        self.emit(AgentEvent::message(Role::User, text))?;
        self.speak(&format!("You said: {}", text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &mut mpsc::Receiver<AgentEvent>) -> Vec<AgentEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_start_emits_connected_and_greeting() {
        let (tx, mut rx) = mpsc::channel(16);
        let agent = LoopbackAgent::new(tx, Some("Hi there".to_string()));

        tokio_test::assert_ok!(agent.start("loopback").await);

        assert_eq!(
            drain(&mut rx),
            vec![
                AgentEvent::Connected,
                AgentEvent::SpeakingChanged { is_speaking: true },
                AgentEvent::message(Role::Assistant, "Hi there"),
                AgentEvent::SpeakingChanged { is_speaking: false },
            ]
        );
    }

    #[tokio::test]
    async fn test_second_start_rejected() {
        let (tx, _rx) = mpsc::channel(16);
        let agent = LoopbackAgent::new(tx, None);

        tokio_test::assert_ok!(agent.start("loopback").await);
        let err = tokio_test::assert_err!(agent.start("loopback").await);
        assert!(matches!(err, TransportError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_end_without_session_fails() {
        let (tx, _rx) = mpsc::channel(16);
        let agent = LoopbackAgent::new(tx, None);

        assert_eq!(agent.end().await, Err(TransportError::NotConnected));
    }

    #[tokio::test]
    async fn test_send_text_echoes() {
        let (tx, mut rx) = mpsc::channel(16);
        let agent = LoopbackAgent::new(tx, None);

        agent.start("loopback").await.unwrap();
        drain(&mut rx);

        agent.send_text("Hello").await.unwrap();
        let events = drain(&mut rx);
        assert_eq!(events[0], AgentEvent::message(Role::User, "Hello"));
        assert_eq!(events[2], AgentEvent::message(Role::Assistant, "You said: Hello"));
    }

    #[tokio::test]
    async fn test_full_queue_reports_backpressure_and_stays_closed() {
        let (tx, _rx) = mpsc::channel(1);
        let agent = LoopbackAgent::new(tx, Some("Hi".to_string()));

        assert_eq!(agent.start("loopback").await, Err(TransportError::Backpressure));
        assert_eq!(agent.end().await, Err(TransportError::NotConnected));
    }
}
