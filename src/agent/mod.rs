//! Agent session capability
//!
//! The transport that talks to the remote voice agent. Implementations
//! deliver their events into the single ordered queue they were built with.

mod loopback;

use async_trait::async_trait;

use crate::error::TransportError;

pub use loopback::LoopbackAgent;

/// Opens and closes sessions with a remote agent
#[async_trait]
pub trait AgentSession: Send + Sync {
    /// Begin a session with the given agent
    async fn start(&self, agent_id: &str) -> Result<(), TransportError>;

    /// Tear down the current session
    async fn end(&self) -> Result<(), TransportError>;

    /// Send a typed user utterance instead of speech
    async fn send_text(&self, _text: &str) -> Result<(), TransportError> {
        Err(TransportError::Unsupported)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use super::*;

    /// Counters shared between a test and the boxed agent it handed out
    #[derive(Default)]
    pub struct AgentCalls {
        starts: AtomicUsize,
        ends: AtomicUsize,
        texts: Mutex<Vec<String>>,
    }

    impl AgentCalls {
        pub fn starts(&self) -> usize {
            self.starts.load(Ordering::SeqCst)
        }

        pub fn ends(&self) -> usize {
            self.ends.load(Ordering::SeqCst)
        }

        pub fn texts(&self) -> Vec<String> {
            self.texts.lock().unwrap().clone()
        }
    }

    /// Agent whose start/end outcomes are fixed up front
    pub struct ScriptedAgent {
        start_result: Result<(), TransportError>,
        end_result: Result<(), TransportError>,
        calls: Arc<AgentCalls>,
    }

    impl ScriptedAgent {
        pub fn new() -> (Self, Arc<AgentCalls>) {
            let calls = Arc::new(AgentCalls::default());
            let agent = Self {
                start_result: Ok(()),
                end_result: Ok(()),
                calls: calls.clone(),
            };
            (agent, calls)
        }

        pub fn failing_start(mut self, err: TransportError) -> Self {
            self.start_result = Err(err);
            self
        }

        pub fn failing_end(mut self, err: TransportError) -> Self {
            self.end_result = Err(err);
            self
        }
    }

    #[async_trait]
    impl AgentSession for ScriptedAgent {
        async fn start(&self, _agent_id: &str) -> Result<(), TransportError> {
            self.calls.starts.fetch_add(1, Ordering::SeqCst);
            self.start_result.clone()
        }

        async fn end(&self) -> Result<(), TransportError> {
            self.calls.ends.fetch_add(1, Ordering::SeqCst);
            self.end_result.clone()
        }

        async fn send_text(&self, text: &str) -> Result<(), TransportError> {
            self.calls.texts.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }
}
