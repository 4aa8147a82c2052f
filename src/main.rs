//! voice-session-daemon: client-side session manager for voice conversations
//!
//! This daemon runs next to a UI and provides:
//! - A permission gate for microphone access
//! - A session controller that follows the agent's lifecycle events and
//!   records the conversation transcript
//! - IPC server for the UI to drive sessions and watch state
//!
//! The agent transport, audio capture and presentation are pluggable.
//! The bundled loopback agent stands in for a remote one.

mod agent;
mod config;
mod conversation;
mod error;
mod events;
mod ipc;
mod lifecycle;
mod notify;
mod permission;
mod session;

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::agent::LoopbackAgent;
use crate::config::Config;
use crate::conversation::{Conversation, ConversationHandle};
use crate::events::SessionEvent;
use crate::ipc::Server;
use crate::lifecycle::ShutdownSignal;
use crate::notify::{BroadcastNotifier, Notifier};
use crate::permission::{DeviceCapture, PermissionGate};
use crate::session::SessionController;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "voice-session-daemon starting"
    );

    // Load configuration
    let config = Config::load()?;
    config.ensure_dirs()?;
    info!(
        socket_path = ?config.socket_path,
        agent_id = %config.agent_id,
        "configuration loaded"
    );

    let shutdown = ShutdownSignal::new();

    // UI -> conversation
    let (command_tx, command_rx) = mpsc::channel(config.queue_capacity);
    // Agent transport -> conversation, one ordered queue
    let (agent_tx, agent_rx) = mpsc::channel(config.queue_capacity);
    // Conversation -> subscribed UIs
    let (event_tx, _event_rx) = broadcast::channel::<SessionEvent>(config.queue_capacity);

    let notifier: Arc<dyn Notifier> = Arc::new(BroadcastNotifier::new(event_tx.clone()));

    let gate = PermissionGate::new(
        Arc::new(DeviceCapture::new(&config.capture_device)),
        notifier.clone(),
    );
    let controller = SessionController::new(
        Arc::new(LoopbackAgent::new(agent_tx, config.greeting.clone())),
        config.agent_id.clone(),
        notifier,
        event_tx.clone(),
    );
    let (mut conversation, snapshot_rx) = Conversation::new(gate, controller, agent_rx, event_tx.clone());

    let server = Server::new(
        &config.socket_path,
        ConversationHandle::new(command_tx),
        snapshot_rx,
        event_tx,
        shutdown.clone(),
    )?;

    info!("daemon initialized, entering main loop");

    // Main event loop
    tokio::select! {
        // Run the conversation (commands and agent events)
        _ = conversation.run(command_rx) => {
            info!("conversation exited");
        }

        // Run the IPC server (accepts client connections)
        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }

        // Wait for shutdown signal
        result = shutdown.wait() => {
            match result {
                Ok(()) => info!("shutdown signal received"),
                Err(e) => error!(?e, "failed to listen for shutdown signals"),
            }
        }
    }

    // Cleanup
    info!("shutting down...");

    conversation.shutdown().await;
    server.shutdown().await;

    info!("voice-session-daemon stopped");

    Ok(())
}
