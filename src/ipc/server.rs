//! Unix domain socket server for IPC
//!
//! Provides request-response communication and push notifications for
//! session events to subscribed clients. Session state is only ever read
//! from the conversation snapshot; changes go through the command queue.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::conversation::{ConversationHandle, SessionSnapshot};
use crate::events::SessionEvent;
use crate::lifecycle::ShutdownSignal;

use super::protocol::{Request, Response, StatusReport, MAX_FRAME_LEN};

/// IPC Server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    context: Arc<ClientContext>,
    shutdown_tx: broadcast::Sender<()>,
}

/// Everything a client handler needs, shared across connections
struct ClientContext {
    conversation: ConversationHandle,
    snapshot_rx: watch::Receiver<SessionSnapshot>,
    event_tx: broadcast::Sender<SessionEvent>,
    shutdown: ShutdownSignal,
    start_time: Instant,
}

impl Server {
    /// Create a new IPC server
    pub fn new(
        socket_path: &Path,
        conversation: ConversationHandle,
        snapshot_rx: watch::Receiver<SessionSnapshot>,
        event_tx: broadcast::Sender<SessionEvent>,
        shutdown: ShutdownSignal,
    ) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)
                .context("failed to create socket directory")?;
        }

        // Remove stale socket if it exists
        if socket_path.exists() {
            std::fs::remove_file(socket_path)
                .context("failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path)
            .context("failed to bind Unix socket")?;

        // Owner-only access
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        let context = Arc::new(ClientContext {
            conversation,
            snapshot_rx,
            event_tx,
            shutdown,
            start_time: Instant::now(),
        });

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener: Some(listener),
            context,
            shutdown_tx,
        })
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        let listener = self.listener.as_ref()
            .context("server not initialized")?;

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let context = Arc::clone(&self.context);
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = Self::handle_client(stream, context) => {
                                if let Err(e) = result {
                                    warn!(?e, "client handler error");
                                }
                            }
                            _ = shutdown_rx.recv() => {
                                debug!("client handler shutting down");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(?e, "accept error");
                }
            }
        }
    }

    /// Handle a single client connection
    async fn handle_client(stream: UnixStream, context: Arc<ClientContext>) -> Result<()> {
        let (reader, mut writer) = stream.into_split();
        let (request_tx, mut request_rx) = mpsc::channel(8);
        let mut events: Option<broadcast::Receiver<SessionEvent>> = None;

        // Reading runs alongside pushes so a frame is never cut in half
        let reading = Self::read_requests(reader, request_tx);
        tokio::pin!(reading);
        let mut reading_done = false;

        loop {
            tokio::select! {
                result = &mut reading, if !reading_done => {
                    reading_done = true;
                    result?;
                }

                incoming = request_rx.recv() => {
                    let request = match incoming {
                        Some(Ok(request)) => request,
                        Some(Err(e)) => {
                            warn!(error = %e, "malformed request");
                            let response = Response::error("bad_request", e.to_string());
                            Self::send_message(&mut writer, &response).await?;
                            continue;
                        }
                        None => {
                            debug!("client disconnected");
                            return Ok(());
                        }
                    };

                    debug!(?request, "received request");

                    let (response, subscribe) = Self::process_request(request, &context).await;
                    if subscribe && events.is_none() {
                        events = Some(context.event_tx.subscribe());
                        debug!("client subscribed to notifications");
                    }

                    Self::send_message(&mut writer, &response).await?;
                }

                event = Self::next_event(&mut events) => {
                    Self::send_message(&mut writer, &Response::Event { event }).await?;
                }
            }
        }
    }

    /// Read length-prefixed requests until the client hangs up
    async fn read_requests(
        mut reader: OwnedReadHalf,
        request_tx: mpsc::Sender<serde_json::Result<Request>>,
    ) -> Result<()> {
        let mut len_buf = [0u8; 4];

        loop {
            // Read message length (4-byte little-endian)
            match reader.read_exact(&mut len_buf).await {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
                Err(e) => return Err(e.into()),
            }

            let len = u32::from_le_bytes(len_buf) as usize;
            if len > MAX_FRAME_LEN {
                warn!(len, "message too large, disconnecting");
                return Ok(());
            }

            let mut msg_buf = vec![0u8; len];
            reader.read_exact(&mut msg_buf).await?;

            if request_tx.send(serde_json::from_slice(&msg_buf)).await.is_err() {
                return Ok(());
            }
        }
    }

    /// Next pushed event, or never if the client has not subscribed
    async fn next_event(events: &mut Option<broadcast::Receiver<SessionEvent>>) -> SessionEvent {
        if let Some(rx) = events.as_mut() {
            loop {
                match rx.recv().await {
                    Ok(event) => return event,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
        std::future::pending().await
    }

    /// Send a length-prefixed JSON message
    async fn send_message<T: serde::Serialize>(writer: &mut OwnedWriteHalf, msg: &T) -> Result<()> {
        let msg_bytes = serde_json::to_vec(msg)?;
        let msg_len = (msg_bytes.len() as u32).to_le_bytes();

        writer.write_all(&msg_len).await?;
        writer.write_all(&msg_bytes).await?;

        Ok(())
    }

    /// Process a request and return a response
    /// Returns (Response, should_subscribe)
    async fn process_request(request: Request, context: &ClientContext) -> (Response, bool) {
        let conversation = &context.conversation;

        let response = match request {
            Request::Ping => Response::Pong,

            Request::GetStatus => {
                let snapshot = context.snapshot_rx.borrow();
                let uptime_secs = context.start_time.elapsed().as_secs();
                Response::Status(StatusReport::new(&snapshot, uptime_secs))
            }

            Request::GetTranscript => {
                let turns = context.snapshot_rx.borrow().turns.to_vec();
                Response::Transcript { turns }
            }

            Request::RequestPermission => match conversation.request_permission().await {
                Ok(state) => Response::Permission { state },
                Err(e) => unavailable(e),
            },

            Request::StartSession => match conversation.start_session().await {
                Ok(Ok(())) => Response::Ok,
                Ok(Err(e)) => e.into(),
                Err(e) => unavailable(e),
            },

            Request::EndSession => match conversation.end_session().await {
                Ok(()) => Response::Ok,
                Err(e) => unavailable(e),
            },

            Request::Say { text } if text.trim().is_empty() => {
                Response::error("bad_request", "text must not be empty")
            }

            Request::Say { text } => match conversation.send_text(text).await {
                Ok(Ok(())) => Response::Ok,
                Ok(Err(e)) => e.into(),
                Err(e) => unavailable(e),
            },

            Request::Subscribe => return (Response::Subscribed, true),

            Request::Shutdown => {
                info!("shutdown requested via IPC");
                context.shutdown.trigger();
                Response::Ok
            }
        };

        (response, false)
    }

    /// Gracefully shutdown the server
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        // Remove socket file
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(?e, "failed to remove socket file");
            }
        }

        info!("IPC server shutdown complete");
    }
}

fn unavailable(err: anyhow::Error) -> Response {
    error!(?err, "conversation unavailable");
    Response::error("unavailable", err.to_string())
}
