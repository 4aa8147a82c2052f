//! Configuration loading and management

use std::path::PathBuf;

use anyhow::{Context, Result};

const DEFAULT_AGENT_ID: &str = "loopback";
const DEFAULT_CAPTURE_DEVICE: &str = "/dev/snd";
const DEFAULT_GREETING: &str = "Hi! How can I help you today?";
const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the Unix domain socket for IPC
    pub socket_path: PathBuf,

    /// Directory for runtime data
    pub data_dir: PathBuf,

    /// Agent to open sessions with
    pub agent_id: String,

    /// Device node checked when asking for microphone access
    pub capture_device: PathBuf,

    /// Opening line spoken by the loopback agent, if any
    pub greeting: Option<String>,

    /// Capacity of the command, agent event and broadcast queues
    pub queue_capacity: usize,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let home = lookup("HOME").context("HOME is not set")?;
        let data_dir = PathBuf::from(&home)
            .join(".local")
            .join("share")
            .join("voice-session");

        let socket_path = lookup("VOICE_SESSION_SOCKET")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("daemon.sock"));

        let agent_id = lookup("VOICE_AGENT_ID").unwrap_or_else(|| DEFAULT_AGENT_ID.to_string());

        let capture_device = PathBuf::from(
            lookup("VOICE_CAPTURE_DEVICE").unwrap_or_else(|| DEFAULT_CAPTURE_DEVICE.to_string()),
        );

        // Set but empty disables the greeting
        let greeting = match lookup("VOICE_AGENT_GREETING") {
            Some(g) if g.trim().is_empty() => None,
            Some(g) => Some(g),
            None => Some(DEFAULT_GREETING.to_string()),
        };

        let queue_capacity = match lookup("VOICE_QUEUE_CAPACITY") {
            Some(raw) => raw
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .with_context(|| format!("invalid VOICE_QUEUE_CAPACITY: {raw}"))?,
            None => DEFAULT_QUEUE_CAPACITY,
        };

        Ok(Self {
            socket_path,
            data_dir,
            agent_id,
            capture_device,
            greeting,
            queue_capacity,
        })
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("failed to create {}", self.data_dir.display()))?;
        Ok(())
    }
}
