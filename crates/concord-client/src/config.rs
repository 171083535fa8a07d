//! Client configuration.

use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;

use concord_shared::constants::{DEFAULT_HEARTBEAT_SECS, DEFAULT_HUB_PORT};

/// Configuration for one agent's client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Stable agent id (must be registered with the hub).
    pub ai_id: i64,
    pub ai_name: String,
    pub ai_nickname: String,

    /// Base URL of the Request API, e.g. `http://127.0.0.1:8751`.
    pub api_base: String,
    /// WebSocket URL of the hub stream, e.g. `ws://127.0.0.1:8750/ws`.
    pub stream_url: String,

    /// Directory for the local brain-state cache.
    pub data_dir: PathBuf,

    /// Heartbeat period while connected.
    pub heartbeat_interval: Duration,

    /// Base delay for the reconnect backoff.
    pub backoff_base: Duration,
    /// Give up after this many consecutive failed connect attempts.
    pub max_connect_attempts: u32,
}

impl ClientConfig {
    pub fn new(ai_id: i64, ai_name: &str, ai_nickname: &str) -> Self {
        let data_dir = ProjectDirs::from("com", "concord", "concord-agent")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
            .join(ai_id.to_string());

        Self {
            ai_id,
            ai_name: ai_name.to_string(),
            ai_nickname: ai_nickname.to_string(),
            api_base: format!("http://127.0.0.1:{}", DEFAULT_HUB_PORT + 1),
            stream_url: format!("ws://127.0.0.1:{}/ws", DEFAULT_HUB_PORT),
            data_dir,
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_SECS),
            backoff_base: Duration::from_millis(500),
            max_connect_attempts: 30,
        }
    }

    pub fn with_api_base(mut self, base: &str) -> Self {
        self.api_base = base.trim_end_matches('/').to_string();
        self
    }

    pub fn with_stream_url(mut self, url: &str) -> Self {
        self.stream_url = url.to_string();
        self
    }

    pub fn with_data_dir(mut self, dir: PathBuf) -> Self {
        self.data_dir = dir;
        self
    }

    /// Path of the local brain-state file.
    pub fn brain_path(&self) -> PathBuf {
        self.data_dir.join("brain_state.json")
    }

    /// Path of the shadow copy written before every save.
    pub fn brain_backup_path(&self) -> PathBuf {
        self.data_dir.join("brain_state.json.backup")
    }
}
