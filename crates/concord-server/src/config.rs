//! Hub configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the hub can start with zero
//! configuration for local development. CLI flags (host/port/data dir)
//! override the environment.

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use concord_shared::constants::{
    DEFAULT_GRACE_SECS, DEFAULT_HEARTBEAT_SECS, DEFAULT_HUB_PORT, DEFAULT_LIVENESS_SECS,
    DEFAULT_MAX_SLEEP_SECS, DEFAULT_STALE_TIMEOUT_SECS, DEFAULT_TOKEN_SWEEP_SECS,
};
use concord_shared::token::{derive_signing_key, signing_key_from_hex, SigningKey};

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the stream listener binds to.
    /// CLI: `--host` / Env: `CONCORD_HOST` / Default: `127.0.0.1`
    pub host: IpAddr,

    /// Port for the WebSocket stream listener.
    /// CLI: `--port` / Env: `CONCORD_PORT` / Default: `8750`
    pub port: u16,

    /// Port for the sibling Request API listener.
    /// CLI: `--api-port` / Env: `CONCORD_API_PORT` / Default: `port + 1`
    pub api_port: u16,

    /// Data directory holding the database and the process lock file.
    /// CLI: `--data-dir` / Env: `CONCORD_DATA_DIR`
    /// Default: platform data dir (resolved by the store when `None`).
    pub data_dir: Option<PathBuf>,

    /// Explicit database path. Env: `CONCORD_DB_PATH`.
    /// Takes precedence over `data_dir`.
    pub db_path: Option<PathBuf>,

    /// Token signing key. Env: `CONCORD_TOKEN_KEY` (64 hex chars).
    /// When unset, derived from a stable development passphrase so tokens
    /// survive restarts even without configuration.
    pub signing_key: SigningKey,
    pub signing_key_from_env: bool,

    // -- Liveness timings --
    /// Env: `CONCORD_HEARTBEAT_SECS`. Advisory; clients own the heartbeat.
    pub heartbeat_interval: Duration,
    /// Env: `CONCORD_STALE_SECS`.
    pub stale_timeout: Duration,
    /// Env: `CONCORD_GRACE_SECS`.
    pub grace: Duration,
    /// Env: `CONCORD_MAX_SLEEP_SECS`.
    pub max_sleep: Duration,
    /// Env: `CONCORD_LIVENESS_SECS`.
    pub liveness_interval: Duration,
    /// Env: `CONCORD_TOKEN_SWEEP_SECS`.
    pub token_sweep_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: [127, 0, 0, 1].into(),
            port: DEFAULT_HUB_PORT,
            api_port: DEFAULT_HUB_PORT + 1,
            data_dir: None,
            db_path: None,
            signing_key: derive_signing_key(b"concord-dev-signing-key"),
            signing_key_from_env: false,
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_SECS),
            stale_timeout: Duration::from_secs(DEFAULT_STALE_TIMEOUT_SECS),
            grace: Duration::from_secs(DEFAULT_GRACE_SECS),
            max_sleep: Duration::from_secs(DEFAULT_MAX_SLEEP_SECS),
            liveness_interval: Duration::from_secs(DEFAULT_LIVENESS_SECS),
            token_sweep_interval: Duration::from_secs(DEFAULT_TOKEN_SWEEP_SECS),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(host) = std::env::var("CONCORD_HOST") {
            match host.parse::<IpAddr>() {
                Ok(parsed) => config.host = parsed,
                Err(_) => tracing::warn!(value = %host, "Invalid CONCORD_HOST, using default"),
            }
        }

        if let Some(port) = env_u64("CONCORD_PORT") {
            config.port = port as u16;
            config.api_port = config.port + 1;
        }
        if let Some(port) = env_u64("CONCORD_API_PORT") {
            config.api_port = port as u16;
        }

        if let Ok(dir) = std::env::var("CONCORD_DATA_DIR") {
            config.data_dir = Some(PathBuf::from(dir));
        }
        if let Ok(path) = std::env::var("CONCORD_DB_PATH") {
            config.db_path = Some(PathBuf::from(path));
        }

        if let Ok(hex_key) = std::env::var("CONCORD_TOKEN_KEY") {
            match signing_key_from_hex(&hex_key) {
                Ok(key) => {
                    config.signing_key = key;
                    config.signing_key_from_env = true;
                }
                Err(_) => {
                    tracing::warn!("Invalid CONCORD_TOKEN_KEY (need 64 hex chars), using derived dev key");
                }
            }
        }

        if let Some(secs) = env_u64("CONCORD_HEARTBEAT_SECS") {
            config.heartbeat_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("CONCORD_STALE_SECS") {
            config.stale_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("CONCORD_GRACE_SECS") {
            config.grace = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("CONCORD_MAX_SLEEP_SECS") {
            config.max_sleep = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("CONCORD_LIVENESS_SECS") {
            config.liveness_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("CONCORD_TOKEN_SWEEP_SECS") {
            config.token_sweep_interval = Duration::from_secs(secs);
        }

        config.validate_timings();
        config
    }

    /// Enforce the required ordering between liveness timings, falling
    /// back to defaults with a warning instead of refusing to start.
    pub fn validate_timings(&mut self) {
        if self.heartbeat_interval >= self.stale_timeout {
            tracing::warn!(
                heartbeat_secs = self.heartbeat_interval.as_secs(),
                stale_secs = self.stale_timeout.as_secs(),
                "heartbeat interval must be below the stale timeout; restoring defaults"
            );
            self.heartbeat_interval = Duration::from_secs(DEFAULT_HEARTBEAT_SECS);
            self.stale_timeout = Duration::from_secs(DEFAULT_STALE_TIMEOUT_SECS);
        }
        if self.grace.is_zero() {
            tracing::warn!("grace period must be positive; restoring default");
            self.grace = Duration::from_secs(DEFAULT_GRACE_SECS);
        }
        if self.max_sleep < self.grace {
            tracing::warn!(
                max_sleep_secs = self.max_sleep.as_secs(),
                grace_secs = self.grace.as_secs(),
                "max sleep must be at least the grace period; raising it"
            );
            self.max_sleep = self.grace;
        }
    }

    /// Socket address of the stream listener.
    pub fn stream_addr(&self) -> std::net::SocketAddr {
        (self.host, self.port).into()
    }

    /// Socket address of the Request API listener.
    pub fn api_addr(&self) -> std::net::SocketAddr {
        (self.host, self.api_port).into()
    }

    /// Path of the process lock file.
    pub fn lock_path(&self) -> PathBuf {
        match &self.data_dir {
            Some(dir) => dir.join("concord-hub.pid"),
            None => std::env::temp_dir().join("concord-hub.pid"),
        }
    }
}

fn env_u64(name: &str) -> Option<u64> {
    match std::env::var(name) {
        Ok(val) => match val.parse::<u64>() {
            Ok(n) => Some(n),
            Err(_) => {
                tracing::warn!(var = name, value = %val, "Invalid numeric env var, ignoring");
                None
            }
        },
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.port, DEFAULT_HUB_PORT);
        assert_eq!(config.api_port, DEFAULT_HUB_PORT + 1);
        assert!(config.heartbeat_interval < config.stale_timeout);
        assert!(!config.grace.is_zero());
        assert!(config.max_sleep >= config.grace);
    }

    #[test]
    fn test_validate_timings_restores_ordering() {
        let mut config = ServerConfig {
            heartbeat_interval: Duration::from_secs(300),
            stale_timeout: Duration::from_secs(10),
            ..Default::default()
        };
        config.validate_timings();
        assert!(config.heartbeat_interval < config.stale_timeout);
    }

    #[test]
    fn test_validate_timings_raises_max_sleep() {
        let mut config = ServerConfig {
            grace: Duration::from_secs(120),
            max_sleep: Duration::from_secs(30),
            ..Default::default()
        };
        config.validate_timings();
        assert_eq!(config.max_sleep, config.grace);
    }

    #[test]
    fn test_signing_key_stable_without_env() {
        let a = ServerConfig::default().signing_key;
        let b = ServerConfig::default().signing_key;
        assert_eq!(a, b);
    }
}
