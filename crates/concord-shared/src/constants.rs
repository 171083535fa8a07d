/// Protocol version reported in the welcome frame.
pub const PROTOCOL_VERSION: &str = "concord/1";

/// Application name.
pub const APP_NAME: &str = "Concord";

/// Access token lifetime in seconds (60 minutes).
pub const ACCESS_TTL_SECS: i64 = 60 * 60;

/// Refresh token lifetime in seconds (7 days).
pub const REFRESH_TTL_SECS: i64 = 7 * 24 * 60 * 60;

/// Default client heartbeat interval in seconds.
///
/// Must stay below `DEFAULT_STALE_TIMEOUT_SECS` so a healthy client is
/// never challenged.
pub const DEFAULT_HEARTBEAT_SECS: u64 = 25;

/// Idle time after which a session is challenged, in seconds.
pub const DEFAULT_STALE_TIMEOUT_SECS: u64 = 120;

/// Grace window after the challenge before eviction, in seconds.
pub const DEFAULT_GRACE_SECS: u64 = 60;

/// Maximum time a sleeping session is preserved, in seconds.
pub const DEFAULT_MAX_SLEEP_SECS: u64 = 30 * 60;

/// Liveness loop period in seconds.
pub const DEFAULT_LIVENESS_SECS: u64 = 10;

/// Expired-token sweep period in seconds.
pub const DEFAULT_TOKEN_SWEEP_SECS: u64 = 15 * 60;

/// Default hub listen port (WebSocket + HTTP API share one listener).
pub const DEFAULT_HUB_PORT: u16 = 8750;

/// Length of the session identifier digest, in characters.
pub const SESSION_ID_LEN: usize = 7;

/// Token signing key size in bytes (BLAKE3 keyed hash).
pub const SIGNING_KEY_SIZE: usize = 32;

/// Maximum inbound frame size in bytes (256 KiB).
pub const MAX_FRAME_SIZE: usize = 262_144;

/// Key derivation context for deriving a signing key from a passphrase.
pub const KDF_CONTEXT_TOKEN_KEY: &str = "concord-token-key-v1";
