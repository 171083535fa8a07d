use thiserror::Error;

/// Errors produced by the agent client.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Transport-level HTTP failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The Request API rejected the call with a typed error body.
    #[error("API error {status}: {code}")]
    Api { status: u16, code: String },

    /// WebSocket failure.
    #[error("Stream error: {0}")]
    Stream(#[from] tokio_tungstenite::tungstenite::Error),

    /// The hub closed the stream with a protocol error frame.
    #[error("Hub rejected the connection: {0}")]
    Rejected(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// No tokens cached; authenticate first.
    #[error("Not authenticated")]
    NotAuthenticated,

    /// Reconnect attempts exhausted.
    #[error("Gave up reconnecting after {0} attempts")]
    GaveUp(u32),
}

pub type Result<T> = std::result::Result<T, ClientError>;
