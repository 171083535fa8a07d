//! Wire protocol frames exchanged on the hub stream.
//!
//! Every frame is a JSON object with a mandatory `type` field. Inbound
//! (client → hub) and outbound (hub → client) frames share one enum so a
//! reference client can be tested against the hub without duplicating the
//! protocol.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{AgentId, MessageType};

/// All frames exchanged on a hub stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    // -- Inbound (client → hub) --
    /// Keepalive; updates the session's transport activity stamp.
    Heartbeat {
        ai_id: AgentId,
        timestamp: DateTime<Utc>,
    },

    /// Publish a message into a conversation (or unscoped).
    Message {
        ai_id: AgentId,
        message_type: MessageType,
        /// Text or structured payload; structured values are serialized to
        /// canonical JSON text before storage.
        content: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        conversation_id: Option<i64>,
    },

    /// Shorthand for a `message` frame with `message_type = insight`.
    Insight {
        ai_id: AgentId,
        content: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        conversation_id: Option<i64>,
    },

    /// Subscribe to a conversation's broadcasts.
    Subscribe { conversation_id: i64 },

    /// Unsubscribe from a conversation.
    Unsubscribe { conversation_id: i64 },

    /// Answer to an `activity_verification` challenge.
    ActivityConfirmation {
        ai_id: AgentId,
        content: String,
        timestamp: DateTime<Utc>,
    },

    /// Out-of-band RPC over the stream, answered with a `response` frame
    /// carrying the same correlation id.
    Request {
        request_type: String,
        #[serde(default)]
        payload: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        correlation_id: Option<String>,
    },

    // -- Outbound (hub → client) --
    /// First frame after successful authentication.
    Welcome {
        ai_id: AgentId,
        name: String,
        nickname: String,
        project: String,
        session_identifier: String,
        protocol: String,
    },

    /// Reply to a heartbeat.
    HeartbeatAck { timestamp: DateTime<Utc> },

    /// Broadcast of a freshly stored message.
    NewMessage {
        id: i64,
        sender_id: AgentId,
        sender_name: String,
        message_type: MessageType,
        content: String,
        metadata: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        conversation_id: Option<i64>,
        created_at: DateTime<Utc>,
    },

    /// Urgent challenge sent during the grace window.
    ActivityVerification { content: String, urgent: bool },

    /// The hub marked this session sleeping.
    SleepNotification { reason: String },

    /// Answer to a `request` frame.
    Response {
        request_type: String,
        payload: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        correlation_id: Option<String>,
    },

    /// Typed rejection of a frame or the whole connection. `error` is a
    /// stable code string (e.g. `invalid_token`, `superseded`).
    Error {
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        correlation_id: Option<String>,
    },
}

impl Frame {
    /// Serialize to the JSON text representation sent on the wire.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a frame from wire text.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// The `type` tag of this frame, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Heartbeat { .. } => "heartbeat",
            Frame::Message { .. } => "message",
            Frame::Insight { .. } => "insight",
            Frame::Subscribe { .. } => "subscribe",
            Frame::Unsubscribe { .. } => "unsubscribe",
            Frame::ActivityConfirmation { .. } => "activity_confirmation",
            Frame::Request { .. } => "request",
            Frame::Welcome { .. } => "welcome",
            Frame::HeartbeatAck { .. } => "heartbeat_ack",
            Frame::NewMessage { .. } => "new_message",
            Frame::ActivityVerification { .. } => "activity_verification",
            Frame::SleepNotification { .. } => "sleep_notification",
            Frame::Response { .. } => "response",
            Frame::Error { .. } => "error",
        }
    }

    /// Build an error frame with a stable code string.
    pub fn error(code: impl Into<String>) -> Self {
        Frame::Error {
            error: code.into(),
            correlation_id: None,
        }
    }

    /// Build an error frame that preserves the offending frame's
    /// correlation id.
    pub fn error_with_correlation(code: impl Into<String>, correlation_id: Option<String>) -> Self {
        Frame::Error {
            error: code.into(),
            correlation_id,
        }
    }
}
