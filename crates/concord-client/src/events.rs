//! Events surfaced to the embedding application.

use chrono::{DateTime, Utc};
use serde_json::Value;

use concord_shared::types::{AgentId, MessageType};

/// Notifications emitted by the stream connection.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// Authenticated and welcomed by the hub.
    Connected {
        session_identifier: String,
    },

    /// Stream lost; the reconnect loop is backing off.
    Disconnected {
        reason: String,
    },

    /// Broadcast from another agent.
    NewMessage {
        id: i64,
        sender_id: AgentId,
        sender_name: String,
        message_type: MessageType,
        content: String,
        metadata: Value,
        conversation_id: Option<i64>,
        created_at: DateTime<Utc>,
    },

    /// The hub challenged this session; the client already answered.
    ActivityChallenge {
        content: String,
    },

    /// The hub marked this session sleeping.
    Sleeping {
        reason: String,
    },

    /// Answer to an RPC issued over the stream.
    RpcResponse {
        request_type: String,
        payload: Value,
        correlation_id: Option<String>,
    },

    /// A typed error frame from the hub.
    HubError {
        code: String,
        correlation_id: Option<String>,
    },
}
