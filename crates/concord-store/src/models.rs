//! Domain model structs persisted in the SQLite database.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to the HTTP layer or a stream frame.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use concord_shared::types::{AgentId, CollabStatus, ConversationStatus, MessageType, Role};

// ---------------------------------------------------------------------------
// Agent profile
// ---------------------------------------------------------------------------

/// A registered agent. The primary key is the stable integer id supplied
/// at registration; names are not unique.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentProfile {
    pub id: AgentId,
    pub name: String,
    pub nickname: String,
    pub expertise: String,
    pub version: String,
    pub project: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Conversation {
    pub id: i64,
    pub title: String,
    pub category: String,
    pub project_context: String,
    pub status: ConversationStatus,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A stored message. Immutable after insert; `created_at` is assigned by
/// the store, never by the sender.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredMessage {
    pub id: i64,
    pub conversation_id: Option<i64>,
    pub sender_id: AgentId,
    pub recipient_id: Option<AgentId>,
    pub message_type: MessageType,
    /// Canonical text content.
    pub content: String,
    /// Canonical JSON object; never a scalar.
    pub metadata: Value,
    pub project: String,
    pub created_at: DateTime<Utc>,
}

/// Insert-side view of a message, before the store assigns id/timestamp.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub sender_id: AgentId,
    pub conversation_id: Option<i64>,
    pub recipient_id: Option<AgentId>,
    pub message_type: MessageType,
    /// Raw content as supplied by the caller; normalized at insert.
    pub content: Value,
    /// Raw metadata as supplied by the caller; normalized at insert.
    pub metadata: Option<Value>,
    pub project: String,
}

/// Filter for [`Database::list_messages`].
///
/// [`Database::list_messages`]: crate::Database::list_messages
#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    pub sender_id: Option<AgentId>,
    pub recipient_id: Option<AgentId>,
    pub message_type: Option<MessageType>,
    /// Substring match against `content`.
    pub search: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: u32,
    pub offset: u32,
}

impl MessageFilter {
    pub fn new() -> Self {
        Self {
            limit: 50,
            ..Default::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Token pair
// ---------------------------------------------------------------------------

/// A persisted access/refresh token pair. Revocation is monotonic: once
/// `is_revoked` is set it is never cleared.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenPair {
    pub id: i64,
    pub access_token: String,
    pub refresh_token: String,
    pub ai_id: AgentId,
    pub issued_at: DateTime<Utc>,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
    pub is_revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Permission
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Permission {
    pub ai_id: AgentId,
    pub project: String,
    pub role: Role,
    pub granted_by: Option<AgentId>,
    pub granted_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Work session
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkSession {
    pub id: Uuid,
    pub ai_id: AgentId,
    pub session_type: String,
    pub project: String,
    pub metadata: Value,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Collaboration request
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CollabRequest {
    pub id: Uuid,
    pub requester_id: AgentId,
    pub target_ai_id: AgentId,
    pub request_type: String,
    pub title: String,
    pub description: String,
    pub status: CollabStatus,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Brain state
// ---------------------------------------------------------------------------

/// Per-agent resumption record. One row per agent; writes are upserts and
/// `cycle_count` only ever grows.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrainState {
    pub ai_id: AgentId,
    pub current_task: String,
    pub last_thought: String,
    pub last_insight: String,
    pub current_cycle: String,
    pub cycle_count: i64,
    pub last_activity: DateTime<Utc>,
    /// Opaque checkpoint payload; always a JSON object.
    pub checkpoint_data: Value,
    pub session_identifier: String,
}

/// Caller-supplied brain-state fields; the store manages `cycle_count`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BrainStateUpdate {
    #[serde(default)]
    pub current_task: Option<String>,
    #[serde(default)]
    pub last_thought: Option<String>,
    #[serde(default)]
    pub last_insight: Option<String>,
    #[serde(default)]
    pub current_cycle: Option<String>,
    /// Optional floor for the stored cycle count. The store never lets the
    /// counter decrease; on update it advances to
    /// `max(supplied, existing + 1)`.
    #[serde(default)]
    pub cycle_count: Option<i64>,
    #[serde(default)]
    pub checkpoint_data: Option<Value>,
    #[serde(default)]
    pub session_identifier: Option<String>,
}

// ---------------------------------------------------------------------------
// Auth audit
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthAudit {
    pub id: i64,
    pub ai_id: AgentId,
    pub ai_name: String,
    pub project: String,
    pub success: bool,
    pub details: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Hub session log
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HubSessionRecord {
    pub id: i64,
    pub ai_id: AgentId,
    pub session_identifier: String,
    pub project: String,
    pub connected_at: DateTime<Utc>,
    pub disconnected_at: Option<DateTime<Utc>>,
    pub close_reason: Option<String>,
}
