use serde::{Deserialize, Serialize};

// Agent identity = stable integer id assigned at registration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct AgentId(pub i64);

impl AgentId {
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for AgentId {
    fn from(v: i64) -> Self {
        Self(v)
    }
}

/// Per-project role, in ascending order of authority for `viewer` →
/// `member` → `contributor` → `admin`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Viewer,
    Member,
    Contributor,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Viewer => "viewer",
            Role::Member => "member",
            Role::Contributor => "contributor",
            Role::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "viewer" => Some(Role::Viewer),
            "member" => Some(Role::Member),
            "contributor" => Some(Role::Contributor),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message taxonomy carried on every stored message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Message,
    Question,
    Response,
    Insight,
    Decision,
    Suggestion,
    Notification,
    Instruction,
    TaskAssignment,
    Communication,
    Update,
    Reference,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Message => "message",
            MessageType::Question => "question",
            MessageType::Response => "response",
            MessageType::Insight => "insight",
            MessageType::Decision => "decision",
            MessageType::Suggestion => "suggestion",
            MessageType::Notification => "notification",
            MessageType::Instruction => "instruction",
            MessageType::TaskAssignment => "task_assignment",
            MessageType::Communication => "communication",
            MessageType::Update => "update",
            MessageType::Reference => "reference",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "message" => Some(MessageType::Message),
            "question" => Some(MessageType::Question),
            "response" => Some(MessageType::Response),
            "insight" => Some(MessageType::Insight),
            "decision" => Some(MessageType::Decision),
            "suggestion" => Some(MessageType::Suggestion),
            "notification" => Some(MessageType::Notification),
            "instruction" => Some(MessageType::Instruction),
            "task_assignment" => Some(MessageType::TaskAssignment),
            "communication" => Some(MessageType::Communication),
            "update" => Some(MessageType::Update),
            "reference" => Some(MessageType::Reference),
            _ => None,
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Active,
    Archived,
    Completed,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationStatus::Active => "active",
            ConversationStatus::Archived => "archived",
            ConversationStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(ConversationStatus::Active),
            "archived" => Some(ConversationStatus::Archived),
            "completed" => Some(ConversationStatus::Completed),
            _ => None,
        }
    }
}

/// Live-session state as tracked by the hub registry.
///
/// `Evicted` is terminal; a session never leaves it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Active,
    Challenged,
    Sleeping,
    Evicted,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CollabStatus {
    Pending,
    Accepted,
    Declined,
    Completed,
}

impl CollabStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CollabStatus::Pending => "pending",
            CollabStatus::Accepted => "accepted",
            CollabStatus::Declined => "declined",
            CollabStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(CollabStatus::Pending),
            "accepted" => Some(CollabStatus::Accepted),
            "declined" => Some(CollabStatus::Declined),
            "completed" => Some(CollabStatus::Completed),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_ordering() {
        assert!(Role::Admin > Role::Contributor);
        assert!(Role::Contributor > Role::Member);
        assert!(Role::Member > Role::Viewer);
    }

    #[test]
    fn test_role_roundtrip() {
        for role in [Role::Viewer, Role::Member, Role::Contributor, Role::Admin] {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse("owner"), None);
    }

    #[test]
    fn test_message_type_roundtrip() {
        let all = [
            MessageType::Message,
            MessageType::Question,
            MessageType::Response,
            MessageType::Insight,
            MessageType::Decision,
            MessageType::Suggestion,
            MessageType::Notification,
            MessageType::Instruction,
            MessageType::TaskAssignment,
            MessageType::Communication,
            MessageType::Update,
            MessageType::Reference,
        ];
        for mt in all {
            assert_eq!(MessageType::parse(mt.as_str()), Some(mt));
        }
    }

    #[test]
    fn test_message_type_serde_snake_case() {
        let json = serde_json::to_string(&MessageType::TaskAssignment).unwrap();
        assert_eq!(json, "\"task_assignment\"");
    }
}
