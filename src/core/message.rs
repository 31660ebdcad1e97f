use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::api::ApiMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }

    pub fn is_user(self) -> bool {
        self == Role::User
    }

    pub fn is_assistant(self) -> bool {
        self == Role::Assistant
    }
}

impl AsRef<str> for Role {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl TryFrom<&str> for Role {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            _ => Err(format!("invalid message role: {value}")),
        }
    }
}

impl TryFrom<String> for Role {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_from(value.as_str())
    }
}

impl From<Role> for String {
    fn from(value: Role) -> Self {
        value.as_str().to_string()
    }
}

/// One transcript entry. `id` is the key used to reconcile a provisional
/// assistant turn with the id the server assigns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    /// Creation time in milliseconds since the Unix epoch.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<u32>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        let id = match role {
            Role::Assistant => provisional_assistant_id(),
            _ => new_message_id(),
        };
        Self::with_id(id, role, content)
    }

    pub fn with_id(id: impl Into<String>, role: Role, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role,
            content: content.into(),
            timestamp: now_millis(),
            model: None,
            tokens: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Empty assistant placeholder created before the first delta.
    pub fn provisional_assistant() -> Self {
        Self::new(Role::Assistant, "")
    }

    pub fn is_user(&self) -> bool {
        self.role.is_user()
    }

    pub fn is_assistant(&self) -> bool {
        self.role.is_assistant()
    }

    pub fn to_api(&self) -> ApiMessage {
        ApiMessage::new(self.role.as_str(), self.content.clone())
    }
}

/// A turn handed to the orchestrator by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub role: Role,
    pub content: String,
}

impl NewMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

impl From<&str> for NewMessage {
    fn from(content: &str) -> Self {
        Self::user(content)
    }
}

impl From<String> for NewMessage {
    fn from(content: String) -> Self {
        Self::user(content)
    }
}

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn new_message_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Local id for an assistant turn the server has not named yet.
pub fn provisional_assistant_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("assistant-{}-{}", now_millis(), &suffix[..8])
}

pub fn is_provisional_id(id: &str) -> bool {
    id.starts_with("assistant-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provisional_ids_are_prefixed_and_distinct() {
        let first = provisional_assistant_id();
        let second = provisional_assistant_id();
        assert!(is_provisional_id(&first));
        assert_ne!(first, second);
        assert_eq!(first.split('-').count(), 3);
    }

    #[test]
    fn roles_round_trip_through_strings() {
        for role in [Role::User, Role::Assistant, Role::System] {
            assert_eq!(Role::try_from(role.as_str()), Ok(role));
        }
        assert!(Role::try_from("tool").is_err());
    }

    #[test]
    fn user_messages_get_plain_ids() {
        let message = ChatMessage::user("Hallo");
        assert!(!is_provisional_id(&message.id));
        assert_eq!(message.to_api(), ApiMessage::new("user", "Hallo"));
    }
}
