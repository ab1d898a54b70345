use chrono::Utc;
use serde::{ Serialize, Deserialize };
use std::fmt;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub text: String,
    pub timestamp: i64,
}

impl ChatMessage {
    pub fn now(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            timestamp: Utc::now().timestamp(),
        }
    }
}

/// One chat document: owned by exactly one user, messages in append order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Chat {
    pub id: String,
    pub title: String,
    pub created_at: i64,
    pub messages: Vec<ChatMessage>,
}

impl Chat {
    /// A fresh chat: opaque id, empty title until the first exchange completes.
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: String::new(),
            created_at: Utc::now().timestamp(),
            messages: Vec::new(),
        }
    }
}

impl Default for Chat {
    fn default() -> Self {
        Self::new()
    }
}

/// Listing entry: everything but the message bodies.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatSummary {
    pub id: String,
    pub title: String,
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::User).unwrap(), "\"user\"");
        assert_eq!(serde_json::to_string(&Role::Assistant).unwrap(), "\"assistant\"");
    }

    #[test]
    fn fresh_chat_is_empty_and_untitled() {
        let chat = Chat::new();
        assert!(chat.messages.is_empty());
        assert!(chat.title.is_empty());
        assert!(!chat.id.is_empty());
    }

    #[test]
    fn distinct_chats_get_distinct_ids() {
        assert_ne!(Chat::new().id, Chat::new().id);
    }
}
