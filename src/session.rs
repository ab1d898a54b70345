use chrono::Utc;
use crate::models::chat::{ Chat, ChatMessage, Role };

/// Guest sessions never touch the store; authenticated sessions persist under
/// the user id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionMode {
    Guest,
    Authenticated {
        user_id: String,
    },
}

/// Per-session state that the original kept in ambient page globals: which
/// mode the session is in and which chat is currently open. The active chat's
/// message sequence is append-only for the life of the session.
#[derive(Clone, Debug)]
pub struct SessionState {
    pub mode: SessionMode,
    pub active_chat: Chat,
    /// Unix timestamp of the last request that touched this session; idle
    /// guest sessions are swept once it falls behind the configured TTL.
    pub last_active: i64,
}

impl SessionState {
    pub fn guest() -> Self {
        Self {
            mode: SessionMode::Guest,
            active_chat: Chat::new(),
            last_active: Utc::now().timestamp(),
        }
    }

    pub fn authenticated(user_id: impl Into<String>) -> Self {
        Self {
            mode: SessionMode::Authenticated { user_id: user_id.into() },
            active_chat: Chat::new(),
            last_active: Utc::now().timestamp(),
        }
    }

    pub fn touch(&mut self) {
        self.last_active = Utc::now().timestamp();
    }

    pub fn user_id(&self) -> Option<&str> {
        match &self.mode {
            SessionMode::Authenticated { user_id } => Some(user_id),
            SessionMode::Guest => None,
        }
    }

    pub fn append(&mut self, role: Role, text: &str) {
        self.active_chat.messages.push(ChatMessage::now(role, text));
    }

    /// Replaces the active chat with a fresh empty one and returns its id.
    pub fn start_new_chat(&mut self) -> String {
        self.active_chat = Chat::new();
        self.active_chat.id.clone()
    }

    pub fn open_chat(&mut self, chat: Chat) {
        self.active_chat = chat;
    }

    /// Title is set at most once; later calls leave it untouched.
    pub fn set_title_once(&mut self, title: &str) -> bool {
        if self.active_chat.title.is_empty() && !title.is_empty() {
            self.active_chat.title = title.to_string();
            true
        } else {
            false
        }
    }

    /// Called after a chat is deleted: if it was the open one, the session
    /// falls back to a fresh empty chat. Returns whether a reset happened.
    pub fn reset_if_active(&mut self, chat_id: &str) -> bool {
        if self.active_chat.id == chat_id {
            self.active_chat = Chat::new();
            true
        } else {
            false
        }
    }
}
