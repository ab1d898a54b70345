use async_trait::async_trait;
use std::collections::HashMap;
use std::error::Error;
use tokio::sync::Mutex;
use crate::models::chat::{ Chat, ChatSummary };
use crate::models::user::UserRecord;
use crate::store::{ ChatStore, UserStore };

/// In-process backend for guest-only deployments and tests. Nothing survives
/// a restart.
pub struct MemoryStore {
    chats: Mutex<HashMap<String, HashMap<String, Chat>>>,
    users: Mutex<HashMap<String, UserRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            chats: Mutex::new(HashMap::new()),
            users: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatStore for MemoryStore {
    async fn save_chat(
        &self,
        user_id: &str,
        chat: &Chat
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        let mut chats = self.chats.lock().await;
        chats
            .entry(user_id.to_string())
            .or_default()
            .insert(chat.id.clone(), chat.clone());
        Ok(())
    }

    async fn get_chat(
        &self,
        user_id: &str,
        chat_id: &str
    ) -> Result<Option<Chat>, Box<dyn Error + Send + Sync>> {
        let chats = self.chats.lock().await;
        Ok(chats.get(user_id).and_then(|user_chats| user_chats.get(chat_id).cloned()))
    }

    async fn list_chats(
        &self,
        user_id: &str
    ) -> Result<Vec<ChatSummary>, Box<dyn Error + Send + Sync>> {
        let chats = self.chats.lock().await;
        let mut summaries: Vec<ChatSummary> = chats
            .get(user_id)
            .map(|user_chats| {
                user_chats
                    .values()
                    .map(|chat| ChatSummary {
                        id: chat.id.clone(),
                        title: chat.title.clone(),
                        created_at: chat.created_at,
                    })
                    .collect()
            })
            .unwrap_or_default();
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(summaries)
    }

    async fn delete_chat(
        &self,
        user_id: &str,
        chat_id: &str
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        let mut chats = self.chats.lock().await;
        if let Some(user_chats) = chats.get_mut(user_id) {
            user_chats.remove(chat_id);
        }
        Ok(())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn create_user(
        &self,
        record: &UserRecord
    ) -> Result<bool, Box<dyn Error + Send + Sync>> {
        let mut users = self.users.lock().await;
        if users.contains_key(&record.username) {
            return Ok(false);
        }
        users.insert(record.username.clone(), record.clone());
        Ok(true)
    }

    async fn get_user(
        &self,
        username: &str
    ) -> Result<Option<UserRecord>, Box<dyn Error + Send + Sync>> {
        let users = self.users.lock().await;
        Ok(users.get(username).cloned())
    }

    async fn update_password_hash(
        &self,
        username: &str,
        password_hash: &str
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        let mut users = self.users.lock().await;
        match users.get_mut(username) {
            Some(record) => {
                record.password_hash = password_hash.to_string();
                Ok(())
            }
            None => Err(format!("No such user: {}", username).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chat::{ ChatMessage, Role };

    fn chat_with(created_at: i64, title: &str) -> Chat {
        let mut chat = Chat::new();
        chat.created_at = created_at;
        chat.title = title.to_string();
        chat
    }

    #[tokio::test]
    async fn save_then_get_roundtrip() {
        let store = MemoryStore::new();
        let mut chat = chat_with(100, "greetings");
        chat.messages.push(ChatMessage::now(Role::User, "hello"));

        store.save_chat("alice", &chat).await.unwrap();
        let loaded = store.get_chat("alice", &chat.id).await.unwrap().unwrap();
        assert_eq!(loaded.title, "greetings");
        assert_eq!(loaded.messages.len(), 1);

        // Other users never see it.
        assert!(store.get_chat("bob", &chat.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn listing_is_newest_first() {
        let store = MemoryStore::new();
        let old = chat_with(100, "old");
        let new = chat_with(200, "new");
        store.save_chat("alice", &old).await.unwrap();
        store.save_chat("alice", &new).await.unwrap();

        let listing = store.list_chats("alice").await.unwrap();
        assert_eq!(listing.len(), 2);
        assert_eq!(listing[0].title, "new");
        assert_eq!(listing[1].title, "old");
    }

    #[tokio::test]
    async fn delete_removes_from_listing() {
        let store = MemoryStore::new();
        let chat = chat_with(100, "doomed");
        store.save_chat("alice", &chat).await.unwrap();
        store.delete_chat("alice", &chat.id).await.unwrap();

        assert!(store.get_chat("alice", &chat.id).await.unwrap().is_none());
        assert!(store.list_chats("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_username_is_rejected() {
        let store = MemoryStore::new();
        let record = UserRecord::new("alice", "hash", None);
        assert!(store.create_user(&record).await.unwrap());
        assert!(!store.create_user(&record).await.unwrap());
    }
}
