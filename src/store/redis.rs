use async_trait::async_trait;
use crate::models::chat::{ Chat, ChatMessage, ChatSummary };
use crate::models::user::UserRecord;
use crate::store::{ ChatStore, UserStore };
use crate::cli::Args;
use std::error::Error;
use log::error;
use redis::{ Client, AsyncCommands };
use serde::{ Serialize, Deserialize };

/// On-disk shape of one chat document. The id lives in the key.
#[derive(Serialize, Deserialize)]
struct StoredChat {
    title: String,
    created_at: i64,
    messages: Vec<ChatMessage>,
}

pub struct RedisStore {
    client: Client,
    key_prefix: String,
}

impl RedisStore {
    pub fn new(args: Args) -> Result<Self, Box<dyn Error + Send + Sync>> {
        Ok(Self {
            client: Client::open(args.store_host.as_str())?,
            key_prefix: args.store_key_prefix,
        })
    }

    async fn get_connection(&self) -> Result<redis::aio::MultiplexedConnection, redis::RedisError> {
        self.client.get_multiplexed_async_connection().await
    }

    fn chat_key(&self, user_id: &str, chat_id: &str) -> String {
        format!("{}user:{}:chat:{}", self.key_prefix, user_id, chat_id)
    }

    /// Sorted set of chat ids per user, scored by creation time.
    fn index_key(&self, user_id: &str) -> String {
        format!("{}user:{}:chats", self.key_prefix, user_id)
    }

    fn user_key(&self, username: &str) -> String {
        format!("{}account:{}", self.key_prefix, username)
    }
}

#[async_trait]
impl ChatStore for RedisStore {
    async fn save_chat(
        &self,
        user_id: &str,
        chat: &Chat
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        let mut conn = self.get_connection().await?;

        let document = StoredChat {
            title: chat.title.clone(),
            created_at: chat.created_at,
            messages: chat.messages.clone(),
        };
        let json_doc = serde_json::to_string(&document)?;

        let _: () = conn.set(self.chat_key(user_id, &chat.id), &json_doc).await?;
        let _: i64 = conn.zadd(self.index_key(user_id), &chat.id, chat.created_at).await?;
        Ok(())
    }

    async fn get_chat(
        &self,
        user_id: &str,
        chat_id: &str
    ) -> Result<Option<Chat>, Box<dyn Error + Send + Sync>> {
        let mut conn = self.get_connection().await?;
        let json_doc: Option<String> = conn.get(self.chat_key(user_id, chat_id)).await?;

        match json_doc {
            Some(doc) => {
                let stored: StoredChat = serde_json::from_str(&doc)?;
                Ok(
                    Some(Chat {
                        id: chat_id.to_string(),
                        title: stored.title,
                        created_at: stored.created_at,
                        messages: stored.messages,
                    })
                )
            }
            None => Ok(None),
        }
    }

    async fn list_chats(
        &self,
        user_id: &str
    ) -> Result<Vec<ChatSummary>, Box<dyn Error + Send + Sync>> {
        let mut conn = self.get_connection().await?;
        let chat_ids: Vec<String> = conn.zrevrange(self.index_key(user_id), 0, -1).await?;

        let mut summaries = Vec::with_capacity(chat_ids.len());
        for chat_id in &chat_ids {
            let json_doc: Option<String> = conn.get(self.chat_key(user_id, chat_id)).await?;
            let Some(doc) = json_doc else {
                // Index entry without a document: stale, skip it.
                continue;
            };
            match serde_json::from_str::<StoredChat>(&doc) {
                Ok(stored) => {
                    summaries.push(ChatSummary {
                        id: chat_id.clone(),
                        title: stored.title,
                        created_at: stored.created_at,
                    });
                }
                Err(e) => {
                    error!("Error parsing chat document {}: {}", chat_id, e);
                }
            }
        }

        Ok(summaries)
    }

    async fn delete_chat(
        &self,
        user_id: &str,
        chat_id: &str
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        let mut conn = self.get_connection().await?;
        let _: i64 = conn.del(self.chat_key(user_id, chat_id)).await?;
        let _: i64 = conn.zrem(self.index_key(user_id), chat_id).await?;
        Ok(())
    }
}

#[async_trait]
impl UserStore for RedisStore {
    async fn create_user(
        &self,
        record: &UserRecord
    ) -> Result<bool, Box<dyn Error + Send + Sync>> {
        let mut conn = self.get_connection().await?;
        let json_record = serde_json::to_string(record)?;
        let created: bool = conn.set_nx(self.user_key(&record.username), &json_record).await?;
        Ok(created)
    }

    async fn get_user(
        &self,
        username: &str
    ) -> Result<Option<UserRecord>, Box<dyn Error + Send + Sync>> {
        let mut conn = self.get_connection().await?;
        let json_record: Option<String> = conn.get(self.user_key(username)).await?;

        match json_record {
            Some(doc) => Ok(Some(serde_json::from_str(&doc)?)),
            None => Ok(None),
        }
    }

    async fn update_password_hash(
        &self,
        username: &str,
        password_hash: &str
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        let mut conn = self.get_connection().await?;
        let json_record: Option<String> = conn.get(self.user_key(username)).await?;
        let Some(doc) = json_record else {
            return Err(format!("No such user: {}", username).into());
        };

        let mut record: UserRecord = serde_json::from_str(&doc)?;
        record.password_hash = password_hash.to_string();
        let _: () = conn.set(self.user_key(username), serde_json::to_string(&record)?).await?;
        Ok(())
    }
}
