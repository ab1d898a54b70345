mod memory;
mod redis;

pub use memory::MemoryStore;

use async_trait::async_trait;
use log::info;
use std::error::Error;
use std::sync::Arc;
use crate::cli::Args;
use crate::models::chat::{ Chat, ChatSummary };
use crate::models::user::UserRecord;

/// One document per chat, one collection (key space) per user. Writes are
/// whole-document, last-write-wins.
#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn save_chat(
        &self,
        user_id: &str,
        chat: &Chat
    ) -> Result<(), Box<dyn Error + Send + Sync>>;

    async fn get_chat(
        &self,
        user_id: &str,
        chat_id: &str
    ) -> Result<Option<Chat>, Box<dyn Error + Send + Sync>>;

    /// Listing is ordered by creation time, newest first.
    async fn list_chats(
        &self,
        user_id: &str
    ) -> Result<Vec<ChatSummary>, Box<dyn Error + Send + Sync>>;

    async fn delete_chat(
        &self,
        user_id: &str,
        chat_id: &str
    ) -> Result<(), Box<dyn Error + Send + Sync>>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Returns false without writing when the username is already taken.
    async fn create_user(
        &self,
        record: &UserRecord
    ) -> Result<bool, Box<dyn Error + Send + Sync>>;

    async fn get_user(
        &self,
        username: &str
    ) -> Result<Option<UserRecord>, Box<dyn Error + Send + Sync>>;

    async fn update_password_hash(
        &self,
        username: &str,
        password_hash: &str
    ) -> Result<(), Box<dyn Error + Send + Sync>>;
}

#[derive(Clone)]
pub struct Stores {
    pub chats: Arc<dyn ChatStore>,
    pub users: Arc<dyn UserStore>,
}

pub fn create_store(args: &Args) -> Result<Stores, Box<dyn Error + Send + Sync>> {
    match args.store_type.to_lowercase().as_str() {
        "redis" => {
            let store = Arc::new(redis::RedisStore::new(args.clone())?);
            Ok(Stores {
                chats: store.clone(),
                users: store,
            })
        }
        "memory" => {
            let store = Arc::new(MemoryStore::new());
            Ok(Stores {
                chats: store.clone(),
                users: store,
            })
        }
        _ =>
            Err(
                Box::new(
                    std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        format!("Unsupported store type: {}", args.store_type)
                    )
                )
            ),
    }
}

fn backend_description(store_type: &str, store_host: &str) -> String {
    if store_host.is_empty() {
        store_type.to_string()
    } else {
        format!("{} at {}", store_type, store_host)
    }
}

pub fn initialize_store(args: &Args) -> Result<Stores, Box<dyn Error + Send + Sync>> {
    info!(
        "Chats and user records will be stored in: {}",
        backend_description(&args.store_type, &args.store_host)
    );
    create_store(args)
}
