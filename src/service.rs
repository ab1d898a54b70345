use std::collections::HashMap;
use std::sync::Arc;
use log::{ info, warn };
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::auth::{ self, AuthError };
use crate::cli::Args;
use crate::llm::GenerationClient;
use crate::models::chat::{ Chat, ChatMessage, ChatSummary, Role };
use crate::models::user::UserRecord;
use crate::session::{ SessionMode, SessionState };
use crate::store::Stores;

const TITLE_PROMPT: &str =
    "Summarize this conversation so far with a short, descriptive title (max 8 words):";
/// The title is derived from the opening exchange only.
const TITLE_MESSAGE_COUNT: usize = 2;

/// Guest session keys carry this prefix so they can never collide with (or
/// be forged into) the `user:` keys backing authenticated sessions.
pub const GUEST_SESSION_PREFIX: &str = "guest:";

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Message text must not be empty")]
    EmptyMessage,
    #[error("Unknown or expired session")]
    UnknownSession,
    #[error("Chat not found")]
    ChatNotFound,
    #[error("Not available in guest mode")]
    GuestMode,
    #[error("{0}")]
    InvalidInput(String),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("Store error: {0}")]
    Store(String),
}

impl ServiceError {
    fn store(e: Box<dyn std::error::Error + Send + Sync>) -> Self {
        ServiceError::Store(e.to_string())
    }
}

#[derive(Debug)]
pub struct LoginOutcome {
    pub token: String,
    pub user_id: String,
}

pub struct MessageOutcome {
    pub chat_id: String,
    pub title: String,
    pub user_message: ChatMessage,
    pub assistant_message: ChatMessage,
}

pub struct DeleteOutcome {
    pub was_active: bool,
    pub active_chat_id: String,
}

/// Orchestrates the whole exchange loop: session bookkeeping, the generation
/// call, title derivation and per-user persistence.
pub struct ChatService {
    generation: Arc<dyn GenerationClient>,
    stores: Stores,
    sessions: Mutex<HashMap<String, SessionState>>,
    session_secret: String,
    token_ttl_days: i64,
    guest_session_ttl_secs: i64,
    title_fallback_len: usize,
}

impl ChatService {
    pub fn new(generation: Arc<dyn GenerationClient>, stores: Stores, args: &Args) -> Self {
        Self {
            generation,
            stores,
            sessions: Mutex::new(HashMap::new()),
            session_secret: args.session_secret.clone(),
            token_ttl_days: args.token_ttl_days,
            guest_session_ttl_secs: args.guest_session_ttl_secs,
            title_fallback_len: args.title_fallback_len,
        }
    }

    // --- Accounts ---

    pub async fn signup(
        &self,
        username: &str,
        password: &str,
        email: Option<String>
    ) -> Result<(), ServiceError> {
        let username = username.trim();
        if username.is_empty() || password.is_empty() {
            return Err(ServiceError::InvalidInput("Username and password required".to_string()));
        }

        let password_hash = auth::hash_password(password)?;
        let record = UserRecord::new(username, password_hash, email);
        let created = self.stores.users.create_user(&record).await.map_err(ServiceError::store)?;
        if !created {
            return Err(AuthError::UsernameTaken.into());
        }
        info!("Created account for {}", username);
        Ok(())
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<LoginOutcome, ServiceError> {
        let record = self.stores.users
            .get_user(username.trim()).await
            .map_err(ServiceError::store)?
            .ok_or(AuthError::InvalidCredentials)?;

        if !auth::verify_password(password, &record.password_hash) {
            return Err(AuthError::InvalidCredentials.into());
        }

        if auth::is_legacy_digest(&record.password_hash) {
            self.upgrade_legacy_hash(&record.username, password).await;
        }

        let token = auth::create_token(&record.username, &self.session_secret, self.token_ttl_days)?;
        Ok(LoginOutcome {
            token,
            user_id: record.username,
        })
    }

    /// Records from the old deployment carry a bare sha256 digest; rewrite
    /// them with bcrypt the first time the password is seen in the clear.
    async fn upgrade_legacy_hash(&self, username: &str, password: &str) {
        match auth::hash_password(password) {
            Ok(new_hash) => {
                match self.stores.users.update_password_hash(username, &new_hash).await {
                    Ok(()) => info!("Upgraded legacy password hash for {}", username),
                    Err(e) => warn!("Failed to upgrade legacy password hash for {}: {}", username, e),
                }
            }
            Err(e) => warn!("Failed to rehash legacy password for {}: {}", username, e),
        }
    }

    /// Resolves a bearer token to the stable user identifier.
    pub fn authenticate(&self, token: &str) -> Result<String, ServiceError> {
        let claims = auth::decode_token(token, &self.session_secret)?;
        Ok(claims.sub)
    }

    // --- Sessions ---

    pub async fn create_guest_session(&self) -> String {
        let session_key = format!("{}{}", GUEST_SESSION_PREFIX, Uuid::new_v4());
        let mut sessions = self.sessions.lock().await;
        Self::sweep_idle_guests(&mut sessions, self.guest_session_ttl_secs);
        sessions.insert(session_key.clone(), SessionState::guest());
        session_key
    }

    /// Guest sessions are ephemeral by definition; drop the ones nobody has
    /// touched within the TTL so the map stays bounded. Authenticated
    /// sessions are one per account and are left alone.
    fn sweep_idle_guests(sessions: &mut HashMap<String, SessionState>, ttl_secs: i64) {
        let now = chrono::Utc::now().timestamp();
        sessions.retain(|_, state| {
            state.mode != SessionMode::Guest || now - state.last_active < ttl_secs
        });
    }

    /// One session per authenticated user; created lazily on first request.
    pub async fn ensure_user_session(&self, user_id: &str) -> String {
        let session_key = format!("user:{}", user_id);
        let mut sessions = self.sessions.lock().await;
        sessions
            .entry(session_key.clone())
            .or_insert_with(|| SessionState::authenticated(user_id));
        session_key
    }

    pub async fn end_session(&self, session_key: &str) -> bool {
        let mut sessions = self.sessions.lock().await;
        sessions.remove(session_key).is_some()
    }

    // --- The exchange loop ---

    /// Appends the user message, asks the generation API for a reply, appends
    /// it as the assistant message, derives the title after the opening
    /// exchange, and persists the chat for authenticated sessions.
    pub async fn submit_message(
        &self,
        session_key: &str,
        text: &str
    ) -> Result<MessageOutcome, ServiceError> {
        if text.trim().is_empty() {
            return Err(ServiceError::EmptyMessage);
        }

        let mut sessions = self.sessions.lock().await;
        let state = sessions.get_mut(session_key).ok_or(ServiceError::UnknownSession)?;
        state.touch();

        state.append(Role::User, text);

        let reply = match self.generation.complete(text).await {
            Ok(completion) => completion.response,
            // Non-fatal: the error body stands in for the reply.
            Err(e) => format!("Error: {}", e),
        };
        state.append(Role::Assistant, &reply);

        if
            state.active_chat.title.is_empty() &&
            state.active_chat.messages.len() >= TITLE_MESSAGE_COUNT
        {
            let title = self.derive_title(&state.active_chat.messages).await;
            state.set_title_once(&title);
        }

        if let Some(user_id) = state.user_id() {
            self.stores.chats
                .save_chat(user_id, &state.active_chat).await
                .map_err(ServiceError::store)?;
        }

        let messages = &state.active_chat.messages;
        Ok(MessageOutcome {
            chat_id: state.active_chat.id.clone(),
            title: state.active_chat.title.clone(),
            user_message: messages[messages.len() - 2].clone(),
            assistant_message: messages[messages.len() - 1].clone(),
        })
    }

    /// Short label for the opening exchange. Asks the generation API to
    /// summarize; falls back to an excerpt of the first message when the
    /// call fails or returns nothing.
    async fn derive_title(&self, messages: &[ChatMessage]) -> String {
        let opening = messages
            .iter()
            .take(TITLE_MESSAGE_COUNT)
            .map(|m| format!("{}: {}", m.role, m.text))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!("{}\n{}", TITLE_PROMPT, opening);

        match self.generation.complete(&prompt).await {
            Ok(summary) => {
                let title = summary.response.trim().replace('"', "");
                if !title.is_empty() {
                    return title;
                }
            }
            Err(e) => {
                warn!("Title summarization failed, falling back to excerpt: {}", e);
            }
        }

        messages
            .first()
            .map(|m| m.text.chars().take(self.title_fallback_len).collect())
            .unwrap_or_default()
    }

    // --- Chat management ---

    pub async fn new_chat(&self, session_key: &str) -> Result<String, ServiceError> {
        let mut sessions = self.sessions.lock().await;
        let state = sessions.get_mut(session_key).ok_or(ServiceError::UnknownSession)?;
        state.touch();
        Ok(state.start_new_chat())
    }

    pub async fn list_chats(&self, session_key: &str) -> Result<Vec<ChatSummary>, ServiceError> {
        let mut sessions = self.sessions.lock().await;
        let state = sessions.get_mut(session_key).ok_or(ServiceError::UnknownSession)?;
        state.touch();
        let user_id = state.user_id().ok_or(ServiceError::GuestMode)?;
        self.stores.chats.list_chats(user_id).await.map_err(ServiceError::store)
    }

    /// Loads a persisted chat and makes it the session's active chat.
    pub async fn open_chat(&self, session_key: &str, chat_id: &str) -> Result<Chat, ServiceError> {
        let mut sessions = self.sessions.lock().await;
        let state = sessions.get_mut(session_key).ok_or(ServiceError::UnknownSession)?;
        state.touch();
        let user_id = state.user_id().ok_or(ServiceError::GuestMode)?.to_string();

        let chat = self.stores.chats
            .get_chat(&user_id, chat_id).await
            .map_err(ServiceError::store)?
            .ok_or(ServiceError::ChatNotFound)?;
        state.open_chat(chat.clone());
        Ok(chat)
    }

    /// Removes the whole chat document. If the deleted chat was the open one,
    /// the session falls back to a fresh empty chat.
    pub async fn delete_chat(
        &self,
        session_key: &str,
        chat_id: &str
    ) -> Result<DeleteOutcome, ServiceError> {
        let mut sessions = self.sessions.lock().await;
        let state = sessions.get_mut(session_key).ok_or(ServiceError::UnknownSession)?;
        state.touch();
        let user_id = state.user_id().ok_or(ServiceError::GuestMode)?.to_string();

        self.stores.chats.delete_chat(&user_id, chat_id).await.map_err(ServiceError::store)?;
        let was_active = state.reset_if_active(chat_id);

        Ok(DeleteOutcome {
            was_active,
            active_chat_id: state.active_chat.id.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use crate::llm::CompletionResponse;
    use crate::store::{ MemoryStore, Stores, UserStore };

    /// Replays a scripted sequence of completions; hands out a fixed reply
    /// once the script runs dry.
    struct ScriptedGeneration {
        replies: Mutex<VecDeque<Result<String, String>>>,
    }

    impl ScriptedGeneration {
        fn new(replies: Vec<Result<String, String>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
            }
        }
    }

    #[async_trait]
    impl GenerationClient for ScriptedGeneration {
        async fn complete(
            &self,
            _prompt: &str
        ) -> Result<CompletionResponse, Box<dyn std::error::Error + Send + Sync>> {
            match self.replies.lock().await.pop_front() {
                Some(Ok(text)) => Ok(CompletionResponse { response: text }),
                Some(Err(e)) => Err(e.into()),
                None => Ok(CompletionResponse { response: "scripted reply".to_string() }),
            }
        }
    }

    fn test_args() -> Args {
        Args {
            store_type: "memory".to_string(),
            store_host: String::new(),
            store_key_prefix: "gemchat:".to_string(),
            generation_provider: "gemini".to_string(),
            generation_api_key: String::new(),
            generation_model: None,
            generation_base_url: None,
            session_secret: "test-secret".to_string(),
            token_ttl_days: 7,
            guest_session_ttl_secs: 3600,
            title_fallback_len: 30,
            server_addr: "127.0.0.1:0".to_string(),
            tls_cert_path: None,
            tls_key_path: None,
            enable_tls: false,
        }
    }

    fn service_with(replies: Vec<Result<String, String>>) -> ChatService {
        let store = Arc::new(MemoryStore::new());
        let stores = Stores {
            chats: store.clone(),
            users: store,
        };
        ChatService::new(Arc::new(ScriptedGeneration::new(replies)), stores, &test_args())
    }

    async fn logged_in_session(service: &ChatService) -> String {
        service.signup("alice", "hunter2", None).await.unwrap();
        let login = service.login("alice", "hunter2").await.unwrap();
        let user_id = service.authenticate(&login.token).unwrap();
        service.ensure_user_session(&user_id).await
    }

    #[tokio::test]
    async fn submit_appends_user_then_assistant() {
        let service = service_with(vec![Ok("Hi! How can I help?".to_string())]);
        let session = service.create_guest_session().await;

        let outcome = service.submit_message(&session, "hello").await.unwrap();
        assert_eq!(outcome.user_message.role, Role::User);
        assert_eq!(outcome.user_message.text, "hello");
        assert_eq!(outcome.assistant_message.role, Role::Assistant);
        assert_eq!(outcome.assistant_message.text, "Hi! How can I help?");
    }

    #[tokio::test]
    async fn generation_failure_becomes_the_reply() {
        let service = service_with(vec![Err("quota exceeded".to_string())]);
        let session = service.create_guest_session().await;

        let outcome = service.submit_message(&session, "hello").await.unwrap();
        assert_eq!(outcome.assistant_message.text, "Error: quota exceeded");
    }

    #[tokio::test]
    async fn empty_text_is_rejected_without_appending() {
        let service = service_with(vec![]);
        let session = service.create_guest_session().await;

        assert!(matches!(
            service.submit_message(&session, "").await,
            Err(ServiceError::EmptyMessage)
        ));
        assert!(matches!(
            service.submit_message(&session, "   ").await,
            Err(ServiceError::EmptyMessage)
        ));
    }

    #[tokio::test]
    async fn unknown_session_is_rejected() {
        let service = service_with(vec![]);
        assert!(matches!(
            service.submit_message("no-such-session", "hello").await,
            Err(ServiceError::UnknownSession)
        ));
    }

    #[tokio::test]
    async fn title_is_summarized_once_with_quotes_stripped() {
        let service = service_with(vec![
            Ok("First reply".to_string()),
            Ok("\"Trip Planning Advice\"".to_string()), // title summary
            Ok("Second reply".to_string())
        ]);
        let session = service.create_guest_session().await;

        let first = service.submit_message(&session, "plan me a trip").await.unwrap();
        assert_eq!(first.title, "Trip Planning Advice");

        // The script has no fourth entry, so a second summarization attempt
        // would change the title. It must not.
        let second = service.submit_message(&session, "where to?").await.unwrap();
        assert_eq!(second.title, "Trip Planning Advice");
    }

    #[tokio::test]
    async fn title_falls_back_to_excerpt_when_summarization_fails() {
        let service = service_with(vec![
            Ok("A reply".to_string()),
            Err("summarizer down".to_string())
        ]);
        let session = service.create_guest_session().await;

        let text = "this opening message is certainly longer than thirty characters";
        let outcome = service.submit_message(&session, text).await.unwrap();
        assert_eq!(outcome.title, text.chars().take(30).collect::<String>());
    }

    #[tokio::test]
    async fn authenticated_exchange_is_persisted() {
        let service = service_with(vec![
            Ok("Hi alice".to_string()),
            Ok("Greeting".to_string())
        ]);
        let session = logged_in_session(&service).await;

        let outcome = service.submit_message(&session, "hello").await.unwrap();
        let listing = service.list_chats(&session).await.unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].id, outcome.chat_id);
        assert_eq!(listing[0].title, "Greeting");

        let chat = service.open_chat(&session, &outcome.chat_id).await.unwrap();
        assert_eq!(chat.messages.len(), 2);
    }

    #[tokio::test]
    async fn guest_exchange_is_not_persisted() {
        let store = Arc::new(MemoryStore::new());
        let stores = Stores {
            chats: store.clone(),
            users: store.clone(),
        };
        let service = ChatService::new(
            Arc::new(ScriptedGeneration::new(vec![Ok("hi".to_string())])),
            stores,
            &test_args()
        );
        let session = service.create_guest_session().await;
        service.submit_message(&session, "hello").await.unwrap();

        assert!(matches!(
            service.list_chats(&session).await,
            Err(ServiceError::GuestMode)
        ));
        // Nothing was written for any user.
        assert!(store.get_user("alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn deleting_the_open_chat_resets_the_session() {
        let service = service_with(vec![Ok("hi".to_string()), Ok("Title".to_string())]);
        let session = logged_in_session(&service).await;

        let outcome = service.submit_message(&session, "hello").await.unwrap();
        let deleted = service.delete_chat(&session, &outcome.chat_id).await.unwrap();

        assert!(deleted.was_active);
        assert_ne!(deleted.active_chat_id, outcome.chat_id);
        assert!(service.list_chats(&session).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn deleting_another_chat_keeps_the_active_one() {
        let service = service_with(vec![
            Ok("hi".to_string()),
            Ok("Title".to_string()),
            Ok("hi again".to_string()),
            Ok("Other title".to_string())
        ]);
        let session = logged_in_session(&service).await;

        let first = service.submit_message(&session, "hello").await.unwrap();
        let active_id = service.new_chat(&session).await.unwrap();
        service.submit_message(&session, "hello again").await.unwrap();

        let deleted = service.delete_chat(&session, &first.chat_id).await.unwrap();
        assert!(!deleted.was_active);
        assert_eq!(deleted.active_chat_id, active_id);
    }

    #[tokio::test]
    async fn login_failure_does_not_reveal_which_field_was_wrong() {
        let service = service_with(vec![]);
        service.signup("alice", "hunter2", None).await.unwrap();

        let wrong_password = service.login("alice", "wrong").await.unwrap_err();
        let unknown_user = service.login("nobody", "hunter2").await.unwrap_err();
        assert_eq!(wrong_password.to_string(), unknown_user.to_string());
        assert!(matches!(wrong_password, ServiceError::Auth(AuthError::InvalidCredentials)));
        assert!(matches!(unknown_user, ServiceError::Auth(AuthError::InvalidCredentials)));
    }

    #[tokio::test]
    async fn duplicate_signup_is_rejected() {
        let service = service_with(vec![]);
        service.signup("alice", "hunter2", None).await.unwrap();
        assert!(matches!(
            service.signup("alice", "other", None).await,
            Err(ServiceError::Auth(AuthError::UsernameTaken))
        ));
    }

    #[tokio::test]
    async fn blank_signup_is_rejected() {
        let service = service_with(vec![]);
        assert!(matches!(
            service.signup("  ", "hunter2", None).await,
            Err(ServiceError::InvalidInput(_))
        ));
        assert!(matches!(
            service.signup("alice", "", None).await,
            Err(ServiceError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn legacy_digest_logs_in_and_is_upgraded() {
        let store = Arc::new(MemoryStore::new());
        let stores = Stores {
            chats: store.clone(),
            users: store.clone(),
        };
        let service = ChatService::new(
            Arc::new(ScriptedGeneration::new(vec![])),
            stores,
            &test_args()
        );

        let legacy = UserRecord::new("carol", crate::auth::sha256_digest("hunter2"), None);
        store.create_user(&legacy).await.unwrap();

        let login = service.login("carol", "hunter2").await.unwrap();
        assert_eq!(login.user_id, "carol");

        let upgraded = store.get_user("carol").await.unwrap().unwrap();
        assert!(!crate::auth::is_legacy_digest(&upgraded.password_hash));
        // And the rewritten hash still authenticates.
        service.login("carol", "hunter2").await.unwrap();
    }

    #[tokio::test]
    async fn opening_a_missing_chat_fails() {
        let service = service_with(vec![]);
        let session = logged_in_session(&service).await;
        assert!(matches!(
            service.open_chat(&session, "abc123").await,
            Err(ServiceError::ChatNotFound)
        ));
    }

    #[tokio::test]
    async fn guest_session_keys_are_namespaced() {
        let service = service_with(vec![]);
        let session = service.create_guest_session().await;
        assert!(session.starts_with(GUEST_SESSION_PREFIX));
        assert!(!session.starts_with("user:"));
    }

    #[tokio::test]
    async fn idle_guest_sessions_are_swept() {
        let store = Arc::new(MemoryStore::new());
        let stores = Stores {
            chats: store.clone(),
            users: store,
        };
        let mut args = test_args();
        args.guest_session_ttl_secs = 0; // everything counts as idle
        let service = ChatService::new(
            Arc::new(ScriptedGeneration::new(vec![])),
            stores,
            &args
        );

        service.signup("alice", "hunter2", None).await.unwrap();
        let login = service.login("alice", "hunter2").await.unwrap();
        let user_session = service.ensure_user_session(&login.user_id).await;

        let first_guest = service.create_guest_session().await;
        // Creating another guest session runs the sweep.
        let second_guest = service.create_guest_session().await;

        assert!(matches!(
            service.submit_message(&first_guest, "hello").await,
            Err(ServiceError::UnknownSession)
        ));
        // Authenticated sessions are never swept.
        assert!(service.list_chats(&user_session).await.unwrap().is_empty());
        assert_ne!(first_guest, second_guest);
    }

    #[tokio::test]
    async fn ended_sessions_stop_resolving() {
        let service = service_with(vec![]);
        let session = service.create_guest_session().await;
        assert!(service.end_session(&session).await);
        assert!(!service.end_session(&session).await);
        assert!(matches!(
            service.submit_message(&session, "hello").await,
            Err(ServiceError::UnknownSession)
        ));
    }
}
