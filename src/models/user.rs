use chrono::Utc;
use serde::{ Serialize, Deserialize };

/// Credential record: created at signup, read at login. The password hash is
/// only rewritten when a legacy digest is upgraded after a successful login.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserRecord {
    pub username: String,
    pub password_hash: String,
    pub email: Option<String>,
    pub created_at: i64,
}

impl UserRecord {
    pub fn new(username: impl Into<String>, password_hash: impl Into<String>, email: Option<String>) -> Self {
        Self {
            username: username.into(),
            password_hash: password_hash.into(),
            email,
            created_at: Utc::now().timestamp(),
        }
    }
}
