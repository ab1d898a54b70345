use chrono::{ Duration, Utc };
use jsonwebtoken::{ decode, encode, DecodingKey, EncodingKey, Header, Validation };
use serde::{ Deserialize, Serialize };
use sha2::{ Digest, Sha256 };
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    /// Deliberately identical for a wrong username and a wrong password.
    #[error("Invalid username or password")]
    InvalidCredentials,
    #[error("Username already exists")]
    UsernameTaken,
    #[error("Invalid or expired session token")]
    InvalidToken,
    #[error("Credential backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Stable user identifier, used as the store partition key.
    pub sub: String,
    pub exp: usize,
}

pub fn create_token(user_id: &str, secret: &str, ttl_days: i64) -> Result<String, AuthError> {
    let expiration = Utc::now()
        .checked_add_signed(Duration::days(ttl_days))
        .ok_or_else(|| AuthError::Backend("token expiry out of range".to_string()))?
        .timestamp();

    let claims = Claims {
        sub: user_id.to_owned(),
        exp: expiration as usize,
    };

    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_ref())).map_err(|e|
        AuthError::Backend(e.to_string())
    )
}

pub fn decode_token(token: &str, secret: &str) -> Result<Claims, AuthError> {
    decode::<Claims>(token, &DecodingKey::from_secret(secret.as_ref()), &Validation::default())
        .map(|data| data.claims)
        .map_err(|_| AuthError::InvalidToken)
}

pub fn hash_password(password: &str) -> Result<String, AuthError> {
    bcrypt::hash(password, bcrypt::DEFAULT_COST).map_err(|e| AuthError::Backend(e.to_string()))
}

/// Records written by the old deployment hold a bare sha256 hex digest.
pub fn is_legacy_digest(stored: &str) -> bool {
    stored.len() == 64 && stored.chars().all(|c| c.is_ascii_hexdigit())
}

pub fn sha256_digest(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

/// Verifies a password against either hash format. Always returns plain
/// false on mismatch or malformed hashes; the caller maps that to a single
/// invalid-credentials rejection.
pub fn verify_password(password: &str, stored: &str) -> bool {
    if is_legacy_digest(stored) {
        constant_time_eq(sha256_digest(password).as_bytes(), stored.as_bytes())
    } else {
        bcrypt::verify(password, stored).unwrap_or(false)
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
