use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    // --- Chat/User Store Args ---
    /// Document store backend for chats and user records (redis, memory)
    #[arg(long, env = "STORE_TYPE", default_value = "redis")]
    pub store_type: String,

    /// Document store host endpoint (e.g., redis://127.0.0.1:6379)
    #[arg(long, env = "STORE_HOST", default_value = "redis://127.0.0.1:6379")]
    pub store_host: String,

    /// Prefix for all store keys, so several deployments can share one instance.
    #[arg(long, env = "STORE_KEY_PREFIX", default_value = "gemchat:")]
    pub store_key_prefix: String,

    // --- Generation Provider Args ---
    /// Generation API provider used for replies and title summaries (gemini)
    #[arg(long, env = "GENERATION_PROVIDER", default_value = "gemini")]
    pub generation_provider: String,

    /// API key for the generation provider. Required; startup fails without it.
    #[arg(long, env = "GENERATION_API_KEY", default_value = "")]
    pub generation_api_key: String,

    /// Model name for generation (e.g., gemini-2.0-flash)
    #[arg(long, env = "GENERATION_MODEL")] // No default, let the adapter pick if None
    pub generation_model: Option<String>,

    /// Base URL for the generation provider API
    #[arg(long, env = "GENERATION_BASE_URL")]
    pub generation_base_url: Option<String>,

    // --- Session / Auth Args ---
    /// Secret used to sign session tokens. Required; startup fails without it.
    #[arg(long, env = "SESSION_SECRET", default_value = "")]
    pub session_secret: String,

    /// Session token lifetime in days.
    #[arg(long, env = "TOKEN_TTL_DAYS", default_value = "7")]
    pub token_ttl_days: i64,

    /// Idle time in seconds after which unused guest sessions are dropped.
    #[arg(long, env = "GUEST_SESSION_TTL_SECS", default_value = "3600")]
    pub guest_session_ttl_secs: i64,

    // --- General App Args ---
    /// Number of characters of the first message used as a chat title when
    /// the summarization call fails.
    #[arg(long, env = "TITLE_FALLBACK_LEN", default_value = "30")]
    pub title_fallback_len: usize,

    /// Host address and port for the server to listen on.
    #[arg(long, env = "SERVER_ADDR", default_value = "127.0.0.1:4000")]
    pub server_addr: String,

    /// Optional path to the TLS certificate file (PEM format) for enabling HTTPS. Requires --tls-key-path.
    #[arg(long, env = "TLS_CERT_PATH")]
    pub tls_cert_path: Option<String>,

    /// Optional path to the TLS private key file (PEM format) for enabling HTTPS. Requires --tls-cert-path.
    #[arg(long, env = "TLS_KEY_PATH")]
    pub tls_key_path: Option<String>,

    #[arg(long, env = "ENABLE_TLS", default_value = "false")]
    pub enable_tls: bool,
}
