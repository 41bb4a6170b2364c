use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Sync not configured: {0}")]
    NotConfigured(String),

    #[error("OAuth not configured")]
    OAuthNotConfigured,

    #[error("Token exchange failed: {0}")]
    TokenExchange(String),

    #[error("Invalid or expired state token")]
    InvalidState,

    #[error("Drive API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Credential error: {0}")]
    Credentials(String),

    #[error(transparent)]
    Key(#[from] chronicle_keys::KeyError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SyncError>;
