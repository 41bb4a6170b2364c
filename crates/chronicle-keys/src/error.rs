use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("No API key available (no server key and no default key)")]
    NoKeyAvailable,

    #[error("Server key fetch failed and fallback disabled for {source_key}")]
    FallbackDisabled { source_key: String },

    #[error("Key backend not supported: {0}")]
    UnsupportedBackend(String),

    #[error("Master key not found in environment: {0}")]
    MasterKeyMissing(String),

    #[error("Encryption error: {0}")]
    Crypto(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, KeyError>;
