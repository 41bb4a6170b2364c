use thiserror::Error;

#[derive(Debug, Error)]
pub enum RetentionError {
    #[error("Sidecar missing for {0}")]
    SidecarMissing(String),

    #[error(transparent)]
    Core(#[from] chronicle_core::CoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RetentionError>;
