use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Core(#[from] chronicle_core::CoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Pricing fetch failed: {0}")]
    PricingFetch(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, LedgerError>;
