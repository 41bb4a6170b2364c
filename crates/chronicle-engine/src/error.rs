use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Job not found: {id}")]
    JobNotFound { id: String },

    #[error("Job {id} is not in a resumable state")]
    NotResumable { id: String },

    #[error(transparent)]
    Core(#[from] chronicle_core::CoreError),

    #[error(transparent)]
    Store(#[from] chronicle_store::StoreError),

    #[error(transparent)]
    Ledger(#[from] chronicle_ledger::LedgerError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
