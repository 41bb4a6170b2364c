//! Artifact storage: the summary writer and the generation lock manager.

pub mod error;
pub mod lock;
pub mod writer;

pub use error::{Result, StoreError};
pub use lock::{LockManager, DEFAULT_LOCK_TTL};
pub use writer::{content_checksum, summary_exists, summary_path, SummaryWriter};
