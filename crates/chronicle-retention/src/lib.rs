//! Retention: soft delete with a recovery grace period, backups and
//! permanent purge.

pub mod error;
pub mod retention;

pub use error::{Result, RetentionError};
pub use retention::{DeletedSummaryInfo, RetentionManager};
