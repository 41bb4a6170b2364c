use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome class of a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    InProgress,
    Success,
    Partial,
    Failed,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncStatus::Pending => "pending",
            SyncStatus::InProgress => "in_progress",
            SyncStatus::Success => "success",
            SyncStatus::Partial => "partial",
            SyncStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// What to do when a file already exists remotely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    /// Overwrite the remote copy.
    #[default]
    LocalWins,
    /// Leave the remote copy untouched.
    RemoteWins,
    /// Compare timestamps; upload only when local is newer.
    Newest,
}

/// Result of one sync run. `success` iff every file made it, `partial`
/// when some failed, `failed` when the run could not proceed at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncResult {
    pub status: SyncStatus,
    pub files_synced: u64,
    pub files_failed: u64,
    pub bytes_uploaded: u64,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub errors: Vec<String>,
}

impl SyncResult {
    pub fn started() -> Self {
        Self {
            status: SyncStatus::InProgress,
            files_synced: 0,
            files_failed: 0,
            bytes_uploaded: 0,
            started_at: Utc::now(),
            completed_at: None,
            errors: Vec::new(),
        }
    }

    pub fn failed(message: String) -> Self {
        Self {
            status: SyncStatus::Failed,
            files_synced: 0,
            files_failed: 0,
            bytes_uploaded: 0,
            started_at: Utc::now(),
            completed_at: Some(Utc::now()),
            errors: vec![message],
        }
    }
}

/// A file listed from the remote store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteFile {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    pub size: u64,
    pub modified_at: Option<String>,
}

/// Provider status and quota roll-up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderStatus {
    pub provider: String,
    pub folder_id: String,
    pub quota_limit: u64,
    pub quota_usage: u64,
}

/// Rolling per-source sync state kept in memory by the service.
#[derive(Debug, Clone, Serialize)]
pub struct SyncState {
    pub source_key: String,
    pub last_sync: Option<DateTime<Utc>>,
    pub last_status: SyncStatus,
    pub files_synced: u64,
    pub total_bytes: u64,
    /// Most recent errors, capped at five.
    pub errors: Vec<String>,
}

impl SyncState {
    pub fn new(source_key: &str) -> Self {
        Self {
            source_key: source_key.to_string(),
            last_sync: None,
            last_status: SyncStatus::Pending,
            files_synced: 0,
            total_bytes: 0,
            errors: Vec::new(),
        }
    }

    pub fn apply(&mut self, result: &SyncResult) {
        self.last_sync = Some(Utc::now());
        self.last_status = result.status;
        self.files_synced = result.files_synced;
        self.total_bytes += result.bytes_uploaded;
        if !result.errors.is_empty() {
            self.errors = result.errors.iter().take(5).cloned().collect();
        }
    }
}
