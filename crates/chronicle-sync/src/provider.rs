use std::path::Path;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{ProviderStatus, RemoteFile, SyncResult};

/// Common interface implemented by every sync backend.
///
/// Implementations must be `Send + Sync` so a service can hold them as
/// trait objects and drive them from multiple Tokio tasks.
#[async_trait]
pub trait SyncProvider: Send + Sync {
    /// Stable lowercase identifier for this provider (e.g. `"google_drive"`).
    fn name(&self) -> &str;

    /// Push a local subtree to the remote store. Per-file failures are
    /// accumulated in the result, not raised.
    async fn sync(&self, source_path: &Path) -> SyncResult;

    /// Download a remote file to a local path.
    async fn download(&self, remote_id: &str, local_path: &Path) -> Result<()>;

    /// Delete a remote file.
    async fn delete(&self, remote_id: &str) -> Result<()>;

    /// List files under a remote folder.
    async fn list_files(&self, remote_folder_id: &str) -> Result<Vec<RemoteFile>>;

    /// Provider status and quota.
    async fn status(&self) -> Result<ProviderStatus>;
}
