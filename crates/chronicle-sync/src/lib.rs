//! One-way mirroring of archive subtrees to an external object store.

pub mod drive;
pub mod error;
pub mod oauth;
pub mod provider;
pub mod service;
pub mod tokens;
pub mod types;

pub use drive::{DriveAuth, DriveSync, DriveSyncConfig, ServiceAccountAuth};
pub use error::{Result, SyncError};
pub use oauth::{OAuthFlow, OAuthState};
pub use provider::SyncProvider;
pub use service::{BindingKind, ServiceStatus, SyncService};
pub use tokens::{OAuthTokens, TokenStore};
pub use types::{
    ConflictStrategy, ProviderStatus, RemoteFile, SyncResult, SyncState, SyncStatus,
};
