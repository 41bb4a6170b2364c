//! Source registry: catalog, disk discovery and manifest management.

pub mod error;
pub mod registry;
pub mod types;

pub use error::{RegistryError, Result};
pub use registry::SourceRegistry;
pub use types::{
    ApiKeyBinding, ArchiveManifest, CostTracking, GeneratorInfo, ManifestSourceEntry,
    PromptVersion, PromptVersions, ServerSyncConfig, SourceManifest, SyncBinding,
};
