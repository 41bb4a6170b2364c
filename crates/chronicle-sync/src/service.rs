//! Sync orchestration: binding resolution and per-source state.
//!
//! A per-server binding in the source manifest wins over the global
//! fallback binding from configuration. If the per-server credentials
//! are absent or invalid the service falls back to the global binding
//! when the binding allows it, and fails otherwise.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use serde::Serialize;
use tracing::{info, instrument, warn};

use chronicle_core::types::SourceType;
use chronicle_core::DriveConfig;
use chronicle_registry::{ServerSyncConfig, SourceManifest, SyncBinding};

use crate::drive::{DriveAuth, DriveSync, DriveSyncConfig, ServiceAccountAuth};
use crate::error::{Result, SyncError};
use crate::oauth::OAuthFlow;
use crate::provider::SyncProvider;
use crate::tokens::TokenStore;
use crate::types::{ConflictStrategy, ProviderStatus, SyncResult, SyncState};

/// Which binding a sync resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingKind {
    Server,
    Fallback,
}

/// Service status roll-up.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub enabled: bool,
    pub configured: bool,
    pub sync_on_generation: bool,
    pub sync_frequency: String,
    pub create_subfolders: bool,
    pub sources_synced: usize,
}

pub struct SyncService {
    archive_root: PathBuf,
    config: DriveConfig,
    oauth: Arc<OAuthFlow>,
    states: Mutex<HashMap<String, SyncState>>,
    subfolder_cache: DashMap<String, String>,
    global_auth: Mutex<Option<Arc<DriveAuth>>>,
}

impl SyncService {
    pub fn new(
        archive_root: impl Into<PathBuf>,
        config: DriveConfig,
        token_encryption_key: Option<&str>,
    ) -> Self {
        let archive_root = archive_root.into();
        let token_store = Arc::new(TokenStore::new(&archive_root, token_encryption_key));
        Self {
            archive_root,
            config,
            oauth: Arc::new(OAuthFlow::new(token_store)),
            states: Mutex::new(HashMap::new()),
            subfolder_cache: DashMap::new(),
            global_auth: Mutex::new(None),
        }
    }

    pub fn oauth(&self) -> Arc<OAuthFlow> {
        self.oauth.clone()
    }

    /// Whether the global fallback binding is usable.
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
            && !self.config.folder_id.is_empty()
            && !self.config.credentials_path.is_empty()
            && Path::new(&self.config.credentials_path).exists()
    }

    pub fn sync_on_generation(&self) -> bool {
        self.config.sync_on_generation
    }

    pub fn status(&self) -> ServiceStatus {
        ServiceStatus {
            enabled: self.config.enabled,
            configured: self.is_enabled(),
            sync_on_generation: self.config.sync_on_generation,
            sync_frequency: self.config.sync_frequency.clone(),
            create_subfolders: self.config.create_subfolders,
            sources_synced: self.states.lock().unwrap().len(),
        }
    }

    pub fn source_status(&self, source_key: &str) -> Option<SyncState> {
        self.states.lock().unwrap().get(source_key).cloned()
    }

    pub fn list_sync_states(&self) -> Vec<SyncState> {
        let mut states: Vec<SyncState> = self.states.lock().unwrap().values().cloned().collect();
        states.sort_by(|a, b| a.source_key.cmp(&b.source_key));
        states
    }

    /// One-way push of a source subtree. Never raises: failures come
    /// back as a `failed` result so callers' jobs are unaffected.
    #[instrument(skip(self, source_path), fields(source = source_key))]
    pub async fn sync_source(
        &self,
        source_key: &str,
        source_path: &Path,
        server_name: &str,
    ) -> SyncResult {
        let result = match self
            .resolve_provider(source_key, server_name)
            .await
        {
            Ok((provider, kind)) => {
                info!(binding = ?kind, "starting drive sync");
                provider.sync(source_path).await
            }
            Err(e) => {
                warn!(error = %e, "sync not possible");
                SyncResult::failed(e.to_string())
            }
        };

        let mut states = self.states.lock().unwrap();
        states
            .entry(source_key.to_string())
            .or_insert_with(|| SyncState::new(source_key))
            .apply(&result);

        info!(status = %result.status, files = result.files_synced, "sync finished");
        result
    }

    /// Sync every source found on disk. Returns results keyed by source.
    pub async fn sync_all(&self) -> HashMap<String, SyncResult> {
        let mut results = HashMap::new();
        let sources_dir = self.archive_root.join("sources");
        let Ok(type_dirs) = std::fs::read_dir(&sources_dir) else {
            return results;
        };

        for type_entry in type_dirs.filter_map(|e| e.ok()).filter(|e| e.path().is_dir()) {
            let type_name = type_entry.file_name().to_string_lossy().into_owned();
            let Ok(server_dirs) = std::fs::read_dir(type_entry.path()) else {
                continue;
            };
            for server_entry in server_dirs.filter_map(|e| e.ok()).filter(|e| e.path().is_dir()) {
                let folder = server_entry.file_name().to_string_lossy().into_owned();
                let Some((server_name, server_id)) = folder.rsplit_once('_') else {
                    continue;
                };
                let source_key = format!("{}:{}", type_name, server_id);
                let result = self
                    .sync_source(&source_key, &server_entry.path(), server_name)
                    .await;
                results.insert(source_key, result);
            }
        }
        results
    }

    /// Provider status for the global binding.
    pub async fn drive_status(&self) -> Result<ProviderStatus> {
        let auth = self.global_auth()?;
        let provider = DriveSync::new(
            DriveSyncConfig {
                folder_id: self.config.folder_id.clone(),
                preserve_structure: true,
                conflict_strategy: ConflictStrategy::default(),
            },
            auth,
        );
        provider.status().await
    }

    /// Persist a per-server binding into the source manifest.
    pub fn save_server_binding(
        &self,
        source_type: SourceType,
        server_id: &str,
        binding: ServerSyncConfig,
    ) -> Result<()> {
        let Some(manifest_path) = self.find_manifest_path(source_type, server_id) else {
            return Err(SyncError::NotConfigured(format!(
                "no archive folder for {}:{}",
                source_type, server_id
            )));
        };

        let mut manifest = SourceManifest::load(&manifest_path).unwrap_or_else(|_| {
            SourceManifest::new(source_type, server_id, server_id)
        });
        manifest.sync = Some(SyncBinding {
            google_drive: Some(binding),
        });
        manifest
            .save(&manifest_path)
            .map_err(|e| SyncError::NotConfigured(e.to_string()))?;
        info!(server = server_id, "saved server sync binding");
        Ok(())
    }

    /// Per-server binding from the source manifest, when present.
    pub fn server_binding(
        &self,
        source_type: SourceType,
        server_id: &str,
    ) -> Option<ServerSyncConfig> {
        let manifest_path = self.find_manifest_path(source_type, server_id)?;
        let manifest = SourceManifest::load(&manifest_path).ok()?;
        manifest.drive_sync().cloned()
    }

    /// Servers with an enabled per-server binding.
    pub fn list_configured_servers(&self) -> Vec<(String, ServerSyncConfig)> {
        let mut configured = Vec::new();
        let sources_dir = self.archive_root.join("sources");
        let Ok(type_dirs) = std::fs::read_dir(&sources_dir) else {
            return configured;
        };

        for type_entry in type_dirs.filter_map(|e| e.ok()).filter(|e| e.path().is_dir()) {
            let type_name = type_entry.file_name().to_string_lossy().into_owned();
            let Ok(source_type) = type_name.parse::<SourceType>() else {
                continue;
            };
            let Ok(server_dirs) = std::fs::read_dir(type_entry.path()) else {
                continue;
            };
            for server_entry in server_dirs.filter_map(|e| e.ok()).filter(|e| e.path().is_dir()) {
                let folder = server_entry.file_name().to_string_lossy().into_owned();
                let Some((_, server_id)) = folder.rsplit_once('_') else {
                    continue;
                };
                if let Some(binding) = self.server_binding(source_type, server_id) {
                    if binding.enabled {
                        configured.push((format!("{}:{}", source_type, server_id), binding));
                    }
                }
            }
        }
        configured
    }

    async fn resolve_provider(
        &self,
        source_key: &str,
        server_name: &str,
    ) -> Result<(DriveSync, BindingKind)> {
        let (source_type, server_id) = parse_source_key(source_key)?;

        // Per-server binding first.
        if let Some(binding) = self.server_binding(source_type, &server_id) {
            if binding.enabled {
                match self.oauth.get_valid_tokens(&binding.oauth_token_id).await {
                    Some(_) => {
                        let provider = DriveSync::new(
                            DriveSyncConfig {
                                folder_id: binding.folder_id.clone(),
                                preserve_structure: true,
                                conflict_strategy: ConflictStrategy::default(),
                            },
                            Arc::new(DriveAuth::OAuth {
                                flow: self.oauth.clone(),
                                token_id: binding.oauth_token_id.clone(),
                            }),
                        );
                        return Ok((provider, BindingKind::Server));
                    }
                    None if !binding.fallback_to_default => {
                        return Err(SyncError::Credentials(format!(
                            "server tokens invalid for {} and fallback disabled",
                            source_key
                        )));
                    }
                    None => {
                        warn!(source = source_key, "server tokens invalid, using fallback");
                    }
                }
            }
        }

        // Global fallback.
        if !self.is_enabled() {
            return Err(SyncError::NotConfigured(
                "google drive sync not configured".to_string(),
            ));
        }
        let auth = self.global_auth()?;

        let mut target_folder = self.config.folder_id.clone();
        if self.config.create_subfolders {
            target_folder = self
                .ensure_server_subfolder(&auth, source_type, &server_id, server_name)
                .await?;
        }

        let provider = DriveSync::new(
            DriveSyncConfig {
                folder_id: target_folder,
                preserve_structure: true,
                conflict_strategy: ConflictStrategy::default(),
            },
            auth,
        );
        Ok((provider, BindingKind::Fallback))
    }

    /// Resolve (and memoize) the per-server subfolder under the global
    /// root, creating it remotely when missing.
    async fn ensure_server_subfolder(
        &self,
        auth: &Arc<DriveAuth>,
        source_type: SourceType,
        server_id: &str,
        server_name: &str,
    ) -> Result<String> {
        let name = self
            .config
            .subfolder_naming
            .replace("{server_name}", &sanitize_folder_name(server_name))
            .replace("{server_id}", server_id)
            .replace("{source_type}", source_type.as_str());
        let name = truncate_folder_name(&name);

        let cache_key = format!("{}/{}", self.config.folder_id, name);
        if let Some(id) = self.subfolder_cache.get(&cache_key) {
            return Ok(id.clone());
        }

        let root = DriveSync::new(
            DriveSyncConfig {
                folder_id: self.config.folder_id.clone(),
                preserve_structure: true,
                conflict_strategy: ConflictStrategy::default(),
            },
            auth.clone(),
        );
        let folder_id = root.ensure_subfolder(&name).await?;
        self.subfolder_cache.insert(cache_key, folder_id.clone());
        Ok(folder_id)
    }

    fn global_auth(&self) -> Result<Arc<DriveAuth>> {
        let mut cached = self.global_auth.lock().unwrap();
        if let Some(auth) = cached.as_ref() {
            return Ok(auth.clone());
        }
        let auth = Arc::new(DriveAuth::ServiceAccount(ServiceAccountAuth::from_file(
            Path::new(&self.config.credentials_path),
        )?));
        *cached = Some(auth.clone());
        Ok(auth)
    }

    fn find_manifest_path(&self, source_type: SourceType, server_id: &str) -> Option<PathBuf> {
        let type_dir = self.archive_root.join("sources").join(source_type.as_str());
        let suffix = format!("_{}", server_id);
        let server_dir = std::fs::read_dir(type_dir)
            .ok()?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .find(|p| {
                p.is_dir()
                    && p.file_name()
                        .map(|n| n.to_string_lossy().ends_with(&suffix))
                        .unwrap_or(false)
            })?;
        Some(server_dir.join(source_type.manifest_filename()))
    }
}

fn parse_source_key(source_key: &str) -> Result<(SourceType, String)> {
    let (type_str, server_id) = source_key
        .split_once(':')
        .ok_or_else(|| SyncError::NotConfigured(format!("bad source key: {}", source_key)))?;
    let source_type = type_str
        .parse::<SourceType>()
        .map_err(SyncError::NotConfigured)?;
    Ok((source_type, server_id.to_string()))
}

/// Replace characters outside `[A-Za-z0-9_-]` with `_`.
fn sanitize_folder_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Subfolder names are capped at 50 characters.
fn truncate_folder_name(name: &str) -> String {
    name.chars().take(50).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folder_names_are_sanitized_and_truncated() {
        assert_eq!(sanitize_folder_name("My Server!"), "My_Server_");
        let long = "x".repeat(80);
        assert_eq!(truncate_folder_name(&long).len(), 50);
    }

    #[test]
    fn source_keys_parse_into_type_and_id() {
        let (source_type, id) = parse_source_key("discord:123").unwrap();
        assert_eq!(source_type, SourceType::Discord);
        assert_eq!(id, "123");
        assert!(parse_source_key("nonsense").is_err());
    }

    #[tokio::test]
    async fn unconfigured_sync_fails_without_touching_files() {
        let dir = tempfile::tempdir().unwrap();
        let service = SyncService::new(dir.path(), DriveConfig::default(), Some("secret"));
        assert!(!service.is_enabled());

        let result = service
            .sync_source("discord:123", dir.path(), "My Server")
            .await;
        assert_eq!(result.status, crate::types::SyncStatus::Failed);
        assert!(!result.errors.is_empty());
        // A failed run is still tracked per source.
        assert!(service.source_status("discord:123").is_some());
    }

    #[test]
    fn server_binding_round_trips_through_manifest() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sources/discord/my-server_123")).unwrap();
        let service = SyncService::new(dir.path(), DriveConfig::default(), Some("secret"));

        let binding = ServerSyncConfig {
            enabled: true,
            folder_id: "folder-1".to_string(),
            oauth_token_id: "srv_123_gdrive".to_string(),
            ..ServerSyncConfig::default()
        };
        service
            .save_server_binding(SourceType::Discord, "123", binding.clone())
            .unwrap();

        let loaded = service.server_binding(SourceType::Discord, "123").unwrap();
        assert_eq!(loaded, binding);
        assert_eq!(service.list_configured_servers().len(), 1);
    }
}
