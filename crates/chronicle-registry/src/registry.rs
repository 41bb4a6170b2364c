//! In-memory catalog of archive sources.
//!
//! The registry and the disk layout are two views of the same identity:
//! sources can be registered programmatically or discovered by walking
//! `R/sources/<type>/<folder>/`. Manifests are loaded lazily and cached.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use tracing::{info, instrument, warn};
use walkdir::WalkDir;

use chronicle_core::layout::ARCHIVE_MANIFEST_FILE;
use chronicle_core::{ArchiveSource, SourceType};

use crate::error::{RegistryError, Result};
use crate::types::{ArchiveManifest, ManifestSourceEntry, SourceManifest};

pub struct SourceRegistry {
    archive_root: PathBuf,
    sources: Mutex<HashMap<String, ArchiveSource>>,
    manifests: Mutex<HashMap<String, SourceManifest>>,
}

impl SourceRegistry {
    pub fn new(archive_root: impl Into<PathBuf>) -> Self {
        Self {
            archive_root: archive_root.into(),
            sources: Mutex::new(HashMap::new()),
            manifests: Mutex::new(HashMap::new()),
        }
    }

    pub fn archive_root(&self) -> &Path {
        &self.archive_root
    }

    pub fn register_source(&self, source: ArchiveSource) {
        let key = source.source_key();
        info!(source = %key, "registered source");
        self.sources.lock().unwrap().insert(key, source);
    }

    pub fn get_source(&self, source_key: &str) -> Option<ArchiveSource> {
        self.sources.lock().unwrap().get(source_key).cloned()
    }

    pub fn list_sources(&self, source_type: Option<SourceType>) -> Vec<ArchiveSource> {
        let sources = self.sources.lock().unwrap();
        let mut result: Vec<ArchiveSource> = sources
            .values()
            .filter(|s| source_type.map_or(true, |t| s.source_type == t))
            .cloned()
            .collect();
        result.sort_by_key(|s| s.source_key());
        result
    }

    pub fn register_discord(
        &self,
        guild_id: &str,
        guild_name: &str,
        channel: Option<(&str, &str)>,
    ) -> ArchiveSource {
        let mut source = ArchiveSource::new(SourceType::Discord, guild_id, guild_name);
        if let Some((id, name)) = channel {
            source = source.with_channel(id, name);
        }
        self.register_source(source.clone());
        source
    }

    pub fn register_whatsapp(&self, group_id: &str, group_name: &str) -> ArchiveSource {
        let source = ArchiveSource::new(SourceType::Whatsapp, group_id, group_name);
        self.register_source(source.clone());
        source
    }

    pub fn register_slack(
        &self,
        workspace_id: &str,
        workspace_name: &str,
        channel: Option<(&str, &str)>,
    ) -> ArchiveSource {
        let mut source = ArchiveSource::new(SourceType::Slack, workspace_id, workspace_name);
        if let Some((id, name)) = channel {
            source = source.with_channel(id, name);
        }
        self.register_source(source.clone());
        source
    }

    pub fn register_telegram(&self, chat_id: &str, chat_name: &str) -> ArchiveSource {
        let source = ArchiveSource::new(SourceType::Telegram, chat_id, chat_name);
        self.register_source(source.clone());
        source
    }

    /// Walk `R/sources/` and register every source found on disk.
    ///
    /// Folder names parse by splitting on the *last* underscore: the
    /// trailing token is the server id, the prefix the sanitized name.
    /// Unknown platform-type directories are skipped with a warning.
    #[instrument(skip(self))]
    pub fn discover_sources(&self) -> Vec<ArchiveSource> {
        let mut discovered = Vec::new();
        let sources_dir = self.archive_root.join("sources");
        let Ok(type_dirs) = std::fs::read_dir(&sources_dir) else {
            return discovered;
        };

        for type_entry in type_dirs.filter_map(|e| e.ok()) {
            if !type_entry.path().is_dir() {
                continue;
            }
            let type_name = type_entry.file_name().to_string_lossy().into_owned();
            let Ok(source_type) = type_name.parse::<SourceType>() else {
                warn!(directory = %type_name, "unknown source type directory");
                continue;
            };

            let Ok(server_dirs) = std::fs::read_dir(type_entry.path()) else {
                continue;
            };
            for server_entry in server_dirs.filter_map(|e| e.ok()) {
                if !server_entry.path().is_dir() {
                    continue;
                }
                let folder = server_entry.file_name().to_string_lossy().into_owned();
                let Some((server_name, server_id)) = folder.rsplit_once('_') else {
                    continue;
                };

                let channels_dir = server_entry.path().join("channels");
                if channels_dir.is_dir() {
                    let Ok(channel_dirs) = std::fs::read_dir(&channels_dir) else {
                        continue;
                    };
                    for channel_entry in channel_dirs.filter_map(|e| e.ok()) {
                        if !channel_entry.path().is_dir() {
                            continue;
                        }
                        let channel_folder =
                            channel_entry.file_name().to_string_lossy().into_owned();
                        let Some((channel_name, channel_id)) = channel_folder.rsplit_once('_')
                        else {
                            continue;
                        };
                        let source = ArchiveSource::new(source_type, server_id, server_name)
                            .with_channel(channel_id, channel_name);
                        self.register_source(source.clone());
                        discovered.push(source);
                    }
                } else {
                    let source = ArchiveSource::new(source_type, server_id, server_name);
                    self.register_source(source.clone());
                    discovered.push(source);
                }
            }
        }

        info!(count = discovered.len(), "discovered sources from archive");
        discovered
    }

    /// Manifest for a source, loaded from disk on first access.
    pub fn get_manifest(&self, source_key: &str) -> Option<SourceManifest> {
        if let Some(manifest) = self.manifests.lock().unwrap().get(source_key) {
            return Some(manifest.clone());
        }

        let source = self.get_source(source_key)?;
        let path = source.manifest_path(&self.archive_root);
        if !path.exists() {
            return None;
        }
        match SourceManifest::load(&path) {
            Ok(manifest) => {
                self.manifests
                    .lock()
                    .unwrap()
                    .insert(source_key.to_string(), manifest.clone());
                Some(manifest)
            }
            Err(e) => {
                warn!(source = %source_key, error = %e, "failed to load source manifest");
                None
            }
        }
    }

    pub fn save_manifest(&self, source_key: &str, manifest: SourceManifest) -> Result<()> {
        let source = self
            .get_source(source_key)
            .ok_or_else(|| RegistryError::SourceNotFound {
                key: source_key.to_string(),
            })?;
        let path = source.manifest_path(&self.archive_root);
        manifest.save(&path)?;
        self.manifests
            .lock()
            .unwrap()
            .insert(source_key.to_string(), manifest);
        info!(source = %source_key, "saved source manifest");
        Ok(())
    }

    /// Root manifest, created fresh when absent.
    pub fn archive_manifest(&self) -> ArchiveManifest {
        let path = self.archive_root.join(ARCHIVE_MANIFEST_FILE);
        if path.exists() {
            match ArchiveManifest::load(&path) {
                Ok(manifest) => return manifest,
                Err(e) => warn!(error = %e, "failed to load archive manifest, recreating"),
            }
        }
        ArchiveManifest::default()
    }

    pub fn save_archive_manifest(&self, mut manifest: ArchiveManifest) -> Result<()> {
        manifest.last_updated = Utc::now();
        let path = self.archive_root.join(ARCHIVE_MANIFEST_FILE);
        manifest.save(&path)?;
        Ok(())
    }

    /// Rewrite the root manifest from the current registry, counting
    /// Markdown summaries per source.
    pub fn update_archive_manifest(&self) -> Result<()> {
        let mut manifest = self.archive_manifest();
        manifest.sources = self
            .list_sources(None)
            .into_iter()
            .map(|source| {
                let summaries_dir = source.summaries_dir(&self.archive_root);
                let summary_count = summaries_dir.exists().then(|| {
                    WalkDir::new(&summaries_dir)
                        .into_iter()
                        .filter_map(|e| e.ok())
                        .filter(|e| {
                            e.file_type().is_file()
                                && e.path().extension().is_some_and(|ext| ext == "md")
                        })
                        .count() as u64
                });
                ManifestSourceEntry {
                    source_type: source.source_type,
                    server_id: source.server_id.clone(),
                    server_name: source.server_name.clone(),
                    folder: format!("{}/{}", source.source_type, source.folder_name()),
                    summary_count,
                }
            })
            .collect();
        self.save_archive_manifest(manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discover_parses_folder_names_on_last_underscore() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sources/discord/my_cool_server_123")).unwrap();
        std::fs::create_dir_all(dir.path().join("sources/whatsapp/family_g42")).unwrap();
        std::fs::create_dir_all(dir.path().join("sources/mystery/ignored_1")).unwrap();

        let registry = SourceRegistry::new(dir.path());
        let discovered = registry.discover_sources();
        assert_eq!(discovered.len(), 2);

        let discord = registry.get_source("discord:123").unwrap();
        assert_eq!(discord.server_name, "my_cool_server");
        assert!(registry.get_source("whatsapp:g42").is_some());
    }

    #[test]
    fn discover_recurses_into_channels() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(
            dir.path()
                .join("sources/discord/guild_1/channels/general_555"),
        )
        .unwrap();

        let registry = SourceRegistry::new(dir.path());
        let discovered = registry.discover_sources();
        assert_eq!(discovered.len(), 1);
        assert_eq!(discovered[0].channel_id.as_deref(), Some("555"));
        assert_eq!(discovered[0].channel_name.as_deref(), Some("general"));
    }

    #[test]
    fn manifest_is_cached_after_first_load() {
        let dir = tempfile::tempdir().unwrap();
        let registry = SourceRegistry::new(dir.path());
        let source = registry.register_discord("123", "My Server", None);

        let manifest = SourceManifest::new(SourceType::Discord, "123", "My Server");
        registry.save_manifest(&source.source_key(), manifest).unwrap();

        // Delete the file: the cached copy must still resolve.
        std::fs::remove_file(source.manifest_path(dir.path())).unwrap();
        assert!(registry.get_manifest("discord:123").is_some());
    }

    #[test]
    fn update_archive_manifest_counts_markdown() {
        let dir = tempfile::tempdir().unwrap();
        let registry = SourceRegistry::new(dir.path());
        let source = registry.register_whatsapp("g1", "Family");

        let month = source.summaries_dir(dir.path()).join("2026/02");
        std::fs::create_dir_all(&month).unwrap();
        std::fs::write(month.join("2026-02-10_daily.md"), "x").unwrap();
        std::fs::write(month.join("2026-02-10_daily.meta.json"), "{}").unwrap();
        std::fs::write(month.join("2026-02-11_daily.md"), "x").unwrap();

        registry.update_archive_manifest().unwrap();
        let manifest = registry.archive_manifest();
        assert_eq!(manifest.sources.len(), 1);
        assert_eq!(manifest.sources[0].summary_count, Some(2));
        assert_eq!(manifest.sources[0].folder, "whatsapp/family_g1");
    }
}
