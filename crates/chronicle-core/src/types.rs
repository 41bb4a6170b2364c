use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::layout::slugify;

/// Supported chat platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Discord,
    Whatsapp,
    Slack,
    Telegram,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Discord => "discord",
            SourceType::Whatsapp => "whatsapp",
            SourceType::Slack => "slack",
            SourceType::Telegram => "telegram",
        }
    }

    /// Per-platform manifest filename inside the source folder.
    pub fn manifest_filename(&self) -> &'static str {
        match self {
            SourceType::Discord => "server-manifest.json",
            SourceType::Whatsapp => "group-manifest.json",
            SourceType::Slack => "workspace-manifest.json",
            SourceType::Telegram => "chat-manifest.json",
        }
    }

    /// Label used for the server-level line in Markdown headers.
    pub fn server_label(&self) -> &'static str {
        match self {
            SourceType::Discord => "Server",
            SourceType::Whatsapp => "Group",
            SourceType::Slack => "Workspace",
            SourceType::Telegram => "Chat",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "discord" => Ok(SourceType::Discord),
            "whatsapp" => Ok(SourceType::Whatsapp),
            "slack" => Ok(SourceType::Slack),
            "telegram" => Ok(SourceType::Telegram),
            other => Err(format!("unknown source type: {}", other)),
        }
    }
}

/// Platform-agnostic conversation origin.
///
/// Identity is `(source_type, server_id)`; the canonical textual key is
/// `"{source_type}:{server_id}"`. A source with a channel gains an extra
/// `channels/<folder>` path segment under its server folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveSource {
    pub source_type: SourceType,
    pub server_id: String,
    pub server_name: String,
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub channel_name: Option<String>,
}

impl ArchiveSource {
    pub fn new(source_type: SourceType, server_id: &str, server_name: &str) -> Self {
        Self {
            source_type,
            server_id: server_id.to_string(),
            server_name: server_name.to_string(),
            channel_id: None,
            channel_name: None,
        }
    }

    pub fn with_channel(mut self, channel_id: &str, channel_name: &str) -> Self {
        self.channel_id = Some(channel_id.to_string());
        self.channel_name = Some(channel_name.to_string());
        self
    }

    /// Canonical key used in the cost ledger, sync state and job logs.
    pub fn source_key(&self) -> String {
        format!("{}:{}", self.source_type, self.server_id)
    }

    /// Folder name under `sources/<type>/`: slug of the server name plus
    /// the stable server id, joined by the last underscore.
    pub fn folder_name(&self) -> String {
        format!("{}_{}", slugify(&self.server_name), self.server_id)
    }

    pub fn channel_folder_name(&self) -> Option<String> {
        match (&self.channel_id, &self.channel_name) {
            (Some(id), Some(name)) => Some(format!("{}_{}", slugify(name), id)),
            _ => None,
        }
    }

    /// Server-level folder: `<root>/sources/<type>/<folder>`.
    pub fn server_dir(&self, archive_root: &Path) -> PathBuf {
        archive_root
            .join("sources")
            .join(self.source_type.as_str())
            .join(self.folder_name())
    }

    /// Directory holding this source's summaries tree.
    pub fn summaries_dir(&self, archive_root: &Path) -> PathBuf {
        let base = self.server_dir(archive_root);
        match self.channel_folder_name() {
            Some(channel) => base.join("channels").join(channel).join("summaries"),
            None => base.join("summaries"),
        }
    }

    /// Path of this source's manifest file.
    pub fn manifest_path(&self, archive_root: &Path) -> PathBuf {
        self.server_dir(archive_root)
            .join(self.source_type.manifest_filename())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn source_key_format() {
        let source = ArchiveSource::new(SourceType::Discord, "123456789", "My Server");
        assert_eq!(source.source_key(), "discord:123456789");
    }

    #[test]
    fn folder_name_is_slug_plus_id() {
        let source = ArchiveSource::new(SourceType::Discord, "42", "My Server!");
        assert_eq!(source.folder_name(), "my-server-_42");
    }

    #[test]
    fn summaries_dir_without_channel() {
        let source = ArchiveSource::new(SourceType::Whatsapp, "99", "Family");
        let dir = source.summaries_dir(Path::new("/a"));
        assert_eq!(dir, Path::new("/a/sources/whatsapp/family_99/summaries"));
    }

    #[test]
    fn summaries_dir_with_channel() {
        let source = ArchiveSource::new(SourceType::Discord, "1", "Guild")
            .with_channel("555", "General Chat");
        let dir = source.summaries_dir(Path::new("/a"));
        assert_eq!(
            dir,
            Path::new("/a/sources/discord/guild_1/channels/general-chat_555/summaries")
        );
    }

    #[test]
    fn source_round_trips_through_json() {
        let source = ArchiveSource::new(SourceType::Slack, "T042", "Acme")
            .with_channel("C9", "random");
        let json = serde_json::to_string(&source).unwrap();
        let back: ArchiveSource = serde_json::from_str(&json).unwrap();
        assert_eq!(back, source);
    }

    #[test]
    fn manifest_filename_per_platform() {
        assert_eq!(
            SourceType::Whatsapp.manifest_filename(),
            "group-manifest.json"
        );
        assert_eq!(
            SourceType::Slack.manifest_filename(),
            "workspace-manifest.json"
        );
    }
}
