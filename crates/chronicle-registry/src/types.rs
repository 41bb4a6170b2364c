//! Manifest documents: the per-source manifest and the archive root
//! manifest.
//!
//! Source manifests are authoritative over ambient defaults, never over a
//! sidecar's own recorded generation metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use chronicle_core::layout::atomic_write_json;
use chronicle_core::{Granularity, Result as CoreResult, SourceType};

/// Currently active prompt template, tracked for outdated detection.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PromptVersion {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub checksum: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PromptVersions {
    #[serde(default)]
    pub current: PromptVersion,
}

/// Cost tracking and budget settings for one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostTracking {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default)]
    pub budget_monthly_usd: Option<f64>,
    #[serde(default = "default_alert_threshold")]
    pub alert_threshold_percent: u8,
    #[serde(default = "default_priority")]
    pub priority: u8,
}

impl Default for CostTracking {
    fn default() -> Self {
        Self {
            enabled: true,
            budget_monthly_usd: None,
            alert_threshold_percent: default_alert_threshold(),
            priority: default_priority(),
        }
    }
}

/// API-key binding: which summarizer key this source uses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKeyBinding {
    /// Key reference, e.g. `env:OPENROUTER_KEY_DISCORD_123`.
    #[serde(default)]
    pub openrouter_key_ref: Option<String>,
    #[serde(default)]
    pub use_server_key: bool,
    #[serde(default = "bool_true")]
    pub fallback_to_default: bool,
}

impl Default for ApiKeyBinding {
    fn default() -> Self {
        Self {
            openrouter_key_ref: None,
            use_server_key: false,
            fallback_to_default: true,
        }
    }
}

/// Per-server Google Drive sync binding stored in the source manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSyncConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub folder_id: String,
    #[serde(default)]
    pub folder_name: String,
    #[serde(default)]
    pub oauth_token_id: String,
    #[serde(default)]
    pub configured_by: String,
    #[serde(default)]
    pub configured_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_sync: Option<DateTime<Utc>>,
    #[serde(default = "bool_true")]
    pub sync_on_generation: bool,
    #[serde(default = "bool_true")]
    pub include_metadata: bool,
    /// Use the global binding when this server's credentials are absent
    /// or invalid.
    #[serde(default = "bool_true")]
    pub fallback_to_default: bool,
}

impl Default for ServerSyncConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            folder_id: String::new(),
            folder_name: String::new(),
            oauth_token_id: String::new(),
            configured_by: String::new(),
            configured_at: None,
            last_sync: None,
            sync_on_generation: true,
            include_metadata: true,
            fallback_to_default: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SyncBinding {
    #[serde(default)]
    pub google_drive: Option<ServerSyncConfig>,
}

/// Per-source manifest (`server-manifest.json` and platform variants).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceManifest {
    pub source_type: SourceType,
    pub server_id: String,
    pub server_name: String,
    #[serde(default = "default_timezone")]
    pub default_timezone: String,
    #[serde(default = "default_granularity")]
    pub default_granularity: Granularity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_versions: Option<PromptVersions>,
    #[serde(default)]
    pub cost_tracking: CostTracking,
    #[serde(default)]
    pub api_keys: ApiKeyBinding,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync: Option<SyncBinding>,
}

impl SourceManifest {
    pub fn new(source_type: SourceType, server_id: &str, server_name: &str) -> Self {
        Self {
            source_type,
            server_id: server_id.to_string(),
            server_name: server_name.to_string(),
            default_timezone: default_timezone(),
            default_granularity: default_granularity(),
            prompt_versions: None,
            cost_tracking: CostTracking::default(),
            api_keys: ApiKeyBinding::default(),
            sync: None,
        }
    }

    pub fn current_prompt_version(&self) -> Option<&str> {
        self.prompt_versions
            .as_ref()?
            .current
            .version
            .as_deref()
    }

    pub fn drive_sync(&self) -> Option<&ServerSyncConfig> {
        self.sync.as_ref()?.google_drive.as_ref()
    }

    pub fn save(&self, path: &Path) -> CoreResult<()> {
        atomic_write_json(path, self)
    }

    pub fn load(path: &Path) -> CoreResult<Self> {
        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }
}

/// One source line in the archive manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestSourceEntry {
    pub source_type: SourceType,
    pub server_id: String,
    pub server_name: String,
    /// `<type>/<folder>` relative to `sources/`.
    pub folder: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary_count: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorInfo {
    pub name: String,
    pub version: String,
}

/// Root `manifest.json` listing every source with counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveManifest {
    pub schema_version: String,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub generator: GeneratorInfo,
    #[serde(default)]
    pub sources: Vec<ManifestSourceEntry>,
}

impl Default for ArchiveManifest {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            schema_version: "1.0.0".to_string(),
            created_at: now,
            last_updated: now,
            generator: GeneratorInfo {
                name: "Chronicle".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            sources: Vec::new(),
        }
    }
}

impl ArchiveManifest {
    pub fn save(&self, path: &Path) -> CoreResult<()> {
        atomic_write_json(path, self)
    }

    pub fn load(path: &Path) -> CoreResult<Self> {
        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }
}

fn bool_true() -> bool {
    true
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_granularity() -> Granularity {
    Granularity::Daily
}

fn default_alert_threshold() -> u8 {
    80
}

fn default_priority() -> u8 {
    2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_round_trips_through_json() {
        let mut manifest = SourceManifest::new(SourceType::Discord, "123", "My Server");
        manifest.prompt_versions = Some(PromptVersions {
            current: PromptVersion {
                version: Some("1.1.0".to_string()),
                checksum: Some("sha256:abc".to_string()),
                updated_at: Some(Utc::now()),
            },
        });
        manifest.api_keys.use_server_key = true;
        manifest.api_keys.openrouter_key_ref = Some("env:KEY_123".to_string());

        let json = serde_json::to_string_pretty(&manifest).unwrap();
        let back: SourceManifest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, manifest);
        assert_eq!(back.current_prompt_version(), Some("1.1.0"));
    }

    #[test]
    fn sparse_manifest_fills_defaults() {
        let json = r#"{"source_type": "whatsapp", "server_id": "g1", "server_name": "Family"}"#;
        let manifest: SourceManifest = serde_json::from_str(json).unwrap();
        assert_eq!(manifest.default_timezone, "UTC");
        assert_eq!(manifest.default_granularity, Granularity::Daily);
        assert!(manifest.cost_tracking.enabled);
        assert!(manifest.api_keys.fallback_to_default);
        assert!(!manifest.api_keys.use_server_key);
    }
}
