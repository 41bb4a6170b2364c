use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default generation-lock TTL in seconds.
pub const DEFAULT_LOCK_TTL_SECS: u64 = 300;
/// Default delay between executor iterations in milliseconds.
pub const DEFAULT_PERIOD_DELAY_MS: u64 = 250;
/// Default quarantine grace period in days.
pub const DEFAULT_GRACE_DAYS: u32 = 30;

/// Top-level config (chronicle.toml + CHRONICLE_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChronicleConfig {
    #[serde(default = "default_archive_root")]
    pub archive_root: PathBuf,
    #[serde(default = "default_lock_ttl")]
    pub lock_ttl_seconds: u64,
    /// Delay the executor sleeps between periods.
    #[serde(default = "default_period_delay_ms")]
    pub period_delay_ms: u64,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub keys: KeysConfig,
    #[serde(default)]
    pub google_drive: DriveConfig,
    /// Where dated pricing snapshots are persisted. Defaults to
    /// `pricing-history.json` under the archive root when unset.
    #[serde(default)]
    pub pricing_history_path: Option<PathBuf>,
    /// Base secret for deriving the token-store encryption key.
    #[serde(default)]
    pub token_encryption_key: Option<String>,
}

impl Default for ChronicleConfig {
    fn default() -> Self {
        Self {
            archive_root: default_archive_root(),
            lock_ttl_seconds: default_lock_ttl(),
            period_delay_ms: default_period_delay_ms(),
            retention: RetentionConfig::default(),
            keys: KeysConfig::default(),
            google_drive: DriveConfig::default(),
            pricing_history_path: None,
            token_encryption_key: None,
        }
    }
}

/// Retention and soft-delete policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// If set, summaries older than this are soft-deleted on policy runs.
    #[serde(default)]
    pub retention_days: Option<u32>,
    /// Days a soft-deleted artifact stays in `.deleted/` before purge.
    #[serde(default = "default_grace_days")]
    pub soft_delete_grace_days: u32,
    /// Write a tar.gz backup into `.backups/` before permanent deletion.
    #[serde(default = "bool_true")]
    pub archive_before_delete: bool,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            retention_days: None,
            soft_delete_grace_days: default_grace_days(),
            archive_before_delete: true,
        }
    }
}

/// Summarizer credential configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeysConfig {
    /// Default OpenRouter key; falls back to OPENROUTER_API_KEY.
    #[serde(default)]
    pub openrouter_api_key: Option<String>,
    /// Env var holding the master key for file-backed per-server keys.
    #[serde(default = "default_master_key_env")]
    pub master_key_env: String,
    /// Directory for encrypted per-server key files.
    #[serde(default = "default_keys_dir")]
    pub keys_dir: PathBuf,
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            openrouter_api_key: None,
            master_key_env: default_master_key_env(),
            keys_dir: default_keys_dir(),
        }
    }
}

/// Global Google Drive fallback binding. Per-source bindings in source
/// manifests take precedence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriveConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub folder_id: String,
    #[serde(default)]
    pub credentials_path: String,
    #[serde(default = "bool_true")]
    pub create_subfolders: bool,
    #[serde(default = "default_subfolder_naming")]
    pub subfolder_naming: String,
    #[serde(default = "bool_true")]
    pub sync_on_generation: bool,
    /// "on_generation", "hourly" or "daily".
    #[serde(default = "default_sync_frequency")]
    pub sync_frequency: String,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            folder_id: String::new(),
            credentials_path: String::new(),
            create_subfolders: true,
            subfolder_naming: default_subfolder_naming(),
            sync_on_generation: true,
            sync_frequency: default_sync_frequency(),
        }
    }
}

fn bool_true() -> bool {
    true
}

fn default_archive_root() -> PathBuf {
    PathBuf::from("./summarybot-archive")
}

fn default_lock_ttl() -> u64 {
    DEFAULT_LOCK_TTL_SECS
}

fn default_period_delay_ms() -> u64 {
    DEFAULT_PERIOD_DELAY_MS
}

fn default_grace_days() -> u32 {
    DEFAULT_GRACE_DAYS
}

fn default_master_key_env() -> String {
    "CHRONICLE_MASTER_KEY".to_string()
}

fn default_keys_dir() -> PathBuf {
    PathBuf::from("./data/keys")
}

fn default_subfolder_naming() -> String {
    "{server_name}_{server_id}".to_string()
}

fn default_sync_frequency() -> String {
    "on_generation".to_string()
}

impl ChronicleConfig {
    /// Load config from a TOML file with CHRONICLE_* env var overrides.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: ChronicleConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("CHRONICLE_").split("_"))
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.chronicle/chronicle.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = ChronicleConfig::default();
        assert_eq!(config.lock_ttl_seconds, 300);
        assert_eq!(config.period_delay_ms, 250);
        assert_eq!(config.retention.soft_delete_grace_days, 30);
        assert!(config.retention.archive_before_delete);
        assert!(config.retention.retention_days.is_none());
        assert_eq!(config.google_drive.subfolder_naming, "{server_name}_{server_id}");
    }
}
