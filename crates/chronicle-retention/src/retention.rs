//! Soft delete, recovery and grace-period expiry.
//!
//! Deleted artifacts move into a `.deleted/` quarantine keyed by source
//! and period, tracked in `deleted-manifest.json`. After the grace
//! period they are purged, optionally with a tar.gz backup dropped into
//! `.backups/` first.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, instrument, warn};
use walkdir::WalkDir;

use chronicle_core::layout::{
    atomic_write_json, meta_path_for_md, BACKUPS_DIR, DELETED_DIR, DELETED_MANIFEST_FILE,
};
use chronicle_core::{RetentionConfig, SummaryStatus};

use crate::error::Result;

/// Manifest record for one quarantined summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeletedSummaryInfo {
    pub summary_id: String,
    pub source_key: String,
    /// Period string, e.g. `2026-02-11`.
    pub period: String,
    pub deleted_at: DateTime<Utc>,
    pub reason: String,
    pub permanent_delete_at: DateTime<Utc>,
    #[serde(default)]
    pub backup_path: Option<String>,
    #[serde(default)]
    pub original_path: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct DeletedManifest {
    #[serde(default)]
    deleted: Vec<DeletedSummaryInfo>,
}

pub struct RetentionManager {
    archive_root: PathBuf,
    config: RetentionConfig,
}

impl RetentionManager {
    pub fn new(archive_root: impl Into<PathBuf>, config: RetentionConfig) -> Self {
        Self {
            archive_root: archive_root.into(),
            config,
        }
    }

    fn deleted_dir(&self) -> PathBuf {
        self.archive_root.join(DELETED_DIR)
    }

    fn manifest_path(&self) -> PathBuf {
        self.deleted_dir().join(DELETED_MANIFEST_FILE)
    }

    /// Move a summary pair into quarantine and record it for later purge.
    #[instrument(skip(self), fields(path = %md_path.display(), reason))]
    pub fn soft_delete(&self, md_path: &Path, reason: &str) -> Result<DeletedSummaryInfo> {
        let meta_path = meta_path_for_md(md_path);

        // Identity comes from the sidecar when readable, the filename
        // otherwise.
        let (summary_id, source_key, period) = match read_value(&meta_path) {
            Some(meta) => (
                meta.get("summary_id")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string(),
                meta.get("source")
                    .map(|s| {
                        format!(
                            "{}:{}",
                            s.get("source_type").and_then(Value::as_str).unwrap_or(""),
                            s.get("server_id").and_then(Value::as_str).unwrap_or("")
                        )
                    })
                    .unwrap_or_else(|| "unknown".to_string()),
                meta.get("period")
                    .and_then(|p| p.get("start"))
                    .and_then(Value::as_str)
                    .and_then(|s| s.get(..10))
                    .unwrap_or("unknown")
                    .to_string(),
            ),
            None => {
                let stem = md_path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let period = stem.get(..10).unwrap_or(&stem).to_string();
                (stem, "unknown".to_string(), period)
            }
        };

        let now = Utc::now();
        let permanent_delete_at =
            now + Duration::days(self.config.soft_delete_grace_days as i64);

        let dest_dir = self
            .deleted_dir()
            .join(source_key.replace(':', "_"))
            .join(&period);
        std::fs::create_dir_all(&dest_dir)?;

        let dest_md = dest_dir.join(md_path.file_name().unwrap_or_default());
        std::fs::rename(md_path, &dest_md)?;

        if meta_path.exists() {
            let dest_meta = dest_dir.join(meta_path.file_name().unwrap_or_default());
            std::fs::rename(&meta_path, &dest_meta)?;

            if let Some(mut meta) = read_value(&dest_meta) {
                if let Some(map) = meta.as_object_mut() {
                    map.insert(
                        "status".to_string(),
                        Value::String(SummaryStatus::Deleted.as_str().to_string()),
                    );
                    map.insert(
                        "deleted_at".to_string(),
                        serde_json::to_value(now).unwrap_or(Value::Null),
                    );
                }
                atomic_write_json(&dest_meta, &meta)?;
            }
        }

        let record = DeletedSummaryInfo {
            summary_id,
            source_key,
            period,
            deleted_at: now,
            reason: reason.to_string(),
            permanent_delete_at,
            backup_path: None,
            original_path: md_path.display().to_string(),
        };

        let mut manifest = self.load_manifest();
        manifest.deleted.push(record.clone());
        self.save_manifest(&manifest)?;

        info!(summary = %record.summary_id, "soft deleted summary");
        Ok(record)
    }

    /// Restore a quarantined summary to its original location.
    ///
    /// Fails silently (returns `false`) when the manifest entry or its
    /// files are gone.
    #[instrument(skip(self))]
    pub fn recover(&self, summary_id: &str) -> Result<bool> {
        let mut manifest = self.load_manifest();
        let Some(entry) = manifest
            .deleted
            .iter()
            .find(|e| e.summary_id == summary_id)
            .cloned()
        else {
            warn!(summary_id, "summary not found in deleted manifest");
            return Ok(false);
        };

        let quarantine_dir = self
            .deleted_dir()
            .join(entry.source_key.replace(':', "_"))
            .join(&entry.period);
        if !quarantine_dir.exists() {
            warn!(dir = %quarantine_dir.display(), "quarantine directory missing");
            return Ok(false);
        }

        let Some(md_path) = first_md(&quarantine_dir) else {
            return Ok(false);
        };
        let meta_path = meta_path_for_md(&md_path);

        let original_md = PathBuf::from(&entry.original_path);
        if let Some(parent) = original_md.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::rename(&md_path, &original_md)?;

        if meta_path.exists() {
            let original_meta = meta_path_for_md(&original_md);
            std::fs::rename(&meta_path, &original_meta)?;

            if let Some(mut meta) = read_value(&original_meta) {
                if let Some(map) = meta.as_object_mut() {
                    map.insert(
                        "status".to_string(),
                        Value::String(SummaryStatus::Complete.as_str().to_string()),
                    );
                    map.remove("deleted_at");
                }
                atomic_write_json(&original_meta, &meta)?;
            }
        }

        manifest.deleted.retain(|e| e.summary_id != summary_id);
        self.save_manifest(&manifest)?;

        if std::fs::read_dir(&quarantine_dir)?.next().is_none() {
            std::fs::remove_dir(&quarantine_dir)?;
        }

        info!(summary_id, "recovered summary");
        Ok(true)
    }

    /// Purge one quarantined summary, backing it up first when
    /// configured.
    #[instrument(skip(self))]
    pub fn permanent_delete(&self, summary_id: &str) -> Result<bool> {
        let mut manifest = self.load_manifest();
        let Some(entry) = manifest
            .deleted
            .iter()
            .find(|e| e.summary_id == summary_id)
            .cloned()
        else {
            return Ok(false);
        };

        if self.config.archive_before_delete {
            if let Err(e) = self.create_backup(&entry) {
                warn!(summary_id, error = %e, "backup before purge failed");
            }
        }

        let quarantine_dir = self
            .deleted_dir()
            .join(entry.source_key.replace(':', "_"))
            .join(&entry.period);
        if quarantine_dir.exists() {
            std::fs::remove_dir_all(&quarantine_dir)?;
        }

        manifest.deleted.retain(|e| e.summary_id != summary_id);
        self.save_manifest(&manifest)?;

        info!(summary_id, "permanently deleted summary");
        Ok(true)
    }

    /// Purge every entry whose grace period has ended.
    pub fn cleanup_expired(&self) -> Result<usize> {
        let now = Utc::now();
        let expired: Vec<String> = self
            .load_manifest()
            .deleted
            .iter()
            .filter(|e| e.permanent_delete_at <= now)
            .map(|e| e.summary_id.clone())
            .collect();

        let mut purged = 0;
        for summary_id in expired {
            if self.permanent_delete(&summary_id)? {
                purged += 1;
            }
        }
        Ok(purged)
    }

    /// Soft-delete every summary older than the configured retention
    /// window. No-op when `retention_days` is unset.
    pub fn apply_retention_policy(&self) -> Result<usize> {
        let Some(retention_days) = self.config.retention_days else {
            return Ok(0);
        };
        let cutoff = Utc::now() - Duration::days(retention_days as i64);
        let sources_dir = self.archive_root.join("sources");
        if !sources_dir.exists() {
            return Ok(0);
        }

        let mut deleted = 0;
        for entry in WalkDir::new(&sources_dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let md_path = entry.path();
            if md_path.extension().map_or(true, |ext| ext != "md") {
                continue;
            }
            let meta_path = meta_path_for_md(md_path);
            let Some(meta) = read_value(&meta_path) else {
                continue;
            };
            let Some(generated_at) = meta
                .get("generated_at")
                .and_then(Value::as_str)
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            else {
                continue;
            };
            if generated_at.with_timezone(&Utc) < cutoff {
                match self.soft_delete(md_path, "retention_policy") {
                    Ok(_) => deleted += 1,
                    Err(e) => warn!(path = %md_path.display(), error = %e, "retention delete failed"),
                }
            }
        }

        info!(deleted, "applied retention policy");
        Ok(deleted)
    }

    pub fn list_deleted(&self) -> Vec<DeletedSummaryInfo> {
        self.load_manifest().deleted
    }

    fn create_backup(&self, entry: &DeletedSummaryInfo) -> Result<Option<PathBuf>> {
        let quarantine_dir = self
            .deleted_dir()
            .join(entry.source_key.replace(':', "_"))
            .join(&entry.period);
        if !quarantine_dir.exists() {
            return Ok(None);
        }

        let backups_dir = self.archive_root.join(BACKUPS_DIR);
        std::fs::create_dir_all(&backups_dir)?;

        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let backup_path = backups_dir.join(format!(
            "{}_{}_{}.tar.gz",
            entry.source_key.replace(':', "_"),
            entry.period,
            stamp
        ));

        let file = std::fs::File::create(&backup_path)?;
        let encoder = GzEncoder::new(file, Compression::default());
        let mut archive = tar::Builder::new(encoder);
        for file_entry in std::fs::read_dir(&quarantine_dir)?.filter_map(|e| e.ok()) {
            let path = file_entry.path();
            if path.is_file() {
                let name = file_entry.file_name();
                archive.append_path_with_name(&path, Path::new(&name))?;
            }
        }
        archive.into_inner()?.finish()?;

        info!(path = %backup_path.display(), "created backup archive");
        Ok(Some(backup_path))
    }

    fn load_manifest(&self) -> DeletedManifest {
        std::fs::read_to_string(self.manifest_path())
            .ok()
            .and_then(|data| serde_json::from_str(&data).ok())
            .unwrap_or_default()
    }

    fn save_manifest(&self, manifest: &DeletedManifest) -> Result<()> {
        atomic_write_json(&self.manifest_path(), manifest)?;
        Ok(())
    }
}

fn read_value(path: &Path) -> Option<Value> {
    let data = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&data).ok()
}

fn first_md(dir: &Path) -> Option<PathBuf> {
    std::fs::read_dir(dir)
        .ok()?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .find(|p| p.extension().is_some_and(|ext| ext == "md"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_pair(root: &Path, date: &str) -> PathBuf {
        let dir = root.join("sources/discord/my-server_123/summaries/2026/02");
        std::fs::create_dir_all(&dir).unwrap();
        let md_path = dir.join(format!("{}_daily.md", date));
        std::fs::write(&md_path, "# Summary\ncontent").unwrap();
        let meta = serde_json::json!({
            "summary_id": format!("sum_{}", date),
            "generated_at": "2024-01-05T00:00:00Z",
            "period": {"start": format!("{}T00:00:00", date), "end": format!("{}T23:59:59", date), "timezone": "UTC", "duration_hours": 24},
            "source": {"source_type": "discord", "server_id": "123", "server_name": "My Server"},
            "status": "complete",
            "backfill_eligible": true
        });
        std::fs::write(
            dir.join(format!("{}_daily.meta.json", date)),
            serde_json::to_string_pretty(&meta).unwrap(),
        )
        .unwrap();
        md_path
    }

    fn manager(root: &Path) -> RetentionManager {
        RetentionManager::new(root, RetentionConfig::default())
    }

    #[test]
    fn soft_delete_moves_pair_into_quarantine() {
        let dir = tempfile::tempdir().unwrap();
        let md_path = write_pair(dir.path(), "2026-02-11");

        let record = manager(dir.path()).soft_delete(&md_path, "manual").unwrap();
        assert_eq!(record.source_key, "discord:123");
        assert_eq!(record.period, "2026-02-11");
        assert!(!md_path.exists());

        let quarantine = dir
            .path()
            .join(".deleted/discord_123/2026-02-11/2026-02-11_daily.md");
        assert!(quarantine.exists());

        let meta = read_value(&meta_path_for_md(&quarantine)).unwrap();
        assert_eq!(meta["status"], "deleted");
        assert!(meta.get("deleted_at").is_some());
    }

    #[test]
    fn recover_restores_original_paths_and_status() {
        let dir = tempfile::tempdir().unwrap();
        let md_path = write_pair(dir.path(), "2026-02-11");
        let mgr = manager(dir.path());

        let record = mgr.soft_delete(&md_path, "manual").unwrap();
        assert!(mgr.recover(&record.summary_id).unwrap());

        assert!(md_path.exists());
        let meta = read_value(&meta_path_for_md(&md_path)).unwrap();
        assert_eq!(meta["status"], "complete");
        assert!(meta.get("deleted_at").is_none());
        assert!(mgr.list_deleted().is_empty());
    }

    #[test]
    fn recover_unknown_summary_returns_false() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!manager(dir.path()).recover("sum_missing").unwrap());
    }

    #[test]
    fn cleanup_expired_purges_and_backs_up() {
        let dir = tempfile::tempdir().unwrap();
        let md_path = write_pair(dir.path(), "2026-02-11");
        let mgr = RetentionManager::new(
            dir.path(),
            RetentionConfig {
                retention_days: None,
                soft_delete_grace_days: 0,
                archive_before_delete: true,
            },
        );

        mgr.soft_delete(&md_path, "manual").unwrap();
        let purged = mgr.cleanup_expired().unwrap();
        assert_eq!(purged, 1);
        assert!(mgr.list_deleted().is_empty());
        assert!(!dir.path().join(".deleted/discord_123/2026-02-11").exists());

        let backups: Vec<_> = std::fs::read_dir(dir.path().join(".backups"))
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert_eq!(backups.len(), 1);
        assert!(backups[0]
            .file_name()
            .to_string_lossy()
            .ends_with(".tar.gz"));
    }

    #[test]
    fn cleanup_leaves_unexpired_entries() {
        let dir = tempfile::tempdir().unwrap();
        let md_path = write_pair(dir.path(), "2026-02-11");
        let mgr = manager(dir.path());
        mgr.soft_delete(&md_path, "manual").unwrap();

        assert_eq!(mgr.cleanup_expired().unwrap(), 0);
        assert_eq!(mgr.list_deleted().len(), 1);
    }

    #[test]
    fn retention_policy_soft_deletes_old_summaries() {
        let dir = tempfile::tempdir().unwrap();
        write_pair(dir.path(), "2026-02-11");
        let mgr = RetentionManager::new(
            dir.path(),
            RetentionConfig {
                retention_days: Some(30),
                soft_delete_grace_days: 30,
                archive_before_delete: false,
            },
        );

        // generated_at in the fixture is 2024-01-05, long past 30 days.
        let deleted = mgr.apply_retention_policy().unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(mgr.list_deleted().len(), 1);
        assert_eq!(mgr.list_deleted()[0].reason, "retention_policy");
    }
}
