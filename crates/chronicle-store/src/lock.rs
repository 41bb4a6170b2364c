//! Generation locking: at most one concurrent worker per (source, period).
//!
//! The lock is a TTL lease embedded in the slot's sidecar, taken and
//! released through temp-sibling atomic renames. Correctness on a single
//! host relies on POSIX rename atomicity; a shared filesystem backend
//! must provide the same guarantee.
//!
//! Sidecars are handled here as loose JSON: a freshly locked slot carries
//! only `status` and `lock`, and the manager must not invent period or
//! source fields it does not know.

use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use chronicle_core::layout::atomic_write_json;
use chronicle_core::{GenerationLock, SummaryStatus};

use crate::error::Result;

/// Default lock time-to-live.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(300);

pub struct LockManager {
    ttl: Duration,
    worker_id: String,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new(DEFAULT_LOCK_TTL, None)
    }
}

impl LockManager {
    pub fn new(ttl: Duration, worker_id: Option<String>) -> Self {
        Self {
            ttl,
            worker_id: worker_id.unwrap_or_else(|| format!("worker-{}", std::process::id())),
        }
    }

    /// Attempt to acquire the lease on a sidecar path.
    ///
    /// Returns the job id on success, `None` when the slot is complete or
    /// held by a live lock. An expired lock is taken over with a warning
    /// naming the previous holder.
    pub fn acquire(&self, meta_path: &Path, job_id: Option<&str>) -> Result<Option<String>> {
        let job_id = job_id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut meta = match read_meta(meta_path) {
            Ok(Some(meta)) => {
                if status_of(&meta) == Some(SummaryStatus::Complete) {
                    debug!(path = %meta_path.display(), "summary already complete");
                    return Ok(None);
                }

                if status_of(&meta) == Some(SummaryStatus::Generating) {
                    if let Some(lock) = lock_of(&meta) {
                        if !lock.is_expired() {
                            debug!(
                                path = %meta_path.display(),
                                holder = %lock.job_id,
                                "lock held"
                            );
                            return Ok(None);
                        }
                        warn!(
                            path = %meta_path.display(),
                            previous_job = %lock.job_id,
                            "taking over expired lock"
                        );
                    }
                }
                meta
            }
            Ok(None) => Map::new(),
            Err(e) => {
                // A sidecar we cannot parse is not one we may clobber.
                warn!(path = %meta_path.display(), error = %e, "unreadable sidecar, refusing lock");
                return Ok(None);
            }
        };

        let now = Utc::now();
        let lock = GenerationLock {
            job_id: job_id.clone(),
            acquired_at: now,
            acquired_by: self.worker_id.clone(),
            expires_at: now + chrono::Duration::seconds(self.ttl.as_secs() as i64),
        };

        meta.insert(
            "status".to_string(),
            json!(SummaryStatus::Generating.as_str()),
        );
        meta.insert("lock".to_string(), serde_json::to_value(&lock)?);
        atomic_write_json(meta_path, &Value::Object(meta))?;

        info!(path = %meta_path.display(), job_id = %job_id, "acquired lock");
        Ok(Some(job_id))
    }

    /// Release the lease: set the terminal status, clear the lock and
    /// merge any extra fields, atomically.
    pub fn release(
        &self,
        meta_path: &Path,
        status: SummaryStatus,
        extra: Option<Map<String, Value>>,
    ) -> Result<()> {
        let mut meta = read_meta(meta_path)?.unwrap_or_default();
        meta.insert("status".to_string(), json!(status.as_str()));
        meta.remove("lock");
        if let Some(extra) = extra {
            for (key, value) in extra {
                meta.insert(key, value);
            }
        }
        atomic_write_json(meta_path, &Value::Object(meta))?;
        info!(path = %meta_path.display(), status = %status, "released lock");
        Ok(())
    }

    /// Refresh `expires_at`, but only for the lock's current owner.
    pub fn extend(
        &self,
        meta_path: &Path,
        job_id: &str,
        extension: Option<Duration>,
    ) -> Result<bool> {
        let Some(mut meta) = read_meta(meta_path)? else {
            return Ok(false);
        };

        let Some(lock) = lock_of(&meta) else {
            return Ok(false);
        };
        if lock.job_id != job_id {
            warn!(job_id = %job_id, holder = %lock.job_id, "cannot extend lock not owned");
            return Ok(false);
        }

        let extension = extension.unwrap_or(self.ttl);
        let expires_at = Utc::now() + chrono::Duration::seconds(extension.as_secs() as i64);
        let mut updated = lock.clone();
        updated.expires_at = expires_at;
        meta.insert("lock".to_string(), serde_json::to_value(&updated)?);
        atomic_write_json(meta_path, &Value::Object(meta))?;
        debug!(job_id = %job_id, until = %expires_at, "extended lock");
        Ok(true)
    }

    /// Current lock if the slot is `generating` and the lease is live.
    pub fn check(&self, meta_path: &Path) -> Option<GenerationLock> {
        let meta = read_meta(meta_path).ok().flatten()?;
        if status_of(&meta) != Some(SummaryStatus::Generating) {
            return None;
        }
        lock_of(&meta).filter(|lock| !lock.is_expired())
    }

    /// Admin path: drop any lock and reset the slot to `pending`.
    pub fn force_release(&self, meta_path: &Path) -> Result<bool> {
        let Some(mut meta) = read_meta(meta_path)? else {
            return Ok(false);
        };
        meta.remove("lock");
        meta.insert("status".to_string(), json!(SummaryStatus::Pending.as_str()));
        atomic_write_json(meta_path, &Value::Object(meta))?;
        warn!(path = %meta_path.display(), "force released lock");
        Ok(true)
    }

    /// Operator command: re-mark a slot as eligible for backfill.
    ///
    /// `NO_MESSAGES` slots are written ineligible and are never promoted
    /// automatically, even after a retro import.
    pub fn mark_backfill_eligible(&self, meta_path: &Path) -> Result<bool> {
        let Some(mut meta) = read_meta(meta_path)? else {
            return Ok(false);
        };
        meta.insert("backfill_eligible".to_string(), json!(true));
        atomic_write_json(meta_path, &Value::Object(meta))?;
        info!(path = %meta_path.display(), "slot marked backfill eligible");
        Ok(true)
    }

    /// Sweep the whole archive and reset every expired `generating` lock
    /// back to `pending`. Returns the number of sidecars rewritten.
    pub fn cleanup_expired_locks(&self, archive_root: &Path) -> usize {
        let mut cleaned = 0;
        for entry in WalkDir::new(archive_root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let path = entry.path();
            if !path.to_string_lossy().ends_with(".meta.json") {
                continue;
            }
            let Ok(Some(mut meta)) = read_meta(path) else {
                continue;
            };
            if status_of(&meta) != Some(SummaryStatus::Generating) {
                continue;
            }
            let Some(lock) = lock_of(&meta) else {
                continue;
            };
            if !lock.is_expired() {
                continue;
            }

            meta.remove("lock");
            meta.insert("status".to_string(), json!(SummaryStatus::Pending.as_str()));
            match atomic_write_json(path, &Value::Object(meta)) {
                Ok(()) => {
                    cleaned += 1;
                    info!(path = %path.display(), stale_job = %lock.job_id, "cleaned expired lock");
                }
                Err(e) => warn!(path = %path.display(), error = %e, "failed to clean lock"),
            }
        }
        cleaned
    }
}

fn read_meta(path: &Path) -> Result<Option<Map<String, Value>>> {
    match std::fs::read_to_string(path) {
        Ok(data) => {
            let value: Value = serde_json::from_str(&data)?;
            match value {
                Value::Object(map) => Ok(Some(map)),
                _ => Ok(Some(Map::new())),
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn status_of(meta: &Map<String, Value>) -> Option<SummaryStatus> {
    meta.get("status")?.as_str()?.parse().ok()
}

fn lock_of(meta: &Map<String, Value>) -> Option<GenerationLock> {
    serde_json::from_value(meta.get("lock")?.clone()).ok()
}
