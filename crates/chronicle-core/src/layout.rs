//! On-disk layout: derived paths, folder slugs and atomic JSON writes.
//!
//! Paths are derived, never stored. Given archive root `R`, source `S` and
//! period `P`:
//!
//! ```text
//! R/sources/<type>/<folder(S)>/[channels/<cfolder(S)>/]summaries/YYYY/MM/<stem>.md
//! R/sources/<type>/<folder(S)>/[channels/<cfolder(S)>/]summaries/YYYY/MM/<stem>.meta.json
//! ```
//!
//! The root additionally holds `manifest.json`, `cost-ledger.json`,
//! `pricing-history.json`, `.deleted/`, `.backups/` and `.tokens/`.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Datelike, NaiveDate};
use serde::Serialize;

use crate::error::Result;
use crate::period::PeriodInfo;
use crate::types::ArchiveSource;

pub const ARCHIVE_MANIFEST_FILE: &str = "manifest.json";
pub const COST_LEDGER_FILE: &str = "cost-ledger.json";
pub const PRICING_HISTORY_FILE: &str = "pricing-history.json";
pub const DELETED_DIR: &str = ".deleted";
pub const DELETED_MANIFEST_FILE: &str = "deleted-manifest.json";
pub const BACKUPS_DIR: &str = ".backups";
pub const TOKENS_DIR: &str = ".tokens";

/// Lower-case `name` and replace every character outside `[a-z0-9_-]`
/// with `-`.
pub fn slugify(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

/// `summaries/YYYY/MM` directory for a period's start date.
pub fn month_dir(summaries_dir: &Path, date: NaiveDate) -> PathBuf {
    summaries_dir
        .join(format!("{:04}", date.year()))
        .join(format!("{:02}", date.month()))
}

/// Markdown path for `(source, period)`.
pub fn summary_md_path(root: &Path, source: &ArchiveSource, period: &PeriodInfo) -> PathBuf {
    month_dir(&source.summaries_dir(root), period.start_date())
        .join(format!("{}.md", period.filename_stem()))
}

/// Sidecar path for `(source, period)`.
pub fn summary_meta_path(root: &Path, source: &ArchiveSource, period: &PeriodInfo) -> PathBuf {
    month_dir(&source.summaries_dir(root), period.start_date())
        .join(format!("{}.meta.json", period.filename_stem()))
}

/// Markdown path for a daily slot by date.
pub fn daily_md_path(root: &Path, source: &ArchiveSource, date: NaiveDate) -> PathBuf {
    month_dir(&source.summaries_dir(root), date)
        .join(format!("{}_daily.md", date.format("%Y-%m-%d")))
}

/// Sidecar path for a daily slot by date.
pub fn daily_meta_path(root: &Path, source: &ArchiveSource, date: NaiveDate) -> PathBuf {
    month_dir(&source.summaries_dir(root), date)
        .join(format!("{}_daily.meta.json", date.format("%Y-%m-%d")))
}

/// Sidecar path next to a Markdown path (`x.md` → `x.meta.json`).
pub fn meta_path_for_md(md_path: &Path) -> PathBuf {
    let mut s = md_path.as_os_str().to_os_string();
    let text = s.to_string_lossy().into_owned();
    if let Some(stripped) = text.strip_suffix(".md") {
        return PathBuf::from(format!("{}.meta.json", stripped));
    }
    s.push(".meta.json");
    PathBuf::from(s)
}

/// Write `value` as pretty JSON via a temporary sibling and an atomic
/// rename. Parent directories are created as needed.
pub fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let data = serde_json::to_vec_pretty(value)?;
    atomic_write_bytes(path, &data)
}

/// Atomic byte write: temp sibling in the same directory, then rename.
pub fn atomic_write_bytes(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = PathBuf::from(format!("{}.tmp", path.display()));
    fs::write(&tmp, data)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SourceType;

    #[test]
    fn slugify_lowers_and_replaces() {
        assert_eq!(slugify("My Server!"), "my-server-");
        assert_eq!(slugify("dev_team-2"), "dev_team-2");
        assert_eq!(slugify("Café ☕"), "caf----");
    }

    #[test]
    fn daily_paths_follow_year_month_layout() {
        let source = ArchiveSource::new(SourceType::Discord, "123", "My Server");
        let date = NaiveDate::from_ymd_opt(2026, 2, 11).unwrap();
        let md = daily_md_path(Path::new("/r"), &source, date);
        assert_eq!(
            md,
            Path::new("/r/sources/discord/my-server_123/summaries/2026/02/2026-02-11_daily.md")
        );
    }

    #[test]
    fn meta_path_for_md_swaps_extension() {
        let meta = meta_path_for_md(Path::new("/a/2026-02-11_daily.md"));
        assert_eq!(meta, Path::new("/a/2026-02-11_daily.meta.json"));
    }

    #[test]
    fn atomic_write_creates_parents_and_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deep/nested/file.json");
        atomic_write_json(&path, &serde_json::json!({"a": 1})).unwrap();
        atomic_write_json(&path, &serde_json::json!({"a": 2})).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["a"], 2);
        assert!(!path.with_extension("json.tmp").exists());
    }
}
