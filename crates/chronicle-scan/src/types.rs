use std::path::PathBuf;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use chronicle_core::{ArchiveSource, SummaryStatus};

/// How large a prompt-version change must be before a summary counts as
/// outdated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutdatedThreshold {
    Major,
    #[default]
    Minor,
    Patch,
}

/// One parsed sidecar, reduced to what the scanner needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRecord {
    pub date: NaiveDate,
    pub status: SummaryStatus,
    #[serde(default)]
    pub prompt_version: Option<String>,
    #[serde(default = "default_true")]
    pub backfill_eligible: bool,
    #[serde(default)]
    pub incomplete_reason: Option<String>,
    pub meta_path: PathBuf,
}

fn default_true() -> bool {
    true
}

/// A contiguous run of days needing backfill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GapInfo {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// "missing" or "failed".
    pub reason: String,
    pub days: i64,
    pub backfill_eligible: bool,
}

impl GapInfo {
    pub fn new(start_date: NaiveDate, end_date: NaiveDate, reason: &str) -> Self {
        Self {
            start_date,
            end_date,
            reason: reason.to_string(),
            days: (end_date - start_date).num_days() + 1,
            backfill_eligible: true,
        }
    }

    /// Every date covered by this gap, ascending.
    pub fn dates(&self) -> Vec<NaiveDate> {
        let mut dates = Vec::new();
        let mut current = self.start_date;
        while current <= self.end_date {
            dates.push(current);
            current += chrono::Duration::days(1);
        }
        dates
    }
}

/// A complete summary whose prompt version is behind the current one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutdatedRecord {
    pub date: NaiveDate,
    pub current_version: String,
    pub summary_version: String,
    pub meta_path: PathBuf,
}

/// Scanner output: per-day classification plus gaps and outdated entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    pub source: ArchiveSource,
    pub total_days: i64,
    pub complete: u64,
    pub failed: u64,
    pub missing: u64,
    pub outdated: u64,
    pub summaries: Vec<SummaryRecord>,
    pub gaps: Vec<GapInfo>,
    pub outdated_summaries: Vec<OutdatedRecord>,
    pub earliest_date: NaiveDate,
    pub latest_date: NaiveDate,
}
