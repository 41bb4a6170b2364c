//! Gap and outdated-summary detection.
//!
//! The scanner classifies every day in a range as complete, failed or
//! missing, flags complete summaries produced by an older prompt
//! version, and folds uncovered runs of days into contiguous gaps.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{Duration, NaiveDate, Utc};
use serde_json::Value;
use tracing::{info, instrument, warn};
use walkdir::WalkDir;

use chronicle_core::{ArchiveSource, SummaryStatus};

use crate::types::{GapInfo, OutdatedRecord, OutdatedThreshold, ScanResult, SummaryRecord};

pub struct ArchiveScanner {
    archive_root: PathBuf,
}

impl ArchiveScanner {
    pub fn new(archive_root: impl Into<PathBuf>) -> Self {
        Self {
            archive_root: archive_root.into(),
        }
    }

    /// Scan one source over `[start, end]` (inclusive).
    ///
    /// Defaults: `start` = earliest sidecar found (30-day lookback for an
    /// empty tree), `end` = yesterday, clamped to the latest sidecar.
    /// Supplying `current_prompt_version` enables outdated detection at
    /// the given threshold.
    #[instrument(skip(self, source), fields(source = %source.source_key()))]
    pub fn scan_source(
        &self,
        source: &ArchiveSource,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
        current_prompt_version: Option<&str>,
        threshold: OutdatedThreshold,
    ) -> ScanResult {
        let summaries_dir = source.summaries_dir(&self.archive_root);
        let records = collect_records(&summaries_dir);

        let yesterday = Utc::now().date_naive() - Duration::days(1);
        let (earliest, latest) = if records.is_empty() {
            (
                start_date.unwrap_or(yesterday - Duration::days(29)),
                end_date.unwrap_or(yesterday),
            )
        } else {
            let min_date = *records.keys().next().unwrap();
            let max_date = *records.keys().next_back().unwrap();
            (
                start_date.unwrap_or(min_date),
                end_date.unwrap_or_else(|| max_date.min(yesterday)),
            )
        };

        let mut complete = 0;
        let mut failed = 0;
        let mut missing = 0;
        let mut outdated_list = Vec::new();
        let mut gaps: Vec<GapInfo> = Vec::new();
        let mut gap_start: Option<NaiveDate> = None;
        let mut gap_has_failed = false;

        let mut current = earliest;
        while current <= latest {
            match records.get(&current) {
                Some(record) if record.status == SummaryStatus::Complete => {
                    complete += 1;

                    if let (Some(current_version), Some(summary_version)) =
                        (current_prompt_version, record.prompt_version.as_deref())
                    {
                        if is_outdated(summary_version, current_version, threshold) {
                            outdated_list.push(OutdatedRecord {
                                date: current,
                                current_version: current_version.to_string(),
                                summary_version: summary_version.to_string(),
                                meta_path: record.meta_path.clone(),
                            });
                        }
                    }

                    // A complete day terminates any open gap at date - 1.
                    if let Some(start) = gap_start.take() {
                        let reason = if gap_has_failed { "failed" } else { "missing" };
                        gaps.push(GapInfo::new(start, current - Duration::days(1), reason));
                        gap_has_failed = false;
                    }
                }
                Some(record) if record.status == SummaryStatus::Incomplete => {
                    failed += 1;
                    // Ineligible failures count but never open a gap.
                    if record.backfill_eligible && gap_start.is_none() {
                        gap_start = Some(current);
                    }
                    if record.backfill_eligible {
                        gap_has_failed = true;
                    }
                }
                Some(_) | None => {
                    missing += 1;
                    if gap_start.is_none() {
                        gap_start = Some(current);
                    }
                }
            }
            current += Duration::days(1);
        }

        if let Some(start) = gap_start {
            let reason = if gap_has_failed { "failed" } else { "missing" };
            gaps.push(GapInfo::new(start, latest, reason));
        }

        let outdated = outdated_list.len() as u64;
        info!(
            complete,
            failed,
            missing,
            outdated,
            gaps = gaps.len(),
            "scan finished"
        );

        ScanResult {
            source: source.clone(),
            total_days: (latest - earliest).num_days() + 1,
            complete,
            failed,
            missing,
            outdated,
            summaries: records.into_values().collect(),
            gaps,
            outdated_summaries: outdated_list,
            earliest_date: earliest,
            latest_date: latest,
        }
    }

    /// Scan every given source (usually the registry's discovery output).
    pub fn scan_sources(
        &self,
        sources: &[ArchiveSource],
        current_prompt_version: Option<&str>,
    ) -> Vec<ScanResult> {
        sources
            .iter()
            .map(|source| {
                self.scan_source(
                    source,
                    None,
                    None,
                    current_prompt_version,
                    OutdatedThreshold::default(),
                )
            })
            .collect()
    }

    /// Dates needing backfill: flattened eligible gaps plus, optionally,
    /// outdated dates. Deduplicated and sorted ascending.
    pub fn backfill_candidates(
        &self,
        source: &ArchiveSource,
        include_outdated: bool,
        current_prompt_version: Option<&str>,
    ) -> Vec<NaiveDate> {
        let result = self.scan_source(
            source,
            None,
            None,
            if include_outdated {
                current_prompt_version
            } else {
                None
            },
            OutdatedThreshold::default(),
        );

        let mut candidates: Vec<NaiveDate> = result
            .gaps
            .iter()
            .filter(|gap| gap.backfill_eligible)
            .flat_map(|gap| gap.dates())
            .collect();

        if include_outdated {
            for outdated in &result.outdated_summaries {
                candidates.push(outdated.date);
            }
        }

        candidates.sort_unstable();
        candidates.dedup();
        candidates
    }
}

/// Parse every sidecar under the summaries tree into scan records,
/// keyed and ordered by date. Malformed sidecars are logged and skipped.
fn collect_records(summaries_dir: &Path) -> BTreeMap<NaiveDate, SummaryRecord> {
    let mut records = BTreeMap::new();
    if !summaries_dir.exists() {
        return records;
    }

    for entry in WalkDir::new(summaries_dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let path = entry.path();
        if !path.to_string_lossy().ends_with(".meta.json") {
            continue;
        }
        match parse_record(path) {
            Some(record) => {
                records.insert(record.date, record);
            }
            None => warn!(path = %path.display(), "skipping malformed sidecar"),
        }
    }
    records
}

fn parse_record(meta_path: &Path) -> Option<SummaryRecord> {
    let data = std::fs::read_to_string(meta_path).ok()?;
    let value: Value = serde_json::from_str(&data).ok()?;

    let start = value.get("period")?.get("start")?.as_str()?;
    let date = NaiveDate::parse_from_str(start.get(..10)?, "%Y-%m-%d").ok()?;
    let status: SummaryStatus = value.get("status")?.as_str()?.parse().ok()?;

    Some(SummaryRecord {
        date,
        status,
        prompt_version: value
            .get("generation")
            .and_then(|g| g.get("prompt_version"))
            .and_then(|v| v.as_str())
            .map(str::to_string),
        backfill_eligible: value
            .get("backfill_eligible")
            .and_then(Value::as_bool)
            .unwrap_or(true),
        incomplete_reason: value
            .get("incomplete_reason")
            .and_then(|r| r.get("code"))
            .and_then(|c| c.as_str())
            .map(str::to_string),
        meta_path: meta_path.to_path_buf(),
    })
}

/// Whether `summary_version` is behind `current_version` by at least the
/// threshold. Versions split on `.` and pad to three integers; anything
/// non-numeric is never outdated.
pub fn is_outdated(summary_version: &str, current_version: &str, threshold: OutdatedThreshold) -> bool {
    let (Some(old), Some(new)) = (parse_version(summary_version), parse_version(current_version))
    else {
        return false;
    };

    match threshold {
        OutdatedThreshold::Major => new[0] > old[0],
        OutdatedThreshold::Minor => new[0] > old[0] || (new[0] == old[0] && new[1] > old[1]),
        OutdatedThreshold::Patch => new > old,
    }
}

fn parse_version(version: &str) -> Option<[i64; 3]> {
    let mut parts = [0i64; 3];
    let mut count = 0;
    for (i, piece) in version.split('.').enumerate() {
        if i >= 3 {
            break;
        }
        parts[i] = piece.parse().ok()?;
        count = i + 1;
    }
    (count > 0).then_some(parts)
}
