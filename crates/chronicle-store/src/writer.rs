//! Markdown + sidecar writer.
//!
//! Each slot is a pair of files: a Markdown document and a `.meta.json`
//! sidecar. Writes go metadata → Markdown → metadata finalisation so a
//! reader never sees a `complete` sidecar without its Markdown. Every
//! write is a temp-sibling atomic replace; readers must not infer
//! completion from the Markdown alone.

use std::path::{Path, PathBuf};

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use uuid::Uuid;

use chronicle_core::layout::{atomic_write_bytes, summary_md_path, summary_meta_path};
use chronicle_core::{
    ArchiveSource, BackfillInfo, GenerationInfo, IncompleteInfo, IncompleteReason, IntegrityInfo,
    PeriodInfo, SidecarMetadata, SourceType, SummaryStatistics, SummaryStatus,
};

use crate::error::Result;

/// Checksum string for a Markdown document: `sha256:` + first 16 hex.
pub fn content_checksum(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    format!("sha256:{}", &hex::encode(digest)[..16])
}

/// Writes summary artifacts into the archive tree.
pub struct SummaryWriter {
    archive_root: PathBuf,
}

impl SummaryWriter {
    pub fn new(archive_root: impl Into<PathBuf>) -> Self {
        Self {
            archive_root: archive_root.into(),
        }
    }

    /// Write a complete summary: header + body + footer Markdown plus the
    /// finalised sidecar. Returns the Markdown path.
    #[allow(clippy::too_many_arguments)]
    pub fn write_summary(
        &self,
        source: &ArchiveSource,
        period: &PeriodInfo,
        content: &str,
        statistics: SummaryStatistics,
        generation: GenerationInfo,
        is_backfill: bool,
        backfill_reason: Option<&str>,
    ) -> Result<PathBuf> {
        let summary_id = format!("sum_{}", &Uuid::new_v4().simple().to_string()[..12]);
        let md_path = summary_md_path(&self.archive_root, source, period);
        let meta_path = summary_meta_path(&self.archive_root, source, period);

        let full_content = self.render_markdown(source, period, content, &statistics, &generation);
        let checksum = content_checksum(&full_content);

        let backfill = is_backfill.then(|| BackfillInfo {
            is_backfill: true,
            original_generation_failed: false,
            backfilled_at: Some(Utc::now()),
            reason: backfill_reason.map(str::to_string),
        });

        let mut metadata = SidecarMetadata {
            summary_id: Some(summary_id),
            generated_at: Some(Utc::now()),
            period: period.clone(),
            source: source.clone(),
            status: SummaryStatus::Generating,
            backfill_eligible: true,
            statistics: Some(statistics),
            generation: Some(generation),
            backfill,
            incomplete_reason: None,
            lock: None,
            integrity: Some(IntegrityInfo {
                content_checksum: checksum,
                // Reference validation is a separate offline pass.
                references_validated: false,
            }),
            deleted_at: None,
        };

        // Stage 1: sidecar lands first, still non-complete.
        metadata.save(&meta_path)?;

        // Stage 2: the Markdown, single create-and-replace.
        atomic_write_bytes(&md_path, full_content.as_bytes())?;

        // Stage 3: finalise.
        metadata.status = SummaryStatus::Complete;
        metadata.save(&meta_path)?;

        info!(path = %md_path.display(), source = %source.source_key(), "wrote summary");
        Ok(md_path)
    }

    /// Write a sidecar-only marker for a slot that resolved without a
    /// summary. Never downgrades an existing `complete` sidecar.
    pub fn write_incomplete_marker(
        &self,
        source: &ArchiveSource,
        period: &PeriodInfo,
        reason_code: IncompleteReason,
        reason_message: &str,
        details: Option<serde_json::Value>,
        backfill_eligible: bool,
    ) -> Result<PathBuf> {
        let meta_path = summary_meta_path(&self.archive_root, source, period);

        if let Ok(existing) = SidecarMetadata::load(&meta_path) {
            if existing.status == SummaryStatus::Complete {
                warn!(
                    path = %meta_path.display(),
                    "refusing to mark a complete summary incomplete"
                );
                return Ok(meta_path);
            }
        }

        let metadata = SidecarMetadata {
            summary_id: None,
            generated_at: None,
            period: period.clone(),
            source: source.clone(),
            status: SummaryStatus::Incomplete,
            backfill_eligible,
            statistics: None,
            generation: None,
            backfill: None,
            incomplete_reason: Some(IncompleteInfo {
                code: reason_code,
                message: reason_message.to_string(),
                details: details.unwrap_or(serde_json::Value::Null),
            }),
            lock: None,
            integrity: None,
            deleted_at: None,
        };

        metadata.save(&meta_path)?;
        info!(
            path = %meta_path.display(),
            code = %reason_code,
            "wrote incomplete marker"
        );
        Ok(meta_path)
    }

    fn render_markdown(
        &self,
        source: &ArchiveSource,
        period: &PeriodInfo,
        content: &str,
        statistics: &SummaryStatistics,
        generation: &GenerationInfo,
    ) -> String {
        let header = render_header(source, period, statistics);
        let footer = render_footer(generation);
        format!("{}\n---\n\n{}\n\n---\n\n{}", header, content, footer)
    }
}

fn title_prefix(period: &PeriodInfo) -> &'static str {
    if period.duration_hours <= 24 {
        "Daily Summary"
    } else if period.duration_hours <= 168 {
        "Weekly Summary"
    } else if period.duration_hours <= 744 {
        "Monthly Summary"
    } else {
        "Summary"
    }
}

fn render_header(
    source: &ArchiveSource,
    period: &PeriodInfo,
    statistics: &SummaryStatistics,
) -> String {
    let mut platform_info = format!(
        "**{}:** {}",
        source.source_type.server_label(),
        source.server_name
    );
    if matches!(source.source_type, SourceType::Discord | SourceType::Slack) {
        if let Some(channel) = &source.channel_name {
            platform_info.push_str(&format!("\n**Channel:** #{}", channel));
        }
    }

    let date_str = period.start.format("%Y-%m-%d (%A)").to_string();
    let time_range = format!(
        "{} — {}",
        period.start.format("%H:%M"),
        period.end.format("%H:%M")
    );

    let capitalized = {
        let name = source.source_type.as_str();
        let mut chars = name.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
            None => String::new(),
        }
    };

    [
        format!("# {}: {}", title_prefix(period), source.server_name),
        String::new(),
        format!("**Platform:** {}", capitalized),
        platform_info,
        format!("**Date:** {}", date_str),
        format!("**Timezone:** {}", period.timezone),
        format!("**Period:** {}", time_range),
        format!(
            "**Messages:** {} from {} participants",
            statistics.message_count, statistics.participant_count
        ),
    ]
    .join("\n")
}

fn render_footer(generation: &GenerationInfo) -> String {
    let timestamp = Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
    format!(
        "*Generated by Chronicle on {}*\n*Prompt version: {} ({})*\n*Model: {} | Cost: ${:.4}*",
        timestamp,
        generation.prompt_version,
        generation.prompt_checksum,
        generation.model,
        generation.cost_usd
    )
}

/// Expected Markdown path for a daily slot.
pub fn summary_path(
    archive_root: &Path,
    source: &ArchiveSource,
    date: chrono::NaiveDate,
) -> PathBuf {
    chronicle_core::layout::daily_md_path(archive_root, source, date)
}

/// Whether a daily summary Markdown already exists.
pub fn summary_exists(
    archive_root: &Path,
    source: &ArchiveSource,
    date: chrono::NaiveDate,
) -> bool {
    let exists = summary_path(archive_root, source, date).exists();
    debug!(date = %date, exists, "summary existence check");
    exists
}

#[cfg(test)]
mod tests {
    use super::*;
    use chronicle_core::TokenUsage;
    use chrono::NaiveDate;

    fn sample_generation() -> GenerationInfo {
        GenerationInfo {
            prompt_version: "1.0.0".to_string(),
            prompt_checksum: "sha256:abc".to_string(),
            model: "anthropic/claude-3-haiku".to_string(),
            options: serde_json::Value::Null,
            duration_seconds: 1.0,
            tokens_used: TokenUsage {
                input: 1000,
                output: 200,
            },
            cost_usd: 0.0005,
            pricing_version: "2026-02-01".to_string(),
            api_key_used: "default".to_string(),
            provider: "openrouter".to_string(),
        }
    }

    fn sample_stats() -> SummaryStatistics {
        SummaryStatistics {
            message_count: 10,
            participant_count: 3,
            word_count: 120,
            attachment_count: 0,
        }
    }

    fn daily(date: (i32, u32, u32)) -> PeriodInfo {
        PeriodInfo::daily(
            NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
            "UTC",
        )
        .unwrap()
    }

    #[test]
    fn write_summary_produces_matching_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let writer = SummaryWriter::new(dir.path());
        let source = ArchiveSource::new(SourceType::Discord, "123", "My Server");
        let period = daily((2026, 2, 11));

        let md_path = writer
            .write_summary(
                &source,
                &period,
                "The day in review.",
                sample_stats(),
                sample_generation(),
                false,
                None,
            )
            .unwrap();

        let content = std::fs::read_to_string(&md_path).unwrap();
        let meta = SidecarMetadata::load(&chronicle_core::layout::meta_path_for_md(&md_path)).unwrap();
        assert_eq!(meta.status, SummaryStatus::Complete);
        assert!(meta.summary_id.is_some());
        assert_eq!(
            meta.integrity.unwrap().content_checksum,
            content_checksum(&content)
        );
    }

    #[test]
    fn header_carries_platform_fields() {
        let dir = tempfile::tempdir().unwrap();
        let writer = SummaryWriter::new(dir.path());
        let source =
            ArchiveSource::new(SourceType::Slack, "T1", "Acme").with_channel("C1", "general");
        let period = daily((2026, 2, 11));

        let md_path = writer
            .write_summary(
                &source,
                &period,
                "body",
                sample_stats(),
                sample_generation(),
                false,
                None,
            )
            .unwrap();
        let content = std::fs::read_to_string(md_path).unwrap();
        assert!(content.contains("**Platform:** Slack"));
        assert!(content.contains("**Workspace:** Acme"));
        assert!(content.contains("**Channel:** #general"));
        assert!(content.contains("**Timezone:** UTC"));
        assert!(content.contains("**Messages:** 10 from 3 participants"));
    }

    #[test]
    fn incomplete_marker_writes_sidecar_only() {
        let dir = tempfile::tempdir().unwrap();
        let writer = SummaryWriter::new(dir.path());
        let source = ArchiveSource::new(SourceType::Discord, "123", "My Server");
        let period = daily((2026, 2, 10));

        let meta_path = writer
            .write_incomplete_marker(
                &source,
                &period,
                IncompleteReason::NoMessages,
                "No messages found in this period",
                None,
                false,
            )
            .unwrap();

        let meta = SidecarMetadata::load(&meta_path).unwrap();
        assert_eq!(meta.status, SummaryStatus::Incomplete);
        assert!(!meta.backfill_eligible);
        assert_eq!(
            meta.incomplete_reason.unwrap().code,
            IncompleteReason::NoMessages
        );
        // No companion Markdown for incomplete slots.
        let md = summary_path(
            dir.path(),
            &source,
            NaiveDate::from_ymd_opt(2026, 2, 10).unwrap(),
        );
        assert!(!md.exists());
    }

    #[test]
    fn incomplete_marker_never_downgrades_complete() {
        let dir = tempfile::tempdir().unwrap();
        let writer = SummaryWriter::new(dir.path());
        let source = ArchiveSource::new(SourceType::Discord, "123", "My Server");
        let period = daily((2026, 2, 12));

        writer
            .write_summary(
                &source,
                &period,
                "body",
                sample_stats(),
                sample_generation(),
                false,
                None,
            )
            .unwrap();
        let meta_path = writer
            .write_incomplete_marker(
                &source,
                &period,
                IncompleteReason::ApiError,
                "transient",
                None,
                true,
            )
            .unwrap();

        let meta = SidecarMetadata::load(&meta_path).unwrap();
        assert_eq!(meta.status, SummaryStatus::Complete);
    }
}
