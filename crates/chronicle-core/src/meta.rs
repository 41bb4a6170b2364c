//! Sidecar metadata: the JSON companion that exists for every summary
//! slot that has ever been attempted.

use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::layout::atomic_write_json;
use crate::period::PeriodInfo;
use crate::types::ArchiveSource;

/// Status of a summary slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryStatus {
    Pending,
    Generating,
    Complete,
    Incomplete,
    Deleted,
}

impl SummaryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SummaryStatus::Pending => "pending",
            SummaryStatus::Generating => "generating",
            SummaryStatus::Complete => "complete",
            SummaryStatus::Incomplete => "incomplete",
            SummaryStatus::Deleted => "deleted",
        }
    }
}

impl fmt::Display for SummaryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SummaryStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SummaryStatus::Pending),
            "generating" => Ok(SummaryStatus::Generating),
            "complete" => Ok(SummaryStatus::Complete),
            "incomplete" => Ok(SummaryStatus::Incomplete),
            "deleted" => Ok(SummaryStatus::Deleted),
            other => Err(format!("unknown summary status: {}", other)),
        }
    }
}

/// Stable reason codes for slots that resolved without a summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncompleteReason {
    NoMessages,
    InsufficientMessages,
    ApiError,
    RateLimited,
    SourceInaccessible,
    PromptError,
    ExportUnavailable,
    BudgetExceeded,
}

impl IncompleteReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncompleteReason::NoMessages => "NO_MESSAGES",
            IncompleteReason::InsufficientMessages => "INSUFFICIENT_MESSAGES",
            IncompleteReason::ApiError => "API_ERROR",
            IncompleteReason::RateLimited => "RATE_LIMITED",
            IncompleteReason::SourceInaccessible => "SOURCE_INACCESSIBLE",
            IncompleteReason::PromptError => "PROMPT_ERROR",
            IncompleteReason::ExportUnavailable => "EXPORT_UNAVAILABLE",
            IncompleteReason::BudgetExceeded => "BUDGET_EXCEEDED",
        }
    }
}

impl fmt::Display for IncompleteReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why a slot is incomplete, plus free-form details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncompleteInfo {
    pub code: IncompleteReason,
    pub message: String,
    #[serde(default)]
    pub details: serde_json::Value,
}

/// Lease held by a worker while a slot is `generating`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationLock {
    pub job_id: String,
    pub acquired_at: DateTime<Utc>,
    pub acquired_by: String,
    pub expires_at: DateTime<Utc>,
}

impl GenerationLock {
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

/// Statistics about the messages a summary was produced from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SummaryStatistics {
    pub message_count: u64,
    pub participant_count: u64,
    #[serde(default)]
    pub word_count: u64,
    #[serde(default)]
    pub attachment_count: u64,
}

/// Input/output token counts for one generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
}

fn default_provider() -> String {
    "openrouter".to_string()
}

/// How a summary was produced: prompt, model, tokens and billing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationInfo {
    pub prompt_version: String,
    pub prompt_checksum: String,
    pub model: String,
    #[serde(default)]
    pub options: serde_json::Value,
    pub duration_seconds: f64,
    pub tokens_used: TokenUsage,
    pub cost_usd: f64,
    pub pricing_version: String,
    /// `"server:{source_key}"` or `"default"`.
    pub api_key_used: String,
    #[serde(default = "default_provider")]
    pub provider: String,
}

impl GenerationInfo {
    pub fn tokens_total(&self) -> u64 {
        self.tokens_used.input + self.tokens_used.output
    }
}

/// Backfill provenance for retroactively generated slots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackfillInfo {
    pub is_backfill: bool,
    #[serde(default)]
    pub original_generation_failed: bool,
    #[serde(default)]
    pub backfilled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Markdown integrity record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityInfo {
    /// `sha256:` plus the first 16 hex digits of the Markdown's SHA-256.
    pub content_checksum: String,
    #[serde(default)]
    pub references_validated: bool,
}

fn default_true() -> bool {
    true
}

/// The `.meta.json` companion document for one (source, period) slot.
///
/// Invariants:
/// - `status = generating` ⇒ `lock` present and unexpired;
/// - `status = complete` ⇒ `generation` and `summary_id` present;
/// - `status = incomplete` ⇒ `incomplete_reason` present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SidecarMetadata {
    #[serde(default)]
    pub summary_id: Option<String>,
    #[serde(default)]
    pub generated_at: Option<DateTime<Utc>>,
    pub period: PeriodInfo,
    pub source: ArchiveSource,
    pub status: SummaryStatus,
    #[serde(default = "default_true")]
    pub backfill_eligible: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statistics: Option<SummaryStatistics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<GenerationInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backfill: Option<BackfillInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incomplete_reason: Option<IncompleteInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock: Option<GenerationLock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity: Option<IntegrityInfo>,
    /// Set while the artifact sits in the `.deleted/` quarantine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl SidecarMetadata {
    pub fn save(&self, path: &Path) -> Result<()> {
        atomic_write_json(path, self)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }
}

/// One billed generation, as recorded against the cost ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostEntry {
    pub source_key: String,
    pub summary_id: String,
    pub timestamp: DateTime<Utc>,
    pub model: String,
    pub tokens_input: u64,
    pub tokens_output: u64,
    pub cost_usd: f64,
    pub pricing_version: String,
    /// `"server"` or `"default"`.
    #[serde(default = "default_api_key_source")]
    pub api_key_source: String,
}

fn default_api_key_source() -> String {
    "default".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SourceType;
    use chrono::NaiveDate;

    fn sample_metadata() -> SidecarMetadata {
        let period = PeriodInfo::daily(
            NaiveDate::from_ymd_opt(2026, 2, 11).unwrap(),
            "America/New_York",
        )
        .unwrap();
        SidecarMetadata {
            summary_id: Some("sum_0011aabbccdd".to_string()),
            generated_at: Some(Utc::now()),
            period,
            source: ArchiveSource::new(SourceType::Discord, "123", "My Server"),
            status: SummaryStatus::Complete,
            backfill_eligible: true,
            statistics: Some(SummaryStatistics {
                message_count: 42,
                participant_count: 7,
                word_count: 900,
                attachment_count: 1,
            }),
            generation: Some(GenerationInfo {
                prompt_version: "1.1.0".to_string(),
                prompt_checksum: "sha256:deadbeefdeadbeef".to_string(),
                model: "anthropic/claude-3-haiku".to_string(),
                options: serde_json::json!({"temperature": 0.2}),
                duration_seconds: 3.5,
                tokens_used: TokenUsage {
                    input: 1000,
                    output: 200,
                },
                cost_usd: 0.0005,
                pricing_version: "2026-02-01".to_string(),
                api_key_used: "default".to_string(),
                provider: "openrouter".to_string(),
            }),
            backfill: Some(BackfillInfo {
                is_backfill: true,
                original_generation_failed: false,
                backfilled_at: Some(Utc::now()),
                reason: Some("historical_archive".to_string()),
            }),
            incomplete_reason: None,
            lock: None,
            integrity: Some(IntegrityInfo {
                content_checksum: "sha256:0123456789abcdef".to_string(),
                references_validated: false,
            }),
            deleted_at: None,
        }
    }

    #[test]
    fn sidecar_round_trips_through_json() {
        let meta = sample_metadata();
        let json = serde_json::to_string_pretty(&meta).unwrap();
        let back: SidecarMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back, meta);
    }

    #[test]
    fn incomplete_reason_codes_are_stable() {
        assert_eq!(IncompleteReason::NoMessages.as_str(), "NO_MESSAGES");
        let json = serde_json::to_string(&IncompleteReason::RateLimited).unwrap();
        assert_eq!(json, "\"RATE_LIMITED\"");
    }

    #[test]
    fn tokens_nest_under_tokens_used() {
        let meta = sample_metadata();
        let value = serde_json::to_value(&meta).unwrap();
        assert_eq!(value["generation"]["tokens_used"]["input"], 1000);
        assert_eq!(value["generation"]["tokens_used"]["output"], 200);
    }

    #[test]
    fn backfill_eligible_defaults_to_true() {
        let mut value = serde_json::to_value(sample_metadata()).unwrap();
        value.as_object_mut().unwrap().remove("backfill_eligible");
        let back: SidecarMetadata = serde_json::from_value(value).unwrap();
        assert!(back.backfill_eligible);
    }

    #[test]
    fn cost_entry_round_trips_through_json() {
        let entry = CostEntry {
            source_key: "discord:123".to_string(),
            summary_id: "sum_aa".to_string(),
            timestamp: Utc::now(),
            model: "anthropic/claude-3-haiku".to_string(),
            tokens_input: 1000,
            tokens_output: 200,
            cost_usd: 0.0005,
            pricing_version: "2026-02-01".to_string(),
            api_key_source: "server".to_string(),
        };
        let json = serde_json::to_string(&entry).unwrap();
        let back: CostEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
    }
}
