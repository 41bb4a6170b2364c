//! Generation jobs: transient, executor-local records of one
//! retrospective run.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use chronicle_core::{ArchiveSource, Granularity};

use crate::traits::SummaryType;

/// Lifecycle state of a generation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
    Paused,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Paused => "paused",
        };
        write!(f, "{s}")
    }
}

/// Rolling per-period counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationProgress {
    pub total_periods: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub current_period: Option<String>,
}

impl GenerationProgress {
    pub fn percent_complete(&self) -> f64 {
        if self.total_periods == 0 {
            return 100.0;
        }
        (self.completed + self.failed + self.skipped) as f64 / self.total_periods as f64 * 100.0
    }
}

/// Rolling cost counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CostProgress {
    pub cost_usd: f64,
    pub tokens_input: u64,
    pub tokens_output: u64,
    pub max_cost_usd: Option<f64>,
}

impl CostProgress {
    pub fn percent_of_max(&self) -> Option<f64> {
        match self.max_cost_usd {
            Some(max) if max > 0.0 => Some(self.cost_usd / max * 100.0),
            _ => None,
        }
    }
}

/// Skip/regenerate policy for one run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct JobPolicy {
    /// Skip slots whose Markdown already exists.
    pub skip_existing: bool,
    /// Proceed into slots whose lock was refused (i.e. regenerate
    /// complete summaries, typically after a prompt bump).
    pub regenerate_outdated: bool,
    /// Re-attempt slots previously marked incomplete.
    pub regenerate_failed: bool,
}

impl Default for JobPolicy {
    fn default() -> Self {
        Self {
            skip_existing: true,
            regenerate_outdated: false,
            regenerate_failed: true,
        }
    }
}

/// One retrospective generation job.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationJob {
    pub job_id: String,
    pub source: ArchiveSource,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub granularity: Granularity,
    pub timezone: String,
    pub status: JobStatus,
    pub progress: GenerationProgress,
    pub cost: CostProgress,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub pause_reason: Option<String>,
    pub error: Option<String>,
    pub policy: JobPolicy,
    pub dry_run: bool,
    pub summary_type: SummaryType,
    pub perspective: String,
}

impl GenerationJob {
    pub fn source_key(&self) -> String {
        self.source.source_key()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_complete_counts_all_outcomes() {
        let progress = GenerationProgress {
            total_periods: 10,
            completed: 3,
            failed: 1,
            skipped: 1,
            current_period: None,
        };
        assert!((progress.percent_complete() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn empty_job_is_fully_complete() {
        assert_eq!(GenerationProgress::default().percent_complete(), 100.0);
    }

    #[test]
    fn percent_of_max_requires_a_cap() {
        let mut cost = CostProgress {
            cost_usd: 0.5,
            ..CostProgress::default()
        };
        assert_eq!(cost.percent_of_max(), None);
        cost.max_cost_usd = Some(2.0);
        assert!((cost.percent_of_max().unwrap() - 25.0).abs() < 1e-9);
    }
}
