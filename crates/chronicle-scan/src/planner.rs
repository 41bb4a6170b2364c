//! Backfill planning: pure analysis of what a backfill run would cover
//! and roughly cost. No side effects; safe to call repeatedly.

use chrono::NaiveDate;
use serde::Serialize;

use chronicle_core::ArchiveSource;
use chronicle_ledger::{CostLedger, DEFAULT_AVG_TOKENS_PER_SUMMARY};

use crate::scanner::ArchiveScanner;
use crate::types::{OutdatedThreshold, ScanResult};

/// Report of backfill potential for a source.
#[derive(Debug, Clone, Serialize)]
pub struct BackfillReport {
    pub source: ArchiveSource,
    pub scan: ScanResult,
    pub backfill_dates: Vec<NaiveDate>,
    pub estimated_cost_usd: f64,
    pub estimated_tokens: u64,
}

impl BackfillReport {
    pub fn period_count(&self) -> usize {
        self.backfill_dates.len()
    }
}

pub struct BackfillPlanner {
    scanner: ArchiveScanner,
}

impl BackfillPlanner {
    pub fn new(scanner: ArchiveScanner) -> Self {
        Self { scanner }
    }

    /// Analyze backfill potential: scan, collect candidate dates from
    /// gaps (plus outdated entries when requested), clamp to the range,
    /// and price the lot with the ledger's table.
    #[allow(clippy::too_many_arguments)]
    pub fn analyze_backfill(
        &self,
        ledger: &CostLedger,
        source: &ArchiveSource,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
        include_outdated: bool,
        current_prompt_version: Option<&str>,
        model: &str,
    ) -> BackfillReport {
        let scan = self.scanner.scan_source(
            source,
            start_date,
            end_date,
            if include_outdated {
                current_prompt_version
            } else {
                None
            },
            OutdatedThreshold::default(),
        );

        let mut dates =
            self.scanner
                .backfill_candidates(source, include_outdated, current_prompt_version);
        if let Some(start) = start_date {
            dates.retain(|d| *d >= start);
        }
        if let Some(end) = end_date {
            dates.retain(|d| *d <= end);
        }

        let estimate =
            ledger.estimate_backfill_cost(dates.len(), model, DEFAULT_AVG_TOKENS_PER_SUMMARY);

        BackfillReport {
            source: source.clone(),
            scan,
            estimated_cost_usd: estimate.estimated_cost_usd,
            estimated_tokens: estimate.avg_tokens_per_summary * dates.len() as u64,
            backfill_dates: dates,
        }
    }
}
