//! Per-source cost ledger.
//!
//! The ledger is a single JSON document holding per-source monthly
//! buckets. It is monotonic in time and never decremented by deletion.
//! The whole document is rewritten atomically after every `record`; only
//! one executor per archive root may write it.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument};

use chronicle_core::layout::atomic_write_json;
use chronicle_core::CostEntry;

use crate::error::Result;
use crate::pricing::{round_to, PricingTable};

/// Average tokens assumed per summary when estimating a backfill.
pub const DEFAULT_AVG_TOKENS_PER_SUMMARY: u64 = 5000;

/// Monthly cost aggregation for a source.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MonthlyCost {
    pub cost_usd: f64,
    pub summaries: u64,
    pub tokens_input: u64,
    pub tokens_output: u64,
    #[serde(default = "default_key_source")]
    pub api_key_source: String,
}

fn default_key_source() -> String {
    "default".to_string()
}

/// Cost aggregate for a single source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceCost {
    #[serde(default)]
    pub server_name: String,
    #[serde(default)]
    pub total_cost_usd: f64,
    #[serde(default)]
    pub summary_count: u64,
    #[serde(default = "default_key_source")]
    pub api_key_source: String,
    #[serde(default)]
    pub api_key_ref: Option<String>,
    #[serde(default)]
    pub monthly: BTreeMap<String, MonthlyCost>,
    pub last_updated: DateTime<Utc>,
}

/// Estimated cost of a backfill run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostEstimate {
    pub periods: usize,
    pub estimated_cost_usd: f64,
    pub avg_tokens_per_summary: u64,
    pub model: String,
    pub pricing_version: String,
}

/// Current-month roll-up across all sources.
#[derive(Debug, Clone, Serialize)]
pub struct CostReport {
    pub period: String,
    pub total_cost_usd: f64,
    pub total_summaries: u64,
    pub sources: Vec<CostReportSource>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CostReportSource {
    pub source_key: String,
    pub server_name: String,
    pub total_cost_usd: f64,
    pub summary_count: u64,
    pub current_month: MonthlyCost,
    pub api_key_source: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct LedgerDocument {
    schema_version: String,
    currency: String,
    total_cost_usd: f64,
    total_summaries: u64,
    sources: BTreeMap<String, SourceCost>,
}

/// Tracks and attributes generation costs per source.
pub struct CostLedger {
    ledger_path: PathBuf,
    pricing: PricingTable,
    sources: BTreeMap<String, SourceCost>,
    total_cost: f64,
    total_summaries: u64,
}

impl CostLedger {
    pub fn new(ledger_path: impl Into<PathBuf>, pricing: PricingTable) -> Self {
        let mut ledger = Self {
            ledger_path: ledger_path.into(),
            pricing,
            sources: BTreeMap::new(),
            total_cost: 0.0,
            total_summaries: 0,
        };
        ledger.load();
        ledger
    }

    pub fn pricing(&self) -> &PricingTable {
        &self.pricing
    }

    pub fn pricing_mut(&mut self) -> &mut PricingTable {
        &mut self.pricing
    }

    fn load(&mut self) {
        if !self.ledger_path.exists() {
            return;
        }
        match std::fs::read_to_string(&self.ledger_path)
            .map_err(|e| e.to_string())
            .and_then(|data| serde_json::from_str::<LedgerDocument>(&data).map_err(|e| e.to_string()))
        {
            Ok(doc) => {
                self.total_cost = doc.total_cost_usd;
                self.total_summaries = doc.total_summaries;
                self.sources = doc.sources;
                info!(
                    sources = self.sources.len(),
                    total_usd = self.total_cost,
                    "loaded cost ledger"
                );
            }
            Err(e) => {
                error!(path = %self.ledger_path.display(), error = %e, "failed to load cost ledger");
            }
        }
    }

    fn save(&self) -> Result<()> {
        let mut sources = self.sources.clone();
        for source in sources.values_mut() {
            source.total_cost_usd = round_to(source.total_cost_usd, 4);
            for monthly in source.monthly.values_mut() {
                monthly.cost_usd = round_to(monthly.cost_usd, 4);
            }
        }
        let doc = LedgerDocument {
            schema_version: "1.0.0".to_string(),
            currency: "USD".to_string(),
            total_cost_usd: round_to(self.total_cost, 4),
            total_summaries: self.total_summaries,
            sources,
        };
        atomic_write_json(&self.ledger_path, &doc)?;
        Ok(())
    }

    /// Record one billed generation and persist the whole ledger.
    ///
    /// Callers must not double-record: the ledger has no idempotence key.
    #[instrument(skip(self, entry), fields(source = %entry.source_key, cost = entry.cost_usd))]
    pub fn record(&mut self, entry: &CostEntry) -> Result<()> {
        let source = self
            .sources
            .entry(entry.source_key.clone())
            .or_insert_with(|| SourceCost {
                server_name: String::new(),
                total_cost_usd: 0.0,
                summary_count: 0,
                api_key_source: entry.api_key_source.clone(),
                api_key_ref: None,
                monthly: BTreeMap::new(),
                last_updated: Utc::now(),
            });

        let month_key = entry.timestamp.format("%Y-%m").to_string();
        let monthly = source
            .monthly
            .entry(month_key)
            .or_insert_with(|| MonthlyCost {
                api_key_source: entry.api_key_source.clone(),
                ..MonthlyCost::default()
            });

        source.total_cost_usd += entry.cost_usd;
        source.summary_count += 1;
        source.last_updated = Utc::now();

        monthly.cost_usd += entry.cost_usd;
        monthly.summaries += 1;
        monthly.tokens_input += entry.tokens_input;
        monthly.tokens_output += entry.tokens_output;

        self.total_cost += entry.cost_usd;
        self.total_summaries += 1;

        self.save()?;
        debug!("recorded cost entry");
        Ok(())
    }

    pub fn get_source_cost(&self, source_key: &str) -> Option<&SourceCost> {
        self.sources.get(source_key)
    }

    pub fn get_monthly_cost(&self, source_key: &str, year: i32, month: u32) -> Option<&MonthlyCost> {
        self.sources
            .get(source_key)?
            .monthly
            .get(&format!("{:04}-{:02}", year, month))
    }

    pub fn total_cost(&self) -> f64 {
        self.total_cost
    }

    pub fn total_summaries(&self) -> u64 {
        self.total_summaries
    }

    /// Current month's spend for a source, zero when unseen.
    pub fn current_month_cost(&self, source_key: &str) -> f64 {
        let now = Utc::now();
        self.get_monthly_cost(source_key, now.year(), now.month())
            .map(|m| m.cost_usd)
            .unwrap_or(0.0)
    }

    /// Upper-bound estimate for backfilling `periods` summaries,
    /// assuming an 80/20 input/output token split.
    pub fn estimate_backfill_cost(
        &self,
        periods: usize,
        model: &str,
        avg_tokens_per_summary: u64,
    ) -> CostEstimate {
        let input_tokens = (avg_tokens_per_summary as f64 * 0.8) as u64;
        let output_tokens = (avg_tokens_per_summary as f64 * 0.2) as u64;
        let (per_summary, pricing_version) =
            self.pricing
                .calculate_cost(model, input_tokens, output_tokens, None);
        CostEstimate {
            periods,
            estimated_cost_usd: round_to(per_summary * periods as f64, 4),
            avg_tokens_per_summary,
            model: model.to_string(),
            pricing_version,
        }
    }

    /// `(within_budget, current_month_cost, remaining)`. A missing budget
    /// means unlimited.
    pub fn check_budget(
        &self,
        source_key: &str,
        budget_monthly_usd: Option<f64>,
    ) -> (bool, f64, f64) {
        let Some(budget) = budget_monthly_usd else {
            return (true, 0.0, f64::INFINITY);
        };
        let current = self.current_month_cost(source_key);
        (current < budget, current, (budget - current).max(0.0))
    }

    /// Roll up the current month across all sources.
    pub fn cost_report(&self) -> CostReport {
        let month_key = Utc::now().format("%Y-%m").to_string();
        let sources = self
            .sources
            .iter()
            .map(|(key, source)| CostReportSource {
                source_key: key.clone(),
                server_name: source.server_name.clone(),
                total_cost_usd: round_to(source.total_cost_usd, 4),
                summary_count: source.summary_count,
                current_month: source.monthly.get(&month_key).cloned().unwrap_or_default(),
                api_key_source: source.api_key_source.clone(),
            })
            .collect();
        CostReport {
            period: month_key,
            total_cost_usd: round_to(self.total_cost, 4),
            total_summaries: self.total_summaries,
            sources,
        }
    }
}
