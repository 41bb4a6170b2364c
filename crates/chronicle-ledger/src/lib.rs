//! Cost accounting: versioned model pricing and the per-source ledger.

pub mod error;
pub mod ledger;
pub mod pricing;

pub use error::{LedgerError, Result};
pub use ledger::{
    CostEstimate, CostLedger, CostReport, CostReportSource, MonthlyCost, SourceCost,
    DEFAULT_AVG_TOKENS_PER_SUMMARY,
};
pub use pricing::{ModelRate, PricingTable, DEFAULT_RATE};
