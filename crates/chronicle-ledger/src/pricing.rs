//! Versioned model pricing.
//!
//! Pricing is an immutable dated timeline: each entry maps
//! `effective_from` to per-1k-token rates per model. Lookups pick the
//! latest entry at or before the query time. A refresh never mutates a
//! past entry; it appends one stamped with today's date.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use chronicle_core::layout::atomic_write_json;

use crate::error::Result;

const OPENROUTER_MODELS_URL: &str = "https://openrouter.ai/api/v1/models";

/// Rates in USD per 1 000 tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelRate {
    pub input: f64,
    pub output: f64,
}

/// Default rate used when a model has no entry.
pub const DEFAULT_RATE: ModelRate = ModelRate {
    input: 0.003,
    output: 0.015,
};

#[derive(Debug, Serialize, Deserialize)]
struct PricingDocument {
    schema_version: String,
    pricing_source: String,
    versions: Vec<PricingVersion>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PricingVersion {
    effective_from: String,
    models: HashMap<String, ModelRate>,
}

pub struct PricingTable {
    path: Option<PathBuf>,
    /// effective_from date string → model → rate. BTreeMap keeps the
    /// timeline ordered so lookups can walk newest → oldest.
    versions: BTreeMap<String, HashMap<String, ModelRate>>,
}

impl PricingTable {
    /// Load from a persisted pricing history, falling back to the static
    /// table when the file is absent.
    pub fn new(pricing_path: Option<PathBuf>) -> Self {
        let mut table = Self {
            path: pricing_path,
            versions: BTreeMap::new(),
        };
        table.load();
        table
    }

    /// Static fallback only (tests, fresh installs).
    pub fn static_fallback() -> Self {
        let mut table = Self {
            path: None,
            versions: BTreeMap::new(),
        };
        table.versions = static_pricing();
        table
    }

    fn load(&mut self) {
        if let Some(path) = &self.path {
            if path.exists() {
                match std::fs::read_to_string(path)
                    .map_err(err_string)
                    .and_then(|data| {
                        serde_json::from_str::<PricingDocument>(&data).map_err(err_string)
                    })
                {
                    Ok(doc) => {
                        for version in doc.versions {
                            self.versions.insert(version.effective_from, version.models);
                        }
                        return;
                    }
                    Err(e) => {
                        error!(path = %path.display(), error = %e, "failed to load pricing history");
                    }
                }
            }
        }
        self.versions = static_pricing();
    }

    /// Rates for `model` at `timestamp` plus the pricing version used.
    ///
    /// Walks entries newest → oldest for the first `effective_from ≤ t`;
    /// with none applicable the earliest entry is used. A dated model id
    /// falls back to its base id; an unknown model warns and gets
    /// [`DEFAULT_RATE`].
    pub fn get_pricing(&self, model: &str, timestamp: Option<DateTime<Utc>>) -> (ModelRate, String) {
        let at = timestamp.unwrap_or_else(Utc::now).date_naive();

        let mut applicable: Option<(&String, &HashMap<String, ModelRate>)> = None;
        for (date_str, models) in self.versions.iter().rev() {
            if let Ok(date) = NaiveDate::parse_from_str(date_str, "%Y-%m-%d") {
                if date <= at {
                    applicable = Some((date_str, models));
                    break;
                }
            }
        }
        let (version, models) = match applicable.or_else(|| self.versions.iter().next()) {
            Some(pair) => pair,
            None => {
                warn!(model, "empty pricing table, using default rate");
                return (DEFAULT_RATE, "unknown".to_string());
            }
        };

        if let Some(rate) = models.get(model) {
            return (*rate, version.clone());
        }

        // A date-suffixed id (e.g. "...-20250514") falls back to its base.
        if model.contains("-2") {
            if let Some((base, _)) = model.rsplit_once('-') {
                if let Some(rate) = models.get(base) {
                    return (*rate, version.clone());
                }
            }
        }

        warn!(model, "no pricing found for model, using default");
        (DEFAULT_RATE, version.clone())
    }

    /// Cost in USD (rounded to 6 decimals) for the given token counts,
    /// plus the pricing version applied.
    pub fn calculate_cost(
        &self,
        model: &str,
        tokens_input: u64,
        tokens_output: u64,
        timestamp: Option<DateTime<Utc>>,
    ) -> (f64, String) {
        let (rate, version) = self.get_pricing(model, timestamp);
        let cost =
            (tokens_input as f64 / 1000.0) * rate.input + (tokens_output as f64 / 1000.0) * rate.output;
        (round_to(cost, 6), version)
    }

    /// Fetch the current OpenRouter model catalog, derive per-1k rates,
    /// append a new entry stamped with today's date and persist.
    pub async fn fetch_openrouter_pricing(&mut self, api_key: &str) -> Result<bool> {
        #[derive(Deserialize)]
        struct Catalog {
            #[serde(default)]
            data: Vec<CatalogModel>,
        }
        #[derive(Deserialize)]
        struct CatalogModel {
            id: Option<String>,
            pricing: Option<CatalogPricing>,
        }
        #[derive(Deserialize)]
        struct CatalogPricing {
            #[serde(default)]
            prompt: String,
            #[serde(default)]
            completion: String,
        }

        let client = reqwest::Client::new();
        let resp = client
            .get(OPENROUTER_MODELS_URL)
            .bearer_auth(api_key)
            .timeout(std::time::Duration::from_secs(10))
            .send()
            .await?;

        if !resp.status().is_success() {
            warn!(status = %resp.status(), "failed to fetch OpenRouter pricing");
            return Ok(false);
        }

        let catalog: Catalog = resp.json().await?;
        let mut models = HashMap::new();
        for model in catalog.data {
            let (Some(id), Some(pricing)) = (model.id, model.pricing) else {
                continue;
            };
            let (Ok(prompt), Ok(completion)) =
                (pricing.prompt.parse::<f64>(), pricing.completion.parse::<f64>())
            else {
                continue;
            };
            // OpenRouter quotes per-token prices; the table stores per-1k.
            models.insert(
                id,
                ModelRate {
                    input: prompt * 1000.0,
                    output: completion * 1000.0,
                },
            );
        }

        if models.is_empty() {
            return Ok(false);
        }

        let today = Utc::now().format("%Y-%m-%d").to_string();
        let count = models.len();
        self.versions.insert(today, models);
        self.save()?;
        info!(models = count, "updated pricing from OpenRouter");
        Ok(true)
    }

    fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let doc = PricingDocument {
            schema_version: "1.0.0".to_string(),
            pricing_source: "openrouter".to_string(),
            versions: self
                .versions
                .iter()
                .map(|(date, models)| PricingVersion {
                    effective_from: date.clone(),
                    models: models.clone(),
                })
                .collect(),
        };
        atomic_write_json(path, &doc)?;
        Ok(())
    }
}

fn err_string<E: std::fmt::Display>(e: E) -> String {
    e.to_string()
}

pub(crate) fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

/// Static fallback pricing (updated 2026-02).
fn static_pricing() -> BTreeMap<String, HashMap<String, ModelRate>> {
    let rates = [
        ("anthropic/claude-sonnet-4-20250514", 0.003, 0.015),
        ("anthropic/claude-haiku-4-20250514", 0.00025, 0.00125),
        ("anthropic/claude-3-haiku", 0.00025, 0.00125),
        ("anthropic/claude-3.5-sonnet", 0.003, 0.015),
        ("anthropic/claude-sonnet-4.5", 0.003, 0.015),
        ("anthropic/claude-opus-4", 0.015, 0.075),
        ("openai/gpt-4-turbo", 0.01, 0.03),
    ];
    let models = rates
        .into_iter()
        .map(|(id, input, output)| (id.to_string(), ModelRate { input, output }))
        .collect();
    BTreeMap::from([("2026-02-01".to_string(), models)])
}
