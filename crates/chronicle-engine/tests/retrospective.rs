//! End-to-end executor scenarios against a temporary archive root.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use chronicle_core::{ArchiveSource, Granularity, Message, SidecarMetadata, SummaryStatus};
use chronicle_engine::{
    CollaboratorError, EngineOptions, GenerationJob, JobPolicy, JobStatus, MessageFetcher,
    RetrospectiveEngine, SummaryOutput, SummaryType, Summarizer,
};
use chronicle_keys::{ApiKeyResolver, BackendConfig};
use chronicle_ledger::{CostLedger, PricingTable};
use chronicle_registry::SourceRegistry;

struct EmptyFetcher;

#[async_trait]
impl MessageFetcher for EmptyFetcher {
    async fn fetch(
        &self,
        _source: &ArchiveSource,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> Result<Vec<Message>, CollaboratorError> {
        Ok(Vec::new())
    }
}

struct FixedFetcher;

#[async_trait]
impl MessageFetcher for FixedFetcher {
    async fn fetch(
        &self,
        _source: &ArchiveSource,
        start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> Result<Vec<Message>, CollaboratorError> {
        Ok(vec![
            Message {
                id: "m1".to_string(),
                author_id: "u1".to_string(),
                author_name: "Alice".to_string(),
                content: "good morning everyone".to_string(),
                timestamp: start.to_rfc3339(),
                is_system: false,
            },
            Message {
                id: "m2".to_string(),
                author_id: "u2".to_string(),
                author_name: "Bob".to_string(),
                content: "morning".to_string(),
                timestamp: start.to_rfc3339(),
                is_system: false,
            },
        ])
    }
}

struct CountingSummarizer {
    calls: AtomicUsize,
    tokens_input: u64,
    tokens_output: u64,
    model: String,
}

impl CountingSummarizer {
    fn new(tokens_input: u64, tokens_output: u64, model: &str) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            tokens_input,
            tokens_output,
            model: model.to_string(),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Summarizer for CountingSummarizer {
    async fn summarize(
        &self,
        messages: &[Message],
        _api_key: &str,
        _summary_type: SummaryType,
        _perspective: &str,
    ) -> Result<SummaryOutput, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(SummaryOutput {
            content: format!("Discussion among {} messages.", messages.len()),
            tokens_input: self.tokens_input,
            tokens_output: self.tokens_output,
            model: self.model.clone(),
            prompt_version: "1.0.0".to_string(),
            prompt_checksum: "sha256:feedface".to_string(),
            options: serde_json::Value::Null,
        })
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    root: std::path::PathBuf,
    engine: Arc<RetrospectiveEngine>,
    ledger: Arc<Mutex<CostLedger>>,
    source: ArchiveSource,
}

fn harness(summarizer: Arc<dyn Summarizer>) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_path_buf();
    let registry = Arc::new(SourceRegistry::new(&root));
    let source = registry.register_discord("123", "My Server", None);
    let ledger = Arc::new(Mutex::new(CostLedger::new(
        root.join("cost-ledger.json"),
        PricingTable::static_fallback(),
    )));
    let resolver = Arc::new(ApiKeyResolver::new(
        Some("sk-or-test".to_string()),
        BackendConfig::default(),
    ));
    let engine = Arc::new(RetrospectiveEngine::new(
        &root,
        registry,
        ledger.clone(),
        resolver,
        summarizer,
        None,
        EngineOptions {
            lock_ttl: Duration::from_secs(300),
            period_delay: Duration::ZERO,
        },
    ));
    Harness {
        _dir: dir,
        root,
        engine,
        ledger,
        source,
    }
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn daily_job(h: &Harness, start: NaiveDate, end: NaiveDate, max_cost: Option<f64>) -> GenerationJob {
    h.engine.create_job(
        h.source.clone(),
        start,
        end,
        Granularity::Daily,
        "UTC",
        JobPolicy::default(),
        max_cost,
        false,
        SummaryType::Detailed,
        "general",
    )
}

fn sidecar_for(h: &Harness, d: NaiveDate) -> SidecarMetadata {
    let path = chronicle_core::layout::daily_meta_path(&h.root, &h.source, d);
    SidecarMetadata::load(&path).unwrap()
}

// Fetcher returning nothing: every slot resolves as NO_MESSAGES with a
// sidecar, no Markdown and an untouched ledger.
#[tokio::test]
async fn empty_periods_write_ineligible_markers() {
    let h = harness(CountingSummarizer::new(1000, 200, "anthropic/claude-3-haiku"));
    let job = daily_job(&h, date(2026, 2, 10), date(2026, 2, 12), None);

    let finished = h
        .engine
        .run_job(&job.job_id, Arc::new(EmptyFetcher), None)
        .await
        .unwrap();

    assert_eq!(finished.status, JobStatus::Completed);
    assert_eq!(finished.progress.completed, 3);
    assert_eq!(finished.progress.failed, 0);

    for day in 10..=12 {
        let meta = sidecar_for(&h, date(2026, 2, day));
        assert_eq!(meta.status, SummaryStatus::Incomplete);
        assert!(!meta.backfill_eligible);
        assert_eq!(
            meta.incomplete_reason.unwrap().code.as_str(),
            "NO_MESSAGES"
        );
        let md = chronicle_core::layout::daily_md_path(&h.root, &h.source, date(2026, 2, day));
        assert!(!md.exists());
    }

    let ledger = h.ledger.lock().unwrap();
    assert_eq!(ledger.total_summaries(), 0);
    assert_eq!(ledger.total_cost(), 0.0);
}

#[tokio::test]
async fn successful_run_writes_summaries_and_bills_them() {
    let summarizer = CountingSummarizer::new(1000, 200, "anthropic/claude-3-haiku");
    let h = harness(summarizer.clone());
    let job = daily_job(&h, date(2026, 2, 10), date(2026, 2, 11), None);

    let finished = h
        .engine
        .run_job(&job.job_id, Arc::new(FixedFetcher), None)
        .await
        .unwrap();

    assert_eq!(finished.status, JobStatus::Completed);
    assert_eq!(finished.progress.completed, 2);
    assert_eq!(summarizer.calls(), 2);

    let meta = sidecar_for(&h, date(2026, 2, 10));
    assert_eq!(meta.status, SummaryStatus::Complete);
    let generation = meta.generation.unwrap();
    assert!((generation.cost_usd - 0.0005).abs() < 1e-9);
    assert_eq!(generation.pricing_version, "2026-02-01");
    assert_eq!(generation.api_key_used, "default");
    let stats = meta.statistics.unwrap();
    assert_eq!(stats.message_count, 2);
    assert_eq!(stats.participant_count, 2);

    let ledger = h.ledger.lock().unwrap();
    assert_eq!(ledger.total_summaries(), 2);
    assert!((ledger.total_cost() - 0.001).abs() < 1e-6);
    let source_cost = ledger.get_source_cost("discord:123").unwrap();
    assert_eq!(source_cost.summary_count, 2);
}

// Cost cap: the loop pauses before entering the period that would
// overrun, and resume picks up the remaining periods.
#[tokio::test]
async fn budget_pause_and_resume() {
    // 100k in / 20k out on a sonnet-class model is $0.60 per period.
    let summarizer = CountingSummarizer::new(100_000, 20_000, "anthropic/claude-3.5-sonnet");
    let h = harness(summarizer.clone());
    let job = daily_job(&h, date(2026, 2, 10), date(2026, 2, 12), Some(1.0));

    let paused = h
        .engine
        .run_job(&job.job_id, Arc::new(FixedFetcher), None)
        .await
        .unwrap();

    assert_eq!(paused.status, JobStatus::Paused);
    assert_eq!(paused.pause_reason.as_deref(), Some("budget_exceeded"));
    assert_eq!(paused.progress.completed, 2);
    assert!((paused.cost.cost_usd - 1.2).abs() < 1e-6);
    // The third day was never attempted.
    let missing = chronicle_core::layout::daily_meta_path(&h.root, &h.source, date(2026, 2, 12));
    assert!(!missing.exists());

    assert!(h.engine.set_max_cost(&job.job_id, Some(5.0)));
    let resumed = h
        .engine
        .resume_job(&job.job_id, Arc::new(FixedFetcher), None)
        .await
        .unwrap();

    assert_eq!(resumed.status, JobStatus::Completed);
    // The first two days are already complete and skip; only day three
    // is generated on resume.
    assert_eq!(summarizer.calls(), 3);
    assert_eq!(resumed.progress.skipped, 2);
    assert_eq!(sidecar_for(&h, date(2026, 2, 12)).status, SummaryStatus::Complete);
}

// Rerunning a completed range with skip_existing and no regenerate
// flags performs zero summarizer calls and zero ledger writes.
#[tokio::test]
async fn completed_range_rerun_is_idempotent() {
    let summarizer = CountingSummarizer::new(1000, 200, "anthropic/claude-3-haiku");
    let h = harness(summarizer.clone());

    let first = daily_job(&h, date(2026, 2, 10), date(2026, 2, 11), None);
    h.engine
        .run_job(&first.job_id, Arc::new(FixedFetcher), None)
        .await
        .unwrap();
    assert_eq!(summarizer.calls(), 2);
    let billed = h.ledger.lock().unwrap().total_summaries();

    let rerun = h.engine.create_job(
        h.source.clone(),
        date(2026, 2, 10),
        date(2026, 2, 11),
        Granularity::Daily,
        "UTC",
        JobPolicy {
            skip_existing: true,
            regenerate_outdated: false,
            regenerate_failed: false,
        },
        None,
        false,
        SummaryType::Detailed,
        "general",
    );
    let finished = h
        .engine
        .run_job(&rerun.job_id, Arc::new(FixedFetcher), None)
        .await
        .unwrap();

    assert_eq!(finished.status, JobStatus::Completed);
    assert_eq!(finished.progress.skipped, 2);
    assert_eq!(finished.progress.completed, 0);
    assert_eq!(summarizer.calls(), 2);
    assert_eq!(h.ledger.lock().unwrap().total_summaries(), billed);
}

// With regenerate_failed off, incomplete slots are skipped without a
// lock attempt.
#[tokio::test]
async fn failed_slots_skip_when_regeneration_disabled() {
    let summarizer = CountingSummarizer::new(1000, 200, "anthropic/claude-3-haiku");
    let h = harness(summarizer.clone());

    let first = daily_job(&h, date(2026, 2, 10), date(2026, 2, 10), None);
    h.engine
        .run_job(&first.job_id, Arc::new(EmptyFetcher), None)
        .await
        .unwrap();
    assert_eq!(sidecar_for(&h, date(2026, 2, 10)).status, SummaryStatus::Incomplete);

    let rerun = h.engine.create_job(
        h.source.clone(),
        date(2026, 2, 10),
        date(2026, 2, 10),
        Granularity::Daily,
        "UTC",
        JobPolicy {
            skip_existing: true,
            regenerate_outdated: false,
            regenerate_failed: false,
        },
        None,
        false,
        SummaryType::Detailed,
        "general",
    );
    let finished = h
        .engine
        .run_job(&rerun.job_id, Arc::new(FixedFetcher), None)
        .await
        .unwrap();

    assert_eq!(finished.progress.skipped, 1);
    assert_eq!(summarizer.calls(), 0);
}

#[tokio::test]
async fn cancellation_is_observed_between_periods() {
    let summarizer = CountingSummarizer::new(1000, 200, "anthropic/claude-3-haiku");
    let h = harness(summarizer.clone());
    let job = daily_job(&h, date(2026, 2, 10), date(2026, 2, 14), None);

    let engine = h.engine.clone();
    let job_id = job.job_id.clone();
    let cancel_after_first: chronicle_engine::ProgressCallback = Arc::new(move |snapshot| {
        if snapshot.progress.completed == 1 {
            engine.cancel_job(&job_id);
        }
    });

    let finished = h
        .engine
        .run_job(&job.job_id, Arc::new(FixedFetcher), Some(cancel_after_first))
        .await
        .unwrap();

    assert_eq!(finished.status, JobStatus::Cancelled);
    assert_eq!(finished.progress.completed, 1);
    assert_eq!(summarizer.calls(), 1);
}

#[tokio::test]
async fn dry_run_estimates_without_writing() {
    let summarizer = CountingSummarizer::new(1000, 200, "anthropic/claude-3-haiku");
    let h = harness(summarizer.clone());
    let job = h.engine.create_job(
        h.source.clone(),
        date(2026, 2, 10),
        date(2026, 2, 12),
        Granularity::Daily,
        "UTC",
        JobPolicy::default(),
        None,
        true,
        SummaryType::Detailed,
        "general",
    );

    let finished = h
        .engine
        .run_job(&job.job_id, Arc::new(FixedFetcher), None)
        .await
        .unwrap();

    assert_eq!(finished.status, JobStatus::Completed);
    assert_eq!(finished.progress.completed, 3);
    assert!(finished.cost.cost_usd > 0.0);
    assert_eq!(summarizer.calls(), 0);
    assert_eq!(h.ledger.lock().unwrap().total_summaries(), 0);
    // No Markdown artifacts and no complete sidecars were produced; the
    // touched slots went back to pending. (Lock-only sidecars carry no
    // period yet, so they are read as raw JSON here.)
    for day in 10..=12 {
        let md = chronicle_core::layout::daily_md_path(&h.root, &h.source, date(2026, 2, day));
        assert!(!md.exists());
        let meta_path = chronicle_core::layout::daily_meta_path(&h.root, &h.source, date(2026, 2, day));
        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(meta_path).unwrap()).unwrap();
        assert_eq!(raw["status"], "pending");
    }
}

#[tokio::test]
async fn weekly_jobs_use_weekly_slot_names() {
    let summarizer = CountingSummarizer::new(1000, 200, "anthropic/claude-3-haiku");
    let h = harness(summarizer.clone());
    // Wednesday start: the first partial week ends on Sunday.
    let job = h.engine.create_job(
        h.source.clone(),
        date(2026, 2, 11),
        date(2026, 2, 22),
        Granularity::Weekly,
        "UTC",
        JobPolicy::default(),
        None,
        false,
        SummaryType::Detailed,
        "general",
    );
    assert_eq!(job.progress.total_periods, 2);

    let finished = h
        .engine
        .run_job(&job.job_id, Arc::new(FixedFetcher), None)
        .await
        .unwrap();
    assert_eq!(finished.progress.completed, 2);

    let week1 = h
        .source
        .summaries_dir(&h.root)
        .join("2026/02/2026-W07_weekly.md");
    let week2 = h
        .source
        .summaries_dir(&h.root)
        .join("2026/02/2026-W08_weekly.md");
    assert!(week1.exists());
    assert!(week2.exists());
}
