//! The retrospective executor.
//!
//! A job is a finite ordered iteration over planned periods with
//! cooperative check-points between items: the loop observes cancel and
//! pause flags, enforces the cost cap before each period, and yields
//! briefly after each one. Per-period failures never fail the job; they
//! are counted and the loop moves on. Progress lives in the sidecars,
//! so resuming after a crash is a rerun with the same policy.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::{NaiveDate, Utc};
use dashmap::DashMap;
use serde_json::{json, Map};
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use chronicle_core::layout::{summary_md_path, summary_meta_path};
use chronicle_core::{
    ArchiveSource, CostEntry, GenerationInfo, Granularity, IncompleteReason, PeriodInfo,
    SidecarMetadata, SummaryStatistics, SummaryStatus, TokenUsage,
};
use chronicle_keys::{ApiKeyResolver, ServerKeyConfig};
use chronicle_ledger::{CostLedger, DEFAULT_AVG_TOKENS_PER_SUMMARY};
use chronicle_registry::SourceRegistry;
use chronicle_store::{LockManager, SummaryWriter};
use chronicle_sync::SyncService;

use crate::error::{EngineError, Result};
use crate::job::{CostProgress, GenerationJob, GenerationProgress, JobPolicy, JobStatus};
use crate::periods::expand_periods;
use crate::traits::{MessageFetcher, SummaryType, Summarizer};

/// Model assumed for dry-run estimates.
pub const DEFAULT_ESTIMATE_MODEL: &str = "anthropic/claude-3-haiku";

/// Callback invoked with a snapshot of the job after every period.
pub type ProgressCallback = Arc<dyn Fn(&GenerationJob) + Send + Sync>;

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub lock_ttl: StdDuration,
    /// Yield between periods; the loop sleeps this long after each one.
    pub period_delay: StdDuration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            lock_ttl: StdDuration::from_secs(300),
            period_delay: StdDuration::from_millis(250),
        }
    }
}

impl EngineOptions {
    pub fn from_config(config: &chronicle_core::ChronicleConfig) -> Self {
        Self {
            lock_ttl: StdDuration::from_secs(config.lock_ttl_seconds),
            period_delay: StdDuration::from_millis(config.period_delay_ms),
        }
    }
}

enum PeriodOutcome {
    Completed,
    Skipped,
    Failed,
    /// Source budget exhausted before the summarizer call.
    BudgetPaused,
}

pub struct RetrospectiveEngine {
    archive_root: PathBuf,
    registry: Arc<SourceRegistry>,
    ledger: Arc<Mutex<CostLedger>>,
    resolver: Arc<ApiKeyResolver>,
    summarizer: Arc<dyn Summarizer>,
    sync: Option<Arc<SyncService>>,
    lock_manager: LockManager,
    writer: SummaryWriter,
    options: EngineOptions,
    jobs: DashMap<String, Arc<Mutex<GenerationJob>>>,
}

impl RetrospectiveEngine {
    pub fn new(
        archive_root: impl Into<PathBuf>,
        registry: Arc<SourceRegistry>,
        ledger: Arc<Mutex<CostLedger>>,
        resolver: Arc<ApiKeyResolver>,
        summarizer: Arc<dyn Summarizer>,
        sync: Option<Arc<SyncService>>,
        options: EngineOptions,
    ) -> Self {
        let archive_root = archive_root.into();
        Self {
            registry,
            ledger,
            resolver,
            summarizer,
            sync,
            lock_manager: LockManager::new(options.lock_ttl, None),
            writer: SummaryWriter::new(&archive_root),
            options,
            archive_root,
            jobs: DashMap::new(),
        }
    }

    /// Plan a job over `[start, end]` and register it as `queued`.
    #[allow(clippy::too_many_arguments)]
    #[instrument(skip(self, source), fields(source = %source.source_key(), %granularity))]
    pub fn create_job(
        &self,
        source: ArchiveSource,
        start_date: NaiveDate,
        end_date: NaiveDate,
        granularity: Granularity,
        timezone: &str,
        policy: JobPolicy,
        max_cost_usd: Option<f64>,
        dry_run: bool,
        summary_type: SummaryType,
        perspective: &str,
    ) -> GenerationJob {
        let job_id = format!("job_{}", &Uuid::new_v4().simple().to_string()[..12]);
        let periods = expand_periods(start_date, end_date, granularity);

        let job = GenerationJob {
            job_id: job_id.clone(),
            source,
            start_date,
            end_date,
            granularity,
            timezone: timezone.to_string(),
            status: JobStatus::Queued,
            progress: GenerationProgress {
                total_periods: periods.len(),
                ..GenerationProgress::default()
            },
            cost: CostProgress {
                max_cost_usd,
                ..CostProgress::default()
            },
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            pause_reason: None,
            error: None,
            policy,
            dry_run,
            summary_type,
            perspective: perspective.to_string(),
        };

        info!(job_id = %job_id, periods = periods.len(), "created job");
        self.jobs
            .insert(job_id, Arc::new(Mutex::new(job.clone())));
        job
    }

    /// Drive a job to a terminal (or paused) state.
    #[instrument(skip(self, fetcher, on_progress))]
    pub async fn run_job(
        &self,
        job_id: &str,
        fetcher: Arc<dyn MessageFetcher>,
        on_progress: Option<ProgressCallback>,
    ) -> Result<GenerationJob> {
        let handle = self
            .jobs
            .get(job_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| EngineError::JobNotFound {
                id: job_id.to_string(),
            })?;

        let (periods, source, timezone, granularity) = {
            let mut job = handle.lock().unwrap();
            job.status = JobStatus::Running;
            job.started_at = Some(Utc::now());
            job.pause_reason = None;
            (
                expand_periods(job.start_date, job.end_date, job.granularity),
                job.source.clone(),
                job.timezone.clone(),
                job.granularity,
            )
        };

        for (period_start, period_end) in periods {
            // Cooperative check-point: cancellation and pause are only
            // observed between periods.
            {
                let mut job = handle.lock().unwrap();
                if matches!(job.status, JobStatus::Cancelled | JobStatus::Paused) {
                    break;
                }
                if let Some(max) = job.cost.max_cost_usd {
                    if job.cost.cost_usd >= max {
                        job.status = JobStatus::Paused;
                        job.pause_reason = Some("budget_exceeded".to_string());
                        warn!(job_id, "job paused: budget exceeded");
                        break;
                    }
                }
                job.progress.current_period = Some(period_start.to_string());
            }

            let outcome = self
                .generate_period(&handle, &source, &timezone, granularity, period_start, period_end, &fetcher)
                .await;

            let snapshot = {
                let mut job = handle.lock().unwrap();
                match outcome {
                    PeriodOutcome::Completed => job.progress.completed += 1,
                    PeriodOutcome::Skipped => job.progress.skipped += 1,
                    PeriodOutcome::Failed => job.progress.failed += 1,
                    PeriodOutcome::BudgetPaused => {
                        job.status = JobStatus::Paused;
                        job.pause_reason = Some("budget_exceeded".to_string());
                    }
                }
                job.clone()
            };
            // Callbacks run on a snapshot, outside the job mutex, so
            // they may call back into the engine (e.g. to cancel).
            if let Some(callback) = &on_progress {
                callback(&snapshot);
            }
            if snapshot.status == JobStatus::Paused {
                break;
            }

            if !self.options.period_delay.is_zero() {
                sleep(self.options.period_delay).await;
            }
        }

        let snapshot = {
            let mut job = handle.lock().unwrap();
            if job.status == JobStatus::Running {
                job.status = JobStatus::Completed;
                job.completed_at = Some(Utc::now());
            }
            job.progress.current_period = None;
            job.clone()
        };

        if snapshot.status == JobStatus::Completed {
            self.trigger_sync(&snapshot).await;
        }

        info!(job_id, status = %snapshot.status, "job finished");
        Ok(snapshot)
    }

    /// Post-completion mirror push. A sync failure never fails the job.
    async fn trigger_sync(&self, job: &GenerationJob) {
        let Some(sync) = &self.sync else {
            return;
        };

        let per_server = sync
            .server_binding(job.source.source_type, &job.source.server_id)
            .map(|binding| binding.enabled && binding.sync_on_generation);
        let wanted = per_server.unwrap_or_else(|| sync.is_enabled() && sync.sync_on_generation());
        if !wanted {
            return;
        }

        let source_path = job.source.server_dir(&self.archive_root);
        let result = sync
            .sync_source(&job.source_key(), &source_path, &job.source.server_name)
            .await;
        info!(
            job_id = %job.job_id,
            status = %result.status,
            files = result.files_synced,
            "post-run sync finished"
        );
    }

    #[allow(clippy::too_many_arguments)]
    async fn generate_period(
        &self,
        handle: &Arc<Mutex<GenerationJob>>,
        source: &ArchiveSource,
        timezone: &str,
        granularity: Granularity,
        period_start: NaiveDate,
        period_end: NaiveDate,
        fetcher: &Arc<dyn MessageFetcher>,
    ) -> PeriodOutcome {
        let (job_id, policy, dry_run, summary_type, perspective) = {
            let job = handle.lock().unwrap();
            (
                job.job_id.clone(),
                job.policy,
                job.dry_run,
                job.summary_type,
                job.perspective.clone(),
            )
        };

        let period = match build_period(granularity, period_start, period_end, timezone) {
            Ok(period) => period,
            Err(e) => {
                error!(job_id = %job_id, error = %e, "cannot build period");
                return PeriodOutcome::Failed;
            }
        };

        let md_path = summary_md_path(&self.archive_root, source, &period);
        let meta_path = summary_meta_path(&self.archive_root, source, &period);

        if policy.skip_existing && md_path.exists() {
            return PeriodOutcome::Skipped;
        }

        if !policy.regenerate_failed {
            if let Ok(existing) = SidecarMetadata::load(&meta_path) {
                if existing.status == SummaryStatus::Incomplete {
                    return PeriodOutcome::Skipped;
                }
            }
        }

        let lock = match self.lock_manager.acquire(&meta_path, Some(&job_id)) {
            Ok(lock) => lock,
            Err(e) => {
                error!(job_id = %job_id, error = %e, "lock acquisition failed");
                return PeriodOutcome::Failed;
            }
        };
        let holds_lock = lock.is_some();
        if !holds_lock && !policy.regenerate_outdated {
            return PeriodOutcome::Skipped;
        }

        if dry_run {
            // Estimate only. The lock goes back to pending so a real run
            // can still claim the slot and the complete-implies-markdown
            // invariant holds.
            let estimate = self.ledger.lock().unwrap().estimate_backfill_cost(
                1,
                DEFAULT_ESTIMATE_MODEL,
                DEFAULT_AVG_TOKENS_PER_SUMMARY,
            );
            handle.lock().unwrap().cost.cost_usd += estimate.estimated_cost_usd;
            if holds_lock {
                self.release_quietly(&meta_path, SummaryStatus::Pending, None);
            }
            return PeriodOutcome::Completed;
        }

        let (start_utc, end_utc) = match (period.start_utc(), period.end_utc()) {
            (Ok(start), Ok(end)) => (start, end),
            _ => {
                self.release_failed(&meta_path, IncompleteReason::PromptError, "bad timezone");
                return PeriodOutcome::Failed;
            }
        };

        let messages = match fetcher.fetch(source, start_utc, end_utc).await {
            Ok(messages) => messages,
            Err(e) => {
                warn!(job_id = %job_id, period = %period_start, error = %e, "fetch failed");
                self.release_failed(&meta_path, e.reason(), &e.to_string());
                return PeriodOutcome::Failed;
            }
        };

        if messages.is_empty() {
            // The slot is resolved, just not with a summary; it is not
            // retried by future backfills.
            if let Err(e) = self.writer.write_incomplete_marker(
                source,
                &period,
                IncompleteReason::NoMessages,
                "No messages found in this period",
                None,
                false,
            ) {
                error!(job_id = %job_id, error = %e, "failed to write incomplete marker");
                return PeriodOutcome::Failed;
            }
            return PeriodOutcome::Completed;
        }

        // Budget gate, checked before any tokens are spent.
        let source_key = source.source_key();
        let manifest = self.registry.get_manifest(&source_key);
        if let Some(manifest) = &manifest {
            if manifest.cost_tracking.enabled {
                let (within, current, _) = self
                    .ledger
                    .lock()
                    .unwrap()
                    .check_budget(&source_key, manifest.cost_tracking.budget_monthly_usd);
                if !within {
                    warn!(job_id = %job_id, current, "monthly budget exhausted");
                    if holds_lock {
                        self.release_quietly(&meta_path, SummaryStatus::Pending, None);
                    }
                    return PeriodOutcome::BudgetPaused;
                }
            }
        }

        let server_key_config = manifest.as_ref().map(|m| ServerKeyConfig {
            key_ref: m.api_keys.openrouter_key_ref.clone(),
            use_server_key: m.api_keys.use_server_key,
            fallback_to_default: m.api_keys.fallback_to_default,
        });
        let resolved = match self
            .resolver
            .get_key_for_source(&source_key, server_key_config.as_ref())
            .await
        {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "key resolution failed");
                self.release_failed(&meta_path, IncompleteReason::ApiError, &e.to_string());
                return PeriodOutcome::Failed;
            }
        };

        let started = std::time::Instant::now();
        let output = match self
            .summarizer
            .summarize(&messages, &resolved.key, summary_type, &perspective)
            .await
        {
            Ok(output) => output,
            Err(e) => {
                warn!(job_id = %job_id, period = %period_start, error = %e, "summarizer failed");
                self.release_failed(&meta_path, e.reason(), &e.to_string());
                return PeriodOutcome::Failed;
            }
        };
        let duration_seconds = started.elapsed().as_secs_f64();

        let summary_id = format!("sum_{}", &Uuid::new_v4().simple().to_string()[..12]);
        let (cost_usd, pricing_version) = {
            let mut ledger = self.ledger.lock().unwrap();
            let (cost_usd, pricing_version) = ledger.pricing().calculate_cost(
                &output.model,
                output.tokens_input,
                output.tokens_output,
                None,
            );
            // Tokens were spent: the ledger records them even if the
            // write below fails.
            let entry = CostEntry {
                source_key: source_key.clone(),
                summary_id: summary_id.clone(),
                timestamp: Utc::now(),
                model: output.model.clone(),
                tokens_input: output.tokens_input,
                tokens_output: output.tokens_output,
                cost_usd,
                pricing_version: pricing_version.clone(),
                api_key_source: resolved.source.as_str().to_string(),
            };
            if let Err(e) = ledger.record(&entry) {
                error!(job_id = %job_id, error = %e, "cost ledger write failed");
            }
            (cost_usd, pricing_version)
        };

        {
            let mut job = handle.lock().unwrap();
            job.cost.cost_usd += cost_usd;
            job.cost.tokens_input += output.tokens_input;
            job.cost.tokens_output += output.tokens_output;
        }

        let statistics = SummaryStatistics {
            message_count: messages.len() as u64,
            participant_count: messages
                .iter()
                .map(|m| m.author_id.as_str())
                .collect::<BTreeSet<_>>()
                .len() as u64,
            word_count: messages
                .iter()
                .map(|m| m.content.split_whitespace().count() as u64)
                .sum(),
            attachment_count: 0,
        };

        let generation = GenerationInfo {
            prompt_version: output.prompt_version.clone(),
            prompt_checksum: output.prompt_checksum.clone(),
            model: output.model.clone(),
            options: output.options.clone(),
            duration_seconds,
            tokens_used: TokenUsage {
                input: output.tokens_input,
                output: output.tokens_output,
            },
            cost_usd,
            pricing_version,
            api_key_used: resolved.api_key_used(),
            provider: "openrouter".to_string(),
        };

        if let Err(e) = self.writer.write_summary(
            source,
            &period,
            &output.content,
            statistics,
            generation,
            true,
            Some("historical_archive"),
        ) {
            error!(job_id = %job_id, error = %e, "summary write failed");
            self.release_failed(&meta_path, IncompleteReason::ApiError, &e.to_string());
            return PeriodOutcome::Failed;
        }

        self.release_quietly(&meta_path, SummaryStatus::Complete, None);
        PeriodOutcome::Completed
    }

    /// Release a lock into `incomplete`, stamping the reason so the
    /// sidecar stays self-describing.
    fn release_failed(&self, meta_path: &std::path::Path, reason: IncompleteReason, message: &str) {
        let mut extra = Map::new();
        extra.insert(
            "incomplete_reason".to_string(),
            json!({"code": reason.as_str(), "message": message, "details": null}),
        );
        extra.insert("backfill_eligible".to_string(), json!(true));
        self.release_quietly(meta_path, SummaryStatus::Incomplete, Some(extra));
    }

    fn release_quietly(
        &self,
        meta_path: &std::path::Path,
        status: SummaryStatus,
        extra: Option<Map<String, serde_json::Value>>,
    ) {
        if let Err(e) = self.lock_manager.release(meta_path, status, extra) {
            error!(path = %meta_path.display(), error = %e, "lock release failed");
        }
    }

    pub fn get_job(&self, job_id: &str) -> Option<GenerationJob> {
        self.jobs
            .get(job_id)
            .map(|entry| entry.value().lock().unwrap().clone())
    }

    pub fn list_jobs(&self, status: Option<JobStatus>) -> Vec<GenerationJob> {
        let mut jobs: Vec<GenerationJob> = self
            .jobs
            .iter()
            .map(|entry| entry.value().lock().unwrap().clone())
            .filter(|job| status.map_or(true, |s| job.status == s))
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        jobs
    }

    /// Request cancellation; the run loop observes it between periods.
    pub fn cancel_job(&self, job_id: &str) -> bool {
        let Some(entry) = self.jobs.get(job_id) else {
            return false;
        };
        let mut job = entry.value().lock().unwrap();
        if matches!(
            job.status,
            JobStatus::Running | JobStatus::Queued | JobStatus::Paused
        ) {
            job.status = JobStatus::Cancelled;
            info!(job_id, "cancelled job");
            return true;
        }
        false
    }

    pub fn pause_job(&self, job_id: &str, reason: &str) -> bool {
        let Some(entry) = self.jobs.get(job_id) else {
            return false;
        };
        let mut job = entry.value().lock().unwrap();
        if job.status == JobStatus::Running {
            job.status = JobStatus::Paused;
            job.pause_reason = Some(reason.to_string());
            info!(job_id, reason, "paused job");
            return true;
        }
        false
    }

    /// Raise or drop the job's cost cap (e.g. before resuming a job that
    /// paused on budget).
    pub fn set_max_cost(&self, job_id: &str, max_cost_usd: Option<f64>) -> bool {
        let Some(entry) = self.jobs.get(job_id) else {
            return false;
        };
        entry.value().lock().unwrap().cost.max_cost_usd = max_cost_usd;
        true
    }

    /// Resume a paused job: rerun the loop over the whole range. Slots
    /// already complete are skipped by policy, so this picks up where
    /// the pause left off even across process restarts.
    pub async fn resume_job(
        &self,
        job_id: &str,
        fetcher: Arc<dyn MessageFetcher>,
        on_progress: Option<ProgressCallback>,
    ) -> Result<GenerationJob> {
        {
            let entry = self
                .jobs
                .get(job_id)
                .ok_or_else(|| EngineError::JobNotFound {
                    id: job_id.to_string(),
                })?;
            let mut job = entry.value().lock().unwrap();
            if job.status != JobStatus::Paused {
                return Err(EngineError::NotResumable {
                    id: job_id.to_string(),
                });
            }
            job.pause_reason = None;
            job.status = JobStatus::Queued;
        }
        self.run_job(job_id, fetcher, on_progress).await
    }
}

fn build_period(
    granularity: Granularity,
    start: NaiveDate,
    end: NaiveDate,
    timezone: &str,
) -> chronicle_core::Result<PeriodInfo> {
    match granularity {
        Granularity::Daily => PeriodInfo::daily(start, timezone),
        Granularity::Weekly => PeriodInfo::weekly(start, end, timezone),
        Granularity::Monthly => PeriodInfo::monthly(start, end, timezone),
    }
}
