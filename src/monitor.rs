//! Check pipeline orchestration.
//!
//! One call to [`Monitor::run_check`] is one run:
//!
//! ```text
//! lock → load active set → fetch inventory → diff → commit → notify → cleanup
//! ```
//!
//! The run stops at the first fatal stage. Whatever was committed before the
//! failure stays committed; the next run diffs against it. Fatal failures
//! are logged with the run id and stage, reported through the error alert
//! (best effort), and returned to the caller. Cleanup failures are logged
//! only, since detection and alerting have already finished by then.
//!
//! In baseline mode (`--first-run`, or automatically before the first
//! successful run) the diff is committed as usual but no alert is sent.

use anyhow::Result;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::audit::AuditLog;
use crate::client::ApiClient;
use crate::config::Config;
use crate::db;
use crate::diff::diff;
use crate::error::{PipelineError, Stage};
use crate::fetcher::{AccountSource, InventoryApi, InventoryFetcher};
use crate::migrate;
use crate::models::{CheckRun, RunMode, RunRecord, RunSummary};
use crate::notifier::{Notifier, SlackSink};
use crate::store::{LockOutcome, SqliteStore, StateStore};
use crate::writer::PersistenceWriter;

const LOCK_NAME: &str = "check";

#[derive(Debug, Clone)]
pub struct MonitorOptions {
    pub retention_days: i64,
    pub max_runtime: Duration,
    pub auto_baseline: bool,
    pub lock_stale_secs: i64,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            retention_days: 30,
            max_runtime: Duration::from_secs(600),
            auto_baseline: true,
            lock_stale_secs: 1800,
        }
    }
}

/// What a successful run did.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run: CheckRun,
    pub summary: RunSummary,
    pub notified: bool,
    pub purged: u64,
}

pub struct Monitor {
    source: Arc<dyn AccountSource>,
    store: Arc<dyn StateStore>,
    audit: AuditLog,
    notifier: Notifier,
    options: MonitorOptions,
}

impl Monitor {
    pub fn new(
        source: Arc<dyn AccountSource>,
        store: Arc<dyn StateStore>,
        audit: AuditLog,
        notifier: Notifier,
        options: MonitorOptions,
    ) -> Self {
        Self {
            source,
            store,
            audit,
            notifier,
            options,
        }
    }

    /// Execute one run starting at `now`.
    pub async fn run_check(
        &self,
        first_run: bool,
        now: DateTime<Utc>,
    ) -> Result<RunReport, PipelineError> {
        let mode = if first_run {
            RunMode::Baseline
        } else {
            RunMode::Normal
        };
        let mut run = CheckRun::new(now, mode);
        tracing::info!(run_id = %run.check_run_id, "starting check run");

        match self
            .store
            .acquire_lock(
                LOCK_NAME,
                &run.check_run_id,
                run.started_at,
                self.options.lock_stale_secs,
            )
            .await
        {
            Ok(LockOutcome::Acquired) => {}
            Ok(LockOutcome::HeldBy(holder)) => {
                // The run holding the lock reports its own outcome.
                tracing::warn!(run_id = %run.check_run_id, holder = %holder, "another run is in progress, skipping");
                return Err(PipelineError::Locked { holder });
            }
            Err(e) => {
                let err = PipelineError::Lock(e);
                self.report_failure(&run, &err).await;
                return Err(err);
            }
        }

        let mut summary = RunSummary::default();
        let outcome = self.execute(&mut run, &mut summary).await;

        if let Err(err) = &outcome {
            self.report_failure(&run, err).await;
        }
        self.record(&run, &summary, &outcome).await;

        if let Err(e) = self.store.release_lock(LOCK_NAME, &run.check_run_id).await {
            tracing::error!(run_id = %run.check_run_id, error = %e, "failed to release run lock");
        }

        outcome
    }

    async fn execute(
        &self,
        run: &mut CheckRun,
        summary: &mut RunSummary,
    ) -> Result<RunReport, PipelineError> {
        let deadline = Instant::now() + self.options.max_runtime;

        let active = self
            .within(deadline, Stage::StateRead, async {
                if run.mode == RunMode::Normal
                    && self.options.auto_baseline
                    && !self.store.has_successful_run().await?
                {
                    tracing::info!(run_id = %run.check_run_id, "no successful run recorded yet, running as baseline");
                    run.mode = RunMode::Baseline;
                }
                Ok::<_, PipelineError>(self.store.load_active_set().await?)
            })
            .await?;
        let run: &CheckRun = run;
        tracing::info!(run_id = %run.check_run_id, mode = run.mode.as_str(), active = active.len(), "active set loaded");

        let accounts = self
            .within(deadline, Stage::Fetch, async {
                Ok::<_, PipelineError>(self.source.fetch_all().await?)
            })
            .await?;

        let result = diff(&accounts, &active, run);
        let stats = result.summary();
        *summary = stats.clone();
        if !result.unobserved.is_empty() {
            tracing::warn!(
                run_id = %run.check_run_id,
                accounts = ?result.unobserved,
                "active disconnections not present in inventory, left open"
            );
        }
        tracing::info!(
            run_id = %run.check_run_id,
            accounts = stats.total_accounts,
            new = stats.new_count,
            resolved = stats.resolved_count,
            still_active = stats.still_active_count,
            "diff computed"
        );

        let writer = PersistenceWriter::new(self.store.as_ref(), &self.audit);
        self.within(deadline, Stage::Persist, async {
            Ok::<_, PipelineError>(writer
                .commit(run, &result.new_events, &result.resolved_events)
                .await?)
        })
        .await?;

        let notified = match run.mode {
            RunMode::Baseline => {
                tracing::info!(
                    run_id = %run.check_run_id,
                    recorded = result.new_events.len(),
                    "baseline run, notification suppressed"
                );
                false
            }
            RunMode::Normal => {
                self.within(deadline, Stage::Notify, async {
                    Ok::<_, PipelineError>(self
                        .notifier
                        .notify(run, &result.new_events, &stats)
                        .await?)
                })
                .await?
            }
        };

        let purged = match self
            .within(deadline, Stage::Cleanup, async {
                Ok::<_, PipelineError>(
                    purge_resolved(self.store.as_ref(), run.started_at, self.options.retention_days)
                        .await?,
                )
            })
            .await
        {
            Ok(n) => n,
            Err(e) => {
                tracing::error!(run_id = %run.check_run_id, stage = %Stage::Cleanup, error = %e, "retention cleanup failed");
                0
            }
        };

        Ok(RunReport {
            run: run.clone(),
            summary: stats,
            notified,
            purged,
        })
    }

    async fn within<T, F>(&self, deadline: Instant, stage: Stage, fut: F) -> Result<T, PipelineError>
    where
        F: Future<Output = Result<T, PipelineError>>,
    {
        match tokio::time::timeout_at(deadline, fut).await {
            Ok(result) => result,
            Err(_) => Err(PipelineError::Timeout {
                limit: self.options.max_runtime,
                stage,
            }),
        }
    }

    /// Log a fatal error and send the error alert. A failed alert is logged
    /// and otherwise ignored.
    async fn report_failure(&self, run: &CheckRun, err: &PipelineError) {
        let stage = err.stage();
        tracing::error!(run_id = %run.check_run_id, stage = %stage, error = %err, "check run failed");

        if let Err(e) = self
            .notifier
            .notify_error(run, stage, &err.to_string())
            .await
        {
            tracing::error!(run_id = %run.check_run_id, error = %e, "failed to send error alert");
        }
    }

    async fn record(
        &self,
        run: &CheckRun,
        summary: &RunSummary,
        outcome: &Result<RunReport, PipelineError>,
    ) {
        let record = RunRecord {
            check_run_id: run.check_run_id.clone(),
            started_at: run.started_at,
            finished_at: Utc::now(),
            mode: run.mode,
            succeeded: outcome.is_ok(),
            failed_stage: outcome
                .as_ref()
                .err()
                .map(|e| e.stage().as_str().to_string()),
            summary: summary.clone(),
            error: outcome.as_ref().err().map(|e| e.to_string()),
        };

        if let Err(e) = self.store.record_run(&record).await {
            tracing::error!(run_id = %run.check_run_id, error = %e, "failed to record run history");
        }
    }
}

/// Delete resolved episodes older than `retention_days` before `now`.
pub async fn purge_resolved(
    store: &dyn StateStore,
    now: DateTime<Utc>,
    retention_days: i64,
) -> Result<u64, crate::error::PersistError> {
    let cutoff = now - ChronoDuration::days(retention_days);
    let deleted = store.purge_resolved_before(cutoff).await?;
    if deleted > 0 {
        tracing::info!(deleted, cutoff = %cutoff, "purged resolved disconnections");
    }
    Ok(deleted)
}

impl From<&Config> for MonitorOptions {
    fn from(config: &Config) -> Self {
        Self {
            retention_days: config.monitor.retention_days,
            max_runtime: Duration::from_secs(config.monitor.max_runtime_secs),
            auto_baseline: config.monitor.auto_baseline,
            lock_stale_secs: config.monitor.lock_stale_secs,
        }
    }
}

/// Wire a [`Monitor`] to the real inventory API, Slack, and SQLite.
pub async fn build_monitor(config: &Config) -> Result<Monitor> {
    let pool = db::connect(config).await?;
    migrate::run_migrations(&pool).await?;
    let store: Arc<dyn StateStore> = Arc::new(SqliteStore::new(pool));

    let client = ApiClient::from_config(&config.api)?;
    let source: Arc<dyn AccountSource> = Arc::new(InventoryFetcher::new(
        InventoryApi::new(client, &config.api.accounts_path),
        config.api.page_size,
    ));

    let sink = SlackSink::new(
        &config.slack.api_base_url,
        config.slack.token()?,
        config.api.backoff_policy(),
        Duration::from_secs(config.api.timeout_secs),
    )?;
    let notifier = Notifier::new(
        Arc::new(sink),
        &config.slack.channel,
        config.slack.max_table_rows,
    );

    Ok(Monitor::new(
        source,
        store,
        AuditLog::new(&config.audit.dir),
        notifier,
        MonitorOptions::from(config),
    ))
}

/// `dcmon check`: run once and print a summary.
pub async fn run_check(config: &Config, first_run: bool) -> Result<()> {
    let monitor = build_monitor(config).await?;
    let report = monitor.run_check(first_run, Utc::now()).await?;

    println!("check {}", report.run.check_run_id);
    println!("  mode: {}", report.run.mode.as_str());
    println!("  accounts: {}", report.summary.total_accounts);
    println!("  new disconnections: {}", report.summary.new_count);
    println!("  resolved: {}", report.summary.resolved_count);
    println!("  still active: {}", report.summary.still_active_count);
    if report.summary.unobserved_count > 0 {
        println!("  not in inventory: {}", report.summary.unobserved_count);
    }
    println!("  alert sent: {}", if report.notified { "yes" } else { "no" });
    println!("  purged: {}", report.purged);
    println!("ok");

    Ok(())
}

/// `dcmon cleanup`: purge resolved episodes on demand.
pub async fn run_cleanup(config: &Config, days: Option<i64>) -> Result<()> {
    let days = days.unwrap_or(config.monitor.retention_days);
    if days < 1 {
        anyhow::bail!("--days must be >= 1");
    }

    let pool = db::connect(config).await?;
    migrate::run_migrations(&pool).await?;
    let store = SqliteStore::new(pool);
    let deleted = purge_resolved(&store, Utc::now(), days).await?;

    println!("cleanup");
    println!("  retention: {} days", days);
    println!("  deleted: {}", deleted);
    println!("ok");

    store.pool().close().await;
    Ok(())
}
