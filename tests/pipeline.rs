//! End-to-end check runs against a real SQLite store, with the inventory and
//! Slack replaced by in-memory fakes.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use disconnect_monitor::audit::AuditLog;
use disconnect_monitor::db;
use disconnect_monitor::error::{ApiError, NotifyError, PersistError, PipelineError, Stage, StateReadError};
use disconnect_monitor::fetcher::AccountSource;
use disconnect_monitor::migrate;
use disconnect_monitor::models::{Account, CheckRun, DisconnectionEvent, DisconnectionType, RunMode, RunRecord};
use disconnect_monitor::monitor::{Monitor, MonitorOptions};
use disconnect_monitor::notifier::{ChatSink, Notifier};
use disconnect_monitor::store::{LockOutcome, SqliteStore, StateStore};
use disconnect_monitor::writer::PersistenceWriter;

// ============ Fakes ============

#[derive(Default)]
struct FakeInventory {
    accounts: Mutex<Vec<Account>>,
    failure: Mutex<Option<ApiError>>,
}

impl FakeInventory {
    fn set(&self, accounts: Vec<Account>) {
        *self.accounts.lock().unwrap() = accounts;
    }

    fn fail_with(&self, err: Option<ApiError>) {
        *self.failure.lock().unwrap() = err;
    }
}

#[async_trait]
impl AccountSource for FakeInventory {
    async fn fetch_all(&self) -> Result<Vec<Account>, ApiError> {
        if let Some(err) = self.failure.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(self.accounts.lock().unwrap().clone())
    }
}

struct StalledInventory;

#[async_trait]
impl AccountSource for StalledInventory {
    async fn fetch_all(&self) -> Result<Vec<Account>, ApiError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(vec![])
    }
}

#[derive(Default)]
struct RecordingSink {
    delivered: Mutex<Vec<String>>,
    attempts: AtomicUsize,
    failing: AtomicBool,
}

impl RecordingSink {
    fn messages(&self) -> Vec<String> {
        self.delivered.lock().unwrap().clone()
    }

    fn alerts(&self) -> Vec<String> {
        self.messages()
            .into_iter()
            .filter(|m| m.contains(":red_circle:"))
            .collect()
    }

    fn error_alerts(&self) -> Vec<String> {
        self.messages()
            .into_iter()
            .filter(|m| m.contains(":warning:"))
            .collect()
    }
}

#[async_trait]
impl ChatSink for RecordingSink {
    async fn post_message(&self, _channel: &str, text: &str) -> Result<(), NotifyError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotifyError::Delivery("channel unreachable".to_string()));
        }
        self.delivered.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

/// Delegates to SQLite but refuses every event commit.
struct BrokenCommitStore(Arc<SqliteStore>);

#[async_trait]
impl StateStore for BrokenCommitStore {
    async fn load_active_set(&self) -> Result<HashMap<i64, DisconnectionEvent>, StateReadError> {
        self.0.load_active_set().await
    }

    async fn persist(&self, event: &DisconnectionEvent) -> Result<(), PersistError> {
        self.0.persist(event).await
    }

    async fn commit_events(
        &self,
        _resolved: &[DisconnectionEvent],
        _opened: &[DisconnectionEvent],
    ) -> Result<(), PersistError> {
        Err(PersistError::Store(sqlx::Error::PoolClosed))
    }

    async fn purge_resolved_before(&self, cutoff: DateTime<Utc>) -> Result<u64, PersistError> {
        self.0.purge_resolved_before(cutoff).await
    }

    async fn has_successful_run(&self) -> Result<bool, StateReadError> {
        self.0.has_successful_run().await
    }

    async fn record_run(&self, record: &RunRecord) -> Result<(), sqlx::Error> {
        self.0.record_run(record).await
    }

    async fn acquire_lock(
        &self,
        name: &str,
        holder: &str,
        now: DateTime<Utc>,
        stale_after_secs: i64,
    ) -> Result<LockOutcome, sqlx::Error> {
        self.0.acquire_lock(name, holder, now, stale_after_secs).await
    }

    async fn release_lock(&self, name: &str, holder: &str) -> Result<(), sqlx::Error> {
        self.0.release_lock(name, holder).await
    }
}

/// Delegates to SQLite but fails the chosen state reads.
struct UnreadableStore {
    inner: Arc<SqliteStore>,
    active_set_fails: bool,
    run_history_fails: bool,
}

#[async_trait]
impl StateStore for UnreadableStore {
    async fn load_active_set(&self) -> Result<HashMap<i64, DisconnectionEvent>, StateReadError> {
        if self.active_set_fails {
            return Err(StateReadError(sqlx::Error::PoolTimedOut));
        }
        self.inner.load_active_set().await
    }

    async fn persist(&self, event: &DisconnectionEvent) -> Result<(), PersistError> {
        self.inner.persist(event).await
    }

    async fn commit_events(
        &self,
        resolved: &[DisconnectionEvent],
        opened: &[DisconnectionEvent],
    ) -> Result<(), PersistError> {
        self.inner.commit_events(resolved, opened).await
    }

    async fn purge_resolved_before(&self, cutoff: DateTime<Utc>) -> Result<u64, PersistError> {
        self.inner.purge_resolved_before(cutoff).await
    }

    async fn has_successful_run(&self) -> Result<bool, StateReadError> {
        if self.run_history_fails {
            return Err(StateReadError(sqlx::Error::PoolTimedOut));
        }
        self.inner.has_successful_run().await
    }

    async fn record_run(&self, record: &RunRecord) -> Result<(), sqlx::Error> {
        self.inner.record_run(record).await
    }

    async fn acquire_lock(
        &self,
        name: &str,
        holder: &str,
        now: DateTime<Utc>,
        stale_after_secs: i64,
    ) -> Result<LockOutcome, sqlx::Error> {
        self.inner.acquire_lock(name, holder, now, stale_after_secs).await
    }

    async fn release_lock(&self, name: &str, holder: &str) -> Result<(), sqlx::Error> {
        self.inner.release_lock(name, holder).await
    }
}

// ============ Harness ============

struct Harness {
    tmp: TempDir,
    store: Arc<SqliteStore>,
    inventory: Arc<FakeInventory>,
    sink: Arc<RecordingSink>,
}

impl Harness {
    async fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let pool = db::connect_path(&tmp.path().join("data").join("dcmon.sqlite"))
            .await
            .unwrap();
        migrate::run_migrations(&pool).await.unwrap();

        Self {
            tmp,
            store: Arc::new(SqliteStore::new(pool)),
            inventory: Arc::new(FakeInventory::default()),
            sink: Arc::new(RecordingSink::default()),
        }
    }

    fn audit_dir(&self) -> std::path::PathBuf {
        self.tmp.path().join("audit")
    }

    fn monitor_with(
        &self,
        source: Arc<dyn AccountSource>,
        store: Arc<dyn StateStore>,
        options: MonitorOptions,
    ) -> Monitor {
        Monitor::new(
            source,
            store,
            AuditLog::new(self.audit_dir()),
            Notifier::new(self.sink.clone(), "#email-alerts", 50),
            options,
        )
    }

    /// Monitor with auto-baseline off, so the first run alerts.
    fn monitor(&self) -> Monitor {
        self.monitor_with(
            self.inventory.clone(),
            self.store.clone(),
            MonitorOptions {
                auto_baseline: false,
                ..Default::default()
            },
        )
    }

    fn audit_rows(&self) -> Vec<csv::StringRecord> {
        read_audit_rows(&self.audit_dir())
    }
}

fn read_audit_rows(dir: &Path) -> Vec<csv::StringRecord> {
    let mut files: Vec<_> = match std::fs::read_dir(dir) {
        Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
        Err(_) => return vec![],
    };
    files.sort();

    let mut rows = Vec::new();
    for file in files {
        let mut reader = csv::Reader::from_path(&file).unwrap();
        rows.extend(reader.records().map(|r| r.unwrap()));
    }
    rows
}

fn account(id: i64, smtp_ok: bool, imap_ok: bool) -> Account {
    Account {
        account_id: id,
        from_name: format!("Sender {}", id),
        from_email: format!("sender{}@example.com", id),
        account_type: "GMAIL".to_string(),
        smtp_ok,
        imap_ok,
        tags: vec!["outbound".to_string()],
        client_id: None,
        message_per_day: Some(40),
        daily_sent_count: Some(0),
    }
}

fn at(hours: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap() + ChronoDuration::hours(hours)
}

// ============ Tests ============

#[tokio::test]
async fn test_alert_once_per_episode() {
    let h = Harness::new().await;
    let monitor = h.monitor();
    h.inventory.set(vec![account(1, false, true), account(2, true, true)]);

    let first = monitor.run_check(false, at(0)).await.unwrap();
    assert!(first.notified);
    assert_eq!(first.summary.new_count, 1);

    for hour in 1..4 {
        let report = monitor.run_check(false, at(hour)).await.unwrap();
        assert!(!report.notified);
        assert_eq!(report.summary.still_active_count, 1);
    }

    assert_eq!(h.sink.alerts().len(), 1);
    assert!(h.sink.alerts()[0].contains("sender1@example.com"));
    let events = h.store.events_for_account(1).await.unwrap();
    assert_eq!(events.len(), 1);
    assert!(events[0].is_active);
    assert_eq!(events[0].detected_at, at(0));
    assert_eq!(events[0].message_per_day, Some(40));
    assert_eq!(events[0].daily_sent_count, Some(0));
    assert_eq!(&h.audit_rows()[0][12], "40");
    assert_eq!(h.audit_rows().len(), 1);
}

#[tokio::test]
async fn test_recovery_resolves_without_alert() {
    let h = Harness::new().await;
    let monitor = h.monitor();

    h.inventory.set(vec![account(7, true, false)]);
    monitor.run_check(false, at(0)).await.unwrap();

    h.inventory.set(vec![account(7, true, true)]);
    let report = monitor.run_check(false, at(2)).await.unwrap();
    assert_eq!(report.summary.resolved_count, 1);
    assert!(!report.notified);
    assert_eq!(h.sink.alerts().len(), 1);

    let events = h.store.events_for_account(7).await.unwrap();
    assert_eq!(events.len(), 1);
    assert!(!events[0].is_active);
    assert_eq!(events[0].resolved_at, Some(at(2)));
    assert!(h.store.load_active_set().await.unwrap().is_empty());

    let rows = h.audit_rows();
    assert_eq!(rows.len(), 2);
    assert_eq!(&rows[0][2], "detected");
    assert_eq!(&rows[1][2], "resolved");
}

#[tokio::test]
async fn test_reconnect_then_disconnect_is_a_new_episode() {
    let h = Harness::new().await;
    let monitor = h.monitor();

    h.inventory.set(vec![account(3, false, true)]);
    monitor.run_check(false, at(0)).await.unwrap();
    h.inventory.set(vec![account(3, true, true)]);
    monitor.run_check(false, at(1)).await.unwrap();
    h.inventory.set(vec![account(3, false, true)]);
    let report = monitor.run_check(false, at(2)).await.unwrap();

    assert!(report.notified);
    assert_eq!(h.sink.alerts().len(), 2);
    let events = h.store.events_for_account(3).await.unwrap();
    assert_eq!(events.len(), 2);
    assert!(!events[0].is_active);
    assert!(events[1].is_active);
}

#[tokio::test]
async fn test_type_change_closes_and_reopens() {
    let h = Harness::new().await;
    let monitor = h.monitor();

    h.inventory.set(vec![account(9, false, true)]);
    monitor.run_check(false, at(0)).await.unwrap();

    h.inventory.set(vec![account(9, false, false)]);
    let report = monitor.run_check(false, at(1)).await.unwrap();
    assert_eq!(report.summary.new_count, 1);
    assert_eq!(report.summary.resolved_count, 1);

    let events = h.store.events_for_account(9).await.unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].disconnection_type, DisconnectionType::Smtp);
    assert_eq!(events[0].resolved_at, Some(at(1)));
    assert_eq!(events[1].disconnection_type, DisconnectionType::Both);
    assert!(events[1].is_active);

    let alerts = h.sink.alerts();
    assert_eq!(alerts.len(), 2);
    assert!(alerts[1].contains("Both SMTP & IMAP: 1"));
}

#[tokio::test]
async fn test_type_change_within_same_second_keeps_one_episode() {
    let h = Harness::new().await;
    let monitor = h.monitor();

    h.inventory.set(vec![account(9, false, true)]);
    monitor.run_check(false, at(0)).await.unwrap();

    h.inventory.set(vec![account(9, false, false)]);
    let report = monitor.run_check(false, at(0)).await.unwrap();
    assert!(report.notified);
    assert_eq!(report.summary.new_count, 1);

    let events = h.store.events_for_account(9).await.unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].disconnection_type, DisconnectionType::Smtp);
    assert!(!events[0].is_active);
    assert_eq!(events[1].disconnection_type, DisconnectionType::Both);
    assert!(events[1].is_active);
    assert!(events[1].detected_at > events[0].detected_at);

    // The BOTH episode is already open, so the next run stays quiet.
    let next = monitor.run_check(false, at(1)).await.unwrap();
    assert!(!next.notified);
    assert_eq!(next.summary.still_active_count, 1);
    assert_eq!(h.sink.alerts().len(), 2);
}

#[tokio::test]
async fn test_first_run_records_without_alerting() {
    let h = Harness::new().await;
    let monitor = h.monitor();
    h.inventory.set((1..=5).map(|id| account(id, false, id % 2 == 0)).collect());

    let report = monitor.run_check(true, at(0)).await.unwrap();
    assert_eq!(report.run.mode, RunMode::Baseline);
    assert_eq!(report.summary.new_count, 5);
    assert!(!report.notified);
    assert!(h.sink.messages().is_empty());
    assert_eq!(h.store.load_active_set().await.unwrap().len(), 5);
    assert_eq!(h.audit_rows().len(), 5);

    // Same state on the next scheduled run: nothing new to say.
    let next = monitor.run_check(false, at(1)).await.unwrap();
    assert_eq!(next.summary.new_count, 0);
    assert!(h.sink.messages().is_empty());
}

#[tokio::test]
async fn test_auto_baseline_before_first_successful_run() {
    let h = Harness::new().await;
    let monitor = h.monitor_with(
        h.inventory.clone(),
        h.store.clone(),
        MonitorOptions::default(),
    );

    h.inventory.set(vec![account(1, false, true)]);
    let first = monitor.run_check(false, at(0)).await.unwrap();
    assert_eq!(first.run.mode, RunMode::Baseline);
    assert!(h.sink.messages().is_empty());

    h.inventory.set(vec![account(1, false, true), account(2, true, false)]);
    let second = monitor.run_check(false, at(1)).await.unwrap();
    assert_eq!(second.run.mode, RunMode::Normal);
    assert!(second.notified);
    let alerts = h.sink.alerts();
    assert_eq!(alerts.len(), 1);
    assert!(alerts[0].contains("sender2@example.com"));
    assert!(!alerts[0].contains("sender1@example.com"));
}

#[tokio::test]
async fn test_retention_purges_store_but_not_audit() {
    let h = Harness::new().await;
    let monitor = h.monitor();

    h.inventory.set(vec![account(4, false, false)]);
    monitor.run_check(false, at(0)).await.unwrap();
    h.inventory.set(vec![account(4, true, true)]);
    let resolved = monitor.run_check(false, at(1)).await.unwrap();
    assert_eq!(resolved.purged, 0);

    let later = monitor.run_check(false, at(1 + 24 * 31)).await.unwrap();
    assert_eq!(later.purged, 1);
    assert_eq!(h.store.count_events().await.unwrap(), 0);
    assert_eq!(h.audit_rows().len(), 2);
}

#[tokio::test]
async fn test_active_episodes_survive_retention() {
    let h = Harness::new().await;
    let monitor = h.monitor();

    h.inventory.set(vec![account(4, false, false)]);
    monitor.run_check(false, at(0)).await.unwrap();
    let later = monitor.run_check(false, at(24 * 60)).await.unwrap();
    assert_eq!(later.purged, 0);
    assert_eq!(h.store.load_active_set().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_store_failure_aborts_before_notify() {
    let h = Harness::new().await;
    let broken: Arc<dyn StateStore> = Arc::new(BrokenCommitStore(h.store.clone()));
    let monitor = h.monitor_with(
        h.inventory.clone(),
        broken,
        MonitorOptions {
            auto_baseline: false,
            ..Default::default()
        },
    );

    h.inventory.set(vec![account(11, false, true)]);
    let err = monitor.run_check(false, at(0)).await.unwrap_err();
    assert_eq!(err.stage(), Stage::Persist);

    assert!(h.sink.alerts().is_empty());
    assert_eq!(h.sink.error_alerts().len(), 1);
    assert!(h.sink.error_alerts()[0].contains("persist"));
    assert_eq!(h.store.count_events().await.unwrap(), 0);

    let runs = h.store.recent_runs(5).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert!(!runs[0].succeeded);
    assert_eq!(runs[0].failed_stage.as_deref(), Some("persist"));

    // The next healthy run detects it again and alerts once.
    let report = h.monitor().run_check(false, at(1)).await.unwrap();
    assert!(report.notified);
    assert_eq!(h.sink.alerts().len(), 1);
}

#[tokio::test]
async fn test_fetch_failure_leaves_state_untouched() {
    let h = Harness::new().await;
    let monitor = h.monitor();

    h.inventory.set(vec![account(1, false, true)]);
    monitor.run_check(false, at(0)).await.unwrap();

    h.inventory
        .fail_with(Some(ApiError::Fatal("HTTP 401 Unauthorized".to_string())));
    let err = monitor.run_check(false, at(1)).await.unwrap_err();
    assert!(matches!(err, PipelineError::Fetch(ApiError::Fatal(_))));
    assert_eq!(h.sink.error_alerts().len(), 1);
    assert!(h.sink.error_alerts()[0].contains("Stage: fetch"));
    assert_eq!(h.store.load_active_set().await.unwrap().len(), 1);

    // Recovery during the outage is seen on the next good run.
    h.inventory.fail_with(None);
    h.inventory.set(vec![account(1, true, true)]);
    let report = monitor.run_check(false, at(2)).await.unwrap();
    assert_eq!(report.summary.resolved_count, 1);
}

#[tokio::test]
async fn test_notify_failure_does_not_realert() {
    let h = Harness::new().await;
    let monitor = h.monitor();
    h.sink.failing.store(true, Ordering::SeqCst);

    h.inventory.set(vec![account(5, true, false)]);
    let err = monitor.run_check(false, at(0)).await.unwrap_err();
    assert!(matches!(err, PipelineError::Notify(NotifyError::Delivery(_))));
    // Disconnection alert, then the error alert.
    assert_eq!(h.sink.attempts.load(Ordering::SeqCst), 2);
    assert_eq!(h.store.load_active_set().await.unwrap().len(), 1);

    h.sink.failing.store(false, Ordering::SeqCst);
    let report = monitor.run_check(false, at(1)).await.unwrap();
    assert!(!report.notified);
    assert!(h.sink.messages().is_empty());
}

#[tokio::test]
async fn test_overlapping_run_is_refused() {
    let h = Harness::new().await;
    let monitor = h.monitor();
    h.inventory.set(vec![account(1, false, true)]);

    let outcome = h
        .store
        .acquire_lock("check", "20260302085959_abcdef", at(0), 1800)
        .await
        .unwrap();
    assert_eq!(outcome, LockOutcome::Acquired);

    let err = monitor.run_check(false, at(0)).await.unwrap_err();
    match err {
        PipelineError::Locked { holder } => assert_eq!(holder, "20260302085959_abcdef"),
        other => panic!("expected Locked, got {:?}", other),
    }
    assert!(h.sink.messages().is_empty());
    assert_eq!(h.store.count_events().await.unwrap(), 0);

    // An abandoned lock is taken over once it is stale.
    let report = monitor.run_check(false, at(1)).await.unwrap();
    assert!(report.notified);
}

#[tokio::test]
async fn test_lock_released_after_each_run() {
    let h = Harness::new().await;
    let monitor = h.monitor();
    h.inventory.set(vec![]);

    monitor.run_check(false, at(0)).await.unwrap();
    let outcome = h
        .store
        .acquire_lock("check", "next-run", at(0), 1800)
        .await
        .unwrap();
    assert_eq!(outcome, LockOutcome::Acquired);
}

#[tokio::test]
async fn test_runtime_limit_stops_stalled_fetch() {
    let h = Harness::new().await;
    let monitor = h.monitor_with(
        Arc::new(StalledInventory),
        h.store.clone(),
        MonitorOptions {
            auto_baseline: false,
            max_runtime: Duration::from_millis(200),
            ..Default::default()
        },
    );

    let err = monitor.run_check(false, at(0)).await.unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Timeout {
            stage: Stage::Fetch,
            ..
        }
    ));
    assert_eq!(h.sink.error_alerts().len(), 1);
}

async fn assert_state_read_failure_aborts(active_set_fails: bool, run_history_fails: bool) {
    let h = Harness::new().await;
    let store: Arc<dyn StateStore> = Arc::new(UnreadableStore {
        inner: h.store.clone(),
        active_set_fails,
        run_history_fails,
    });
    let monitor = h.monitor_with(
        h.inventory.clone(),
        store,
        MonitorOptions {
            auto_baseline: true,
            ..Default::default()
        },
    );

    h.inventory.set(vec![account(21, false, true), account(22, false, false)]);
    let err = monitor.run_check(false, at(0)).await.unwrap_err();
    assert!(matches!(err, PipelineError::StateRead(_)));
    assert_eq!(err.stage(), Stage::StateRead);

    assert_eq!(h.store.count_events().await.unwrap(), 0);
    assert!(h.audit_rows().is_empty());
    assert!(h.sink.alerts().is_empty());
    assert_eq!(h.sink.error_alerts().len(), 1);

    let runs = h.store.recent_runs(5).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert!(!runs[0].succeeded);
    assert_eq!(runs[0].failed_stage.as_deref(), Some("state-read"));
}

#[tokio::test]
async fn test_unreadable_active_set_aborts_run() {
    assert_state_read_failure_aborts(true, false).await;
}

#[tokio::test]
async fn test_unreadable_run_history_aborts_run() {
    assert_state_read_failure_aborts(false, true).await;
}

#[tokio::test]
async fn test_replayed_commit_does_not_duplicate() {
    let h = Harness::new().await;
    let audit = AuditLog::new(h.audit_dir());
    let writer = PersistenceWriter::new(h.store.as_ref(), &audit);

    let run = CheckRun::new(at(0), RunMode::Normal);
    let opened: Vec<DisconnectionEvent> = (1..=3)
        .filter_map(|id| DisconnectionEvent::open(&account(id, false, true), &run))
        .collect();

    writer.commit(&run, &opened, &[]).await.unwrap();
    writer.commit(&run, &opened, &[]).await.unwrap();
    assert_eq!(h.store.count_events().await.unwrap(), 3);

    // Replaying the open after a resolution must not reopen the episode.
    let later = CheckRun::new(at(1), RunMode::Normal);
    let resolved = vec![opened[0].resolve(&later)];
    writer.commit(&later, &[], &resolved).await.unwrap();
    let err = writer.commit(&run, &opened[..1], &[]).await.unwrap_err();
    assert!(matches!(
        err,
        PersistError::AlreadyResolved { account_id: 1, .. }
    ));

    let events = h.store.events_for_account(1).await.unwrap();
    assert_eq!(events.len(), 1);
    assert!(!events[0].is_active);
    assert_eq!(h.store.load_active_set().await.unwrap().len(), 2);

    let actions: Vec<String> = h.audit_rows().iter().map(|r| r[2].to_string()).collect();
    assert_eq!(
        actions.iter().filter(|a| a.as_str() == "resolved").count(),
        1
    );
}

#[tokio::test]
async fn test_unobserved_accounts_stay_active() {
    let h = Harness::new().await;
    let monitor = h.monitor();

    h.inventory.set(vec![account(1, false, true), account(2, true, false)]);
    monitor.run_check(false, at(0)).await.unwrap();

    h.inventory.set(vec![account(2, true, false)]);
    let report = monitor.run_check(false, at(1)).await.unwrap();
    assert_eq!(report.summary.unobserved_count, 1);
    assert_eq!(report.summary.resolved_count, 0);
    assert_eq!(h.store.load_active_set().await.unwrap().len(), 2);

    let runs = h.store.recent_runs(1).await.unwrap();
    assert_eq!(runs[0].summary.unobserved_count, 1);
}
