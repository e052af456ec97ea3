//! Durable state: disconnection episodes, run history, and the run lock.
//!
//! [`StateStore`] is the only state carried between runs. The active set is
//! always read back from the `disconnections` table; nothing is cached in
//! process memory across runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;

use crate::error::{PersistError, StateReadError};
use crate::models::{DisconnectionEvent, RunMode, RunRecord, RunSummary, TypeCounts};

/// Result of trying to take the run lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockOutcome {
    Acquired,
    HeldBy(String),
}

#[async_trait]
pub trait StateStore: Send + Sync {
    /// All episodes with `is_active = true`, keyed by account.
    async fn load_active_set(&self) -> Result<HashMap<i64, DisconnectionEvent>, StateReadError>;

    /// Upsert one episode by `(account_id, detected_at)`.
    async fn persist(&self, event: &DisconnectionEvent) -> Result<(), PersistError>;

    /// Apply resolutions, then new episodes, in one transaction.
    async fn commit_events(
        &self,
        resolved: &[DisconnectionEvent],
        opened: &[DisconnectionEvent],
    ) -> Result<(), PersistError>;

    /// Delete resolved episodes whose `resolved_at` is before `cutoff`.
    async fn purge_resolved_before(&self, cutoff: DateTime<Utc>) -> Result<u64, PersistError>;

    /// Whether any run has ever completed successfully.
    async fn has_successful_run(&self) -> Result<bool, StateReadError>;

    async fn record_run(&self, record: &RunRecord) -> Result<(), sqlx::Error>;

    async fn acquire_lock(
        &self,
        name: &str,
        holder: &str,
        now: DateTime<Utc>,
        stale_after_secs: i64,
    ) -> Result<LockOutcome, sqlx::Error>;

    async fn release_lock(&self, name: &str, holder: &str) -> Result<(), sqlx::Error>;
}

/// SQLite implementation of [`StateStore`].
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Every episode for one account, oldest first.
    pub async fn events_for_account(
        &self,
        account_id: i64,
    ) -> Result<Vec<DisconnectionEvent>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT * FROM disconnections WHERE account_id = ? ORDER BY detected_at ASC, id ASC",
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(event_from_row).collect()
    }

    pub async fn count_events(&self) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM disconnections")
            .fetch_one(&self.pool)
            .await
    }

    /// Active episodes, oldest detection first.
    pub async fn active_events(&self) -> Result<Vec<DisconnectionEvent>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT * FROM disconnections WHERE is_active = 1 ORDER BY detected_at ASC, account_id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(event_from_row).collect()
    }

    pub async fn recent_runs(&self, limit: i64) -> Result<Vec<RunRecord>, sqlx::Error> {
        let rows = sqlx::query("SELECT * FROM check_runs ORDER BY started_at DESC LIMIT ?")
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(run_from_row).collect()
    }
}

async fn upsert_event<'e, E>(executor: E, event: &DisconnectionEvent) -> Result<(), PersistError>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    // A resolved episode stays resolved even if an older write is replayed.
    let stored_active: bool = sqlx::query_scalar(
        r#"
        INSERT INTO disconnections (account_id, from_name, from_email, account_type,
                                    disconnection_type, tags, client_id, message_per_day,
                                    daily_sent_count, detected_at, resolved_at,
                                    is_active, check_run_id)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(account_id, detected_at) DO UPDATE SET
            resolved_at = COALESCE(disconnections.resolved_at, excluded.resolved_at),
            is_active = CASE
                WHEN disconnections.resolved_at IS NOT NULL THEN 0
                ELSE excluded.is_active
            END
        RETURNING is_active
        "#,
    )
    .bind(event.account_id)
    .bind(&event.from_name)
    .bind(&event.from_email)
    .bind(&event.account_type)
    .bind(event.disconnection_type.as_str())
    .bind(&event.tags)
    .bind(&event.client_id)
    .bind(event.message_per_day)
    .bind(event.daily_sent_count)
    .bind(event.detected_at.timestamp())
    .bind(event.resolved_at.map(|t| t.timestamp()))
    .bind(event.is_active)
    .bind(&event.check_run_id)
    .fetch_one(executor)
    .await?;

    if event.is_active && !stored_active {
        return Err(PersistError::AlreadyResolved {
            account_id: event.account_id,
            detected_at: event.detected_at,
        });
    }

    Ok(())
}

#[async_trait]
impl StateStore for SqliteStore {
    async fn load_active_set(&self) -> Result<HashMap<i64, DisconnectionEvent>, StateReadError> {
        let events = self.active_events().await?;
        Ok(events.into_iter().map(|e| (e.account_id, e)).collect())
    }

    async fn persist(&self, event: &DisconnectionEvent) -> Result<(), PersistError> {
        upsert_event(&self.pool, event).await
    }

    async fn commit_events(
        &self,
        resolved: &[DisconnectionEvent],
        opened: &[DisconnectionEvent],
    ) -> Result<(), PersistError> {
        let mut tx = self.pool.begin().await?;

        // Resolutions first so a type change never has two open episodes.
        for event in resolved.iter().chain(opened) {
            upsert_event(&mut *tx, event).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn purge_resolved_before(&self, cutoff: DateTime<Utc>) -> Result<u64, PersistError> {
        let result = sqlx::query(
            "DELETE FROM disconnections WHERE is_active = 0 AND resolved_at IS NOT NULL AND resolved_at < ?",
        )
        .bind(cutoff.timestamp())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn has_successful_run(&self) -> Result<bool, StateReadError> {
        let ok_runs: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM check_runs WHERE status = 'ok'")
                .fetch_one(&self.pool)
                .await?;
        Ok(ok_runs > 0)
    }

    async fn record_run(&self, record: &RunRecord) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO check_runs (check_run_id, started_at, finished_at, mode, status,
                                    failed_stage, total_accounts, new_count, resolved_count,
                                    still_active_count, unobserved_count, error)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(check_run_id) DO UPDATE SET
                finished_at = excluded.finished_at,
                status = excluded.status,
                failed_stage = excluded.failed_stage,
                total_accounts = excluded.total_accounts,
                new_count = excluded.new_count,
                resolved_count = excluded.resolved_count,
                still_active_count = excluded.still_active_count,
                unobserved_count = excluded.unobserved_count,
                error = excluded.error
            "#,
        )
        .bind(&record.check_run_id)
        .bind(record.started_at.timestamp())
        .bind(record.finished_at.timestamp())
        .bind(record.mode.as_str())
        .bind(if record.succeeded { "ok" } else { "failed" })
        .bind(&record.failed_stage)
        .bind(record.summary.total_accounts as i64)
        .bind(record.summary.new_count as i64)
        .bind(record.summary.resolved_count as i64)
        .bind(record.summary.still_active_count as i64)
        .bind(record.summary.unobserved_count as i64)
        .bind(&record.error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn acquire_lock(
        &self,
        name: &str,
        holder: &str,
        now: DateTime<Utc>,
        stale_after_secs: i64,
    ) -> Result<LockOutcome, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        // Take over locks abandoned by a crashed run.
        sqlx::query("DELETE FROM run_locks WHERE name = ? AND acquired_at < ?")
            .bind(name)
            .bind(now.timestamp() - stale_after_secs)
            .execute(&mut *tx)
            .await?;

        let inserted = sqlx::query(
            "INSERT INTO run_locks (name, holder, acquired_at) VALUES (?, ?, ?) ON CONFLICT(name) DO NOTHING",
        )
        .bind(name)
        .bind(holder)
        .bind(now.timestamp())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let outcome = if inserted == 1 {
            LockOutcome::Acquired
        } else {
            let current: String = sqlx::query_scalar("SELECT holder FROM run_locks WHERE name = ?")
                .bind(name)
                .fetch_one(&mut *tx)
                .await?;
            LockOutcome::HeldBy(current)
        };

        tx.commit().await?;
        Ok(outcome)
    }

    async fn release_lock(&self, name: &str, holder: &str) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM run_locks WHERE name = ? AND holder = ?")
            .bind(name)
            .bind(holder)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn decode_err(msg: String) -> sqlx::Error {
    sqlx::Error::Decode(msg.into())
}

fn ts(secs: i64) -> Result<DateTime<Utc>, sqlx::Error> {
    DateTime::from_timestamp(secs, 0).ok_or_else(|| decode_err(format!("invalid timestamp {}", secs)))
}

fn event_from_row(row: &SqliteRow) -> Result<DisconnectionEvent, sqlx::Error> {
    let kind: String = row.try_get("disconnection_type")?;
    let resolved_at: Option<i64> = row.try_get("resolved_at")?;

    Ok(DisconnectionEvent {
        account_id: row.try_get("account_id")?,
        from_name: row.try_get("from_name")?,
        from_email: row.try_get("from_email")?,
        account_type: row.try_get("account_type")?,
        disconnection_type: kind.parse().map_err(decode_err)?,
        tags: row.try_get("tags")?,
        client_id: row.try_get("client_id")?,
        message_per_day: row.try_get("message_per_day")?,
        daily_sent_count: row.try_get("daily_sent_count")?,
        detected_at: ts(row.try_get("detected_at")?)?,
        resolved_at: resolved_at.map(ts).transpose()?,
        is_active: row.try_get("is_active")?,
        check_run_id: row.try_get("check_run_id")?,
    })
}

fn run_from_row(row: &SqliteRow) -> Result<RunRecord, sqlx::Error> {
    let mode: String = row.try_get("mode")?;
    let status: String = row.try_get("status")?;
    let count = |col: &str| -> Result<usize, sqlx::Error> {
        let n: i64 = row.try_get(col)?;
        Ok(n.max(0) as usize)
    };

    Ok(RunRecord {
        check_run_id: row.try_get("check_run_id")?,
        started_at: ts(row.try_get("started_at")?)?,
        finished_at: ts(row.try_get("finished_at")?)?,
        mode: if mode == "baseline" {
            RunMode::Baseline
        } else {
            RunMode::Normal
        },
        succeeded: status == "ok",
        failed_stage: row.try_get("failed_stage")?,
        summary: RunSummary {
            total_accounts: count("total_accounts")?,
            new_count: count("new_count")?,
            resolved_count: count("resolved_count")?,
            still_active_count: count("still_active_count")?,
            unobserved_count: count("unobserved_count")?,
            by_type: TypeCounts::default(),
        },
        error: row.try_get("error")?,
    })
}
