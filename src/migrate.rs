use anyhow::Result;
use sqlx::SqlitePool;

/// Create the schema. Safe to run on every start.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // One row per disconnection episode
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS disconnections (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            account_id INTEGER NOT NULL,
            from_name TEXT NOT NULL DEFAULT '',
            from_email TEXT NOT NULL DEFAULT '',
            account_type TEXT NOT NULL DEFAULT 'UNKNOWN',
            disconnection_type TEXT NOT NULL,
            tags TEXT NOT NULL DEFAULT '',
            client_id TEXT,
            message_per_day INTEGER,
            daily_sent_count INTEGER,
            detected_at INTEGER NOT NULL,
            resolved_at INTEGER,
            is_active INTEGER NOT NULL DEFAULT 1,
            check_run_id TEXT NOT NULL,
            UNIQUE(account_id, detected_at)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // At most one open episode per account
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_disconnections_one_active ON disconnections(account_id) WHERE is_active = 1",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_disconnections_resolved_at ON disconnections(resolved_at) WHERE is_active = 0",
    )
    .execute(pool)
    .await?;

    // Run history
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS check_runs (
            check_run_id TEXT PRIMARY KEY,
            started_at INTEGER NOT NULL,
            finished_at INTEGER NOT NULL,
            mode TEXT NOT NULL,
            status TEXT NOT NULL,
            failed_stage TEXT,
            total_accounts INTEGER NOT NULL DEFAULT 0,
            new_count INTEGER NOT NULL DEFAULT 0,
            resolved_count INTEGER NOT NULL DEFAULT 0,
            still_active_count INTEGER NOT NULL DEFAULT 0,
            unobserved_count INTEGER NOT NULL DEFAULT 0,
            error TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_check_runs_started_at ON check_runs(started_at DESC)")
        .execute(pool)
        .await?;

    // Advisory lock so two runs never overlap
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS run_locks (
            name TEXT PRIMARY KEY,
            holder TEXT NOT NULL,
            acquired_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
