//! `dcmon status`: what the monitor currently believes.
//!
//! Prints the open disconnection episodes and the most recent runs, read
//! straight from the store. Nothing here talks to the inventory API or Slack.

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::config::Config;
use crate::db;
use crate::migrate;
use crate::models::{split_tags, RunRecord};
use crate::store::SqliteStore;

const RECENT_RUNS: i64 = 10;

pub async fn run_status(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::run_migrations(&pool).await?;
    let store = SqliteStore::new(pool);

    let active = store.active_events().await?;
    let total = store.count_events().await?;
    let runs = store.recent_runs(RECENT_RUNS).await?;

    println!("Disconnection Monitor Status");
    println!("============================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Audit dir:   {}", config.audit.dir.display());
    println!("  Episodes:    {} stored, {} active", total, active.len());

    if !active.is_empty() {
        println!();
        println!("  Active disconnections:");
        println!(
            "  {:>8}  {:<32} {:<6} {:<10}   {}",
            "ID", "EMAIL", "TYPE", "SINCE", "TAGS"
        );
        println!("  {}", "-".repeat(76));
        for e in &active {
            let tags = split_tags(&e.tags);
            println!(
                "  {:>8}  {:<32} {:<6} {:<10}   {}",
                e.account_id,
                clip(&e.from_email, 32),
                e.disconnection_type.as_str(),
                format_relative(e.detected_at, Utc::now()),
                if tags.is_empty() { "-".to_string() } else { tags.join(", ") }
            );
        }
    }

    println!();
    if runs.is_empty() {
        println!("  No runs recorded yet.");
    } else {
        println!("  Recent runs:");
        println!(
            "  {:<22} {:<9} {:<7} {:>4} {:>4} {:>4}   {}",
            "RUN", "MODE", "STATUS", "NEW", "RES", "OPEN", "STARTED"
        );
        println!("  {}", "-".repeat(76));
        for r in &runs {
            println!(
                "  {:<22} {:<9} {:<7} {:>4} {:>4} {:>4}   {}",
                r.check_run_id,
                r.mode.as_str(),
                run_status_label(r),
                r.summary.new_count,
                r.summary.resolved_count,
                r.summary.still_active_count,
                r.started_at.format("%Y-%m-%d %H:%M")
            );
        }
    }
    println!();

    store.pool().close().await;
    Ok(())
}

fn run_status_label(r: &RunRecord) -> String {
    match (r.succeeded, r.failed_stage.as_deref()) {
        (true, _) => "ok".to_string(),
        (false, Some(stage)) => format!("failed:{}", stage),
        (false, None) => "failed".to_string(),
    }
}

fn clip(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
        out.push('…');
        out
    }
}

/// "3 hours ago" style rendering, falling back to a date past 30 days.
fn format_relative(t: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let delta = (now - t).num_seconds();
    if delta < 0 {
        return t.format("%Y-%m-%d").to_string();
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        format!("{}m ago", delta / 60)
    } else if delta < 86400 {
        format!("{}h ago", delta / 3600)
    } else if delta < 86400 * 30 {
        format!("{}d ago", delta / 86400)
    } else {
        t.format("%Y-%m-%d").to_string()
    }
}
