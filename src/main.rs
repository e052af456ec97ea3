//! # Disconnect Monitor CLI (`dcmon`)
//!
//! Meant to be run on a schedule (cron, systemd timer, Task Scheduler).
//! Each `dcmon check` is one self-contained run; state between runs lives
//! only in the SQLite database.
//!
//! ## Usage
//!
//! ```bash
//! dcmon --config ./config/dcmon.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `dcmon init` | Create the SQLite database and run schema migrations |
//! | `dcmon check` | Fetch the inventory, record changes, alert on new disconnections |
//! | `dcmon check --first-run` | Same, but record only (no alert) |
//! | `dcmon status` | Show active disconnections and recent runs |
//! | `dcmon cleanup` | Purge resolved episodes past retention |
//!
//! Log verbosity is controlled by `DCMON_LOG` (default `info`). Logs go to
//! stderr; command output goes to stdout.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use disconnect_monitor::{config, db, migrate, monitor, status};

/// Disconnect Monitor: one alert per SMTP/IMAP disconnection episode.
#[derive(Parser)]
#[command(
    name = "dcmon",
    about = "Detects SMTP/IMAP disconnections in an email-sending platform and alerts Slack once per episode",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/dcmon.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Run one check.
    Check {
        /// Record the current disconnections without alerting.
        ///
        /// Use this once when deploying, so accounts that are already
        /// broken do not produce a flood of alerts.
        #[arg(long)]
        first_run: bool,
    },

    /// Show active disconnections and recent runs.
    Status,

    /// Delete resolved episodes older than the retention window.
    ///
    /// Audit CSV files are never touched.
    Cleanup {
        /// Retention in days. Defaults to `monitor.retention_days`.
        #[arg(long)]
        days: Option<i64>,
    },
}

/// Initialize tracing with the DCMON_LOG environment variable.
///
/// Defaults to "info" level if DCMON_LOG is not set.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env("DCMON_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Check { first_run } => {
            monitor::run_check(&cfg, first_run).await?;
        }
        Commands::Status => {
            status::run_status(&cfg).await?;
        }
        Commands::Cleanup { days } => {
            monitor::run_cleanup(&cfg, days).await?;
        }
    }

    Ok(())
}
