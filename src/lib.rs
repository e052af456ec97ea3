//! # Disconnect Monitor
//!
//! Watches the email accounts of an email-sending platform and posts a Slack
//! alert the first time each account's SMTP or IMAP connection is seen
//! broken. Every disconnection episode is alerted exactly once: later runs
//! that still see the account broken stay quiet, and recovery closes the
//! episode silently.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────┐   ┌──────────────┐   ┌─────────┐
//! │  Inventory  │──▶│   Diff   │──▶│  Audit CSV + │──▶│  Slack  │
//! │  API pages  │   │  engine  │   │  SQLite      │   │  alert  │
//! └─────────────┘   └────▲─────┘   └──────┬───────┘   └─────────┘
//!                        │  active set    │
//!                        └────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! dcmon init                 # create database
//! dcmon check --first-run    # record the current state, no alert
//! dcmon check                # scheduled run
//! dcmon status               # active disconnections and recent runs
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Accounts, episodes, runs |
//! | [`error`] | Per-stage error types |
//! | [`ratelimit`] | Sliding-window request limiter |
//! | [`retry`] | Exponential backoff for transient failures |
//! | [`client`] | Inventory HTTP client |
//! | [`fetcher`] | Paginated inventory fetch and record normalization |
//! | [`diff`] | Episode classification |
//! | [`store`] | Durable episode store, run history, run lock |
//! | [`audit`] | Monthly append-only CSV log |
//! | [`writer`] | Audit-then-store commit |
//! | [`notifier`] | Slack alert formatting and delivery |
//! | [`monitor`] | Check pipeline |
//! | [`status`] | `dcmon status` report |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod audit;
pub mod client;
pub mod config;
pub mod db;
pub mod diff;
pub mod error;
pub mod fetcher;
pub mod migrate;
pub mod models;
pub mod monitor;
pub mod notifier;
pub mod ratelimit;
pub mod retry;
pub mod status;
pub mod store;
pub mod writer;
