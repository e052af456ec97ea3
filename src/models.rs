//! Core data models used throughout the monitor.
//!
//! These types represent the accounts observed in one run, the disconnection
//! episodes persisted across runs, and the bookkeeping for a single run.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// One email account as observed in the current run.
///
/// Rebuilt from the inventory API on every run and never persisted directly.
#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub account_id: i64,
    pub from_name: String,
    pub from_email: String,
    pub account_type: String,
    pub smtp_ok: bool,
    pub imap_ok: bool,
    pub tags: Vec<String>,
    pub client_id: Option<String>,
    pub message_per_day: Option<i64>,
    pub daily_sent_count: Option<i64>,
}

impl Account {
    pub fn is_disconnected(&self) -> bool {
        !self.smtp_ok || !self.imap_ok
    }

    /// Which side of the connection is broken, or `None` when healthy.
    pub fn disconnection_type(&self) -> Option<DisconnectionType> {
        match (self.smtp_ok, self.imap_ok) {
            (false, false) => Some(DisconnectionType::Both),
            (false, true) => Some(DisconnectionType::Smtp),
            (true, false) => Some(DisconnectionType::Imap),
            (true, true) => None,
        }
    }

    pub fn tags_joined(&self) -> String {
        join_tags(&self.tags)
    }
}

/// Join tag names into the stored comma-separated form. Commas and
/// backslashes inside a name are escaped with a backslash.
pub fn join_tags(tags: &[String]) -> String {
    tags.iter()
        .map(|t| t.replace('\\', "\\\\").replace(',', "\\,"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Inverse of [`join_tags`]. Empty names are dropped.
pub fn split_tags(joined: &str) -> Vec<String> {
    let mut tags = Vec::new();
    let mut current = String::new();
    let mut chars = joined.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            ',' => tags.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    tags.push(current);
    tags.into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DisconnectionType {
    Smtp,
    Imap,
    Both,
}

impl DisconnectionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectionType::Smtp => "SMTP",
            DisconnectionType::Imap => "IMAP",
            DisconnectionType::Both => "BOTH",
        }
    }
}

impl fmt::Display for DisconnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DisconnectionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SMTP" => Ok(DisconnectionType::Smtp),
            "IMAP" => Ok(DisconnectionType::Imap),
            "BOTH" => Ok(DisconnectionType::Both),
            other => Err(format!("unknown disconnection type: '{}'", other)),
        }
    }
}

/// A single disconnection episode for one account.
///
/// `(account_id, detected_at)` identifies the episode. The account snapshot
/// fields are captured when the episode opens and never rewritten.
#[derive(Debug, Clone, PartialEq)]
pub struct DisconnectionEvent {
    pub account_id: i64,
    pub from_name: String,
    pub from_email: String,
    pub account_type: String,
    pub disconnection_type: DisconnectionType,
    pub tags: String,
    pub client_id: Option<String>,
    pub message_per_day: Option<i64>,
    pub daily_sent_count: Option<i64>,
    pub detected_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub check_run_id: String,
}

impl DisconnectionEvent {
    /// Open a new episode for `account`. Returns `None` if it is healthy.
    pub fn open(account: &Account, run: &CheckRun) -> Option<Self> {
        let disconnection_type = account.disconnection_type()?;
        Some(Self {
            account_id: account.account_id,
            from_name: account.from_name.clone(),
            from_email: account.from_email.clone(),
            account_type: account.account_type.clone(),
            disconnection_type,
            tags: account.tags_joined(),
            client_id: account.client_id.clone(),
            message_per_day: account.message_per_day,
            daily_sent_count: account.daily_sent_count,
            detected_at: run.started_at,
            resolved_at: None,
            is_active: true,
            check_run_id: run.check_run_id.clone(),
        })
    }

    /// Close this episode as of `run`. `check_run_id` keeps the run that
    /// opened it.
    pub fn resolve(&self, run: &CheckRun) -> Self {
        Self {
            resolved_at: Some(run.started_at),
            is_active: false,
            ..self.clone()
        }
    }
}

/// Bookkeeping for a single invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckRun {
    pub check_run_id: String,
    pub started_at: DateTime<Utc>,
    pub mode: RunMode,
}

impl CheckRun {
    /// Start a run at `started_at`, truncated to whole seconds to match the
    /// resolution of the durable store.
    pub fn new(started_at: DateTime<Utc>, mode: RunMode) -> Self {
        let started_at = started_at.trunc_subsecs(0);
        Self {
            check_run_id: generate_run_id(started_at),
            started_at,
            mode,
        }
    }
}

/// Build a run id of the form `YYYYMMDDHHMMSS_xxxxxx`.
///
/// The suffix is a hash of the nanosecond timestamp and process id so two
/// runs started in the same second still get distinct ids.
pub fn generate_run_id(at: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(at.timestamp_nanos_opt().unwrap_or_default().to_le_bytes());
    hasher.update(Utc::now().timestamp_nanos_opt().unwrap_or_default().to_le_bytes());
    hasher.update(std::process::id().to_le_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("{}_{}", at.format("%Y%m%d%H%M%S"), &digest[..6])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Normal,
    /// Record current disconnections without alerting.
    Baseline,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Normal => "normal",
            RunMode::Baseline => "baseline",
        }
    }
}

/// Counts of new episodes per disconnection type, used in the alert header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TypeCounts {
    pub smtp: usize,
    pub imap: usize,
    pub both: usize,
}

impl TypeCounts {
    pub fn from_events(events: &[DisconnectionEvent]) -> Self {
        let mut counts = Self::default();
        for event in events {
            match event.disconnection_type {
                DisconnectionType::Smtp => counts.smtp += 1,
                DisconnectionType::Imap => counts.imap += 1,
                DisconnectionType::Both => counts.both += 1,
            }
        }
        counts
    }
}

/// Per-run outcome counts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub total_accounts: usize,
    pub new_count: usize,
    pub resolved_count: usize,
    pub still_active_count: usize,
    pub unobserved_count: usize,
    pub by_type: TypeCounts,
}

/// A row in the run history table.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRecord {
    pub check_run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub mode: RunMode,
    pub succeeded: bool,
    pub failed_stage: Option<String>,
    pub summary: RunSummary,
    pub error: Option<String>,
}
