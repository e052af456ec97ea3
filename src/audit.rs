//! Append-only CSV audit log.
//!
//! One file per calendar month (`disconnections_YYYYMM.csv`), one row per
//! event written. Files are only ever opened in append mode; nothing in this
//! crate truncates or prunes them. A header row is written when a file is
//! first created.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use crate::error::AuditError;
use crate::models::{CheckRun, DisconnectionEvent};

/// What happened to the episode in the run that wrote the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    Detected,
    Resolved,
}

impl AuditAction {
    fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Detected => "detected",
            AuditAction::Resolved => "resolved",
        }
    }
}

#[derive(Debug, Serialize)]
struct AuditRow<'a> {
    timestamp: String,
    check_run_id: &'a str,
    action: &'a str,
    account_id: i64,
    from_name: &'a str,
    from_email: &'a str,
    account_type: &'a str,
    disconnection_type: &'a str,
    tags: &'a str,
    detected_at: String,
    resolved_at: String,
    client_id: &'a str,
    message_per_day: Option<i64>,
    daily_sent_count: Option<i64>,
}

const HEADER: [&str; 14] = [
    "timestamp",
    "check_run_id",
    "action",
    "account_id",
    "from_name",
    "from_email",
    "account_type",
    "disconnection_type",
    "tags",
    "detected_at",
    "resolved_at",
    "client_id",
    "message_per_day",
    "daily_sent_count",
];

pub struct AuditLog {
    dir: PathBuf,
}

impl AuditLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File that rows written at `at` go to.
    pub fn file_for(&self, at: DateTime<Utc>) -> PathBuf {
        self.dir
            .join(format!("disconnections_{}.csv", at.format("%Y%m")))
    }

    /// Append one row per event. Returns the number of rows written.
    pub fn append(
        &self,
        run: &CheckRun,
        entries: &[(AuditAction, &DisconnectionEvent)],
    ) -> Result<usize, AuditError> {
        if entries.is_empty() {
            return Ok(0);
        }

        std::fs::create_dir_all(&self.dir)?;
        let path = self.file_for(run.started_at);
        let is_new = !path.exists() || std::fs::metadata(&path)?.len() == 0;

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        if is_new {
            writer.write_record(HEADER)?;
        }

        let timestamp = iso(run.started_at);
        for (action, event) in entries {
            writer.serialize(AuditRow {
                timestamp: timestamp.clone(),
                check_run_id: &run.check_run_id,
                action: action.as_str(),
                account_id: event.account_id,
                from_name: &event.from_name,
                from_email: &event.from_email,
                account_type: &event.account_type,
                disconnection_type: event.disconnection_type.as_str(),
                tags: &event.tags,
                detected_at: iso(event.detected_at),
                resolved_at: event.resolved_at.map(iso).unwrap_or_default(),
                client_id: event.client_id.as_deref().unwrap_or_default(),
                message_per_day: event.message_per_day,
                daily_sent_count: event.daily_sent_count,
            })?;
        }
        writer.flush()?;

        Ok(entries.len())
    }
}

fn iso(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DisconnectionType, RunMode};
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn event(id: i64, name: &str) -> DisconnectionEvent {
        DisconnectionEvent {
            account_id: id,
            from_name: name.to_string(),
            from_email: format!("{}@example.com", id),
            account_type: "GMAIL".to_string(),
            disconnection_type: DisconnectionType::Imap,
            tags: "a,b".to_string(),
            client_id: Some("77".to_string()),
            message_per_day: Some(40),
            daily_sent_count: None,
            detected_at: Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap(),
            resolved_at: None,
            is_active: true,
            check_run_id: "r0".to_string(),
        }
    }

    #[test]
    fn test_append_writes_header_once() {
        let tmp = TempDir::new().unwrap();
        let log = AuditLog::new(tmp.path().join("audit"));
        let run = CheckRun::new(Utc.with_ymd_and_hms(2026, 2, 3, 4, 5, 6).unwrap(), RunMode::Normal);

        let a = event(1, "Alpha");
        let b = event(2, "Beta, \"quoted\"");
        log.append(&run, &[(AuditAction::Detected, &a)]).unwrap();
        log.append(&run, &[(AuditAction::Detected, &b), (AuditAction::Resolved, &a)])
            .unwrap();

        let path = log.file_for(run.started_at);
        assert!(path.ends_with("disconnections_202602.csv"));

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(headers.len(), HEADER.len());
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 3);
        assert_eq!(&rows[1][4], "Beta, \"quoted\"");
        assert_eq!(&rows[2][2], "resolved");
        assert_eq!(&rows[0][1], run.check_run_id.as_str());
        assert_eq!(&headers[12], "message_per_day");
        assert_eq!(&rows[0][11], "77");
        assert_eq!(&rows[0][12], "40");
        assert_eq!(&rows[0][13], "");
    }

    #[test]
    fn test_empty_append_creates_nothing() {
        let tmp = TempDir::new().unwrap();
        let log = AuditLog::new(tmp.path().join("audit"));
        let run = CheckRun::new(Utc::now(), RunMode::Normal);
        assert_eq!(log.append(&run, &[]).unwrap(), 0);
        assert!(!log.dir().exists());
    }
}
