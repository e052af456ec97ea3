//! Chat notifications.
//!
//! The [`Notifier`] sends at most one disconnection alert per run, and only
//! when the run opened new episodes. Operational failures go out as a
//! separate error alert regardless of that rule.
//!
//! Delivery goes through a [`ChatSink`]. [`SlackSink`] posts to
//! `chat.postMessage`, retrying transient failures with the same backoff
//! policy as the inventory client:
//! - HTTP 429 / 5xx, network errors, `ratelimited` → retry
//! - token or channel permission errors → [`NotifyError::Auth`], never retried
//! - any other `ok: false` → [`NotifyError::Delivery`]

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::client::classify_status;
use crate::error::{ApiError, NotifyError, Stage};
use crate::models::{split_tags, CheckRun, DisconnectionEvent, RunSummary};
use crate::retry::{attempt, BackoffPolicy};

/// Capability to post a text message to a channel.
#[async_trait]
pub trait ChatSink: Send + Sync {
    async fn post_message(&self, channel: &str, text: &str) -> Result<(), NotifyError>;
}

/// Slack error codes that mean the token or channel is misconfigured.
const AUTH_ERRORS: &[&str] = &[
    "invalid_auth",
    "not_authed",
    "account_inactive",
    "token_revoked",
    "token_expired",
    "no_permission",
    "missing_scope",
    "channel_not_found",
    "not_in_channel",
    "is_archived",
];

pub struct SlackSink {
    http: reqwest::Client,
    api_base_url: String,
    token: String,
    policy: BackoffPolicy,
}

impl SlackSink {
    pub fn new(
        api_base_url: &str,
        token: String,
        policy: BackoffPolicy,
        timeout: Duration,
    ) -> Result<Self, NotifyError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifyError::Delivery(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            token,
            policy,
        })
    }

    /// One delivery attempt.
    ///
    /// The outer error drives retries; the inner result carries outcomes
    /// that must not be retried.
    async fn post_once(
        &self,
        channel: &str,
        text: &str,
    ) -> Result<Result<(), NotifyError>, ApiError> {
        let body = serde_json::json!({
            "channel": channel,
            "text": text,
            "mrkdwn": true,
        });

        let response = self
            .http
            .post(format!("{}/chat.postMessage", self.api_base_url))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| ApiError::Transient(format!("chat request failed: {}", e)))?;

        let status = response.status();
        let body_text = response
            .text()
            .await
            .map_err(|e| ApiError::Transient(format!("reading chat response failed: {}", e)))?;

        if !status.is_success() {
            return Err(classify_status(status, &body_text));
        }

        let json: Value = serde_json::from_str(&body_text)
            .map_err(|e| ApiError::Fatal(format!("malformed chat response: {}", e)))?;

        if json.get("ok").and_then(Value::as_bool) == Some(true) {
            return Ok(Ok(()));
        }

        let code = json
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown_error")
            .to_string();

        if code == "ratelimited" {
            Err(ApiError::Transient(code))
        } else if AUTH_ERRORS.contains(&code.as_str()) {
            Ok(Err(NotifyError::Auth(code)))
        } else {
            Ok(Err(NotifyError::Delivery(code)))
        }
    }
}

#[async_trait]
impl ChatSink for SlackSink {
    async fn post_message(&self, channel: &str, text: &str) -> Result<(), NotifyError> {
        let this = self;
        match attempt(&self.policy, move |_| this.post_once(channel, text)).await {
            Ok(outcome) => outcome,
            Err(e) => Err(e.into()),
        }
    }
}

pub struct Notifier {
    sink: Arc<dyn ChatSink>,
    channel: String,
    max_rows: usize,
}

impl Notifier {
    pub fn new(sink: Arc<dyn ChatSink>, channel: &str, max_rows: usize) -> Self {
        Self {
            sink,
            channel: channel.to_string(),
            max_rows,
        }
    }

    /// Send the disconnection alert for `run`.
    ///
    /// Returns `Ok(false)` without sending anything when there are no new
    /// episodes.
    pub async fn notify(
        &self,
        run: &CheckRun,
        new_events: &[DisconnectionEvent],
        summary: &RunSummary,
    ) -> Result<bool, NotifyError> {
        if new_events.is_empty() {
            tracing::info!(run_id = %run.check_run_id, "no new disconnections to report");
            return Ok(false);
        }

        let text = format_alert(run, new_events, summary, self.max_rows);
        self.sink.post_message(&self.channel, &text).await?;
        tracing::info!(
            run_id = %run.check_run_id,
            accounts = new_events.len(),
            "disconnection alert sent"
        );
        Ok(true)
    }

    pub async fn notify_error(
        &self,
        run: &CheckRun,
        stage: Stage,
        error: &str,
    ) -> Result<(), NotifyError> {
        let text = format_error_alert(run, stage, error);
        self.sink.post_message(&self.channel, &text).await
    }
}

pub fn format_alert(
    run: &CheckRun,
    events: &[DisconnectionEvent],
    summary: &RunSummary,
    max_rows: usize,
) -> String {
    let mut msg = format!(
        ":red_circle: *{} New Account Disconnection(s) Detected*\n",
        events.len()
    );
    msg.push_str(&format!(
        "_Check Time: {}_\n",
        run.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    msg.push_str(&format!("_Run ID: {}_\n\n", run.check_run_id));

    let counts = &summary.by_type;
    if counts.both > 0 {
        msg.push_str(&format!("• Both SMTP & IMAP: {} accounts\n", counts.both));
    }
    if counts.smtp > 0 {
        msg.push_str(&format!("• SMTP Only: {} accounts\n", counts.smtp));
    }
    if counts.imap > 0 {
        msg.push_str(&format!("• IMAP Only: {} accounts\n", counts.imap));
    }

    let rows: Vec<Vec<String>> = events
        .iter()
        .take(max_rows)
        .map(|e| {
            vec![
                e.account_id.to_string(),
                clip(&e.from_email, 30),
                clip(&e.from_name, 20),
                e.account_type.clone(),
                e.disconnection_type.to_string(),
                first_tags(&e.tags, 3),
            ]
        })
        .collect();

    msg.push_str("\n```\n");
    msg.push_str(&render_table(
        &["ID", "Email", "Name", "Type", "Disconnection", "Tags"],
        &rows,
    ));
    msg.push_str("```");

    if events.len() > max_rows {
        msg.push_str(&format!(
            "\n_... and {} more accounts_",
            events.len() - max_rows
        ));
    }

    msg.push_str("\n\n*Recommended Actions:*\n");
    msg.push_str("1. Check the affected email accounts in the sending platform dashboard\n");
    msg.push_str("2. Verify email provider connectivity\n");
    msg.push_str("3. Re-authenticate affected accounts if needed\n");
    msg
}

pub fn format_error_alert(run: &CheckRun, stage: Stage, error: &str) -> String {
    format!(
        ":warning: *Disconnection Monitor Error*\n\
         _Time: {}_\n\
         _Run ID: {}_\n\
         _Stage: {}_\n\n\
         ```{}```\n\
         The monitor will retry on the next scheduled run.",
        run.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
        run.check_run_id,
        stage,
        clip(error, 1500)
    )
}

/// Plain fixed-width table: header, dashed rule, rows.
fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.chars().count());
        }
    }

    let line = |cells: &[String]| -> String {
        let padded: Vec<String> = cells
            .iter()
            .zip(&widths)
            .map(|(c, w)| format!("{:<width$}", c, width = *w))
            .collect();
        format!("{}\n", padded.join("  ").trim_end())
    };

    let header: Vec<String> = headers.iter().map(|h| h.to_string()).collect();
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();

    let mut out = line(&header);
    out.push_str(&line(&rule));
    for row in rows {
        out.push_str(&line(row));
    }
    out
}

fn clip(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

fn first_tags(tags: &str, n: usize) -> String {
    let picked: Vec<String> = split_tags(tags).into_iter().take(n).collect();
    if picked.is_empty() {
        "None".to_string()
    } else {
        picked.join(", ")
    }
}
