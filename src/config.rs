//! TOML configuration parsing.
//!
//! Secrets are never stored in the file. The `[api]` and `[slack]` sections
//! name the environment variables that hold the inventory API key and the
//! chat bot token, and [`ApiConfig::api_key`] / [`SlackConfig::token`] read
//! them at the point of use.
//!
//! ```toml
//! [db]
//! path = "./data/dcmon.sqlite"
//!
//! [api]
//! page_size = 100
//!
//! [slack]
//! channel = "#monitoring"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::retry::BackoffPolicy;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub api: ApiConfig,
    pub slack: SlackConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_accounts_path")]
    pub accounts_path: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// `"query"` sends `api_key` as a query parameter, `"bearer"` as an
    /// `Authorization` header.
    #[serde(default = "default_auth")]
    pub auth: String,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_rate_limit_requests")]
    pub rate_limit_requests: usize,
    #[serde(default = "default_rate_limit_window_secs")]
    pub rate_limit_window_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    #[serde(default = "default_true")]
    pub backoff_jitter: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            accounts_path: default_accounts_path(),
            api_key_env: default_api_key_env(),
            auth: default_auth(),
            page_size: default_page_size(),
            timeout_secs: default_timeout_secs(),
            rate_limit_requests: default_rate_limit_requests(),
            rate_limit_window_secs: default_rate_limit_window_secs(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            backoff_jitter: true,
        }
    }
}

fn default_base_url() -> String {
    "https://server.smartlead.ai/api/v1".to_string()
}
fn default_accounts_path() -> String {
    "email-accounts/".to_string()
}
fn default_api_key_env() -> String {
    "SMARTLEAD_API_KEY".to_string()
}
fn default_auth() -> String {
    "query".to_string()
}
fn default_page_size() -> usize {
    100
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_rate_limit_requests() -> usize {
    10
}
fn default_rate_limit_window_secs() -> u64 {
    2
}
fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    1000
}
fn default_backoff_max_ms() -> u64 {
    30_000
}
fn default_true() -> bool {
    true
}

impl ApiConfig {
    /// Read the inventory API key from the configured environment variable.
    pub fn api_key(&self) -> Result<String> {
        std::env::var(&self.api_key_env)
            .with_context(|| format!("{} environment variable not set", self.api_key_env))
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.backoff_base_ms),
            max_delay: Duration::from_millis(self.backoff_max_ms),
            jitter: self.backoff_jitter,
        }
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SlackConfig {
    pub channel: String,
    #[serde(default = "default_slack_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_max_table_rows")]
    pub max_table_rows: usize,
}

fn default_slack_api_base_url() -> String {
    "https://slack.com/api".to_string()
}
fn default_token_env() -> String {
    "SLACK_BOT_TOKEN".to_string()
}
fn default_max_table_rows() -> usize {
    50
}

impl SlackConfig {
    pub fn token(&self) -> Result<String> {
        std::env::var(&self.token_env)
            .with_context(|| format!("{} environment variable not set", self.token_env))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuditConfig {
    #[serde(default = "default_audit_dir")]
    pub dir: PathBuf,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            dir: default_audit_dir(),
        }
    }
}

fn default_audit_dir() -> PathBuf {
    PathBuf::from("./audit_logs")
}

#[derive(Debug, Deserialize, Clone)]
pub struct MonitorConfig {
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
    #[serde(default = "default_max_runtime_secs")]
    pub max_runtime_secs: u64,
    /// Run in baseline mode automatically when no successful run exists yet.
    #[serde(default = "default_true")]
    pub auto_baseline: bool,
    #[serde(default = "default_lock_stale_secs")]
    pub lock_stale_secs: i64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
            max_runtime_secs: default_max_runtime_secs(),
            auto_baseline: true,
            lock_stale_secs: default_lock_stale_secs(),
        }
    }
}

fn default_retention_days() -> i64 {
    30
}
fn default_max_runtime_secs() -> u64 {
    600
}
fn default_lock_stale_secs() -> i64 {
    1800
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate api
    if config.api.page_size == 0 {
        bail!("api.page_size must be > 0");
    }
    if config.api.rate_limit_requests == 0 || config.api.rate_limit_window_secs == 0 {
        bail!("api.rate_limit_requests and api.rate_limit_window_secs must be > 0");
    }
    if config.api.max_attempts == 0 {
        bail!("api.max_attempts must be >= 1");
    }
    match config.api.auth.as_str() {
        "query" | "bearer" => {}
        other => bail!("Unknown api.auth mode: '{}'. Must be query or bearer.", other),
    }

    // Validate slack
    if config.slack.channel.trim().is_empty() {
        bail!("slack.channel must not be empty");
    }

    // Validate monitor
    if config.monitor.retention_days < 1 {
        bail!("monitor.retention_days must be >= 1");
    }
    if config.monitor.max_runtime_secs == 0 {
        bail!("monitor.max_runtime_secs must be > 0");
    }

    Ok(config)
}
