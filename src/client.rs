//! Rate-limited retry client for the inventory API.
//!
//! Every request waits on the shared [`RateLimiter`] before it is sent, and
//! every call runs under [`retry::attempt`](crate::retry::attempt).
//!
//! Failure classification:
//! - network errors, HTTP 429 and 5xx → [`ApiError::Transient`]
//! - other HTTP 4xx → [`ApiError::Fatal`]
//! - a success status with a body that is not JSON → [`ApiError::Fatal`]

use reqwest::StatusCode;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::config::ApiConfig;
use crate::error::ApiError;
use crate::ratelimit::RateLimiter;
use crate::retry::{attempt, BackoffPolicy};

/// How the API key travels with each request.
#[derive(Debug, Clone)]
pub enum ApiAuth {
    /// `?api_key=...`
    Query(String),
    /// `Authorization: Bearer ...`
    Bearer(String),
}

pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    auth: ApiAuth,
    limiter: Arc<RateLimiter>,
    policy: BackoffPolicy,
}

impl ApiClient {
    pub fn new(
        base_url: &str,
        auth: ApiAuth,
        limiter: Arc<RateLimiter>,
        policy: BackoffPolicy,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Fatal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth,
            limiter,
            policy,
        })
    }

    /// Build a client from `[api]`, reading the key from the environment.
    pub fn from_config(config: &ApiConfig) -> anyhow::Result<Self> {
        let key = config.api_key()?;
        let auth = match config.auth.as_str() {
            "bearer" => ApiAuth::Bearer(key),
            _ => ApiAuth::Query(key),
        };
        let limiter = Arc::new(RateLimiter::new(
            config.rate_limit_requests,
            config.rate_limit_window(),
        ));
        let client = Self::new(
            &config.base_url,
            auth,
            limiter,
            config.backoff_policy(),
            Duration::from_secs(config.timeout_secs),
        )?;
        Ok(client)
    }

    /// `GET {base_url}/{path}` with query `params`, retried per policy.
    pub async fn get_json(&self, path: &str, params: &[(&str, String)]) -> Result<Value, ApiError> {
        let this = self;
        attempt(&self.policy, move |attempt_no| {
            this.send_once(path, params, attempt_no)
        })
        .await
    }

    async fn send_once(
        &self,
        path: &str,
        params: &[(&str, String)],
        attempt_no: u32,
    ) -> Result<Value, ApiError> {
        self.limiter.acquire().await;

        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        tracing::debug!(url = %url, attempt = attempt_no, "inventory request");

        let mut request = self.http.get(&url).query(params);
        request = match &self.auth {
            ApiAuth::Query(key) => request.query(&[("api_key", key.as_str())]),
            ApiAuth::Bearer(token) => request.bearer_auth(token),
        };

        let response = request
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| ApiError::Transient(format!("request to {} failed: {}", path, e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::Transient(format!("reading response body failed: {}", e)))?;

        if !status.is_success() {
            return Err(classify_status(status, &body));
        }

        serde_json::from_str(&body)
            .map_err(|e| ApiError::Fatal(format!("malformed JSON response from {}: {}", path, e)))
    }
}

/// Map a non-success HTTP status to an [`ApiError`].
pub fn classify_status(status: StatusCode, body: &str) -> ApiError {
    let msg = format!("HTTP {}: {}", status, truncate(body, 200));
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        ApiError::Transient(msg)
    } else {
        ApiError::Fatal(msg)
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status() {
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, "").is_transient());
        assert!(classify_status(StatusCode::BAD_GATEWAY, "").is_transient());
        assert!(classify_status(StatusCode::SERVICE_UNAVAILABLE, "").is_transient());
        assert!(!classify_status(StatusCode::UNAUTHORIZED, "").is_transient());
        assert!(!classify_status(StatusCode::NOT_FOUND, "").is_transient());
    }

    #[test]
    fn test_error_message_truncates_body() {
        let body = "x".repeat(1000);
        let err = classify_status(StatusCode::BAD_REQUEST, &body);
        assert!(err.to_string().len() < 300);
        assert!(err.to_string().contains("400"));
    }
}
