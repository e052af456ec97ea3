//! Retry with exponential backoff.
//!
//! [`attempt`] runs an async operation until it succeeds, fails fatally, or
//! the attempt budget is spent. Delays come from a `backon` exponential
//! schedule:
//! - [`ApiError::Transient`] → sleep for the next delay and try again
//! - [`ApiError::Fatal`] → return immediately
//! - budget exhausted → the last transient error is surfaced as fatal
//!
//! Sleeping goes through `tokio::time`, so tests drive it with a paused clock.

use backon::{BackoffBuilder, ExponentialBuilder};
use std::future::Future;
use std::time::Duration;

use crate::error::ApiError;

#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl BackoffPolicy {
    /// Delays to sleep between attempts: `base × 2^n`, capped at `max_delay`.
    pub fn delays(&self) -> impl Iterator<Item = Duration> {
        let retries = self.max_attempts.saturating_sub(1) as usize;
        let builder = ExponentialBuilder::default()
            .with_min_delay(self.base_delay)
            .with_max_delay(self.max_delay)
            .with_factor(2.0)
            .with_max_times(retries);
        let builder = if self.jitter {
            builder.with_jitter()
        } else {
            builder
        };
        builder.build()
    }
}

/// Run `operation` under `policy`.
///
/// The closure receives the 1-based attempt number.
pub async fn attempt<T, F, Fut>(policy: &BackoffPolicy, mut operation: F) -> Result<T, ApiError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let mut delays = policy.delays();
    let mut attempt_no = 1;

    loop {
        match operation(attempt_no).await {
            Ok(value) => return Ok(value),
            Err(ApiError::Fatal(msg)) => return Err(ApiError::Fatal(msg)),
            Err(ApiError::Transient(msg)) => match delays.next() {
                Some(delay) => {
                    tracing::warn!(
                        attempt = attempt_no,
                        delay_ms = delay.as_millis() as u64,
                        error = %msg,
                        "transient failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt_no += 1;
                }
                None => {
                    return Err(ApiError::Fatal(format!(
                        "giving up after {} attempts: {}",
                        attempt_no, msg
                    )))
                }
            },
        }
    }
}
