//! Sliding-window request limiter.
//!
//! Allows at most `max_requests` acquisitions in any window of length
//! `window`. A caller that finds the window full sleeps until the oldest
//! acquisition ages out; it never fails. One limiter is shared by every
//! request of a run, so pagination and retries draw from the same budget.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    issued: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests: max_requests.max(1),
            window,
            issued: Mutex::new(VecDeque::with_capacity(max_requests)),
        }
    }

    /// Wait for a free slot, then claim it.
    ///
    /// The slot is stamped at the moment it is granted, after any sleep, so
    /// sleeping alone never consumes budget.
    pub async fn acquire(&self) {
        let mut issued = self.issued.lock().await;
        loop {
            let now = Instant::now();
            while let Some(&oldest) = issued.front() {
                if now.duration_since(oldest) >= self.window {
                    issued.pop_front();
                } else {
                    break;
                }
            }

            if issued.len() < self.max_requests {
                issued.push_back(now);
                return;
            }

            // Holding the lock while sleeping keeps waiters in FIFO order.
            if let Some(&oldest) = issued.front() {
                let wake = oldest + self.window;
                tracing::debug!(
                    wait_ms = wake.saturating_duration_since(now).as_millis() as u64,
                    "rate limit reached, sleeping"
                );
                tokio::time::sleep_until(wake).await;
            }
        }
    }

    /// Number of slots claimed within the current window.
    pub async fn in_flight(&self) -> usize {
        let issued = self.issued.lock().await;
        let now = Instant::now();
        issued
            .iter()
            .filter(|t| now.duration_since(**t) < self.window)
            .count()
    }
}
