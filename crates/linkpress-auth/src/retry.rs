//! Bounded retry for provider HTTP calls.
//!
//! Provider endpoints rate-limit and flake. [`RetryPolicy`] wraps a request
//! in a bounded retry loop: transient failures (HTTP 429, 500, 502, 503,
//! 504, and connection errors) are retried with a backoff that doubles on
//! each attempt; anything else is returned to the caller on the first
//! attempt. The budget is attempts in total, not retries after the first.

use std::time::Duration;

use reqwest::StatusCode;

use crate::error::AuthError;

/// Retry policy for provider calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first (default: 4).
    pub max_attempts: u32,

    /// Backoff unit; attempt `n` sleeps `backoff * 2^(n-1)` before retrying
    /// (default: 2 seconds, giving 2s, 4s, 8s between the four attempts).
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Sets the total attempt budget.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Sets the backoff unit.
    #[must_use]
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Sends a request, retrying transient failures within the budget.
    ///
    /// `build` is invoked once per attempt to produce a fresh request.
    /// Non-retryable responses (including 4xx other than 429) are returned
    /// as `Ok`; the caller decides what a bad status means for its
    /// operation.
    ///
    /// # Errors
    ///
    /// Returns `UpstreamUnavailable` once the budget is exhausted.
    pub async fn send<F>(&self, operation: &str, build: F) -> Result<reqwest::Response, AuthError>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut last_failure = String::new();

        for attempt in 1..=self.max_attempts {
            match build().send().await {
                Ok(response) if !is_retryable_status(response.status()) => {
                    return Ok(response);
                }
                Ok(response) => {
                    last_failure = format!("HTTP {}", response.status().as_u16());
                }
                Err(e) => {
                    last_failure = e.to_string();
                }
            }

            if attempt < self.max_attempts {
                let delay = self.delay_for(attempt);
                tracing::warn!(
                    operation,
                    attempt,
                    max_attempts = self.max_attempts,
                    failure = %last_failure,
                    "Transient provider failure, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }

        Err(AuthError::upstream(format!(
            "{operation} failed after {} attempts: {last_failure}",
            self.max_attempts
        )))
    }

    /// Sleep before the retry that follows `attempt` (1-based): the backoff
    /// unit doubled for each attempt already spent.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff * 2u32.pow(attempt.saturating_sub(1))
    }
}

/// Returns `true` for statuses worth retrying.
#[must_use]
pub fn is_retryable_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 500 | 502 | 503 | 504)
}
