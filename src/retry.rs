//! One retry loop for every outbound call
//!
//! Both the token exchange and the Gmail calls go through [`retry_with`]; they differ only in
//! their [`RetryPolicy`] and in how they classify a failure.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::IngestError;

/// What to do after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Give up and return the error
    Stop,
    /// Wait the policy's scheduled delay for this attempt
    Retry,
    /// Wait what the server asked for (capped by the policy)
    RetryAfter(Duration),
}

/// Attempt budget plus backoff schedule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before attempt `n + 1` is `delays[n - 1]`; the last entry repeats
    pub delays: Vec<Duration>,
    /// Upper bound on a server-provided delay
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Token exchange: one attempt plus three retries at 1s, 2s, 4s
    pub fn token_exchange() -> Self {
        Self {
            max_attempts: 4,
            delays: vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
            ],
            max_delay: Duration::from_secs(4),
        }
    }

    /// Gmail calls: five attempts on the 2/5/15/30/60s ladder, `Retry-After` capped at 60s
    pub fn gmail_api() -> Self {
        Self {
            max_attempts: 5,
            delays: [2, 5, 15, 30, 60].into_iter().map(Duration::from_secs).collect(),
            max_delay: Duration::from_secs(60),
        }
    }

    /// A policy with the same shape but custom delays (tests, tuning)
    pub fn with_delays(max_attempts: u32, delays: Vec<Duration>, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            delays,
            max_delay,
        }
    }

    /// Scheduled delay after the given (1-based) failed attempt
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if self.delays.is_empty() {
            return Duration::ZERO;
        }
        let index = (attempt.saturating_sub(1) as usize).min(self.delays.len() - 1);
        self.delays[index]
    }

    fn resolve_delay(&self, decision: RetryDecision, attempt: u32) -> Option<Duration> {
        match decision {
            RetryDecision::Stop => None,
            RetryDecision::Retry => Some(self.delay_for(attempt)),
            RetryDecision::RetryAfter(requested) => Some(requested.min(self.max_delay)),
        }
    }
}

/// Classification used for Gmail calls: back off on rate limits, timeouts and network errors
pub fn classify_gmail_error(error: &IngestError) -> RetryDecision {
    match error {
        IngestError::RateLimitExceeded {
            retry_after: Some(seconds),
        } => RetryDecision::RetryAfter(Duration::from_secs(*seconds)),
        e if e.is_transient() => RetryDecision::Retry,
        _ => RetryDecision::Stop,
    }
}

/// Execute an async operation under `policy`, sleeping between attempts
pub async fn retry_with<T, E, F, Fut, C>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut classify: C,
    mut operation: F,
) -> std::result::Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    C: FnMut(&E) -> RetryDecision,
    E: Display,
{
    let mut attempts = 0;

    loop {
        attempts += 1;
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if attempts < policy.max_attempts => {
                let Some(delay) = policy.resolve_delay(classify(&e), attempts) else {
                    return Err(e);
                };
                warn!(
                    "{} failed (attempt {}/{}): {}. Retrying in {:?}...",
                    operation_name, attempts, policy.max_attempts, e, delay
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
