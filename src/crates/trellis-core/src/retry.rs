//! Retry policy and backoff for provider and handler calls.
//!
//! Every provider error flows through [`retry_with_backoff`] before the
//! scheduler applies the node's `errorHandling` mode. Delays honour the
//! provider's `Retry-After`/reset hints when present and fall back to
//! exponential backoff; sleeps wake immediately on cancellation.

use crate::error::{EngineError, ErrorCode, Result, RetryTrace};
use crate::workflow::RetrySettings;
use chrono::Utc;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Error codes never retried unless the node opts in explicitly.
pub fn default_skip_on() -> Vec<ErrorCode> {
    vec![
        ErrorCode::Auth,
        ErrorCode::Validation,
        ErrorCode::ExtensionValidationError,
    ]
}

/// Fully-resolved retry policy for one node.
#[derive(Debug, Clone)]
pub struct RetryPlan {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    /// Base delay for exponential backoff.
    pub base_delay: Duration,
    /// Upper bound on any computed delay.
    pub max_delay: Duration,
    /// Only these codes are retried; empty means every non-skipped code.
    pub retry_on: Vec<ErrorCode>,
    /// Codes that abort retrying immediately.
    pub skip_on: Vec<ErrorCode>,
    /// Add up to 25% random jitter to computed delays.
    pub jitter: bool,
}

impl Default for RetryPlan {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(60),
            retry_on: Vec::new(),
            skip_on: default_skip_on(),
            jitter: false,
        }
    }
}

impl RetryPlan {
    /// Resolve a node's settings against the executor defaults.
    pub fn resolve(
        settings: Option<&RetrySettings>,
        default_max_retries: u32,
        default_base_delay: Duration,
    ) -> Self {
        match settings {
            Some(s) => Self {
                max_retries: s.max_retries,
                base_delay: Duration::from_millis(s.base_delay),
                max_delay: s
                    .max_delay
                    .map(Duration::from_millis)
                    .unwrap_or(Duration::from_secs(60)),
                retry_on: s.retry_on.clone(),
                skip_on: if s.skip_on.is_empty() {
                    default_skip_on()
                } else {
                    s.skip_on.clone()
                },
                jitter: false,
            },
            None => Self {
                max_retries: default_max_retries,
                base_delay: default_base_delay,
                ..Default::default()
            },
        }
    }

    /// Decide whether another attempt is allowed after `attempts` failures
    /// classified as `code`.
    ///
    /// The first failure has used no retries yet, so `max_retries` retries
    /// remain available after the initial attempt.
    pub fn should_retry(&self, attempts: u32, code: ErrorCode) -> bool {
        if attempts > self.max_retries {
            return false;
        }
        if self.skip_on.contains(&code) {
            return false;
        }
        self.retry_on.is_empty() || self.retry_on.contains(&code)
    }

    /// Delay before retry number `attempt` (1-based).
    ///
    /// Provider hints win: an explicit `Retry-After` or rate-limit reset
    /// instant is used (capped by `max_delay`); otherwise exponential
    /// backoff from `base_delay`.
    pub fn suggested_delay(&self, attempt: u32, error: &EngineError) -> Duration {
        if let Some(rl) = error.rate_limit() {
            if let Some(secs) = rl.retry_after {
                return Duration::from_secs_f64(secs.max(0.0)).min(self.max_delay);
            }
            if let Some(reset_at) = rl.reset_at {
                let wait = (reset_at - Utc::now()).num_milliseconds().max(0) as u64;
                return Duration::from_millis(wait).min(self.max_delay);
            }
        }

        let exponent = attempt.saturating_sub(1).min(31);
        let backoff = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.max_delay);

        if self.jitter {
            let factor = 1.0 + rand::random::<f64>() * 0.25;
            Duration::from_secs_f64(backoff.as_secs_f64() * factor).min(self.max_delay)
        } else {
            backoff
        }
    }
}

/// Sleep that wakes immediately when the run is cancelled.
pub async fn sleep_cancellable(duration: Duration, signal: &CancellationToken) -> Result<()> {
    tokio::select! {
        _ = signal.cancelled() => Err(EngineError::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

/// Run `operation` through the retry policy.
///
/// Returns the final result plus the trace of failed attempts for the
/// failure envelope. Cancellation is never retried and surfaces as-is.
pub async fn retry_with_backoff<T, F, Fut>(
    plan: &RetryPlan,
    signal: &CancellationToken,
    label: &str,
    mut operation: F,
) -> (Result<T>, RetryTrace)
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut trace = RetryTrace {
        max_attempts: plan.max_retries,
        ..Default::default()
    };

    let mut attempts = 0u32;
    loop {
        if signal.is_cancelled() {
            return (Err(EngineError::Cancelled), trace);
        }

        match operation(attempts).await {
            Ok(value) => {
                if attempts > 0 {
                    info!(operation = label, attempts, "operation succeeded after retry");
                }
                return (Ok(value), trace);
            }
            Err(e) if e.is_cancelled() => return (Err(e), trace),
            Err(e) => {
                attempts += 1;
                let code = e.code();
                trace.record(attempts, e.to_string());
                debug!(operation = label, attempt = attempts, code = %code, error = %e, "attempt failed");

                if !plan.should_retry(attempts, code) {
                    if attempts > 1 || plan.max_retries > 0 {
                        warn!(operation = label, attempts, code = %code, "retries exhausted or not retryable");
                    }
                    return (Err(e), trace);
                }

                let delay = plan.suggested_delay(attempts, &e);
                debug!(operation = label, delay_ms = delay.as_millis() as u64, "backing off");
                if let Err(cancelled) = sleep_cancellable(delay, signal).await {
                    return (Err(cancelled), trace);
                }
            }
        }
    }
}
