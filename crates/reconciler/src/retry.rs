//! Bounded-time retry for transient remote errors.
//!
//! Only errors the classifier marks as conflict or throttling are retried.
//! Once the time budget is spent, one last attempt is made unconditionally
//! so a call that was about to succeed is not lost to the deadline.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::{deadline_after, duration_millis};
use crate::service::ErrorClassifier;

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total time budget for retrying.
    #[serde(with = "duration_millis", default = "default_timeout")]
    pub timeout: Duration,
    /// Delay after the first transient failure.
    #[serde(with = "duration_millis", default = "default_initial_delay")]
    pub initial_delay: Duration,
    /// Maximum delay between attempts (caps exponential growth).
    #[serde(with = "duration_millis", default = "default_max_delay")]
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each failure.
    #[serde(default = "default_multiplier")]
    pub backoff_multiplier: f64,
}

const fn default_timeout() -> Duration {
    Duration::from_secs(120)
}

const fn default_initial_delay() -> Duration {
    Duration::from_millis(500)
}

const fn default_max_delay() -> Duration {
    Duration::from_secs(10)
}

const fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_multiplier(),
        }
    }
}

impl RetryPolicy {
    /// Create a policy with the given time budget and default delays.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Default::default()
        }
    }

    /// Set the initial delay.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the maximum delay.
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the backoff multiplier.
    #[must_use]
    pub const fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Delay after the `failures`-th consecutive transient failure (1-indexed).
    pub fn delay_after(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(failures.saturating_sub(1)).unwrap_or(i32::MAX);
        let factor = self.backoff_multiplier.max(1.0).powi(exponent);
        let scaled = self.initial_delay.as_secs_f64() * factor;
        let capped = scaled.min(self.max_delay.as_secs_f64());
        Duration::try_from_secs_f64(capped).unwrap_or(self.max_delay)
    }
}

/// Outcome of a retried call.
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    /// The final result.
    pub result: Result<T, E>,
    /// Number of invocations made.
    pub attempts: u32,
    /// Whether the budget ran out and the final unconditional attempt ran.
    pub exhausted: bool,
    /// Total time spent (including delays).
    pub total_duration: Duration,
}

impl<T, E> RetryOutcome<T, E> {
    /// Check if the call eventually succeeded.
    pub const fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// Drop the metadata.
    pub fn into_result(self) -> Result<T, E> {
        self.result
    }
}

/// Run `operation`, retrying transient failures within `policy.timeout`.
pub async fn with_retry<T, E, F, Fut, C>(
    policy: &RetryPolicy,
    classifier: &C,
    mut operation: F,
) -> RetryOutcome<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: ErrorClassifier<E> + ?Sized,
    E: std::fmt::Display,
{
    let start = Instant::now();
    let deadline = deadline_after(start, policy.timeout);
    let mut attempts: u32 = 0;
    let mut failures: u32 = 0;

    while Instant::now() < deadline {
        attempts = attempts.saturating_add(1);
        let err = match operation().await {
            Ok(value) => {
                if attempts > 1 {
                    debug!(attempts, "Call succeeded after retry");
                }
                return RetryOutcome {
                    result: Ok(value),
                    attempts,
                    exhausted: false,
                    total_duration: start.elapsed(),
                };
            }
            Err(e) => e,
        };

        let class = classifier.classify(&err);
        if !class.is_transient() {
            debug!(attempts, error = %err, ?class, "Non-retryable error");
            return RetryOutcome {
                result: Err(err),
                attempts,
                exhausted: false,
                total_duration: start.elapsed(),
            };
        }

        failures = failures.saturating_add(1);
        let delay = policy.delay_after(failures);
        warn!(
            attempts,
            error = %err,
            ?class,
            delay_ms = delay.as_millis(),
            elapsed_ms = start.elapsed().as_millis(),
            "Transient error, will retry"
        );
        let wake = deadline.min(deadline_after(Instant::now(), delay));
        tokio::time::sleep_until(wake).await;
    }

    attempts = attempts.saturating_add(1);
    debug!(attempts, "Retry budget spent, making final attempt");
    let result = operation().await;
    RetryOutcome {
        result,
        attempts,
        exhausted: true,
        total_duration: start.elapsed(),
    }
}

/// Run `operation` with transient retries, returning the result directly.
pub async fn retry_transient<T, E, F, Fut, C>(
    policy: &RetryPolicy,
    classifier: &C,
    operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: ErrorClassifier<E> + ?Sized,
    E: std::fmt::Display,
{
    with_retry(policy, classifier, operation).await.into_result()
}
