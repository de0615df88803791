//! Bounded retries with exponential backoff around a single step call.
//!
//! ```text
//! attempt ──► ok ──────────────────────────► Attempted { value, attempts }
//!    │
//!    └─► err ─► classify ─► retryable && attempts left?
//!                               │ yes: sleep min(delay, max_delay), delay *= multiplier
//!                               │ no:  RetryFailure
//! ```
//!
//! A hard timeout only abandons the wait; the remote call may still be
//! running, so callers must treat a timed-out attempt as "outcome unknown".

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::classifier::{self, ErrorCategory, ErrorClassifier};
use crate::error::{StepError, StepResult};
use crate::types::config::RetryPolicy;
use crate::types::phase::Phase;

/// A successful call and what it took to get there.
#[derive(Debug)]
pub struct Attempted<T> {
    pub value: T,
    pub attempts: u32,
    /// Sleeps taken between attempts, in order
    pub delays: Vec<Duration>,
}

/// The final error after retries stopped.
#[derive(Debug, Error)]
#[error("{error} (after {attempts} attempt(s))")]
pub struct RetryFailure {
    #[source]
    pub error: StepError,
    pub attempts: u32,
    pub category: ErrorCategory,
    /// False when the error was not retryable; true when attempts ran out
    pub exhausted: bool,
    pub delays: Vec<Duration>,
}

/// Counters for observability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RetryStats {
    pub first_try_successes: u64,
    pub retried_successes: u64,
    pub exhausted_failures: u64,
    pub non_retryable_failures: u64,
    pub retries: u64,
}

#[derive(Default)]
struct Counters {
    first_try_successes: AtomicU64,
    retried_successes: AtomicU64,
    exhausted_failures: AtomicU64,
    non_retryable_failures: AtomicU64,
    retries: AtomicU64,
}

/// Runs step calls under a `RetryPolicy`.
pub struct RetryExecutor {
    classifier: Arc<ErrorClassifier>,
    counters: Counters,
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(Arc::new(ErrorClassifier::new()))
    }
}

impl RetryExecutor {
    pub fn new(classifier: Arc<ErrorClassifier>) -> Self {
        Self {
            classifier,
            counters: Counters::default(),
        }
    }

    pub fn classifier(&self) -> &Arc<ErrorClassifier> {
        &self.classifier
    }

    pub fn stats(&self) -> RetryStats {
        RetryStats {
            first_try_successes: self.counters.first_try_successes.load(Ordering::Relaxed),
            retried_successes: self.counters.retried_successes.load(Ordering::Relaxed),
            exhausted_failures: self.counters.exhausted_failures.load(Ordering::Relaxed),
            non_retryable_failures: self.counters.non_retryable_failures.load(Ordering::Relaxed),
            retries: self.counters.retries.load(Ordering::Relaxed),
        }
    }

    /// Call `call(attempt)` until it succeeds, fails non-retryably, or the
    /// policy's attempts run out. `attempt` starts at 1.
    pub async fn execute<T, F, Fut>(
        &self,
        phase: Phase,
        policy: &RetryPolicy,
        mut call: F,
    ) -> Result<Attempted<T>, RetryFailure>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = StepResult<T>>,
    {
        let max_attempts = policy.attempts();
        let max_delay = policy.max_delay();
        let mut delay = policy.initial_delay();
        let mut delays = Vec::new();
        let mut attempt = 1;

        loop {
            let result = match policy.timeout() {
                Some(limit) => match tokio::time::timeout(limit, call(attempt)).await {
                    Ok(result) => result,
                    Err(_) => Err(StepError::Timeout(limit)),
                },
                None => call(attempt).await,
            };

            let err = match result {
                Ok(value) => {
                    if attempt == 1 {
                        self.counters.first_try_successes.fetch_add(1, Ordering::Relaxed);
                        debug!(phase = %phase, "step succeeded on first attempt");
                    } else {
                        self.counters.retried_successes.fetch_add(1, Ordering::Relaxed);
                        info!(phase = %phase, attempts = attempt, "step succeeded after {} attempts", attempt);
                    }
                    return Ok(Attempted {
                        value,
                        attempts: attempt,
                        delays,
                    });
                }
                Err(err) => err,
            };

            let record = self.classifier.record(&err, phase, attempt, max_attempts);
            let retryable = classifier::is_retryable(&err, record.category, policy);

            if !retryable || attempt >= max_attempts {
                let counter = if retryable {
                    &self.counters.exhausted_failures
                } else {
                    &self.counters.non_retryable_failures
                };
                counter.fetch_add(1, Ordering::Relaxed);
                warn!(
                    phase = %phase,
                    attempt,
                    max_attempts,
                    category = %record.category,
                    severity = ?record.severity,
                    retryable,
                    error = %err,
                    "step failed, giving up"
                );
                return Err(RetryFailure {
                    error: err,
                    attempts: attempt,
                    category: record.category,
                    exhausted: retryable,
                    delays,
                });
            }

            let mut sleep_for = delay.min(max_delay);
            if let StepError::RateLimited {
                retry_after: Some(after),
            } = &err
            {
                sleep_for = sleep_for.max(*after).min(max_delay);
            }

            warn!(
                phase = %phase,
                attempt,
                max_attempts,
                category = %record.category,
                delay_ms = sleep_for.as_millis() as u64,
                error = %err,
                "step failed, retrying"
            );

            self.counters.retries.fetch_add(1, Ordering::Relaxed);
            tokio::time::sleep(sleep_for).await;
            delays.push(sleep_for);

            delay = next_delay(delay, policy.backoff_multiplier, max_delay);
            attempt += 1;
        }
    }
}

/// Multiply, saturating at `max_delay`. Only `min(delay, max_delay)` is ever
/// slept, so clamping here loses nothing.
fn next_delay(current: Duration, multiplier: f64, max_delay: Duration) -> Duration {
    let multiplier = if multiplier.is_finite() && multiplier >= 1.0 {
        multiplier
    } else {
        1.0
    };
    Duration::try_from_secs_f64(current.as_secs_f64() * multiplier)
        .unwrap_or(max_delay)
        .min(max_delay)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn policy() -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(3)
            .with_initial_delay(Duration::from_millis(1000))
            .with_backoff_multiplier(2.0)
            .with_timeout(None)
    }

    #[tokio::test(start_paused = true)]
    async fn test_fails_twice_then_succeeds() {
        let executor = RetryExecutor::default();
        let calls = AtomicU32::new(0);
        let started = tokio::time::Instant::now();

        let result = executor
            .execute(Phase::Research, &policy(), |_attempt| {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err(StepError::Network("connection reset".into()))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result.value, "done");
        assert_eq!(result.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            result.delays,
            vec![Duration::from_millis(1000), Duration::from_millis(2000)]
        );
        assert!(started.elapsed() >= Duration::from_millis(3000));

        let stats = executor.stats();
        assert_eq!(stats.retried_successes, 1);
        assert_eq!(stats.first_try_successes, 0);
        assert_eq!(stats.retries, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_validation_error_is_attempted_once() {
        let executor = RetryExecutor::default();
        let calls = AtomicU32::new(0);

        let failure = executor
            .execute(Phase::Writing, &policy().with_max_attempts(5), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(StepError::Validation("bad outline".into())) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(failure.attempts, 1);
        assert!(!failure.exhausted);
        assert_eq!(failure.category, ErrorCategory::Validation);
        assert_eq!(executor.stats().non_retryable_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_attempts() {
        let executor = RetryExecutor::default();
        let calls = AtomicU32::new(0);

        let failure = executor
            .execute(Phase::Image, &policy(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(StepError::RateLimited { retry_after: None }) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(failure.exhausted);
        assert_eq!(failure.delays.len(), 2);
        assert_eq!(executor.stats().exhausted_failures, 1);
        assert_eq!(executor.classifier().stats().total, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_retryable() {
        let executor = RetryExecutor::default();
        let calls = AtomicU32::new(0);
        let policy = policy().with_timeout(Some(Duration::from_millis(50)));

        let result = executor
            .execute(Phase::Meta, &policy, |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt == 1 {
                        tokio::time::sleep(Duration::from_secs(10)).await;
                    }
                    Ok(attempt)
                }
            })
            .await
            .unwrap();

        assert_eq!(result.value, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let recent = executor.classifier().recent(1);
        assert_eq!(recent[0].category, ErrorCategory::Timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_capped_by_max_delay() {
        let executor = RetryExecutor::default();
        let policy = policy()
            .with_max_attempts(4)
            .with_max_delay(Duration::from_millis(1500));

        let failure = executor
            .execute(Phase::Research, &policy, |_| async {
                Err::<(), _>(StepError::Network("down".into()))
            })
            .await
            .unwrap_err();

        assert_eq!(
            failure.delays,
            vec![
                Duration::from_millis(1000),
                Duration::from_millis(1500),
                Duration::from_millis(1500)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_try_success_counted_separately() {
        let executor = RetryExecutor::default();
        let result = executor
            .execute(Phase::Research, &policy(), |_| async { Ok(1) })
            .await
            .unwrap();
        assert_eq!(result.attempts, 1);
        assert!(result.delays.is_empty());
        assert_eq!(executor.stats().first_try_successes, 1);
        assert_eq!(executor.stats().retried_successes, 0);
    }

    #[test]
    fn test_next_delay_saturates() {
        let max = Duration::from_secs(30);
        assert_eq!(next_delay(Duration::from_secs(20), 2.0, max), max);
        assert_eq!(next_delay(Duration::from_secs(1), f64::NAN, max), Duration::from_secs(1));
        assert_eq!(next_delay(Duration::from_secs(1), f64::INFINITY, max), Duration::from_secs(1));
    }
}
