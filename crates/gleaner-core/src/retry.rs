//! Retrying executor: drives one backend through its retry budget.
//!
//! Each attempt runs under the descriptor's per-call timeout and is
//! classified as success, retryable failure, or fatal failure. Retryable
//! failures back off exponentially between attempts; fatal failures stop
//! the budget immediately. Every attempt is finalized and reported through
//! `on_attempt` before control moves on, so accounting is an explicit step
//! in the loop rather than a wrapper around it.

use std::time::{Duration, Instant, SystemTime};

use tokio_util::sync::CancellationToken;

use crate::backends::{BackendError, ExtractOutput, ModelBackend, truncate_content};
use crate::descriptor::BackendDescriptor;
use crate::estimator::estimate_units;
use crate::pacing::AdaptivePacer;
use crate::{AttemptOutcome, ExtractionAttempt, SchemaDescriptor};

/// Exponential backoff between retryable attempts: `base × 2^(n−1)` clamped
/// to `[floor, ceiling]`, with optional jitter of up to 10%.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub floor: Duration,
    pub ceiling: Duration,
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(2),
            floor: Duration::from_secs(4),
            ceiling: Duration::from_secs(60),
            jitter: true,
        }
    }
}

impl BackoffPolicy {
    /// Delay to sleep after the `attempt`-th failure (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let raw = self.base.saturating_mul(2u32.saturating_pow(exp));
        let clamped = raw.clamp(self.floor, self.ceiling);
        if self.jitter {
            clamped
                .mul_f64(1.0 + fastrand::f64() * 0.1)
                .min(self.ceiling)
        } else {
            clamped
        }
    }
}

/// Result of driving one backend: an optional value plus every attempt made.
/// The caller inspects the attempt list to know why there is no value.
#[derive(Debug)]
pub struct RetryOutcome {
    pub value: Option<ExtractOutput>,
    pub attempts: Vec<ExtractionAttempt>,
}

impl RetryOutcome {
    fn failed(attempts: Vec<ExtractionAttempt>) -> Self {
        Self {
            value: None,
            attempts,
        }
    }
}

/// Execute one backend with bounded retries.
///
/// `on_attempt` is invoked synchronously for every finalized attempt, in
/// order. Cancellation is honored while waiting for the pacer, during the
/// in-flight call (the abandoned call is recorded as a retryable failure),
/// and during backoff sleeps.
#[allow(clippy::too_many_arguments)]
pub async fn execute_with_retry(
    backend: &dyn ModelBackend,
    descriptor: &BackendDescriptor,
    content: &str,
    schema: &SchemaDescriptor,
    max_attempts: u32,
    backoff: &BackoffPolicy,
    pacer: Option<&AdaptivePacer>,
    cancel: &CancellationToken,
    on_attempt: &(dyn Fn(&ExtractionAttempt) + Send + Sync),
) -> RetryOutcome {
    let content = truncate_content(content, descriptor.max_input_chars);
    let max_attempts = max_attempts.max(1);
    let mut attempts: Vec<ExtractionAttempt> = Vec::new();

    for attempt_no in 1..=max_attempts {
        if cancel.is_cancelled() {
            return RetryOutcome::failed(attempts);
        }

        if let Some(pacer) = pacer {
            tokio::select! {
                () = pacer.acquire() => {}
                () = cancel.cancelled() => return RetryOutcome::failed(attempts),
            }
        }

        let started_at = SystemTime::now();
        let start = Instant::now();

        let call_result: Result<ExtractOutput, BackendError> = tokio::select! {
            res = tokio::time::timeout(
                descriptor.call_timeout,
                backend.call(content, schema, descriptor.call_timeout),
            ) => match res {
                Ok(inner) => inner,
                Err(_) => Err(BackendError::Timeout(descriptor.call_timeout)),
            },
            () = cancel.cancelled() => {
                // In-flight call abandoned. Record it so the monitor reflects
                // reality; the permit-holding caller returns right after us.
                let attempt = ExtractionAttempt {
                    backend: backend.id(),
                    attempt: attempt_no,
                    started_at,
                    elapsed: start.elapsed(),
                    outcome: AttemptOutcome::RetryableFailure,
                    error: Some("request cancelled while call in flight".into()),
                    units: None,
                };
                on_attempt(&attempt);
                attempts.push(attempt);
                return RetryOutcome::failed(attempts);
            }
        };

        // A well-formed response that fails schema validation is retryable:
        // models are frequently right on the second try.
        let call_result = call_result.and_then(|value| match schema.validate(&value) {
            Ok(()) => Ok(value),
            Err(msg) => Err(BackendError::SchemaValidation(msg)),
        });

        match call_result {
            Ok(value) => {
                let attempt = ExtractionAttempt {
                    backend: backend.id(),
                    attempt: attempt_no,
                    started_at,
                    elapsed: start.elapsed(),
                    outcome: AttemptOutcome::Success,
                    error: None,
                    units: Some(estimate_units(content, schema)),
                };
                on_attempt(&attempt);
                attempts.push(attempt);
                return RetryOutcome {
                    value: Some(value),
                    attempts,
                };
            }
            Err(err) => {
                if let BackendError::RateLimited { .. } = err
                    && let Some(pacer) = pacer
                {
                    pacer.on_rate_limited();
                }

                let retryable = err.is_retryable();
                let attempt = ExtractionAttempt {
                    backend: backend.id(),
                    attempt: attempt_no,
                    started_at,
                    elapsed: start.elapsed(),
                    outcome: if retryable {
                        AttemptOutcome::RetryableFailure
                    } else {
                        AttemptOutcome::FatalFailure
                    },
                    error: Some(err.to_string()),
                    units: None,
                };
                on_attempt(&attempt);
                attempts.push(attempt);

                tracing::debug!(
                    backend = %backend.id(),
                    attempt = attempt_no,
                    retryable,
                    error = %err,
                    "backend call failed"
                );

                if !retryable {
                    return RetryOutcome::failed(attempts);
                }

                if attempt_no < max_attempts {
                    let mut delay = backoff.delay(attempt_no);
                    if let BackendError::RateLimited {
                        retry_after: Some(ra),
                    } = err
                    {
                        delay = delay.max(ra).min(backoff.ceiling);
                    }
                    tokio::select! {
                        () = tokio::time::sleep(delay) => {}
                        () = cancel.cancelled() => return RetryOutcome::failed(attempts),
                    }
                }
            }
        }
    }

    RetryOutcome::failed(attempts)
}
