//! Retry executor.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::metrics::{STEP_ATTEMPTS, STEP_BACKOFFS};
use crate::step::{StepError, StepOutcome};

use super::policy::RetryPolicy;

/// Trace hook observing attempts and waits. Never alters control flow.
pub trait RetryObserver: Send + Sync {
    /// An attempt is about to start (1-based).
    fn on_attempt(&self, _step: &str, _attempt: u32) {}

    /// An attempt failed.
    fn on_failure(&self, _step: &str, _attempt: u32, _error: &StepError) {}

    /// The executor is about to wait before the next attempt.
    fn on_backoff(&self, _step: &str, _attempt: u32, _delay: Duration) {}
}

/// Default observer: logs through `tracing` and feeds the step metrics.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl RetryObserver for TracingObserver {
    fn on_attempt(&self, step: &str, attempt: u32) {
        debug!(step, attempt, "Starting attempt");
        STEP_ATTEMPTS.with_label_values(&[step]).inc();
    }

    fn on_failure(&self, step: &str, attempt: u32, error: &StepError) {
        warn!(step, attempt, class = %error.class, error = %error.message, "Attempt failed");
    }

    fn on_backoff(&self, step: &str, attempt: u32, delay: Duration) {
        debug!(step, attempt, delay_ms = delay.as_millis() as u64, "Backing off");
        STEP_BACKOFFS.with_label_values(&[step]).inc();
    }
}

/// Wraps a single step invocation with a bounded retry policy.
///
/// Holds no per-call state, so one executor can drive many concurrent
/// invocations.
#[derive(Clone)]
pub struct RetryExecutor {
    observer: Arc<dyn RetryObserver>,
    cancel: Option<CancellationToken>,
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryExecutor {
    pub fn new() -> Self {
        Self {
            observer: Arc::new(TracingObserver),
            cancel: None,
        }
    }

    /// Replaces the trace hook.
    pub fn with_observer(mut self, observer: Arc<dyn RetryObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Stops scheduling new attempts once `token` is cancelled.
    ///
    /// An attempt already in flight runs to completion.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|t| t.is_cancelled())
    }

    /// Runs `invoke` under `policy`.
    ///
    /// Returns the first success, the first non-retryable failure, or the
    /// last retryable failure annotated as `AttemptsExhausted`.
    pub async fn execute<T, F, Fut>(
        &self,
        step: &str,
        policy: &RetryPolicy,
        mut invoke: F,
    ) -> StepOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StepOutcome<T>>,
    {
        let max_attempts = policy.attempts();
        let mut attempt = 0;

        loop {
            if self.is_cancelled() {
                return Err(StepError::cancelled(format!(
                    "{} cancelled before attempt {}",
                    step,
                    attempt + 1
                ))
                .with_attempts(attempt));
            }

            attempt += 1;
            self.observer.on_attempt(step, attempt);

            let err = match invoke().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            self.observer.on_failure(step, attempt, &err);

            if !policy.is_retryable(err.class) {
                return Err(err.with_attempts(attempt));
            }
            if attempt >= max_attempts {
                return Err(err.exhausted(attempt));
            }

            let delay = policy.delay_for(attempt);
            self.observer.on_backoff(step, attempt, delay);

            match &self.cancel {
                Some(token) => {
                    tokio::select! {
                        _ = token.cancelled() => {
                            return Err(StepError::cancelled(format!(
                                "{} cancelled during backoff: {}",
                                step, err.message
                            ))
                            .with_attempts(attempt));
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                None => tokio::time::sleep(delay).await,
            }
        }
    }
}
