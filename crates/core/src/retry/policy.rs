//! Retry policy configuration.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::step::FailureClass;

/// How the backoff delay is sampled from its exponential bound.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// Uniformly sampled between zero and the bound.
    #[default]
    Full,
    /// Always wait the full bound.
    None,
}

/// Retry policy for one class of step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum attempts, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff bound after the first failed attempt, in milliseconds.
    #[serde(default = "default_base_interval")]
    pub base_interval_ms: u64,

    /// Upper cap on any backoff bound, in milliseconds.
    #[serde(default = "default_max_interval")]
    pub max_interval_ms: u64,

    /// Exponential backoff multiplier.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Jitter strategy.
    #[serde(default)]
    pub jitter: JitterStrategy,

    /// Failure classes eligible for retry.
    #[serde(default = "default_retryable")]
    pub retryable: Vec<FailureClass>,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_interval() -> u64 {
    1000 // 1 second
}

fn default_max_interval() -> u64 {
    30_000 // 30 seconds
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_retryable() -> Vec<FailureClass> {
    vec![FailureClass::Transient, FailureClass::Unavailable]
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_interval_ms: default_base_interval(),
            max_interval_ms: default_max_interval(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: JitterStrategy::default(),
            retryable: default_retryable(),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self::default().with_max_attempts(1)
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_base_interval(mut self, interval: Duration) -> Self {
        self.base_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_jitter(mut self, jitter: JitterStrategy) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_retryable(mut self, classes: Vec<FailureClass>) -> Self {
        self.retryable = classes;
        self
    }

    /// Effective attempt budget. Zero is treated as a single attempt.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    pub fn is_retryable(&self, class: FailureClass) -> bool {
        self.retryable.contains(&class)
    }

    /// Exponential bound for the wait after failed attempt `attempt` (1-based):
    /// `min(cap, base * multiplier^(attempt-1))`.
    pub fn backoff_bound(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let raw = self.base_interval_ms as f64 * self.backoff_multiplier.powi(exponent);
        let capped = raw.min(self.max_interval_ms as f64);
        if !capped.is_finite() || capped <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_millis(capped as u64)
    }

    /// Samples the actual wait after failed attempt `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let bound = self.backoff_bound(attempt);
        match self.jitter {
            JitterStrategy::None => bound,
            JitterStrategy::Full => {
                let bound_ms = bound.as_millis() as u64;
                if bound_ms == 0 {
                    return Duration::ZERO;
                }
                Duration::from_millis(rand::thread_rng().gen_range(0..=bound_ms))
            }
        }
    }
}

/// Per-step retry policies.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicies {
    /// Work item invocations.
    #[serde(default)]
    pub items: RetryPolicy,
    /// Tier sequencer lookups.
    #[serde(default)]
    pub sequencer: RetryPolicy,
    /// Final artifact assembly.
    #[serde(default)]
    pub finalizer: RetryPolicy,
    /// Tier status recording.
    #[serde(default)]
    pub status: RetryPolicy,
    /// Client registration.
    #[serde(default)]
    pub registration: RetryPolicy,
}

impl RetryPolicies {
    /// Uses the same policy for every step.
    pub fn uniform(policy: RetryPolicy) -> Self {
        Self {
            items: policy.clone(),
            sequencer: policy.clone(),
            finalizer: policy.clone(),
            status: policy.clone(),
            registration: policy,
        }
    }

    /// Iterates `(step, policy)` pairs, used by config validation.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &RetryPolicy)> {
        [
            ("items", &self.items),
            ("sequencer", &self.sequencer),
            ("finalizer", &self.finalizer),
            ("status", &self.status),
            ("registration", &self.registration),
        ]
        .into_iter()
    }
}
