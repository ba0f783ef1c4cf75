//! Step outcomes and the failure taxonomy shared by every collaborator.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of a failed step.
///
/// The class decides whether a failure is retried and how far it
/// propagates (work item, tier, or run).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Timeouts, throttling, transport faults. Retryable.
    Transient,
    /// Bad input, authorization failures. Never retried.
    Permanent,
    /// A required collaborator (sequencer, finalizer, store) is unreachable. Retryable.
    Unavailable,
    /// A required collaborator rejected the run as malformed. Never retried.
    Invalid,
    /// A retryable failure that survived every attempt.
    AttemptsExhausted,
    /// The run was cancelled before the step could finish.
    Cancelled,
}

impl FailureClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureClass::Transient => "transient",
            FailureClass::Permanent => "permanent",
            FailureClass::Unavailable => "unavailable",
            FailureClass::Invalid => "invalid",
            FailureClass::AttemptsExhausted => "attempts_exhausted",
            FailureClass::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified step failure.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{class}: {message}")]
pub struct StepError {
    /// Failure class.
    pub class: FailureClass,
    /// Human readable reason.
    pub message: String,
    /// Number of attempts made before this error was returned (0 if unknown).
    #[serde(default)]
    pub attempts: u32,
    /// The class that was being retried when this error became `AttemptsExhausted`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<FailureClass>,
}

impl StepError {
    pub fn new(class: FailureClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
            attempts: 0,
            cause: None,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(FailureClass::Transient, message)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(FailureClass::Permanent, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(FailureClass::Unavailable, message)
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(FailureClass::Invalid, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(FailureClass::Cancelled, message)
    }

    /// Records how many attempts produced this error.
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    /// Re-labels a retryable failure as `AttemptsExhausted`, keeping the
    /// original class as the cause.
    pub fn exhausted(self, attempts: u32) -> Self {
        Self {
            cause: Some(self.class),
            class: FailureClass::AttemptsExhausted,
            message: self.message,
            attempts,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.class == FailureClass::Cancelled
    }
}

/// Result of one step invocation: a success value or a classified failure.
pub type StepOutcome<T> = Result<T, StepError>;
