//! Types for the run orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::run::{RunOutcome, RunPhase, TierStatus};

/// Errors returned by the run service.
#[derive(Debug, Error)]
pub enum RunError {
    /// Run not found.
    #[error("run not found: {0}")]
    NotFound(String),

    /// The seed cannot start a run.
    #[error("invalid run seed: {0}")]
    InvalidSeed(String),

    /// The run already reached a terminal phase.
    #[error("run {run_id} already {phase}")]
    AlreadyTerminal { run_id: String, phase: RunPhase },

    /// Status store error.
    #[error("status store error: {0}")]
    Status(#[from] crate::status::StatusError),

    /// The service no longer accepts runs.
    #[error("run service is shutting down")]
    ShuttingDown,
}

/// Continuation decision taken after each tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Ask the sequencer for the next tier.
    Continue,
    /// Leave the loop and finalize.
    Finalize,
}

/// One observed phase change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhaseTransition {
    pub from: RunPhase,
    pub to: RunPhase,
    pub at: DateTime<Utc>,
}

/// What a finished run looks like from the inside.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub outcome: RunOutcome,
    /// Tier statuses recorded by this execution, in order.
    pub history: Vec<TierStatus>,
    pub transitions: Vec<PhaseTransition>,
}

impl RunReport {
    pub fn phase(&self) -> RunPhase {
        self.outcome.phase()
    }

    /// Phases visited, starting with `Initializing`.
    pub fn phases(&self) -> Vec<RunPhase> {
        let mut phases = vec![RunPhase::Initializing];
        phases.extend(self.transitions.iter().map(|t| t.to));
        phases
    }

    /// Tier ids in recording order.
    pub fn tier_ids(&self) -> Vec<&str> {
        self.history.iter().map(|s| s.tier_id.as_str()).collect()
    }

    /// Number of times the loop entered `ExecutingTier`.
    pub fn executed_tiers(&self) -> usize {
        self.transitions
            .iter()
            .filter(|t| t.to == RunPhase::ExecutingTier)
            .count()
    }
}
