//! Status store trait and types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::run::{RunContext, RunOutcome, RunPhase, TierStatus};

/// Errors from the status store.
#[derive(Debug, Error)]
pub enum StatusError {
    /// Run not found.
    #[error("run not found: {0}")]
    NotFound(String),

    /// A status for this tier was already recorded.
    #[error("tier {tier_id} already recorded for run {run_id}")]
    DuplicateTier { run_id: String, tier_id: String },

    /// Database error.
    #[error("database error: {0}")]
    Database(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Persisted record of one run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunRecord {
    pub run_id: String,
    pub client_id: String,
    pub plan: Option<String>,
    pub payload: Value,
    pub phase: RunPhase,
    /// Last recorded tier.
    pub cursor: Option<String>,
    /// Set once the run reaches a terminal phase.
    pub outcome: Option<RunOutcome>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Filter for querying runs.
#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    /// Filter by phase.
    pub phase: Option<RunPhase>,
    /// Filter by client.
    pub client_id: Option<String>,
    /// Maximum number of results.
    pub limit: i64,
    /// Offset for pagination.
    pub offset: i64,
}

impl RunFilter {
    /// Create a new filter with defaults.
    pub fn new() -> Self {
        Self {
            phase: None,
            client_id: None,
            limit: 100,
            offset: 0,
        }
    }

    pub fn with_phase(mut self, phase: RunPhase) -> Self {
        self.phase = Some(phase);
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}

/// Trait for run and tier status storage backends.
///
/// Tier statuses are append-only: each `(run_id, tier_id)` pair is
/// recorded at most once.
pub trait StatusStore: Send + Sync {
    /// Persist a new run in `Initializing`.
    fn create_run(&self, ctx: &RunContext) -> Result<RunRecord, StatusError>;

    /// Get a run by ID.
    fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>, StatusError>;

    /// List runs matching the filter, newest first.
    fn list_runs(&self, filter: &RunFilter) -> Result<Vec<RunRecord>, StatusError>;

    /// Count runs matching the filter.
    fn count_runs(&self, filter: &RunFilter) -> Result<i64, StatusError>;

    /// Update the run's current phase and cursor.
    fn update_phase(
        &self,
        run_id: &str,
        phase: RunPhase,
        cursor: Option<&str>,
    ) -> Result<(), StatusError>;

    /// Store the terminal outcome.
    fn finish_run(&self, run_id: &str, outcome: &RunOutcome) -> Result<(), StatusError>;

    /// Append a tier status. Fails with `DuplicateTier` if already recorded.
    fn record_tier(&self, run_id: &str, status: &TierStatus) -> Result<(), StatusError>;

    /// All recorded tier statuses of a run, in recording order.
    fn tier_history(&self, run_id: &str) -> Result<Vec<TierStatus>, StatusError>;
}
